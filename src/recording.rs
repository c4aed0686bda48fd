//! Two-state recording controller: threshold + hysteresis over the
//! Router's per-frame score, driving the camera's start/stop HTTP API.
//! Grounded on spec.md §4.5 (no direct `original_source` counterpart
//! beyond the generic "alert" idea in `recording/recordingThread.py`);
//! the `reqwest` client follows `prospectorengine-prospector-btc`'s
//! dependency convention for outbound HTTP.

use crate::types::RecordingState;
use chrono::Utc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(3);

pub struct RecordingController {
    client: reqwest::Client,
    control_base_url: String,
    state: RecordingState,
}

impl RecordingController {
    pub fn new(control_base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client with static config never fails to build"),
            control_base_url,
            state: RecordingState::default(),
        }
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    /// Feeds one frame's score through the state machine. Returns
    /// `Some(is_recording)` exactly when a transition fired this frame
    /// (edge-triggered, spec.md §4.5), so the caller knows when to
    /// publish `RecordingStatus`.
    pub async fn observe_score(&mut self, score: f64, threshold: i64) -> Option<bool> {
        let threshold = threshold as f64;
        if !self.state.is_recording && score >= threshold {
            self.post_with_retry("start").await;
            self.state.is_recording = true;
            self.state.last_transition = Utc::now();
            Some(true)
        } else if self.state.is_recording && score < threshold {
            self.post_with_retry("stop").await;
            self.state.is_recording = false;
            self.state.last_transition = Utc::now();
            Some(false)
        } else {
            None
        }
    }

    /// HTTP calls use a short timeout and are retried at most once;
    /// failures are logged but never revert the state transition — the
    /// camera is treated as eventually consistent (spec.md §4.5).
    async fn post_with_retry(&self, action: &str) {
        let url = format!("{}/{}", self.control_base_url.trim_end_matches('/'), action);
        for attempt in 0..2 {
            match self.client.post(&url).send().await {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    tracing::warn!(action, status = %response.status(), attempt, "camera control call rejected");
                }
                Err(e) => {
                    tracing::warn!(action, error = %e, attempt, "camera control call failed");
                }
            }
        }
    }
}
