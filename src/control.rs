//! Control-message dispatcher: applies a decoded `ControlMessage` to the
//! Router/AppConfig and publishes the matching `ResponseMessage`. Lives in
//! the library (rather than inline in `bin/edge.rs`) so it can be driven
//! directly against a fake `Detector`/`ConnectionManager` in tests, same
//! as the Router and RecordingController it touches.

use crate::broker::edge::{ConnectionManager, ControlMessage};
use crate::broker::RelatedTo;
use crate::config::{AppConfig, ProviderKind, ProviderRegistration};
use crate::detector::{Detector, RemoteDetector};
use crate::router::Router;
use std::sync::Arc;
use std::time::Duration;

const REMOTE_READINESS_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn apply_control_message(
    control: ControlMessage,
    router: &mut Router,
    app_config: &mut AppConfig,
    threshold: &mut i64,
    broker: &ConnectionManager,
) {
    match control {
        ControlMessage::CloudProviderConfig(message) if !message.delete => {
            let pem = der_base64_to_pem(&message.server_certification);
            match RemoteDetector::connect(message.provider_name.clone(), message.connection_ip.clone(), pem.clone()) {
                Ok(detector) => {
                    let detector = Arc::new(detector);
                    if wait_for_readiness(&detector, REMOTE_READINESS_TIMEOUT).await {
                        router.register(message.provider_name.clone(), detector);
                        router.select(&message.provider_name);
                        app_config.add_provider(ProviderRegistration {
                            name: message.provider_name.clone(),
                            kind: ProviderKind::Remote,
                            connection_address: Some(message.connection_ip.clone()),
                            server_certificate: Some(pem),
                            active: true,
                        });
                        if let Err(e) = app_config.set_active_provider(&message.provider_name) {
                            tracing::warn!(error = %e, "failed to set active provider");
                        }
                        let _ = app_config.save();
                        let _ = broker.publish_response(true, format!("registered provider {}", message.provider_name), RelatedTo::Cloud).await;
                    } else {
                        tracing::warn!(provider = %message.provider_name, "remote provider did not become ready within timeout, dropping");
                        let _ = broker.publish_response(false, format!("provider {} did not become ready", message.provider_name), RelatedTo::Cloud).await;
                    }
                }
                Err(e) => {
                    let _ = broker.publish_response(false, format!("failed to connect provider: {e}"), RelatedTo::Cloud).await;
                }
            }
        }
        ControlMessage::CloudProviderConfig(message) => {
            if message.provider_name == crate::router::LOCAL_PROVIDER_NAME {
                let _ = broker.publish_response(false, "cannot delete local provider", RelatedTo::Cloud).await;
                return;
            }
            router.remove(&message.provider_name).await;
            app_config.remove_provider(&message.provider_name);
            let active = router.active_provider().to_string();
            if let Err(e) = app_config.set_active_provider(&active) {
                tracing::warn!(error = %e, "failed to set active provider");
            }
            let _ = app_config.save();
            let _ = broker.publish_response(true, format!("removed provider {}", message.provider_name), RelatedTo::Cloud).await;
        }
        ControlMessage::SuspicionConfig(message) => {
            app_config.runtime.apply_suspicion_config(message.threshold, &message.class_weights);
            *threshold = app_config.runtime.suspicion_threshold;
            router.set_class_weights(app_config.runtime.class_weights.clone());
            let _ = app_config.save();
            let _ = broker.publish_response(true, "suspicion config updated", RelatedTo::Suspicion).await;
        }
    }
}

async fn wait_for_readiness(detector: &RemoteDetector, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if detector.ready() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn der_base64_to_pem(der_base64: &str) -> String {
    format!("-----BEGIN CERTIFICATE-----\n{der_base64}\n-----END CERTIFICATE-----\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SuspicionConfigMessage;
    use crate::detector::local::{default_class_map, LocalDetector, NullModel};
    use std::collections::HashMap;

    fn test_config() -> AppConfig {
        let dir = std::env::temp_dir().join(format!("roadwatch-control-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        AppConfig::load(dir.join("config.json")).unwrap()
    }

    /// Scenario 4 (spec.md §8): a SuspicionConfig control message updates
    /// the runtime threshold and per-class weight, is persisted, and the
    /// caller's `threshold` out-param reflects the new value for
    /// subsequent frames.
    #[tokio::test(flavor = "multi_thread")]
    async fn scenario_4_suspicion_config_updates_threshold_and_weights() {
        let local = Arc::new(LocalDetector::new(Box::new(NullModel::default())));
        let mut router = Router::new(local, default_class_map(), HashMap::new());
        let mut app_config = test_config();
        let mut threshold = app_config.runtime.suspicion_threshold;
        assert_eq!(threshold, 75);

        let (broker, _control_rx) = ConnectionManager::connect("mqtt://127.0.0.1:1", "scenario-4-test");

        let mut class_weights = HashMap::new();
        class_weights.insert("0".to_string(), 2.0);
        let message = ControlMessage::SuspicionConfig(SuspicionConfigMessage { threshold: 50, class_weights });

        apply_control_message(message, &mut router, &mut app_config, &mut threshold, &broker).await;

        assert_eq!(threshold, 50);
        assert_eq!(app_config.runtime.suspicion_threshold, 50);
        assert_eq!(app_config.runtime.class_weight(Some(0)), 2.0);

        let reloaded = AppConfig::load(app_config.path()).unwrap();
        assert_eq!(reloaded.runtime.suspicion_threshold, 50);
        assert_eq!(reloaded.runtime.class_weight(Some(0)), 2.0);
    }
}
