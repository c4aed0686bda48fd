//! Edge process entry point: builds the pipeline leaves-first (tracker,
//! detectors, then the router, then the frame pump and recording
//! controller, then the event fabric, then the control dispatcher — no
//! cycles, per spec.md §9) and runs the single task that owns the
//! Router for its lifetime. Grounded on the teacher's `main.rs`
//! (`tokio::spawn` per listener, top-level `anyhow::Result<()>`).

use anyhow::Result;
use roadwatch::broker::edge::ConnectionManager;
use roadwatch::config::{AppConfig, ProviderKind};
use roadwatch::control::apply_control_message;
use roadwatch::detector::local::{default_class_map, LocalDetector, NullModel};
use roadwatch::detector::RemoteDetector;
use roadwatch::frame_pump::{process_one_frame, CameraStream};
use roadwatch::recording::RecordingController;
use roadwatch::router::Router;
use roadwatch::telemetry::init_telemetry;
use std::sync::Arc;
use std::time::Duration;

const CONFIG_PATH: &str = "config.json";
const CAMERA_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry("edge");

    let mut app_config = AppConfig::load(CONFIG_PATH)?;
    let mut threshold = app_config.runtime.suspicion_threshold;

    let local = Arc::new(LocalDetector::new(Box::new(NullModel::default())));
    let local_class_map = default_class_map();
    let mut router = Router::new(local, local_class_map, app_config.runtime.class_weights.clone());

    for provider in app_config.providers.values() {
        if provider.kind == ProviderKind::Remote {
            if let (Some(address), Some(pem)) = (&provider.connection_address, &provider.server_certificate) {
                if let Ok(detector) = RemoteDetector::connect(provider.name.clone(), address.clone(), pem.clone()) {
                    router.register(provider.name.clone(), Arc::new(detector));
                }
            }
        }
    }
    router.select(&app_config.runtime.active_provider);

    let mut recording = RecordingController::new(format!(
        "http://{}:{}",
        app_config.transport.camera_ip, app_config.transport.camera_control_port
    ));

    let (broker, mut control_rx) = ConnectionManager::connect(&app_config.transport.broker_url, "roadwatch-edge");

    let camera_address = format!("{}:{}", app_config.transport.camera_ip, app_config.transport.camera_video_port);
    let camera_cert_pem = std::env::var("CAMERA_CERT_PATH")
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok());

    loop {
        let mut stream = match CameraStream::connect(&camera_address, camera_cert_pem.as_deref()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "camera connect failed, retrying");
                tokio::time::sleep(CAMERA_RECONNECT_DELAY).await;
                continue;
            }
        };

        let mut frame_id: u64 = 0;
        loop {
            tokio::select! {
                frame_result = stream.read_frame() => {
                    match frame_result {
                        Ok(payload) => {
                            process_one_frame(frame_id, payload, &mut router, &mut recording, threshold, &broker, &broker.lossy_publisher()).await;
                            frame_id += 1;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "camera stream read error, reconnecting");
                            break;
                        }
                    }
                }
                Some(control) = control_rx.recv() => {
                    apply_control_message(control, &mut router, &mut app_config, &mut threshold, &broker).await;
                }
            }
        }
    }
}
