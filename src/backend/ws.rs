//! WebSocket camera stream: each connection subscribes to the
//! slot-of-one frame broadcast and accepts `{camera: 0|1|2}` control
//! frames on the same socket to pick left/right/dual. Grounded on
//! `original_source/backend/app/api/routers/video_stream.py` and
//! `core/use_cases/video_stream.py` (`split_frame`/`encode_jpeg`).

use super::BackendState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::imageops;
use serde::Deserialize;

const SPLIT_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum CameraSelection {
    Left,
    Right,
    Dual,
}

impl TryFrom<u8> for CameraSelection {
    type Error = String;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Left),
            1 => Ok(Self::Right),
            2 => Ok(Self::Dual),
            other => Err(format!("unknown camera selection {other}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ControlFrame {
    camera: CameraSelection,
}

pub async fn ws_handler(upgrade: WebSocketUpgrade, State(state): State<BackendState>) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BackendState) {
    let (mut sender, mut receiver) = socket.split();
    let mut frames = state.frame_broadcast.subscribe();
    let mut selection = CameraSelection::Dual;

    loop {
        tokio::select! {
            control = receiver.next() => {
                match control {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(frame) = serde_json::from_str::<ControlFrame>(&text) {
                            selection = frame.camera;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            frame = frames.recv() => {
                let jpeg_base64 = match frame {
                    Ok(f) => f,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let Ok(jpeg) = BASE64.decode(jpeg_base64.as_bytes()) else { continue };
                let Some(out) = render_for_selection(&jpeg, selection) else { continue };
                if sender.send(Message::Binary(out)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// For camera 0/1, decodes the dual image, slices horizontally at
/// width/2, and re-encodes as JPEG quality 85; for camera 2, forwards
/// the raw JPEG unchanged (spec.md §4.8).
fn render_for_selection(jpeg: &[u8], selection: CameraSelection) -> Option<Vec<u8>> {
    if selection == CameraSelection::Dual {
        return Some(jpeg.to_vec());
    }

    let image = image::load_from_memory(jpeg).ok()?;
    let half_width = image.width() / 2;
    let cropped = match selection {
        CameraSelection::Left => imageops::crop_imm(&image, 0, 0, half_width, image.height()).to_image(),
        CameraSelection::Right => imageops::crop_imm(&image, half_width, 0, image.width() - half_width, image.height()).to_image(),
        CameraSelection::Dual => unreachable!(),
    };

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, SPLIT_JPEG_QUALITY);
    encoder
        .encode(&cropped, cropped.width(), cropped.height(), image::ColorType::Rgba8)
        .ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_selection_parses_from_u8() {
        assert_eq!(CameraSelection::try_from(0).unwrap(), CameraSelection::Left);
        assert_eq!(CameraSelection::try_from(1).unwrap(), CameraSelection::Right);
        assert_eq!(CameraSelection::try_from(2).unwrap(), CameraSelection::Dual);
        assert!(CameraSelection::try_from(3).is_err());
    }

    #[test]
    fn dual_selection_forwards_raw_bytes() {
        let raw = vec![1, 2, 3, 4];
        let out = render_for_selection(&raw, CameraSelection::Dual).unwrap();
        assert_eq!(out, raw);
    }

    /// A synthetic dual-camera frame: red left half, blue right half.
    fn dual_camera_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut img = image::RgbImage::new(width, height);
        for (x, _y, pixel) in img.enumerate_pixels_mut() {
            *pixel = if x < width / 2 {
                image::Rgb([220, 20, 20])
            } else {
                image::Rgb([20, 20, 220])
            };
        }
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, 95);
        encoder
            .encode(&img, width, height, image::ColorType::Rgb8)
            .unwrap();
        out
    }

    fn average_rgb(jpeg: &[u8]) -> (f64, f64, f64) {
        let decoded = image::load_from_memory(jpeg).unwrap().to_rgb8();
        let (mut r, mut g, mut b, mut n) = (0f64, 0f64, 0f64, 0f64);
        for pixel in decoded.pixels() {
            r += pixel[0] as f64;
            g += pixel[1] as f64;
            b += pixel[2] as f64;
            n += 1.0;
        }
        (r / n, g / n, b / n)
    }

    #[test]
    fn left_selection_crops_to_left_half_and_stays_red() {
        let dual = dual_camera_jpeg(64, 32);
        let out = render_for_selection(&dual, CameraSelection::Left).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 32);
        let (r, _g, b) = average_rgb(&out);
        assert!(r > b, "left half should be predominantly red, got avg rgb r={r} b={b}");
    }

    #[test]
    fn right_selection_crops_to_right_half_and_stays_blue() {
        let dual = dual_camera_jpeg(64, 32);
        let out = render_for_selection(&dual, CameraSelection::Right).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 32);
        let (r, _g, b) = average_rgb(&out);
        assert!(b > r, "right half should be predominantly blue, got avg rgb r={r} b={b}");
    }
}
