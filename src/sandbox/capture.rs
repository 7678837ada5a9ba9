use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bevy::prelude::*;
use bevy::render::view::screenshot::{Screenshot, ScreenshotCaptured};
use bevy::window::PrimaryWindow;

use super::SandboxChannels;
use crate::protocol::{RequestId, SandboxMessage};

/// Frames a capture may stay outstanding before it is answered with an error.
pub const CAPTURE_FRAME_BUDGET: u32 = 120;

#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    pub request_id: Option<RequestId>,
    /// The `Screenshot` entity whose capture answers this request.
    pub screenshot: Entity,
    pub frames_waited: u32,
}

/// At most one capture in flight. While set, the inbound queue is held.
#[derive(Resource, Default, Debug)]
pub struct PendingCapture {
    pub request: Option<CaptureRequest>,
}

impl PendingCapture {
    pub fn is_waiting(&self) -> bool {
        self.request.is_some()
    }
}

/// Queues a primary window capture for the next rendered frame.
pub(crate) fn begin_capture(
    world: &mut World,
    request_id: Option<RequestId>,
) -> Result<(), String> {
    let has_window = world
        .query_filtered::<Entity, With<PrimaryWindow>>()
        .iter(world)
        .next()
        .is_some();
    if !has_window {
        return Err("Screenshot failed: no window to capture in headless mode".to_string());
    }
    let screenshot = world.spawn(Screenshot::primary_window()).id();
    world.resource_mut::<PendingCapture>().request = Some(CaptureRequest {
        request_id,
        screenshot,
        frames_waited: 0,
    });
    Ok(())
}

pub(crate) fn on_screenshot_captured(
    trigger: Trigger<ScreenshotCaptured>,
    mut pending: ResMut<PendingCapture>,
    channels: Res<SandboxChannels>,
) {
    let Some(request) = pending
        .request
        .filter(|request| request.screenshot == trigger.entity())
    else {
        warn!("[promptscene sandbox] Dropping screenshot nobody asked for");
        return;
    };
    pending.request = None;
    let reply = match trigger
        .event()
        .0
        .clone()
        .try_into_dynamic()
        .map_err(|e| e.to_string())
        .and_then(|img| encode_png_data_url(&img))
    {
        Ok(data_url) => SandboxMessage::Screenshot {
            data_url,
            request_id: request.request_id,
        },
        Err(e) => SandboxMessage::Error {
            message: format!("Screenshot failed: {e}"),
            request_id: request.request_id,
        },
    };
    channels.send(reply);
}

pub(crate) fn expire_stalled_capture(
    mut commands: Commands,
    mut pending: ResMut<PendingCapture>,
    channels: Res<SandboxChannels>,
) {
    let Some(request) = pending.request.as_mut() else {
        return;
    };
    request.frames_waited += 1;
    if request.frames_waited <= CAPTURE_FRAME_BUDGET {
        return;
    }
    let request_id = request.request_id;
    // A late frame from this capture must not answer a newer request.
    if let Some(mut screenshot) = commands.get_entity(request.screenshot) {
        screenshot.despawn();
    }
    pending.request = None;
    warn!("[promptscene sandbox] Screenshot not captured within {CAPTURE_FRAME_BUDGET} frames");
    channels.send(SandboxMessage::Error {
        message: "Screenshot failed: frame was never captured".to_string(),
        request_id,
    });
}

pub fn encode_png_data_url(image: &image::DynamicImage) -> Result<String, String> {
    let rgba = image::DynamicImage::ImageRgba8(image.to_rgba8());
    let mut bytes = Vec::new();
    rgba.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_decodes_back_to_the_same_png() {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            4,
            3,
            image::Rgba([248, 249, 250, 255]),
        ));
        let url = encode_png_data_url(&img).expect("encode");
        let payload = url
            .strip_prefix("data:image/png;base64,")
            .expect("png data url prefix");
        let bytes = BASE64.decode(payload).expect("base64");
        let decoded = image::load_from_memory(&bytes).expect("png");
        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 3);
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0).0, [248, 249, 250, 255]);
    }

    #[test]
    fn idle_capture_does_not_hold_the_queue() {
        assert!(!PendingCapture::default().is_waiting());
    }
}
