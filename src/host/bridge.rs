use bevy::log::{info, warn};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::error::BridgeError;
use crate::protocol::{HostMessage, RequestId, SandboxMessage};

pub const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 64;

/// What the host learns about the sandbox, fanned out to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxEvent {
    Ready,
    RunCompleted {
        request_id: Option<RequestId>,
    },
    ExecutionFailed {
        message: String,
        request_id: Option<RequestId>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewControlState {
    #[serde(rename = "autoRotate")]
    pub auto_rotate: bool,
    pub wireframe: bool,
}

struct ScreenshotListener {
    request_id: RequestId,
    reply: oneshot::Sender<Result<String, String>>,
}

#[derive(Default)]
struct BridgeState {
    ready: bool,
    pending_code: Option<String>,
    next_request_id: RequestId,
    screenshot: Option<ScreenshotListener>,
    view: ViewControlState,
}

impl BridgeState {
    fn allocate_id(&mut self) -> RequestId {
        self.next_request_id += 1;
        self.next_request_id
    }
}

/// Host side of the sandbox boundary. Cheap to clone; every clone talks to
/// the same sandbox.
#[derive(Clone)]
pub struct SandboxBridge {
    state: Arc<Mutex<BridgeState>>,
    outbound: Sender<String>,
    events: broadcast::Sender<SandboxEvent>,
}

impl SandboxBridge {
    pub fn new(outbound: Sender<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(BridgeState::default())),
            outbound,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, message: HostMessage) -> Result<(), BridgeError> {
        self.outbound
            .send(message.encode())
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Decodes and dispatches everything the sandbox sends until it hangs up.
    pub fn spawn_pump(
        &self,
        mut inbound: mpsc::UnboundedReceiver<String>,
    ) -> tokio::task::JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(text) = inbound.recv().await {
                match SandboxMessage::decode(&text) {
                    Ok(message) => bridge.dispatch(message),
                    Err(e) => warn!("[promptscene host] {e}"),
                }
            }
            warn!("[promptscene host] Sandbox channel closed");
        })
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }

    pub fn view_state(&self) -> ViewControlState {
        self.lock().view
    }

    pub fn has_screenshot_listener(&self) -> bool {
        self.lock().screenshot.is_some()
    }

    /// Sends code to the sandbox, or holds it until the sandbox is ready.
    /// Held code is replaced by any newer run.
    pub fn run(&self, code: impl Into<String>) -> Option<RequestId> {
        let code = code.into();
        let mut state = self.lock();
        if !state.ready {
            if state.pending_code.replace(code).is_some() {
                info!("[promptscene host] Sandbox not ready, replaced queued code");
            }
            return None;
        }
        let request_id = state.allocate_id();
        if let Err(e) = self.send(HostMessage::RunCode {
            code,
            request_id: Some(request_id),
        }) {
            warn!("[promptscene host] Could not send code: {e}");
            return None;
        }
        Some(request_id)
    }

    /// Resolves with a PNG data URL of the current frame.
    pub async fn capture_screenshot(&self) -> Result<String, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut state = self.lock();
            if let Some(listener) = &state.screenshot {
                // A listener whose caller went away no longer counts.
                if !listener.reply.is_closed() {
                    return Err(BridgeError::ScreenshotBusy);
                }
            }
            let request_id = state.allocate_id();
            state.screenshot = Some(ScreenshotListener {
                request_id,
                reply: tx,
            });
            if let Err(e) = self.send(HostMessage::GetScreenshot {
                request_id: Some(request_id),
            }) {
                state.screenshot = None;
                return Err(e);
            }
            request_id
        };

        match tokio::time::timeout(SCREENSHOT_TIMEOUT, rx).await {
            Ok(Ok(Ok(data_url))) => Ok(data_url),
            Ok(Ok(Err(message))) => Err(BridgeError::ScreenshotFailed(message)),
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => {
                let mut state = self.lock();
                if state
                    .screenshot
                    .as_ref()
                    .is_some_and(|l| l.request_id == request_id)
                {
                    state.screenshot = None;
                }
                Err(BridgeError::ScreenshotTimeout)
            }
        }
    }

    pub fn reset_camera(&self) -> Result<(), BridgeError> {
        self.send(HostMessage::ResetCamera)
    }

    pub fn set_auto_rotate(&self, value: bool) -> Result<(), BridgeError> {
        self.lock().view.auto_rotate = value;
        self.send(HostMessage::ToggleAutoRotate { value })
    }

    pub fn set_wireframe(&self, value: bool) -> Result<(), BridgeError> {
        self.lock().view.wireframe = value;
        self.send(HostMessage::ToggleWireframe { value })
    }

    pub fn dispatch(&self, message: SandboxMessage) {
        match message {
            SandboxMessage::Ready => {
                let mut state = self.lock();
                state.ready = true;
                if let Some(code) = state.pending_code.take() {
                    let request_id = state.allocate_id();
                    if let Err(e) = self.send(HostMessage::RunCode {
                        code,
                        request_id: Some(request_id),
                    }) {
                        warn!("[promptscene host] Could not flush queued code: {e}");
                    }
                }
                drop(state);
                info!("[promptscene host] Sandbox ready");
                let _ = self.events.send(SandboxEvent::Ready);
            }
            SandboxMessage::Done { request_id } => {
                let _ = self.events.send(SandboxEvent::RunCompleted { request_id });
            }
            SandboxMessage::Screenshot {
                data_url,
                request_id,
            } => match self.take_listener(request_id) {
                Some(listener) => {
                    let _ = listener.reply.send(Ok(data_url));
                }
                None => warn!("[promptscene host] Ignoring unsolicited screenshot"),
            },
            SandboxMessage::Error {
                message,
                request_id,
            } => {
                if let Some(listener) = self.take_listener(request_id) {
                    let _ = listener.reply.send(Err(message));
                    return;
                }
                warn!("[promptscene host] Sandbox execution failed: {message}");
                let _ = self
                    .events
                    .send(SandboxEvent::ExecutionFailed { message, request_id });
            }
        }
    }

    /// The outstanding listener if this reply belongs to it. Replies without
    /// an id go to whichever screenshot is outstanding.
    fn take_listener(&self, request_id: Option<RequestId>) -> Option<ScreenshotListener> {
        let mut state = self.lock();
        let matches = match (&state.screenshot, request_id) {
            (Some(listener), Some(id)) => listener.request_id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            state.screenshot.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> (SandboxBridge, crossbeam_channel::Receiver<String>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (SandboxBridge::new(tx), rx)
    }

    fn sent(rx: &crossbeam_channel::Receiver<String>) -> Vec<HostMessage> {
        rx.try_iter()
            .map(|text| HostMessage::decode(&text).expect("decode"))
            .collect()
    }

    #[test]
    fn code_waits_for_ready_and_only_the_latest_is_sent() {
        let (bridge, rx) = bridge();
        assert_eq!(bridge.run("fn render_scene(env) { 1 }"), None);
        assert_eq!(bridge.run("fn render_scene(env) { 2 }"), None);
        assert!(sent(&rx).is_empty());

        bridge.dispatch(SandboxMessage::Ready);
        let messages = sent(&rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            HostMessage::RunCode { code, .. } => assert_eq!(code, "fn render_scene(env) { 2 }"),
            other => panic!("expected RUN_CODE, got {other:?}"),
        }

        assert!(bridge.run("fn render_scene(env) { 3 }").is_some());
        assert_eq!(sent(&rx).len(), 1);
    }

    #[test]
    fn ready_without_queued_code_sends_nothing() {
        let (bridge, rx) = bridge();
        bridge.dispatch(SandboxMessage::Ready);
        assert!(bridge.is_ready());
        assert!(sent(&rx).is_empty());
    }

    #[test]
    fn view_toggles_are_recorded_and_forwarded() {
        let (bridge, rx) = bridge();
        bridge.set_wireframe(true).expect("send");
        bridge.set_wireframe(true).expect("send");
        bridge.set_auto_rotate(true).expect("send");
        bridge.reset_camera().expect("send");
        assert_eq!(
            bridge.view_state(),
            ViewControlState {
                auto_rotate: true,
                wireframe: true
            }
        );
        assert_eq!(
            sent(&rx),
            vec![
                HostMessage::ToggleWireframe { value: true },
                HostMessage::ToggleWireframe { value: true },
                HostMessage::ToggleAutoRotate { value: true },
                HostMessage::ResetCamera,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn screenshot_times_out_and_detaches_its_listener() {
        let (bridge, rx) = bridge();
        let started = tokio::time::Instant::now();
        let result = bridge.capture_screenshot().await;
        assert_eq!(result, Err(BridgeError::ScreenshotTimeout));
        assert!(started.elapsed() >= SCREENSHOT_TIMEOUT);
        assert!(!bridge.has_screenshot_listener());
        assert!(matches!(
            sent(&rx).as_slice(),
            [HostMessage::GetScreenshot { request_id: Some(_) }]
        ));

        // A late reply finds nobody and is dropped.
        bridge.dispatch(SandboxMessage::Screenshot {
            data_url: "data:image/png;base64,AA".into(),
            request_id: Some(1),
        });
        assert!(!bridge.has_screenshot_listener());
    }

    #[tokio::test]
    async fn screenshot_resolves_with_the_data_url() {
        let (bridge, rx) = bridge();
        let responder = bridge.clone();
        let waiter = tokio::spawn(async move { bridge.capture_screenshot().await });

        let request_id = loop {
            if let Ok(text) = rx.try_recv() {
                match HostMessage::decode(&text).expect("decode") {
                    HostMessage::GetScreenshot { request_id } => break request_id,
                    other => panic!("unexpected {other:?}"),
                }
            }
            tokio::task::yield_now().await;
        };
        responder.dispatch(SandboxMessage::Screenshot {
            data_url: "data:image/png;base64,AA".into(),
            request_id,
        });
        let result = waiter.await.expect("join");
        assert_eq!(result.as_deref(), Ok("data:image/png;base64,AA"));
        assert!(!responder.has_screenshot_listener());
    }

    #[tokio::test]
    async fn overlapping_screenshots_are_rejected_and_errors_reject() {
        let (bridge, rx) = bridge();
        let first = bridge.clone();
        let waiter = tokio::spawn(async move { first.capture_screenshot().await });
        while !bridge.has_screenshot_listener() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            bridge.capture_screenshot().await,
            Err(BridgeError::ScreenshotBusy)
        );

        bridge.dispatch(SandboxMessage::Error {
            message: "Screenshot failed: gpu lost".into(),
            request_id: None,
        });
        assert_eq!(
            waiter.await.expect("join"),
            Err(BridgeError::ScreenshotFailed("Screenshot failed: gpu lost".into()))
        );
        assert_eq!(sent(&rx).len(), 1);
    }

    #[test]
    fn run_outcomes_are_broadcast() {
        let (bridge, _rx) = bridge();
        let mut events = bridge.subscribe();
        bridge.dispatch(SandboxMessage::Done { request_id: Some(4) });
        bridge.dispatch(SandboxMessage::Error {
            message: "Runtime error: boom".into(),
            request_id: Some(5),
        });
        assert_eq!(
            events.try_recv().expect("event"),
            SandboxEvent::RunCompleted { request_id: Some(4) }
        );
        assert_eq!(
            events.try_recv().expect("event"),
            SandboxEvent::ExecutionFailed {
                message: "Runtime error: boom".into(),
                request_id: Some(5)
            }
        );
    }
}
