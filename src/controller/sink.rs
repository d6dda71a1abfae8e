use crate::controller::frame::InputFrame;
use tokio::sync::watch;
use tracing::debug;

/// Downstream processing engine seen from the runtime.
///
/// Debounce, SOCD resolution, hotkeys and report emission all live behind
/// this call; the runtime only hands frames over.
pub trait InputSink: Send {
    fn submit(&mut self, frame: &InputFrame);
}

impl<F> InputSink for F
where
    F: FnMut(&InputFrame) + Send,
{
    fn submit(&mut self, frame: &InputFrame) {
        self(frame)
    }
}

/// Broadcasts every frame to any number of subscribers
pub struct WatchSink {
    sender: watch::Sender<InputFrame>,
}

impl WatchSink {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(InputFrame::default());
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<InputFrame> {
        debug!("New subscriber to input frames");
        self.sender.subscribe()
    }
}

impl Default for WatchSink {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSink for WatchSink {
    fn submit(&mut self, frame: &InputFrame) {
        // Only wake subscribers when something actually changed
        self.sender.send_if_modified(|current| {
            if current == frame {
                false
            } else {
                *current = *frame;
                true
            }
        });
    }
}
