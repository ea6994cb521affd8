use rover_vision::AnnotatedFrame;
use tokio::sync::watch;

/// Single-slot handoff of annotated frames to the display. Publishing
/// overwrites whatever the display has not picked up yet.
pub fn frame_slot() -> (FramePublisher, FrameSubscriber) {
    let (tx, rx) = watch::channel(None);
    (FramePublisher { tx }, FrameSubscriber { rx })
}

#[derive(Debug)]
pub struct FramePublisher {
    tx: watch::Sender<Option<AnnotatedFrame>>,
}

impl FramePublisher {
    pub fn publish(&self, frame: AnnotatedFrame) {
        self.tx.send_replace(Some(frame));
    }
}

#[derive(Debug, Clone)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Option<AnnotatedFrame>>,
}

impl FrameSubscriber {
    pub fn latest(&self) -> Option<AnnotatedFrame> {
        self.rx.borrow().clone()
    }

    /// The newest frame if one arrived since the last call, without waiting.
    pub fn take_new(&mut self) -> Option<AnnotatedFrame> {
        if self.rx.has_changed().unwrap_or(false) {
            self.rx.borrow_and_update().clone()
        } else {
            None
        }
    }

    /// Waits for the next publish. `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<AnnotatedFrame> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}
