use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rover_link::LinkHandle;
use rover_proto::Command;
use rover_vision::{policy, policy::TrackingConfig, Detection};
use tracing::{debug, info};

/// Where commands go. In production this is the robot link.
pub trait CommandSink: Send + Sync {
    fn send(&self, cmd: Command);
}

impl CommandSink for LinkHandle {
    fn send(&self, cmd: Command) {
        LinkHandle::send(self, cmd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingState {
    pub enabled: bool,
    pub target_class_id: i32,
}

/// Arbitrates between the operator's keyboard and autonomous tracking.
///
/// Every decision that results in a command is taken and handed to the sink
/// while holding the tracking lock, so a toggle can never interleave with a
/// command computed under the previous mode.
pub struct ControlContext {
    tracking: Mutex<TrackingState>,
    center_tolerance_px: f32,
    sink: Arc<dyn CommandSink>,
}

impl ControlContext {
    pub fn new(sink: Arc<dyn CommandSink>, cfg: &TrackingConfig) -> Self {
        Self {
            tracking: Mutex::new(TrackingState {
                enabled: cfg.start_enabled,
                target_class_id: cfg.target_class_id,
            }),
            center_tolerance_px: cfg.center_tolerance_px,
            sink,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackingState> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tracking(&self) -> TrackingState {
        *self.state()
    }

    pub fn is_tracking(&self) -> bool {
        self.state().enabled
    }

    pub fn target_class_id(&self) -> i32 {
        self.state().target_class_id
    }

    /// Flips tracking and returns the new value. Switching tracking off
    /// always stops the robot.
    pub fn toggle_tracking(&self) -> bool {
        let mut st = self.state();
        st.enabled = !st.enabled;
        if st.enabled {
            info!("control: tracking on (target class {})", st.target_class_id);
        } else {
            self.sink.send(Command::Stop);
            info!("control: tracking off, stop sent");
        }
        st.enabled
    }

    /// Shutdown: tracking off and a final stop, whatever the current mode.
    pub fn halt(&self) {
        let mut st = self.state();
        st.enabled = false;
        self.sink.send(Command::Stop);
        info!("control: halted, stop sent");
    }

    /// Label for the toggle control.
    pub fn toggle_label(&self) -> &'static str {
        if self.is_tracking() { "Stop tracking" } else { "Start tracking" }
    }

    pub fn on_key_down(&self, key: &str) -> Option<Command> {
        let st = self.state();
        if st.enabled {
            debug!("control: tracking active, ignoring key {}", key);
            return None;
        }
        let cmd = Command::from_key(key)?;
        self.sink.send(cmd);
        Some(cmd)
    }

    /// Any key release halts the robot while driving manually.
    pub fn on_key_up(&self, key: &str) -> Option<Command> {
        let st = self.state();
        if st.enabled {
            debug!("control: tracking active, ignoring release of {}", key);
            return None;
        }
        self.sink.send(Command::Stop);
        Some(Command::Stop)
    }

    /// Autonomous step for one frame; nothing happens unless tracking is on.
    pub fn on_detections(&self, detections: &[Detection], frame_width: u32) -> Option<Command> {
        let st = self.state();
        if !st.enabled {
            return None;
        }
        let cmd = policy::decide(detections, frame_width, st.target_class_id, self.center_tolerance_px);
        self.sink.send(cmd);
        Some(cmd)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rover_vision::BoundingBox;

    #[derive(Default)]
    pub(crate) struct Recorder(pub Mutex<Vec<Command>>);

    impl Recorder {
        pub(crate) fn take(&self) -> Vec<Command> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl CommandSink for Recorder {
        fn send(&self, cmd: Command) {
            self.0.lock().unwrap().push(cmd);
        }
    }

    fn ctx(start_enabled: bool) -> (ControlContext, Arc<Recorder>) {
        let rec = Arc::new(Recorder::default());
        let cfg = TrackingConfig { start_enabled, ..TrackingConfig::default() };
        (ControlContext::new(rec.clone(), &cfg), rec)
    }

    fn target_at(cx: f32) -> Vec<Detection> {
        vec![Detection { class_id: 46, bbox: BoundingBox::new(cx - 5.0, 0.0, cx + 5.0, 10.0), confidence: 0.9 }]
    }

    #[test]
    fn manual_keys_drive_when_not_tracking() {
        let (ctx, rec) = ctx(false);
        assert_eq!(ctx.on_key_down("Up"), Some(Command::Forward));
        assert_eq!(ctx.on_key_down("Left"), Some(Command::Left));
        assert_eq!(ctx.on_key_down("space"), Some(Command::Stop));
        assert_eq!(ctx.on_key_down("q"), None);
        assert_eq!(rec.take(), vec![Command::Forward, Command::Left, Command::Stop]);
    }

    #[test]
    fn any_key_release_stops_when_not_tracking() {
        let (ctx, rec) = ctx(false);
        for key in ["Up", "Down", "Left", "Right", "space", "q"] {
            assert_eq!(ctx.on_key_up(key), Some(Command::Stop));
        }
        assert_eq!(rec.take(), vec![Command::Stop; 6]);
    }

    #[test]
    fn keys_are_ignored_while_tracking() {
        let (ctx, rec) = ctx(true);
        assert_eq!(ctx.on_key_down("Up"), None);
        assert_eq!(ctx.on_key_up("Up"), None);
        assert!(rec.take().is_empty());
    }

    #[test]
    fn turning_tracking_off_sends_exactly_one_stop_first() {
        let (ctx, rec) = ctx(false);
        assert!(ctx.toggle_tracking());
        assert!(rec.take().is_empty());
        ctx.on_key_down("Up");
        assert!(rec.take().is_empty());

        assert!(!ctx.toggle_tracking());
        ctx.on_key_down("Up");
        assert_eq!(rec.take(), vec![Command::Stop, Command::Forward]);
    }

    #[test]
    fn detections_steer_only_while_tracking() {
        let (ctx, rec) = ctx(false);
        assert_eq!(ctx.on_detections(&target_at(320.0), 640), None);
        assert!(rec.take().is_empty());

        ctx.toggle_tracking();
        assert_eq!(ctx.on_detections(&target_at(320.0), 640), Some(Command::Forward));
        assert_eq!(ctx.on_detections(&target_at(100.0), 640), Some(Command::Left));
        assert_eq!(ctx.on_detections(&target_at(600.0), 640), Some(Command::Right));
        assert_eq!(ctx.on_detections(&[], 640), Some(Command::Stop));
        assert_eq!(
            rec.take(),
            vec![Command::Forward, Command::Left, Command::Right, Command::Stop]
        );
    }

    #[test]
    fn toggle_label_follows_state() {
        let (ctx, _rec) = ctx(false);
        assert_eq!(ctx.toggle_label(), "Start tracking");
        ctx.toggle_tracking();
        assert_eq!(ctx.toggle_label(), "Stop tracking");
        assert_eq!(ctx.tracking(), TrackingState { enabled: true, target_class_id: 46 });
    }

    #[test]
    fn halt_stops_and_silences_tracking() {
        let (tracking, rec) = ctx(true);
        let (manual, manual_rec) = ctx(false);

        tracking.halt();
        assert!(!tracking.is_tracking());
        assert_eq!(tracking.on_detections(&target_at(320.0), 640), None);
        assert_eq!(rec.take(), vec![Command::Stop]);

        manual.halt();
        assert_eq!(manual_rec.take(), vec![Command::Stop]);
    }

    #[test]
    fn concurrent_toggles_never_lose_a_stop() {
        let (ctx, rec) = ctx(false);
        let ctx = Arc::new(ctx);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        ctx.toggle_tracking();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        // 1000 toggles from off: 500 on->off transitions
        assert!(!ctx.is_tracking());
        assert_eq!(rec.take().len(), 500);
    }
}
