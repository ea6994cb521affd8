pub mod context;
pub mod cycle;
pub mod display;

pub use context::{CommandSink, ControlContext, TrackingState};
pub use cycle::{ControlLoop, CycleOutcome, CycleStats};
pub use display::{frame_slot, FramePublisher, FrameSubscriber};
