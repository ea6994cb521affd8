use std::sync::{Arc, Mutex, PoisonError};

use rover_proto::Command;
use rover_vision::{adapter::DetectorAdapter, camera::FetchError, camera::FrameSource};
use tracing::{debug, error, warn};

use crate::context::ControlContext;
use crate::display::FramePublisher;

/// What one pass of the loop did. Every variant is a normal outcome: the
/// loop always goes on to the next cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No frame this time.
    Skipped(FetchError),
    /// A frame arrived but could not be processed.
    Failed(anyhow::Error),
    Displayed { seq: u64, detections: usize, command: Option<Command> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub skipped: u64,
    pub failed: u64,
    pub displayed: u64,
}

/// Fetch, detect, display, decide, send. One frame in flight at a time: the
/// next fetch starts only after detection of the current frame is done.
pub struct ControlLoop<S> {
    source: S,
    detector: Arc<Mutex<DetectorAdapter>>,
    ctx: Arc<ControlContext>,
    display: FramePublisher,
    stats: CycleStats,
}

impl<S: FrameSource> ControlLoop<S> {
    pub fn new(source: S, detector: DetectorAdapter, ctx: Arc<ControlContext>, display: FramePublisher) -> Self {
        Self {
            source,
            detector: Arc::new(Mutex::new(detector)),
            ctx,
            display,
            stats: CycleStats::default(),
        }
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub async fn run(mut self) {
        loop {
            self.run_cycle().await;
        }
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;
        let outcome = self.cycle().await;
        match &outcome {
            CycleOutcome::Skipped(e) => {
                self.stats.skipped += 1;
                warn!("cycle: skipped, {}", e);
            }
            CycleOutcome::Failed(e) => {
                self.stats.failed += 1;
                error!("cycle: frame dropped: {:#}", e);
            }
            CycleOutcome::Displayed { .. } => self.stats.displayed += 1,
        }
        outcome
    }

    async fn cycle(&mut self) -> CycleOutcome {
        let frame = match self.source.fetch_frame().await {
            Ok(f) => f,
            Err(e) => return CycleOutcome::Skipped(e),
        };
        let seq = frame.seq;
        let width = frame.width();

        // Inference is CPU bound; keep it off the async workers.
        let detector = self.detector.clone();
        let detected = tokio::task::spawn_blocking(move || {
            let mut detector = detector.lock().unwrap_or_else(PoisonError::into_inner);
            let out = detector.detect(&frame)?;
            Ok::<_, anyhow::Error>((out, frame.age()))
        })
        .await;

        let ((detections, annotated), age) = match detected {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return CycleOutcome::Failed(e.context(format!("detect frame {}", seq))),
            Err(join) => return CycleOutcome::Failed(anyhow::anyhow!("detector task for frame {} died: {}", seq, join)),
        };

        self.display.publish(annotated);
        debug!("cycle: frame {} shown {:?} after capture", seq, age);
        let command = self.ctx.on_detections(&detections, width);
        CycleOutcome::Displayed { seq, detections: detections.len(), command }
    }
}
