//! Headless operator console: keyboard events arrive as stdin lines, the
//! display is a PNG file refreshed on a timer plus status lines in the log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rover_control::{ControlContext, FrameSubscriber};
use rover_link::LinkHandle;
use rover_proto::ConnectionState;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::DisplayConfig;

pub const HELP: &str = "commands: press <Up|Down|Left|Right|space>, release <key>, toggle, status, help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Press(String),
    Release(String),
    Toggle,
    Status,
    Help,
}

/// `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else { return Ok(None) };
    let arg = words.next();
    anyhow::ensure!(words.next().is_none(), "too many words in {:?}", line.trim());

    let input = match (verb, arg) {
        ("press", Some(key)) => ConsoleInput::Press(key.to_string()),
        ("release", Some(key)) => ConsoleInput::Release(key.to_string()),
        ("press" | "release", None) => anyhow::bail!("{} needs a key name", verb),
        ("toggle", None) => ConsoleInput::Toggle,
        ("status", None) => ConsoleInput::Status,
        ("help", None) => ConsoleInput::Help,
        _ => anyhow::bail!("unknown input {:?}", line.trim()),
    };
    Ok(Some(input))
}

/// Feeds one operator event into the control context. Returns a line of
/// feedback for the operator, if there is anything to say.
pub fn apply(ctx: &ControlContext, input: &ConsoleInput) -> Option<String> {
    match input {
        ConsoleInput::Press(key) => match ctx.on_key_down(key) {
            Some(cmd) => Some(format!("sent {}", cmd)),
            None if ctx.is_tracking() => Some("tracking active, key ignored".into()),
            None => Some(format!("no command bound to {}", key)),
        },
        ConsoleInput::Release(key) => ctx.on_key_up(key).map(|cmd| format!("sent {}", cmd)),
        ConsoleInput::Toggle => {
            ctx.toggle_tracking();
            Some(format!("tracking {} [{}]", on_off(ctx.is_tracking()), ctx.toggle_label()))
        }
        ConsoleInput::Status | ConsoleInput::Help => None,
    }
}

pub fn status_line(ctx: &ControlContext, link: &LinkHandle) -> String {
    let stats = link.stats();
    format!(
        "{} | tracking {} (class {}) [{}] | sent={} dropped={} superseded={} attempts={}",
        link.state().status_text(),
        on_off(ctx.is_tracking()),
        ctx.target_class_id(),
        ctx.toggle_label(),
        stats.sent,
        stats.dropped,
        stats.superseded,
        stats.connect_attempts,
    )
}

fn on_off(b: bool) -> &'static str {
    if b { "on" } else { "off" }
}

/// Operator input lines. Reading happens on a plain thread so a blocked
/// stdin never holds up runtime shutdown.
pub fn stdin_lines() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("rover-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}

/// Runs until the input side is closed.
pub async fn input_loop(ctx: Arc<ControlContext>, link: LinkHandle, mut lines: mpsc::Receiver<String>) {
    println!("{}", HELP);
    while let Some(line) = lines.recv().await {
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleInput::Status)) => println!("{}", status_line(&ctx, &link)),
            Ok(Some(ConsoleInput::Help)) => println!("{}", HELP),
            Ok(Some(input)) => {
                if let Some(reply) = apply(&ctx, &input) {
                    println!("{}", reply);
                }
            }
            Err(e) => println!("{:#}", e),
        }
    }
    info!("console: input closed");
}

/// Display side of the frame handoff. Only the newest frame is ever written.
pub struct DisplaySink {
    frames: FrameSubscriber,
    snapshot_path: Option<PathBuf>,
    last_state: Option<ConnectionState>,
}

impl DisplaySink {
    pub fn new(frames: FrameSubscriber, cfg: &DisplayConfig) -> Self {
        Self {
            frames,
            snapshot_path: cfg.snapshot_path.as_ref().map(PathBuf::from),
            last_state: None,
        }
    }

    /// Status text to show if the link state moved since the last refresh.
    pub fn status_change(&mut self, state: ConnectionState) -> Option<&'static str> {
        if self.last_state == Some(state) {
            return None;
        }
        self.last_state = Some(state);
        Some(state.status_text())
    }

    /// Writes the frame published since the last refresh, if any, and
    /// returns its sequence number.
    pub async fn store_latest(&mut self) -> Result<Option<u64>> {
        let Some(frame) = self.frames.take_new() else { return Ok(None) };
        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &frame.png).await?;
        }
        Ok(Some(frame.seq))
    }

    pub async fn run(mut self, link: LinkHandle, cfg: DisplayConfig) {
        let mut tick = tokio::time::interval(cfg.refresh());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let state = link.state();
            if let Some(text) = self.status_change(state) {
                if state.is_connected() {
                    info!("{}", text);
                } else {
                    warn!("{}", text);
                }
            }
            if let Err(e) = self.store_latest().await {
                warn!("display: {:#}", e);
            }
        }
    }
}

/// Readers of `path` never see a half-written image.
async fn write_snapshot(path: &Path, png: &[u8]) -> Result<()> {
    let tmp = path.with_extension("png.part");
    tokio::fs::write(&tmp, png)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename to {}", path.display()))?;
    Ok(())
}
