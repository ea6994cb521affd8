mod config;
mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rover_control::{frame_slot, ControlContext, ControlLoop};
use rover_link::{command_link, doctor as link_doctor, LinkConfig, LinkHandle, WsConnector};
use rover_proto::status::STATUS_DISCONNECTED;
use rover_vision::adapter::DetectorAdapter;
use rover_vision::camera::{FrameSource, HttpFrameSource};
use rover_vision::{doctor as vision_doctor, policy, Detector, NullDetector, VisionConfig};

#[cfg(feature = "vision-tflite")]
use rover_vision::tflite::TfliteDetector;

use crate::config::Config;
use crate::console::DisplaySink;

#[derive(Debug, Parser)]
#[command(name = "rover", version, about = "RoverEye - operator console for a camera robot")]
struct Cli {
    /// TOML config; every setting has a default.
    #[arg(long)]
    config: Option<String>,

    #[arg(long, env = "ROVER_CAMERA_URL")]
    camera_url: Option<String>,

    #[arg(long, env = "ROVER_LINK_URL")]
    link_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Drive from stdin, watch the annotated feed, track the target.
    Run,
    /// Fetch one frame, run detection and print what tracking would do.
    Snapshot {
        /// Write the annotated frame here as PNG.
        #[arg(long)]
        save: Option<String>,
    },
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;
    cfg.apply_overrides(cli.camera_url, cli.link_url);

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(cfg).await?,
        Command::Snapshot { save } => snapshot(&cfg, save.as_deref()).await?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    vision_doctor::check_camera(&cfg.camera)?;
    link_doctor::check_link(&cfg.link)?;
    vision_doctor::check_vision(&cfg.vision)?;
    vision_doctor::check_tracking(&cfg.tracking, &cfg.vision)?;
    config::check_display(&cfg.display)?;

    if cfg.vision.backend == "tflite" {
        let model = if cfg.vision.use_coral { &cfg.vision.model_path_edgetpu } else { &cfg.vision.model_path };
        if !std::path::Path::new(model).exists() {
            warn!("doctor: model file {} not found", model);
        }
        if cfg!(not(feature = "vision-tflite")) {
            warn!("doctor: vision.backend=tflite but binary not built with --features vision-tflite");
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => inspect(&cfg.vision),
    }
}

#[cfg(feature = "vision-tflite")]
fn inspect(vision: &VisionConfig) -> Result<()> {
    let mut det = TfliteDetector::new(vision.clone())?;
    print!("{}", det.inspect()?);
    Ok(())
}

#[cfg(not(feature = "vision-tflite"))]
fn inspect(_vision: &VisionConfig) -> Result<()> {
    anyhow::bail!("vision backend not available; build with --features vision-tflite")
}

fn init_detector(vision: &VisionConfig) -> Result<Box<dyn Detector>> {
    match vision.backend.as_str() {
        "none" => Ok(Box::new(NullDetector)),
        "tflite" => tflite_detector(vision),
        other => anyhow::bail!("unknown vision.backend: {}", other),
    }
}

#[cfg(feature = "vision-tflite")]
fn tflite_detector(vision: &VisionConfig) -> Result<Box<dyn Detector>> {
    Ok(Box::new(TfliteDetector::new(vision.clone())?))
}

#[cfg(not(feature = "vision-tflite"))]
fn tflite_detector(_vision: &VisionConfig) -> Result<Box<dyn Detector>> {
    anyhow::bail!("vision.backend=tflite but binary not built with --features vision-tflite")
}

fn detector_adapter(cfg: &Config) -> Result<DetectorAdapter> {
    let backend = init_detector(&cfg.vision)?;
    Ok(DetectorAdapter::new(backend, cfg.vision.conf_threshold, cfg.tracking.target_class_id))
}

/// The link gets its own thread and single-threaded runtime, so a slow
/// camera or detector never delays a command on the wire.
fn spawn_link(cfg: &LinkConfig) -> Result<LinkHandle> {
    let (link, handle) = command_link(WsConnector::new(cfg.url.clone()), cfg.clone());
    std::thread::Builder::new()
        .name("rover-link".into())
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt.block_on(link.connect_and_serve()),
                Err(e) => error!("link: cannot start runtime: {}", e),
            }
        })
        .context("spawn link thread")?;
    Ok(handle)
}

async fn run(cfg: Config) -> Result<()> {
    info!("run: starting (camera {}, robot {})", cfg.camera.url, cfg.link.url);
    info!("{}", STATUS_DISCONNECTED);

    let source = HttpFrameSource::new(&cfg.camera)?;
    let adapter = detector_adapter(&cfg)?;
    info!("run: detector backend {}", adapter.backend_name());

    let link = spawn_link(&cfg.link)?;
    let ctx = Arc::new(ControlContext::new(Arc::new(link.clone()), &cfg.tracking));
    let (frames_tx, frames_rx) = frame_slot();

    let cycle = tokio::spawn(ControlLoop::new(source, adapter, ctx.clone(), frames_tx).run());
    tokio::spawn(DisplaySink::new(frames_rx, &cfg.display).run(link.clone(), cfg.display.clone()));
    let console = tokio::spawn(console::input_loop(ctx.clone(), link.clone(), console::stdin_lines()?));

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("run: shutting down");

    // Nothing may steer after the final stop.
    cycle.abort();
    console.abort();
    let _ = cycle.await;
    let _ = console.await;
    ctx.halt();
    // Give the link thread a moment to put the stop on the wire.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = link.stats();
    info!(
        "run: link sent={} dropped={} superseded={} attempts={}",
        stats.sent, stats.dropped, stats.superseded, stats.connect_attempts
    );
    Ok(())
}

async fn snapshot(cfg: &Config, save: Option<&str>) -> Result<()> {
    let mut source = HttpFrameSource::new(&cfg.camera)?;
    let frame = source
        .fetch_frame()
        .await
        .with_context(|| format!("fetch from {}", cfg.camera.url))?;
    println!("frame seq={} {}x{}", frame.seq, frame.width(), frame.height());

    let mut adapter = detector_adapter(cfg)?;
    let width = frame.width();
    let (detections, annotated) = adapter.detect(&frame)?;

    for d in &detections {
        let name = cfg.vision.class_name(d.class_id).unwrap_or("?");
        println!(
            "det class={} ({}) conf={:.2} box=({:.0},{:.0})-({:.0},{:.0}) cx={:.0}",
            d.class_id, name, d.confidence, d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2, d.bbox.center_x()
        );
    }
    let cmd = policy::decide(
        &detections,
        width,
        cfg.tracking.target_class_id,
        cfg.tracking.center_tolerance_px,
    );
    println!("detections={} tracking would send: {}", detections.len(), cmd);

    if let Some(path) = save {
        std::fs::write(path, &annotated.png).with_context(|| format!("write {}", path))?;
        println!("annotated frame written to {}", path);
    }
    Ok(())
}
