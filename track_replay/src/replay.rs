use anyhow::{Context, bail};
use clap::Args;
use pan_tracker::core_modules::actuator::{ActuatorLink, BusActuator, MemoryActuator, spawn_simulated_servo};
use pan_tracker::core_modules::bus::MessageBus;
use pan_tracker::core_modules::tracking_controller::TrackingMode;
use pan_tracker::{Flow, FrameInput, OperatorCommand, TrackerConfig, TrackingPipeline};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const BUS_CAPACITY: usize = 256;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-lines recording: one frame or one operator command per line.
    #[arg(long)]
    pub input: PathBuf,
    /// Tracker configuration (JSON). Defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Enrolled identity names.
    #[arg(long = "identities", value_delimiter = ',')]
    pub identities: Vec<String>,
    /// Identity to lock on start, by 1-based index or name.
    #[arg(long)]
    pub lock: Option<String>,
    /// Overrides the activity log directory from the config.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Record commands in memory instead of driving the simulated servo.
    #[arg(long)]
    pub dry_run: bool,
    /// Pause between frames, to replay at roughly real-time pace.
    #[arg(long, default_value_t = 0)]
    pub frame_interval_ms: u64,
}

/// One line of a recording. Commands are tried first since frames never carry
/// a `command` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Command(OperatorCommand),
    Frame(FrameInput),
}

#[derive(Debug, Default)]
pub struct ReplayTotals {
    pub frames: u64,
    pub events: usize,
    pub searches: u32,
    pub actuator_failures: u32,
    pub storage_failures: u32,
    pub fps: f64,
    pub summary: Option<PathBuf>,
}

impl fmt::Display for ReplayTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frames processed:  {}", self.frames)?;
        writeln!(f, "events detected:   {}", self.events)?;
        writeln!(f, "searches started:  {}", self.searches)?;
        writeln!(f, "actuator failures: {}", self.actuator_failures)?;
        writeln!(f, "storage failures:  {}", self.storage_failures)?;
        write!(f, "throughput:        {:.1} fps", self.fps)?;
        if let Some(summary) = &self.summary {
            write!(f, "\nsession summary:   {}", summary.display())?;
        }
        Ok(())
    }
}

pub async fn execute(args: RunArgs) -> anyhow::Result<ReplayTotals> {
    // --- 1. Configuration ---
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(dir) = &args.log_dir {
        config.activity.log_dir = dir.clone();
    }
    config.validate()?;
    if args.identities.is_empty() {
        tracing::warn!("no identities enrolled, nothing can be locked");
    }

    let file = File::open(&args.input).with_context(|| format!("opening {}", args.input.display()))?;
    let lines = BufReader::new(file).lines();

    // --- 2. Actuator Link ---
    if args.dry_run {
        let link = MemoryActuator::new(true);
        let pipeline = TrackingPipeline::new(config, link.clone(), args.identities.clone());
        let totals = drive(pipeline, lines, &args).await?;
        tracing::info!(published = link.published().len(), "dry run finished");
        Ok(totals)
    } else {
        let bus = MessageBus::new(BUS_CAPACITY);
        let servo = spawn_simulated_servo(bus.clone(), config.actuator.clone());
        let link = BusActuator::connect(bus, config.actuator.clone());
        let pipeline = TrackingPipeline::new(config, link, args.identities.clone());
        let totals = drive(pipeline, lines, &args).await;
        servo.abort();
        totals
    }
}

async fn drive<A, I>(mut pipeline: TrackingPipeline<A>, lines: I, args: &RunArgs) -> anyhow::Result<ReplayTotals>
where
    A: ActuatorLink,
    I: Iterator<Item = std::io::Result<String>>,
{
    if let Some(lock) = &args.lock {
        pipeline.lock(lock);
    }

    let interval = Duration::from_millis(args.frame_interval_ms);
    let mut totals = ReplayTotals::default();
    let mut last_mode = pipeline.controller().mode();

    // --- 3. Main Processing Loop ---
    for (number, line) in lines.enumerate() {
        let line = line.with_context(|| format!("reading line {}", number + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed: ReplayLine = match serde_json::from_str(trimmed) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(line = number + 1, "skipping unparseable line: {}", e);
                continue;
            }
        };

        match parsed {
            ReplayLine::Command(command) => match pipeline.apply(command, Instant::now()) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => {
                    tracing::info!(line = number + 1, "quit requested");
                    break;
                }
                Err(e) => tracing::warn!(line = number + 1, "operator command failed: {}", e),
            },
            ReplayLine::Frame(frame) => {
                let report = pipeline.process_frame(&frame);
                totals.frames += 1;
                totals.events += report.gestures.len() + report.movements.len();
                totals.actuator_failures += report.actuator_failures;
                totals.storage_failures += report.storage_failures;
                totals.fps = report.fps;
                if report.mode != last_mode {
                    if report.mode == TrackingMode::Searching {
                        totals.searches += 1;
                    }
                    tracing::info!(frame = report.frame_index, mode = ?report.mode, angle = report.angle, "mode changed");
                    last_mode = report.mode;
                }
                for kind in &report.gestures {
                    tracing::info!(frame = report.frame_index, %kind, "gesture");
                }
                for movement in &report.movements {
                    tracing::info!(frame = report.frame_index, kind = %movement.kind, detail = %movement.detail(), "movement");
                }
            }
        }

        // Lets the status listener and simulated servo run between frames.
        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }
    }

    // --- 4. Shutdown ---
    if let Some(stats) = pipeline.activity_stats() {
        tracing::info!(person = %stats.person, total = stats.total, "session statistics");
    }
    totals.summary = pipeline.shutdown().context("closing the activity session")?;
    if totals.frames == 0 {
        bail!("recording {} contained no frames", args.input.display());
    }
    Ok(totals)
}
