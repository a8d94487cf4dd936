// Sightline Command Line Interface
// Replays recorded sessions through the recognition engine and checks configuration

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use sightline_core::replay::TraceInput;
use sightline_core::{
    EngineEvent, MotionSample, RecognitionSession, ReplayDriver, SightlineConfig, Trace, ViewerReport,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Slowest accepted playback speed
const MIN_SPEED: f64 = 0.01;

#[derive(Parser)]
#[command(name = "sightline")]
#[command(about = "Sightline - detection-to-action orchestration engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace on a virtual clock and print the event timeline
    Replay {
        /// Configuration file (JSON, TOML or YAML)
        #[arg(long, short)]
        config: PathBuf,

        /// Trace file (JSON, TOML or YAML)
        #[arg(long, short)]
        trace: PathBuf,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },

    /// Play a trace in real time through an async recognition session
    Run {
        /// Configuration file (JSON, TOML or YAML)
        #[arg(long, short)]
        config: PathBuf,

        /// Trace file (JSON, TOML or YAML)
        #[arg(long, short)]
        trace: PathBuf,

        /// Playback speed multiplier (at least 0.01)
        #[arg(long, default_value = "1.0")]
        speed: f64,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file (JSON, TOML or YAML)
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Print the default configuration
    Defaults {
        /// Output format
        #[arg(long, short, value_enum, default_value = "toml")]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Toml,
    Yaml,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay { config, trace, json } => {
            replay(&config, &trace, json)?;
        }
        Commands::Run { config, trace, speed } => {
            run(&config, &trace, speed).await?;
        }
        Commands::Validate { config } => {
            validate(&config)?;
        }
        Commands::Defaults { format } => {
            print_defaults(format)?;
        }
    }

    Ok(())
}

fn load(config: &Path, trace: &Path) -> anyhow::Result<(SightlineConfig, Trace)> {
    let config = SightlineConfig::from_file(config)
        .with_context(|| format!("Failed to load configuration from {}", config.display()))?;
    let trace = Trace::from_file(trace).with_context(|| format!("Failed to load trace from {}", trace.display()))?;
    Ok((config, trace))
}

/// Replay a trace and print its timeline
fn replay(config: &Path, trace: &Path, json: bool) -> anyhow::Result<()> {
    let (config, trace) = load(config, trace)?;
    let timeline = ReplayDriver::new(&config)
        .context("Failed to build engine")?
        .run(&trace)
        .context("Replay failed")?;

    for entry in &timeline {
        if json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!("{:>9.3}s  {}", entry.at_secs, entry.event);
        }
    }

    let confirmations = timeline
        .iter()
        .filter(|e| matches!(e.event, EngineEvent::Confirmed { .. }))
        .count();
    info!("{} events, {} confirmations", timeline.len(), confirmations);
    Ok(())
}

/// Feed a trace into a live session on the wall clock
async fn run(config: &Path, trace: &Path, speed: f64) -> anyhow::Result<()> {
    if !speed.is_finite() || speed < MIN_SPEED {
        bail!("--speed must be a number no smaller than {}", MIN_SPEED);
    }
    let (config, trace) = load(config, trace)?;

    let session = RecognitionSession::new(config).context("Failed to create session")?;
    let mut events = session.subscribe_events();
    let printer = tokio::spawn(async move {
        let start = Instant::now();
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    let elapsed = start.elapsed().as_secs_f64() * speed;
                    println!("{:>9.3}s  {}", elapsed, envelope.event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event printer lagged, {} events skipped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut sink = session.start().context("Failed to start session")?;
    if trace.start_hidden {
        session.set_visible(false).await?;
    }

    let start = Instant::now();
    let scale = |secs: f64| -> anyhow::Result<Instant> {
        Duration::try_from_secs_f64(secs / speed)
            .ok()
            .and_then(|offset| start.checked_add(offset))
            .with_context(|| format!("Trace time {} s is out of range at speed {}", secs, speed))
    };
    for (at, input) in trace.inputs() {
        sleep_until(scale(at)?).await;
        match input {
            TraceInput::Frame { observations } => sink.on_frame(observations)?,
            TraceInput::FrameRun { .. } => {}
            TraceInput::Motion { x, y, z } => session.on_motion(MotionSample::new(x, y, z))?,
            TraceInput::ViewerClosed { kind, label, index } => {
                let report = pin_report(&session, ViewerReport::new(kind, label), index).await?;
                session.report_viewer_closed(report).await?;
            }
            TraceInput::Trigger { label } => session.trigger(label).await?,
            TraceInput::TriggerSpot => session.trigger_spot().await?,
            TraceInput::Appear => session.set_visible(true).await?,
            TraceInput::Disappear => session.set_visible(false).await?,
        }
    }
    sleep_until(scale(trace.end())?).await;

    session.stop().await?;
    drop(session);
    printer.await.context("Event printer failed")?;
    Ok(())
}

/// Give a viewer report the index of the step it closes. Traces without an
/// index refer to the step on screen when the close is delivered.
async fn pin_report(
    session: &RecognitionSession,
    report: ViewerReport,
    index: Option<usize>,
) -> anyhow::Result<ViewerReport> {
    if let Some(index) = index {
        return Ok(report.at_index(index));
    }
    let on_screen = session
        .checkpoint()
        .await?
        .filter(|c| c.label == report.label && c.kind == report.kind);
    Ok(match on_screen {
        Some(checkpoint) => report.at_index(checkpoint.cursor),
        None => report,
    })
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = SightlineConfig::from_file(path).with_context(|| format!("Invalid configuration {}", path.display()))?;
    let spot = config.actions.spot().map_or(0, |s| s.len());
    println!(
        "{}: ok ({} labels, {} spot actions)",
        path.display(),
        config.actions.labels.len(),
        spot
    );
    Ok(())
}

fn print_defaults(format: Format) -> anyhow::Result<()> {
    let config = SightlineConfig::default();
    let rendered = match format {
        Format::Json => serde_json::to_string_pretty(&config)?,
        Format::Toml => toml::to_string_pretty(&config)?,
        Format::Yaml => serde_yaml::to_string(&config)?,
    };
    println!("{}", rendered);
    Ok(())
}
