//! `objloc` – object localization node.
//!
//! Reads detection batches and point clouds as NDJSON, runs them through the
//! localization pipeline and writes every output message to stdout as one
//! JSON line `{"topic": ..., "event": ...}`. Logs go to stderr.
//!
//! ```text
//! objloc run                          live: read inbound NDJSON from stdin until EOF or Ctrl-C
//! objloc run --replay FILE            replay a recorded NDJSON file in order
//! objloc sample --replay FILE --u U --v V
//!                                     print the last cloud's sample at pixel (U, V)
//! objloc schema                       print the JSON schema of inbound lines
//! objloc config                       print the effective configuration
//! objloc init [--force]               write the default ~/.objloc/config.toml
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use objloc_middleware::{
    EventBus, ReplaySource, StdinSource, Topic, TopicReceiver, inbound_channel,
};
use objloc_runtime::{LocalizationOrchestrator, Node, NodeStats, init_tracing, pump};
use objloc_types::{InboundPayload, Position};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Object localization node: 2-D detections plus depth clouds in, object
/// poses and fused landmarks out.
#[derive(Debug, Parser)]
#[command(name = "objloc", version, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Commands {
    /// Run the node on stdin, or on a recording.
    Run {
        /// Replay a recorded NDJSON file in order instead of reading stdin.
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,
    },

    /// Replay a recording, then print the last cloud's sample at pixel (U, V).
    Sample {
        #[arg(long, value_name = "FILE")]
        replay: PathBuf,

        /// Pixel column.
        #[arg(long)]
        u: u32,

        /// Pixel row.
        #[arg(long)]
        v: u32,
    },

    /// Print the JSON schema of inbound lines.
    Schema,

    /// Print the effective configuration.
    Config,

    /// Write the default ~/.objloc/config.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Schema => print_schema(),
        Commands::Config => config::load().and_then(|cfg| {
            let raw = toml::to_string_pretty(&cfg)
                .map_err(|e| format!("Failed to serialize config: {}", e))?;
            print!("{raw}");
            Ok(())
        }),
        Commands::Init { force } => init_config(force),
        Commands::Run { replay } => run(replay),
        Commands::Sample { replay, u, v } => sample(&replay, u, v),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(InboundPayload);
    let raw = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("Failed to serialize schema: {}", e))?;
    println!("{raw}");
    Ok(())
}

fn init_config(force: bool) -> Result<(), String> {
    let path = config::config_path();
    if path.exists() && !force {
        eprintln!(
            "  Config already exists at {} (use {} to overwrite)",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return Ok(());
    }
    let written = config::save(&config::Config::default())?;
    eprintln!("  {} {}", "✓ Wrote".green(), written.display());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// sample
// ─────────────────────────────────────────────────────────────────────────────

fn sample(replay: &Path, u: u32, v: u32) -> Result<(), String> {
    let _guard = init_tracing("objloc");
    let cfg = config::load_or_default();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    let point = runtime.block_on(sample_replay(&cfg, replay, u, v))?;

    let line = serde_json::json!({ "u": u, "v": v, "point": point });
    println!("{line}");
    Ok(())
}

/// Replay `path` through a node and read the last cached cloud at `(u, v)`.
async fn sample_replay(
    cfg: &config::Config,
    path: &Path,
    u: u32,
    v: u32,
) -> Result<Option<Position>, String> {
    let orchestrator =
        LocalizationOrchestrator::new(cfg.orchestrator_config(), EventBus::new(cfg.bus_capacity))
            .map_err(|e| e.to_string())?;
    let mut node = Node::new(orchestrator);
    let stats = node
        .run_source(&ReplaySource::new(path))
        .await
        .map_err(|e| e.to_string())?;
    info!(frames = stats.frames, u, v, "sampling last cached cloud");
    Ok(node.orchestrator().point_at_pixel(u, v))
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn run(replay: Option<PathBuf>) -> Result<(), String> {
    // Tracing first: the OTLP exporter must not need a running runtime.
    let _guard = init_tracing("objloc");

    let cfg = config::load_or_default();
    info!(path = %config::config_path().display(), ?cfg, "configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;

    let result = runtime.block_on(async move {
        let bus = EventBus::new(cfg.bus_capacity);
        let orchestrator = LocalizationOrchestrator::new(cfg.orchestrator_config(), bus.clone())
            .map_err(|e| e.to_string())?;
        let printers = spawn_printers(&bus);

        let stats = match replay {
            Some(path) => run_replay(orchestrator, &path).await?,
            None => run_live(orchestrator, cfg.inbound_capacity).await,
        };

        // Every bus handle is gone once `bus` drops, so printers see the
        // topics close after flushing what is queued.
        drop(bus);
        for printer in printers {
            if let Err(e) = printer.await {
                warn!(error = %e, "output printer failed");
            }
        }
        Ok::<NodeStats, String>(stats)
    });

    // Stdin is read on a blocking thread that cannot be interrupted.
    runtime.shutdown_timeout(Duration::from_millis(200));

    let stats = result?;
    eprintln!(
        "  {} frames={} batches={} poses={} dropped_detections={} rejected_frames={}",
        "✓ done".green(),
        stats.frames,
        stats.batches,
        stats.poses,
        stats.dropped_detections,
        stats.rejected_frames
    );
    Ok(())
}

async fn run_replay(
    orchestrator: LocalizationOrchestrator,
    path: &Path,
) -> Result<NodeStats, String> {
    info!(path = %path.display(), "replaying recording");
    let mut node = Node::new(orchestrator);
    node.run_source(&ReplaySource::new(path))
        .await
        .map_err(|e| e.to_string())
}

async fn run_live(orchestrator: LocalizationOrchestrator, inbound_capacity: usize) -> NodeStats {
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);

    let ctrlc_tx = Arc::clone(&stop_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = ctrlc_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop with EOF instead");
    }

    let (inbound_tx, inbound_rx) = inbound_channel(inbound_capacity);
    let node = tokio::spawn(Node::new(orchestrator).run(inbound_rx, stop_rx));

    // Dropping the sender at EOF ends the node once the queue is empty.
    let reader = tokio::spawn(async move {
        match pump(&StdinSource, &inbound_tx).await {
            Ok(n) => info!(forwarded = n, "stdin closed"),
            Err(e) => error!(error = %e, "stdin source failed"),
        }
    });

    let stats = match node.await {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "localization node task failed");
            NodeStats::default()
        }
    };
    reader.abort();
    stats
}

/// One task per outbound topic, each writing JSON lines to stdout until the
/// topic closes.
fn spawn_printers(bus: &EventBus) -> Vec<JoinHandle<()>> {
    Topic::OUTBOUND
        .iter()
        .map(|&topic| tokio::spawn(print_topic(bus.subscribe_to(topic))))
        .collect()
}

async fn print_topic(mut rx: TopicReceiver) {
    let topic = rx.topic();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let line = serde_json::json!({
                    "topic": topic.ros_name(),
                    "event": event,
                });
                println!("{line}");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(topic = topic.ros_name(), skipped = n, "output printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;
    use std::io::Write;

    fn parse(line: &str) -> Result<Commands, clap::Error> {
        Cli::try_parse_from(std::iter::once("objloc").chain(line.split_whitespace()))
            .map(|cli| cli.command)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_arguments_prints_help() {
        let err = parse("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand);
    }

    #[test]
    fn run_live_and_replay() {
        assert_eq!(parse("run").unwrap(), Commands::Run { replay: None });
        assert_eq!(
            parse("run --replay rec.ndjson").unwrap(),
            Commands::Run {
                replay: Some(PathBuf::from("rec.ndjson"))
            }
        );
        assert!(parse("run --replay").is_err());
        assert!(parse("run --fast").is_err());
    }

    #[test]
    fn sample_needs_recording_and_pixel() {
        assert_eq!(
            parse("sample --replay rec.ndjson --u 3 --v 1").unwrap(),
            Commands::Sample {
                replay: PathBuf::from("rec.ndjson"),
                u: 3,
                v: 1
            }
        );
        assert!(parse("sample --replay rec.ndjson --u 3").is_err());
        assert!(parse("sample --replay rec.ndjson --u -1 --v 0").is_err());
    }

    #[test]
    fn init_force_flag() {
        assert_eq!(parse("init").unwrap(), Commands::Init { force: false });
        assert_eq!(parse("init --force").unwrap(), Commands::Init { force: true });
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(parse("launch").unwrap_err().kind(), ErrorKind::InvalidSubcommand);
        assert!(parse("schema extra").is_err());
    }

    #[test]
    fn inbound_schema_serializes() {
        let schema = schemars::schema_for!(InboundPayload);
        let raw = serde_json::to_string(&schema).unwrap();
        assert!(raw.contains("point_cloud"));
        assert!(raw.contains("detections"));
    }

    #[tokio::test]
    async fn sample_reads_last_replayed_cloud() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("rec.ndjson");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"kind":"point_cloud","data":{{"header":{{"stamp":"2024-05-01T12:00:00Z","frame_id":"zed2"}},"width":2,"height":1,"points":[{{"x":9.0,"y":9.0,"z":9.0}},{{"x":9.0,"y":9.0,"z":9.0}}]}}}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"kind":"point_cloud","data":{{"header":{{"stamp":"2024-05-01T12:00:01Z","frame_id":"zed2"}},"width":2,"height":1,"points":[{{"x":0.5,"y":0.0,"z":1.0}},{{"x":null,"y":null,"z":null}}]}}}}"#
        )
        .unwrap();
        drop(file);

        let cfg = config::Config::default();
        let point = sample_replay(&cfg, &path, 0, 0).await.unwrap();
        assert_eq!(point, Some(Position::new(0.5, 0.0, 1.0)));
        assert_eq!(sample_replay(&cfg, &path, 1, 0).await.unwrap(), None);
        assert_eq!(sample_replay(&cfg, &path, 2, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sample_of_missing_recording_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = config::Config::default();
        assert!(sample_replay(&cfg, &dir.path().join("absent.ndjson"), 0, 0).await.is_err());
    }
}
