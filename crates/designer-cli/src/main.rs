//! Workflow Designer command line.
//!
//! A terminal front end over `designer-core`:
//!
//! - `tail` - follow the orchestrator's log stream, reconnecting on link loss
//! - `parse` - check a DAG file and print it as canonical JSON or YAML
//! - `validate` - send a DAG file to the orchestrator and print the verdict

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use designer_bus::{ConnectionState, Connector};
use designer_core::{transcoder, DesignerApi, DesignerConfig, DesignerSession};
use designer_telemetry::{init_telemetry, TelemetryConfig};
use designer_types::{DagSpec, LevelFilter, LogEntry};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Workflow Designer: author, validate and monitor orchestrator DAGs
#[derive(Parser, Debug)]
#[command(name = "workflow-designer", version)]
#[command(about = "Tail orchestrator logs and validate DAG specs over the message bus")]
struct Args {
    /// Bus endpoint (overrides DESIGNER_NATS_URL)
    #[arg(long, global = true)]
    nats_url: Option<String>,

    /// Log filter for the CLI's own diagnostics (overrides DESIGNER_LOG_LEVEL)
    #[arg(short, long, global = true)]
    verbose: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the orchestrator log stream until Ctrl-C
    Tail {
        /// ALL, DEBUG, INFO, WARN or ERROR (default: DESIGNER_LOG_FILTER)
        #[arg(short, long)]
        level: Option<LevelFilter>,
    },
    /// Parse a DAG file and print its canonical form
    Parse {
        file: PathBuf,

        /// Print YAML instead of JSON
        #[arg(long)]
        yaml: bool,
    },
    /// Ask the orchestrator to validate a DAG file
    Validate {
        file: PathBuf,

        /// Reply window in milliseconds (default: DESIGNER_VALIDATE_TIMEOUT_MS)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if let Some(level) = &args.verbose {
        telemetry = telemetry.with_log_level(level.clone());
    }
    let _telemetry = init_telemetry(telemetry).context("initialising telemetry")?;

    let mut config = DesignerConfig::from_env().context("reading designer configuration")?;
    if let Some(url) = args.nats_url {
        config.nats_url = url;
    }

    match args.command {
        Command::Parse { file, yaml } => parse(&file, yaml),
        Command::Tail { level } => {
            if let Some(level) = level {
                config.log_filter = level;
            }
            tail(config).await
        }
        Command::Validate { file, timeout_ms } => {
            if let Some(ms) = timeout_ms {
                config.validate_timeout = Duration::from_millis(ms);
            }
            validate(config, &file).await
        }
    }
}

fn parse(file: &Path, yaml: bool) -> Result<ExitCode> {
    let spec = read_spec(file)?;
    let rendered = render_spec(&spec, yaml)?;
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

async fn validate(config: DesignerConfig, file: &Path) -> Result<ExitCode> {
    let spec = read_spec(file)?;
    let session = DesignerSession::new(config, bus_connector()?)?;
    session
        .connect()
        .await
        .with_context(|| format!("connecting to {}", session.config().nats_url))?;

    let verdict = session.designer().validate(&spec).await;
    session.shutdown().await;

    let verdict = verdict.with_context(|| format!("validating {}", spec.name))?;
    if verdict.valid {
        println!("{}: valid", spec.name);
        return Ok(ExitCode::SUCCESS);
    }
    println!("{}: invalid", spec.name);
    for error in &verdict.errors {
        println!("  - {error}");
    }
    Ok(ExitCode::FAILURE)
}

async fn tail(config: DesignerConfig) -> Result<ExitCode> {
    let session = DesignerSession::new(config, bus_connector()?)?;
    let mut batches = session.log_batches();
    let mut states = session.state_changes();

    session
        .connect()
        .await
        .with_context(|| format!("connecting to {}", session.config().nats_url))?;
    info!(filter = %session.filter(), "Tailing log stream, Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut backoff = INITIAL_BACKOFF;
    let mut retry_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            batch = batches.recv() => match batch {
                Ok(batch) => {
                    let filter = session.filter();
                    for entry in batch.entries.iter().filter(|e| filter.matches(e)) {
                        println!("{}", format_entry(entry));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Terminal fell behind the log stream");
                }
                Err(RecvError::Closed) => break,
            },
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Disconnected if retry_at.is_none() => {
                        warn!("Bus link lost, reconnecting");
                        retry_at = Some(Instant::now() + backoff);
                    }
                    // The client restored the link itself; resubscribe.
                    ConnectionState::Connected if !session.log_stream().is_running() => {
                        retry_at = Some(Instant::now());
                    }
                    _ => {}
                }
            }
            _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                match session.connect().await {
                    Ok(()) => {
                        info!("Reconnected, log stream resumed");
                        retry_at = None;
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(e) if e.is_retryable() => {
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "Reconnect failed");
                        retry_at = Some(Instant::now() + backoff);
                    }
                    Err(e) => {
                        session.shutdown().await;
                        return Err(e.into());
                    }
                }
            }
        }
    }

    session.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

fn read_spec(file: &Path) -> Result<DagSpec> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    transcoder::parse(&text).with_context(|| format!("parsing {}", file.display()))
}

fn render_spec(spec: &DagSpec, yaml: bool) -> Result<String> {
    if yaml {
        return Ok(transcoder::to_yaml(spec)?);
    }
    let bytes = transcoder::serialize(spec)?;
    Ok(String::from_utf8(bytes)?)
}

fn format_entry(entry: &LogEntry) -> String {
    format!(
        "{} {:<5} {}",
        entry.timestamp(),
        entry.level().as_str(),
        entry.message()
    )
}

#[cfg(feature = "nats")]
fn bus_connector() -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(designer_bus::NatsConnector::default()))
}

#[cfg(not(feature = "nats"))]
fn bus_connector() -> Result<Arc<dyn Connector>> {
    anyhow::bail!("built without the `nats` feature; no bus transport available")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use designer_types::LogLevel;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_tail_level_parses_filter() {
        let args = Args::try_parse_from(["workflow-designer", "tail", "--level", "warn"]).unwrap();
        match args.command {
            Command::Tail { level } => assert_eq!(level, Some(LevelFilter::Only(LogLevel::Warn))),
            other => panic!("unexpected command: {other:?}"),
        }

        let args = Args::try_parse_from(["workflow-designer", "tail", "-l", "ALL"]).unwrap();
        assert!(matches!(args.command, Command::Tail { level: Some(LevelFilter::All) }));

        assert!(Args::try_parse_from(["workflow-designer", "tail", "--level", "TRACE"]).is_err());
    }

    #[test]
    fn test_global_nats_url() {
        let args = Args::try_parse_from([
            "workflow-designer",
            "validate",
            "dag.yaml",
            "--nats-url",
            "nats://bus:4222",
            "--timeout-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(args.nats_url.as_deref(), Some("nats://bus:4222"));
        assert!(matches!(
            args.command,
            Command::Validate { timeout_ms: Some(250), .. }
        ));
    }

    #[test]
    fn test_render_spec_json_and_yaml() {
        let spec = transcoder::parse("name: etl\ntasks:\n  - id: extract\n").unwrap();
        let json = render_spec(&spec, false).unwrap();
        assert_eq!(transcoder::parse(&json).unwrap(), spec);

        let yaml = render_spec(&spec, true).unwrap();
        assert!(yaml.contains("name: etl"));
        assert_eq!(transcoder::parse(&yaml).unwrap(), spec);
    }

    #[test]
    fn test_read_spec_reports_path() {
        let err = read_spec(Path::new("/nonexistent/dag.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dag.yaml"));
    }

    #[test]
    fn test_format_entry() {
        let entry = LogEntry::new("1", "2024-06-01T10:00:00Z", LogLevel::Warn, "disk low");
        assert_eq!(format_entry(&entry), "2024-06-01T10:00:00Z WARN  disk low");
    }
}
