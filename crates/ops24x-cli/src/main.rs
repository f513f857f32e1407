//! # OPS24x Logger
//!
//! Records speed samples from an OPS24x radar module into a SQLite database, with a log
//! file of the same name next to it.

mod cli;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use cli::Cli;
use ops24x_core::prelude::*;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        error!(error = %format!("{:#}", e), "Recording failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config_path = cli.config.as_path();
    let config = RecorderConfig::from_file(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let started = Local::now();
    fs::create_dir_all(&config.log_filedir).with_context(|| {
        format!("Failed to create log directory {}", config.log_filedir.display())
    })?;
    let log_path = config.log_file_path(&started);
    init_logging(cli, &log_path)?;

    info!(
        version = ops24x_core::VERSION,
        config = %config_path.display(),
        log = %log_path.display(),
        "OPS24x logger starting"
    );

    let telemetry = TracingTelemetry::shared();
    let recorder = Recorder::new(config, telemetry.clone());

    let stop = recorder.stop_flag();
    ctrlc::set_handler(move || stop.request_stop())
        .context("Failed to install Ctrl-C handler")?;

    let db_path = recorder.config().database_path(&started);
    let summary = record(cli, &recorder, &db_path, telemetry)?;

    info!(
        metadata_rows = summary.handshake.metadata_rows,
        samples = summary.ingest.samples,
        commits = summary.ingest.commits,
        discarded = summary.ingest.discarded,
        rejected = summary.ingest.rejected,
        stop = ?summary.ingest.stop,
        database = %db_path.display(),
        "Recording finished"
    );
    Ok(())
}

/// Open the module link, then the database, and record until stopped.
///
/// The database file is only created once the link is up.
fn record(
    cli: &Cli,
    recorder: &Recorder,
    db_path: &Path,
    telemetry: Arc<dyn Telemetry>,
) -> Result<RecordingSummary> {
    let transport = open_transport(cli, recorder.config())?;
    let store = SqliteStore::open(db_path, telemetry)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(recorder.run(transport, store)?)
}

fn open_transport(cli: &Cli, config: &RecorderConfig) -> Result<Box<dyn Transport>> {
    if cli.simulate {
        info!("Using simulated module");
        return Ok(Box::new(SimulatedDevice::new().paced(true)));
    }

    let port = &config.port;
    let serial = SerialTransport::open(port, SerialSettings::default())
        .with_context(|| format!("Failed to open serial port {}", port))?;
    Ok(Box::new(serial))
}

/// Log to the recording's log file and to stderr
fn init_logging(cli: &Cli, log_path: &Path) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let file = File::create(log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops24x_core::telemetry::RecordingTelemetry;
    use std::path::PathBuf;

    fn config_in(dir: &Path, port: &str) -> RecorderConfig {
        let json = format!(
            r#"{{
                "PORT": "{}",
                "CURSOR_BUFFER_SIZE": 10,
                "OPS24X_PARAMETERS": {{ "Units": "UM" }},
                "MAX_TIME": 0.5,
                "LOG_FILEDIR": "{}"
            }}"#,
            port,
            dir.display()
        );
        RecorderConfig::from_json_str(&json).unwrap()
    }

    fn cli(simulate: bool) -> Cli {
        Cli {
            config: PathBuf::from("unused.json"),
            verbose: 0,
            simulate,
        }
    }

    #[test]
    fn test_missing_port_leaves_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(
            config_in(dir.path(), "/dev/ops24x-does-not-exist"),
            Arc::new(RecordingTelemetry::new()),
        );
        let db_path = recorder.config().database_path(&Local::now());

        let err = record(&cli(false), &recorder, &db_path, Arc::new(RecordingTelemetry::new()))
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to open serial port"));
        assert!(!db_path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_simulated_recording_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(
            config_in(dir.path(), "/dev/ops24x-does-not-exist"),
            Arc::new(RecordingTelemetry::new()),
        );
        let db_path = recorder.config().database_path(&Local::now());

        let summary = record(&cli(true), &recorder, &db_path, Arc::new(RecordingTelemetry::new()))
            .unwrap();

        assert_eq!(summary.handshake.metadata_rows, 11);
        assert!(db_path.exists());
    }
}
