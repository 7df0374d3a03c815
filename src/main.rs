//! CLI entry point for the load-test rig.
//!
//! ```bash
//! # list serial adapters
//! loadrig ports
//!
//! # run against hardware until Ctrl+C
//! loadrig run --port /dev/ttyUSB0 --metadata test.toml
//!
//! # bench demo with the simulated load cell for one minute
//! loadrig run --simulate --duration 60
//!
//! # print the effective configuration
//! loadrig config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loadrig_daq::acquisition::{AcquisitionLoop, IterationOutcome};
use loadrig_daq::config::{RigConfig, DEFAULT_CONFIG_PATH};
use loadrig_daq::device::simulated::SimulatedConnector;
use loadrig_daq::device::{DeviceLink, SerialSettings, TransportConnector};
use loadrig_daq::export::HistoryExporter;
use loadrig_daq::metadata::{RequiredFields, TestMetadata};
use loadrig_daq::session::{SessionStateStore, SharedSession};
use loadrig_daq::logging;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "loadrig")]
#[command(about = "Load-test rig acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Connect, acquire until interrupted, then export history
    Run {
        /// Serial port (overrides the configuration)
        #[arg(long)]
        port: Option<String>,

        /// Use the simulated load cell instead of a serial device
        #[arg(long)]
        simulate: bool,

        /// TOML file with calibration and equipment records
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Export directory (overrides the configuration)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Skip CSV/JSON export at the end of the run
        #[arg(long)]
        no_export: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = RigConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Config => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run {
            port,
            simulate,
            metadata,
            duration,
            output,
            no_export,
        } => {
            if let Some(port) = port {
                config.device.port = port;
            }
            if let Some(output) = output {
                config.storage.output_dir = output;
            }
            config.validate()?;
            logging::init_from_config(&config)?;

            let options = RunOptions {
                simulate,
                metadata,
                duration: duration.map(Duration::from_secs),
                export: !no_export,
            };
            run(config, options).await
        }
    }
}

#[cfg(feature = "instrument_serial")]
fn list_ports() -> Result<()> {
    let ports = loadrig_daq::device::modbus_rtu::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
fn list_ports() -> Result<()> {
    Err(loadrig_daq::DaqError::FeatureNotEnabled(
        "instrument_serial".to_string(),
    )
    .into())
}

#[cfg(feature = "instrument_serial")]
fn serial_connector() -> Result<Arc<dyn TransportConnector>> {
    Ok(Arc::new(loadrig_daq::device::modbus_rtu::ModbusRtuConnector))
}

#[cfg(not(feature = "instrument_serial"))]
fn serial_connector() -> Result<Arc<dyn TransportConnector>> {
    Err(loadrig_daq::DaqError::FeatureNotEnabled(
        "instrument_serial".to_string(),
    )
    .into())
}

struct RunOptions {
    simulate: bool,
    metadata: Option<PathBuf>,
    duration: Option<Duration>,
    export: bool,
}

async fn run(config: RigConfig, options: RunOptions) -> Result<()> {
    let session = SessionStateStore::from_config(&config).into_shared();
    info!(app = %config.application.name, session = %session.lock().session_id(), "session created");

    if let Some(path) = &options.metadata {
        let metadata = TestMetadata::from_toml_file(path)
            .with_context(|| format!("reading metadata from {}", path.display()))?;
        session.lock().set_test_metadata(metadata);
    }
    let missing = session.lock().test_metadata().missing_fields();
    if !missing.is_empty() {
        warn!(?missing, "test metadata incomplete");
    }

    let connector: Arc<dyn TransportConnector> = if options.simulate {
        Arc::new(SimulatedConnector::new(config.simulator.clone()))
    } else {
        serial_connector()?
    };
    let device = DeviceLink::new(connector, Arc::clone(&session)).into_shared();
    device
        .lock()
        .await
        .connect(&config.device.port, &SerialSettings::from_config(&config))
        .await?;

    let mut acquisition = AcquisitionLoop::from_config(
        &config,
        Arc::clone(&device),
        Arc::clone(&session),
        Arc::new(RequiredFields),
    );
    let readout = tokio::spawn(live_readout(
        acquisition.subscribe_outcomes(),
        Arc::clone(&session),
    ));

    if let Err(err) = acquisition.start() {
        device.lock().await.close().await?;
        return Err(err.into());
    }

    let mut fault = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = sleep_or_forever(options.duration) => info!("run duration elapsed"),
        result = acquisition.wait() => fault = result.err(),
    }

    let stopped = acquisition.shutdown().await;
    readout.abort();

    if options.export {
        let exporter = HistoryExporter::new(&config.storage.output_dir);
        match exporter.export(&session.lock()) {
            Ok(paths) => println!(
                "History: {}\nSummary: {}",
                paths.csv.display(),
                paths.summary.display()
            ),
            Err(err) => error!(error = %err, "export failed"),
        }
    }

    let summary = session.lock().summary();
    println!(
        "Samples: {}  Peak: {:.3} t ({:.3} kN)",
        summary.sample_count, summary.peak_tons, summary.peak_kn
    );
    if let Some(proof) = summary.proof_load_tons {
        println!("Proof load: {proof:.1} t");
    }

    match fault {
        Some(err) => Err(err.into()),
        None => stopped.map_err(anyhow::Error::from),
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn live_readout(mut outcomes: broadcast::Receiver<IterationOutcome>, session: SharedSession) {
    loop {
        match outcomes.recv().await {
            Ok(outcome) => {
                let sample = outcome.sample();
                let peak = session.lock().peak_value();
                let marker = match &outcome {
                    IterationOutcome::Accepted { .. } => "recorded",
                    IterationOutcome::Held { .. } => "held",
                };
                info!(
                    "{:>8.3} t  {:>9.3} kN  peak {:>8.3} t  [{}]",
                    sample.load_tons(),
                    sample.load_kn(),
                    peak,
                    marker
                );
            }
            Err(RecvError::Lagged(missed)) => warn!(missed, "live readout lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
