//! # Fleet Device
//!
//! Entry point of the device connectivity core.
//!
//! ```text
//! fleet-device [--loopback] provision [--resume]
//! fleet-device [--loopback] run
//! ```
//!
//! `provision` rotates the claim credential into a registered production
//! identity. `run` starts the lifecycle runtime on that identity and stops
//! on Ctrl+C, announcing `offline` before disconnecting.
//!
//! With `--loopback` the broker and fleet backend are simulated in
//! process; `run` then provisions first since the simulated backend keeps
//! no state between invocations.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use device_runtime::{DeviceConfig, DeviceRuntime, LoopbackBackend, LoopbackConfig};
use fc_03_provisioning::{CredentialStore, InMemoryCredentialStore, RotationReport};
use fleet_telemetry::{init_logging, TelemetryConfig};
use shared_bus::InMemoryBroker;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "fleet-device", version, about = "Fleet device connectivity core")]
struct Args {
    /// Run against an in-process broker and simulated backend.
    #[arg(long, global = true)]
    loopback: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rotate the claim credential into a production identity.
    Provision {
        /// Re-submit the issued bundle saved by a failed run.
        #[arg(long)]
        resume: bool,
    },
    /// Run the lifecycle runtime until Ctrl+C.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_logging(&telemetry).context("failed to initialize logging")?;

    let args = Args::parse();
    let config = DeviceConfig::from_env().context("invalid environment configuration")?;
    config.validate().context("invalid configuration")?;

    info!(
        endpoint = %config.broker.endpoint,
        template = %config.provisioning.template_name,
        loopback = args.loopback,
        "Fleet device starting"
    );

    if !args.loopback {
        bail!(
            "no broker link for endpoint {}: this build connects through an external link factory, run with --loopback",
            config.broker.endpoint
        );
    }

    let loopback = Loopback::start(&config).await?;
    let runtime = DeviceRuntime::new(
        config,
        Arc::new(loopback.broker.clone()),
        Arc::clone(&loopback.store) as Arc<dyn CredentialStore>,
    );

    let result = match args.command {
        Command::Provision { resume } => provision(&runtime, resume).await.map(|_| ()),
        Command::Run => run(&runtime).await,
    };

    if let Err(err) = loopback.backend.shutdown().await {
        warn!(error = %err, "Loopback backend shutdown failed");
    }
    result
}

/// In-process broker, backend and credential store.
struct Loopback {
    broker: InMemoryBroker,
    backend: LoopbackBackend,
    store: Arc<InMemoryCredentialStore>,
}

impl Loopback {
    async fn start(config: &DeviceConfig) -> Result<Self> {
        let broker = InMemoryBroker::new();
        broker.require_trusted_credentials(true);

        let backend = LoopbackBackend::new(
            broker.clone(),
            LoopbackConfig {
                topics: config.broker.topic_scheme(),
                template_name: config.provisioning.template_name.clone(),
                ..LoopbackConfig::default()
            },
        );
        backend
            .start()
            .await
            .context("loopback backend failed to start")?;

        let store = Arc::new(InMemoryCredentialStore::new());
        store.insert(config.identity.claim_ref(), backend.issue_claim_credential());
        info!("Loopback broker and backend ready");

        Ok(Self {
            broker,
            backend,
            store,
        })
    }
}

async fn provision(runtime: &DeviceRuntime, resume: bool) -> Result<RotationReport> {
    let files = runtime.config().identity.file_store();
    let resumed = if resume {
        let issued = files
            .load_issued()
            .context("failed to read saved credential bundle")?;
        if issued.is_none() {
            warn!(path = %files.issued_path().display(), "No saved bundle, requesting a new credential");
        }
        issued
    } else {
        None
    };

    let report = runtime.provision(resumed).await?;

    if report.is_success() {
        if let Err(err) = files.clear_issued() {
            warn!(error = %err, "Failed to remove saved credential bundle");
        }
        info!(
            device = report.device_name.as_deref().unwrap_or_default(),
            echo_verified = ?report.echo_verified,
            "Provisioning complete"
        );
        return Ok(report);
    }

    if let Some(issued) = &report.issued {
        match files.save_issued(issued) {
            Ok(path) => info!(path = %path.display(), "Issued bundle saved, retry with --resume"),
            Err(err) => error!(error = %err, "Failed to save issued bundle"),
        }
    }
    let stage = report.last_completed;
    match report.into_result() {
        Ok(report) => Ok(report),
        Err(err) => Err(err).with_context(|| format!("provisioning failed after {stage}")),
    }
}

async fn run(runtime: &DeviceRuntime) -> Result<()> {
    let report = provision(runtime, false).await?;
    let (Some(device), Some(credential)) = (report.device_name, report.credential) else {
        bail!("provisioning finished without a device identity");
    };

    info!(device = %device, "Lifecycle runtime running, press Ctrl+C to stop");
    let end = runtime
        .run_lifecycle(&device, &credential, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "Failed to listen for Ctrl+C");
            }
        })
        .await?;
    info!(device = %device, state = %end, "Stopped");
    Ok(())
}
