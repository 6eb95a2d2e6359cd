use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use gauntlet_core::{FaultSink, HarnessError, HarnessResult, WorkerId};
use gauntlet_protocol::command_queues;
use gauntlet_worker::config::WorkerConfig;
use gauntlet_worker::connection::build_connection;
use gauntlet_worker::executor::{spawn_processor, CommandExecutor};
use gauntlet_worker::registry::TestRegistry;
use gauntlet_worker::scenario::register_builtin;
use gauntlet_worker::transport::serve;
use gauntlet_worker::WorkerAddress;

#[derive(Parser, Debug)]
#[command(name = "gauntlet-worker")]
#[command(about = "Gauntlet load-test worker", long_about = None)]
#[command(version)]
struct Cli {
    /// Override worker.mode (member or client).
    #[arg(long)]
    mode: Option<String>,

    /// Override command.listen_addr.
    #[arg(long)]
    listen: Option<String>,

    /// Override worker.public_address.
    #[arg(long)]
    public_address: Option<String>,

    /// Override faults.dir.
    #[arg(long)]
    fault_dir: Option<PathBuf>,

    /// Directory the readiness file is written into.
    #[arg(long, default_value = ".")]
    run_dir: PathBuf,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> HarnessResult<WorkerConfig> {
    let mut config = WorkerConfig::load()
        .map_err(|error| HarnessError::configuration(error.to_string()))?;
    if let Some(mode) = &cli.mode {
        config.worker.mode = mode.clone();
    }
    if let Some(listen) = &cli.listen {
        config.command.listen_addr = listen.clone();
    }
    if let Some(public_address) = &cli.public_address {
        config.worker.public_address = public_address.clone();
    }
    if let Some(fault_dir) = &cli.fault_dir {
        config.faults.dir = fault_dir.display().to_string();
    }
    config
        .validate()
        .map_err(|error| HarnessError::configuration(error.to_string()))?;
    Ok(config)
}

async fn run(cli: Cli) -> HarnessResult<()> {
    let config = load_config(&cli)?;
    let worker_id = WorkerId::new();
    let mode = config.mode();
    info!(%worker_id, %mode, "starting gauntlet worker");

    let faults = FaultSink::new(&config.faults.dir);
    let connection = build_connection(
        mode,
        &config.platform.endpoint,
        Duration::from_millis(config.platform.ready_poll_ms),
    );

    // Block the worker until the platform can take load; the readiness
    // dial is synchronous by design.
    let ready_timeout = Duration::from_secs(config.platform.ready_timeout_secs);
    let ready_connection = Arc::clone(&connection);
    tokio::task::spawn_blocking(move || ready_connection.await_ready(ready_timeout))
        .await
        .map_err(|error| HarnessError::command(format!("readiness task failed: {error}")))??;

    let registry = Arc::new(TestRegistry::new());
    register_builtin(&registry);
    info!(scenarios = ?registry.names(), "registered scenarios");

    let executor = Arc::new(CommandExecutor::new(
        registry,
        connection,
        faults.clone(),
        config.run.default_thread_count,
    ));

    let (request_tx, request_rx, response_tx, response_rx) = command_queues();
    let processor = spawn_processor(Arc::clone(&executor), request_rx, response_tx)?;

    let listener = TcpListener::bind(&config.command.listen_addr).await?;
    let command_addr = listener.local_addr()?.to_string();

    // The last startup step: the file's existence tells the coordinator
    // this worker is targetable.
    let address = WorkerAddress {
        worker_id,
        mode,
        command_addr: command_addr.clone(),
        public_address: config.worker.public_address.clone(),
    };
    address.publish(&cli.run_dir)?;
    info!(%command_addr, "worker is ready");

    let server = serve(listener, request_tx, response_rx);
    tokio::select! {
        result = server => {
            if let Err(serve_error) = result {
                error!(error = %serve_error, "command transport failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    executor.stop_all();
    WorkerAddress::withdraw(&cli.run_dir);
    // The serve future is dropped here, which drops the request sender;
    // the processor drains whatever was accepted and exits.
    tokio::task::spawn_blocking(move || {
        let _ = processor.join();
    })
    .await
    .map_err(|error| HarnessError::command(format!("processor join failed: {error}")))?;
    info!("worker stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let run_dir = cli.run_dir.clone();
    let fault_dir = cli
        .fault_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("faults"));

    if let Err(failure) = run(cli).await {
        // Make startup failures discoverable the same way test
        // failures are.
        FaultSink::new(fault_dir).report(None, "startup", &failure);
        WorkerAddress::withdraw(&run_dir);
        error!(error = %failure, "worker failed");
        std::process::exit(1);
    }
}
