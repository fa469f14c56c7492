// dispatch_server_main.rs
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use transit_fleet::config::FleetConfig;
use transit_fleet::monitoring::admin_console::run_console;
use transit_fleet::monitoring::telemetry_sink::CsvTelemetrySink;
use transit_fleet::server::dispatcher::DispatchServer;
use transit_fleet::shared_data::RunFlag;

/// Dispatch server for the simulated transit fleet.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config {
        Some(path) => match FleetConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => FleetConfig::default(),
    };
    let config = Arc::new(config);

    let (sink, writer) = match CsvTelemetrySink::spawn(&config.telemetry_dir) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("Cannot open telemetry directory {}: {}", config.telemetry_dir.display(), e);
            std::process::exit(1);
        }
    };

    let run = RunFlag::new();
    let server = Arc::new(DispatchServer::new(config.clone(), Arc::new(sink), run.clone()));
    let listeners = match server.bind().await {
        Ok(listeners) => listeners,
        Err(e) => {
            log::error!("Failed to start dispatch server: {}", e);
            std::process::exit(1);
        }
    };
    let loops = server.serve(listeners);

    let stopper = run.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, shutting down");
            stopper.stop();
        }
    });

    run_console(&server, &config.telemetry_dir).await;
    run.stop();
    let _ = loops.await;
    // Dropping the last sink handle lets the writer flush and finish.
    drop(server);
    let _ = writer.await;
    log::info!("Dispatch server stopped");
    // A pending stdin read would otherwise keep the runtime from shutting down.
    std::process::exit(0);
}
