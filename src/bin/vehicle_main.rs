// vehicle_main.rs
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use transit_fleet::config::FleetConfig;
use transit_fleet::error::FleetError;
use transit_fleet::shared_data::{RunFlag, VehicleType};
use transit_fleet::simulation_engine::simulation::VehicleClient;
use transit_fleet::simulation_engine::vehicles::{Clock, FleetVehicle};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Bus,
    Train,
    Shuttle,
    Uber,
}

impl From<Kind> for VehicleType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Bus => VehicleType::Bus,
            Kind::Train => VehicleType::Train,
            Kind::Shuttle => VehicleType::Shuttle,
            Kind::Uber => VehicleType::Uber,
        }
    }
}

/// One simulated vehicle reporting to the dispatch server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum)]
    kind: Kind,

    /// Vehicle id; a random one for the kind when omitted
    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
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

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let vehicle_type = VehicleType::from(args.kind);
    let id = args.id.unwrap_or_else(|| vehicle_type.random_id(&mut rng));

    let vehicle = match FleetVehicle::build(vehicle_type, id, config.clone(), rng, &Clock::now()) {
        Ok(vehicle) => vehicle,
        Err(e) => {
            log::error!("Cannot build {}: {}", vehicle_type, e);
            std::process::exit(1);
        }
    };
    log::info!("Starting {} client {}", vehicle_type, vehicle.id());

    let run = RunFlag::new();
    let stopper = run.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, shutting down");
            stopper.stop();
        }
    });

    let mut client = VehicleClient::new(config, run);
    match client.start(vehicle).await {
        Ok(vehicle) => log::info!("{} stopped at {}", vehicle.id(), vehicle.core().location),
        Err(FleetError::Cancelled) => log::info!("Vehicle stopped before registering"),
        Err(e) => {
            log::error!("Vehicle stopped: {}", e);
            std::process::exit(1);
        }
    }
}
