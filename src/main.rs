// src/main.rs - Cable feeder host: control loop plus HTTP command surface
use std::path::Path;

use cable_feeder::calibration::{self, FileCalibrationStore};
use cable_feeder::config::{self, Config};
use cable_feeder::scheduler::run_control_loop;
use cable_feeder::web;
use cable_feeder::web::controller_channel::ControllerRequest;
use cable_feeder::{FeedSettings, JobController, SimServo, SimStepper};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio::task::LocalSet;

#[derive(Parser, Debug)]
#[command(name = "cable-feeder", version, about = "Stepper cable feeder with servo cutter")]
struct Cli {
    /// Configuration file; defaults are used when it does not exist
    #[arg(short, long, default_value = "cutter.toml")]
    config: String,
    /// Override the HTTP bind address from the configuration
    #[arg(long)]
    bind: Option<String>,
    /// Store a new steps-per-cm calibration before starting
    #[arg(long)]
    steps_per_cm: Option<f64>,
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("Starting Cable Feeder");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        config::load_config(&cli.config).map_err(|e| {
            tracing::error!("Failed to load config from '{}': {}", cli.config, e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?
    } else {
        tracing::warn!("Config file '{}' not found, using defaults", cli.config);
        Config::default()
    };

    let cal = &config.calibration;
    let mut store = FileCalibrationStore::new(&cal.path);
    tracing::info!("Calibration store: {}", store.path().display());
    if let Some(factor) = cli.steps_per_cm {
        calibration::store_factor(&mut store, &cal.namespace, &cal.key, factor).map_err(|e| {
            tracing::error!("Failed to store calibration: {}", e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?;
    }
    let steps_per_cm =
        calibration::load_factor(&store, &cal.namespace, &cal.key, config.feed.default_steps_per_cm);

    tracing::info!("Machine: {}", config.machine.name);
    tracing::info!("Steps per cm = {:.4}", steps_per_cm);
    tracing::info!(
        "Feed: max {} steps/s, accel {} steps/s²",
        config.feed.max_speed,
        config.feed.acceleration
    );
    tracing::info!("Running with simulated feed and cutter drivers");

    let controller = JobController::new(
        SimStepper::new(config.feed.max_speed, config.feed.acceleration),
        SimServo::new(config.cutter.open_angle),
        steps_per_cm,
        FeedSettings {
            max_speed: config.feed.max_speed,
            settle: config.feed.settle_delay(),
        },
        config.cutter.profile(),
    );

    // Set up a channel for communication between Axum handlers and the control loop.
    let (controller_tx, controller_rx) = mpsc::channel::<ControllerRequest>(config.web.channel_capacity);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let local = LocalSet::new();
    let control = local.spawn_local(run_control_loop(
        controller,
        controller_rx,
        config.scheduler.tick_period(),
        shutdown_tx.subscribe(),
    ));

    let app = web::api::create_router(controller_tx);
    let bind = cli.bind.unwrap_or_else(|| config.web.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);

    let mut server_shutdown = shutdown_tx.subscribe();
    local.spawn_local(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            tracing::error!("Web server error: {}", e);
        }
    });

    local
        .run_until(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(());
            if let Err(e) = control.await {
                tracing::error!("Control loop task failed: {}", e);
            }
        })
        .await;

    Ok(())
}
