//! Visual Inspection Service (`inspsrv`)

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fins_comlink::{ProtocolLink, ReconnectSupervisor, RegisterAccess};
use inspsrv::bootstrap::{self, Args};
use inspsrv::config::AppConfig;
use inspsrv::events::{self, EventHub, DEFAULT_EVENT_CAPACITY};
use inspsrv::image_store::FileImageStore;
use inspsrv::sim::{SimulatedCamera, SimulatedVision};
use inspsrv::station::StationContext;
use inspsrv::statistics::StatisticsStore;
use inspsrv::{InspectionOrchestrator, OrchestratorSettings};

const SIM_FRAME_WIDTH: u32 = 640;
const SIM_FRAME_HEIGHT: u32 = 480;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    bootstrap::initialize_logging(&args, &config.service)?;
    info!(
        "Starting {} v{} with {} (log filter: {})",
        config.service.name,
        env!("CARGO_PKG_VERSION"),
        args.config.display(),
        common::logging::get_log_level()
    );

    config.validate()?;
    if args.validate {
        info!(
            "Configuration valid: {} station(s), PLC {}:{}",
            config.inspection.stations.len(),
            config.plc.host,
            config.plc.port
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let events = EventHub::new(DEFAULT_EVENT_CAPACITY);
    let event_logger = events::spawn_event_logger(&events, shutdown.child_token());

    // PLC link: one attempt now, the supervisor keeps it up afterwards
    let link = ProtocolLink::new(config.plc.link_config()?);
    let link_watcher = events::spawn_link_watcher(
        link.subscribe_state(),
        events.clone(),
        config.plc.name.clone(),
        shutdown.child_token(),
    );
    if let Err(e) = link.connect().await {
        warn!("PLC connect failed: {}. Retrying in background", e);
    }
    let supervisor =
        ReconnectSupervisor::start(link.clone(), config.plc.reconnect_policy(), &shutdown);

    let statistics =
        Arc::new(StatisticsStore::load(&config.statistics.file, &config.station_ids()).await?);
    let statistics_saver = statistics
        .clone()
        .spawn_periodic_save(config.statistics.save_interval(), shutdown.child_token());

    // No vendor SDK is linked in; every station runs on simulated devices
    let stations = config
        .inspection
        .stations
        .iter()
        .map(|station| {
            info!(
                "{}: simulated camera '{}'",
                station.display_name(),
                station.camera_id
            );
            StationContext::new(
                station.clone(),
                Arc::new(SimulatedCamera::new(SIM_FRAME_WIDTH, SIM_FRAME_HEIGHT)),
                Arc::new(SimulatedVision::new()),
            )
        })
        .collect();

    let orchestrator = InspectionOrchestrator::new(
        OrchestratorSettings::from(&config.inspection),
        stations,
        RegisterAccess::new(link.clone()),
        statistics.clone(),
        Arc::new(FileImageStore::new(&config.images)),
        events.clone(),
    );

    match orchestrator.initialize().await {
        Ok(()) => {
            if let Err(e) = orchestrator.start().await {
                error!("Inspection not started: {}", e);
            }
        },
        Err(e) => error!("Initialization failed: {}", e),
    }

    let signal = common::shutdown::wait_for_shutdown().await;
    info!("Received {}, shutting down", signal);

    orchestrator.shutdown().await;
    shutdown.cancel();
    supervisor.stop().await;
    link.disconnect().await;

    for (name, task) in [
        ("statistics saver", statistics_saver),
        ("link watcher", link_watcher),
        ("event logger", event_logger),
    ] {
        if let Err(e) = task.await {
            warn!("{} join: {}", name, e);
        }
    }

    info!("{} stopped", config.service.name);
    Ok(())
}
