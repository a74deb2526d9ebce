//! `sensor-bridge` – runs the sensor bridge until Ctrl-C.
//!
//! 1. Loads `~/.sensorbridge/config.toml` (or the path given as the first
//!    argument) and applies `SENSORBRIDGE_*` overrides.
//! 2. Builds a driver per sensor: `"sim"` selects the simulated driver, a
//!    `/dev/...` or `COM<n>` device is opened as a serial port, any other path
//!    is read as a replay file.
//! 3. Connects to the WebSocket bus, starts the bridge and the orientation
//!    monitor.
//! 4. On Ctrl-C, closes the bridge and exits.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use bridge_hal::{
    LineLink, LineOrientationDriver, LinePositionDriver, OrientationDriver, PositionDriver,
    SimOrientationDriver, SimPositionDriver,
};
use bridge_middleware::WsConnector;
use bridge_runtime::config::SensorConfig;
use bridge_runtime::{BridgeConfig, BridgeController, OrientationMonitor, SensorSet, telemetry};
use bridge_types::BridgeError;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Yaw advance per simulated IMU read (~2.9°).
const SIM_YAW_STEP_RAD: f64 = 0.05;
/// Radius of the simulated tag's circular walk.
const SIM_RADIUS_M: f64 = 2.0;
const SIM_HEIGHT_M: f64 = 0.0;
const SIM_ANGLE_STEP_RAD: f64 = 0.02;

/// How long runtime teardown waits for tasks still parked on I/O.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    // Installed before the runtime exists; the OTLP exporter is synchronous.
    let _guard = telemetry::init_tracing("sensor-bridge");

    print_banner();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(config::config_path);
    let cfg = match config::load(&path) {
        Ok(cfg) => {
            println!("  Config: {}", path.display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let on_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing the bridge …".yellow().bold());
        on_ctrlc.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with SIGKILL");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start Tokio runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(run(cfg, shutdown));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match outcome {
        Ok(()) => {
            println!("{}", "  ✓ Bridge closed.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Bridge error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: BridgeConfig, shutdown: CancellationToken) -> Result<(), BridgeError> {
    let sensors = build_sensors(&cfg);
    let connector = WsConnector::new(cfg.connect_timeout());
    let monitor = cfg.monitor.enabled.then(|| OrientationMonitor::new(&cfg));
    let endpoint = cfg.bus.endpoint.clone();

    let mut bridge = BridgeController::new(cfg, sensors);
    bridge.create_bridge(&connector).await?;
    println!(
        "  {} publishing to {}",
        "✓".green().bold(),
        endpoint.bold()
    );

    let monitor = monitor.map(|m| m.spawn(bridge.handle(), shutdown.child_token()));

    shutdown.cancelled().await;
    let report = bridge.close_bridge().await?;
    info!(
        workers = report.workers.len(),
        aborted = report.aborted,
        "shutdown complete"
    );

    if let Some(monitor) = monitor {
        match monitor.await {
            Ok(summary) => info!(
                observations = summary.observations,
                transitions = summary.transitions,
                "monitor stopped"
            ),
            Err(e) => warn!(error = %e, "monitor task failed"),
        }
    }
    Ok(())
}

/// One driver per enabled sensor.  Disabled sensors get no driver.
fn build_sensors(cfg: &BridgeConfig) -> SensorSet {
    let mut sensors = SensorSet::new();
    if cfg.orientation.enabled {
        sensors = sensors.with_orientation(orientation_driver(&cfg.orientation));
    }
    if cfg.position.enabled {
        sensors = sensors.with_position(position_driver(&cfg.position));
    }
    sensors
}

fn orientation_driver(settings: &SensorConfig) -> OrientationDriver {
    if settings.is_simulated() {
        Box::new(SimOrientationDriver::new("imu-sim", SIM_YAW_STEP_RAD))
    } else {
        Box::new(
            LineOrientationDriver::orientation("imu", &settings.device)
                .with_link(line_link(settings)),
        )
    }
}

fn position_driver(settings: &SensorConfig) -> PositionDriver {
    if settings.is_simulated() {
        Box::new(SimPositionDriver::new(
            "dwm-sim",
            SIM_RADIUS_M,
            SIM_HEIGHT_M,
            SIM_ANGLE_STEP_RAD,
        ))
    } else {
        Box::new(
            LinePositionDriver::position("dwm", &settings.device).with_link(line_link(settings)),
        )
    }
}

fn line_link(settings: &SensorConfig) -> LineLink {
    LineLink::for_path(Path::new(&settings.device), settings.baud_rate)
}

fn print_banner() {
    println!();
    println!("{}", "  ┌─────────────────────────────┐".bold().cyan());
    println!("{}", "  │        sensor-bridge        │".bold().cyan());
    println!("{}", "  └─────────────────────────────┘".bold().cyan());
    println!(
        "  {} {}",
        "IMU + UWB → pub/sub".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}
