use ble_sensor_mqtt::app::{self, Options, RealScanner, RunError, SystemClock};
use ble_sensor_mqtt::config::Config;
use ble_sensor_mqtt::sink::MqttSink;
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("ble_sensor_mqtt=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ble_sensor_mqtt=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Flip `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: watch::Sender<bool>) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Cannot listen for Ctrl+C: {e}");
                return;
            }
            info!("Received interrupt");
        }
        _ = terminate => info!("Received SIGTERM"),
    }
    let _ = shutdown.send(true);
}

async fn run(options: Options) -> Result<(), RunError> {
    let config = Config::load_validated(&options.config)?;

    info!(
        config = %options.config.display(),
        sensors = config.sensors.len(),
        adapter = config.scan.adapter,
        broker = %config.mqtt.server_url,
        base_topic = %config.mqtt.base_topic,
        style = ?config.mqtt.publish_style,
        discovery = config.discovery.enabled,
        "Starting {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    for sensor in &config.sensors {
        info!(
            mac = %sensor.mac,
            name = %sensor.name,
            location = %sensor.location,
            "Monitoring {}",
            sensor.vendor
        );
    }

    let mut sink = MqttSink::connect(&config.mqtt, config.scan.adapter).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_signals(shutdown_tx));

    app::run(&config, &RealScanner, &mut sink, &SystemClock, shutdown_rx).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_tracing(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
