//! Core application runner for `ble-sensor-mqtt`.
//!
//! Decoupled from CLI parsing, signal handling and process exit codes so it
//! can be tested deterministically with an injected scanner, sink and clock.

use crate::config::{Config, ConfigError, ScanConfig};
use crate::output::{self, Message, OutputFormatter, PayloadError, PublishStyle};
use crate::reading::Reading;
use crate::registry::Registry;
use crate::scanner::ScanError;
use crate::scanner::report::AdvertisingReports;
use crate::sink::{Sink, SinkError};
use crate::stats::HourlyAggregator;
use crate::vendor::{self, Decision};
use clap::Parser;
use std::fmt::Write as _;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Path to the TOML configuration file
    pub config: PathBuf,

    /// Verbose output, log skipped reports and every decoded reading
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Errors returned by the core run loop. All of them end the process.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("Scanner stopped delivering advertising events")]
    ScanStopped,
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        config: &ScanConfig,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Vec<u8>>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        config: &ScanConfig,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Vec<u8>>, ScanError>> + Send + '_>>
    {
        let config = config.clone();
        Box::pin(async move { crate::scanner::start_scan(&config).await })
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}

/// Synchronous decode path: raw event in, messages out.
///
/// Owns the registry and the hourly counters, so every count change happens
/// here.
pub struct Pipeline {
    registry: Registry,
    formatter: Box<dyn OutputFormatter>,
    aggregator: HourlyAggregator,
    base_topic: String,
}

impl Pipeline {
    pub fn new(
        registry: Registry,
        style: PublishStyle,
        base_topic: &str,
        now: OffsetDateTime,
    ) -> Self {
        let aggregator = HourlyAggregator::new(now, registry.len());
        Self {
            registry,
            formatter: style.formatter(base_topic),
            aggregator,
            base_topic: base_topic.to_string(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn aggregator(&self) -> &HourlyAggregator {
        &self.aggregator
    }

    /// Split one HCI event into reports and shape a message for every
    /// reading decoded from a configured device.
    ///
    /// Reports from unknown devices, unaccepted advertising types and payloads
    /// a decoder rejects produce nothing.
    pub fn process_event(
        &mut self,
        event: &[u8],
        now: OffsetDateTime,
    ) -> Result<Vec<Message>, PayloadError> {
        let mut messages = Vec::new();

        for report in AdvertisingReports::new(event) {
            let mac = report.mac.to_string();
            let Some((index, device)) = self.registry.lookup(&mac) else {
                continue;
            };

            match vendor::dispatch(device.vendor, &report, event.len()) {
                Decision::Decoded(values) => {
                    let reading = Reading {
                        timestamp: now,
                        mac: report.mac,
                        rssi: report.rssi,
                        values,
                        device,
                    };
                    debug!(
                        mac = %mac,
                        name = %device.name,
                        rssi = report.rssi,
                        temperature_c = reading.temperature_c(),
                        humidity = reading.humidity(),
                        "Decoded {} reading",
                        device.vendor
                    );
                    messages.push(self.formatter.format(&reading)?);
                    self.aggregator.record(index, device.vendor);
                }
                Decision::HexDump => {
                    info!(
                        mac = %mac,
                        name = %device.name,
                        advertising_type = %report.event_type,
                        rssi = report.rssi,
                        length = event.len(),
                        "{}",
                        hex_dump(event)
                    );
                }
                Decision::Skip(reason) => {
                    debug!(mac = %mac, name = %device.name, "Skipped report: {reason}");
                }
            }
        }

        Ok(messages)
    }

    pub fn is_rollover_due(&self, now: OffsetDateTime) -> bool {
        self.aggregator.is_rollover_due(now)
    }

    /// Close the current hour and shape its statistics message.
    pub fn roll_over(&mut self, now: OffsetDateTime) -> Result<Message, PayloadError> {
        let previous = self.aggregator.hour();
        let stats = self.aggregator.roll_over(&self.registry, now);

        for entry in &stats.entries {
            info!(
                mac = %entry.mac,
                location = %entry.location,
                count = entry.count,
                "Packets received in last hour"
            );
        }
        info!(
            previous_hour = previous,
            current_hour = self.aggregator.hour(),
            total = stats.total,
            "Hour rollover"
        );

        output::stats_message(&self.base_topic, &stats)
    }
}

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is dropped without requesting it.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

/// Publish a message, giving up early if shutdown is requested.
///
/// Returns `false` when interrupted by shutdown.
async fn publish(
    sink: &mut dyn Sink,
    message: &Message,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<bool, RunError> {
    tokio::select! {
        result = sink.publish(message) => {
            result?;
            Ok(true)
        }
        _ = shutdown_requested(shutdown) => Ok(false),
    }
}

/// Publish the hourly statistics if the clock has left the counted hour.
///
/// Returns `false` when interrupted by shutdown.
async fn check_rollover(
    pipeline: &mut Pipeline,
    sink: &mut dyn Sink,
    clock: &dyn Clock,
    settle: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<bool, RunError> {
    if !pipeline.is_rollover_due(clock.now()) {
        return Ok(true);
    }

    // Let the boundary pass before reporting
    tokio::select! {
        _ = tokio::time::sleep(settle) => {}
        _ = shutdown_requested(shutdown) => return Ok(false),
    }

    let message = pipeline.roll_over(clock.now())?;
    publish(sink, &message, shutdown).await
}

/// Publish discovery announcements, scan, and publish readings and hourly
/// statistics until shutdown is requested or something fails.
pub async fn run(
    config: &Config,
    scanner: &dyn Scanner,
    sink: &mut dyn Sink,
    clock: &dyn Clock,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RunError> {
    let registry = Registry::new(config.sensors.clone());
    let style = config.mqtt.publish_style;
    let base_topic = config.mqtt.base_topic.as_str();

    if config.discovery.enabled {
        let announcements =
            output::discovery::announcements(&config.discovery, style, base_topic, &registry)?;
        info!(count = announcements.len(), "Publishing discovery announcements");
        for message in &announcements {
            if !publish(sink, message, &mut shutdown).await? {
                return finish(sink).await;
            }
        }
    }

    let mut events = scanner.start_scan(&config.scan).await?;
    let mut pipeline = Pipeline::new(registry, style, base_topic, clock.now());
    let settle = config.scan.settle_delay();

    let mut ticker = tokio::time::interval(config.scan.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        sensors = pipeline.registry().len(),
        hour = pipeline.aggregator().hour(),
        "Listening for advertising events"
    );

    'run: loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break 'run,
            _ = ticker.tick() => {
                if !check_rollover(&mut pipeline, sink, clock, settle, &mut shutdown).await? {
                    break 'run;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Advertising event stream closed");
                    return Err(RunError::ScanStopped);
                };
                if !check_rollover(&mut pipeline, sink, clock, settle, &mut shutdown).await? {
                    break 'run;
                }
                for message in pipeline.process_event(&event, clock.now())? {
                    if !publish(sink, &message, &mut shutdown).await? {
                        break 'run;
                    }
                }
            }
            // cancel-safe, see `Sink::drive`
            result = sink.drive() => result?,
        }
    }

    info!("Shutting down");
    drop(events);
    finish(sink).await
}

async fn finish(sink: &mut dyn Sink) -> Result<(), RunError> {
    if let Err(e) = sink.disconnect().await {
        warn!("MQTT disconnect failed: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::sink::SinkFuture;
    use crate::test_utils::{
        TEST_MAC, TestReport, advertising_event, govee_h5074_payload, registry, sensor,
        single_report_event, xiaomi_legacy_payload,
    };
    use crate::vendor::VendorType;
    use std::sync::{Arc, Mutex};
    use time::macros::datetime;

    const KITCHEN: &str = "A4:C1:38:DB:64:96";
    const FREEZER: &str = "E3:37:3C:61:2C:A9";

    #[derive(Debug)]
    struct FakeScanner {
        events: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeScanner {
        fn new(events: Vec<Vec<u8>>) -> Self {
            Self {
                events: Mutex::new(events),
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _config: &ScanConfig,
        ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Vec<u8>>, ScanError>> + Send + '_>>
        {
            let events = self.events.lock().unwrap().clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<Vec<u8>>(events.len().max(1));
                tokio::spawn(async move {
                    for event in events {
                        let _ = tx.send(event).await;
                    }
                    // keep the stream open like a live adapter
                    tx.closed().await;
                });
                Ok(rx)
            })
        }
    }

    struct FailingScanner;

    impl Scanner for FailingScanner {
        fn start_scan(
            &self,
            _config: &ScanConfig,
        ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Vec<u8>>, ScanError>> + Send + '_>>
        {
            Box::pin(async { Err(ScanError::Bluetooth("no adapter".to_string())) })
        }
    }

    #[derive(Debug, Clone, Default)]
    struct FakeSink {
        published: Arc<Mutex<Vec<Message>>>,
        disconnected: Arc<Mutex<bool>>,
        /// Never acknowledge publishes
        stall: bool,
    }

    impl FakeSink {
        fn messages(&self) -> Vec<Message> {
            self.published.lock().unwrap().clone()
        }

        fn topics(&self) -> Vec<String> {
            self.messages().into_iter().map(|m| m.topic).collect()
        }
    }

    impl Sink for FakeSink {
        fn publish<'a>(&'a mut self, message: &'a Message) -> SinkFuture<'a> {
            Box::pin(async move {
                if self.stall {
                    std::future::pending::<()>().await;
                }
                self.published.lock().unwrap().push(message.clone());
                Ok(())
            })
        }

        fn drive(&mut self) -> SinkFuture<'_> {
            Box::pin(std::future::pending())
        }

        fn disconnect(&mut self) -> SinkFuture<'_> {
            Box::pin(async move {
                *self.disconnected.lock().unwrap() = true;
                Ok(())
            })
        }
    }

    /// Wall clock that follows tokio's (pausable) clock from a fixed start.
    struct FakeClock {
        start: OffsetDateTime,
        origin: tokio::time::Instant,
    }

    impl FakeClock {
        fn starting_at(start: OffsetDateTime) -> Self {
            Self {
                start,
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> OffsetDateTime {
            self.start + self.origin.elapsed()
        }
    }

    fn test_config(sensors: Vec<crate::config::SensorConfig>) -> Config {
        let mut config = Config {
            sensors,
            ..Config::default()
        };
        config.mqtt.base_topic = "ble/".to_string();
        config
    }

    fn xiaomi_event() -> Vec<u8> {
        single_report_event(0, TEST_MAC, &xiaomi_legacy_payload(), -70)
    }

    fn pipeline(sensors: Vec<crate::config::SensorConfig>) -> Pipeline {
        Pipeline::new(
            registry(sensors),
            PublishStyle::Legacy,
            "ble/",
            datetime!(2024-03-01 13:10:00 UTC),
        )
    }

    // -- Pipeline --

    #[test]
    fn test_decoded_reading_is_published_and_counted() {
        let mut pipeline = pipeline(vec![sensor(KITCHEN, VendorType::XiaomiAtc, "Kitchen")]);
        let messages = pipeline
            .process_event(&xiaomi_event(), datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "ble/A4:C1:38:DB:64:96");
        assert!(messages[0].payload.contains(r#""temperature":70.7"#));
        assert!(messages[0].payload.contains(r#""temperature-celsius":21.5"#));
        assert_eq!(pipeline.aggregator().count(0), 1);
    }

    #[test]
    fn test_unknown_device_is_ignored() {
        let mut pipeline = pipeline(vec![sensor(FREEZER, VendorType::XiaomiAtc, "Freezer")]);
        let messages = pipeline
            .process_event(&xiaomi_event(), datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();

        assert!(messages.is_empty());
        assert_eq!(pipeline.aggregator().total(), 0);
    }

    #[test]
    fn test_lowercase_configured_address_never_matches() {
        let mut pipeline = pipeline(vec![sensor(
            &KITCHEN.to_lowercase(),
            VendorType::XiaomiAtc,
            "Kitchen",
        )]);
        let messages = pipeline
            .process_event(&xiaomi_event(), datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_h5074_without_marker_is_not_counted() {
        let mut pipeline = pipeline(vec![sensor(KITCHEN, VendorType::GoveeH5074, "Freezer")]);
        let mut data = govee_h5074_payload();
        data[0] = 0x00;
        let event = single_report_event(4, TEST_MAC, &data, -60);

        let messages = pipeline
            .process_event(&event, datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(pipeline.aggregator().total(), 0);

        // with the marker the same device is decoded
        let event = single_report_event(4, TEST_MAC, &govee_h5074_payload(), -60);
        let messages = pipeline
            .process_event(&event, datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(pipeline.aggregator().total(), 1);
    }

    #[test]
    fn test_sub_degree_frost_publishes_unsigned_zero() {
        let mut pipeline = pipeline(vec![sensor(KITCHEN, VendorType::GoveeH5072, "Porch")]);
        let mut data = vec![0u8; 30];
        data[26..30].copy_from_slice(&[0x80, 0x15, 0xE1, 0x50]);
        let event = single_report_event(0, TEST_MAC, &data, -75);

        let messages = pipeline
            .process_event(&event, datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].payload.contains(r#""temperature":32.0,"#));
        assert!(messages[0].payload.contains(r#""temperature-celsius":0.0,"#));
        assert!(messages[0].payload.contains(r#""humidity":60.0,"#));
    }

    #[test]
    fn test_wrong_advertising_type_is_skipped() {
        let mut pipeline = pipeline(vec![sensor(KITCHEN, VendorType::XiaomiAtc, "Kitchen")]);
        let event = single_report_event(4, TEST_MAC, &xiaomi_legacy_payload(), -70);
        let messages = pipeline
            .process_event(&event, datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(pipeline.aggregator().total(), 0);
    }

    #[test]
    fn test_raw_debug_is_dumped_not_published() {
        let mut pipeline = pipeline(vec![sensor(KITCHEN, VendorType::RawDebug, "Mystery")]);
        let messages = pipeline
            .process_event(&xiaomi_event(), datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(pipeline.aggregator().total(), 0);
    }

    #[test]
    fn test_every_report_in_an_event_is_processed() {
        let freezer: crate::mac_address::MacAddress = FREEZER.parse().unwrap();
        let event = advertising_event(&[
            TestReport {
                event_type: 4,
                mac: freezer,
                data: govee_h5074_payload(),
                rssi: -80,
            },
            TestReport {
                event_type: 0,
                mac: "11:22:33:44:55:66".parse().unwrap(),
                data: vec![1, 2, 3],
                rssi: -40,
            },
            TestReport {
                event_type: 4,
                mac: freezer,
                data: govee_h5074_payload(),
                rssi: -81,
            },
        ]);
        let mut pipeline = pipeline(vec![
            sensor(KITCHEN, VendorType::XiaomiAtc, "Kitchen"),
            sensor(FREEZER, VendorType::GoveeH5074, "Freezer"),
        ]);

        let messages = pipeline
            .process_event(&event, datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].payload.contains(r#""rssi":-80"#));
        assert!(messages[1].payload.contains(r#""rssi":-81"#));
        assert_eq!(pipeline.aggregator().count(0), 0);
        assert_eq!(pipeline.aggregator().count(1), 2);
    }

    #[test]
    fn test_truncated_event_yields_nothing() {
        let mut pipeline = pipeline(vec![sensor(KITCHEN, VendorType::XiaomiAtc, "Kitchen")]);
        let event = xiaomi_event();
        let messages = pipeline
            .process_event(&event[..event.len() - 1], datetime!(2024-03-01 13:10:05 UTC))
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(pipeline.aggregator().total(), 0);
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x04, 0x3E, 0x0A, 0xFF]), "043E0AFF");
        assert_eq!(hex_dump(&[]), "");
    }

    // -- Run loop --

    #[tokio::test(start_paused = true)]
    async fn run_publishes_readings_and_one_rollover_per_hour() {
        let config = test_config(vec![
            sensor(KITCHEN, VendorType::XiaomiAtc, "Kitchen"),
            sensor(FREEZER, VendorType::GoveeH5074, "Freezer"),
        ]);
        let scanner = FakeScanner::new(vec![xiaomi_event(); 3]);
        let sink = FakeSink::default();
        let clock = FakeClock::starting_at(datetime!(2024-03-01 13:59:50 UTC));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut run_sink = sink.clone();
        let runner = tokio::spawn(async move {
            run(&config, &scanner, &mut run_sink, &clock, shutdown_rx).await
        });

        // 13:59:50 + 70 min = 15:09:50, past two hour boundaries
        tokio::time::sleep(Duration::from_secs(70 * 60)).await;
        shutdown_tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        let messages = sink.messages();
        let stats: Vec<_> = messages
            .iter()
            .filter(|m| m.topic == "ble/$SYS/hour-stats")
            .collect();
        assert_eq!(messages.len(), 5);
        assert_eq!(stats.len(), 2);

        assert_eq!(
            stats[0].payload,
            r#"{"timestamp":"20240301140010","A4:C1:38:DB:64:96":{"count":3,"location":"Kitchen room"},"E3:37:3C:61:2C:A9":{"count":0,"location":"Freezer room"},"total_adv_packets":3}"#
        );
        assert!(stats[1].payload.starts_with(r#"{"timestamp":"2024030115"#));
        assert!(stats[1].payload.ends_with(
            r#""A4:C1:38:DB:64:96":{"count":0,"location":"Kitchen room"},"E3:37:3C:61:2C:A9":{"count":0,"location":"Freezer room"},"total_adv_packets":0}"#
        ));
        assert!(*sink.disconnected.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_without_traffic_still_rolls_over() {
        let config = test_config(vec![sensor(KITCHEN, VendorType::XiaomiAtc, "Kitchen")]);
        let scanner = FakeScanner::new(Vec::new());
        let sink = FakeSink::default();
        let clock = FakeClock::starting_at(datetime!(2024-03-01 23:59:59 UTC));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut run_sink = sink.clone();
        let runner = tokio::spawn(async move {
            run(&config, &scanner, &mut run_sink, &clock, shutdown_rx).await
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        shutdown_tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(sink.topics(), vec!["ble/$SYS/hour-stats"]);
        assert!(sink.messages()[0].payload.starts_with(r#"{"timestamp":"2024030200001"#));
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_discovery_before_scanning() {
        let mut config = test_config(vec![sensor(KITCHEN, VendorType::GoveeH5075, "Porch")]);
        config.discovery = DiscoveryConfig {
            enabled: true,
            ..DiscoveryConfig::default()
        };
        let scanner = FakeScanner::new(Vec::new());
        let sink = FakeSink::default();
        let clock = FakeClock::starting_at(datetime!(2024-03-01 13:10:00 UTC));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut run_sink = sink.clone();
        let runner = tokio::spawn(async move {
            run(&config, &scanner, &mut run_sink, &clock, shutdown_rx).await
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].topic, "ble/hourly-stats/config");
        assert!(messages.iter().all(|m| m.retain));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_stalled_publish() {
        let config = test_config(vec![sensor(KITCHEN, VendorType::XiaomiAtc, "Kitchen")]);
        let scanner = FakeScanner::new(vec![xiaomi_event()]);
        let sink = FakeSink {
            stall: true,
            ..FakeSink::default()
        };
        let clock = FakeClock::starting_at(datetime!(2024-03-01 13:10:00 UTC));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut run_sink = sink.clone();
        let runner = tokio::spawn(async move {
            run(&config, &scanner, &mut run_sink, &clock, shutdown_rx).await
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        shutdown_tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        assert!(sink.messages().is_empty());
        assert!(*sink.disconnected.lock().unwrap());
    }

    #[tokio::test]
    async fn run_fails_when_scanner_cannot_start() {
        let config = test_config(Vec::new());
        let mut sink = FakeSink::default();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = run(&config, &FailingScanner, &mut sink, &SystemClock, shutdown_rx).await;
        assert!(matches!(result, Err(RunError::Scan(_))));
    }

    #[tokio::test]
    async fn run_fails_when_event_stream_ends() {
        struct ClosedScanner;

        impl Scanner for ClosedScanner {
            fn start_scan(
                &self,
                _config: &ScanConfig,
            ) -> Pin<
                Box<dyn Future<Output = Result<mpsc::Receiver<Vec<u8>>, ScanError>> + Send + '_>,
            > {
                Box::pin(async {
                    let (_tx, rx) = mpsc::channel(1);
                    Ok(rx)
                })
            }
        }

        let config = test_config(Vec::new());
        let mut sink = FakeSink::default();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = run(&config, &ClosedScanner, &mut sink, &SystemClock, shutdown_rx).await;
        assert!(matches!(result, Err(RunError::ScanStopped)));
    }
}
