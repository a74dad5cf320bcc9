//! Telemetry sink: where shaped messages are delivered.

pub mod mqtt;

use crate::output::Message;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub use mqtt::MqttSink;

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Sink abstraction so the run loop can be tested without a broker.
pub trait Sink: Send {
    /// Publish `message` and wait until the broker acknowledges it.
    fn publish<'a>(&'a mut self, message: &'a Message) -> SinkFuture<'a>;

    /// Wait for connection activity while idle.
    ///
    /// Resolves after each unit of connection work; an error means the
    /// connection is gone. Must be cancel-safe: the run loop drops this
    /// future whenever another branch is ready.
    fn drive(&mut self) -> SinkFuture<'_>;

    fn disconnect(&mut self) -> SinkFuture<'_>;
}

/// Error types for sink operations.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("No connection acknowledgement from {url} within {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },
    #[error("No acknowledgement for message on {topic} within {timeout:?}")]
    AckTimeout { topic: String, timeout: Duration },
    #[error("MQTT event loop stopped")]
    EventLoopStopped,
}
