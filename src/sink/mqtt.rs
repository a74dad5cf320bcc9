//! MQTT sink built on `rumqttc`.
//!
//! Every message goes out with QoS 1 and the sink waits for the matching
//! PUBACK before returning, bounded by the configured acknowledgement timeout.
//! Connection loss is not retried; it surfaces as [`SinkError::Connection`].
//!
//! After the CONNACK the event loop runs in its own task and is never
//! interrupted mid-poll. The sink only sees its notices through a channel,
//! so dropping a `publish` or `drive` future loses nothing.

use super::{Sink, SinkError, SinkFuture};
use crate::config::MqttConfig;
use crate::output::Message;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Capacity of the request queue between client and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long a clean disconnect may take before the connection is dropped.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Event loop activity the sink cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Published(u16),
    Acked(u16),
    Disconnected,
}

type NoticeResult = Result<Notice, ConnectionError>;

pub struct MqttSink {
    client: AsyncClient,
    notices: mpsc::Receiver<NoticeResult>,
    event_loop: JoinHandle<()>,
    ack_timeout: Duration,
}

impl MqttSink {
    /// Connect to the broker and wait for its CONNACK.
    pub async fn connect(config: &MqttConfig, adapter: u16) -> Result<Self, SinkError> {
        let (host, port, use_tls) =
            parse_broker_url(&config.server_url).map_err(SinkError::InvalidUrl)?;

        let client_id = config.client_id(adapter);
        let mut mqtt_options = MqttOptions::new(&client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        if use_tls {
            mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Native));
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let timeout = config.connect_timeout();
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| SinkError::ConnectTimeout {
                url: config.server_url.clone(),
                timeout,
            })??;

        info!(
            broker = %config.server_url,
            client_id = %client_id,
            "Connected to MQTT broker"
        );

        let (tx, notices) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let event_loop = tokio::spawn(run_event_loop(eventloop, tx));

        Ok(Self {
            client,
            notices,
            event_loop,
            ack_timeout: config.ack_timeout(),
        })
    }

    async fn next_notice(&mut self) -> Result<Notice, SinkError> {
        match self.notices.recv().await {
            Some(Ok(notice)) => Ok(notice),
            Some(Err(e)) => Err(e.into()),
            None => Err(SinkError::EventLoopStopped),
        }
    }

    async fn publish_and_wait(&mut self, message: &Message) -> Result<(), SinkError> {
        self.client
            .publish(
                &message.topic,
                QoS::AtLeastOnce,
                message.retain,
                message.payload.as_bytes(),
            )
            .await?;

        // Publishes are strictly sequential, so the first outgoing PUBLISH is ours.
        let mut pkid = None;
        loop {
            match self.next_notice().await? {
                Notice::Published(id) if pkid.is_none() => {
                    trace!(pkid = id, topic = %message.topic, "Publish sent");
                    pkid = Some(id);
                }
                Notice::Acked(id) if Some(id) == pkid => return Ok(()),
                notice => trace!(?notice, "MQTT notice while awaiting acknowledgement"),
            }
        }
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), SinkError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            debug!(?ack, "MQTT connection acknowledged");
            return Ok(());
        }
    }
}

/// Poll the event loop until the connection ends or the sink goes away.
async fn run_event_loop(mut eventloop: EventLoop, tx: mpsc::Sender<NoticeResult>) {
    loop {
        let notice = match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => Ok(Notice::Published(pkid)),
            Ok(Event::Incoming(Packet::PubAck(ack))) => Ok(Notice::Acked(ack.pkid)),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => Ok(Notice::Disconnected),
            Ok(Event::Incoming(Packet::PingResp)) => {
                debug!("MQTT ping response received");
                continue;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("Broker closed the MQTT session");
                continue;
            }
            Ok(event) => {
                trace!(?event, "MQTT event");
                continue;
            }
            Err(e) => Err(e),
        };

        let last = !matches!(notice, Ok(Notice::Published(_) | Notice::Acked(_)));
        if tx.send(notice).await.is_err() || last {
            return;
        }
    }
}

impl Sink for MqttSink {
    fn publish<'a>(&'a mut self, message: &'a Message) -> SinkFuture<'a> {
        Box::pin(async move {
            let timeout = self.ack_timeout;
            tokio::time::timeout(timeout, self.publish_and_wait(message))
                .await
                .map_err(|_| SinkError::AckTimeout {
                    topic: message.topic.clone(),
                    timeout,
                })?
        })
    }

    fn drive(&mut self) -> SinkFuture<'_> {
        Box::pin(async move {
            let notice = self.next_notice().await?;
            trace!(?notice, "MQTT notice while idle");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> SinkFuture<'_> {
        Box::pin(async move {
            self.client.disconnect().await?;
            // Wait for the DISCONNECT to be flushed or the connection to end.
            let flush = async {
                while let Some(notice) = self.notices.recv().await {
                    if !matches!(notice, Ok(Notice::Published(_) | Notice::Acked(_))) {
                        break;
                    }
                }
            };
            if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
                debug!("MQTT disconnect not flushed in time");
            }
            self.event_loop.abort();
            Ok(())
        })
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (scheme, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        ("mqtts", stripped)
    } else {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let use_tls = scheme == "mqtts";
    let default_port = if use_tls { 8883 } else { 1883 };

    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| format!("Invalid port: {}", p))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}
