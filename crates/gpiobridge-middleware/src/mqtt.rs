//! [`MqttBus`] – [`BusTransport`] over an MQTT broker connection.
//!
//! Built on the `rumqttc` async client.  Requests (`publish`, `subscribe`,
//! …) are queued with the client's non-blocking `try_*` calls; a background
//! task drives the event loop, fans incoming publishes out to the matching
//! [`Subscription`]s and reconnects after connection loss.
//!
//! Everything goes out at QoS 0.  Retained storage is the broker's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gpiobridge_types::BridgeError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, info, warn};

use crate::bus::{DEFAULT_CAPACITY, check_publish_topic};
use crate::fanout::Subscribers;
use crate::topic::TopicFilter;
use crate::transport::{BusMessage, BusTransport, Subscription};

/// Pause between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    /// Queue capacity of the client request channel and of each subscription.
    pub capacity: usize,
}

impl BrokerConfig {
    /// `localhost:1883` with the given client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            host: "localhost".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

struct Inner {
    client_id: String,
    client: AsyncClient,
    /// Cleared by `disconnect`; never set again.
    open: AtomicBool,
    /// Broker session currently established.
    online: AtomicBool,
    subscribers: Subscribers,
}

/// MQTT client connection.  Clones share the connection.
#[derive(Clone)]
pub struct MqttBus {
    inner: Arc<Inner>,
}

impl MqttBus {
    /// Start connecting to the broker.  Returns immediately; requests made
    /// before the session is up are sent once it is.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: BrokerConfig) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        let (client, event_loop) = AsyncClient::new(options, config.capacity.max(1));

        let inner = Arc::new(Inner {
            client_id: config.client_id,
            client,
            open: AtomicBool::new(true),
            online: AtomicBool::new(false),
            subscribers: Subscribers::new(config.capacity),
        });
        info!(client = %inner.client_id, host = %config.host, port = config.port, "connecting to broker");
        tokio::spawn(drive(inner.clone(), event_loop));
        Self { inner }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// `true` while a broker session is established.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn subscribed_filters(&self) -> Vec<String> {
        self.inner.subscribers.filters()
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.inner.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::Transport(format!(
                "client '{}' is not connected",
                self.inner.client_id
            )))
        }
    }
}

fn client_error(e: rumqttc::ClientError) -> BridgeError {
    BridgeError::Transport(e.to_string())
}

impl BusTransport for MqttBus {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BridgeError> {
        self.ensure_open()?;
        check_publish_topic(topic)?;
        self.inner
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(client_error)
    }

    fn subscribe(&self, filter: &str) -> Result<Subscription, BridgeError> {
        self.ensure_open()?;
        let filter = TopicFilter::new(filter)?;
        self.inner
            .client
            .try_subscribe(filter.as_str(), QoS::AtMostOnce)
            .map_err(client_error)?;
        debug!(client = %self.inner.client_id, %filter, "subscribed");
        Ok(self.inner.subscribers.add(filter, []))
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), BridgeError> {
        self.ensure_open()?;
        let filter = TopicFilter::new(filter)?;
        self.inner.subscribers.remove(&filter);
        self.inner
            .client
            .try_unsubscribe(filter.as_str())
            .map_err(client_error)?;
        debug!(client = %self.inner.client_id, %filter, "unsubscribed");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::Transport(format!(
                "client '{}' already disconnected",
                self.inner.client_id
            )));
        }
        self.inner.subscribers.clear();
        self.inner.client.try_disconnect().map_err(client_error)?;
        debug!(client = %self.inner.client_id, "disconnect requested");
        Ok(())
    }
}

// Event-loop task.  Ends after the disconnect request went out, or on the
// first connection error once the bus has been closed.
async fn drive(inner: Arc<Inner>, mut event_loop: EventLoop) {
    let mut sessions = 0u32;
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                inner.online.store(true, Ordering::SeqCst);
                sessions += 1;
                info!(client = %inner.client_id, session_present = ack.session_present, "broker session established");
                // The first session sends the queued subscribe requests itself.
                if sessions > 1 && !ack.session_present {
                    resubscribe(&inner);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage::new(publish.topic, publish.payload, publish.retain);
                let delivered = inner.subscribers.deliver(&message);
                debug!(topic = %message.topic, delivered, "message received");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                inner.online.store(false, Ordering::SeqCst);
                info!(client = %inner.client_id, "disconnected from broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                inner.online.store(false, Ordering::SeqCst);
                if !inner.open.load(Ordering::SeqCst) {
                    debug!(error = %e, "event loop closed");
                    break;
                }
                warn!(client = %inner.client_id, error = %e, "broker connection lost; retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    inner.subscribers.clear();
}

fn resubscribe(inner: &Inner) {
    for filter in inner.subscribers.filters() {
        if let Err(e) = inner.client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
            warn!(%filter, error = %e, "resubscribe failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Read one MQTT control packet: (fixed header byte, body).
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// A QoS 0 PUBLISH packet.
    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);
        let mut packet = vec![0x30, body.len() as u8];
        packet.extend(body);
        packet
    }

    fn unreachable_broker() -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..BrokerConfig::new("gpio-test")
        }
    }

    #[test]
    fn broker_defaults() {
        let config = BrokerConfig::new("gpio");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.client_id, "gpio");
    }

    #[tokio::test]
    async fn requests_queue_while_offline_and_close_once() {
        let bus = MqttBus::connect(unreachable_broker());
        assert!(!bus.is_online());

        bus.publish("status/viessmann-control", b"enabled", true).unwrap();
        assert!(matches!(
            bus.publish("status/#", b"enabled", true),
            Err(BridgeError::Transport(_))
        ));
        let mut sub = bus.subscribe("gpio/write/#").unwrap();
        assert_eq!(bus.subscribed_filters(), vec!["gpio/write/#".to_string()]);
        assert!(matches!(
            bus.subscribe("gpio/#/write"),
            Err(BridgeError::InvalidTopicFilter(_))
        ));

        bus.disconnect().unwrap();
        assert!(sub.recv().await.is_none());
        assert!(bus.disconnect().is_err());
        assert!(bus.publish("status/viessmann-control", b"enabled", true).is_err());
    }

    #[tokio::test]
    async fn exchanges_packets_with_a_broker() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let bus = MqttBus::connect(BrokerConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..BrokerConfig::new("gpio")
        });
        let mut commands = bus.subscribe("gpio/write/#")?;

        let (mut socket, _) = timeout(WAIT, listener.accept()).await??;
        let (header, _) = timeout(WAIT, read_packet(&mut socket)).await??;
        assert_eq!(header, 0x10, "CONNECT");
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;

        let (header, body) = timeout(WAIT, read_packet(&mut socket)).await??;
        assert_eq!(header, 0x82, "SUBSCRIBE");
        assert_eq!(&body[4..16], b"gpio/write/#");
        assert_eq!(body[16], 0, "QoS 0");
        socket.write_all(&[0x90, 0x03, body[0], body[1], 0x00]).await?;

        socket
            .write_all(&publish_packet("gpio/write/viessmann-onoff", b"disabled"))
            .await?;
        let msg = timeout(WAIT, commands.recv()).await?.expect("subscription open");
        assert_eq!(msg.topic, "gpio/write/viessmann-onoff");
        assert_eq!(msg.payload_str(), Some("disabled"));
        assert!(bus.is_online());

        bus.publish("status/viessmann-onoff", b"disabled", true)?;
        let (header, body) = timeout(WAIT, read_packet(&mut socket)).await??;
        assert_eq!(header, 0x31, "retained QoS 0 PUBLISH");
        assert_eq!(&body[2..24], b"status/viessmann-onoff");
        assert_eq!(&body[24..], b"disabled");

        bus.disconnect()?;
        let (header, _) = timeout(WAIT, read_packet(&mut socket)).await??;
        assert_eq!(header, 0xe0, "DISCONNECT");
        assert!(commands.recv().await.is_none());
        Ok(())
    }
}
