//! `gpiobridge-middleware` – message-bus plumbing
//!
//! Carries status and command messages between the bridge and the outside
//! world without caring about their meaning.
//!
//! # Modules
//!
//! - [`transport`] – the [`BusTransport`] trait every bus connection
//!   implements, plus [`BusMessage`] and [`Subscription`].
//! - [`topic`] – MQTT-style topic filter validation and matching.
//! - [`bus`] – [`LocalBus`]: an in-process broker with retained messages,
//!   used for simulation runs and tests.
//! - [`mqtt`] – [`MqttBus`]: a client connection to an MQTT broker.

pub mod bus;
mod fanout;
pub mod mqtt;
pub mod topic;
pub mod transport;

pub use bus::LocalBus;
pub use mqtt::{BrokerConfig, MqttBus};
pub use topic::TopicFilter;
pub use transport::{BusMessage, BusTransport, Subscription};
