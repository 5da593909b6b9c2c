//! [`CommandDispatcher`] – routes inbound command messages to output writes.
//!
//! One handler per output channel is registered against its command topic
//! when the dispatcher is built, and never again for the lifetime of the
//! connection.  Each inbound message then goes through:
//!
//! 1. **Decode** – payload as UTF-8 text; anything undecodable becomes `""`.
//! 2. **Map** – [`command_level`] turns the text into a line level using the
//!    channel's polarity.  Unknown payloads take the default branch.
//! 3. **Write** – the level goes to every line of the channel in one atomic
//!    [`LineRegistry::write_lines`] call.
//! 4. **Acknowledge** – the resulting logical state is published, retained,
//!    on the channel's status topic.  Repeated commands are acknowledged
//!    every time.
//!
//! A failed write is logged and suppresses the acknowledgement.

use std::collections::HashMap;
use std::sync::Arc;

use gpiobridge_hal::LineRegistry;
use gpiobridge_middleware::{BusMessage, BusTransport, Subscription};
use gpiobridge_types::{BridgeError, ChannelSpec, SwitchState};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::termination::RunState;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Lines written and the acknowledgement published.
    Acknowledged(SwitchState),
    /// No handler for the topic.
    Unrouted,
    /// Arrived after termination began; dropped.
    Rejected,
    /// The write failed; no acknowledgement was published.
    HardwareFault,
    /// Lines written but the acknowledgement could not be published.
    AckFailed(SwitchState),
}

/// Line level a command `payload` asks for on `channel`.
///
/// Regular channels go high only for `"enabled"`.  Inverted channels go high
/// only for `"disabled"`, so any other payload leaves them low, which they
/// report as enabled.
pub fn command_level(channel: &ChannelSpec, payload: &str) -> bool {
    if channel.invert_logic {
        payload == "disabled"
    } else {
        payload == "enabled"
    }
}

struct CommandHandler {
    channel: ChannelSpec,
    status_topic: String,
}

/// Topic-keyed table of output handlers.
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dispatcher with one handler per output channel of `channels`.
    pub fn for_outputs(channels: &[ChannelSpec]) -> Result<Self, BridgeError> {
        let mut dispatcher = Self::new();
        for channel in channels.iter().filter(|c| c.is_output()) {
            dispatcher.register(channel)?;
        }
        Ok(dispatcher)
    }

    /// Attach the handler for `channel` to its command topic.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicateHandler`] when the topic already has a handler,
    /// [`BridgeError::Config`] for an input channel.
    pub fn register(&mut self, channel: &ChannelSpec) -> Result<(), BridgeError> {
        let topic = channel.command_topic().ok_or_else(|| {
            BridgeError::Config(format!("input channel '{}' accepts no commands", channel.id))
        })?;
        if self.handlers.contains_key(&topic) {
            return Err(BridgeError::DuplicateHandler(topic));
        }
        debug!(channel = channel.id, %topic, "command handler registered");
        self.handlers.insert(
            topic,
            CommandHandler {
                channel: *channel,
                status_topic: channel.status_topic(),
            },
        );
        Ok(())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Handle one inbound message.
    pub fn dispatch(
        &self,
        message: &BusMessage,
        lines: &LineRegistry,
        bus: &dyn BusTransport,
        run_state: &RunState,
    ) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&message.topic) else {
            debug!(topic = %message.topic, "no handler for topic");
            return DispatchOutcome::Unrouted;
        };
        let channel = &handler.channel;

        let payload = message.payload_str().unwrap_or_default();
        let level = command_level(channel, payload);
        let state = channel.state_for_level(level);

        // The run state is checked with the banks held, so a command can never
        // land after a shutdown safe-state write.
        match lines.write_lines_if(channel.lines, level, || run_state.is_running()) {
            Ok(true) => {}
            Ok(false) => {
                warn!(channel = channel.id, "command received during shutdown; dropped");
                return DispatchOutcome::Rejected;
            }
            Err(e) => {
                warn!(channel = channel.id, error = %e, "command write failed; no acknowledgement");
                return DispatchOutcome::HardwareFault;
            }
        }

        match bus.publish(&handler.status_topic, state.as_str().as_bytes(), true) {
            Ok(()) => {
                info!(channel = channel.id, payload, %state, "command applied");
                DispatchOutcome::Acknowledged(state)
            }
            Err(e) => {
                warn!(channel = channel.id, error = %e, "acknowledgement publish failed");
                DispatchOutcome::AckFailed(state)
            }
        }
    }

    /// Drive the dispatcher from `subscription` on a background task until
    /// the subscription ends.  The task yields the number of messages seen.
    pub fn spawn(
        self,
        mut subscription: Subscription,
        lines: Arc<LineRegistry>,
        bus: Arc<dyn BusTransport>,
        run_state: RunState,
    ) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut seen = 0;
            while let Some(message) = subscription.recv().await {
                seen += 1;
                self.dispatch(&message, &lines, bus.as_ref(), &run_state);
            }
            debug!(filter = %subscription.filter(), seen, "command subscription ended");
            seen
        })
    }
}
