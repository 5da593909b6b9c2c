//! [`ChangeDetector`] – edge-triggered status publisher for input channels.
//!
//! The bus carries transitions, not a sample stream: each input is read every
//! poll cycle, but its retained status is only republished when the value
//! differs from the last one that was *successfully* published for that same
//! input.
//!
//! # Hold qualification
//!
//! A contact only counts as closed once it has read high continuously for
//! the hold time (see [`ChangeDetector::with_hold_time`]); short closures and
//! contact bounce never reach the bus.  Opening is reported on the first low
//! read.  A zero hold time reports raw levels.
//!
//! # Fault handling
//!
//! | Fault | Effect |
//! |---|---|
//! | Read fails | logged; previous state kept; nothing published |
//! | Publish fails | logged; state not advanced, so the edge is retried next cycle |

use std::time::{Duration, Instant};

use gpiobridge_hal::LineRegistry;
use gpiobridge_middleware::BusTransport;
use gpiobridge_types::{ChannelSpec, SwitchState};
use tracing::{debug, info, warn};

struct InputState {
    channel: ChannelSpec,
    status_topic: String,
    last_published: Option<bool>,
    /// Start of the current unbroken run of high reads.
    high_since: Option<Instant>,
    /// The current high run has lasted the hold time.
    held: bool,
}

/// Tracks the last published state of every input channel.
pub struct ChangeDetector {
    inputs: Vec<InputState>,
    hold_time: Duration,
}

impl ChangeDetector {
    /// Track every input channel of `channels`; outputs are ignored.
    pub fn new(channels: &[ChannelSpec]) -> Self {
        let inputs = channels
            .iter()
            .filter(|c| c.is_input())
            .map(|channel| InputState {
                channel: *channel,
                status_topic: channel.status_topic(),
                last_published: None,
                high_since: None,
                held: false,
            })
            .collect();
        Self {
            inputs,
            hold_time: Duration::ZERO,
        }
    }

    /// Require a high level to persist for `hold_time` before it is reported.
    pub fn with_hold_time(mut self, hold_time: Duration) -> Self {
        self.hold_time = hold_time;
        self
    }

    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }

    /// Startup pass: read and publish every input unconditionally so the
    /// retained value exists even before the first edge.
    ///
    /// The startup delay already covers settling, so a line that reads high
    /// here is treated as held.  Returns the number of status messages
    /// published.
    pub fn prime(&mut self, lines: &LineRegistry, bus: &dyn BusTransport) -> usize {
        let now = Instant::now();
        self.inputs
            .iter_mut()
            .map(|input| input.sample_and_publish(lines, bus, Sample::Prime, now))
            .filter(|published| *published)
            .count()
    }

    /// One poll cycle: publish only the inputs whose value changed.
    ///
    /// Returns the number of status messages published.
    pub fn poll(&mut self, lines: &LineRegistry, bus: &dyn BusTransport) -> usize {
        self.poll_at(lines, bus, Instant::now())
    }

    /// [`poll`][Self::poll] with an explicit sample time.
    pub fn poll_at(&mut self, lines: &LineRegistry, bus: &dyn BusTransport, now: Instant) -> usize {
        let hold = self.hold_time;
        self.inputs
            .iter_mut()
            .map(|input| input.sample_and_publish(lines, bus, Sample::Poll(hold), now))
            .filter(|published| *published)
            .count()
    }

    /// Last published state of input `id`, if any.
    pub fn last_published(&self, id: &str) -> Option<SwitchState> {
        self.inputs
            .iter()
            .find(|input| input.channel.id == id)
            .and_then(|input| input.last_published)
            .map(SwitchState::from)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Sample {
    /// Publish the raw level regardless of the last published value.
    Prime,
    /// Publish the hold-qualified level on change.
    Poll(Duration),
}

impl InputState {
    /// Fold one raw read into the hold tracking; returns the qualified level.
    fn qualify(&mut self, raw: bool, hold: Duration, now: Instant) -> bool {
        if !raw {
            self.high_since = None;
            self.held = false;
            return false;
        }
        let since = *self.high_since.get_or_insert(now);
        if !self.held && now.saturating_duration_since(since) >= hold {
            self.held = true;
        }
        self.held
    }

    // Returns true when a status message went out.
    fn sample_and_publish(
        &mut self,
        lines: &LineRegistry,
        bus: &dyn BusTransport,
        sample: Sample,
        now: Instant,
    ) -> bool {
        let raw = match lines.read_lines(self.channel.lines) {
            Ok(level) => level,
            Err(e) => {
                warn!(channel = self.channel.id, error = %e, "input read failed; keeping previous state");
                return false;
            }
        };

        let current = match sample {
            Sample::Prime => {
                self.high_since = raw.then_some(now);
                self.held = raw;
                raw
            }
            Sample::Poll(hold) => {
                let current = self.qualify(raw, hold, now);
                if self.last_published == Some(current) {
                    return false;
                }
                current
            }
        };

        let state = self.channel.state_for_level(current);
        match bus.publish(&self.status_topic, state.as_str().as_bytes(), true) {
            Ok(()) => {
                match sample {
                    Sample::Prime => {
                        debug!(channel = self.channel.id, %state, "initial input state published")
                    }
                    Sample::Poll(_) => info!(channel = self.channel.id, %state, "input changed"),
                }
                self.last_published = Some(current);
                true
            }
            Err(e) => {
                warn!(channel = self.channel.id, error = %e, "status publish failed; will retry");
                false
            }
        }
    }
}
