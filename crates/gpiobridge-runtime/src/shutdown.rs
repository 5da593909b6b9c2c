//! [`ShutdownSequencer`] – best-effort teardown once termination begins.
//!
//! Steps run in a fixed order and a failing step never aborts the ones after
//! it:
//!
//! 1. drive every output channel to its safe level;
//! 2. release every line backend;
//! 3. unsubscribe every filter the bridge subscribed to;
//! 4. disconnect from the bus.
//!
//! The run state becomes [`Phase::Stopped`][crate::termination::Phase::Stopped]
//! after step 4 regardless of failures.

use gpiobridge_hal::LineRegistry;
use gpiobridge_middleware::BusTransport;
use gpiobridge_types::{BridgeError, ChannelSpec};
use tracing::{info, warn};

use crate::termination::RunState;

/// The step of the sequence a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownStep {
    SafeState { channel: &'static str },
    Release,
    Unsubscribe { filter: String },
    Disconnect,
}

/// Failures collected while shutting down.  Empty means a clean shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub failures: Vec<(ShutdownStep, BridgeError)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: ShutdownStep, error: BridgeError) {
        warn!(?step, error = %error, "shutdown step failed");
        self.failures.push((step, error));
    }
}

pub struct ShutdownSequencer<'a> {
    channels: &'a [ChannelSpec],
    lines: &'a LineRegistry,
    bus: &'a dyn BusTransport,
    filters: &'a [String],
}

impl<'a> ShutdownSequencer<'a> {
    pub fn new(
        channels: &'a [ChannelSpec],
        lines: &'a LineRegistry,
        bus: &'a dyn BusTransport,
        filters: &'a [String],
    ) -> Self {
        Self {
            channels,
            lines,
            bus,
            filters,
        }
    }

    /// Run all four steps and mark `run_state` stopped.
    pub fn run(&self, run_state: &RunState) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        info!("setting all outputs to safe state");
        for channel in self.channels.iter().filter(|c| c.is_output()) {
            if let Err(e) = self.lines.write_lines(channel.lines, channel.safe_level) {
                report.record(ShutdownStep::SafeState { channel: channel.id }, e);
            }
        }

        info!("releasing line backends");
        for e in self.lines.release_all() {
            report.record(ShutdownStep::Release, e);
        }

        for filter in self.filters {
            info!(%filter, "unsubscribing");
            if let Err(e) = self.bus.unsubscribe(filter) {
                report.record(
                    ShutdownStep::Unsubscribe {
                        filter: filter.clone(),
                    },
                    e,
                );
            }
        }

        info!("disconnecting from bus");
        if let Err(e) = self.bus.disconnect() {
            report.record(ShutdownStep::Disconnect, e);
        }

        run_state.mark_stopped();
        info!(failures = report.failures.len(), "shutdown complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpiobridge_hal::{SimBackend, SimHandle};
    use gpiobridge_middleware::LocalBus;
    use gpiobridge_types::{Bank, COMMAND_FILTER};

    use crate::channels::CHANNELS;
    use crate::termination::Phase;

    fn setup() -> (LineRegistry, SimHandle, SimHandle, LocalBus) {
        let (gpio, gpio_handle) = SimBackend::new("gpio");
        let (expander, expander_handle) = SimBackend::new("expander");
        let lines = LineRegistry::new()
            .with_backend(Bank::Gpio, gpio)
            .with_backend(Bank::Expander, expander);
        (lines, gpio_handle, expander_handle, LocalBus::connect("test"))
    }

    #[test]
    fn clean_shutdown_writes_safe_levels_and_tears_down() {
        let (lines, gpio, expander, bus) = setup();
        for pin in 0..4 {
            expander.set_level(pin, true);
        }
        gpio.set_level(23, true);
        gpio.set_level(24, true);
        let _commands = bus.subscribe(COMMAND_FILTER).unwrap();
        let filters = vec![COMMAND_FILTER.to_string()];
        let run_state = RunState::new();
        run_state.request_stop();

        let report = ShutdownSequencer::new(&CHANNELS, &lines, &bus, &filters).run(&run_state);

        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(gpio.writes(), vec![(24, false), (23, false)]);
        assert_eq!(
            expander.writes(),
            vec![(2, false), (3, false), (1, false), (0, false)]
        );
        assert!(gpio.is_released());
        assert!(expander.is_released());
        assert!(bus.subscribed_filters().is_empty());
        assert!(!bus.is_connected());
        assert_eq!(run_state.phase(), Phase::Stopped);
    }

    #[test]
    fn failed_safe_state_write_does_not_abort_sequence() {
        let (lines, gpio, expander, bus) = setup();
        expander.fail_pin(1);
        let filters = vec![COMMAND_FILTER.to_string()];
        let _commands = bus.subscribe(COMMAND_FILTER).unwrap();
        let run_state = RunState::new();

        let report = ShutdownSequencer::new(&CHANNELS, &lines, &bus, &filters).run(&run_state);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].0,
            ShutdownStep::SafeState {
                channel: "viessmann-onoff"
            }
        );
        // The channel after the failing one is still driven.
        assert!(expander.writes().contains(&(0, false)));
        assert_eq!(gpio.writes().len(), 2);
        assert!(expander.is_released());
        assert!(!bus.is_connected());
        assert_eq!(run_state.phase(), Phase::Stopped);
    }

    #[test]
    fn transport_failures_are_reported_not_fatal() {
        let (lines, _gpio, expander, bus) = setup();
        bus.disconnect().unwrap();
        let filters = vec![COMMAND_FILTER.to_string()];
        let run_state = RunState::new();

        let report = ShutdownSequencer::new(&CHANNELS, &lines, &bus, &filters).run(&run_state);

        let steps: Vec<&ShutdownStep> = report.failures.iter().map(|(s, _)| s).collect();
        assert_eq!(
            steps,
            vec![
                &ShutdownStep::Unsubscribe {
                    filter: COMMAND_FILTER.to_string()
                },
                &ShutdownStep::Disconnect,
            ]
        );
        assert_eq!(expander.writes().len(), 4);
        assert_eq!(run_state.phase(), Phase::Stopped);
    }
}
