//! [`Bridge`] – the GPIO ⇄ bus synchronization engine.
//!
//! Owns everything the engine needs (channel table, line registry, bus
//! connection, run state) and wires the pieces together:
//!
//! 1. **Start** – configure every line, subscribe `gpio/write/#` once,
//!    register one command handler per output and spawn the dispatcher task,
//!    wait for the lines to settle, then publish one retained status per
//!    channel.
//! 2. **Poll** – while the run state is `Running`, run one
//!    [`ChangeDetector::poll`] per `poll_interval`.
//! 3. **Shut down** – [`ShutdownSequencer`], then wait for the dispatcher
//!    task to drain.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gpiobridge_hal::{LineRegistry, SimBackend};
//! use gpiobridge_middleware::{BusTransport, LocalBus};
//! use gpiobridge_runtime::{Bridge, BridgeConfig, channels::CHANNELS};
//! use gpiobridge_types::Bank;
//!
//! # async fn demo() {
//! let (gpio, _) = SimBackend::new("gpio");
//! let (expander, _) = SimBackend::new("expander");
//! let lines = LineRegistry::new()
//!     .with_backend(Bank::Gpio, gpio)
//!     .with_backend(Bank::Expander, expander);
//! let bus: Arc<dyn BusTransport> = Arc::new(LocalBus::connect("gpio"));
//!
//! let bridge = Bridge::new(&CHANNELS, Arc::new(lines), bus, BridgeConfig::default());
//! let report = bridge.run().await;
//! assert!(report.is_clean());
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use gpiobridge_hal::{LineMode, LineRegistry};
use gpiobridge_middleware::BusTransport;
use gpiobridge_types::{BridgeError, COMMAND_FILTER, ChannelSpec, Direction};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatcher::CommandDispatcher;
use crate::input_loop::ChangeDetector;
use crate::shutdown::{ShutdownReport, ShutdownSequencer};
use crate::termination::RunState;

/// How long shutdown waits for the dispatcher task after disconnecting.
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Delay between two input polls.
    pub poll_interval: Duration,
    /// Settle time between line configuration and the initial read.
    pub startup_delay: Duration,
    /// How long an input must stay high before it is reported as enabled.
    pub input_hold: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            startup_delay: Duration::from_secs(1),
            input_hold: Duration::from_secs(1),
        }
    }
}

pub struct Bridge {
    channels: &'static [ChannelSpec],
    lines: Arc<LineRegistry>,
    bus: Arc<dyn BusTransport>,
    run_state: RunState,
    config: BridgeConfig,
    detector: ChangeDetector,
    filters: Vec<String>,
    dispatcher_task: Option<JoinHandle<usize>>,
}

impl Bridge {
    pub fn new(
        channels: &'static [ChannelSpec],
        lines: Arc<LineRegistry>,
        bus: Arc<dyn BusTransport>,
        config: BridgeConfig,
    ) -> Self {
        let detector = ChangeDetector::new(channels).with_hold_time(config.input_hold);
        Self {
            channels,
            lines,
            bus,
            run_state: RunState::new(),
            config,
            detector,
            filters: Vec::new(),
            dispatcher_task: None,
        }
    }

    /// Handle to the run state; hand it to the
    /// [`TerminationController`][crate::termination::TerminationController].
    pub fn run_state(&self) -> RunState {
        self.run_state.clone()
    }

    /// Bring the bridge up.  Returns the number of startup status messages.
    ///
    /// # Errors
    ///
    /// Fails when the command subscription cannot be established or a
    /// handler cannot be registered.  Line configuration faults are logged
    /// and do not fail startup.
    pub async fn start(&mut self) -> Result<usize, BridgeError> {
        self.configure_lines();

        let dispatcher = CommandDispatcher::for_outputs(self.channels)?;
        let subscription = self.bus.subscribe(COMMAND_FILTER)?;
        self.filters.push(COMMAND_FILTER.to_string());
        info!(
            filter = COMMAND_FILTER,
            handlers = dispatcher.handler_count(),
            "command handlers attached"
        );
        self.dispatcher_task = Some(dispatcher.spawn(
            subscription,
            self.lines.clone(),
            self.bus.clone(),
            self.run_state.clone(),
        ));

        if !self.config.startup_delay.is_zero() {
            tokio::time::sleep(self.config.startup_delay).await;
        }

        let published = self.detector.prime(&self.lines, self.bus.as_ref())
            + self.publish_output_states();
        info!(published, channels = self.channels.len(), "initial states published");
        Ok(published)
    }

    /// One iteration of the change-detection loop.
    pub fn step(&mut self) -> usize {
        self.detector.poll(&self.lines, self.bus.as_ref())
    }

    /// Start, poll until termination is requested, then shut down.
    pub async fn run(mut self) -> ShutdownReport {
        match self.start().await {
            Ok(_) => {
                let period = self.config.poll_interval.max(Duration::from_millis(1));
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!(poll_interval_ms = period.as_millis() as u64, "polling inputs");
                while self.run_state.is_running() {
                    self.step();
                    ticker.tick().await;
                }
            }
            Err(e) => {
                error!(error = %e, "bridge startup failed");
            }
        }
        self.shutdown().await
    }

    /// Run the shutdown sequence and wait for the dispatcher task.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.run_state.request_stop();
        let report = ShutdownSequencer::new(
            self.channels,
            &self.lines,
            self.bus.as_ref(),
            &self.filters,
        )
        .run(&self.run_state);
        self.filters.clear();

        if let Some(mut task) = self.dispatcher_task.take() {
            match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, &mut task).await {
                Ok(Ok(seen)) => debug!(seen, "dispatcher stopped"),
                Ok(Err(e)) => warn!(error = %e, "dispatcher task failed"),
                Err(_) => {
                    warn!("dispatcher did not stop after disconnect; aborting");
                    task.abort();
                }
            }
        }
        report
    }

    fn configure_lines(&self) {
        for channel in self.channels {
            let mode = match channel.direction {
                Direction::Input => LineMode::Input {
                    active_low: channel.active_low,
                },
                Direction::Output => LineMode::Output,
            };
            for line in channel.lines {
                if let Err(e) = self.lines.configure_line(*line, mode) {
                    warn!(channel = channel.id, %line, error = %e, "line configuration failed");
                }
            }
        }
    }

    // Outputs keep their current level across a restart; report it.
    fn publish_output_states(&self) -> usize {
        let mut published = 0;
        for channel in self.channels.iter().filter(|c| c.is_output()) {
            let level = match self.lines.read_lines(channel.lines) {
                Ok(level) => level,
                Err(e) => {
                    warn!(channel = channel.id, error = %e, "output read-back failed");
                    continue;
                }
            };
            let state = channel.state_for_level(level);
            match self
                .bus
                .publish(&channel.status_topic(), state.as_str().as_bytes(), true)
            {
                Ok(()) => published += 1,
                Err(e) => warn!(channel = channel.id, error = %e, "status publish failed"),
            }
        }
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpiobridge_hal::{SimBackend, SimHandle};
    use gpiobridge_middleware::{LocalBus, Subscription};
    use gpiobridge_types::Bank;

    use crate::channels::CHANNELS;
    use crate::termination::Phase;

    struct Rig {
        bridge: Bridge,
        gpio: SimHandle,
        expander: SimHandle,
        bus: LocalBus,
        status: Subscription,
    }

    fn rig(poll_interval: Duration) -> Rig {
        let (gpio_backend, gpio) = SimBackend::new("gpio");
        let (expander_backend, expander) = SimBackend::new("expander");
        let lines = LineRegistry::new()
            .with_backend(Bank::Gpio, gpio_backend)
            .with_backend(Bank::Expander, expander_backend);
        let bus = LocalBus::connect("gpio");
        let status = bus.subscribe("status/#").expect("subscribe");
        let shared: Arc<dyn BusTransport> = Arc::new(bus.clone());
        let config = BridgeConfig {
            poll_interval,
            startup_delay: Duration::ZERO,
            input_hold: Duration::ZERO,
        };
        Rig {
            bridge: Bridge::new(&CHANNELS, Arc::new(lines), shared, config),
            gpio,
            expander,
            bus,
            status,
        }
    }

    fn payloads(sub: &mut Subscription) -> Vec<(String, String)> {
        sub.drain()
            .into_iter()
            .map(|m| (m.topic.clone(), m.payload_str().unwrap_or_default().to_string()))
            .collect()
    }

    async fn next_status(sub: &mut Subscription) -> (String, String) {
        let msg = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("status within 1s")
            .expect("subscription open");
        (msg.topic.clone(), msg.payload_str().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn startup_publishes_one_status_per_channel() {
        let mut rig = rig(Duration::from_millis(5));
        rig.expander.set_level(1, true);

        let published = rig.bridge.start().await.unwrap();

        assert_eq!(published, CHANNELS.len());
        let got = payloads(&mut rig.status);
        assert_eq!(got.len(), CHANNELS.len());
        for channel in &CHANNELS {
            let topic = format!("status/{}", channel.id);
            assert_eq!(got.iter().filter(|(t, _)| *t == topic).count(), 1, "{topic}");
        }
        assert!(got.contains(&(
            "status/viessmann-onoff".to_string(),
            "disabled".to_string()
        )));
        assert_eq!(
            rig.bus.subscribed_filters(),
            vec!["gpio/write/#".to_string(), "status/#".to_string()]
        );
        assert_eq!(
            rig.gpio.mode(27),
            Some(LineMode::Input { active_low: true })
        );
        assert_eq!(rig.expander.mode(2), Some(LineMode::Output));

        rig.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn control_switch_scenario() {
        let mut rig = rig(Duration::from_millis(5));
        rig.bridge.start().await.unwrap();
        assert_eq!(
            rig.bus.retained_snapshot().get("status/viessmann-control").map(String::as_str),
            Some("disabled")
        );
        rig.status.drain();

        rig.gpio.set_level(27, true);
        assert_eq!(rig.bridge.step(), 1);
        assert_eq!(rig.bridge.step(), 0);
        assert_eq!(rig.bridge.step(), 0);
        assert_eq!(
            payloads(&mut rig.status),
            vec![("status/viessmann-control".to_string(), "enabled".to_string())]
        );

        rig.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn inbound_command_is_written_and_acknowledged() {
        let mut rig = rig(Duration::from_millis(5));
        rig.bridge.start().await.unwrap();
        rig.status.drain();

        rig.bus
            .publish("gpio/write/viessmann-onoff", b"disabled", false)
            .unwrap();

        assert_eq!(
            next_status(&mut rig.status).await,
            ("status/viessmann-onoff".to_string(), "disabled".to_string())
        );
        assert_eq!(rig.expander.writes(), vec![(1, true)]);

        rig.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn termination_mid_loop_runs_shutdown_sequence() {
        let rig = rig(Duration::from_millis(5));
        let Rig {
            bridge,
            gpio,
            expander,
            bus,
            mut status,
        } = rig;
        let run_state = bridge.run_state();
        let running = tokio::spawn(bridge.run());

        // Wait until startup is done (inputs and outputs announced).
        for _ in 0..CHANNELS.len() {
            next_status(&mut status).await;
        }
        bus.publish("gpio/write/viessmann-modbus", b"enabled", false)
            .unwrap();
        assert_eq!(
            next_status(&mut status).await,
            ("status/viessmann-modbus".to_string(), "enabled".to_string())
        );

        expander.fail_pin(0);
        expander.clear_writes();
        gpio.clear_writes();
        assert!(run_state.request_stop());

        let report = running.await.unwrap();

        assert_eq!(report.failures.len(), 1, "{:?}", report.failures);
        assert_eq!(expander.writes(), vec![(2, false), (3, false), (1, false)]);
        assert_eq!(gpio.writes(), vec![(24, false), (23, false)]);
        assert!(gpio.is_released());
        assert!(expander.is_released());
        assert!(!bus.is_connected());
        assert!(bus.subscribed_filters().is_empty());
        assert_eq!(run_state.phase(), Phase::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_runs_shutdown_sequence() {
        use crate::termination::TerminationController;

        let Rig {
            bridge,
            gpio,
            expander,
            bus,
            mut status,
        } = rig(Duration::from_millis(5));
        let run_state = bridge.run_state();
        let controller = TerminationController::install(run_state.clone()).expect("install handlers");
        let running = tokio::spawn(bridge.run());

        for _ in 0..CHANNELS.len() {
            next_status(&mut status).await;
        }
        gpio.clear_writes();
        expander.clear_writes();

        let killed = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .expect("run kill");
        assert!(killed.success());

        let report = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("bridge stops after SIGTERM")
            .unwrap();

        assert!(controller.is_signaled());
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(
            expander.writes(),
            vec![(2, false), (3, false), (1, false), (0, false)]
        );
        assert_eq!(gpio.writes(), vec![(24, false), (23, false)]);
        assert!(bus.subscribed_filters().is_empty());
        assert!(!bus.is_connected());
        assert_eq!(run_state.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn failed_startup_still_shuts_down() {
        let rig = rig(Duration::from_millis(5));
        rig.bus.disconnect().unwrap();
        let run_state = rig.bridge.run_state();

        let report = rig.bridge.run().await;

        assert!(!report.is_clean());
        assert_eq!(rig.expander.writes().len(), 4);
        assert_eq!(run_state.phase(), Phase::Stopped);
    }
}
