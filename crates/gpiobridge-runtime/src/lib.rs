//! `gpiobridge-runtime` – the synchronization engine
//!
//! Keeps a fixed set of digital lines and a publish/subscribe bus in step:
//! input edges become retained status messages, command messages become
//! output writes.
//!
//! # Modules
//!
//! - [`bridge`] – [`Bridge`]: the context object holding run state, bus
//!   connection, line registry and channel table; runs startup, the poll
//!   loop, and shutdown.
//! - [`channels`] – [`CHANNELS`][channels::CHANNELS]: the static channel
//!   table.
//! - [`input_loop`] – [`ChangeDetector`]: publishes input status on change
//!   only.
//! - [`dispatcher`] – [`CommandDispatcher`]: maps command topics to output
//!   writes and acknowledgements.
//! - [`shutdown`] – [`ShutdownSequencer`]: safe states, release, unsubscribe,
//!   disconnect.
//! - [`termination`] – [`RunState`] and the signal-driven
//!   [`TerminationController`].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing].

pub mod bridge;
pub mod channels;
pub mod dispatcher;
pub mod input_loop;
pub mod shutdown;
pub mod telemetry;
pub mod termination;

pub use bridge::{Bridge, BridgeConfig};
pub use dispatcher::{CommandDispatcher, DispatchOutcome, command_level};
pub use input_loop::ChangeDetector;
pub use shutdown::{ShutdownReport, ShutdownSequencer, ShutdownStep};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
pub use termination::{Phase, RunState, TerminationController};
