//! `gpiobridge-hal` – Hardware Line Abstraction
//!
//! A uniform read/write interface over heterogeneous digital-line backends.
//!
//! # Modules
//!
//! - [`line`] – the [`LineBackend`] trait every pin driver implements.
//! - [`registry`] – [`LineRegistry`]: routes [`LineId`][gpiobridge_types::LineId]s
//!   to the backend of their bank and serializes access per backend.
//! - [`sysfs`] – [`SysfsGpio`]: Linux `/sys/class/gpio` driver, used for the
//!   native pins and for a kernel-managed port expander.
//! - [`sim`] – [`SimBackend`]: in-process backend for tests and simulation.

pub mod line;
pub mod registry;
pub mod sim;
pub mod sysfs;

pub use line::{LineBackend, LineMode};
pub use registry::LineRegistry;
pub use sim::{SimBackend, SimHandle};
pub use sysfs::SysfsGpio;
