//! In-process simulated line bank for tests and hardware-less runs.
//!
//! [`SimBackend`] stores line levels in memory and records every write.  The
//! paired [`SimHandle`] lets a test (or the simulation console) flip input
//! levels, inspect the write log, and inject faults on individual pins while
//! the backend itself is owned by a [`LineRegistry`][crate::LineRegistry].
//!
//! # Example
//!
//! ```rust
//! use gpiobridge_hal::{LineBackend, SimBackend};
//!
//! let (mut bank, handle) = SimBackend::new("expander");
//! bank.write(2, true).unwrap();
//! assert_eq!(handle.writes(), vec![(2, true)]);
//!
//! handle.set_level(5, true);
//! assert!(bank.read(5).unwrap());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use gpiobridge_types::BridgeError;

use crate::line::{LineBackend, LineMode};

#[derive(Debug, Default)]
struct SimState {
    levels: HashMap<u8, bool>,
    modes: HashMap<u8, LineMode>,
    writes: Vec<(u8, bool)>,
    failing: HashSet<u8>,
    released: bool,
}

/// A simulated line bank. Unknown pins read low.
pub struct SimBackend {
    name: String,
    state: Arc<Mutex<SimState>>,
}

impl SimBackend {
    /// Create a bank and the handle observing it.
    pub fn new(name: impl Into<String>) -> (Box<Self>, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let handle = SimHandle {
            state: state.clone(),
        };
        (
            Box::new(Self {
                name: name.into(),
                state,
            }),
            handle,
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, BridgeError> {
        self.state
            .lock()
            .map_err(|_| BridgeError::hardware(&self.name, "simulation state poisoned"))
    }

    fn check(&self, state: &SimState, pin: u8) -> Result<(), BridgeError> {
        if state.released {
            return Err(BridgeError::hardware(
                format!("{}:{pin}", self.name),
                "backend released",
            ));
        }
        if state.failing.contains(&pin) {
            return Err(BridgeError::hardware(
                format!("{}:{pin}", self.name),
                "injected fault",
            ));
        }
        Ok(())
    }
}

impl LineBackend for SimBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, pin: u8, mode: LineMode) -> Result<(), BridgeError> {
        let mut state = self.lock()?;
        self.check(&state, pin)?;
        state.modes.insert(pin, mode);
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<bool, BridgeError> {
        let state = self.lock()?;
        self.check(&state, pin)?;
        Ok(state.levels.get(&pin).copied().unwrap_or(false))
    }

    fn write(&mut self, pin: u8, level: bool) -> Result<(), BridgeError> {
        let mut state = self.lock()?;
        self.check(&state, pin)?;
        state.levels.insert(pin, level);
        state.writes.push((pin, level));
        Ok(())
    }

    fn release(&mut self) -> Result<(), BridgeError> {
        let mut state = self.lock()?;
        state.released = true;
        Ok(())
    }
}

/// Observer/controller for a [`SimBackend`]. Cheap to clone.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        // A panicking test thread may poison the lock; the data is still usable.
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    /// Set the level the bank reports for `pin`.
    pub fn set_level(&self, pin: u8, level: bool) {
        self.with(|s| {
            s.levels.insert(pin, level);
        });
    }

    /// Current level of `pin` (last write or `set_level`).
    pub fn level(&self, pin: u8) -> bool {
        self.with(|s| s.levels.get(&pin).copied().unwrap_or(false))
    }

    /// Every successful write in order.
    pub fn writes(&self) -> Vec<(u8, bool)> {
        self.with(|s| s.writes.clone())
    }

    pub fn clear_writes(&self) {
        self.with(|s| s.writes.clear());
    }

    /// Mode passed to the last `configure` for `pin`.
    pub fn mode(&self, pin: u8) -> Option<LineMode> {
        self.with(|s| s.modes.get(&pin).copied())
    }

    /// Make every access to `pin` fail with a hardware fault.
    pub fn fail_pin(&self, pin: u8) {
        self.with(|s| {
            s.failing.insert(pin);
        });
    }

    pub fn heal_pin(&self, pin: u8) {
        self.with(|s| {
            s.failing.remove(&pin);
        });
    }

    pub fn is_released(&self) -> bool {
        self.with(|s| s.released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_pins_read_low() {
        let (mut bank, _handle) = SimBackend::new("gpio");
        assert!(!bank.read(17).unwrap());
    }

    #[test]
    fn handle_observes_writes_in_order() {
        let (mut bank, handle) = SimBackend::new("expander");
        bank.write(2, true).unwrap();
        bank.write(3, true).unwrap();
        bank.write(2, false).unwrap();
        assert_eq!(handle.writes(), vec![(2, true), (3, true), (2, false)]);
        assert!(!handle.level(2));
        assert!(handle.level(3));

        handle.clear_writes();
        assert!(handle.writes().is_empty());
    }

    #[test]
    fn injected_fault_blocks_reads_and_writes() {
        let (mut bank, handle) = SimBackend::new("gpio");
        handle.fail_pin(22);
        assert!(matches!(bank.read(22), Err(BridgeError::HardwareFault { .. })));
        assert!(bank.write(22, true).is_err());
        assert!(handle.writes().is_empty());

        handle.heal_pin(22);
        assert!(bank.write(22, true).is_ok());
    }

    #[test]
    fn released_bank_rejects_access() {
        let (mut bank, handle) = SimBackend::new("expander");
        bank.release().unwrap();
        assert!(handle.is_released());
        assert!(bank.write(0, false).is_err());
    }

    #[test]
    fn configure_records_mode() {
        let (mut bank, handle) = SimBackend::new("gpio");
        bank.configure(27, LineMode::Input { active_low: true }).unwrap();
        assert_eq!(handle.mode(27), Some(LineMode::Input { active_low: true }));
        assert_eq!(handle.mode(28), None);
    }
}
