//! [`LineRegistry`] – central backend registry and line router.
//!
//! The registry owns one [`LineBackend`] per [`Bank`].  Every
//! [`LineId`] is resolved to the backend of its bank and the call is
//! forwarded with the bank-local pin number.
//!
//! # Concurrency
//!
//! Each backend sits behind its own mutex, so the poll loop and the command
//! dispatcher can share one `Arc<LineRegistry>`.  A multi-line write locks
//! every bank it touches (in [`Bank`] order, which rules out lock-order
//! inversion) before the first write and holds them until the last, making
//! the channel write atomic with respect to any other registry call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use gpiobridge_types::{Bank, BridgeError, LineId};
use tracing::warn;

use crate::line::{LineBackend, LineMode};

type Slot = Mutex<Box<dyn LineBackend>>;

/// Routes line operations to the backend registered for each [`Bank`].
#[derive(Default)]
pub struct LineRegistry {
    backends: HashMap<Bank, Slot>,
}

impl LineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend for `bank`.  Any previously registered backend
    /// for the same bank is replaced.
    pub fn register_backend(&mut self, bank: Bank, backend: Box<dyn LineBackend>) {
        self.backends.insert(bank, Mutex::new(backend));
    }

    /// Builder-style [`register_backend`][Self::register_backend].
    pub fn with_backend(mut self, bank: Bank, backend: Box<dyn LineBackend>) -> Self {
        self.register_backend(bank, backend);
        self
    }

    pub fn configure_line(&self, line: LineId, mode: LineMode) -> Result<(), BridgeError> {
        self.lock(line.bank)?.configure(line.pin, mode)
    }

    /// Read the logical level of a single line.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HardwareFault`] when the bank has no backend or
    /// the backend read fails.
    pub fn read_line(&self, line: LineId) -> Result<bool, BridgeError> {
        self.lock(line.bank)?.read(line.pin)
    }

    /// Read a group of lines as one logical value: `true` only when every
    /// line is high.  An empty group reads `false`.
    pub fn read_lines(&self, lines: &[LineId]) -> Result<bool, BridgeError> {
        if lines.is_empty() {
            return Ok(false);
        }
        let mut guards = self.lock_banks(lines)?;
        let mut all_high = true;
        for line in lines {
            if let Some(backend) = guards.get_mut(&line.bank) {
                all_high &= backend.read(line.pin)?;
            }
        }
        Ok(all_high)
    }

    /// Drive every line in `lines` to `level`, in order, as one atomic step.
    ///
    /// Stops at the first failing line; lines before it keep the new level.
    pub fn write_lines(&self, lines: &[LineId], level: bool) -> Result<(), BridgeError> {
        self.write_lines_if(lines, level, || true).map(|_| ())
    }

    /// Like [`write_lines`][Self::write_lines], but evaluates `allow` after
    /// the banks are locked and writes only if it returns `true`.
    ///
    /// Any other registry call on the same banks is ordered entirely before or
    /// entirely after the check-and-write.  Returns whether the write ran.
    pub fn write_lines_if(
        &self,
        lines: &[LineId],
        level: bool,
        allow: impl FnOnce() -> bool,
    ) -> Result<bool, BridgeError> {
        let mut guards = self.lock_banks(lines)?;
        if !allow() {
            return Ok(false);
        }
        for line in lines {
            if let Some(backend) = guards.get_mut(&line.bank) {
                backend.write(line.pin, level)?;
            }
        }
        Ok(true)
    }

    /// Release every backend, continuing past failures.
    ///
    /// Returns every error encountered; an empty vector means a clean release.
    pub fn release_all(&self) -> Vec<BridgeError> {
        let mut errors = Vec::new();
        let mut banks: Vec<Bank> = self.backends.keys().copied().collect();
        banks.sort();
        for bank in banks {
            let result = self.lock(bank).and_then(|mut backend| backend.release());
            if let Err(e) = result {
                warn!(%bank, error = %e, "backend release failed");
                errors.push(e);
            }
        }
        errors
    }

    // Internal helper: look up and lock the backend of one bank.
    fn lock(&self, bank: Bank) -> Result<MutexGuard<'_, Box<dyn LineBackend>>, BridgeError> {
        let slot = self
            .backends
            .get(&bank)
            .ok_or_else(|| BridgeError::hardware(bank.to_string(), "no backend registered"))?;
        slot.lock()
            .map_err(|_| BridgeError::hardware(bank.to_string(), "backend lock poisoned"))
    }

    // Internal helper: lock every distinct bank of `lines` in bank order.
    fn lock_banks(
        &self,
        lines: &[LineId],
    ) -> Result<BTreeMap<Bank, MutexGuard<'_, Box<dyn LineBackend>>>, BridgeError> {
        let mut banks: Vec<Bank> = lines.iter().map(|l| l.bank).collect();
        banks.sort();
        banks.dedup();
        let mut guards = BTreeMap::new();
        for bank in banks {
            guards.insert(bank, self.lock(bank)?);
        }
        Ok(guards)
    }
}
