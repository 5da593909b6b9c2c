//! [`SysfsGpio`] – Linux sysfs GPIO driver.
//!
//! Talks to the legacy `/sys/class/gpio` interface:
//!
//! | File | Use |
//! |---|---|
//! | `export` / `unexport` | claim and release a line number |
//! | `gpioN/direction` | `in` or `out` |
//! | `gpioN/active_low` | `1` inverts the reported and driven level |
//! | `gpioN/value` | `0` or `1` |
//!
//! A port expander handled by a kernel driver (e.g. `mcp23s08` for the
//! MCP23S17) shows up as a gpiochip with its own base number.  Construct a
//! second `SysfsGpio` with [`SysfsGpio::with_base`] to address expander pin
//! `n` as global line `base + n`.
//!
//! sysfs cannot set a line's bias.  Inputs rely on external pull-up
//! resistors, or on a bias configured in the device tree.

use std::fs;
use std::path::{Path, PathBuf};

use gpiobridge_types::BridgeError;
use tracing::{debug, warn};

use crate::line::{LineBackend, LineMode};

/// Default sysfs GPIO root.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

pub struct SysfsGpio {
    name: String,
    root: PathBuf,
    base: u32,
    /// Lines this driver exported itself and must unexport on release.
    exported: Vec<u32>,
}

impl SysfsGpio {
    /// Driver for native pins (line number = pin number).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_base(root, 0)
    }

    /// Driver for a gpiochip whose first line is `base`.
    pub fn with_base(root: impl Into<PathBuf>, base: u32) -> Self {
        let root = root.into();
        Self {
            name: format!("sysfs:{}+{base}", root.display()),
            root,
            base,
            exported: Vec::new(),
        }
    }

    fn line(&self, pin: u8) -> u32 {
        self.base + u32::from(pin)
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    fn fault(&self, pin: u8, details: String) -> BridgeError {
        BridgeError::hardware(format!("{}/{pin}", self.name), details)
    }

    fn write_attr(&self, pin: u8, path: &Path, value: &str) -> Result<(), BridgeError> {
        fs::write(path, value)
            .map_err(|e| self.fault(pin, format!("write {}: {e}", path.display())))
    }
}

impl LineBackend for SysfsGpio {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, pin: u8, mode: LineMode) -> Result<(), BridgeError> {
        let line = self.line(pin);
        let dir = self.line_dir(line);
        if !dir.exists() {
            self.write_attr(pin, &self.root.join("export"), &line.to_string())?;
            if !dir.exists() {
                return Err(self.fault(pin, format!("gpio{line} did not appear after export")));
            }
            self.exported.push(line);
            debug!(backend = %self.name, line, "exported line");
        }

        match mode {
            // Bias stays whatever the board provides.
            LineMode::Input { active_low } => {
                self.write_attr(pin, &dir.join("direction"), "in")?;
                self.write_attr(pin, &dir.join("active_low"), if active_low { "1" } else { "0" })?;
            }
            LineMode::Output => {
                self.write_attr(pin, &dir.join("active_low"), "0")?;
                self.write_attr(pin, &dir.join("direction"), "out")?;
            }
        }
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<bool, BridgeError> {
        let path = self.line_dir(self.line(pin)).join("value");
        let raw = fs::read_to_string(&path)
            .map_err(|e| self.fault(pin, format!("read {}: {e}", path.display())))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(self.fault(pin, format!("unexpected value '{other}'"))),
        }
    }

    fn write(&mut self, pin: u8, level: bool) -> Result<(), BridgeError> {
        let path = self.line_dir(self.line(pin)).join("value");
        self.write_attr(pin, &path, if level { "1" } else { "0" })
    }

    fn release(&mut self) -> Result<(), BridgeError> {
        let unexport = self.root.join("unexport");
        let mut failed = Vec::new();
        for line in self.exported.drain(..) {
            if let Err(e) = fs::write(&unexport, line.to_string()) {
                warn!(backend = %self.name, line, error = %e, "unexport failed");
                failed.push(line);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::hardware(
                self.name.clone(),
                format!("could not unexport lines {failed:?}"),
            ))
        }
    }
}
