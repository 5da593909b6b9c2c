//! Generic `LineBackend` trait for banks of discrete digital lines (SoC GPIO
//! pins, port-expander relay outputs, …).

use gpiobridge_types::BridgeError;

/// How a pin is set up before first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// Sampled line. `active_low` inverts the reported level so that a closed
    /// pull-up contact reads as `true`.
    ///
    /// No bias is requested. The sysfs interface has no pull-up control, so
    /// on [`SysfsGpio`][crate::sysfs::SysfsGpio] each input needs an
    /// external pull-up resistor (or a bias set in the device tree) or it
    /// floats and reads noise.
    Input { active_low: bool },
    /// Driven line.
    Output,
}

/// A bank of digital lines addressed by pin number.
///
/// Drivers implement this trait and register themselves with a
/// [`LineRegistry`][crate::registry::LineRegistry] under a
/// [`Bank`][gpiobridge_types::Bank].
pub trait LineBackend: Send {
    /// Stable name for log output, e.g. `"sysfs:/sys/class/gpio"`.
    fn name(&self) -> &str;

    /// Prepare `pin` for use in `mode`. Backends that need no setup keep the
    /// default no-op.
    fn configure(&mut self, _pin: u8, _mode: LineMode) -> Result<(), BridgeError> {
        Ok(())
    }

    /// Read the logical level of `pin`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HardwareFault`] if the line cannot be reached.
    fn read(&mut self, pin: u8) -> Result<bool, BridgeError>;

    /// Drive `pin` to `level`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HardwareFault`] if the command cannot be applied.
    fn write(&mut self, pin: u8, level: bool) -> Result<(), BridgeError>;

    /// Give every configured pin back to the system.
    fn release(&mut self) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockBank {
        name: String,
        levels: [bool; 8],
    }

    impl MockBank {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                levels: [false; 8],
            }
        }
    }

    impl LineBackend for MockBank {
        fn name(&self) -> &str {
            &self.name
        }

        fn read(&mut self, pin: u8) -> Result<bool, BridgeError> {
            self.levels
                .get(pin as usize)
                .copied()
                .ok_or_else(|| BridgeError::hardware(&self.name, format!("no pin {pin}")))
        }

        fn write(&mut self, pin: u8, level: bool) -> Result<(), BridgeError> {
            match self.levels.get_mut(pin as usize) {
                Some(slot) => {
                    *slot = level;
                    Ok(())
                }
                None => Err(BridgeError::hardware(&self.name, format!("no pin {pin}"))),
            }
        }

        fn release(&mut self) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    #[test]
    fn mock_bank_toggle() {
        let mut bank = MockBank::new("relays");
        assert_eq!(bank.name(), "relays");
        assert!(bank.configure(3, LineMode::Output).is_ok());
        assert!(!bank.read(3).unwrap());

        bank.write(3, true).unwrap();
        assert!(bank.read(3).unwrap());

        bank.write(3, false).unwrap();
        assert!(!bank.read(3).unwrap());
    }

    #[test]
    fn out_of_range_pin_is_a_hardware_fault() {
        let mut bank = MockBank::new("relays");
        assert!(matches!(
            bank.write(42, true),
            Err(BridgeError::HardwareFault { .. })
        ));
    }
}
