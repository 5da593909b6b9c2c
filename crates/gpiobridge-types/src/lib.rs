use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of every retained status topic, e.g. `status/viessmann-onoff`.
pub const STATUS_PREFIX: &str = "status/";

/// Prefix of every command topic, e.g. `gpio/write/viessmann-onoff`.
pub const COMMAND_PREFIX: &str = "gpio/write/";

/// The single wildcard filter the bridge subscribes to at startup.
pub const COMMAND_FILTER: &str = "gpio/write/#";

/// Status topic for the channel `id`.
pub fn status_topic(id: &str) -> String {
    format!("{STATUS_PREFIX}{id}")
}

/// Command topic for the channel `id`.
pub fn command_topic(id: &str) -> String {
    format!("{COMMAND_PREFIX}{id}")
}

/// Hardware bank a physical line lives on.
///
/// The declaration order is also the lock order used for multi-bank writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bank {
    /// Native SoC GPIO pins.
    Gpio,
    /// Pins of the SPI port expander driving the relay board.
    Expander,
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bank::Gpio => write!(f, "gpio"),
            Bank::Expander => write!(f, "expander"),
        }
    }
}

/// One physical pin on one bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineId {
    pub bank: Bank,
    pub pin: u8,
}

impl LineId {
    pub const fn gpio(pin: u8) -> Self {
        Self { bank: Bank::Gpio, pin }
    }

    pub const fn expander(pin: u8) -> Self {
        Self {
            bank: Bank::Expander,
            pin,
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bank, self.pin)
    }
}

/// Parses the `bank:pin` form produced by `Display`, e.g. `expander:1`.
impl std::str::FromStr for LineId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BridgeError::Config(format!("invalid line '{s}', expected bank:pin"));
        let (bank, pin) = s.trim().split_once(':').ok_or_else(invalid)?;
        let pin = pin.parse::<u8>().map_err(|_| invalid())?;
        match bank {
            "gpio" => Ok(LineId::gpio(pin)),
            "expander" => Ok(LineId::expander(pin)),
            _ => Err(invalid()),
        }
    }
}

/// Whether a channel is sampled or driven by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// A named logical unit bound to one or more physical lines.
///
/// Channel tables are `'static` and built once; see
/// `gpiobridge_runtime::channels::CHANNELS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Stable identifier, e.g. `"viessmann-monitoring"`.
    pub id: &'static str,
    pub direction: Direction,
    /// Lines driven or sampled by this channel, in write order.
    pub lines: &'static [LineId],
    /// `true` when the logical "enabled" state corresponds to a low line.
    pub invert_logic: bool,
    /// Input only: the contact pulls the line low when closed.
    pub active_low: bool,
    /// Output only: physical level applied by the shutdown sequence.
    pub safe_level: bool,
}

impl ChannelSpec {
    pub const fn input(id: &'static str, lines: &'static [LineId]) -> Self {
        Self {
            id,
            direction: Direction::Input,
            lines,
            invert_logic: false,
            active_low: true,
            safe_level: false,
        }
    }

    pub const fn output(id: &'static str, lines: &'static [LineId], safe_level: bool) -> Self {
        Self {
            id,
            direction: Direction::Output,
            lines,
            invert_logic: false,
            active_low: false,
            safe_level,
        }
    }

    pub const fn inverted(mut self) -> Self {
        self.invert_logic = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    pub fn status_topic(&self) -> String {
        status_topic(self.id)
    }

    /// `None` for input channels, which accept no commands.
    pub fn command_topic(&self) -> Option<String> {
        self.is_output().then(|| command_topic(self.id))
    }

    /// Logical state reported for a given physical line level.
    pub fn state_for_level(&self, level: bool) -> SwitchState {
        SwitchState::from(level != self.invert_logic)
    }
}

/// Logical state carried on status topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    Enabled,
    Disabled,
}

impl SwitchState {
    /// Wire payload, bit-exact.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::Enabled => "enabled",
            SwitchState::Disabled => "disabled",
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, SwitchState::Enabled)
    }
}

impl From<bool> for SwitchState {
    fn from(enabled: bool) -> Self {
        if enabled {
            SwitchState::Enabled
        } else {
            SwitchState::Disabled
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type shared by every gpio-bridge crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Transport Fault: {0}")]
    Transport(String),

    #[error("Invalid topic filter '{0}'")]
    InvalidTopicFilter(String),

    #[error("A handler is already registered for '{0}'")]
    DuplicateHandler(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        BridgeError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_id_parses_its_display_form() {
        for line in [LineId::gpio(27), LineId::expander(1)] {
            assert_eq!(line.to_string().parse::<LineId>(), Ok(line));
        }
        assert!("spi:1".parse::<LineId>().is_err());
        assert!("gpio:300".parse::<LineId>().is_err());
        assert!("gpio27".parse::<LineId>().is_err());
    }

    static MODBUS_LINES: [LineId; 2] = [LineId::expander(2), LineId::expander(3)];
    static ONOFF_LINES: [LineId; 1] = [LineId::expander(1)];

    #[test]
    fn topics_are_bit_exact() {
        assert_eq!(status_topic("viessmann-do7"), "status/viessmann-do7");
        assert_eq!(command_topic("viessmann-id9"), "gpio/write/viessmann-id9");
        assert!(COMMAND_FILTER.starts_with(COMMAND_PREFIX));
    }

    #[test]
    fn input_channels_have_no_command_topic() {
        let input = ChannelSpec::input("viessmann-control", &ONOFF_LINES);
        assert!(input.command_topic().is_none());
        assert_eq!(input.status_topic(), "status/viessmann-control");

        let output = ChannelSpec::output("viessmann-modbus", &MODBUS_LINES, false);
        assert_eq!(
            output.command_topic().as_deref(),
            Some("gpio/write/viessmann-modbus")
        );
    }

    #[test]
    fn inverted_channel_reports_low_level_as_enabled() {
        let onoff = ChannelSpec::output("viessmann-onoff", &ONOFF_LINES, false).inverted();
        assert_eq!(onoff.state_for_level(false), SwitchState::Enabled);
        assert_eq!(onoff.state_for_level(true), SwitchState::Disabled);

        let modbus = ChannelSpec::output("viessmann-modbus", &MODBUS_LINES, false);
        assert_eq!(modbus.state_for_level(true), SwitchState::Enabled);
    }

    #[test]
    fn switch_state_serializes_as_wire_payload() {
        let json = serde_json::to_string(&SwitchState::Disabled).unwrap();
        assert_eq!(json, "\"disabled\"");
        assert_eq!(SwitchState::Enabled.to_string(), "enabled");
    }

    #[test]
    fn line_id_display() {
        assert_eq!(LineId::gpio(27).to_string(), "gpio:27");
        assert_eq!(LineId::expander(0).to_string(), "expander:0");
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::hardware("expander:1", "spi timeout");
        assert!(err.to_string().contains("expander:1"));
        assert!(err.to_string().contains("spi timeout"));
    }
}
