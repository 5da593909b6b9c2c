//! The fixed channel table of the heat-pump controller board.
//!
//! Inputs are pull-up contacts on native GPIO pins.  Outputs are two
//! indicator LEDs on native pins and the relay board behind the port
//! expander.

use gpiobridge_types::{ChannelSpec, LineId};

static MONITORING_SWITCH: [LineId; 1] = [LineId::gpio(22)];
static CONTROL_SWITCH: [LineId; 1] = [LineId::gpio(27)];
static DO7: [LineId; 1] = [LineId::gpio(6)];
static DO3: [LineId; 1] = [LineId::gpio(12)];
static MONITORING_LED: [LineId; 1] = [LineId::gpio(24)];
static CONTROL_LED: [LineId; 1] = [LineId::gpio(23)];
// Both relays switch the thermostat/heat-pump Modbus pair together.
static MODBUS_RELAYS: [LineId; 2] = [LineId::expander(2), LineId::expander(3)];
static ONOFF_RELAY: [LineId; 1] = [LineId::expander(1)];
static ID9_RELAY: [LineId; 1] = [LineId::expander(0)];

/// Every channel served by the bridge, inputs first.
pub static CHANNELS: [ChannelSpec; 9] = [
    ChannelSpec::input("viessmann-monitoring", &MONITORING_SWITCH),
    ChannelSpec::input("viessmann-control", &CONTROL_SWITCH),
    ChannelSpec::input("viessmann-do7", &DO7),
    ChannelSpec::input("viessmann-do3", &DO3),
    ChannelSpec::output("viessmann-monitoring-led", &MONITORING_LED, false),
    ChannelSpec::output("viessmann-control-led", &CONTROL_LED, false),
    // Released relays restore the direct thermostat-to-heat-pump wiring.
    ChannelSpec::output("viessmann-modbus", &MODBUS_RELAYS, false),
    // The heat pump runs while this relay is released.
    ChannelSpec::output("viessmann-onoff", &ONOFF_RELAY, false).inverted(),
    ChannelSpec::output("viessmann-id9", &ID9_RELAY, false),
];
