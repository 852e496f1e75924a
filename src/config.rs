// Topics, loop rate, default hardware settings
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 20;

// How often the runtime republishes position while idle
pub const POSITION_PERIOD: Duration = Duration::from_secs(1);

// Zenoh topics
pub const TOPIC_CMD: &str = "mpc325/cmd"; // commands
pub const TOPIC_POSITION: &str = "mpc325/state/position"; // position in microns
pub const TOPIC_DEVICES: &str = "mpc325/state/devices"; // connected manipulators
pub const TOPIC_HEALTH: &str = "mpc325/state/health"; // health status
pub const TOPIC_EVENTS: &str = "mpc325/events"; // command results

// Serial port of the MPC-325 controller (ROE-200 USB bridge)
pub const DEFAULT_PORT: &str =
    "/dev/serial/by-id/usb-Sutter_Sutter_Instrument_ROE-200_SI9NGJEQ-if00-port0";

// Speed level used for straight-line moves until configured otherwise
pub const DEFAULT_SPEED_LEVEL: u8 = 1;
