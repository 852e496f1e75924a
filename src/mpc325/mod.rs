// Sutter MPC-325 micromanipulator driver
//
// Provides:
// - Binary frame codec for the MPC-325 serial protocol
// - Serial link with flush/settle handling
// - Dispatcher serializing commands across threads, with cooperative stop
// - Motion control (moves, position, calibration) and device addressing
// - A simulated controller for running without hardware

pub mod codec;
mod dispatcher;
mod driver;
mod error;
pub mod link;
mod motion;
mod registry;
pub mod sim;
pub mod units;

pub use dispatcher::{Completion, Dispatcher, Session, POLL_INTERVAL};
pub use driver::Mpc325;
pub use error::{Mpc325Error, Result};
pub use link::{Link, LinkSettings, Transport};
pub use motion::{MotionController, MotionState, MoveOutcome, SPEED_SETTLE_DELAY};
pub use registry::{DeviceRegistry, DeviceStatus, MAX_DEVICES};
pub use units::Position;
