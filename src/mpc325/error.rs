// Error types shared by every layer of the MPC-325 driver

/// Error types for MPC-325 communication
#[derive(Debug, thiserror::Error)]
pub enum Mpc325Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial link is not open")]
    NotConnected,

    #[error("Protocol desync: {reason}")]
    Protocol { reason: String },

    #[error("Timeout waiting for response: expected {expected} bytes, got {received}")]
    Timeout { expected: usize, received: usize },

    #[error("Device {0} is out of range (valid devices are 1-4)")]
    DeviceOutOfRange(u8),
}

impl Mpc325Error {
    /// True for faults that leave the link out of sync with the device
    pub fn is_protocol_fault(&self) -> bool {
        matches!(self, Mpc325Error::Protocol { .. })
    }
}

pub type Result<T> = std::result::Result<T, Mpc325Error>;
