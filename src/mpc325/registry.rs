// Daisy-chained manipulator addressing
//
// The controller drives up to four manipulators; commands go to the active one.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::codec::{self, Field, Opcode, ResponseLayout, SELECT_ERROR_SENTINEL};
use super::dispatcher::Dispatcher;
use super::error::{Mpc325Error, Result};
use super::motion::MotionState;

/// Number of manipulators one controller can address
pub const MAX_DEVICES: u8 = 4;

/// Connectivity of the manipulators on the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub count: u8,
    pub connected: [bool; 4],
}

pub struct DeviceRegistry {
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<MotionState>>,
}

impl DeviceRegistry {
    pub fn new(dispatcher: Arc<Dispatcher>, state: Arc<RwLock<MotionState>>) -> Self {
        Self { dispatcher, state }
    }

    /// Number of connected manipulators and the status of each slot
    pub fn get_connected_devices_status(&self) -> Result<DeviceStatus> {
        let fields = self.dispatcher.exclusive(|session| {
            session.transact(&codec::encode(Opcode::GetStatuses, &[]), ResponseLayout::STATUSES)
        })?;

        let mut connected = [false; 4];
        for (slot, flag) in connected.iter_mut().zip(&fields[1..]) {
            *slot = *flag != 0;
        }
        Ok(DeviceStatus {
            count: fields[0] as u8,
            connected,
        })
    }

    /// Device number (1-4) that currently receives commands
    pub fn get_active_device(&self) -> Result<u8> {
        let fields = self.dispatcher.exclusive(|session| {
            session.transact(
                &codec::encode(Opcode::GetActive, &[]),
                ResponseLayout::ACTIVE_DEVICE,
            )
        })?;
        Ok(fields[0] as u8)
    }

    /// Make `device` the active manipulator.
    ///
    /// Returns `Ok(false)` when the controller refuses the selection (for
    /// example an empty slot). Numbers outside 1-4 fail before anything is sent.
    pub fn change_active_device(&self, device: u8) -> Result<bool> {
        if !(1..=MAX_DEVICES).contains(&device) {
            return Err(Mpc325Error::DeviceOutOfRange(device));
        }

        let fields = self.dispatcher.exclusive(|session| {
            session.transact(
                &codec::encode(Opcode::SelectDevice, &[Field::U8(device)]),
                ResponseLayout::SELECT_DEVICE,
            )
        })?;

        if fields[0] == SELECT_ERROR_SENTINEL as u32 {
            warn!("Controller refused to select device {}", device);
            return Ok(false);
        }

        info!("Active device is now {}", device);
        self.state.write().active_device = device;
        Ok(true)
    }
}
