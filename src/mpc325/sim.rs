// Simulated MPC-325 controller
//
// Speaks the same byte protocol as the real controller over an in-memory
// channel. Used by the tests and by the runtime's `--simulate` mode for
// running without hardware. Every write and read is logged with the calling
// thread so interleaving can be checked.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::debug;

/// Oldest wire events are dropped past this many, so a long `--simulate` run
/// keeps a bounded log
pub const MAX_WIRE_EVENTS: usize = 4096;

use super::codec::{END_MARKER, Opcode, SELECT_ERROR_SENTINEL};
use super::error::Result;
use super::link::Transport;

/// One event seen on the simulated wire
#[derive(Debug, Clone)]
pub enum WireEvent {
    Write { thread: ThreadId, bytes: Vec<u8>, at: Instant },
    Read { thread: ThreadId, bytes: Vec<u8> },
}

impl WireEvent {
    pub fn thread(&self) -> ThreadId {
        match self {
            WireEvent::Write { thread, .. } | WireEvent::Read { thread, .. } => *thread,
        }
    }
}

struct SimState {
    rx: VecDeque<u8>,
    events: VecDeque<WireEvent>,
    position: [u32; 3],
    device_count: u8,
    device_flags: [u8; 4],
    active_device: u8,
    refuse_select: bool,
    hold_move_acks: bool,
    corrupt_next: bool,
    scripted: Option<Vec<u8>>,
    pending_speed: Option<u8>,
}

impl SimState {
    fn record(&mut self, event: WireEvent) {
        if self.events.len() == MAX_WIRE_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn respond(&mut self, mut bytes: Vec<u8>) {
        if let Some(scripted) = self.scripted.take() {
            bytes = scripted;
        }
        if self.corrupt_next {
            self.corrupt_next = false;
            if let Some(last) = bytes.last_mut() {
                *last = 0x00;
            }
        }
        self.rx.extend(bytes);
    }

    fn finish_move(&mut self, target: [u32; 3]) {
        if self.hold_move_acks {
            debug!("sim: holding move to {:?} until stopped", target);
        } else {
            self.position = target;
            self.respond(vec![END_MARKER]);
        }
    }

    fn handle(&mut self, bytes: &[u8]) {
        if let Some(speed) = self.pending_speed.take() {
            match parse_coordinates(bytes) {
                Some(target) => {
                    debug!("sim: speed {} move to {:?}", speed, target);
                    self.finish_move(target);
                }
                None => debug!("sim: dropped malformed speed move payload {:02X?}", bytes),
            }
            return;
        }

        let Some(&opcode) = bytes.first() else {
            return;
        };

        match opcode {
            op if op == Opcode::GetStatuses as u8 => {
                let mut reply = vec![self.device_count];
                reply.extend_from_slice(&self.device_flags);
                reply.push(END_MARKER);
                self.respond(reply);
            }
            op if op == Opcode::GetActive as u8 => {
                self.respond(vec![self.active_device, 0, 0, END_MARKER]);
            }
            op if op == Opcode::SelectDevice as u8 => {
                let device = bytes.get(1).copied().unwrap_or(0);
                let connected = (1..=4).contains(&device)
                    && self.device_flags[(device - 1) as usize] != 0;
                if self.refuse_select || !connected {
                    self.respond(vec![SELECT_ERROR_SENTINEL, END_MARKER]);
                } else {
                    self.active_device = device;
                    self.respond(vec![device, END_MARKER]);
                }
            }
            op if op == Opcode::GetPosition as u8 => {
                let mut reply = vec![self.active_device];
                for axis in self.position {
                    reply.extend_from_slice(&axis.to_le_bytes());
                }
                reply.push(END_MARKER);
                self.respond(reply);
            }
            op if op == Opcode::Calibrate as u8 => {
                self.position = [0; 3];
                self.respond(vec![END_MARKER]);
            }
            op if op == Opcode::QuickMove as u8 => match bytes.split_last() {
                Some((&END_MARKER, body)) => match parse_coordinates(&body[1..]) {
                    Some(target) => self.finish_move(target),
                    None => debug!("sim: dropped malformed quick move {:02X?}", bytes),
                },
                _ => debug!("sim: quick move without CR terminator ignored"),
            },
            op if op == Opcode::SpeedMove as u8 => {
                let speed = bytes.get(1).copied().unwrap_or(0);
                if bytes.len() > 2 {
                    // Coordinates sent without the settle delay are ignored by the firmware
                    debug!("sim: speed move without settle delay ignored");
                } else {
                    self.pending_speed = Some(speed);
                }
            }
            op if op == Opcode::Stop as u8 => {
                // The sim halts a held move at its start position
                self.respond(vec![END_MARKER]);
            }
            other => debug!("sim: unknown opcode {}", other),
        }
    }
}

fn parse_coordinates(bytes: &[u8]) -> Option<[u32; 3]> {
    if bytes.len() != 12 {
        return None;
    }
    let axis = |i: usize| {
        u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
    };
    Some([axis(0), axis(1), axis(2)])
}

/// Handle to a simulated controller; clones share the same device
#[derive(Clone)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimController {
    /// A controller with two connected manipulators, device 1 active, at the origin
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                rx: VecDeque::new(),
                events: VecDeque::new(),
                position: [0; 3],
                device_count: 2,
                device_flags: [1, 1, 0, 0],
                active_device: 1,
                refuse_select: false,
                hold_move_acks: false,
                corrupt_next: false,
                scripted: None,
                pending_speed: None,
            })),
        }
    }

    /// A transport connected to this controller
    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(SimTransport {
            state: Arc::clone(&self.state),
        })
    }

    /// Queue raw bytes as if the controller had sent them
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    pub fn set_position_steps(&self, position: [u32; 3]) {
        self.state.lock().position = position;
    }

    pub fn position_steps(&self) -> [u32; 3] {
        self.state.lock().position
    }

    pub fn set_devices(&self, count: u8, flags: [u8; 4]) {
        let mut state = self.state.lock();
        state.device_count = count;
        state.device_flags = flags;
    }

    pub fn refuse_selection(&self, refuse: bool) {
        self.state.lock().refuse_select = refuse;
    }

    /// Keep moves running until a stop arrives
    pub fn hold_move_acks(&self, hold: bool) {
        self.state.lock().hold_move_acks = hold;
    }

    /// Replace the end marker of the next response with 0x00
    pub fn corrupt_next_response(&self) {
        self.state.lock().corrupt_next = true;
    }

    /// Answer the next command with exactly these bytes
    pub fn reply_next(&self, bytes: &[u8]) {
        self.state.lock().scripted = Some(bytes.to_vec());
    }

    pub fn events(&self) -> Vec<WireEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    /// Every write the host made, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                WireEvent::Write { bytes, .. } => Some(bytes.clone()),
                WireEvent::Read { .. } => None,
            })
            .collect()
    }
}

struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl Transport for SimTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.record(WireEvent::Write {
            thread: thread::current().id(),
            bytes: bytes.to_vec(),
            at: Instant::now(),
        });
        state.handle(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        if state.rx.is_empty() {
            return Err(std::io::Error::new(ErrorKind::TimedOut, "simulated read timeout"));
        }
        let count = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..count)) {
            *slot = byte;
        }
        let bytes = buf[..count].to_vec();
        state.record(WireEvent::Read {
            thread: thread::current().id(),
            bytes,
        });
        Ok(count)
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(self.state.lock().rx.len() as u32)
    }

    /// Host-side buffer clear; the device keeps waiting for any coordinates
    /// it was promised
    fn clear(&mut self) -> Result<()> {
        self.state.lock().rx.clear();
        Ok(())
    }
}
