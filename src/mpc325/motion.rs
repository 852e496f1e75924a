// Motion control for the active manipulator
//
// Moves, position queries, calibration and stop. Each operation runs inside a
// single dispatcher session, so the position query that precedes a move and
// the move itself cannot be split by another caller.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info};

use super::codec::{self, Field, Opcode, ResponseLayout};
use super::dispatcher::{Completion, Dispatcher, Session};
use super::error::{Mpc325Error, Result};
use super::units::{
    clamp_speed_level, speed_rate, travel_seconds, Position, QUICK_MOVE_RATE,
};
use crate::config::{DEFAULT_PORT, DEFAULT_SPEED_LEVEL};

/// The firmware rejects coordinates that follow the speed byte sooner than this
pub const SPEED_SETTLE_DELAY: Duration = Duration::from_millis(30);

/// Slack applied to the predicted travel time before a move is declared stuck
const MOVE_DEADLINE_FACTOR: f64 = 2.0;

/// Driver configuration read by every move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub active_device: u8,
    pub quick_move: bool,
    pub speed: u8,
    pub port: String,
}

impl Default for MotionState {
    fn default() -> Self {
        Self {
            active_device: 1,
            quick_move: false,
            speed: DEFAULT_SPEED_LEVEL,
            port: DEFAULT_PORT.to_string(),
        }
    }
}

/// How a move request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    /// The controller acknowledged the end of the move
    Completed,
    /// A stop request ended the wait
    Cancelled,
    /// The target equals the current position; nothing was sent
    AlreadyThere,
}

impl From<Completion> for MoveOutcome {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Acknowledged => MoveOutcome::Completed,
            Completion::Cancelled => MoveOutcome::Cancelled,
        }
    }
}

/// Motion mode of a single move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveMode {
    Quick,
    Speed(u8),
}

impl MoveMode {
    fn rate(self) -> f64 {
        match self {
            MoveMode::Quick => QUICK_MOVE_RATE,
            MoveMode::Speed(level) => speed_rate(level),
        }
    }
}

pub struct MotionController {
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<MotionState>>,
}

impl MotionController {
    pub fn new(dispatcher: Arc<Dispatcher>, state: Arc<RwLock<MotionState>>) -> Self {
        Self { dispatcher, state }
    }

    /// Move to a position using the configured mode.
    ///
    /// Axes left as `None` keep their current value. A target equal to the
    /// current position is a no-op.
    pub fn move_to(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<MoveOutcome> {
        let config = self.state.read().clone();
        let mode = if config.quick_move {
            MoveMode::Quick
        } else {
            MoveMode::Speed(config.speed)
        };

        self.dispatcher.exclusive(|session| {
            if session.cancel_requested() {
                return Ok(MoveOutcome::Cancelled);
            }
            let current = query_position(session)?;
            let target = Position::new(
                x.unwrap_or(current.x),
                y.unwrap_or(current.y),
                z.unwrap_or(current.z),
            );
            if target.to_steps() == current.to_steps() {
                debug!("Already at {:?}, not moving", current);
                return Ok(MoveOutcome::AlreadyThere);
            }
            run_move(session, mode, &current, &target)
        })
    }

    /// Orthogonal move at full speed
    pub fn quick_move_to(&self, x: f64, y: f64, z: f64) -> Result<MoveOutcome> {
        self.move_with_mode(MoveMode::Quick, Position::new(x, y, z))
    }

    /// Straight-line move at a speed level (configured level if `None`).
    /// Levels above the speed table are clamped to the fastest populated level.
    pub fn slow_move_to(&self, x: f64, y: f64, z: f64, speed: Option<u8>) -> Result<MoveOutcome> {
        let level = speed.unwrap_or_else(|| self.state.read().speed);
        self.move_with_mode(MoveMode::Speed(level), Position::new(x, y, z))
    }

    fn move_with_mode(&self, mode: MoveMode, target: Position) -> Result<MoveOutcome> {
        self.dispatcher.exclusive(|session| {
            if session.cancel_requested() {
                return Ok(MoveOutcome::Cancelled);
            }
            let current = query_position(session)?;
            run_move(session, mode, &current, &target)
        })
    }

    /// Current position in microns
    pub fn get_current_position(&self) -> Result<Position> {
        self.dispatcher.exclusive(query_position)
    }

    /// Drive all axes to the origin, like the calibrate button on the controller
    pub fn calibrate(&self) -> Result<()> {
        if !self.dispatcher.is_connected() {
            return Err(Mpc325Error::NotConnected);
        }
        info!("Calibrating device {}", self.state.read().active_device);
        self.dispatcher.exclusive(|session| {
            session
                .transact(&codec::encode(Opcode::Calibrate, &[]), ResponseLayout::ACK)
                .map(|_| ())
        })
    }

    /// Abort the current move
    pub fn stop(&self) -> Result<()> {
        self.dispatcher.request_stop()
    }

    /// Predicted travel time in seconds from the current position at a speed
    /// level. Advisory only; completion is signalled by the controller.
    pub fn estimate_wait_time(&self, speed: u8, x: f64, y: f64, z: f64) -> Result<f64> {
        let current = self.get_current_position()?;
        let target = Position::from_steps(Position::new(x, y, z).to_steps());
        Ok(travel_seconds(&current, &target, speed_rate(speed)))
    }
}

fn query_position(session: &mut Session<'_>) -> Result<Position> {
    let fields = session.transact(
        &codec::encode(Opcode::GetPosition, &[]),
        ResponseLayout::POSITION,
    )?;
    // fields[0] is the leading status byte
    Ok(Position::from_steps([fields[1], fields[2], fields[3]]))
}

fn run_move(
    session: &mut Session<'_>,
    mode: MoveMode,
    current: &Position,
    target: &Position,
) -> Result<MoveOutcome> {
    let steps = target.to_steps();
    let clamped = Position::from_steps(steps);
    let coordinates = steps.map(Field::U32);

    let predicted = travel_seconds(current, &clamped, mode.rate());
    let deadline = Duration::from_secs_f64(predicted * MOVE_DEADLINE_FACTOR) + session.read_timeout();
    info!(
        "Moving to ({}, {}, {}) um, predicted move time {:.3}s",
        clamped.x, clamped.y, clamped.z, predicted
    );

    match mode {
        MoveMode::Quick => {
            session.send(&codec::encode_terminated(Opcode::QuickMove, &coordinates))?;
        }
        MoveMode::Speed(level) => {
            let level = clamp_speed_level(level);
            session.send(&codec::encode(Opcode::SpeedMove, &[Field::U8(level)]))?;
            // Once the speed byte is out the controller expects the coordinates,
            // so a stop raised here only takes effect in the wait below.
            sleep(SPEED_SETTLE_DELAY);
            session.send_continuation(&codec::encode_fields(&coordinates))?;
        }
    }

    session.wait_for_ack(deadline).map(MoveOutcome::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc325::link::LinkSettings;
    use crate::mpc325::sim::{SimController, WireEvent};

    fn controller(sim: &SimController, state: MotionState) -> MotionController {
        let dispatcher = Arc::new(Dispatcher::new(LinkSettings::default()));
        dispatcher.attach(sim.transport()).unwrap();
        MotionController::new(dispatcher, Arc::new(RwLock::new(state)))
    }

    fn quick_state() -> MotionState {
        MotionState {
            quick_move: true,
            ..MotionState::default()
        }
    }

    #[test]
    fn test_get_current_position() {
        let sim = SimController::new();
        sim.set_position_steps([1600, 3200, 8]);
        let motion = controller(&sim, MotionState::default());

        let position = motion.get_current_position().unwrap();
        assert_eq!(position, Position::new(100.0, 200.0, 0.5));
        assert_eq!(sim.writes(), vec![vec![67u8]]);
    }

    #[test]
    fn test_move_to_current_position_is_noop() {
        let sim = SimController::new();
        sim.set_position_steps([1600, 1600, 1600]);
        let motion = controller(&sim, quick_state());

        let outcome = motion.move_to(Some(100.0), None, Some(100.0)).unwrap();
        assert_eq!(outcome, MoveOutcome::AlreadyThere);
        assert_eq!(sim.writes(), vec![vec![67u8]]);
    }

    #[test]
    fn test_move_keeps_unspecified_axes() {
        let sim = SimController::new();
        sim.set_position_steps([1600, 3200, 4800]);
        let motion = controller(&sim, quick_state());

        let outcome = motion.move_to(None, Some(50.0), None).unwrap();
        assert_eq!(outcome, MoveOutcome::Completed);
        assert_eq!(sim.position_steps(), [1600, 800, 4800]);

        let frame = &sim.writes()[1];
        assert_eq!(frame[0], 77);
        assert_eq!(frame.len(), 14);
        assert_eq!(frame[13], 0x0D);
    }

    #[test]
    fn test_quick_move_clamps_coordinates() {
        let sim = SimController::new();
        let motion = controller(&sim, quick_state());

        motion.quick_move_to(-20.0, 30_000.0, 12.5).unwrap();
        assert_eq!(sim.position_steps(), [0, 400_000, 200]);
    }

    #[test]
    fn test_speed_move_waits_between_speed_and_coordinates() {
        let sim = SimController::new();
        let motion = controller(&sim, MotionState::default());

        let outcome = motion.slow_move_to(100.0, 200.0, 0.0, Some(15)).unwrap();
        assert_eq!(outcome, MoveOutcome::Completed);
        assert_eq!(sim.position_steps(), [1600, 3200, 0]);

        let writes: Vec<_> = sim
            .events()
            .into_iter()
            .filter_map(|e| match e {
                WireEvent::Write { bytes, at, .. } => Some((bytes, at)),
                WireEvent::Read { .. } => None,
            })
            .collect();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[1].0, vec![83u8, 13]);
        assert_eq!(writes[2].0.len(), 12);
        assert!(writes[2].1.duration_since(writes[1].1) >= SPEED_SETTLE_DELAY);
    }

    #[test]
    fn test_move_uses_configured_speed() {
        let sim = SimController::new();
        let motion = controller(
            &sim,
            MotionState {
                speed: 5,
                ..MotionState::default()
            },
        );

        motion.move_to(Some(100.0), Some(200.0), Some(0.0)).unwrap();
        assert_eq!(sim.writes()[1], vec![83u8, 5]);
    }

    #[test]
    fn test_pending_stop_skips_move() {
        let sim = SimController::new();
        let motion = controller(&sim, quick_state());
        motion.dispatcher.set_cancelled(true);

        let outcome = motion.quick_move_to(10.0, 0.0, 0.0).unwrap();
        assert_eq!(outcome, MoveOutcome::Cancelled);
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_calibrate_returns_to_origin() {
        let sim = SimController::new();
        sim.set_position_steps([100, 200, 300]);
        let motion = controller(&sim, MotionState::default());

        motion.calibrate().unwrap();
        assert_eq!(sim.position_steps(), [0, 0, 0]);
        assert_eq!(sim.writes(), vec![vec![78u8]]);
    }

    #[test]
    fn test_corrupt_position_is_protocol_fault() {
        let sim = SimController::new();
        let motion = controller(&sim, MotionState::default());
        sim.corrupt_next_response();

        let err = motion.get_current_position().unwrap_err();
        assert!(err.is_protocol_fault());
        assert_eq!(motion.dispatcher.recovery_flushes(), 1);
    }
}
