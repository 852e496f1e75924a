// High-level MPC-325 driver
//
// Combines the link, dispatcher, motion controller and device registry behind
// one handle. All methods take `&self`; share it with `Arc` so a UI thread can
// stop a move that a worker thread is waiting on.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::dispatcher::Dispatcher;
use super::error::Result;
use super::link::{LinkSettings, Transport};
use super::motion::{MotionController, MotionState, MoveOutcome};
use super::registry::{DeviceRegistry, DeviceStatus};
use super::units::{clamp_speed_level, Position};

pub struct Mpc325 {
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<MotionState>>,
    motion: MotionController,
    registry: DeviceRegistry,
}

impl Mpc325 {
    pub fn new(state: MotionState) -> Self {
        Self::with_settings(state, LinkSettings::default())
    }

    /// Create with custom serial settings
    pub fn with_settings(state: MotionState, settings: LinkSettings) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(settings));
        let state = Arc::new(RwLock::new(state));
        Self {
            motion: MotionController::new(Arc::clone(&dispatcher), Arc::clone(&state)),
            registry: DeviceRegistry::new(Arc::clone(&dispatcher), Arc::clone(&state)),
            dispatcher,
            state,
        }
    }

    /// Open `port` and remember it as the configured source
    pub fn open(&self, port: &str) -> Result<()> {
        info!("Opening MPC-325 controller on {}", port);
        self.dispatcher.open(port)?;
        self.state.write().port = port.to_string();
        Ok(())
    }

    /// Open the port from the current configuration
    pub fn open_configured(&self) -> Result<()> {
        let port = self.state.read().port.clone();
        self.open(&port)
    }

    /// Open over an existing transport (simulated controller, custom bridge)
    pub fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        self.dispatcher.attach(transport)
    }

    pub fn close(&self) {
        self.dispatcher.close();
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    /// True while a command holds the link
    pub fn is_busy(&self) -> bool {
        self.dispatcher.is_busy()
    }

    /// Snapshot of the current configuration
    pub fn state(&self) -> MotionState {
        self.state.read().clone()
    }

    /// Update move mode, speed level and port. `None` leaves a setting as is.
    /// A new port takes effect on the next open.
    pub fn update_internal_state(
        &self,
        quick_move: Option<bool>,
        speed: Option<u8>,
        source: Option<String>,
    ) {
        let mut state = self.state.write();
        if let Some(quick_move) = quick_move {
            state.quick_move = quick_move;
        }
        if let Some(speed) = speed {
            state.speed = clamp_speed_level(speed);
        }
        if let Some(source) = source {
            state.port = source;
        }
        info!(
            "Motion settings: quick_move={}, speed={}, port={}",
            state.quick_move, state.speed, state.port
        );
    }

    pub fn move_to(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<MoveOutcome> {
        self.motion.move_to(x, y, z)
    }

    pub fn quick_move_to(&self, x: f64, y: f64, z: f64) -> Result<MoveOutcome> {
        self.motion.quick_move_to(x, y, z)
    }

    pub fn slow_move_to(&self, x: f64, y: f64, z: f64, speed: Option<u8>) -> Result<MoveOutcome> {
        self.motion.slow_move_to(x, y, z, speed)
    }

    pub fn stop(&self) -> Result<()> {
        self.motion.stop()
    }

    pub fn calibrate(&self) -> Result<()> {
        self.motion.calibrate()
    }

    pub fn get_current_position(&self) -> Result<Position> {
        self.motion.get_current_position()
    }

    pub fn estimate_wait_time(&self, speed: u8, x: f64, y: f64, z: f64) -> Result<f64> {
        self.motion.estimate_wait_time(speed, x, y, z)
    }

    pub fn get_connected_devices_status(&self) -> Result<DeviceStatus> {
        self.registry.get_connected_devices_status()
    }

    pub fn get_active_device(&self) -> Result<u8> {
        self.registry.get_active_device()
    }

    pub fn change_active_device(&self, device: u8) -> Result<bool> {
        self.registry.change_active_device(device)
    }
}

impl Drop for Mpc325 {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc325::dispatcher::POLL_INTERVAL;
    use crate::mpc325::error::Mpc325Error;
    use crate::mpc325::sim::SimController;
    use std::thread;
    use std::time::{Duration, Instant};

    fn driver(sim: &SimController) -> Arc<Mpc325> {
        let driver = Mpc325::new(MotionState::default());
        driver.attach(sim.transport()).unwrap();
        Arc::new(driver)
    }

    #[test]
    fn test_update_internal_state() {
        let driver = Mpc325::new(MotionState::default());
        driver.update_internal_state(Some(true), Some(15), Some("/dev/ttyUSB3".to_string()));

        let state = driver.state();
        assert!(state.quick_move);
        assert_eq!(state.speed, 13);
        assert_eq!(state.port, "/dev/ttyUSB3");

        driver.update_internal_state(None, Some(4), None);
        let state = driver.state();
        assert!(state.quick_move);
        assert_eq!(state.speed, 4);
    }

    #[test]
    fn test_close_and_reuse() {
        let sim = SimController::new();
        let driver = driver(&sim);
        assert!(driver.is_connected());

        driver.close();
        driver.close();
        assert!(!driver.is_connected());
        assert!(matches!(
            driver.get_current_position(),
            Err(Mpc325Error::NotConnected)
        ));
        assert!(matches!(driver.calibrate(), Err(Mpc325Error::NotConnected)));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_estimate_wait_time() {
        let sim = SimController::new();
        let driver = driver(&sim);

        let seconds = driver.estimate_wait_time(5, 100.0, 200.0, 0.0).unwrap();
        assert!((seconds - 300.0 / 487.5).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_moves_do_not_interleave() {
        let sim = SimController::new();
        let driver = driver(&sim);

        let a = {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver.slow_move_to(100.0, 200.0, 0.0, Some(13)))
        };
        let b = {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver.quick_move_to(300.0, 0.0, 50.0))
        };
        assert!(a.join().unwrap().is_ok());
        assert!(b.join().unwrap().is_ok());

        // Each move is query + move frame(s) + ack read, all from one thread.
        // The wire log must switch threads exactly once.
        let events = sim.events();
        let switches = events
            .windows(2)
            .filter(|pair| pair[0].thread() != pair[1].thread())
            .count();
        assert_eq!(switches, 1, "interleaved wire traffic: {:?}", events);
    }

    #[test]
    fn test_stop_cancels_waiting_move() {
        let sim = SimController::new();
        sim.hold_move_acks(true);
        let driver = driver(&sim);

        let mover = {
            let driver = Arc::clone(&driver);
            thread::spawn(move || {
                let outcome = driver.slow_move_to(20_000.0, 0.0, 0.0, Some(0));
                (outcome, Instant::now())
            })
        };

        // Let the move get past its settle delay and into the wait loop
        thread::sleep(Duration::from_millis(150));
        assert!(driver.is_busy());
        let stop_requested = Instant::now();
        driver.stop().unwrap();

        // The flag goes up right after `stop_requested`; the wait loop must
        // notice it within about one poll
        let (outcome, returned_at) = mover.join().unwrap();
        assert_eq!(outcome.unwrap(), MoveOutcome::Cancelled);
        assert!(returned_at.duration_since(stop_requested) < POLL_INTERVAL * 3);

        // The move never read an ack; the last frame on the wire is the stop
        assert_eq!(sim.writes().last().unwrap(), &vec![3u8]);
        assert_eq!(sim.position_steps(), [0, 0, 0]);
        assert!(!driver.dispatcher.is_cancelled());
    }

    #[test]
    fn test_stop_during_settle_still_sends_coordinates() {
        let sim = SimController::new();
        sim.hold_move_acks(true);
        let driver = driver(&sim);

        let mover = {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver.slow_move_to(100.0, 0.0, 0.0, Some(3)))
        };

        // Stop as soon as the speed byte is on the wire
        while !sim.writes().contains(&vec![83u8, 3]) {
            thread::sleep(Duration::from_millis(1));
        }
        driver.stop().unwrap();
        assert_eq!(mover.join().unwrap().unwrap(), MoveOutcome::Cancelled);

        let writes = sim.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[1], vec![83u8, 3]);
        assert_eq!(writes[2].len(), 12);
        assert_eq!(&writes[2][..4], &1600u32.to_le_bytes());
        assert_eq!(writes[3], vec![3u8]);
    }

    #[test]
    fn test_open_configured_uses_state_port() {
        let driver = Mpc325::new(MotionState {
            port: "/dev/mpc325-missing".to_string(),
            ..MotionState::default()
        });

        assert!(matches!(driver.open_configured(), Err(Mpc325Error::Serial(_))));
        assert!(!driver.is_connected());
    }

    #[test]
    fn test_moves_work_after_stop() {
        let sim = SimController::new();
        let driver = driver(&sim);

        driver.stop().unwrap();
        assert_eq!(
            driver.quick_move_to(10.0, 10.0, 10.0).unwrap(),
            MoveOutcome::Completed
        );
        assert_eq!(sim.position_steps(), [160, 160, 160]);
    }
}
