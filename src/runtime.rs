// 20 Hz bridge between Zenoh and the MPC-325 driver
//
// Commands arrive as JSON on `mpc325/cmd`. Moves and queries are queued to a
// single worker thread and run in arrival order. `stop` bypasses the queue and
// runs right away on a blocking task, so it can cancel the move the worker is
// waiting on.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::time::interval;
use tracing::{error, info, warn};

// local imports
use crate::config::{
    LOOP_HZ, POSITION_PERIOD, TOPIC_CMD, TOPIC_DEVICES, TOPIC_EVENTS, TOPIC_HEALTH,
    TOPIC_POSITION,
};
use crate::messages::{CommandReport, MotionCommand, RuntimeHealth};
use crate::mpc325::sim::SimController;
use crate::mpc325::{MotionState, Mpc325};

/// Startup options for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub port: String,
    pub quick_move: bool,
    pub speed: u8,
    /// Drive a simulated controller instead of the serial port
    pub simulate: bool,
}

/// Run one command against the driver and describe the result
pub fn execute(driver: &Mpc325, command: MotionCommand) -> CommandReport {
    let op = command.name();
    let result = match command {
        MotionCommand::Move { x, y, z } => driver.move_to(x, y, z).map(|outcome| {
            let mut report = CommandReport::ok(op);
            report.outcome = Some(outcome);
            report
        }),
        MotionCommand::QuickMove { x, y, z } => driver.quick_move_to(x, y, z).map(|outcome| {
            let mut report = CommandReport::ok(op);
            report.outcome = Some(outcome);
            report
        }),
        MotionCommand::SlowMove { x, y, z, speed } => {
            driver.slow_move_to(x, y, z, speed).map(|outcome| {
                let mut report = CommandReport::ok(op);
                report.outcome = Some(outcome);
                report
            })
        }
        MotionCommand::Stop => driver.stop().map(|_| CommandReport::ok(op)),
        MotionCommand::Calibrate => driver.calibrate().map(|_| CommandReport::ok(op)),
        MotionCommand::SelectDevice { device } => {
            driver.change_active_device(device).map(|selected| {
                let mut report = if selected {
                    CommandReport::ok(op)
                } else {
                    CommandReport::failed(op, format!("device {} refused selection", device))
                };
                report.active_device = Some(driver.state().active_device);
                report
            })
        }
        MotionCommand::Configure { quick_move, speed } => {
            driver.update_internal_state(quick_move, speed, None);
            Ok(CommandReport::ok(op))
        }
        MotionCommand::QueryPosition => Ok(CommandReport::ok(op)),
        MotionCommand::QueryDevices => driver.get_connected_devices_status().map(|devices| {
            let mut report = CommandReport::ok(op);
            report.devices = Some(devices);
            report
        }),
    };

    let mut report = result.unwrap_or_else(|e| {
        warn!("Command {} failed: {}", op, e);
        CommandReport::failed(op, e)
    });

    // Every report carries the position the device ended up at
    if op != "stop" {
        match driver.get_current_position() {
            Ok(position) => report.position = Some(position),
            Err(e) => warn!("Failed to read position after {}: {}", op, e),
        }
    }
    report
}

fn spawn_worker(
    driver: Arc<Mpc325>,
    jobs: mpsc::Receiver<MotionCommand>,
    reports: UnboundedSender<CommandReport>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("mpc325-worker".to_string())
        .spawn(move || {
            while let Ok(command) = jobs.recv() {
                info!("Executing command: {:?}", &command);
                let report = execute(&driver, command);
                if reports.send(report).is_err() {
                    break;
                }
            }
            info!("Motion worker stopped");
        })
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let driver = Arc::new(Mpc325::new(MotionState {
        quick_move: options.quick_move,
        speed: options.speed,
        port: options.port.clone(),
        ..MotionState::default()
    }));

    if options.simulate {
        info!("Using simulated MPC-325 controller");
        driver.attach(SimController::new().transport())?;
    } else {
        driver.open_configured()?;
    }

    let devices = driver.get_connected_devices_status()?;
    info!(
        "{} manipulator(s) connected, active device {}",
        devices.count,
        driver.get_active_device()?
    );

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_position = session.declare_publisher(TOPIC_POSITION).await?;
    let pub_devices = session.declare_publisher(TOPIC_DEVICES).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
    let pub_events = session.declare_publisher(TOPIC_EVENTS).await?;

    pub_devices.put(serde_json::to_string(&devices)?).await?;

    let (job_tx, job_rx) = mpsc::channel::<MotionCommand>();
    let (report_tx, mut report_rx) = unbounded_channel::<CommandReport>();
    let worker = spawn_worker(Arc::clone(&driver), job_rx, report_tx.clone())?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut last_position_poll = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Runtime started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD);
    info!(
        "Publishing to: {}, {}, {}, {}",
        TOPIC_POSITION, TOPIC_DEVICES, TOPIC_HEALTH, TOPIC_EVENTS
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotionCommand>(&payload) {
                Ok(MotionCommand::Stop) => {
                    let driver = Arc::clone(&driver);
                    let reports = report_tx.clone();
                    tokio::task::spawn_blocking(move || {
                        let _ = reports.send(execute(&driver, MotionCommand::Stop));
                    });
                }
                Ok(command) => {
                    if job_tx.send(command).is_err() {
                        error!("Motion worker is gone, dropping command");
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Keep the position fresh while idle
        if last_position_poll.elapsed() >= POSITION_PERIOD && !driver.is_busy() {
            last_position_poll = Instant::now();
            let _ = job_tx.send(MotionCommand::QueryPosition);
        }

        // 3. Publish finished commands
        while let Ok(report) = report_rx.try_recv() {
            if let Some(position) = &report.position {
                pub_position.put(serde_json::to_string(position)?).await?;
            }
            if let Some(devices) = &report.devices {
                pub_devices.put(serde_json::to_string(devices)?).await?;
            }
            if report.op != "query_position" {
                pub_events.put(serde_json::to_string(&report)?).await?;
            }
        }

        // 4. Publish health
        let health = if !driver.is_connected() {
            RuntimeHealth::Disconnected
        } else if driver.is_busy() {
            RuntimeHealth::Busy
        } else {
            RuntimeHealth::Ok
        };
        pub_health.put(serde_json::to_string(&health)?).await?;
    }

    // Abort a running move so the worker can drain and exit
    if driver.is_busy() {
        let stopper = Arc::clone(&driver);
        if let Err(e) = tokio::task::spawn_blocking(move || stopper.stop()).await? {
            warn!("Stop on shutdown failed: {}", e);
        }
    }
    drop(job_tx);
    if tokio::task::spawn_blocking(move || worker.join()).await?.is_err() {
        error!("Motion worker panicked");
    }
    driver.close();
    Ok(())
}
