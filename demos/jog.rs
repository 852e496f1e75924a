// Keyboard jog: WASD move x/y, Z/X move z, R/F step size, C calibrate,
// space stop, Q quit. Publishes commands to a running runtime over Zenoh.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use mpc325_zenoh_runtime::config::{TOPIC_CMD, TOPIC_POSITION};
use mpc325_zenoh_runtime::messages::MotionCommand;
use mpc325_zenoh_runtime::mpc325::Position;
use std::time::Duration;
use tracing::info;

const STEPS: [f64; 3] = [1.0, 10.0, 100.0]; // microns per key press

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;
    let positions = session.declare_subscriber(TOPIC_POSITION).await?;

    info!("Controls: WASD=x/y, Z/X=z, R/F=step, C=calibrate, space=stop, Q=quit");
    print_step(0);

    enable_raw_mode()?;
    let result = run_jog(&publisher, &positions).await;
    disable_raw_mode()?;

    result
}

async fn run_jog(
    publisher: &zenoh::pubsub::Publisher<'_>,
    positions: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut step_idx: usize = 0;
    let mut position: Option<Position> = None;

    loop {
        // Track the latest position published by the runtime
        while let Ok(Some(sample)) = positions.try_recv() {
            if let Ok(p) = serde_json::from_slice::<Position>(&sample.payload().to_bytes()) {
                position = Some(p);
            }
        }

        if !event::poll(Duration::from_millis(20))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        let step = STEPS[step_idx];
        let command = match code {
            KeyCode::Char(c @ ('w' | 's' | 'a' | 'd' | 'z' | 'x')) => {
                let Some(current) = position else {
                    info!("No position from runtime yet");
                    continue;
                };
                let (dx, dy, dz) = match c {
                    'w' => (0.0, step, 0.0),
                    's' => (0.0, -step, 0.0),
                    'a' => (-step, 0.0, 0.0),
                    'd' => (step, 0.0, 0.0),
                    'z' => (0.0, 0.0, step),
                    _ => (0.0, 0.0, -step),
                };
                let target = Position::new(current.x + dx, current.y + dy, current.z + dz);
                // Assume the move lands; the runtime corrects us on its next update
                position = Some(target);
                MotionCommand::Move {
                    x: Some(target.x),
                    y: Some(target.y),
                    z: Some(target.z),
                }
            }

            // Step size
            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEPS.len() - 1);
                print_step(step_idx);
                continue;
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                print_step(step_idx);
                continue;
            }

            KeyCode::Char('c') => MotionCommand::Calibrate,
            KeyCode::Char(' ') => MotionCommand::Stop,

            // Quit
            KeyCode::Char('q') | KeyCode::Esc => break,

            _ => continue,
        };

        publisher.put(serde_json::to_string(&command)?).await?;
    }

    Ok(())
}

fn print_step(idx: usize) {
    info!("Step: {} um", STEPS[idx]);
}
