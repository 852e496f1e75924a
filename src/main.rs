use clap::Parser;
use tracing_subscriber::EnvFilter;

use mpc325_zenoh_runtime::config::{DEFAULT_PORT, DEFAULT_SPEED_LEVEL};
use mpc325_zenoh_runtime::runtime::{self, RuntimeOptions};

/// Zenoh bridge for a Sutter MPC-325 micromanipulator controller
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port of the controller
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    /// Use full-speed orthogonal moves instead of speed-controlled ones
    #[arg(long)]
    quick_move: bool,

    /// Speed level for straight-line moves (0-13)
    #[arg(long, default_value_t = DEFAULT_SPEED_LEVEL, value_parser = clap::value_parser!(u8).range(0..=13))]
    speed: u8,

    /// Run against a simulated controller instead of the serial port
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let options = RuntimeOptions {
        port: args.port,
        quick_move: args.quick_move,
        speed: args.speed,
        simulate: args.simulate,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
