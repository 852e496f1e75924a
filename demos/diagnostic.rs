// MPC-325 diagnostic: READ-ONLY check of the controller connection
//
// Queries connected manipulators, the active device and the current position.
// Nothing here moves the hardware.
//
// Usage: cargo run --example diagnostic -- [--port PORT] [--simulate]

use clap::Parser;
use mpc325_zenoh_runtime::config::DEFAULT_PORT;
use mpc325_zenoh_runtime::mpc325::sim::SimController;
use mpc325_zenoh_runtime::mpc325::{MotionState, Mpc325};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    /// Query a simulated controller instead of the serial port
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let args = Args::parse();

    println!("MPC-325 diagnostic (read-only)");
    println!("Serial port: {}", if args.simulate { "<simulated>" } else { args.port.as_str() });
    println!();

    let driver = Mpc325::new(MotionState::default());

    println!("Step 1: Opening serial port...");
    let opened = if args.simulate {
        driver.attach(SimController::new().transport())
    } else {
        driver.open(&args.port)
    };
    if let Err(e) = opened {
        println!("  ✗ Failed to open serial port: {}", e);
        println!();
        println!("Troubleshooting:");
        println!("  - Check the port path is correct");
        println!("  - Verify the controller is powered and the USB cable is connected");
        println!("  - Check that no other program holds the port");
        return Err(e.into());
    }
    println!("  ✓ Serial port opened");
    println!();

    println!("Step 2: Reading connected manipulators...");
    let status = driver.get_connected_devices_status()?;
    println!("  {} manipulator(s) connected", status.count);
    for (i, connected) in status.connected.iter().enumerate() {
        println!(
            "  Device {}: {}",
            i + 1,
            if *connected { "✓ connected" } else { "- empty" }
        );
    }
    println!();

    println!("Step 3: Reading active device...");
    println!("  Active device: {}", driver.get_active_device()?);
    println!();

    println!("Step 4: Reading position...");
    let position = driver.get_current_position()?;
    println!(
        "  x = {:.4} um, y = {:.4} um, z = {:.4} um",
        position.x, position.y, position.z
    );
    println!();

    driver.close();
    println!("Diagnostic complete.");
    Ok(())
}
