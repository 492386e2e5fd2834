//! Port discovery and peripheral scanning.
//!
//! Demonstrates:
//! - Listing dongle ports
//! - Claiming every dongle
//! - Scanning and printing peripherals with their serial numbers
//!
//! Usage:
//!   cargo run --example scan
//!   cargo run --example scan -- --port /dev/ttyACM0 --seconds 10
//!   cargo run --example scan -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use dongle_fleet::{DongleEvent, Fleet, PortId, Result};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Scan ===\n");

    // ========================================================================
    // Ports
    // ========================================================================

    println!("[1] Listing ports...");

    let fleet = Fleet::builder().no_discovery().build()?;
    fleet.refresh_ports().await?;

    let ports: Vec<PortId> = if args.ports.is_empty() {
        fleet.available_ports()
    } else {
        args.ports.iter().map(|p| PortId::from(p.as_str())).collect()
    };

    for port in &ports {
        println!("    {port}");
    }
    println!("    ✓ {} port(s)\n", ports.len());

    // ========================================================================
    // Scan
    // ========================================================================

    println!("[2] Scanning for {}s...", args.duration.as_secs());

    for port in ports {
        let dongle = match fleet.claim(port.clone()).await {
            Ok(dongle) => dongle,
            Err(e) => {
                println!("    ✗ {port}: {e}");
                continue;
            }
        };

        let mut events = dongle.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let DongleEvent::DeviceScanned(device) = event {
                    println!(
                        "    {port}: {} {}",
                        device.address(),
                        device.serial_number().unwrap_or("-")
                    );
                }
            }
        });

        dongle.start_scan().await?;
    }

    tokio::time::sleep(args.duration).await;

    for dongle in fleet.dongles() {
        dongle.stop_scan().await?;
    }

    // ========================================================================
    // Summary
    // ========================================================================

    println!("\n[3] Summary");
    for dongle in fleet.dongles() {
        println!(
            "    {}: {} device(s)",
            dongle.port(),
            dongle.scanned_devices().len()
        );
    }

    fleet.shutdown();
    println!("\n=== Done ===");
    Ok(())
}
