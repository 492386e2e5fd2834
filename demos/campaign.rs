//! Full throughput campaign across all dongles.
//!
//! Demonstrates:
//! - Claiming dongles and scanning
//! - Connecting every scanned peripheral and configuring its test
//! - Running one result cycle with fleet fan-outs
//! - Exporting the campaign report
//!
//! Usage:
//!   cargo run --example campaign
//!   cargo run --example campaign -- --test downlink --frame-size 100
//!   cargo run --example campaign -- --seconds 10 --json

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use dongle_fleet::{FanOutReport, Fleet, PortId, Result};

// ============================================================================
// Constants
// ============================================================================

const SCAN_TIME: Duration = Duration::from_secs(3);
const LINK_SETTLE_TIME: Duration = Duration::from_secs(1);

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
    println!("=== Campaign ===\n");

    let fleet = Fleet::builder().no_discovery().build()?;
    fleet.refresh_ports().await?;

    let ports: Vec<PortId> = if args.ports.is_empty() {
        fleet.available_ports()
    } else {
        args.ports.iter().map(|p| PortId::from(p.as_str())).collect()
    };

    // ========================================================================
    // Claim and Scan
    // ========================================================================

    println!("[1] Claiming {} dongle(s) and scanning...", ports.len());

    for port in ports {
        let dongle = fleet.claim(port).await?;
        dongle.start_scan().await?;
    }

    tokio::time::sleep(SCAN_TIME).await;

    for dongle in fleet.dongles() {
        dongle.stop_scan().await?;
        println!(
            "    ✓ {}: {} device(s)",
            dongle.port(),
            dongle.scanned_devices().len()
        );
    }

    // ========================================================================
    // Connect
    // ========================================================================

    println!("\n[2] Connecting ({:?}, frame size {})...", args.test_type, args.frame_size);

    for dongle in fleet.dongles() {
        for device in dongle.scanned_devices() {
            let address = device.address();
            if let Err(e) = dongle.connect_device(address).await {
                println!("    ✗ {address}: {e}");
            }
        }
    }

    tokio::time::sleep(LINK_SETTLE_TIME).await;

    for dongle in fleet.dongles() {
        for device in dongle.connected_devices() {
            dongle.configure_test(device.address(), args.test_type, args.frame_size)?;
        }
    }

    // ========================================================================
    // Test Cycle
    // ========================================================================

    println!("\n[3] Running test cycle for {}s...", args.duration.as_secs());

    summarize(&fleet.start_tests().await);
    summarize(&fleet.start_result_collection().await);
    summarize(&fleet.start_data_write().await);

    tokio::time::sleep(args.duration).await;

    summarize(&fleet.stop_data_write().await);
    summarize(&fleet.stop_result_collection().await);
    summarize(&fleet.stop_tests().await);

    // ========================================================================
    // Report
    // ========================================================================

    println!("\n[4] Results");

    if args.json {
        println!("{}", fleet.report_json()?);
    } else {
        for dongle in fleet.report().dongles {
            for device in dongle.devices {
                let last = device
                    .results()
                    .last()
                    .and_then(|r| r.throughput_bps)
                    .map_or_else(|| "-".to_owned(), |bps| format!("{bps} B/s"));
                println!(
                    "    {} {} {:?}: {last}",
                    dongle.port,
                    device.address(),
                    device.test_type()
                );
            }
        }
    }

    for dongle in fleet.dongles() {
        for device in dongle.connected_devices() {
            dongle.disconnect_device(device.address()).await.ok();
        }
    }

    fleet.shutdown();
    println!("\n=== Done ===");
    Ok(())
}

fn summarize(report: &FanOutReport) {
    println!(
        "    {:?}: {}/{} ok",
        report.operation,
        report.succeeded.len(),
        report.attempted()
    );
    for failure in &report.failed {
        println!("      ✗ {} {}: {}", failure.port, failure.address, failure.error);
    }
}
