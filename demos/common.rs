//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization
//! - Test plan parsing

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use dongle_fleet::TestType;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
    pub json: bool,
    /// Explicit ports; all listed ports when empty.
    pub ports: Vec<String>,
    pub test_type: TestType,
    pub frame_size: u8,
    pub duration: Duration,
}

impl Args {
    /// Parse command-line arguments.
    ///
    /// Flags: `--debug`, `--json`, `--port <name>` (repeatable),
    /// `--test uplink|downlink|bidirectional`, `--frame-size <n>`,
    /// `--seconds <n>`.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let values = |flag: &str| -> Vec<String> {
            args.windows(2)
                .filter(|w| w[0] == flag)
                .map(|w| w[1].clone())
                .collect()
        };
        let value = |flag: &str| values(flag).into_iter().last();

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            json: args.iter().any(|a| a == "--json"),
            ports: values("--port"),
            test_type: value("--test")
                .as_deref()
                .map_or(TestType::Uplink, parse_test_type),
            frame_size: value("--frame-size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(dongle_fleet::dongle::DEFAULT_FRAME_SIZE),
            duration: Duration::from_secs(
                value("--seconds")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "dongle_fleet=debug"
    } else {
        "dongle_fleet=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Parse a test type name; unknown names fall back to uplink.
pub fn parse_test_type(name: &str) -> TestType {
    match name.to_ascii_lowercase().as_str() {
        "downlink" | "down" => TestType::Downlink,
        "bidirectional" | "bidi" => TestType::Bidirectional,
        "idle" => TestType::Idle,
        _ => TestType::Uplink,
    }
}
