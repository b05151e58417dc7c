#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Blocklight
//!
//! A Rust library for controlling BlockBlueLight red light therapy panels
//! via Bluetooth Low Energy.
//!
//! The panel speaks a small proprietary binary protocol over a generic
//! FFF0-series GATT service. The protocol implemented here was worked out
//! from btsnoop captures of the vendor's mobile app talking to a real
//! device: framing, the additive checksum, the status notification layout,
//! and the command set (power, countdown timer, status query) are all
//! byte-exact reproductions of the captured traffic.
//!
//! ## Connection model
//!
//! The device accepts one BLE connection at a time and is typically shared
//! with the vendor app, so this library never holds the radio longer than
//! needed: connections are established on demand when a command is issued
//! and released automatically after an idle window. Device state (power and
//! the running countdown) is tracked from the device's own notifications,
//! never assumed from commands sent, and exposed both as point-in-time
//! snapshots and as a subscription for live countdown display.
//!
//! ## Quick Start
//!
//! ```no_run
//! use blocklight::BlockLightDevice;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover and bind to a BlockBlueLight panel
//!     let light = BlockLightDevice::discover_first().await?;
//!
//!     // Run a 20 minute session: set the timer, then turn on
//!     light.set_timer(20).await?;
//!     light.turn_on().await?;
//!
//!     // Follow the countdown without polling
//!     let mut updates = light.subscribe();
//!     while updates.changed().await.is_ok() {
//!         let status = updates.borrow().clone();
//!         println!("{} - {}", status.power, status.timer_remaining_display());
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport layer
pub mod ble;
/// Main device control interface
pub mod device;
/// Error types and handling
pub mod error;
/// Frame codec for the device's binary protocol
pub mod protocol;
/// Connection session state machine
pub mod session;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{BleManager, BleTransport, Transport, TransportLink};
pub use device::BlockLightDevice;
pub use error::{BlockLightError, DecodeError, EncodeError, Result};
pub use protocol::{CommandId, Direction, Frame, StatusReport};
pub use session::{Session, SessionState};
pub use types::{
    ConnectionParams, DeviceInfo, DeviceStatus, PowerState, TimeoutConfig, TimerRequest,
    MAX_TIMER_MINUTES, MIN_TIMER_MINUTES,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GATT service the panel exposes its protocol on
///
/// A generic FFF0-series vendor service; the device advertises it, which is
/// what scanning filters on.
pub const SERVICE_UUID: &str = "0000fff0-0000-1000-8000-00805f9b34fb";

/// Characteristic commands are written to
///
/// Note the inverted naming on this hardware: FFF2 is the writable
/// characteristic and FFF1 the notifying one, the opposite of the usual
/// convention for this service family.
pub const WRITE_CHAR_UUID: &str = "0000fff2-0000-1000-8000-00805f9b34fb";

/// Characteristic the device sends notifications on
pub const NOTIFY_CHAR_UUID: &str = "0000fff1-0000-1000-8000-00805f9b34fb";

/// Name fragment BlockBlueLight panels advertise with
///
/// Discovery matches case-insensitively against the advertised local name,
/// mirroring how the vendor app locates its devices.
pub const DEVICE_NAME_PATTERN: &str = "BLOCK";
