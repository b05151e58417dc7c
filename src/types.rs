use crate::error::{BlockLightError, Result};
use crate::protocol::StatusReport;
use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};

/// Shortest timer duration the device accepts, in minutes
pub const MIN_TIMER_MINUTES: u16 = 1;

/// Longest timer duration the device accepts, in minutes
pub const MAX_TIMER_MINUTES: u16 = 60;

/// Power state reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// Panel is on
    On,
    /// Panel is off
    Off,
    /// No status notification received yet, or the device reported a byte
    /// outside the documented `0x00`/`0x01` values
    Unknown,
}

impl PowerState {
    /// Whether the device is known to be on
    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl From<u8> for PowerState {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x00 => Self::Off,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "On"),
            Self::Off => write!(f, "Off"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Current belief about the device's state
///
/// Updated exclusively from validated status notifications, never
/// speculatively on command send. Starts out as an unknown sentinel until
/// the first notification arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Power state
    pub power: PowerState,
    /// Timer duration the device was configured with, in seconds
    pub timer_initial_seconds: u16,
    /// Seconds remaining on the running countdown, zero when no timer runs
    pub timer_remaining_seconds: u16,
    /// When this snapshot was last refreshed
    pub last_updated: SystemTime,
}

impl DeviceStatus {
    /// Sentinel status used before the first notification arrives
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            power: PowerState::Unknown,
            timer_initial_seconds: 0,
            timer_remaining_seconds: 0,
            last_updated: SystemTime::now(),
        }
    }

    /// Build a fresh snapshot from a decoded status notification
    #[must_use]
    pub fn from_report(report: &StatusReport) -> Self {
        Self {
            power: report.power,
            timer_initial_seconds: report.timer_initial_seconds,
            timer_remaining_seconds: report.timer_remaining_seconds,
            last_updated: SystemTime::now(),
        }
    }

    /// Remaining countdown formatted as `m:ss`
    #[must_use]
    pub fn timer_remaining_display(&self) -> String {
        let minutes = self.timer_remaining_seconds / 60;
        let seconds = self.timer_remaining_seconds % 60;
        format!("{minutes}:{seconds:02}")
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

/// A validated timer duration request
///
/// The device accepts 1 to 60 minutes; the value is converted to seconds on
/// the wire. Validation happens here, before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    minutes: u16,
}

impl TimerRequest {
    /// Validate a timer duration in minutes
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::InvalidArgument`] for durations outside
    /// 1 to 60 minutes.
    pub fn new(minutes: u16) -> Result<Self> {
        if !(MIN_TIMER_MINUTES..=MAX_TIMER_MINUTES).contains(&minutes) {
            return Err(BlockLightError::InvalidArgument(format!(
                "timer duration {minutes} minutes is out of range ({MIN_TIMER_MINUTES}-{MAX_TIMER_MINUTES})"
            )));
        }
        Ok(Self { minutes })
    }

    /// Requested duration in minutes
    #[must_use]
    pub const fn minutes(self) -> u16 {
        self.minutes
    }

    /// Requested duration in seconds, as sent on the wire
    #[must_use]
    pub const fn as_seconds(self) -> u16 {
        self.minutes * 60
    }
}

/// Device information collected during scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised device name
    pub name: String,
    /// Device address
    pub address: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, rssi: i16) -> Self {
        Self {
            name,
            address: None,
            rssi,
        }
    }
}

/// Parameters controlling discovery and connection establishment
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Scan duration in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
        }
    }
}

/// Timeout and retry configuration for a running session
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Characteristic write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// How long a status query waits for its notification, in milliseconds
    pub status_timeout_ms: u64,
    /// Idle window after which the connection is released, in milliseconds
    ///
    /// The device accepts a single connection at a time, so the session
    /// holds the radio only while something is happening. Two minutes
    /// matches the scale of a therapy session.
    pub idle_timeout_ms: u64,
    /// Maximum connect retry attempts before surfacing failure
    pub max_retry_attempts: u32,
    /// Base delay between connect retries in milliseconds, doubled each
    /// attempt
    pub retry_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            write_timeout_ms: 2_000,
            status_timeout_ms: 3_000,
            idle_timeout_ms: 120_000,
            max_retry_attempts: 3,
            retry_delay_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_from_u8() {
        assert_eq!(PowerState::from(0x01), PowerState::On);
        assert_eq!(PowerState::from(0x00), PowerState::Off);
        // Alternate encoding seen in some captures; reported, not guessed at
        assert_eq!(PowerState::from(0x04), PowerState::Unknown);
        assert_eq!(PowerState::from(0xFF), PowerState::Unknown);
    }

    #[test]
    fn test_timer_request_bounds() {
        assert!(TimerRequest::new(0).is_err());
        assert!(TimerRequest::new(61).is_err());
        assert!(TimerRequest::new(1).is_ok());
        assert!(TimerRequest::new(60).is_ok());
    }

    #[test]
    fn test_timer_request_rejects_before_io() {
        let error = TimerRequest::new(61).unwrap_err();
        assert!(matches!(error, BlockLightError::InvalidArgument(_)));
    }

    #[test]
    fn test_timer_request_seconds() {
        assert_eq!(TimerRequest::new(15).unwrap().as_seconds(), 900);
        assert_eq!(TimerRequest::new(20).unwrap().as_seconds(), 1200);
        assert_eq!(TimerRequest::new(60).unwrap().as_seconds(), 3600);
    }

    #[test]
    fn test_device_status_sentinel() {
        let status = DeviceStatus::default();
        assert_eq!(status.power, PowerState::Unknown);
        assert_eq!(status.timer_initial_seconds, 0);
        assert_eq!(status.timer_remaining_seconds, 0);
    }

    #[test]
    fn test_timer_remaining_display() {
        let mut status = DeviceStatus::unknown();
        status.timer_remaining_seconds = 905;
        assert_eq!(status.timer_remaining_display(), "15:05");
        status.timer_remaining_seconds = 0;
        assert_eq!(status.timer_remaining_display(), "0:00");
    }

    #[test]
    fn test_timeout_config_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.connect_timeout_ms, 30_000);
        assert_eq!(config.write_timeout_ms, 2_000);
        assert_eq!(config.status_timeout_ms, 3_000);
        assert_eq!(config.idle_timeout_ms, 120_000);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.retry_delay_ms, 500);
    }

    #[test]
    fn test_connection_params_default() {
        let params = ConnectionParams::default();
        assert_eq!(params.scan_timeout_ms, 10_000);
        assert_eq!(params.connect_timeout_ms, 30_000);
    }
}
