use thiserror::Error;

/// Errors that can occur when working with BlockBlueLight devices
#[derive(Error, Debug)]
pub enum BlockLightError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device not found during scanning
    #[error("BlockBlueLight device not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device is not connected (or disconnected underneath us)
    #[error("Device disconnected")]
    Disconnected,

    /// Operation timed out waiting for the device
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Out-of-contract input, rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Frame could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Inbound frame could not be decoded
    ///
    /// Malformed notifications are discarded inside the session and never
    /// surface through the public API; this variant exists for callers that
    /// drive the codec directly.
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for BlockBlueLight operations
pub type Result<T> = std::result::Result<T, BlockLightError>;

impl BlockLightError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound
        )
    }

    /// Check if this error is worth retrying the operation for
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionFailed(_))
    }
}

/// Errors raised while encoding an outgoing frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Payload does not fit into a single BLE write
    #[error("payload of {len} bytes exceeds the {max}-byte frame payload limit")]
    PayloadTooLarge {
        /// Offending payload length
        len: usize,
        /// Maximum payload length the protocol allows
        max: usize,
    },
}

/// Errors raised while decoding an inbound frame
///
/// Malformed bytes arriving from the radio are expected (noise, partial
/// notifications) and are handled as data rather than faults: the session
/// discards the frame and records a debug-level event.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// First byte is not a recognized start marker
    #[error("bad start byte {found:#04X}")]
    BadStart {
        /// Byte found at the start position
        found: u8,
    },

    /// Frame does not terminate with the end marker
    #[error("bad end byte {found:#04X}")]
    BadEnd {
        /// Byte found at the end position
        found: u8,
    },

    /// Checksum byte disagrees with the computed checksum
    #[error("checksum mismatch: computed {computed:#04X}, frame carries {found:#04X}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        computed: u8,
        /// Checksum byte carried by the frame
        found: u8,
    },

    /// Fewer bytes available than the declared length implies
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated {
        /// Bytes required for a complete frame
        needed: usize,
        /// Bytes actually available
        have: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = BlockLightError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(connection_error.is_recoverable());

        let timeout_error = BlockLightError::Timeout { timeout_ms: 3000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        let argument_error = BlockLightError::InvalidArgument("minutes out of range".to_string());
        assert!(!argument_error.is_connection_error());
        assert!(!argument_error.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = BlockLightError::InvalidArgument("timer minutes out of range".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Invalid argument"));
        assert!(error_string.contains("timer minutes out of range"));
    }

    #[test]
    fn test_decode_error_display() {
        let error = DecodeError::ChecksumMismatch {
            computed: 0x23,
            found: 0x42,
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("0x23"));
        assert!(error_string.contains("0x42"));
    }

    #[test]
    fn test_decode_error_wraps_into_crate_error() {
        let error: BlockLightError = DecodeError::BadStart { found: 0xFF }.into();
        assert!(matches!(error, BlockLightError::Decode(_)));
        assert!(!error.is_connection_error());
    }
}
