use crate::{
    error::{DecodeError, EncodeError},
    types::PowerState,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Start byte of every host-to-device command frame
pub const COMMAND_START: u8 = 0x3A;

/// Start byte of every device-to-host notification frame
///
/// The device uses an asymmetric convention: commands open with `0x3A`,
/// notifications with `0x2A`. Everything after the start byte is laid out
/// identically in both directions.
pub const NOTIFICATION_START: u8 = 0x2A;

/// Terminator byte of every frame in either direction
pub const FRAME_END: u8 = 0x0A;

/// Fixed second byte of every frame; `0x01` across all captured traffic
pub const LENGTH_BYTE: u8 = 0x01;

/// Bytes before the payload: start, length byte, command id, payload length (BE)
const HEADER_SIZE: usize = 5;

/// Smallest possible frame: header plus checksum and end byte, empty payload
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + 2;

/// Largest frame that fits a single BLE write at the default ATT MTU
pub const MAX_FRAME_SIZE: usize = 20;

/// Maximum payload length the fixed frame size leaves room for
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - MIN_FRAME_SIZE;

/// Command ids observed in captured traffic between the vendor app and the
/// device
///
/// Only status, power, and timer are exercised by [`crate::BlockLightDevice`];
/// the parameter query and custom name commands exist in the vendor app and
/// round-trip through the codec for callers that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    /// Query current power and timer state
    Status = 0x10,
    /// Turn the panel on or off
    Power = 0x20,
    /// Set the countdown timer, payload in seconds
    TimerSet = 0x31,
    /// Query a device parameter
    ParameterQuery = 0x40,
    /// Set the device's advertised name
    CustomName = 0x74,
}

impl CommandId {
    /// Convert from a raw command byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(Self::Status),
            0x20 => Some(Self::Power),
            0x31 => Some(Self::TimerSet),
            0x40 => Some(Self::ParameterQuery),
            0x74 => Some(Self::CustomName),
            _ => None,
        }
    }
}

/// Direction a frame travels in, determined by its start byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device, start byte `0x3A`
    Command,
    /// Device to host, start byte `0x2A`
    Notification,
}

impl Direction {
    /// Start byte this direction is framed with
    #[must_use]
    pub const fn start_byte(self) -> u8 {
        match self {
            Self::Command => COMMAND_START,
            Self::Notification => NOTIFICATION_START,
        }
    }

    const fn from_start_byte(byte: u8) -> Option<Self> {
        match byte {
            COMMAND_START => Some(Self::Command),
            NOTIFICATION_START => Some(Self::Notification),
            _ => None,
        }
    }
}

/// One protocol message
///
/// Wire layout in both directions:
///
/// ```text
/// +-------+------+-------+--------+--------+-------------+----------+------+
/// | start | 0x01 | cmd   | len_hi | len_lo | payload...  | checksum | 0x0A |
/// +-------+------+-------+--------+--------+-------------+----------+------+
/// ```
///
/// The checksum is the 8-bit-masked sum of every byte from the `0x01` length
/// byte through the last payload byte. A frame that fails checksum
/// validation must never be interpreted as device state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Which start byte the frame carries
    pub direction: Direction,
    /// Raw command id byte
    pub command: u8,
    /// Payload bytes, layout depending on the command
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, rejecting payloads that do not fit a single BLE write
    pub fn new(direction: Direction, command: u8, payload: Vec<u8>) -> Result<Self, EncodeError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            direction,
            command,
            payload,
        })
    }

    /// Create a command frame for a known command id
    pub fn command(id: CommandId, payload: Vec<u8>) -> Result<Self, EncodeError> {
        Self::new(Direction::Command, id as u8, payload)
    }

    /// Power command, payload `0x01` for on and `0x00` for off
    #[must_use]
    pub fn power(on: bool) -> Self {
        Self {
            direction: Direction::Command,
            command: CommandId::Power as u8,
            payload: vec![u8::from(on)],
        }
    }

    /// Timer command with the duration in seconds, big-endian
    #[must_use]
    pub fn set_timer(seconds: u16) -> Self {
        Self {
            direction: Direction::Command,
            command: CommandId::TimerSet as u8,
            payload: seconds.to_be_bytes().to_vec(),
        }
    }

    /// Status query command, empty payload
    #[must_use]
    pub fn status_query() -> Self {
        Self {
            direction: Direction::Command,
            command: CommandId::Status as u8,
            payload: Vec::new(),
        }
    }

    /// Parameter query command, empty payload
    #[must_use]
    pub fn parameter_query() -> Self {
        Self {
            direction: Direction::Command,
            command: CommandId::ParameterQuery as u8,
            payload: Vec::new(),
        }
    }

    /// Command to set the device's advertised name
    pub fn custom_name(name: &str) -> Result<Self, EncodeError> {
        Self::command(CommandId::CustomName, name.as_bytes().to_vec())
    }

    /// Serialize the frame to wire bytes
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + self.payload.len());

        buf.put_u8(self.direction.start_byte());
        buf.put_u8(LENGTH_BYTE);
        buf.put_u8(self.command);
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u16(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);

        let checksum = checksum(&buf[1..]);
        buf.put_u8(checksum);
        buf.put_u8(FRAME_END);

        buf.freeze()
    }

    /// Parse a frame in either direction, inferring it from the start byte
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let Some(&first) = data.first() else {
            return Err(DecodeError::Truncated {
                needed: MIN_FRAME_SIZE,
                have: 0,
            });
        };
        let Some(direction) = Direction::from_start_byte(first) else {
            return Err(DecodeError::BadStart { found: first });
        };
        Self::decode_body(data, direction)
    }

    /// Parse a device-to-host notification frame
    ///
    /// Never panics on malformed input: partial notifications and radio
    /// noise are reported as [`DecodeError`] values.
    pub fn decode_notification(data: &[u8]) -> Result<Self, DecodeError> {
        let Some(&first) = data.first() else {
            return Err(DecodeError::Truncated {
                needed: MIN_FRAME_SIZE,
                have: 0,
            });
        };
        if first != NOTIFICATION_START {
            return Err(DecodeError::BadStart { found: first });
        }
        Self::decode_body(data, Direction::Notification)
    }

    fn decode_body(data: &[u8], direction: Direction) -> Result<Self, DecodeError> {
        if data.len() < MIN_FRAME_SIZE {
            return Err(DecodeError::Truncated {
                needed: MIN_FRAME_SIZE,
                have: data.len(),
            });
        }

        let declared = usize::from(u16::from_be_bytes([data[3], data[4]]));
        let needed = MIN_FRAME_SIZE + declared;
        if data.len() < needed {
            return Err(DecodeError::Truncated {
                needed,
                have: data.len(),
            });
        }

        let end = data[needed - 1];
        if end != FRAME_END {
            return Err(DecodeError::BadEnd { found: end });
        }

        let computed = checksum(&data[1..HEADER_SIZE + declared]);
        let found = data[HEADER_SIZE + declared];
        if computed != found {
            return Err(DecodeError::ChecksumMismatch { computed, found });
        }

        Ok(Self {
            direction,
            command: data[2],
            payload: data[HEADER_SIZE..HEADER_SIZE + declared].to_vec(),
        })
    }
}

/// Sum the given bytes into an 8-bit checksum
fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Power and timer state carried by a status notification payload
///
/// Layout: byte 0 power state, bytes 1-2 the configured timer duration in
/// seconds (big-endian), bytes 3-4 the remaining countdown in seconds
/// (big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// Reported power state
    pub power: PowerState,
    /// Timer duration the device was configured with, in seconds
    pub timer_initial_seconds: u16,
    /// Seconds remaining on the running countdown, zero when no timer runs
    pub timer_remaining_seconds: u16,
}

impl StatusReport {
    /// Number of payload bytes a status notification carries
    pub const PAYLOAD_SIZE: usize = 5;

    /// Interpret the payload of a validated status notification frame
    pub fn from_frame(frame: &Frame) -> Result<Self, DecodeError> {
        if frame.payload.len() < Self::PAYLOAD_SIZE {
            return Err(DecodeError::Truncated {
                needed: Self::PAYLOAD_SIZE,
                have: frame.payload.len(),
            });
        }

        Ok(Self {
            power: PowerState::from(frame.payload[0]),
            timer_initial_seconds: u16::from_be_bytes([frame.payload[1], frame.payload[2]]),
            timer_remaining_seconds: u16::from_be_bytes([frame.payload[3], frame.payload[4]]),
        })
    }
}
