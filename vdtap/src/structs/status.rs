//! Status records reported by the capture firmware.

use std::fmt::Display;

use crate::structs::channels::{CaptureMode, ChannelMapping};
use crate::utils::errors::StatusError;

/// Length of a status record on the status endpoint.
pub const STATUS_LEN: usize = 6;

/// Length of the status record returned by the initial handshake: the
/// regular record followed by the chip type byte.
pub const FIRMWARE_STATUS_LEN: usize = STATUS_LEN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoChipType {
    Ef9345,
    Ts9347,
}

impl VideoChipType {
    /// Decodes the chip type byte of the handshake record.
    ///
    /// Returns `None` when the firmware did not detect a chip.
    pub fn from_firmware_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(VideoChipType::Ef9345),
            2 => Some(VideoChipType::Ts9347),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoChipType::Ef9345 => "EF9345",
            VideoChipType::Ts9347 => "TS9347",
        }
    }
}

impl Display for VideoChipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel assignment and text mode currently reported by the firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChipStatus {
    pub channels: ChannelMapping,
    pub mode: CaptureMode,
}

impl ChipStatus {
    /// Decodes `[red, green, blue, insert, hvs, mode]`.
    ///
    /// Trailing bytes beyond the record are ignored so the handshake record
    /// can be passed as is.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StatusError> {
        let Some(record) = bytes.get(..STATUS_LEN) else {
            return Err(StatusError::TooShort {
                found: bytes.len(),
                expected: STATUS_LEN,
            });
        };

        Ok(Self {
            channels: ChannelMapping {
                red: record[0],
                green: record[1],
                blue: record[2],
                insert: record[3],
                hvs: record[4],
            },
            mode: CaptureMode::from_status_byte(record[5]),
        })
    }

    pub fn to_bytes(&self) -> [u8; STATUS_LEN] {
        let c = &self.channels;
        let mode = match self.mode {
            CaptureMode::Columns40 => 1,
            CaptureMode::Columns80 => 0,
        };
        [c.red, c.green, c.blue, c.insert, c.hvs, mode]
    }
}
