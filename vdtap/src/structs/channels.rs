//! Channel assignment of the probed video signals.
//!
//! Every sample byte carries up to five signals, each on its own bit. The
//! firmware reports which bit is which in its status record; any mask may be
//! zero when the signal is not wired.

use std::fmt::Display;

/// Bit masks identifying which bit of each sample carries which signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChannelMapping {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub insert: u8,
    /// Composite horizontal/vertical sync.
    pub hvs: u8,
}

impl ChannelMapping {
    /// Union of all colour and insert masks. Used to compare pixel content
    /// while ignoring the sync bit.
    pub fn data_mask(&self) -> u8 {
        self.red | self.green | self.blue | self.insert
    }

    pub fn flags(&self) -> ChannelFlags {
        ChannelFlags {
            red: self.red != 0,
            green: self.green != 0,
            blue: self.blue != 0,
            insert: self.insert != 0,
        }
    }

    pub fn has_sync(&self) -> bool {
        self.hvs != 0
    }
}

impl Display for ChannelMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "R={:#04X} G={:#04X} B={:#04X} I={:#04X} HVS={:#04X}",
            self.red, self.green, self.blue, self.insert, self.hvs
        )
    }
}

/// Which channels are wired, derived from a [`ChannelMapping`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFlags {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
    pub insert: bool,
}

/// Text mode of the video chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Every pixel is sampled one and a half times on average and must be
    /// de-duplicated before display.
    Columns40,
    #[default]
    Columns80,
}

impl CaptureMode {
    /// Decodes the mode byte of the status record. Bit 0 set means 40 columns.
    pub fn from_status_byte(byte: u8) -> Self {
        if byte & 1 != 0 {
            CaptureMode::Columns40
        } else {
            CaptureMode::Columns80
        }
    }

    pub fn needs_phase_correction(&self) -> bool {
        matches!(self, CaptureMode::Columns40)
    }
}

impl Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Columns40 => write!(f, "40 columns"),
            CaptureMode::Columns80 => write!(f, "80 columns"),
        }
    }
}
