/// Failures of the capture device or of the transfer engine driving it.
///
/// Every variant except [`DeviceError::Closed`] ends the capture session.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No capture device with id {vendor_id:04x}:{product_id:04x} found")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("Capture device is in use by another program")]
    DeviceBusy,

    #[error("Capture device setup failed: {0}")]
    IoSetupFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Capture device did not detect any video chip (status byte {0:#04X})")]
    NoVideoChipDetected(u8),

    #[error("Capture engine is closed")]
    Closed,
}

/// Failures reported by a [`UsbBackend`](crate::device::UsbBackend).
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("Interface is busy")]
    Busy,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conditions raised by the row/frame synchronizer.
///
/// The sync-lost variants are recovered from internally; they are reported
/// only so that consumers can count them.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Channel mapping has no HVS channel, dropping samples")]
    NoSyncChannel,

    #[error("Failed to horizontally sync: {0} samples without HSYNC")]
    HorizontalSyncLost(usize),

    #[error("Failed to vertically sync: {0} rows without VSYNC")]
    VerticalSyncLost(usize),
}

impl SyncError {
    pub fn is_sync_lost(&self) -> bool {
        matches!(
            self,
            SyncError::HorizontalSyncLost(_) | SyncError::VerticalSyncLost(_)
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Status record too short: {found} bytes, expected {expected}")]
    TooShort { found: usize, expected: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterParseError {
    #[error("Register name must look like R0..R7 or ER0..ER7, got {0:?}")]
    InvalidName(String),

    #[error("Register number {0} out of range (0-15)")]
    OutOfRange(u8),
}
