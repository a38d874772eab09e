//! The seam between the transfer engine and a USB stack.
//!
//! A backend owns the claimed interface and its two transfer queues. The
//! engine hands it owned buffers on submission and gets every buffer back,
//! exactly once, in a [`Completion`].

use std::sync::Arc;

use crate::utils::errors::BackendError;

/// Index of a transfer slot in the engine's arena.
pub type SlotId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Interrupt endpoint carrying 6-byte status records.
    Status,
    /// Streaming endpoint carrying raw samples.
    Samples,
}

impl Endpoint {
    pub fn address(&self) -> u8 {
        match self {
            Endpoint::Status => 0x81,
            Endpoint::Samples => 0x82,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Cancelled,
    Stalled,
    Disconnected,
    Failed,
}

/// A finished transfer. `buffer` holds the received bytes only.
#[derive(Debug)]
pub struct Completion {
    pub slot: SlotId,
    pub endpoint: Endpoint,
    pub status: TransferStatus,
    pub buffer: Vec<u8>,
}

#[derive(Debug)]
pub enum Wait {
    Completed(Completion),
    /// [`WakeHandle::wake`] was called.
    Woken,
}

/// A submission the backend refused. The buffer is handed back.
#[derive(Debug)]
pub struct SubmitError {
    pub error: BackendError,
    pub buffer: Vec<u8>,
}

/// Interrupts a [`UsbBackend::wait`] in progress on another thread.
pub trait WakeHandle: Send + Sync {
    fn wake(&self);
}

/// Blocking vendor control requests addressed to the claimed interface.
pub trait ControlChannel: Send + Sync {
    /// Returns the number of bytes received.
    fn control_in(&self, request: u8, value: u16, data: &mut [u8]) -> Result<usize, BackendError>;

    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<(), BackendError>;
}

/// Asynchronous transfers against one device interface.
///
/// The streaming side (`submit`, `cancel_all`, `wait`) is driven by a single
/// thread. Control requests go through the [`ControlChannel`] returned by
/// [`claim_interface`](UsbBackend::claim_interface) and may be issued from
/// any thread.
pub trait UsbBackend: Send + 'static {
    fn claim_interface(&mut self) -> Result<Arc<dyn ControlChannel>, BackendError>;

    fn set_alt_setting(&mut self, alt_setting: u8) -> Result<(), BackendError>;

    fn wake_handle(&self) -> Arc<dyn WakeHandle>;

    fn submit(&mut self, endpoint: Endpoint, slot: SlotId, buffer: Vec<u8>)
    -> Result<(), SubmitError>;

    /// Requests cancellation of every pending transfer. Cancelled transfers
    /// still complete through [`wait`](UsbBackend::wait).
    fn cancel_all(&mut self);

    /// Blocks until a transfer completes or the backend is woken.
    fn wait(&mut self) -> Wait;
}
