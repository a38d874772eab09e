use crate::device::backend::{
    Completion, ControlChannel, Endpoint, TransferStatus, UsbBackend, Wait, WakeHandle,
};
use crate::device::pool::{CounterSnapshot, TransferCounters, TransferPool};
use crate::structs::register::Register;
use crate::structs::status::{ChipStatus, FIRMWARE_STATUS_LEN, STATUS_LEN, VideoChipType};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::errors::DeviceError;
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Vendor request reading or writing a video chip register.
pub const REQUEST_BUS: u8 = 0x10;
/// Vendor request returning the status record followed by the chip type.
pub const REQUEST_STATUS: u8 = 0x11;
/// Alternate setting of interface 0 that enables the sample endpoint.
pub const STREAMING_ALT_SETTING: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Transfers kept in flight on the sample endpoint.
    pub sample_transfers: usize,
    pub packets_per_transfer: usize,
    pub packet_size: usize,
    /// Transfers kept in flight on the status endpoint.
    pub status_transfers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_transfers: 500,
            packets_per_transfer: 16,
            packet_size: 2048,
            status_transfers: 1,
        }
    }
}

impl EngineConfig {
    pub fn sample_transfer_len(&self) -> usize {
        self.packets_per_transfer * self.packet_size
    }
}

/// Everything the worker reports, in completion order.
#[derive(Debug)]
pub enum DeviceEvent {
    StatusUpdated(ChipStatus),
    /// One sample transfer's worth of data. The buffer comes from
    /// [`CaptureEngine::sample_buffers`] and may be given back to it.
    SamplesReceived(Vec<u8>),
    /// The session has ended. Sent at most once.
    TransferFailed(DeviceError),
}

struct Shared {
    closing: AtomicBool,
    error: Mutex<Option<DeviceError>>,
    status: Mutex<ChipStatus>,
    events: Mutex<Option<Sender<DeviceEvent>>>,
    waker: Arc<dyn WakeHandle>,
    counters: Arc<TransferCounters>,
}

impl Shared {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn send(&self, event: DeviceEvent) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            // The consumer may be gone already; nothing left to tell it.
            let _ = tx.send(event);
        }
    }

    /// Records a fatal error and starts closing. Only the first error of a
    /// session is kept and reported.
    fn fail(&self, error: DeviceError) {
        if self.closing.swap(true, Ordering::AcqRel) {
            debug!("Suppressing error after shutdown began: {error}");
            return;
        }

        error!("Capture device failed: {error}");
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
        self.send(DeviceEvent::TransferFailed(error));
        self.waker.wake();
    }
}

/// Keeps the status and sample endpoints of a capture device busy.
///
/// Opening performs the firmware handshake and submits the whole transfer
/// pool; a background worker then resubmits every transfer as soon as it
/// completes and forwards the data as [`DeviceEvent`]s. Any transfer error
/// ends the session. Closing cancels everything in flight and waits until
/// the backend has handed every buffer back.
pub struct CaptureEngine {
    shared: Arc<Shared>,
    control: Arc<dyn ControlChannel>,
    chip_type: VideoChipType,
    sample_buffers: BufferPool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureEngine {
    pub fn open<B: UsbBackend>(
        mut backend: B,
        config: &EngineConfig,
    ) -> Result<(Self, Receiver<DeviceEvent>), DeviceError> {
        let control = backend.claim_interface().map_err(|e| {
            warn!("Failed to claim interface: {e}");
            DeviceError::DeviceBusy
        })?;

        let mut record = [0u8; FIRMWARE_STATUS_LEN];
        let received = control
            .control_in(REQUEST_STATUS, 0, &mut record)
            .map_err(|e| DeviceError::IoSetupFailed(format!("status request failed: {e}")))?;
        if received != FIRMWARE_STATUS_LEN {
            return Err(DeviceError::IoSetupFailed(format!(
                "status request returned {received} bytes, expected {FIRMWARE_STATUS_LEN}"
            )));
        }

        backend
            .set_alt_setting(STREAMING_ALT_SETTING)
            .map_err(|e| DeviceError::IoSetupFailed(format!("selecting alt setting failed: {e}")))?;

        let chip_byte = record[STATUS_LEN];
        let Some(chip_type) = VideoChipType::from_firmware_byte(chip_byte) else {
            error!("Unexpected chip type byte from firmware: {chip_byte}");
            return Err(DeviceError::NoVideoChipDetected(chip_byte));
        };
        info!("Detected {chip_type}");

        let status = ChipStatus::from_bytes(&record)
            .map_err(|e| DeviceError::IoSetupFailed(e.to_string()))?;
        info!(
            "Status bytes: {:02x?} ({}, {})",
            &record[..STATUS_LEN],
            status.channels,
            status.mode
        );

        let counters = Arc::new(TransferCounters::default());
        let mut pool = TransferPool::new(counters.clone());
        pool.allocate(
            Endpoint::Samples,
            config.sample_transfer_len(),
            config.sample_transfers,
        );
        pool.allocate(Endpoint::Status, STATUS_LEN, config.status_transfers);

        if let Err(e) = pool.submit_all(|endpoint, slot, buffer| backend.submit(endpoint, slot, buffer))
        {
            error!(
                "Submitting transfers failed after {} of {}: {e}",
                pool.pending(),
                config.sample_transfers + config.status_transfers
            );
            drain(&mut backend, &mut pool, &counters);
            return Err(DeviceError::IoSetupFailed(format!("transfer submission failed: {e}")));
        }
        debug!("{} transfers submitted", pool.pending());

        let (tx, rx) = mpsc::channel();
        let sample_buffers = BufferPool::new(config.sample_transfers, config.sample_transfer_len());

        let shared = Arc::new(Shared {
            closing: AtomicBool::new(false),
            error: Mutex::new(None),
            status: Mutex::new(status),
            events: Mutex::new(Some(tx)),
            waker: backend.wake_handle(),
            counters,
        });

        let worker = Worker {
            backend,
            pool,
            shared: shared.clone(),
            sample_buffers: sample_buffers.clone(),
        };
        let handle = thread::spawn(move || worker.run());

        Ok((
            Self {
                shared,
                control,
                chip_type,
                sample_buffers,
                worker: Mutex::new(Some(handle)),
            },
            rx,
        ))
    }

    /// Stops the session and waits for the worker to release every transfer.
    ///
    /// Safe to call repeatedly and from several threads; every caller
    /// returns once teardown is complete.
    pub fn close(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = worker.take() else {
            return;
        };

        if !self.shared.closing.swap(true, Ordering::AcqRel) {
            info!("Closing capture device");
        }
        self.shared.waker.wake();

        if handle.join().is_err() {
            error!("Transfer worker panicked");
        }

        let counters = self.counters();
        debug!(
            "Transfers: {} allocated, {} freed, {} submitted, {} completed, {} cancelled",
            counters.allocated,
            counters.freed,
            counters.submitted,
            counters.completed,
            counters.cancelled
        );
    }

    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }

    /// The detected chip, or `None` once the session is closing.
    pub fn chip_type(&self) -> Option<VideoChipType> {
        (!self.is_closing()).then_some(self.chip_type)
    }

    /// The latest status record, or `None` once the session is closing.
    pub fn status(&self) -> Option<ChipStatus> {
        if self.is_closing() {
            return None;
        }
        Some(*self.shared.status.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// The error that ended the session, if one did.
    pub fn error(&self) -> Option<DeviceError> {
        self.shared
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Pool the [`DeviceEvent::SamplesReceived`] buffers are drawn from.
    pub fn sample_buffers(&self) -> BufferPool {
        self.sample_buffers.clone()
    }

    pub fn bus_read(&self, register: Register) -> Result<u8, DeviceError> {
        if self.is_closing() {
            return Err(DeviceError::Closed);
        }

        let mut data = [0u8; 1];
        match self
            .control
            .control_in(REQUEST_BUS, u16::from(register.raw()), &mut data)
        {
            Ok(1) => {
                trace!("{register} -> {:02X}", data[0]);
                Ok(data[0])
            }
            Ok(n) => Err(self.bus_failure(format!("reading {register} returned {n} bytes"))),
            Err(e) => Err(self.bus_failure(format!("reading {register} failed: {e}"))),
        }
    }

    pub fn bus_write(&self, register: Register, value: u8) -> Result<(), DeviceError> {
        if self.is_closing() {
            return Err(DeviceError::Closed);
        }

        let request_value = (u16::from(value) << 8) | u16::from(register.raw());
        self.control
            .control_out(REQUEST_BUS, request_value, &[])
            .map_err(|e| self.bus_failure(format!("writing {register} failed: {e}")))?;

        trace!("{register} <- {value:02X}");
        Ok(())
    }

    fn bus_failure(&self, message: String) -> DeviceError {
        let error = DeviceError::Io(message);
        self.shared.fail(error.clone());
        error
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cancels everything in flight and waits for the backend to return it,
/// then frees the pool.
fn drain<B: UsbBackend>(backend: &mut B, pool: &mut TransferPool, counters: &TransferCounters) {
    backend.cancel_all();
    while pool.pending() > 0 {
        if let Wait::Completed(completion) = backend.wait() {
            if completion.status == TransferStatus::Cancelled {
                counters.record_cancelled();
            }
            pool.complete(completion.slot, completion.buffer);
        }
    }
    pool.release_all();
}

struct Worker<B: UsbBackend> {
    backend: B,
    pool: TransferPool,
    shared: Arc<Shared>,
    sample_buffers: BufferPool,
}

impl<B: UsbBackend> Worker<B> {
    fn run(mut self) {
        debug!("Transfer worker started");
        let mut cancelled = false;

        while self.pool.pending() > 0 {
            if !cancelled && self.shared.is_closing() {
                debug!("Cancelling {} pending transfers", self.pool.pending());
                self.backend.cancel_all();
                cancelled = true;
            }

            match self.backend.wait() {
                Wait::Completed(completion) => self.handle_completion(completion),
                Wait::Woken => continue,
            }
        }

        self.pool.release_all();
        // Disconnects the consumer's receiver.
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("Transfer worker stopped");
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            slot,
            endpoint,
            status,
            mut buffer,
        } = completion;

        match status {
            TransferStatus::Completed => {
                if !self.shared.is_closing() {
                    buffer = self.dispatch(endpoint, buffer);
                }
            }
            TransferStatus::Cancelled => {
                self.shared.counters.record_cancelled();
                if !self.shared.is_closing() {
                    self.shared.fail(DeviceError::Io(format!(
                        "{endpoint:?} transfer cancelled unexpectedly"
                    )));
                }
            }
            TransferStatus::Disconnected => {
                self.shared
                    .fail(DeviceError::Io("device disconnected".to_string()));
            }
            other => {
                self.shared
                    .fail(DeviceError::Io(format!("{endpoint:?} transfer {other:?}")));
            }
        }

        self.pool.complete(slot, buffer);

        if self.shared.is_closing() {
            return;
        }
        let backend = &mut self.backend;
        match self
            .pool
            .submit(slot, |endpoint, slot, buffer| backend.submit(endpoint, slot, buffer))
        {
            Err(e) => self
                .shared
                .fail(DeviceError::Io(format!("resubmitting transfer failed: {e}"))),
            // Closing began between the check above and the submission.
            Ok(()) if self.shared.is_closing() => self.backend.cancel_all(),
            Ok(()) => {}
        }
    }

    /// Forwards a completed transfer and returns the buffer to resubmit.
    fn dispatch(&mut self, endpoint: Endpoint, buffer: Vec<u8>) -> Vec<u8> {
        match endpoint {
            Endpoint::Status => {
                match ChipStatus::from_bytes(&buffer) {
                    Ok(status) => {
                        let mut current =
                            self.shared.status.lock().unwrap_or_else(PoisonError::into_inner);
                        if *current != status {
                            info!("Status changed: {}, {}", status.channels, status.mode);
                        }
                        *current = status;
                        drop(current);
                        self.shared.send(DeviceEvent::StatusUpdated(status));
                    }
                    Err(e) => warn!("Ignoring status record: {e}"),
                }
                buffer
            }
            Endpoint::Samples => {
                if buffer.is_empty() {
                    return buffer;
                }
                // Hand the filled buffer over and resubmit a pooled one.
                let replacement = self.sample_buffers.acquire();
                self.shared.send(DeviceEvent::SamplesReceived(buffer));
                replacement
            }
        }
    }
}
