//! An in-memory capture device.
//!
//! [`MockBackend`] behaves like the real firmware as far as the engine can
//! tell: it answers the handshake and register requests and holds submitted
//! transfers until a [`MockHandle`] completes, fails or cancels them.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::device::backend::{
    Completion, ControlChannel, Endpoint, SlotId, SubmitError, TransferStatus, UsbBackend, Wait,
    WakeHandle,
};
use crate::device::engine::{REQUEST_BUS, REQUEST_STATUS};
use crate::structs::status::FIRMWARE_STATUS_LEN;
use crate::utils::errors::BackendError;

/// Handshake record of a board with the default wiring and an EF9345 in
/// 80-column mode.
pub const DEFAULT_FIRMWARE_STATUS: [u8; FIRMWARE_STATUS_LEN] =
    [0x02, 0x04, 0x08, 0x01, 0x80, 0x00, 0x01];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCounts {
    pub submitted: usize,
    pub cancelled: usize,
    /// Completions handed to the engine through `wait`.
    pub delivered: usize,
    pub control_requests: usize,
}

#[derive(Debug, Default)]
struct MockState {
    firmware_status: [u8; FIRMWARE_STATUS_LEN],
    registers: [u8; 16],
    last_control_value: Option<u16>,
    alt_setting: Option<u8>,

    claim_busy: bool,
    control_fails: bool,
    alt_setting_fails: bool,
    submit_limit: Option<usize>,
    /// `wait` delivers nothing while set.
    paused: bool,

    status_pending: VecDeque<(SlotId, Vec<u8>)>,
    samples_pending: VecDeque<(SlotId, Vec<u8>)>,
    completed: VecDeque<Completion>,
    woken: bool,

    counts: MockCounts,
}

impl MockState {
    fn pending_mut(&mut self, endpoint: Endpoint) -> &mut VecDeque<(SlotId, Vec<u8>)> {
        match endpoint {
            Endpoint::Status => &mut self.status_pending,
            Endpoint::Samples => &mut self.samples_pending,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<MockState>,
    changed: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_firmware_status(DEFAULT_FIRMWARE_STATUS)
    }
}

impl MockBackend {
    pub fn with_firmware_status(record: [u8; FIRMWARE_STATUS_LEN]) -> Self {
        let inner = Arc::new(Inner::default());
        inner.lock().firmware_status = record;
        Self { inner }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            inner: self.inner.clone(),
        }
    }
}

impl UsbBackend for MockBackend {
    fn claim_interface(&mut self) -> Result<Arc<dyn ControlChannel>, BackendError> {
        if self.inner.lock().claim_busy {
            return Err(BackendError::Busy);
        }
        Ok(Arc::new(MockControl {
            inner: self.inner.clone(),
        }))
    }

    fn set_alt_setting(&mut self, alt_setting: u8) -> Result<(), BackendError> {
        let mut state = self.inner.lock();
        if state.alt_setting_fails {
            return Err(BackendError::Transfer("alt setting rejected".into()));
        }
        state.alt_setting = Some(alt_setting);
        Ok(())
    }

    fn wake_handle(&self) -> Arc<dyn WakeHandle> {
        Arc::new(MockWaker {
            inner: self.inner.clone(),
        })
    }

    fn submit(
        &mut self,
        endpoint: Endpoint,
        slot: SlotId,
        buffer: Vec<u8>,
    ) -> Result<(), SubmitError> {
        let mut state = self.inner.lock();
        if let Some(remaining) = state.submit_limit.as_mut() {
            if *remaining == 0 {
                return Err(SubmitError {
                    error: BackendError::Transfer("submission refused".into()),
                    buffer,
                });
            }
            *remaining -= 1;
        }

        state.pending_mut(endpoint).push_back((slot, buffer));
        state.counts.submitted += 1;
        self.inner.changed.notify_all();
        Ok(())
    }

    fn cancel_all(&mut self) {
        let mut state = self.inner.lock();
        for endpoint in [Endpoint::Status, Endpoint::Samples] {
            let cancelled: Vec<_> = state.pending_mut(endpoint).drain(..).collect();
            state.counts.cancelled += cancelled.len();
            for (slot, mut buffer) in cancelled {
                buffer.clear();
                state.completed.push_back(Completion {
                    slot,
                    endpoint,
                    status: TransferStatus::Cancelled,
                    buffer,
                });
            }
        }
        self.inner.changed.notify_all();
    }

    fn wait(&mut self) -> Wait {
        let mut state = self.inner.lock();
        loop {
            if !state.paused {
                if state.woken {
                    state.woken = false;
                    return Wait::Woken;
                }
                if let Some(completion) = state.completed.pop_front() {
                    state.counts.delivered += 1;
                    return Wait::Completed(completion);
                }
            }
            state = self
                .inner
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct MockWaker {
    inner: Arc<Inner>,
}

impl WakeHandle for MockWaker {
    fn wake(&self) {
        self.inner.lock().woken = true;
        self.inner.changed.notify_all();
    }
}

struct MockControl {
    inner: Arc<Inner>,
}

impl ControlChannel for MockControl {
    fn control_in(&self, request: u8, value: u16, data: &mut [u8]) -> Result<usize, BackendError> {
        let mut state = self.inner.lock();
        state.counts.control_requests += 1;
        state.last_control_value = Some(value);
        if state.control_fails {
            return Err(BackendError::Transfer("control request stalled".into()));
        }

        let reply: &[u8] = match request {
            REQUEST_STATUS => &state.firmware_status,
            REQUEST_BUS => std::slice::from_ref(&state.registers[usize::from(value & 0x0F)]),
            _ => return Err(BackendError::Transfer(format!("unknown request {request:#04x}"))),
        };

        let n = reply.len().min(data.len());
        data[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn control_out(&self, request: u8, value: u16, _data: &[u8]) -> Result<(), BackendError> {
        let mut state = self.inner.lock();
        state.counts.control_requests += 1;
        state.last_control_value = Some(value);
        if state.control_fails {
            return Err(BackendError::Transfer("control request stalled".into()));
        }
        if request != REQUEST_BUS {
            return Err(BackendError::Transfer(format!("unknown request {request:#04x}")));
        }

        state.registers[usize::from(value & 0x0F)] = (value >> 8) as u8;
        Ok(())
    }
}

/// Test-side view of a [`MockBackend`]. Clones share the same device.
#[derive(Debug, Clone)]
pub struct MockHandle {
    inner: Arc<Inner>,
}

impl MockHandle {
    /// Completes the oldest pending transfer on `endpoint` with `data`,
    /// truncated to the transfer length. Returns `false` if none is pending.
    pub fn complete(&self, endpoint: Endpoint, status: TransferStatus, data: &[u8]) -> bool {
        let mut state = self.inner.lock();
        let Some((slot, mut buffer)) = state.pending_mut(endpoint).pop_front() else {
            return false;
        };

        let n = data.len().min(buffer.len());
        buffer[..n].copy_from_slice(&data[..n]);
        buffer.truncate(n);

        state.completed.push_back(Completion {
            slot,
            endpoint,
            status,
            buffer,
        });
        self.inner.changed.notify_all();
        true
    }

    pub fn complete_samples(&self, data: &[u8]) -> bool {
        self.complete(Endpoint::Samples, TransferStatus::Completed, data)
    }

    pub fn complete_status(&self, record: &[u8]) -> bool {
        self.complete(Endpoint::Status, TransferStatus::Completed, record)
    }

    /// Fails the oldest pending transfer on `endpoint`.
    pub fn fail_next(&self, endpoint: Endpoint) -> bool {
        self.complete(endpoint, TransferStatus::Failed, &[])
    }

    pub fn pending(&self, endpoint: Endpoint) -> usize {
        self.inner.lock().pending_mut(endpoint).len()
    }

    /// Waits until at least `count` transfers are pending on `endpoint`.
    pub fn wait_for_pending(&self, endpoint: Endpoint, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        while state.pending_mut(endpoint).len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Accept only `limit` more submissions; `None` lifts the limit.
    pub fn set_submit_limit(&self, limit: Option<usize>) {
        self.inner.lock().submit_limit = limit;
    }

    /// Holds back every completion and wake-up from the engine until
    /// unpaused.
    pub fn set_paused(&self, paused: bool) {
        self.inner.lock().paused = paused;
        self.inner.changed.notify_all();
    }

    pub fn set_claim_busy(&self, busy: bool) {
        self.inner.lock().claim_busy = busy;
    }

    pub fn set_control_fails(&self, fails: bool) {
        self.inner.lock().control_fails = fails;
    }

    pub fn set_alt_setting_fails(&self, fails: bool) {
        self.inner.lock().alt_setting_fails = fails;
    }

    pub fn register(&self, raw: u8) -> u8 {
        self.inner.lock().registers[usize::from(raw & 0x0F)]
    }

    pub fn set_register(&self, raw: u8, value: u8) {
        self.inner.lock().registers[usize::from(raw & 0x0F)] = value;
    }

    pub fn last_control_value(&self) -> Option<u16> {
        self.inner.lock().last_control_value
    }

    pub fn alt_setting(&self) -> Option<u8> {
        self.inner.lock().alt_setting
    }

    pub fn counts(&self) -> MockCounts {
        self.inner.lock().counts
    }
}
