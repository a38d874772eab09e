use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::warn;

use crate::device::backend::{Endpoint, SlotId, SubmitError};
use crate::utils::errors::BackendError;

/// Lifetime counters of the transfer pool, readable from any thread.
///
/// `allocated` and `freed` count transfer slots. A slot keeps its identity
/// when the worker swaps the buffer it carries for one from the sample
/// [`BufferPool`](crate::utils::buffer_pool::BufferPool), so the swapped
/// buffers are not counted here.
#[derive(Debug, Default)]
pub struct TransferCounters {
    allocated: AtomicUsize,
    freed: AtomicUsize,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub allocated: usize,
    pub freed: usize,
    pub submitted: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl CounterSnapshot {
    /// Slots allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.allocated.saturating_sub(self.freed)
    }

    /// Submissions that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.submitted.saturating_sub(self.completed)
    }
}

impl TransferCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            allocated: self.allocated.load(Ordering::Acquire),
            freed: self.freed.load(Ordering::Acquire),
            submitted: self.submitted.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            cancelled: self.cancelled.load(Ordering::Acquire),
        }
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Pending,
}

#[derive(Debug)]
struct Slot {
    endpoint: Endpoint,
    len: usize,
    /// `None` while the backend holds the buffer.
    buffer: Option<Vec<u8>>,
    state: SlotState,
}

/// Arena of transfer slots with an index-based free list.
///
/// A slot is either idle (listed in `idle`, owning its buffer) or pending
/// (its buffer lent to the backend), never both.
#[derive(Debug)]
pub(crate) struct TransferPool {
    slots: Vec<Slot>,
    idle: Vec<SlotId>,
    pending: usize,
    counters: Arc<TransferCounters>,
}

impl TransferPool {
    pub(crate) fn new(counters: Arc<TransferCounters>) -> Self {
        Self {
            slots: Vec::new(),
            idle: Vec::new(),
            pending: 0,
            counters,
        }
    }

    /// Adds `count` idle slots of `len`-byte transfers on `endpoint`.
    pub(crate) fn allocate(&mut self, endpoint: Endpoint, len: usize, count: usize) {
        for _ in 0..count {
            self.idle.push(self.slots.len());
            self.slots.push(Slot {
                endpoint,
                len,
                buffer: Some(vec![0; len]),
                state: SlotState::Idle,
            });
        }
        self.counters.allocated.fetch_add(count, Ordering::AcqRel);
    }

    /// Lends the buffer of idle `slot` to `submit`. A refused buffer comes
    /// back and the slot stays idle.
    pub(crate) fn submit<F>(&mut self, slot: SlotId, submit: F) -> Result<(), BackendError>
    where
        F: FnOnce(Endpoint, SlotId, Vec<u8>) -> Result<(), SubmitError>,
    {
        let Some(position) = self.idle.iter().rposition(|&s| s == slot) else {
            warn!("Transfer slot {slot} is not idle, not submitting");
            return Ok(());
        };

        let entry = &mut self.slots[slot];
        let mut buffer = entry.buffer.take().unwrap_or_default();
        buffer.resize(entry.len, 0);

        match submit(entry.endpoint, slot, buffer) {
            Ok(()) => {
                entry.state = SlotState::Pending;
                self.idle.swap_remove(position);
                self.pending += 1;
                self.counters.submitted.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(SubmitError { error, buffer }) => {
                entry.buffer = Some(buffer);
                Err(error)
            }
        }
    }

    /// Submits every idle slot, stopping at the first refusal.
    pub(crate) fn submit_all<F>(&mut self, mut submit: F) -> Result<(), BackendError>
    where
        F: FnMut(Endpoint, SlotId, Vec<u8>) -> Result<(), SubmitError>,
    {
        while let Some(&slot) = self.idle.last() {
            self.submit(slot, &mut submit)?;
        }
        Ok(())
    }

    /// Takes back the buffer of a completed transfer and marks its slot idle.
    pub(crate) fn complete(&mut self, slot: SlotId, buffer: Vec<u8>) -> bool {
        let Some(entry) = self.slots.get_mut(slot) else {
            warn!("Completion for unknown transfer slot {slot}");
            return false;
        };
        if entry.state != SlotState::Pending {
            warn!("Completion for idle transfer slot {slot}");
            return false;
        }

        entry.state = SlotState::Idle;
        entry.buffer = Some(buffer);
        self.idle.push(slot);
        self.pending -= 1;
        self.counters.completed.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.len()
    }

    /// Frees every idle slot. Pending slots are left alone.
    pub(crate) fn release_all(&mut self) {
        let mut freed = 0;
        for slot in self.idle.drain(..) {
            if self.slots[slot].buffer.take().is_some() {
                freed += 1;
            }
        }
        self.counters.freed.fetch_add(freed, Ordering::AcqRel);

        if self.pending > 0 {
            warn!("{} transfers still pending at release", self.pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> TransferPool {
        TransferPool::new(Arc::new(TransferCounters::default()))
    }

    #[test]
    fn submit_complete_release() {
        let mut pool = pool();
        pool.allocate(Endpoint::Samples, 8, 3);
        pool.allocate(Endpoint::Status, 6, 1);

        let mut lent = Vec::new();
        pool.submit_all(|endpoint, slot, buffer| {
            lent.push((endpoint, slot, buffer));
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.pending(), 4);
        assert_eq!(pool.idle(), 0);

        for (endpoint, slot, mut buffer) in lent {
            let expected = if endpoint == Endpoint::Status { 6 } else { 8 };
            assert_eq!(buffer.len(), expected);
            buffer.truncate(2);
            assert!(pool.complete(slot, buffer));
        }
        assert_eq!(pool.pending(), 0);

        // a completed slot is idle and gets its full length back
        pool.submit(3, |endpoint, _, buffer| {
            assert_eq!(endpoint, Endpoint::Status);
            assert_eq!(buffer.len(), 6);
            Err(SubmitError {
                error: BackendError::Busy,
                buffer,
            })
        })
        .unwrap_err();
        assert_eq!(pool.idle(), 4);

        pool.release_all();
        let counters = pool.counters.snapshot();
        assert_eq!(counters.allocated, 4);
        assert_eq!(counters.freed, 4);
        assert_eq!(counters.submitted, 4);
        assert_eq!(counters.completed, 4);
        assert_eq!(counters.outstanding(), 0);
    }

    #[test]
    fn refused_submission_stops_submit_all() {
        let mut pool = pool();
        pool.allocate(Endpoint::Samples, 4, 5);

        let mut accepted = 0;
        let result = pool.submit_all(|_, _, buffer| {
            if accepted == 2 {
                return Err(SubmitError {
                    error: BackendError::Transfer("refused".into()),
                    buffer,
                });
            }
            accepted += 1;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(pool.pending(), 2);
        assert_eq!(pool.idle(), 3);
    }

    #[test]
    fn double_completion_is_rejected() {
        let mut pool = pool();
        pool.allocate(Endpoint::Status, 6, 1);
        pool.submit(0, |_, _, _| Ok(())).unwrap();

        assert!(pool.complete(0, vec![0; 6]));
        assert!(!pool.complete(0, vec![0; 6]));
        assert!(!pool.complete(7, Vec::new()));
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn counters_follow_slots_not_buffers() {
        let mut pool = pool();
        pool.allocate(Endpoint::Samples, 8, 1);

        for _ in 0..3 {
            pool.submit(0, |_, _, buffer| {
                assert_eq!(buffer.len(), 8);
                Ok(())
            })
            .unwrap();
            // the backend hands back a different, empty buffer
            assert!(pool.complete(0, Vec::new()));
        }

        pool.release_all();
        let counters = pool.counters.snapshot();
        assert_eq!((counters.allocated, counters.freed), (1, 1));
        assert_eq!((counters.submitted, counters.completed), (3, 3));
        assert_eq!(counters.outstanding(), 0);
    }
}
