//! Capture hardware through the `nusb` USB stack.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use log::{debug, info};
use nusb::transfer::{Control, ControlType, Queue, Recipient, RequestBuffer, TransferError};
use nusb::{Device, Interface};

use crate::device::backend::{
    Completion, ControlChannel, Endpoint, SlotId, SubmitError, TransferStatus, UsbBackend, Wait,
    WakeHandle,
};
use crate::utils::errors::{BackendError, DeviceError};

pub const VENDOR_ID: u16 = 0x04b4;
pub const PRODUCT_ID: u16 = 0x0083;
pub const INTERFACE: u8 = 0;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

struct EndpointQueue {
    endpoint: Endpoint,
    queue: Queue<RequestBuffer>,
    /// Slots in submission order; the queue completes in the same order.
    slots: VecDeque<SlotId>,
}

/// A capture board reached through `nusb`.
///
/// The sample endpoint is read through a bulk queue, the only streaming
/// transfer type `nusb` offers.
pub struct NusbBackend {
    device: Device,
    interface: Option<Interface>,
    queues: Vec<EndpointQueue>,
    waker: Arc<NusbWaker>,
    wake_rx: UnboundedReceiver<()>,
}

impl NusbBackend {
    /// Opens the first attached board with the given ids.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, DeviceError> {
        let info = nusb::list_devices()
            .map_err(|e| DeviceError::IoSetupFailed(format!("listing USB devices failed: {e}")))?
            .find(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            .ok_or(DeviceError::NotFound {
                vendor_id,
                product_id,
            })?;

        info!(
            "Found capture board {:04x}:{:04x} ({})",
            vendor_id,
            product_id,
            info.product_string().unwrap_or("unnamed")
        );

        let device = info
            .open()
            .map_err(|e| DeviceError::IoSetupFailed(format!("opening device failed: {e}")))?;

        let (wake_tx, wake_rx) = unbounded();
        Ok(Self {
            device,
            interface: None,
            queues: Vec::new(),
            waker: Arc::new(NusbWaker { tx: wake_tx }),
            wake_rx,
        })
    }

    fn queue(&mut self, endpoint: Endpoint) -> Option<&mut EndpointQueue> {
        self.queues.iter_mut().find(|q| q.endpoint == endpoint)
    }
}

impl UsbBackend for NusbBackend {
    fn claim_interface(&mut self) -> Result<Arc<dyn ControlChannel>, BackendError> {
        let interface = self.device.claim_interface(INTERFACE).map_err(|e| {
            if e.kind() == ErrorKind::ResourceBusy {
                BackendError::Busy
            } else {
                BackendError::Io(e)
            }
        })?;

        self.queues = vec![
            EndpointQueue {
                endpoint: Endpoint::Status,
                queue: interface.interrupt_in_queue(Endpoint::Status.address()),
                slots: VecDeque::new(),
            },
            EndpointQueue {
                endpoint: Endpoint::Samples,
                queue: interface.bulk_in_queue(Endpoint::Samples.address()),
                slots: VecDeque::new(),
            },
        ];
        self.interface = Some(interface.clone());

        Ok(Arc::new(NusbControl { interface }))
    }

    fn set_alt_setting(&mut self, alt_setting: u8) -> Result<(), BackendError> {
        let interface = self.interface.as_ref().ok_or(BackendError::Disconnected)?;
        interface.set_alt_setting(alt_setting)?;
        debug!("Interface {INTERFACE} alt setting {alt_setting} selected");
        Ok(())
    }

    fn wake_handle(&self) -> Arc<dyn WakeHandle> {
        self.waker.clone()
    }

    fn submit(
        &mut self,
        endpoint: Endpoint,
        slot: SlotId,
        buffer: Vec<u8>,
    ) -> Result<(), SubmitError> {
        let Some(queue) = self.queue(endpoint) else {
            return Err(SubmitError {
                error: BackendError::Disconnected,
                buffer,
            });
        };

        let len = buffer.len();
        queue.queue.submit(RequestBuffer::reuse(buffer, len));
        queue.slots.push_back(slot);
        Ok(())
    }

    fn cancel_all(&mut self) {
        for queue in &mut self.queues {
            queue.queue.cancel_all();
        }
    }

    fn wait(&mut self) -> Wait {
        let Self {
            queues, wake_rx, ..
        } = self;

        futures::executor::block_on(futures::future::poll_fn(|cx| {
            if let Poll::Ready(Some(())) = wake_rx.poll_next_unpin(cx) {
                return Poll::Ready(Wait::Woken);
            }

            for queue in queues.iter_mut() {
                if queue.queue.pending() == 0 {
                    continue;
                }
                if let Poll::Ready(completion) = queue.queue.poll_next(cx) {
                    let slot = queue.slots.pop_front().unwrap_or_default();
                    return Poll::Ready(Wait::Completed(Completion {
                        slot,
                        endpoint: queue.endpoint,
                        status: transfer_status(completion.status),
                        buffer: completion.data,
                    }));
                }
            }

            Poll::Pending
        }))
    }
}

fn transfer_status(status: Result<(), TransferError>) -> TransferStatus {
    match status {
        Ok(()) => TransferStatus::Completed,
        Err(TransferError::Cancelled) => TransferStatus::Cancelled,
        Err(TransferError::Stall) => TransferStatus::Stalled,
        Err(TransferError::Disconnected) => TransferStatus::Disconnected,
        Err(_) => TransferStatus::Failed,
    }
}

struct NusbWaker {
    tx: UnboundedSender<()>,
}

impl WakeHandle for NusbWaker {
    fn wake(&self) {
        // The receiver lives as long as the backend.
        let _ = self.tx.unbounded_send(());
    }
}

struct NusbControl {
    interface: Interface,
}

impl NusbControl {
    fn control(request: u8, value: u16) -> Control {
        Control {
            control_type: ControlType::Vendor,
            recipient: Recipient::Interface,
            request,
            value,
            index: u16::from(INTERFACE),
        }
    }
}

impl ControlChannel for NusbControl {
    fn control_in(&self, request: u8, value: u16, data: &mut [u8]) -> Result<usize, BackendError> {
        self.interface
            .control_in_blocking(Self::control(request, value), data, CONTROL_TIMEOUT)
            .map_err(|e| BackendError::Transfer(e.to_string()))
    }

    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<(), BackendError> {
        self.interface
            .control_out_blocking(Self::control(request, value), data, CONTROL_TIMEOUT)
            .map(|_| ())
            .map_err(|e| BackendError::Transfer(e.to_string()))
    }
}
