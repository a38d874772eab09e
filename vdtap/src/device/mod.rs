//! Transfer engine for the capture board.
//!
//! [`CaptureEngine`](engine::CaptureEngine) drives a [`UsbBackend`]: the real
//! board through [`NusbBackend`](hardware::NusbBackend) or an in-memory one
//! through [`MockBackend`](mock::MockBackend).

pub mod backend;
pub mod engine;
pub mod hardware;
pub mod mock;
pub(crate) mod pool;

pub use backend::{Endpoint, UsbBackend};
pub use engine::{CaptureEngine, DeviceEvent, EngineConfig};
pub use pool::CounterSnapshot;
