pub mod capture;
pub mod command;
pub mod progress;
pub mod register;
pub mod replay;
pub mod serve;

use std::sync::mpsc::Receiver;

use vdtap::device::hardware::NusbBackend;
use vdtap::device::{CaptureEngine, DeviceEvent, EngineConfig};
use vdtap::utils::errors::DeviceError;

use crate::config::Config;

/// Finds the board named in `config` and starts a capture session on it.
pub fn open_engine(config: &Config) -> Result<(CaptureEngine, Receiver<DeviceEvent>), DeviceError> {
    let backend = NusbBackend::open(config.device.vendor_id, config.device.product_id)?;
    CaptureEngine::open(backend, &config.transfers.engine_config())
}

/// Starts a session with one transfer per endpoint, for commands that only
/// use the control pipe.
pub fn open_control_engine(
    config: &Config,
) -> Result<(CaptureEngine, Receiver<DeviceEvent>), DeviceError> {
    let backend = NusbBackend::open(config.device.vendor_id, config.device.product_id)?;
    CaptureEngine::open(backend, &control_engine_config(config))
}

fn control_engine_config(config: &Config) -> EngineConfig {
    EngineConfig {
        sample_transfers: 1,
        status_transfers: 1,
        ..config.transfers.engine_config()
    }
}

#[test]
fn control_sessions_use_a_minimal_pool() {
    let config = Config::default();
    let engine = control_engine_config(&config);
    assert_eq!(engine.sample_transfers, 1);
    assert_eq!(engine.status_transfers, 1);
    assert_eq!(
        engine.sample_transfer_len(),
        config.transfers.engine_config().sample_transfer_len()
    );
}
