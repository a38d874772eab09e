use crate::device::engine::DeviceEvent;
use crate::process::decode::{DecodedFrame, FrameDecoder};
use crate::process::sync::{SyncStats, Synchronizer};
use crate::structs::status::ChipStatus;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::errors::{DeviceError, SyncError};
use log::info;

/// Single consumer of a capture session: follows the status updates, feeds
/// samples to the [`Synchronizer`] and decodes every frame it completes.
#[derive(Debug)]
pub struct CapturePipeline {
    status: ChipStatus,
    synchronizer: Synchronizer,
    decoder: FrameDecoder,
    buffer_pool: Option<BufferPool>,
}

impl CapturePipeline {
    pub fn new(status: ChipStatus) -> Self {
        Self {
            status,
            synchronizer: Synchronizer::default(),
            decoder: FrameDecoder::default(),
            buffer_pool: None,
        }
    }

    /// Gives sample buffers back to `pool` once they have been consumed.
    pub fn with_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    /// Handles one engine event, calling `on_frame` for every decoded frame.
    ///
    /// Returns the error carried by [`DeviceEvent::TransferFailed`]; the
    /// session is over at that point.
    pub fn handle_event<F>(&mut self, event: DeviceEvent, on_frame: F) -> Result<usize, DeviceError>
    where
        F: FnMut(DecodedFrame),
    {
        match event {
            DeviceEvent::StatusUpdated(status) => {
                if status != self.status {
                    info!("Now capturing {} in {}", status.channels, status.mode);
                }
                self.status = status;
                Ok(0)
            }
            DeviceEvent::SamplesReceived(samples) => {
                // Missing sync channel is already logged by the synchronizer.
                let frames = self.push_samples(&samples, on_frame).unwrap_or(0);
                if let Some(pool) = &self.buffer_pool {
                    pool.release(samples);
                }
                Ok(frames)
            }
            DeviceEvent::TransferFailed(error) => Err(error),
        }
    }

    /// Feeds samples captured under the current status. Returns the number
    /// of frames decoded.
    pub fn push_samples<F>(&mut self, samples: &[u8], mut on_frame: F) -> Result<usize, SyncError>
    where
        F: FnMut(DecodedFrame),
    {
        let status = self.status;
        self.synchronizer.push_samples(samples, status.channels)?;

        let mut frames = 0;
        while let Some(item) = self.synchronizer.next() {
            // Sync losses are logged and counted by the synchronizer.
            if let Ok(frame) = item {
                on_frame(self.decoder.decode(&frame, status));
                frames += 1;
            }
        }
        Ok(frames)
    }

    pub fn status(&self) -> ChipStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ChipStatus) {
        self.status = status;
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.synchronizer.stats()
    }

    /// Forgets partial rows and screens, e.g. when the device reconnects.
    pub fn reset(&mut self) {
        self.synchronizer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::engine::{CaptureEngine, EngineConfig};
    use crate::device::mock::MockBackend;
    use crate::process::sync::tests::{row, screen};
    use crate::structs::channels::{CaptureMode, ChannelMapping};
    use std::time::Duration;

    fn status() -> ChipStatus {
        ChipStatus {
            channels: ChannelMapping {
                red: 0x02,
                green: 0x04,
                blue: 0x08,
                insert: 0x01,
                hvs: 0x80,
            },
            mode: CaptureMode::Columns80,
        }
    }

    fn stream() -> Vec<u8> {
        let mut samples = Vec::new();
        for _ in 0..3 {
            samples.extend(screen(40, 2, 6));
        }
        samples.extend(row(40, false, 0));
        samples.push(0);
        samples
    }

    #[test]
    fn frames_carry_capture_settings() -> anyhow::Result<()> {
        let mut pipeline = CapturePipeline::new(status());
        let mut frames = Vec::new();

        let count = pipeline.push_samples(&stream(), |frame| frames.push(frame))?;
        assert_eq!(count, 2);
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(frame.channels(), status().channels);
            assert_eq!(frame.mode(), CaptureMode::Columns80);
            assert_eq!(frame.image().width(), 40);
        }
        Ok(())
    }

    #[test]
    fn transfer_failure_is_returned() {
        let mut pipeline = CapturePipeline::new(status());
        let result = pipeline.handle_event(
            DeviceEvent::TransferFailed(DeviceError::Io("gone".into())),
            |_| {},
        );
        assert_eq!(result, Err(DeviceError::Io("gone".into())));
    }

    #[test]
    fn status_update_switches_mapping() -> anyhow::Result<()> {
        let mut pipeline = CapturePipeline::new(status());
        let mut updated = status();
        updated.channels.hvs = 0;
        pipeline.handle_event(DeviceEvent::StatusUpdated(updated), |_| {})?;

        // no sync channel: samples are dropped without failing the session
        let frames = pipeline.handle_event(DeviceEvent::SamplesReceived(stream()), |_| {})?;
        assert_eq!(frames, 0);
        assert_eq!(pipeline.status(), updated);
        Ok(())
    }

    #[test]
    fn end_to_end_with_mock_device() -> anyhow::Result<()> {
        let backend = MockBackend::default();
        let handle = backend.handle();
        let config = EngineConfig {
            sample_transfers: 4,
            packets_per_transfer: 4,
            packet_size: 64,
            status_transfers: 1,
        };
        let (engine, rx) = CaptureEngine::open(backend, &config)?;
        let mut pipeline = CapturePipeline::new(engine.status().unwrap_or_default())
            .with_buffer_pool(engine.sample_buffers());

        let samples = stream();
        for chunk in samples.chunks(config.sample_transfer_len()) {
            assert!(handle.wait_for_pending(
                crate::device::Endpoint::Samples,
                1,
                Duration::from_secs(5)
            ));
            assert!(handle.complete_samples(chunk));
        }

        let mut frames = 0;
        let mut chunks = 0;
        while chunks < samples.chunks(config.sample_transfer_len()).count() {
            let event = rx.recv_timeout(Duration::from_secs(5))?;
            if matches!(event, DeviceEvent::SamplesReceived(_)) {
                chunks += 1;
            }
            frames += pipeline.handle_event(event, |_| {})?;
        }
        assert_eq!(frames, 2);
        assert!(engine.sample_buffers().idle() > 0);

        engine.close();
        let counters = engine.counters();
        assert_eq!(counters.allocated, counters.freed);
        Ok(())
    }
}
