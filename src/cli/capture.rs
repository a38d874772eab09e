use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar};
use vdtap::device::{CaptureEngine, CounterSnapshot, DeviceEvent};
use vdtap::process::decode::DecodedFrame;
use vdtap::process::pipeline::CapturePipeline;
use vdtap::process::sync::SyncStats;
use vdtap::structs::channels::CaptureMode;
use vdtap::structs::frame::CropRect;
use vdtap::utils::errors::DeviceError;

use super::command::CaptureArgs;
use super::open_engine;
use super::progress::{create_spinner, frame_rate};
use crate::config::Config;

/// Geometry of a decoded frame, logged whenever it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub width: usize,
    pub height: usize,
    pub crop: CropRect,
    pub mode: CaptureMode,
}

impl FrameShape {
    pub fn of(frame: &DecodedFrame) -> Self {
        Self {
            width: frame.image().width(),
            height: frame.image().height(),
            crop: frame.crop(),
            mode: frame.mode(),
        }
    }

    pub fn log_change(previous: &mut Option<FrameShape>, frame: &DecodedFrame) {
        let shape = Self::of(frame);
        if *previous != Some(shape) {
            log::info!(
                "Frame {}x{} ({}), display area {}x{} at {},{}",
                shape.width,
                shape.height,
                shape.mode,
                shape.crop.width,
                shape.crop.height,
                shape.crop.left,
                shape.crop.top
            );
            *previous = Some(shape);
        }
    }
}

#[derive(Debug)]
pub struct CaptureReport {
    pub frames: u64,
    pub elapsed: Duration,
    pub shape: Option<FrameShape>,
    pub sync: SyncStats,
    pub counters: CounterSnapshot,
    /// Error that ended the session, if the device failed.
    pub error: Option<DeviceError>,
}

pub fn cmd_capture(args: &CaptureArgs, config: &Config, multi: Option<&MultiProgress>) -> Result<()> {
    let (engine, events) = open_engine(config)?;

    if let (Some(chip), Some(status)) = (engine.chip_type(), engine.status()) {
        log::info!("{chip} detected, capturing {} in {}", status.channels, status.mode);
    }

    let pb = multi.map(|m| create_spinner(m, "capturing")).transpose()?;
    let report = run_capture(&engine, &events, args.frames, pb.as_ref());
    engine.close();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    log::info!(
        "Captured {} frames in {:.1}s ({:.2} fps), {} rows, {} sync losses",
        report.frames,
        report.elapsed.as_secs_f64(),
        frame_rate(report.frames, report.elapsed),
        report.sync.rows_completed,
        report.sync.sync_losses
    );
    log::debug!("Transfer counters: {:?}", report.counters);

    match report.error {
        Some(error) => Err(anyhow::Error::new(error).context("Capture stopped")),
        None => Ok(()),
    }
}

/// Consumes engine events until the session ends or `limit` frames have
/// been decoded.
pub fn run_capture(
    engine: &CaptureEngine,
    events: &Receiver<DeviceEvent>,
    limit: Option<u64>,
    pb: Option<&ProgressBar>,
) -> CaptureReport {
    let status = engine.status().unwrap_or_default();
    let mut pipeline = CapturePipeline::new(status).with_buffer_pool(engine.sample_buffers());

    let start = Instant::now();
    let mut frames = 0u64;
    let mut shape = None;
    let mut error = None;

    while let Ok(event) = events.recv() {
        let handled = pipeline.handle_event(event, |frame| {
            frames += 1;
            FrameShape::log_change(&mut shape, &frame);
            if let Some(pb) = pb {
                pb.set_position(frames);
            }
        });

        if let Err(e) = handled {
            error = Some(e);
            break;
        }
        if limit.is_some_and(|limit| frames >= limit) {
            break;
        }
    }

    CaptureReport {
        frames,
        elapsed: start.elapsed(),
        shape,
        sync: pipeline.sync_stats(),
        counters: engine.counters(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdtap::device::backend::TransferStatus;
    use vdtap::device::mock::MockBackend;
    use vdtap::device::{Endpoint, EngineConfig};

    const HVS: u8 = 0x80;

    fn row(len: usize, vsync: bool, fill: u8) -> Vec<u8> {
        let mut row = vec![fill & !HVS; len];
        if vsync {
            row[1..].iter_mut().for_each(|s| *s |= HVS);
        }
        row[len - 1] |= HVS;
        row
    }

    fn screens(count: usize) -> Vec<u8> {
        let mut samples = Vec::new();
        for _ in 0..count {
            for _ in 0..2 {
                samples.extend(row(48, true, 0));
            }
            for y in 0..6 {
                samples.extend(row(48, false, 0x02 | (y as u8 & 0x01)));
            }
        }
        samples.extend(row(48, false, 0));
        samples.push(0);
        samples
    }

    fn config() -> EngineConfig {
        EngineConfig {
            sample_transfers: 4,
            packets_per_transfer: 4,
            packet_size: 64,
            status_transfers: 1,
        }
    }

    #[test]
    fn stops_after_frame_limit() -> anyhow::Result<()> {
        let backend = MockBackend::default();
        let handle = backend.handle();
        let config = config();
        let (engine, events) = CaptureEngine::open(backend, &config)?;

        for chunk in screens(5).chunks(config.sample_transfer_len()) {
            assert!(handle.wait_for_pending(Endpoint::Samples, 1, Duration::from_secs(5)));
            assert!(handle.complete_samples(chunk));
        }
        let report = run_capture(&engine, &events, Some(2), None);
        engine.close();

        assert_eq!(report.frames, 2);
        assert!(report.error.is_none());
        let shape = report.shape.expect("frame shape");
        assert_eq!((shape.width, shape.height), (48, 8));
        assert_eq!(shape.mode, CaptureMode::Columns80);
        Ok(())
    }

    #[test]
    fn device_failure_ends_capture() -> anyhow::Result<()> {
        let backend = MockBackend::default();
        let handle = backend.handle();
        let (engine, events) = CaptureEngine::open(backend, &config())?;

        handle.complete(Endpoint::Samples, TransferStatus::Disconnected, &[]);
        let report = run_capture(&engine, &events, None, None);
        engine.close();

        assert_eq!(report.frames, 0);
        assert!(matches!(report.error, Some(DeviceError::Io(_))));
        Ok(())
    }
}
