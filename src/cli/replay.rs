use std::time::Instant;

use anyhow::Result;
use indicatif::MultiProgress;
use vdtap::process::pipeline::CapturePipeline;
use vdtap::process::sync::SyncStats;
use vdtap::structs::channels::{CaptureMode, ChannelMapping};
use vdtap::structs::status::ChipStatus;

use super::capture::FrameShape;
use super::command::{ModeArg, ReplayArgs};
use super::progress::{create_spinner, frame_rate};
use crate::input::InputReader;

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub bytes: u64,
    pub frames: u64,
    pub shape: Option<FrameShape>,
    pub sync: SyncStats,
}

impl ReplayArgs {
    pub fn status(&self) -> ChipStatus {
        ChipStatus {
            channels: ChannelMapping {
                red: self.red_mask,
                green: self.green_mask,
                blue: self.blue_mask,
                insert: self.insert_mask,
                hvs: self.hvs_mask,
            },
            mode: match self.mode {
                ModeArg::Columns40 => CaptureMode::Columns40,
                ModeArg::Columns80 => CaptureMode::Columns80,
            },
        }
    }
}

pub fn cmd_replay(args: &ReplayArgs, multi: Option<&MultiProgress>) -> Result<()> {
    let status = args.status();
    log::info!(
        "Replaying {} with {} in {}",
        args.input.display(),
        status.channels,
        status.mode
    );

    let mut reader = InputReader::new(&args.input)?;
    if reader.is_pipe() {
        log::debug!("Reading samples from stdin");
    }

    let pb = multi.map(|m| create_spinner(m, "replaying")).transpose()?;
    let start = Instant::now();

    let summary = replay(&mut reader, status, args.chunk_size, |frames| {
        if let Some(pb) = &pb {
            pb.set_position(frames);
        }
    })?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let elapsed = start.elapsed();
    log::info!(
        "Replayed {} bytes: {} frames ({:.1} fps decoded), {} rows, {} discarded, {} sync losses",
        summary.bytes,
        summary.frames,
        frame_rate(summary.frames, elapsed),
        summary.sync.rows_completed,
        summary.sync.frames_discarded,
        summary.sync.sync_losses
    );

    if summary.frames == 0 {
        log::warn!("No complete frame found in {}", args.input.display());
    }
    Ok(())
}

/// Feeds the whole input through a pipeline. `on_progress` receives the
/// running frame count.
pub fn replay<F>(
    reader: &mut InputReader,
    status: ChipStatus,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<ReplaySummary>
where
    F: FnMut(u64),
{
    let mut pipeline = CapturePipeline::new(status);
    let mut summary = ReplaySummary::default();

    reader.process_chunks(chunk_size, |chunk| {
        let decoded = pipeline.push_samples(chunk, |frame| {
            summary.frames += 1;
            FrameShape::log_change(&mut summary.shape, &frame);
        })?;
        if decoded > 0 {
            on_progress(summary.frames);
        }
        Ok(true)
    })?;

    summary.bytes = reader.bytes_read();
    summary.sync = pipeline.sync_stats();
    Ok(summary)
}
