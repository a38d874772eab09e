use crate::structs::channels::ChannelMapping;
use crate::structs::frame::RawFrame;
use crate::utils::errors::SyncError;
use log::{error, trace, warn};
use std::collections::VecDeque;

/// Rows longer than this mean the HSYNC edges are not being seen.
pub const MAX_ROW_SAMPLES: usize = 4096;

/// Screens taller than this mean the VSYNC transitions are not being seen.
pub const MAX_SCREEN_ROWS: usize = 1000;

/// Rebuilds frames from a continuous stream of samples.
///
/// Every sample carries the composite sync signal on the HVS bit. A falling
/// edge of that bit starts a new row; a row whose middle sample has the bit
/// set is a sync row, and the first regular row after a run of sync rows
/// closes the screen collected so far.
///
/// The first screen after a reset is usually partial and is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use vdtap::process::sync::Synchronizer;
/// use vdtap::structs::channels::ChannelMapping;
///
/// let mut synchronizer = Synchronizer::default();
/// let channels = ChannelMapping { hvs: 0x80, red: 0x02, ..Default::default() };
///
/// let samples = std::fs::read("capture.bin")?;
/// synchronizer.push_samples(&samples, channels)?;
///
/// for frame in synchronizer.by_ref().flatten() {
///     println!("frame {}x{}", frame.width(), frame.height());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Synchronizer {
    channels: Option<ChannelMapping>,
    previous_sample: u8,
    previous_vsync: bool,
    current_row: Vec<u8>,
    screen: Vec<Vec<u8>>,
    spare_rows: Vec<Vec<u8>>,
    first_frame_pending: bool,
    reported_no_sync: bool,
    output: VecDeque<Result<RawFrame, SyncError>>,
    stats: SyncStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub rows_completed: usize,
    pub frames_emitted: usize,
    pub frames_discarded: usize,
    pub sync_losses: usize,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self {
            channels: None,
            previous_sample: 0xFF,
            previous_vsync: true,
            current_row: Vec::with_capacity(MAX_ROW_SAMPLES),
            screen: Vec::new(),
            spare_rows: Vec::new(),
            first_frame_pending: true,
            reported_no_sync: false,
            output: VecDeque::new(),
            stats: SyncStats::default(),
        }
    }
}

impl Synchronizer {
    /// Feeds the next samples of the stream.
    ///
    /// A mapping different from the previous call discards all partial
    /// state first. Completed frames and sync losses are queued and can be
    /// taken by iterating the synchronizer.
    ///
    /// Fails with [`SyncError::NoSyncChannel`] when the mapping has no HVS
    /// bit; the samples are then dropped.
    pub fn push_samples(
        &mut self,
        samples: &[u8],
        channels: ChannelMapping,
    ) -> Result<(), SyncError> {
        if self.channels != Some(channels) {
            self.channels = Some(channels);
            self.reported_no_sync = false;
            self.reset();
        }

        let hvs = channels.hvs;
        if hvs == 0 {
            if !self.reported_no_sync {
                self.reported_no_sync = true;
                error!("Channel mapping {channels} has no HVS channel, dropping samples");
            }
            return Err(SyncError::NoSyncChannel);
        }

        for &sample in samples {
            if self.previous_sample & hvs != 0 && sample & hvs == 0 {
                self.complete_row(hvs);
            }

            self.current_row.push(sample);
            self.previous_sample = sample;

            if self.current_row.len() > MAX_ROW_SAMPLES {
                self.sync_lost(SyncError::HorizontalSyncLost(self.current_row.len()));
            }
        }

        Ok(())
    }

    /// Drops every partial row and screen and re-arms the first-frame rule.
    ///
    /// Queued frames are kept.
    pub fn reset(&mut self) {
        self.previous_sample = 0xFF;
        self.current_row.clear();
        self.previous_vsync = true;
        self.recycle_screen();
        self.first_frame_pending = true;
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Number of rows collected for the screen in progress.
    pub fn pending_rows(&self) -> usize {
        self.screen.len()
    }

    fn complete_row(&mut self, hvs: u8) {
        if self.current_row.is_empty() {
            return;
        }

        let vsync = self.current_row[self.current_row.len() / 2] & hvs != 0;
        trace!("Row of {} samples (sync={vsync})", self.current_row.len());

        if self.previous_vsync && !vsync {
            self.complete_screen();
        }

        self.previous_vsync = vsync;

        let mut row = self.spare_rows.pop().unwrap_or_default();
        std::mem::swap(&mut row, &mut self.current_row);
        self.screen.push(row);
        self.stats.rows_completed += 1;

        if self.screen.len() > MAX_SCREEN_ROWS {
            self.sync_lost(SyncError::VerticalSyncLost(self.screen.len()));
        }
    }

    fn complete_screen(&mut self) {
        if self.screen.is_empty() {
            return;
        }

        let frame = RawFrame::from_rows(&self.screen);
        self.recycle_screen();

        if self.first_frame_pending {
            self.first_frame_pending = false;
            self.stats.frames_discarded += 1;
            trace!(
                "Discarding first frame {}x{}",
                frame.width(),
                frame.height()
            );
        } else {
            self.stats.frames_emitted += 1;
            self.output.push_back(Ok(frame));
        }
    }

    fn sync_lost(&mut self, error: SyncError) {
        warn!("{error}, dropping buffers");
        self.stats.sync_losses += 1;
        self.output.push_back(Err(error));
        self.reset();
    }

    fn recycle_screen(&mut self) {
        for mut row in self.screen.drain(..) {
            row.clear();
            self.spare_rows.push(row);
        }
    }
}

impl Iterator for Synchronizer {
    type Item = Result<RawFrame, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.output.pop_front()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const HVS: u8 = 0x80;

    pub(crate) fn sync_only() -> ChannelMapping {
        ChannelMapping {
            hvs: HVS,
            ..Default::default()
        }
    }

    /// One row: starts low right after the HSYNC falling edge and ends with
    /// the HSYNC pulse. Sync rows keep the bit high through the middle.
    pub(crate) fn row(len: usize, vsync: bool, fill: u8) -> Vec<u8> {
        let mut row = vec![fill & !HVS; len];
        if vsync {
            for sample in &mut row[1..] {
                *sample |= HVS;
            }
        }
        row[len - 1] |= HVS;
        row
    }

    /// `sync_rows` sync rows followed by `active_rows` regular rows.
    pub(crate) fn screen(width: usize, sync_rows: usize, active_rows: usize) -> Vec<u8> {
        let mut samples = Vec::new();
        for _ in 0..sync_rows {
            samples.extend(row(width, true, 0));
        }
        for y in 0..active_rows {
            samples.extend(row(width, false, y as u8 & 0x0F));
        }
        samples
    }

    fn frames(synchronizer: &mut Synchronizer) -> Vec<RawFrame> {
        synchronizer.by_ref().filter_map(Result::ok).collect()
    }

    #[test]
    fn missing_sync_channel_drops_samples() {
        let mut synchronizer = Synchronizer::default();
        let channels = ChannelMapping {
            red: 0x02,
            ..Default::default()
        };

        let samples = [screen(100, 2, 8), screen(100, 2, 8), screen(100, 2, 8)].concat();
        assert_eq!(
            synchronizer.push_samples(&samples, channels),
            Err(SyncError::NoSyncChannel)
        );
        assert_eq!(
            synchronizer.push_samples(&samples, channels),
            Err(SyncError::NoSyncChannel)
        );
        assert_eq!(synchronizer.next(), None);
        assert_eq!(synchronizer.stats(), SyncStats::default());
    }

    #[test]
    fn first_frame_is_discarded_then_frames_follow() -> anyhow::Result<()> {
        let mut synchronizer = Synchronizer::default();

        // rows 0-1 sync, rows 2-9 active
        let mut samples = screen(100, 2, 8);
        // 11th row repeats the pattern, then an active row closes the screen
        samples.extend(row(100, true, 0));
        samples.extend(row(100, false, 0x01));
        // first sample of the next row flushes the previous one
        samples.push(0);

        synchronizer.push_samples(&samples, sync_only())?;

        let stats = synchronizer.stats();
        assert_eq!(stats.frames_discarded, 1);
        assert_eq!(stats.frames_emitted, 1);

        let frames = frames(&mut synchronizer);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.width(), 100);
        // the 8 active rows, then the sync row that preceded the next screen
        assert_eq!(frame.height(), 8 + 1);
        for y in 0..8 {
            assert_eq!(frame.row(y), row(100, false, y as u8).as_slice());
        }
        assert_eq!(frame.row(8), row(100, true, 0).as_slice());
        Ok(())
    }

    #[test]
    fn rows_between_frames_match_frame_height() -> anyhow::Result<()> {
        let mut synchronizer = Synchronizer::default();
        let mut rows_at_last_frame = None;

        let heights = [5, 9, 3, 12, 7];
        let mut samples = screen(64, 3, 4);
        for &active in &heights {
            samples.extend(screen(64, 2, active));
        }
        samples.extend(row(64, false, 0));
        samples.push(0);

        // feed in odd-sized chunks so rows straddle pushes
        for chunk in samples.chunks(37) {
            synchronizer.push_samples(chunk, sync_only())?;
            while let Some(frame) = synchronizer.next() {
                let frame = frame?;
                let rows_now = synchronizer.stats().rows_completed - synchronizer.pending_rows();
                if let Some(previous) = rows_at_last_frame {
                    assert_eq!(rows_now - previous, frame.height());
                }
                rows_at_last_frame = Some(rows_now);
            }
        }

        assert_eq!(synchronizer.stats().frames_emitted, heights.len());
        Ok(())
    }

    #[test]
    fn ragged_rows_are_padded() -> anyhow::Result<()> {
        let mut synchronizer = Synchronizer::default();
        let mut samples = screen(50, 1, 2);
        samples.extend(row(50, true, 0));
        samples.extend(row(40, false, 0x01));
        samples.extend(row(50, false, 0x02));
        samples.extend(row(50, true, 0));
        samples.extend(row(50, false, 0));
        samples.push(0);

        synchronizer.push_samples(&samples, sync_only())?;
        let frames = frames(&mut synchronizer);
        assert_eq!(frames.len(), 2);
        let ragged = &frames[1];
        assert_eq!(ragged.width(), 50);
        assert_eq!(ragged.get(39, 0), Some(0x01 | HVS));
        assert_eq!(ragged.get(40, 0), Some(crate::structs::frame::UNSET_SAMPLE));
        Ok(())
    }

    #[test]
    fn overlong_row_loses_horizontal_sync() -> anyhow::Result<()> {
        let mut synchronizer = Synchronizer::default();
        synchronizer.push_samples(&vec![0u8; MAX_ROW_SAMPLES + 1], sync_only())?;

        assert_eq!(
            synchronizer.next(),
            Some(Err(SyncError::HorizontalSyncLost(MAX_ROW_SAMPLES + 1)))
        );
        assert_eq!(synchronizer.stats().sync_losses, 1);
        assert_eq!(synchronizer.pending_rows(), 0);
        Ok(())
    }

    #[test]
    fn endless_screen_loses_vertical_sync() -> anyhow::Result<()> {
        let mut synchronizer = Synchronizer::default();
        let mut samples = Vec::new();
        for _ in 0..=MAX_SCREEN_ROWS + 1 {
            samples.extend(row(8, false, 0));
        }
        synchronizer.push_samples(&samples, sync_only())?;

        let losses = synchronizer
            .by_ref()
            .filter(|item| matches!(item, Err(SyncError::VerticalSyncLost(_))))
            .count();
        assert_eq!(losses, 1);
        Ok(())
    }

    #[test]
    fn replay_after_sync_loss_matches_fresh_session() -> anyhow::Result<()> {
        let mut stream = Vec::new();
        for active in [6, 6, 8, 6] {
            stream.extend(screen(80, 2, active));
        }
        stream.extend(row(80, false, 0));
        stream.push(0);

        let mut fresh = Synchronizer::default();
        fresh.push_samples(&stream, sync_only())?;
        let expected = frames(&mut fresh);
        assert_eq!(expected.len(), 3);

        let mut recovered = Synchronizer::default();
        // garbage with no sync edges, then the same stream
        recovered.push_samples(&screen(80, 2, 3), sync_only())?;
        recovered.push_samples(&vec![0u8; MAX_ROW_SAMPLES + 1], sync_only())?;
        let before: Vec<_> = recovered.by_ref().collect();
        assert!(matches!(
            before.last(),
            Some(Err(SyncError::HorizontalSyncLost(_)))
        ));

        recovered.push_samples(&stream, sync_only())?;
        assert_eq!(frames(&mut recovered), expected);
        Ok(())
    }

    #[test]
    fn mapping_change_resets_state() -> anyhow::Result<()> {
        let mut synchronizer = Synchronizer::default();
        synchronizer.push_samples(&screen(32, 2, 4), sync_only())?;
        assert!(synchronizer.pending_rows() > 0);

        let other = ChannelMapping {
            red: 0x01,
            ..sync_only()
        };
        synchronizer.push_samples(&[], other)?;
        assert_eq!(synchronizer.pending_rows(), 0);
        Ok(())
    }
}
