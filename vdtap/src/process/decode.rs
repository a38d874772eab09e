use crate::structs::channels::{CaptureMode, ChannelFlags, ChannelMapping};
use crate::structs::frame::{CropRect, RawFrame, UNSET_SAMPLE};
use crate::structs::palette::{PaletteKind, Palettes};
use crate::structs::status::ChipStatus;
use image::{ImageFormat, ImageResult, RgbImage};
use log::debug;
use std::io::Cursor;
use std::sync::Arc;

/// Turns synchronized raw frames into displayable frames.
///
/// In 40-column mode the double-sampled columns are removed first. The
/// palette tables are shared between frames and rebuilt only when the
/// channel mapping changes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    palettes: Option<Arc<Palettes>>,
}

impl FrameDecoder {
    pub fn decode(&mut self, frame: &RawFrame, status: ChipStatus) -> DecodedFrame {
        let image = if status.mode.needs_phase_correction() {
            remove_double_columns(frame, status.channels.data_mask())
        } else {
            frame.clone()
        };

        let crop = crop_rect(image.width(), image.height());

        DecodedFrame {
            crop,
            channels: status.channels,
            mode: status.mode,
            palettes: self.palettes_for(status.channels),
            image,
        }
    }

    /// Shared palettes for `channels`, rebuilt only on a mapping change.
    pub fn palettes_for(&mut self, channels: ChannelMapping) -> Arc<Palettes> {
        match &self.palettes {
            Some(palettes) if palettes.channels() == channels => palettes.clone(),
            _ => {
                debug!("Rebuilding palettes for {channels}");
                let palettes = Arc::new(Palettes::new(channels));
                self.palettes = Some(palettes.clone());
                palettes
            }
        }
    }
}

/// A phase-corrected frame together with the capture settings it was taken
/// under.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    image: RawFrame,
    crop: CropRect,
    channels: ChannelMapping,
    mode: CaptureMode,
    palettes: Arc<Palettes>,
}

impl DecodedFrame {
    /// Raw sample values after phase correction, uncropped.
    pub fn image(&self) -> &RawFrame {
        &self.image
    }

    pub fn crop(&self) -> CropRect {
        self.crop
    }

    pub fn channels(&self) -> ChannelMapping {
        self.channels
    }

    pub fn flags(&self) -> ChannelFlags {
        self.channels.flags()
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn palettes(&self) -> &Arc<Palettes> {
        &self.palettes
    }

    /// Applies a palette, optionally limited to the crop rectangle.
    pub fn render(&self, kind: PaletteKind, cropped: bool) -> RgbImage {
        let rect = if cropped {
            self.crop
        } else {
            CropRect::full(self.image.width(), self.image.height())
        };
        let table = self.palettes.table(kind);

        RgbImage::from_fn(rect.width as u32, rect.height as u32, |x, y| {
            let value = self
                .image
                .get(rect.left + x as usize, rect.top + y as usize)
                .unwrap_or(UNSET_SAMPLE);
            image::Rgb(table[value as usize])
        })
    }

    pub fn encode_png(&self, kind: PaletteKind, cropped: bool) -> ImageResult<Vec<u8>> {
        let mut png = Cursor::new(Vec::new());
        self.render(kind, cropped)
            .write_to(&mut png, ImageFormat::Png)?;
        Ok(png.into_inner())
    }
}

/// Undoes the 1.5x oversampling of 40-column mode.
///
/// The chip updates pixels every 1.5 sample clocks, so every other pixel is
/// sampled twice. The phase is unknown; three alignments are tried:
///
/// 1. `A BB C DD ...`
/// 2. `AA B CC D ...`
/// 3. `A B CC D EE ...`
///
/// For each, the sample kept and the sample skipped at every duplicate
/// position are compared on the data bits. The alignment with the fewest
/// mismatches over the whole frame wins; the right one usually has none.
/// Ties go to the lower-numbered alignment.
pub fn remove_double_columns(frame: &RawFrame, data_mask: u8) -> RawFrame {
    let out_width = frame.width() * 2 / 3;
    let height = frame.height();

    let mut candidates = [
        RawFrame::new(out_width, height),
        RawFrame::new(out_width, height),
        RawFrame::new(out_width, height),
    ];
    let mut mismatches = [0usize; 3];

    for y in 0..height {
        let input = frame.row(y);
        let sample = |i: usize| input.get(i).copied().unwrap_or(UNSET_SAMPLE);
        let differs = |a: u8, b: u8| (a ^ b) & data_mask != 0;

        let [out1, out2, out3] = &mut candidates;
        let (out1, out2, out3) = (out1.row_mut(y), out2.row_mut(y), out3.row_mut(y));
        let (mut x1, mut x2, mut x3) = (0, 0, 0);

        for x in 0..out_width {
            out1[x] = sample(x1);
            out2[x] = sample(x2);
            out3[x] = sample(x3);
            x1 += 1;
            x2 += 1;
            x3 += 1;

            if x % 2 != 0 {
                mismatches[0] += usize::from(differs(out1[x], sample(x1)));
                x1 += 1;
            } else {
                mismatches[1] += usize::from(differs(out2[x], sample(x2)));
                x2 += 1;
                if x != 0 {
                    mismatches[2] += usize::from(differs(out3[x], sample(x3)));
                    x3 += 1;
                }
            }
        }
    }

    let best = (0..3).min_by_key(|&i| mismatches[i]).unwrap_or(0);
    debug!("Phase mismatches {mismatches:?}, using alignment {}", best + 1);

    let [out1, out2, out3] = candidates;
    match best {
        0 => out1,
        1 => out2,
        _ => out3,
    }
}

/// Display-relevant region for a frame of the given size.
///
/// Widths of 512 and 768 samples (40 and 80 columns) and heights of 262 and
/// 312 lines leave a 2 pixel border around the active area. Any other size
/// is left uncropped in that dimension.
pub fn crop_rect(width: usize, height: usize) -> CropRect {
    let (left, crop_width) = match width {
        512 => (128 - 2, 320 + 4),
        768 => (192 - 2, 480 + 4),
        _ => (0, width),
    };
    let (top, crop_height) = match height {
        262 => (35 - 2, 210 + 4),
        312 => (41 - 2, 250 + 4),
        _ => (0, height),
    };

    CropRect {
        left,
        top,
        width: crop_width,
        height: crop_height,
    }
}
