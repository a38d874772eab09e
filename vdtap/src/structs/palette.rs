//! Colour lookup tables from raw sample bytes to displayable colours.

use std::fmt::Display;
use std::str::FromStr;

use crate::structs::channels::ChannelMapping;

/// Intensity of a lit channel when the insert signal is low.
const DIMMED_ON: u8 = 0xCC;
/// Intensity of an unlit channel when the insert signal is low.
const DIMMED_OFF: u8 = 0x44;

/// Luma of the eight RGB combinations, indexed by `b << 2 | g << 1 | r`.
const GRAYSCALE_TABLE: [u8; 8] = [0, 80, 160, 230, 40, 120, 200, 255];

pub type ColorTable = [[u8; 3]; 256];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PaletteKind {
    /// RGB, dimmed wherever the insert signal is low.
    #[default]
    RgbInsert,
    Rgb,
    Grayscale,
    /// The insert signal alone, as black and white.
    Insert,
}

impl PaletteKind {
    pub const ALL: [PaletteKind; 4] = [
        PaletteKind::RgbInsert,
        PaletteKind::Rgb,
        PaletteKind::Grayscale,
        PaletteKind::Insert,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PaletteKind::RgbInsert => "rgb-insert",
            PaletteKind::Rgb => "rgb",
            PaletteKind::Grayscale => "grayscale",
            PaletteKind::Insert => "insert",
        }
    }
}

impl Display for PaletteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PaletteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaletteKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown palette {s:?}"))
    }
}

/// The four colour tables for one channel mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palettes {
    channels: ChannelMapping,
    rgb_insert: ColorTable,
    rgb: ColorTable,
    grayscale: ColorTable,
    insert: ColorTable,
}

impl Palettes {
    pub fn new(channels: ChannelMapping) -> Self {
        let mut palettes = Self {
            channels,
            rgb_insert: [[0; 3]; 256],
            rgb: [[0; 3]; 256],
            grayscale: [[0; 3]; 256],
            insert: [[0; 3]; 256],
        };

        let has_insert = channels.insert != 0;

        for value in 0..=255u8 {
            let red = value & channels.red != 0;
            let green = value & channels.green != 0;
            let blue = value & channels.blue != 0;
            let insert = value & channels.insert != 0;

            let full = |on: bool| if on { 0xFF } else { 0x00 };
            let dimmed = |on: bool| if on { DIMMED_ON } else { DIMMED_OFF };

            let color = [full(red), full(green), full(blue)];
            let i = value as usize;

            palettes.rgb[i] = color;
            palettes.rgb_insert[i] = if has_insert && !insert {
                [dimmed(red), dimmed(green), dimmed(blue)]
            } else {
                color
            };

            let luma = GRAYSCALE_TABLE
                [(usize::from(blue) << 2) | (usize::from(green) << 1) | usize::from(red)];
            palettes.grayscale[i] = [luma; 3];
            palettes.insert[i] = [full(insert); 3];
        }

        palettes
    }

    pub fn channels(&self) -> ChannelMapping {
        self.channels
    }

    pub fn table(&self, kind: PaletteKind) -> &ColorTable {
        match kind {
            PaletteKind::RgbInsert => &self.rgb_insert,
            PaletteKind::Rgb => &self.rgb,
            PaletteKind::Grayscale => &self.grayscale,
            PaletteKind::Insert => &self.insert,
        }
    }

    pub fn lookup(&self, kind: PaletteKind, value: u8) -> [u8; 3] {
        self.table(kind)[value as usize]
    }
}
