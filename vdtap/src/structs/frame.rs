//! Raw indexed frames.
//!
//! A frame is a width x height grid of raw sample bytes, stored row-major.
//! Pixels that were never sampled hold [`UNSET_SAMPLE`].

/// Padding value for the tail of rows shorter than the frame width.
pub const UNSET_SAMPLE: u8 = 0xFF;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

impl RawFrame {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![UNSET_SAMPLE; width * height],
            width,
            height,
        }
    }

    /// Builds a frame from variable-length rows. The width is the longest
    /// row; shorter rows are padded.
    pub fn from_rows<R: AsRef<[u8]>>(rows: &[R]) -> Self {
        let width = rows.iter().map(|r| r.as_ref().len()).max().unwrap_or(0);
        let mut frame = Self::new(width, rows.len());

        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            frame.row_mut(y)[..row.len()].copy_from_slice(row);
        }

        frame
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        &mut self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        // chunks_exact(0) panics
        self.data.chunks_exact(self.width.max(1)).take(self.height)
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[y * self.width + x])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Display-relevant region of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
}

impl CropRect {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_rows_are_padded() {
        let frame = RawFrame::from_rows(&[vec![1, 2, 3], vec![4], vec![]]);
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.row(0), &[1, 2, 3]);
        assert_eq!(frame.row(1), &[4, UNSET_SAMPLE, UNSET_SAMPLE]);
        assert_eq!(frame.row(2), &[UNSET_SAMPLE; 3]);
        assert_eq!(frame.get(3, 0), None);
        assert_eq!(frame.rows().count(), 3);
    }

    #[test]
    fn empty_frame() {
        let frame = RawFrame::from_rows::<Vec<u8>>(&[]);
        assert!(frame.is_empty());
        assert_eq!(frame.rows().count(), 0);
    }
}
