//! Per-block custom color overlay.
//!
//! The buffer is row-major RGBA with the top block row first, the same layout
//! as `image::RgbaImage`. Block coordinates count rows from the bottom, so the
//! vertical flip happens in [`OverlayBuffer::offset_of`].

use serde::Deserialize;
use thiserror::Error;

use crate::color::Rgba;
use crate::picker::BlockIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OverlayError {
    #[error("block ({x}, {y}) is outside the {columns}x{rows} grid")]
    BlockOutOfBounds {
        x: u32,
        y: u32,
        columns: u32,
        rows: u32,
    },
    #[error("overlay dimensions {columns}x{rows} overflowed usize")]
    DimensionsOverflow { columns: u32, rows: u32 },
    #[error("overlay grid {columns}x{rows} exceeds {max} blocks per side")]
    TooLarge { columns: u32, rows: u32, max: u32 },
    #[error("failed to allocate {bytes} bytes for the overlay")]
    AllocationFailed { bytes: usize },
}

/// Largest grid side the overlay will allocate.
pub const MAX_GRID_SIDE: u32 = 16_384;

/// How a freshly (re)allocated overlay is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "init", rename_all = "snake_case", deny_unknown_fields)]
pub enum OverlayInit {
    #[default]
    Transparent,
    Solid {
        color: Rgba,
    },
    /// Seeded low-intensity noise; every channel lands in `[0, max_intensity]`.
    Noise {
        #[serde(default)]
        seed: u64,
        #[serde(default = "default_noise_intensity")]
        max_intensity: u8,
    },
}

fn default_noise_intensity() -> u8 {
    24
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayBuffer {
    columns: u32,
    rows: u32,
    data: Vec<u8>,
}

impl OverlayBuffer {
    pub fn new(columns: u32, rows: u32, init: OverlayInit) -> Result<Self, OverlayError> {
        let mut buffer = Self {
            columns: 0,
            rows: 0,
            data: Vec::new(),
        };
        buffer.resize(columns, rows, init)?;
        Ok(buffer)
    }

    /// Reallocate for a new grid, discarding every painted block.
    pub fn resize(&mut self, columns: u32, rows: u32, init: OverlayInit) -> Result<(), OverlayError> {
        if columns > MAX_GRID_SIDE || rows > MAX_GRID_SIDE {
            return Err(OverlayError::TooLarge {
                columns,
                rows,
                max: MAX_GRID_SIDE,
            });
        }
        let len = (columns as usize)
            .checked_mul(rows as usize)
            .and_then(|count| count.checked_mul(4))
            .ok_or(OverlayError::DimensionsOverflow { columns, rows })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| OverlayError::AllocationFailed { bytes: len })?;
        data.resize(len, 0);
        fill(&mut data, init);

        self.columns = columns;
        self.rows = rows;
        self.data = data;
        Ok(())
    }

    /// Byte offset of a block's first channel.
    ///
    /// Equivalent to `len - columns*4*y - (columns - x)*4`.
    pub fn offset_of(&self, block: BlockIndex) -> Result<usize, OverlayError> {
        if block.x >= self.columns || block.y >= self.rows {
            return Err(OverlayError::BlockOutOfBounds {
                x: block.x,
                y: block.y,
                columns: self.columns,
                rows: self.rows,
            });
        }
        let columns = self.columns as usize;
        let row_from_top = (self.rows - 1 - block.y) as usize;
        Ok((row_from_top * columns + block.x as usize) * 4)
    }

    /// Write one block's color. No other byte changes.
    pub fn patch(&mut self, block: BlockIndex, color: Rgba) -> Result<(), OverlayError> {
        let offset = self.offset_of(block)?;
        self.data[offset..offset + 4].copy_from_slice(&color.to_array());
        Ok(())
    }

    pub fn color_at(&self, block: BlockIndex) -> Result<Rgba, OverlayError> {
        let offset = self.offset_of(block)?;
        let px = &self.data[offset..offset + 4];
        Ok(Rgba::new(px[0], px[1], px[2], px[3]))
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn fill(data: &mut [u8], init: OverlayInit) {
    match init {
        OverlayInit::Transparent => {}
        OverlayInit::Solid { color } => {
            let bytes = color.to_array();
            for px in data.chunks_exact_mut(4) {
                px.copy_from_slice(&bytes);
            }
        }
        OverlayInit::Noise {
            seed,
            max_intensity,
        } => {
            let mut rng = XorShift64::from_seed(seed);
            for byte in data.iter_mut() {
                *byte = rng.next_bounded(max_intensity as usize) as u8;
            }
        }
    }
}

/// Tiny deterministic PRNG (xorshift64*).
#[derive(Debug, Clone, Copy)]
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// `seed = 0` is remapped to a non-zero internal state so the generator
    /// cannot lock into an all-zero sequence.
    pub(crate) const fn from_seed(seed: u64) -> Self {
        let mixed = seed ^ 0x9E37_79B9_7F4A_7C15;
        let state = if mixed == 0 {
            0xA076_1D64_78BD_642F
        } else {
            mixed
        };
        Self { state }
    }

    #[inline(always)]
    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform value in `[0, max_inclusive]` using rejection sampling.
    #[inline(always)]
    pub(crate) fn next_bounded(&mut self, max_inclusive: usize) -> usize {
        if max_inclusive == 0 {
            return 0;
        }

        let bound = (max_inclusive as u64) + 1;
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let sample = self.next_u64();
            if sample < zone {
                return (sample % bound) as usize;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_bottom_left_in_four_by_four_touches_only_its_bytes() {
        let mut overlay =
            OverlayBuffer::new(4, 4, OverlayInit::Transparent).expect("overlay should allocate");
        overlay
            .patch(BlockIndex::new(0, 0), Rgba::new(255, 0, 0, 255))
            .expect("patch should succeed");

        let bytes = overlay.as_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[48..52], &[255, 0, 0, 255]);
        let untouched = bytes
            .iter()
            .enumerate()
            .filter(|(index, _)| !(48..52).contains(index))
            .all(|(_, byte)| *byte == 0);
        assert!(untouched, "only the bottom-left block should change");
    }

    #[test]
    fn top_left_block_lands_at_offset_zero() {
        let mut overlay =
            OverlayBuffer::new(10, 10, OverlayInit::Transparent).expect("overlay should allocate");
        assert_eq!(overlay.len(), 400);
        overlay
            .patch(BlockIndex::new(0, 9), Rgba::new(1, 2, 3, 4))
            .expect("patch should succeed");
        assert_eq!(&overlay.as_bytes()[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn offset_matches_reference_formula() {
        let overlay =
            OverlayBuffer::new(7, 5, OverlayInit::Transparent).expect("overlay should allocate");
        let len = overlay.len();
        for y in 0..5 {
            for x in 0..7 {
                let expected = len - (7 * 4 * y) - (7 - x) * 4;
                let offset = overlay
                    .offset_of(BlockIndex::new(x as u32, y as u32))
                    .expect("block in bounds");
                assert_eq!(offset, expected, "block ({x}, {y})");
            }
        }
    }

    #[test]
    fn resize_reallocates_and_discards() {
        let mut overlay =
            OverlayBuffer::new(4, 4, OverlayInit::Transparent).expect("overlay should allocate");
        overlay
            .patch(BlockIndex::new(1, 1), Rgba::RED)
            .expect("patch should succeed");
        overlay
            .resize(6, 3, OverlayInit::Transparent)
            .expect("resize should succeed");
        assert_eq!(overlay.len(), 4 * 6 * 3);
        assert!(overlay.as_bytes().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn out_of_bounds_block_is_rejected() {
        let mut overlay =
            OverlayBuffer::new(2, 2, OverlayInit::Transparent).expect("overlay should allocate");
        let err = overlay
            .patch(BlockIndex::new(2, 0), Rgba::RED)
            .expect_err("x == columns must fail");
        assert!(matches!(err, OverlayError::BlockOutOfBounds { .. }));
    }

    #[test]
    fn oversized_grid_is_an_error_and_keeps_the_old_buffer() {
        let mut overlay =
            OverlayBuffer::new(3, 3, OverlayInit::Transparent).expect("overlay should allocate");
        overlay
            .patch(BlockIndex::new(1, 1), Rgba::RED)
            .expect("patch should succeed");

        let err = overlay
            .resize(3_000_000, 3_000_000, OverlayInit::Transparent)
            .expect_err("huge grid must fail");
        assert!(matches!(err, OverlayError::TooLarge { max: MAX_GRID_SIDE, .. }));
        assert!(OverlayBuffer::new(u32::MAX, 1, OverlayInit::Transparent).is_err());

        assert_eq!((overlay.columns(), overlay.rows()), (3, 3));
        assert_eq!(overlay.color_at(BlockIndex::new(1, 1)), Ok(Rgba::RED));
    }

    #[test]
    fn solid_init_fills_every_block() {
        let overlay = OverlayBuffer::new(3, 2, OverlayInit::Solid { color: Rgba::RED })
            .expect("overlay should allocate");
        assert!(overlay
            .as_bytes()
            .chunks_exact(4)
            .all(|px| px == [255, 0, 0, 255]));
    }

    #[test]
    fn noise_init_is_bounded_and_deterministic() {
        let init = OverlayInit::Noise {
            seed: 42,
            max_intensity: 16,
        };
        let a = OverlayBuffer::new(8, 8, init).expect("overlay should allocate");
        let b = OverlayBuffer::new(8, 8, init).expect("overlay should allocate");
        assert_eq!(a, b, "same seed must produce byte-identical noise");
        assert!(a.as_bytes().iter().all(|byte| *byte <= 16));
        assert!(a.as_bytes().iter().any(|byte| *byte > 0));
    }

    #[test]
    fn init_strategies_parse_from_yaml() {
        let noise: OverlayInit =
            serde_yaml::from_str("{ init: noise, seed: 3 }").expect("noise should parse");
        assert_eq!(
            noise,
            OverlayInit::Noise {
                seed: 3,
                max_intensity: 24
            }
        );
        let solid: OverlayInit = serde_yaml::from_str("{ init: solid, color: \"#00ff00\" }")
            .expect("solid should parse");
        assert_eq!(
            solid,
            OverlayInit::Solid {
                color: Rgba::new(0, 255, 0, 255)
            }
        );
    }
}
