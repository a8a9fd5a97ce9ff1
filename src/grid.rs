//! Canvas geometry and the square block grid laid over it.

use serde::Serialize;

pub const DEFAULT_BLOCKS: f32 = 36.0;
pub const DEFAULT_MAX_BLOCKS: f32 = 50.0;
/// Hard upper bound for any configured `max_blocks`.
pub const MAX_BLOCKS_CEILING: f32 = 1024.0;
pub const MAX_DEVICE_PIXEL_RATIO: f32 = 2.0;

/// On-screen canvas size in CSS pixels plus the backing-store scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CanvasGeometry {
    pub css_width: f32,
    pub css_height: f32,
    pub device_pixel_ratio: f32,
}

impl CanvasGeometry {
    /// Canvas sized to an image, with the pixel ratio capped at 2x.
    pub fn for_image(width: u32, height: u32, device_pixel_ratio: f32) -> Self {
        let ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio.min(MAX_DEVICE_PIXEL_RATIO)
        } else {
            1.0
        };
        Self {
            css_width: width as f32,
            css_height: height as f32,
            device_pixel_ratio: ratio,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.css_height <= 0.0 {
            return 1.0;
        }
        self.css_width / self.css_height
    }

    /// Backing-store size in device pixels, never smaller than 1x1.
    pub fn device_size(&self) -> (u32, u32) {
        let width = (self.css_width * self.device_pixel_ratio).round().max(1.0);
        let height = (self.css_height * self.device_pixel_ratio).round().max(1.0);
        (width as u32, height as u32)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.css_width && y <= self.css_height
    }
}

/// Block grid derived from a requested block count.
///
/// `blocks_x`/`blocks_y` keep the fractional values the shader receives;
/// [`columns`](Self::columns) and [`rows`](Self::rows) round them up to whole
/// blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlockGrid {
    pub requested: f32,
    pub blocks_x: f32,
    pub blocks_y: f32,
}

impl BlockGrid {
    /// Square the blocks against the canvas aspect ratio: the longer side
    /// gets proportionally more blocks.
    pub fn square(requested: f32, canvas: &CanvasGeometry) -> Self {
        let ratio = canvas.aspect_ratio();
        let mut blocks_x = requested;
        let mut blocks_y = requested;
        if ratio > 1.0 {
            blocks_x *= ratio;
        } else {
            blocks_y /= ratio;
        }
        Self {
            requested,
            blocks_x,
            blocks_y,
        }
    }

    pub fn columns(&self) -> u32 {
        whole_blocks(self.blocks_x)
    }

    pub fn rows(&self) -> u32 {
        whole_blocks(self.blocks_y)
    }

    pub fn block_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn byte_len(&self) -> usize {
        self.block_count() * 4
    }
}

/// Normalize a block-count request from a UI control.
///
/// Missing, zero, negative and NaN requests yield `None` (the caller treats
/// them as a no-op); anything above `max_blocks` is clamped.
pub fn normalize_request(value: Option<f32>, max_blocks: f32) -> Option<f32> {
    let value = value?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    Some(value.min(max_blocks))
}

pub(crate) fn whole_blocks(value: f32) -> u32 {
    if !value.is_finite() || value < 1.0 {
        return 1;
    }
    value.ceil() as u32
}
