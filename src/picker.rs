//! Pointer position to block index.
//!
//! Pointer coordinates are canvas-relative with the origin at the top-left;
//! block coordinates have the origin at the bottom-left, matching the shader.

use serde::Serialize;

use crate::grid::whole_blocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockIndex {
    pub x: u32,
    pub y: u32,
}

impl BlockIndex {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Resolve the block under a pointer.
///
/// `blocks_x`/`blocks_y` may be fractional and are rounded up to whole blocks.
/// The result is clamped into the grid, so a pointer exactly on the far edge
/// still maps to the last block.
pub fn resolve_block(
    pointer_x: f32,
    pointer_y: f32,
    canvas_width: f32,
    canvas_height: f32,
    blocks_x: f32,
    blocks_y: f32,
) -> BlockIndex {
    let columns = whole_blocks(blocks_x);
    let rows = whole_blocks(blocks_y);

    let block_width = canvas_width / columns as f32;
    let block_height = canvas_height / rows as f32;
    let inverted_y = canvas_height - pointer_y;

    BlockIndex {
        x: axis_index(pointer_x, block_width, columns),
        y: axis_index(inverted_y, block_height, rows),
    }
}

fn axis_index(position: f32, block_size: f32, count: u32) -> u32 {
    if block_size.is_nan() || block_size <= 0.0 || !position.is_finite() {
        return 0;
    }
    let index = (position / block_size).floor().max(0.0);
    // Saturating float-to-int cast keeps huge values inside u32 before the clamp.
    (index as u32).min(count - 1)
}
