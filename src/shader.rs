//! Built-in WGSL pixelation program.
//!
//! Custom programs passed to `load_shader` must declare the same bind group:
//!
//! | binding | resource                                  |
//! |---------|-------------------------------------------|
//! | 0       | `var<uniform>` [`PixelateUniform`] layout |
//! | 1       | source image `texture_2d<f32>`            |
//! | 2       | source `sampler`                          |
//! | 3       | overlay `texture_2d<f32>` (one texel per block) |
//!
//! and entry points `vs_main` / `fs_main`.

use bytemuck::{Pod, Zeroable};

pub const PIXELATE_SHADER: &str = r#"
struct PixelateUniform {
  resolution: vec2<f32>,
  texture_resolution: vec2<f32>,
  blocks: vec2<f32>,
  selected_block: vec2<f32>,
}

@group(0) @binding(0) var<uniform> params: PixelateUniform;
@group(0) @binding(1) var source_tex: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;
@group(0) @binding(3) var overlay_tex: texture_2d<f32>;

struct VertexOutput {
  @builtin(position) position: vec4<f32>,
  @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
  var positions = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -3.0),
    vec2<f32>(-1.0, 1.0),
    vec2<f32>(3.0, 1.0)
  );

  var out: VertexOutput;
  let p = positions[vertex_index];
  out.position = vec4<f32>(p, 0.0, 1.0);
  // Origin at the bottom-left, like the block coordinates.
  out.uv = p * vec2<f32>(0.5, 0.5) + vec2<f32>(0.5, 0.5);
  return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
  let cells = max(ceil(params.blocks), vec2<f32>(1.0, 1.0));
  let uv = clamp(input.uv, vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0));
  let cell = min(floor(uv * cells), cells - vec2<f32>(1.0, 1.0));
  let center = (cell + vec2<f32>(0.5, 0.5)) / cells;

  let source = textureSample(source_tex, source_sampler, vec2<f32>(center.x, 1.0 - center.y));

  let overlay_size = vec2<i32>(textureDimensions(overlay_tex));
  let texel = vec2<i32>(i32(cell.x), i32(cells.y) - 1 - i32(cell.y));
  var overlay = vec4<f32>(0.0, 0.0, 0.0, 0.0);
  if texel.x >= 0 && texel.y >= 0 && texel.x < overlay_size.x && texel.y < overlay_size.y {
    overlay = textureLoad(overlay_tex, texel, 0);
  }

  return mix(source, vec4<f32>(overlay.rgb, 1.0), overlay.a);
}
"#;

/// Matches `PixelateUniform` in [`PIXELATE_SHADER`]. 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Default)]
pub struct PixelateUniform {
    pub resolution: [f32; 2],
    pub texture_resolution: [f32; 2],
    pub blocks: [f32; 2],
    pub selected_block: [f32; 2],
}
