//! CPU reference for the built-in pixelation program.
//!
//! Used when no GPU adapter is available and by tests that need exact pixels.

use anyhow::{bail, Result};

use crate::renderer::{
    RenderBackend, TextureData, TextureFilter, TextureOptions, UniformMap, UniformValue,
    U_BLOCKS, U_OVERLAY, U_TEXTURE,
};
use crate::shader::PIXELATE_SHADER;

pub struct SoftwareRenderer {
    width: u32,
    height: u32,
    uniforms: UniformMap,
    source: TextureData,
    source_filter: TextureFilter,
    overlay: TextureData,
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            width: 1,
            height: 1,
            uniforms: UniformMap::new(),
            source: TextureData::new(vec![0; 4], 1, 1),
            source_filter: TextureFilter::Nearest,
            overlay: TextureData::new(vec![0; 4], 1, 1),
        }
    }

    fn cells(&self) -> [f32; 2] {
        let blocks = self
            .uniforms
            .get(U_BLOCKS)
            .and_then(UniformValue::as_vec2)
            .unwrap_or([1.0, 1.0]);
        [blocks[0].ceil().max(1.0), blocks[1].ceil().max(1.0)]
    }

    /// One fragment; `uv` has its origin at the bottom-left.
    fn shade(&self, uv: [f32; 2], cells: [f32; 2]) -> [u8; 4] {
        let cell_x = (uv[0] * cells[0]).floor().min(cells[0] - 1.0).max(0.0);
        let cell_y = (uv[1] * cells[1]).floor().min(cells[1] - 1.0).max(0.0);
        let center_x = (cell_x + 0.5) / cells[0];
        let center_y = (cell_y + 0.5) / cells[1];

        let source = match self.source_filter {
            TextureFilter::Nearest => sample_nearest(&self.source, center_x, 1.0 - center_y),
            TextureFilter::Linear => sample_linear(&self.source, center_x, 1.0 - center_y),
        };

        let texel_x = cell_x as u32;
        let texel_y = (cells[1] as u32).saturating_sub(1 + cell_y as u32);
        let overlay = if texel_x < self.overlay.width && texel_y < self.overlay.height {
            texel(&self.overlay, texel_x, texel_y)
        } else {
            [0.0; 4]
        };

        let alpha = overlay[3];
        let mut out = [0_u8; 4];
        for channel in 0..3 {
            out[channel] = to_unorm(source[channel] * (1.0 - alpha) + overlay[channel] * alpha);
        }
        out[3] = to_unorm(source[3] * (1.0 - alpha) + alpha);
        out
    }
}

impl RenderBackend for SoftwareRenderer {
    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.insert(name.to_owned(), value);
    }

    fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    fn set_texture(
        &mut self,
        name: &str,
        texture: TextureData,
        options: TextureOptions,
    ) -> Result<()> {
        if texture.width == 0 || texture.height == 0 {
            bail!("texture '{}' must be at least 1x1", name);
        }
        if texture.data.len() != texture.expected_len() {
            bail!(
                "texture '{}' expected {} bytes for {}x{}, got {}",
                name,
                texture.expected_len(),
                texture.width,
                texture.height,
                texture.data.len()
            );
        }
        match name {
            U_TEXTURE => {
                self.source = texture;
                self.source_filter = options.filter;
            }
            U_OVERLAY => self.overlay = texture,
            other => bail!("unknown texture uniform '{other}'"),
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("render target must be positive, got {}x{}", width, height);
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn load_shader(&mut self, source: &str) -> Result<()> {
        if source.trim() != PIXELATE_SHADER.trim() {
            bail!("software renderer only runs the built-in pixelation program");
        }
        Ok(())
    }

    fn render_rgba(&mut self) -> Result<Vec<u8>> {
        let cells = self.cells();
        let (width, height) = (self.width as usize, self.height as usize);
        let mut frame = vec![0_u8; width * height * 4];

        for (row, line) in frame.chunks_exact_mut(width * 4).enumerate() {
            let v = 1.0 - (row as f32 + 0.5) / height as f32;
            for (column, px) in line.chunks_exact_mut(4).enumerate() {
                let u = (column as f32 + 0.5) / width as f32;
                px.copy_from_slice(&self.shade([u, v], cells));
            }
        }

        Ok(frame)
    }

    fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn backend_name(&self) -> &'static str {
        "software"
    }
}

fn texel(texture: &TextureData, x: u32, y: u32) -> [f32; 4] {
    let offset = (y as usize * texture.width as usize + x as usize) * 4;
    let px = &texture.data[offset..offset + 4];
    [
        px[0] as f32 / 255.0,
        px[1] as f32 / 255.0,
        px[2] as f32 / 255.0,
        px[3] as f32 / 255.0,
    ]
}

fn sample_nearest(texture: &TextureData, u: f32, v: f32) -> [f32; 4] {
    let x = ((u * texture.width as f32).floor().max(0.0) as u32).min(texture.width - 1);
    let y = ((v * texture.height as f32).floor().max(0.0) as u32).min(texture.height - 1);
    texel(texture, x, y)
}

/// Bilinear with clamp-to-edge addressing.
fn sample_linear(texture: &TextureData, u: f32, v: f32) -> [f32; 4] {
    let max_x = (texture.width - 1) as f32;
    let max_y = (texture.height - 1) as f32;
    let x = (u * texture.width as f32 - 0.5).clamp(0.0, max_x);
    let y = (v * texture.height as f32 - 0.5).clamp(0.0, max_y);
    let (x0, y0) = (x.floor(), y.floor());
    let (x1, y1) = ((x0 + 1.0).min(max_x), (y0 + 1.0).min(max_y));
    let (fx, fy) = (x - x0, y - y0);

    let a = texel(texture, x0 as u32, y0 as u32);
    let b = texel(texture, x1 as u32, y0 as u32);
    let c = texel(texture, x0 as u32, y1 as u32);
    let d = texel(texture, x1 as u32, y1 as u32);

    let mut out = [0.0; 4];
    for channel in 0..4 {
        let top = a[channel] + (b[channel] - a[channel]) * fx;
        let bottom = c[channel] + (d[channel] - c[channel]) * fx;
        out[channel] = top + (bottom - top) * fy;
    }
    out
}

fn to_unorm(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
