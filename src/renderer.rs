//! Renderer capability used by the session.
//!
//! The session only talks to the renderer through [`RenderBackend`], so the
//! block picking and overlay patching can run against the GPU renderer, the
//! software reference, or a recording stub in tests.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::gpu::GpuRenderer;
use crate::software::SoftwareRenderer;

pub const U_RESOLUTION: &str = "u_resolution";
pub const U_TEXTURE: &str = "u_texture";
pub const U_TEXTURE_RESOLUTION: &str = "u_texture_resolution";
pub const U_BLOCKS: &str = "u_blocks";
pub const U_SELECTED_BLOCK: &str = "u_selected_block";
pub const U_OVERLAY: &str = "u_overlay";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UniformValue {
    Vec2([f32; 2]),
}

impl UniformValue {
    pub fn as_vec2(&self) -> Option<[f32; 2]> {
        match *self {
            Self::Vec2(value) => Some(value),
        }
    }
}

/// Tightly packed RGBA8 texel data, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TextureData {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureOptions {
    pub filter: TextureFilter,
}

/// Current uniform values, readable back by name.
pub type UniformMap = BTreeMap<String, UniformValue>;

pub trait RenderBackend {
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    fn uniform(&self, name: &str) -> Option<&UniformValue>;

    fn set_texture(&mut self, name: &str, texture: TextureData, options: TextureOptions)
        -> Result<()>;

    /// Resize the render target, in device pixels.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Replace the fragment program. Sources are WGSL.
    fn load_shader(&mut self, source: &str) -> Result<()>;

    /// Render one frame and read it back as tightly packed RGBA8, top row first.
    fn render_rgba(&mut self) -> Result<Vec<u8>>;

    fn target_size(&self) -> (u32, u32);

    fn backend_name(&self) -> &'static str;
}

impl<T: RenderBackend + ?Sized> RenderBackend for Box<T> {
    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        (**self).set_uniform(name, value)
    }

    fn uniform(&self, name: &str) -> Option<&UniformValue> {
        (**self).uniform(name)
    }

    fn set_texture(
        &mut self,
        name: &str,
        texture: TextureData,
        options: TextureOptions,
    ) -> Result<()> {
        (**self).set_texture(name, texture, options)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        (**self).resize(width, height)
    }

    fn load_shader(&mut self, source: &str) -> Result<()> {
        (**self).load_shader(source)
    }

    fn render_rgba(&mut self) -> Result<Vec<u8>> {
        (**self).render_rgba()
    }

    fn target_size(&self) -> (u32, u32) {
        (**self).target_size()
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// GPU when an adapter is available, software otherwise.
    #[default]
    Auto,
    Gpu,
    Software,
}

/// Build the renderer for `backend`.
pub fn create_renderer(backend: Backend) -> Result<Box<dyn RenderBackend>> {
    match backend {
        Backend::Software => Ok(Box::new(SoftwareRenderer::new())),
        Backend::Gpu => {
            let renderer = pollster::block_on(GpuRenderer::new())?;
            Ok(Box::new(renderer))
        }
        Backend::Auto => match pollster::block_on(GpuRenderer::new()) {
            Ok(renderer) => {
                log::info!("using gpu renderer");
                Ok(Box::new(renderer))
            }
            Err(error) => {
                log::warn!("gpu renderer unavailable ({error:#}); falling back to software");
                Ok(Box::new(SoftwareRenderer::new()))
            }
        },
    }
}
