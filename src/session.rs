//! Single-owner controller tying the block grid, the overlay buffer and a
//! renderer together.
//!
//! Every pointer paint resolves a block, patches the overlay and re-uploads it
//! before returning, so the renderer always sees the latest buffer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use serde_json::json;

use crate::color::Rgba;
use crate::error_codes::{
    CodedError, IMAGE_DECODE_FAILED, IMAGE_LOAD_TIMEOUT, INVALID_BLOCK_COUNT,
};
use crate::grid::{
    normalize_request, BlockGrid, CanvasGeometry, DEFAULT_BLOCKS, DEFAULT_MAX_BLOCKS,
    MAX_BLOCKS_CEILING,
};
use crate::image_source::{spawn_decode, LoadError, PendingImage, DEFAULT_LOAD_TIMEOUT};
use crate::overlay::{OverlayBuffer, OverlayInit};
use crate::picker::{resolve_block, BlockIndex};
use crate::renderer::{
    RenderBackend, TextureData, TextureFilter, TextureOptions, UniformValue, U_BLOCKS,
    U_OVERLAY, U_RESOLUTION, U_SELECTED_BLOCK, U_TEXTURE, U_TEXTURE_RESOLUTION,
};
use crate::shader::PIXELATE_SHADER;

/// `buttons` bitmask value for "only the primary button held".
pub const PRIMARY_BUTTON: u16 = 1;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub initial_blocks: f32,
    pub max_blocks: f32,
    pub device_pixel_ratio: f32,
    pub overlay_init: OverlayInit,
    pub load_timeout: Duration,
    pub shader_source: Option<String>,
    pub texture_filter: TextureFilter,
    pub brush: Rgba,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_blocks: DEFAULT_BLOCKS,
            max_blocks: DEFAULT_MAX_BLOCKS,
            device_pixel_ratio: 1.0,
            overlay_init: OverlayInit::default(),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            shader_source: None,
            texture_filter: TextureFilter::Nearest,
            brush: Rgba::RED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Move,
}

/// Pointer event in canvas-relative CSS pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f32,
    pub y: f32,
    pub buttons: u16,
}

impl PointerEvent {
    pub fn down(x: f32, y: f32) -> Self {
        Self {
            kind: PointerKind::Down,
            x,
            y,
            buttons: PRIMARY_BUTTON,
        }
    }

    /// Move with the primary button held.
    pub fn drag(x: f32, y: f32) -> Self {
        Self {
            kind: PointerKind::Move,
            x,
            y,
            buttons: PRIMARY_BUTTON,
        }
    }

    pub fn hover(x: f32, y: f32) -> Self {
        Self {
            kind: PointerKind::Move,
            x,
            y,
            buttons: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

/// A load started by [`Session::begin_load`].
#[derive(Debug)]
pub struct PendingLoad {
    generation: u64,
    image: PendingImage,
}

pub struct Session<R: RenderBackend> {
    renderer: R,
    config: SessionConfig,
    canvas: CanvasGeometry,
    grid: BlockGrid,
    overlay: OverlayBuffer,
    brush: Rgba,
    selected: Option<BlockIndex>,
    source: Option<SourceInfo>,
    load_generation: u64,
}

impl<R: RenderBackend> Session<R> {
    pub fn new(mut renderer: R, mut config: SessionConfig) -> Result<Self> {
        config.max_blocks = config.max_blocks.min(MAX_BLOCKS_CEILING);
        let shader = config.shader_source.as_deref().unwrap_or(PIXELATE_SHADER);
        renderer
            .load_shader(shader)
            .with_context(|| format!("{} renderer rejected the shader", renderer.backend_name()))?;

        let canvas = CanvasGeometry::for_image(1, 1, config.device_pixel_ratio);
        let initial = normalize_request(Some(config.initial_blocks), config.max_blocks)
            .unwrap_or(DEFAULT_BLOCKS.min(config.max_blocks));
        let grid = BlockGrid::square(initial, &canvas);
        let overlay = OverlayBuffer::new(grid.columns(), grid.rows(), config.overlay_init)?;

        let mut session = Self {
            renderer,
            brush: config.brush,
            config,
            canvas,
            grid,
            overlay,
            selected: None,
            source: None,
            load_generation: 0,
        };
        session.apply_canvas()?;
        session.apply_grid(initial)?;
        Ok(session)
    }

    /// Change the block count. Missing or non-positive requests are ignored
    /// and return `false`; large requests are clamped to `max_blocks`.
    ///
    /// Painted blocks are discarded whenever the grid is rebuilt.
    pub fn set_blocks(&mut self, value: Option<f32>) -> Result<bool> {
        let Some(requested) = normalize_request(value, self.config.max_blocks) else {
            return Ok(false);
        };
        self.apply_grid(requested)?;
        Ok(true)
    }

    pub fn set_brush(&mut self, color: Rgba) {
        self.brush = color;
    }

    /// Feed one pointer event. Returns the painted block, if any.
    ///
    /// Downs always paint; moves paint only while exactly the primary button
    /// is held. Positions outside the canvas are dropped.
    pub fn pointer(&mut self, event: PointerEvent) -> Result<Option<BlockIndex>> {
        if event.kind == PointerKind::Move && event.buttons != PRIMARY_BUTTON {
            return Ok(None);
        }
        if !self.canvas.contains(event.x, event.y) {
            log::trace!("pointer ({}, {}) outside canvas", event.x, event.y);
            return Ok(None);
        }

        let block = resolve_block(
            event.x,
            event.y,
            self.canvas.css_width,
            self.canvas.css_height,
            self.grid.blocks_x,
            self.grid.blocks_y,
        );
        self.paint_block(block, self.brush)?;
        Ok(Some(block))
    }

    pub fn paint_block(&mut self, block: BlockIndex, color: Rgba) -> Result<()> {
        self.overlay.patch(block, color)?;
        self.selected = Some(block);
        self.renderer.set_uniform(
            U_SELECTED_BLOCK,
            UniformValue::Vec2([block.x as f32, block.y as f32]),
        );
        log::debug!("selected block ({}, {}) -> {}", block.x, block.y, color);
        self.upload_overlay()
    }

    /// Start decoding `path`. Any load started earlier becomes stale.
    pub fn begin_load(&mut self, path: &Path) -> Result<PendingLoad> {
        let image = spawn_decode(path).map_err(|error| coded_load_error(path, error))?;
        self.load_generation += 1;
        Ok(PendingLoad {
            generation: self.load_generation,
            image,
        })
    }

    /// Finish a load. Returns `false` when a newer load has superseded it.
    pub fn finish_load(&mut self, pending: PendingLoad) -> Result<bool> {
        if pending.generation != self.load_generation {
            log::debug!(
                "dropping superseded load of {}",
                pending.image.path().display()
            );
            return Ok(false);
        }

        let path: PathBuf = pending.image.path().to_path_buf();
        let image = pending
            .image
            .wait(self.config.load_timeout)
            .map_err(|error| coded_load_error(&path, error))?;
        self.set_image(&image, &path.display().to_string())?;
        Ok(true)
    }

    pub fn load_image(&mut self, path: &Path) -> Result<()> {
        let pending = self.begin_load(path)?;
        self.finish_load(pending)?;
        Ok(())
    }

    /// Use an already decoded image as the source. The canvas takes the
    /// image's size and the current block count is re-applied.
    pub fn set_image(&mut self, image: &RgbaImage, label: &str) -> Result<()> {
        let (width, height) = image.dimensions();
        self.renderer.set_texture(
            U_TEXTURE,
            TextureData::new(image.as_raw().clone(), width, height),
            TextureOptions {
                filter: self.config.texture_filter,
            },
        )?;
        self.renderer.set_uniform(
            U_TEXTURE_RESOLUTION,
            UniformValue::Vec2([width as f32, height as f32]),
        );

        self.canvas = CanvasGeometry::for_image(width, height, self.config.device_pixel_ratio);
        self.apply_canvas()?;
        self.source = Some(SourceInfo {
            label: label.to_owned(),
            width,
            height,
        });
        log::info!("loaded {label} ({width}x{height})");

        self.apply_grid(self.grid.requested)
    }

    pub fn render(&mut self) -> Result<RgbaImage> {
        let rgba = self.renderer.render_rgba()?;
        let (width, height) = self.renderer.target_size();
        RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
            anyhow!(
                "{} renderer returned a frame that does not match {}x{}",
                self.renderer.backend_name(),
                width,
                height
            )
        })
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.overlay.snapshot()
    }

    pub fn overlay(&self) -> &OverlayBuffer {
        &self.overlay
    }

    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    pub fn canvas(&self) -> &CanvasGeometry {
        &self.canvas
    }

    pub fn selected(&self) -> Option<BlockIndex> {
        self.selected
    }

    pub fn source(&self) -> Option<&SourceInfo> {
        self.source.as_ref()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    fn apply_canvas(&mut self) -> Result<()> {
        let (width, height) = self.canvas.device_size();
        self.renderer.resize(width, height)?;
        self.renderer.set_uniform(
            U_RESOLUTION,
            UniformValue::Vec2([width as f32, height as f32]),
        );
        Ok(())
    }

    fn apply_grid(&mut self, requested: f32) -> Result<()> {
        let grid = BlockGrid::square(requested, &self.canvas);
        self.overlay
            .resize(grid.columns(), grid.rows(), self.config.overlay_init)
            .map_err(|error| {
                anyhow!(CodedError::usage(INVALID_BLOCK_COUNT, error.to_string())
                    .with_details(json!({
                        "requested": requested,
                        "columns": grid.columns(),
                        "rows": grid.rows(),
                    })))
            })?;
        self.grid = grid;
        self.renderer.set_uniform(
            U_BLOCKS,
            UniformValue::Vec2([self.grid.blocks_x, self.grid.blocks_y]),
        );
        self.selected = None;
        log::debug!(
            "grid {}x{} blocks (requested {})",
            self.grid.columns(),
            self.grid.rows(),
            requested
        );
        self.upload_overlay()
    }

    fn upload_overlay(&mut self) -> Result<()> {
        self.renderer.set_texture(
            U_OVERLAY,
            TextureData::new(
                self.overlay.snapshot(),
                self.overlay.columns(),
                self.overlay.rows(),
            ),
            TextureOptions::default(),
        )
    }
}

fn coded_load_error(path: &Path, error: LoadError) -> anyhow::Error {
    let code = match error {
        LoadError::Timeout { .. } => IMAGE_LOAD_TIMEOUT,
        _ => IMAGE_DECODE_FAILED,
    };
    anyhow!(CodedError::runtime(code, error.to_string())
        .with_details(json!({ "path": path.display().to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::UniformMap;

    /// Records every call so tests can inspect what reached the renderer.
    #[derive(Default)]
    struct RecordingBackend {
        uniforms: UniformMap,
        textures: Vec<(String, TextureData)>,
        size: (u32, u32),
        shaders: usize,
    }

    impl RenderBackend for RecordingBackend {
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
            _options: TextureOptions,
        ) -> Result<()> {
            self.textures.push((name.to_owned(), texture));
            Ok(())
        }

        fn resize(&mut self, width: u32, height: u32) -> Result<()> {
            self.size = (width, height);
            Ok(())
        }

        fn load_shader(&mut self, _source: &str) -> Result<()> {
            self.shaders += 1;
            Ok(())
        }

        fn render_rgba(&mut self) -> Result<Vec<u8>> {
            Ok(vec![0; self.size.0 as usize * self.size.1 as usize * 4])
        }

        fn target_size(&self) -> (u32, u32) {
            self.size
        }

        fn backend_name(&self) -> &'static str {
            "recording"
        }
    }

    impl RecordingBackend {
        fn last_overlay(&self) -> &TextureData {
            self.textures
                .iter()
                .rev()
                .find(|(name, _)| name == U_OVERLAY)
                .map(|(_, texture)| texture)
                .expect("overlay should have been uploaded")
        }
    }

    fn session_with_image(width: u32, height: u32, blocks: f32) -> Session<RecordingBackend> {
        let config = SessionConfig {
            initial_blocks: blocks,
            ..SessionConfig::default()
        };
        let mut session =
            Session::new(RecordingBackend::default(), config).expect("session should build");
        let image = RgbaImage::new(width, height);
        session
            .set_image(&image, "memory")
            .expect("image should apply");
        session
    }

    #[test]
    fn pointer_near_top_right_paints_last_block_and_reuploads() {
        let mut session = session_with_image(500, 500, 10.0);
        session.set_brush(Rgba::new(1, 2, 3, 4));

        let block = session
            .pointer(PointerEvent::down(495.0, 5.0))
            .expect("pointer should succeed");
        assert_eq!(block, Some(BlockIndex::new(9, 9)));

        let overlay = session.renderer().last_overlay();
        assert_eq!((overlay.width, overlay.height), (10, 10));
        assert_eq!(&overlay.data[36..40], &[1, 2, 3, 4]);
        assert_eq!(
            session.renderer().uniform(U_SELECTED_BLOCK),
            Some(&UniformValue::Vec2([9.0, 9.0]))
        );
    }

    #[test]
    fn moves_paint_only_with_primary_button_alone() {
        let mut session = session_with_image(100, 100, 4.0);
        assert_eq!(
            session
                .pointer(PointerEvent::hover(10.0, 10.0))
                .expect("hover should succeed"),
            None
        );
        let chorded = PointerEvent {
            buttons: PRIMARY_BUTTON | 2,
            ..PointerEvent::drag(10.0, 10.0)
        };
        assert_eq!(session.pointer(chorded).expect("move should succeed"), None);
        assert!(session
            .pointer(PointerEvent::drag(10.0, 10.0))
            .expect("drag should succeed")
            .is_some());
    }

    #[test]
    fn pointers_outside_canvas_are_dropped() {
        let mut session = session_with_image(100, 100, 4.0);
        let before = session.snapshot();
        assert_eq!(
            session
                .pointer(PointerEvent::down(150.0, 10.0))
                .expect("pointer should succeed"),
            None
        );
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn set_blocks_ignores_falsy_and_clamps_and_reallocates() {
        let mut session = session_with_image(200, 100, 4.0);
        session
            .paint_block(BlockIndex::new(0, 0), Rgba::RED)
            .expect("paint should succeed");

        assert!(!session.set_blocks(None).expect("none is a no-op"));
        assert!(!session.set_blocks(Some(0.0)).expect("zero is a no-op"));
        assert_eq!(session.overlay().color_at(BlockIndex::new(0, 0)).ok(), Some(Rgba::RED));

        assert!(session.set_blocks(Some(500.0)).expect("large value clamps"));
        assert_eq!(session.grid().requested, 50.0);
        assert_eq!((session.grid().columns(), session.grid().rows()), (100, 50));
        assert_eq!(session.overlay().len(), 4 * 100 * 50);
        assert!(session.snapshot().iter().all(|byte| *byte == 0));
        assert_eq!(
            session.renderer().uniform(U_BLOCKS),
            Some(&UniformValue::Vec2([100.0, 50.0]))
        );
    }

    #[test]
    fn new_image_resizes_canvas_and_reapplies_blocks() {
        let mut session = session_with_image(100, 100, 5.0);
        session
            .set_image(&RgbaImage::new(300, 100), "wide")
            .expect("image should apply");
        assert_eq!(session.renderer().target_size(), (300, 100));
        assert_eq!((session.grid().columns(), session.grid().rows()), (15, 5));
        assert_eq!(
            session.renderer().uniform(U_TEXTURE_RESOLUTION),
            Some(&UniformValue::Vec2([300.0, 100.0]))
        );
    }

    #[test]
    fn superseded_load_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let first = dir.path().join("first.png");
        let second = dir.path().join("second.png");
        RgbaImage::new(20, 10).save(&first).expect("png should save");
        RgbaImage::new(10, 40).save(&second).expect("png should save");

        let mut session = Session::new(RecordingBackend::default(), SessionConfig::default())
            .expect("session should build");
        let stale = session.begin_load(&first).expect("load should start");
        let fresh = session.begin_load(&second).expect("load should start");

        assert!(!session.finish_load(stale).expect("stale load is a no-op"));
        assert!(session.finish_load(fresh).expect("fresh load should apply"));
        assert_eq!(
            session.source().map(|source| (source.width, source.height)),
            Some((10, 40))
        );
    }

    #[test]
    fn undecodable_image_surfaces_a_coded_error() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"nope").expect("file should write");

        let mut session = Session::new(RecordingBackend::default(), SessionConfig::default())
            .expect("session should build");
        let err = session.load_image(&path).expect_err("broken image must fail");
        let coded = crate::error_codes::find_coded_error(&err).expect("error should be coded");
        assert_eq!(coded.code, IMAGE_DECODE_FAILED);
    }

    #[test]
    fn extreme_aspect_ratio_is_a_coded_error_not_an_abort() {
        let mut session = session_with_image(100, 100, 50.0);
        let before = *session.grid();

        let err = session
            .set_image(&RgbaImage::new(100_000, 1), "sliver")
            .expect_err("grid wider than the overlay limit must fail");
        let coded = crate::error_codes::find_coded_error(&err).expect("error should be coded");
        assert_eq!(coded.code, INVALID_BLOCK_COUNT);
        assert_eq!(coded.exit_code(), 2);
        assert_eq!(*session.grid(), before);
        assert_eq!(session.overlay().len(), before.byte_len());
    }

    #[test]
    fn configured_max_blocks_is_capped_at_the_ceiling() {
        let config = SessionConfig {
            max_blocks: 1.0e9,
            ..SessionConfig::default()
        };
        let mut session =
            Session::new(RecordingBackend::default(), config).expect("session should build");
        session
            .set_image(&RgbaImage::new(10, 10), "memory")
            .expect("image should apply");
        assert!(session.set_blocks(Some(1.0e9)).expect("blocks should clamp"));
        assert_eq!(session.grid().requested, MAX_BLOCKS_CEILING);
    }

    #[test]
    fn failed_load_start_keeps_the_pending_load_current() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("photo.png");
        RgbaImage::new(6, 3).save(&path).expect("png should save");

        let mut session = Session::new(RecordingBackend::default(), SessionConfig::default())
            .expect("session should build");
        let pending = session.begin_load(&path).expect("load should start");
        let err = session
            .begin_load(&dir.path().join("missing.png"))
            .expect_err("missing file must not start");
        let coded = crate::error_codes::find_coded_error(&err).expect("error should be coded");
        assert_eq!(coded.code, IMAGE_DECODE_FAILED);

        assert!(session.finish_load(pending).expect("earlier load should still apply"));
        assert_eq!(
            session.source().map(|source| (source.width, source.height)),
            Some((6, 3))
        );
    }

    #[cfg(unix)]
    #[test]
    fn decode_that_never_finishes_reports_load_timeout() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("stuck.png");
        // Opening a FIFO with no writer blocks the decoder indefinitely.
        let status = std::process::Command::new("mkfifo")
            .arg(&path)
            .status()
            .expect("mkfifo should run");
        assert!(status.success(), "mkfifo should create the pipe");

        let config = SessionConfig {
            load_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        };
        let mut session =
            Session::new(RecordingBackend::default(), config).expect("session should build");
        let err = session
            .load_image(&path)
            .expect_err("stuck decode must time out");
        let coded = crate::error_codes::find_coded_error(&err).expect("error should be coded");
        assert_eq!(coded.code, IMAGE_LOAD_TIMEOUT);
        assert_eq!(coded.exit_code(), 1);
        assert!(session.source().is_none());
    }

    #[test]
    fn device_pixel_ratio_scales_render_target_only() {
        let config = SessionConfig {
            device_pixel_ratio: 2.0,
            initial_blocks: 4.0,
            ..SessionConfig::default()
        };
        let mut session =
            Session::new(RecordingBackend::default(), config).expect("session should build");
        session
            .set_image(&RgbaImage::new(40, 20), "memory")
            .expect("image should apply");
        assert_eq!(session.renderer().target_size(), (80, 40));

        // Pointer coordinates stay in CSS pixels.
        let block = session
            .pointer(PointerEvent::down(39.0, 19.0))
            .expect("pointer should succeed");
        assert_eq!(block, Some(BlockIndex::new(7, 0)));
    }
}
