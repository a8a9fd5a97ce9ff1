use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::color::Rgba;
use crate::grid::{DEFAULT_BLOCKS, DEFAULT_MAX_BLOCKS, MAX_BLOCKS_CEILING};
use crate::overlay::OverlayInit;
use crate::renderer::Backend;

pub const SCRIPT_VERSION: u32 = 1;

/// A session script: one source image plus an ordered list of edits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionScript {
    pub version: u32,
    pub image: PathBuf,
    #[serde(default = "default_blocks")]
    pub blocks: f32,
    #[serde(default = "default_max_blocks")]
    pub max_blocks: f32,
    #[serde(default = "default_device_pixel_ratio")]
    pub device_pixel_ratio: f32,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default)]
    pub overlay: OverlayInit,
    #[serde(default)]
    pub filter: FilterMode,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub shader: Option<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl SessionScript {
    pub fn validate(&self) -> Result<()> {
        if self.version != SCRIPT_VERSION {
            bail!(
                "unsupported script version {} (expected {})",
                self.version,
                SCRIPT_VERSION
            );
        }
        if !self.max_blocks.is_finite()
            || self.max_blocks < 1.0
            || self.max_blocks > MAX_BLOCKS_CEILING
        {
            bail!(
                "max_blocks must be between 1 and {}, got {}",
                MAX_BLOCKS_CEILING,
                self.max_blocks
            );
        }
        if !self.blocks.is_finite() || self.blocks <= 0.0 {
            bail!("blocks must be > 0, got {}", self.blocks);
        }
        if !self.device_pixel_ratio.is_finite() || self.device_pixel_ratio <= 0.0 {
            bail!(
                "device_pixel_ratio must be > 0, got {}",
                self.device_pixel_ratio
            );
        }
        if self.load_timeout_ms == 0 {
            bail!("load_timeout_ms must be > 0");
        }

        for (index, action) in self.actions.iter().enumerate() {
            action
                .validate()
                .map_err(|error| anyhow::anyhow!("actions[{index}]: {error}"))?;
        }
        Ok(())
    }

    pub fn paint_count(&self) -> usize {
        self.actions
            .iter()
            .map(|action| match action {
                Action::Stroke(stroke) => stroke.points.len(),
                Action::Paint(_) => 1,
                Action::Blocks(_) => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Pointer-down at the first point, primary-button moves through the rest.
    Stroke(Stroke),
    /// Paint one block by its grid coordinates.
    Paint(BlockPaint),
    /// Change the block count (discards painted blocks).
    Blocks(f32),
}

impl Action {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Stroke(stroke) => {
                if stroke.points.is_empty() {
                    bail!("stroke needs at least one point");
                }
                if let Some([x, y]) = stroke
                    .points
                    .iter()
                    .find(|[x, y]| !x.is_finite() || !y.is_finite())
                {
                    bail!("stroke point ({x}, {y}) is not finite");
                }
            }
            Self::Paint(_) => {}
            Self::Blocks(value) => {
                if !value.is_finite() {
                    bail!("blocks must be a finite number");
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stroke {
    pub color: Rgba,
    pub points: Vec<[f32; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockPaint {
    pub color: Rgba,
    pub block: [u32; 2],
}

fn default_blocks() -> f32 {
    DEFAULT_BLOCKS
}

fn default_max_blocks() -> f32 {
    DEFAULT_MAX_BLOCKS
}

fn default_device_pixel_ratio() -> f32 {
    1.0
}

fn default_load_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_script_fills_defaults() {
        let script: SessionScript =
            serde_yaml::from_str("version: 1\nimage: photo.png\n").expect("script should parse");
        script.validate().expect("script should validate");
        assert_eq!(script.blocks, 36.0);
        assert_eq!(script.max_blocks, 50.0);
        assert_eq!(script.overlay, OverlayInit::Transparent);
        assert_eq!(script.backend, Backend::Auto);
        assert!(script.actions.is_empty());
    }

    #[test]
    fn actions_parse_in_order() {
        let script: SessionScript = serde_yaml::from_str(
            r##"
version: 1
image: photo.png
actions:
  - stroke: { color: "#ff0000", points: [[10, 20], [30, 20]] }
  - paint: { color: "#00ff0080", block: [0, 9] }
  - blocks: 12
"##,
        )
        .expect("script should parse");
        script.validate().expect("script should validate");

        assert_eq!(script.actions.len(), 3);
        assert!(matches!(&script.actions[0], Action::Stroke(stroke) if stroke.points.len() == 2));
        assert!(matches!(
            &script.actions[1],
            Action::Paint(paint) if paint.block == [0, 9] && paint.color == Rgba::new(0, 255, 0, 128)
        ));
        assert!(matches!(script.actions[2], Action::Blocks(value) if value == 12.0));
        assert_eq!(script.paint_count(), 3);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<SessionScript, _> =
            serde_yaml::from_str("version: 1\nimage: a.png\nzoom: 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn empty_stroke_fails_validation() {
        let script: SessionScript = serde_yaml::from_str(
            "version: 1\nimage: a.png\nactions:\n  - stroke: { color: \"#fff\", points: [] }\n",
        )
        .expect("script should parse");
        let err = script.validate().expect_err("empty stroke must fail");
        assert!(err.to_string().contains("actions[0]"));
    }

    #[test]
    fn max_blocks_above_ceiling_fails_validation() {
        let script: SessionScript = serde_yaml::from_str(
            "version: 1\nimage: a.png\nblocks: 3000000\nmax_blocks: 3000000\n",
        )
        .expect("script should parse");
        let err = script.validate().expect_err("unbounded max_blocks must fail");
        assert!(err.to_string().contains("max_blocks"), "got {err}");

        let at_ceiling: SessionScript =
            serde_yaml::from_str("version: 1\nimage: a.png\nmax_blocks: 1024\n")
                .expect("script should parse");
        at_ceiling.validate().expect("ceiling itself is allowed");
    }

    #[test]
    fn wrong_version_fails_validation() {
        let script: SessionScript =
            serde_yaml::from_str("version: 2\nimage: a.png\n").expect("script should parse");
        assert!(script.validate().is_err());
    }
}
