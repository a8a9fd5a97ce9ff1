use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use crate::error_codes::{CodedError, SCRIPT_INVALID};
use crate::picker::BlockIndex;
use crate::renderer::{RenderBackend, TextureFilter};
use crate::schema::{Action, FilterMode, SessionScript};
use crate::session::{PointerEvent, Session, SessionConfig};

pub fn load_and_validate_script(path: &Path) -> Result<SessionScript> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let mut script: SessionScript = serde_yaml::from_str(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(CodedError::usage(
            SCRIPT_INVALID,
            format!(
                "failed to parse yaml in {} at {}: {}",
                path.display(),
                location,
                error
            ),
        ))
    })?;

    script.validate().map_err(|error| {
        anyhow!(CodedError::usage(
            SCRIPT_INVALID,
            format!("{}: {error}", path.display())
        )
        .with_details(json!({ "script": path.display().to_string() })))
    })?;

    let script_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    script.image = resolve_and_validate_path(&script_dir, &script.image, "image")?;
    if let Some(shader) = &script.shader {
        script.shader = Some(resolve_and_validate_path(&script_dir, shader, "shader")?);
    }
    if let Some(output) = &script.output {
        if !output.is_absolute() {
            script.output = Some(script_dir.join(output));
        }
    }
    Ok(script)
}

pub fn session_config(script: &SessionScript) -> Result<SessionConfig> {
    let shader_source = match &script.shader {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read shader {}", path.display()))?,
        ),
        None => None,
    };

    Ok(SessionConfig {
        initial_blocks: script.blocks,
        max_blocks: script.max_blocks,
        device_pixel_ratio: script.device_pixel_ratio,
        overlay_init: script.overlay,
        load_timeout: Duration::from_millis(script.load_timeout_ms),
        shader_source,
        texture_filter: match script.filter {
            FilterMode::Nearest => TextureFilter::Nearest,
            FilterMode::Linear => TextureFilter::Linear,
        },
        ..SessionConfig::default()
    })
}

/// Replay the script's actions. Returns how many blocks were painted.
pub fn apply_actions<R: RenderBackend>(session: &mut Session<R>, actions: &[Action]) -> Result<usize> {
    let mut painted = 0;
    for (index, action) in actions.iter().enumerate() {
        match action {
            Action::Stroke(stroke) => {
                session.set_brush(stroke.color);
                for (point_index, [x, y]) in stroke.points.iter().enumerate() {
                    let event = if point_index == 0 {
                        PointerEvent::down(*x, *y)
                    } else {
                        PointerEvent::drag(*x, *y)
                    };
                    if session
                        .pointer(event)
                        .with_context(|| format!("actions[{index}] point {point_index}"))?
                        .is_some()
                    {
                        painted += 1;
                    }
                }
            }
            Action::Paint(paint) => {
                let [x, y] = paint.block;
                session
                    .paint_block(BlockIndex::new(x, y), paint.color)
                    .with_context(|| format!("actions[{index}]"))?;
                painted += 1;
            }
            Action::Blocks(value) => {
                if !session.set_blocks(Some(*value))? {
                    log::warn!("actions[{index}]: ignoring block count {value}");
                }
            }
        }
    }
    Ok(painted)
}

fn resolve_and_validate_path(script_dir: &Path, path: &Path, field_name: &str) -> Result<PathBuf> {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        script_dir.join(path)
    };

    if !resolved.exists() {
        bail!("{} does not exist: {}", field_name, resolved.display());
    }
    if !resolved.is_file() {
        bail!("{} is not a file: {}", field_name, resolved.display());
    }
    Ok(resolved)
}
