use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use regex::Regex;

pub const FALLBACK_FILE_NAME: &str = "pixelated_image.png";
const JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg,
}

impl ExportFormat {
    /// `png`, `jpg` and `jpeg` are recognised; everything else exports as PNG.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            _ => Self::Png,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|extension| extension.to_str())
            .map_or(Self::Png, Self::from_extension)
    }
}

/// Name for the exported image: `<basename>_pixelated.<ext>`.
///
/// `original` may be a local path or a browser-style `C:\fakepath\x.jpg`.
/// The extension is kept when it is `png`, `jpg` or `jpeg`, otherwise `png`.
pub fn download_file_name(original: Option<&str>) -> String {
    let Some(original) = original.filter(|value| !value.trim().is_empty()) else {
        return FALLBACK_FILE_NAME.to_owned();
    };

    let file_name = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(original);
    let extension = match file_name.rsplit_once('.') {
        Some((_, extension)) if matches!(extension, "png" | "jpg" | "jpeg") => extension,
        _ => "png",
    };
    let stem = extension_pattern().replace(file_name, "");

    format!("{stem}_pixelated.{extension}")
}

fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\.[^.]*)$").expect("extension pattern is valid"))
}

/// Encode `image` to `path` in the format its extension names.
pub fn write_image(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed creating {}", path.display()))?;
    let writer = BufWriter::new(file);

    match ExportFormat::from_path(path) {
        ExportFormat::Png => PngEncoder::new(writer)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgba8,
            )
            .with_context(|| format!("failed encoding png {}", path.display()))?,
        ExportFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(writer, JPEG_QUALITY)
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .with_context(|| format!("failed encoding jpeg {}", path.display()))?
        }
    }
    Ok(())
}
