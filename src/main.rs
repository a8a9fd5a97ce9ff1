use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use blockpix::color::Rgba;
use blockpix::error_codes::{
    find_coded_error, CodedError, EXPORT_FAILED, INVALID_BLOCK_COUNT, INVALID_CANVAS,
    INVALID_PAINT, INVALID_POINT, RUNTIME_ERROR,
};
use blockpix::export::{download_file_name, write_image};
use blockpix::grid::{normalize_request, BlockGrid, CanvasGeometry, DEFAULT_BLOCKS, DEFAULT_MAX_BLOCKS};
use blockpix::picker::{resolve_block, BlockIndex};
use blockpix::renderer::{create_renderer, Backend, RenderBackend};
use blockpix::script::{apply_actions, load_and_validate_script, session_config};
use blockpix::session::{Session, SessionConfig};

const AGENT_MODE_ENV: &str = "BLOCKPIX_AGENT_MODE";

#[derive(Debug, Parser)]
#[command(name = "blockpix")]
#[command(version = env!("BLOCKPIX_VERSION"))]
#[command(about = "Pixelate images on a square block grid and paint single blocks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a session script and write the rendered frame.
    Render {
        script: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Overrides the script's backend.
        #[arg(long, value_enum)]
        backend: Option<Backend>,
        #[arg(long)]
        json: bool,
    },
    /// Pixelate one image, optionally painting blocks.
    Pixelate {
        image: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BLOCKS)]
        blocks: f32,
        /// Block to paint, e.g. `3,4=#ff0000`. Repeatable.
        #[arg(long = "paint", value_name = "X,Y=#COLOR")]
        paints: Vec<String>,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Backend::Auto)]
        backend: Backend,
        #[arg(long)]
        json: bool,
    },
    /// Validate a session script without rendering.
    Check {
        script: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the block under a pointer position.
    Pick {
        #[arg(long, value_name = "WxH")]
        canvas: String,
        #[arg(long, default_value_t = DEFAULT_BLOCKS)]
        blocks: f32,
        #[arg(long, value_name = "X,Y")]
        at: String,
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Self::Render { json, .. }
            | Self::Pixelate { json, .. }
            | Self::Check { json, .. }
            | Self::Pick { json, .. } => *json,
        }
    }
}

#[derive(Debug, Serialize)]
struct RenderReport {
    ok: bool,
    output: String,
    width: u32,
    height: u32,
    columns: u32,
    rows: u32,
    backend: &'static str,
    sha256: String,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let json_errors = cli.command.json() || agent_mode();

    let result = match cli.command {
        Commands::Render {
            script,
            output,
            backend,
            json,
        } => run_render(&script, output, backend, json),
        Commands::Pixelate {
            image,
            blocks,
            paints,
            output,
            backend,
            json,
        } => run_pixelate(&image, blocks, &paints, output, backend, json),
        Commands::Check { script, json } => run_check(&script, json),
        Commands::Pick {
            canvas,
            blocks,
            at,
            json,
        } => run_pick(&canvas, blocks, &at, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report_error(&error, json_errors),
    }
}

fn agent_mode() -> bool {
    std::env::var(AGENT_MODE_ENV).is_ok_and(|value| value == "1")
}

fn report_error(error: &anyhow::Error, json: bool) -> ExitCode {
    let coded = find_coded_error(error)
        .cloned()
        .unwrap_or_else(|| CodedError::runtime(RUNTIME_ERROR, format!("{error:#}")));

    if json {
        match serde_json::to_string(&coded.envelope()) {
            Ok(envelope) => eprintln!("{envelope}"),
            Err(_) => eprintln!("error: {error:#}"),
        }
    } else {
        eprintln!("error: {error:#}");
    }
    ExitCode::from(coded.exit_code())
}

fn run_render(
    script_path: &Path,
    output: Option<PathBuf>,
    backend: Option<Backend>,
    json: bool,
) -> Result<()> {
    let script = load_and_validate_script(script_path)?;
    let config = session_config(&script)?;
    let renderer = create_renderer(backend.unwrap_or(script.backend))?;

    let mut session = Session::new(renderer, config)?;
    session.load_image(&script.image)?;
    let painted = apply_actions(&mut session, &script.actions)?;
    log::info!("painted {painted} blocks from {}", script_path.display());

    let output = output
        .or_else(|| script.output.clone())
        .unwrap_or_else(|| default_output_path(&script.image));
    export_frame(&mut session, &output, json)
}

fn run_pixelate(
    image: &Path,
    blocks: f32,
    paints: &[String],
    output: Option<PathBuf>,
    backend: Backend,
    json: bool,
) -> Result<()> {
    if normalize_request(Some(blocks), DEFAULT_MAX_BLOCKS).is_none() {
        return Err(anyhow!(CodedError::usage(
            INVALID_BLOCK_COUNT,
            format!("--blocks must be a positive number, got {blocks}")
        )));
    }
    let paints = paints
        .iter()
        .map(|value| parse_paint(value))
        .collect::<Result<Vec<_>>>()?;

    let config = SessionConfig {
        initial_blocks: blocks,
        ..SessionConfig::default()
    };
    let mut session = Session::new(create_renderer(backend)?, config)?;
    session.load_image(image)?;

    for (block, color) in paints {
        session.paint_block(block, color).map_err(|error| {
            anyhow!(CodedError::usage(INVALID_PAINT, format!("{error:#}")).with_details(json!({
                "block": block,
                "columns": session.grid().columns(),
                "rows": session.grid().rows(),
            })))
        })?;
    }

    let output = output.unwrap_or_else(|| default_output_path(image));
    export_frame(&mut session, &output, json)
}

fn run_check(script_path: &Path, json: bool) -> Result<()> {
    let script = load_and_validate_script(script_path)?;

    if json {
        let report = json!({
            "ok": true,
            "script": script_path.display().to_string(),
            "image": script.image.display().to_string(),
            "blocks": script.blocks,
            "max_blocks": script.max_blocks,
            "actions": script.actions.len(),
            "paints": script.paint_count(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "OK: {} ({}, {} blocks, max {})",
        script_path.display(),
        script.image.display(),
        script.blocks,
        script.max_blocks
    );
    println!(
        "Actions: {} ({} paints)",
        script.actions.len(),
        script.paint_count()
    );
    Ok(())
}

fn run_pick(canvas: &str, blocks: f32, at: &str, json: bool) -> Result<()> {
    let (width, height) = parse_pair::<u32>(canvas, 'x')
        .filter(|(width, height)| *width > 0 && *height > 0)
        .ok_or_else(|| {
            anyhow!(CodedError::usage(
                INVALID_CANVAS,
                format!("--canvas expects WxH with positive sizes, got '{canvas}'")
            ))
        })?;
    let requested = normalize_request(Some(blocks), DEFAULT_MAX_BLOCKS).ok_or_else(|| {
        anyhow!(CodedError::usage(
            INVALID_BLOCK_COUNT,
            format!("--blocks must be a positive number, got {blocks}")
        ))
    })?;

    let geometry = CanvasGeometry::for_image(width, height, 1.0);
    let (x, y) = parse_pair::<f32>(at, ',')
        .filter(|(x, y)| geometry.contains(*x, *y))
        .ok_or_else(|| {
            anyhow!(CodedError::usage(
                INVALID_POINT,
                format!("--at expects X,Y inside the {width}x{height} canvas, got '{at}'")
            ))
        })?;

    let grid = BlockGrid::square(requested, &geometry);
    let block = resolve_block(
        x,
        y,
        geometry.css_width,
        geometry.css_height,
        grid.blocks_x,
        grid.blocks_y,
    );

    if json {
        let report = json!({
            "ok": true,
            "block": block,
            "columns": grid.columns(),
            "rows": grid.rows(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "block {},{} ({}x{} grid)",
            block.x,
            block.y,
            grid.columns(),
            grid.rows()
        );
    }
    Ok(())
}

fn export_frame<R: RenderBackend>(session: &mut Session<R>, output: &Path, json: bool) -> Result<()> {
    let frame = session.render()?;
    write_image(&frame, output).map_err(|error| {
        anyhow!(CodedError::runtime(EXPORT_FAILED, format!("{error:#}"))
            .with_details(json!({ "output": output.display().to_string() })))
    })?;

    let report = RenderReport {
        ok: true,
        output: output.display().to_string(),
        width: frame.width(),
        height: frame.height(),
        columns: session.grid().columns(),
        rows: session.grid().rows(),
        backend: session.renderer().backend_name(),
        sha256: format!("{:x}", Sha256::digest(frame.as_raw())),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Wrote {} ({}x{}, {}x{} blocks, {})",
            report.output, report.width, report.height, report.columns, report.rows, report.backend
        );
    }
    Ok(())
}

fn default_output_path(image: &Path) -> PathBuf {
    image.with_file_name(download_file_name(image.to_str()))
}

fn parse_paint(value: &str) -> Result<(BlockIndex, Rgba)> {
    let invalid = |reason: String| {
        anyhow!(CodedError::usage(
            INVALID_PAINT,
            format!("--paint expects X,Y=#COLOR, got '{value}': {reason}")
        ))
    };

    let (block, color) = value
        .split_once('=')
        .ok_or_else(|| invalid("missing '='".to_owned()))?;
    let (x, y) =
        parse_pair::<u32>(block, ',').ok_or_else(|| invalid(format!("bad block '{block}'")))?;
    let color = color
        .trim()
        .parse::<Rgba>()
        .map_err(|error| invalid(error.to_string()))?;
    Ok((BlockIndex::new(x, y), color))
}

fn parse_pair<T: FromStr>(value: &str, separator: char) -> Option<(T, T)> {
    let (first, second) = value.split_once(separator)?;
    Some((first.trim().parse().ok()?, second.trim().parse().ok()?))
}
