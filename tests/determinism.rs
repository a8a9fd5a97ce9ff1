use std::fs;
use std::path::Path;

use blockpix::renderer::RenderBackend;
use blockpix::script::{apply_actions, load_and_validate_script, session_config};
use blockpix::session::Session;
use blockpix::software::SoftwareRenderer;
use image::RgbaImage;
use tempfile::tempdir;

const SCRIPT: &str = r##"
version: 1
image: photo.png
blocks: 9
overlay: { init: noise, seed: 42, max_intensity: 24 }
actions:
  - stroke: { color: "#ff8800", points: [[3, 3], [20, 3], [40, 30]] }
  - paint: { color: "#0000ff80", block: [1, 1] }
"##;

#[test]
fn determinism_same_script_renders_identical_frames() {
    let dir = tempdir().expect("tempdir should create");
    let script_path = write_fixture(dir.path(), SCRIPT);

    let first = render_hash(&script_path);
    let second = render_hash(&script_path);
    assert_eq!(first, second, "script render should be deterministic");
}

#[test]
fn determinism_noise_seed_changes_output() {
    let dir = tempdir().expect("tempdir should create");
    let seeded = write_fixture(dir.path(), SCRIPT);
    let reseeded_dir = tempdir().expect("tempdir should create");
    let reseeded = write_fixture(reseeded_dir.path(), &SCRIPT.replace("seed: 42", "seed: 43"));

    assert_ne!(
        render_hash(&seeded),
        render_hash(&reseeded),
        "different noise seeds should produce different frames"
    );
}

fn write_fixture(dir: &Path, script: &str) -> std::path::PathBuf {
    let image = RgbaImage::from_fn(48, 36, |x, y| {
        image::Rgba([(x * 5) as u8, (y * 7) as u8, ((x + y) * 3) as u8, 255])
    });
    image.save(dir.join("photo.png")).expect("image should save");
    let script_path = dir.join("session.yaml");
    fs::write(&script_path, script).expect("script should write");
    script_path
}

fn render_hash(script_path: &Path) -> u64 {
    let script = load_and_validate_script(script_path).expect("failed to load script");
    let config = session_config(&script).expect("failed to build config");
    let mut session =
        Session::new(SoftwareRenderer::new(), config).expect("failed to create session");
    assert_eq!(
        session.renderer().backend_name(),
        "software",
        "Determinism tests must run on CPU backend"
    );
    session
        .load_image(&script.image)
        .expect("failed to load image");
    apply_actions(&mut session, &script.actions).expect("failed to apply actions");

    let frame = session.render().expect("failed to render frame for hash");
    fnv1a64(frame.as_raw())
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0001_0000_01b3);
    }
    hash
}
