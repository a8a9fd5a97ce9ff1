//! Frame render benchmarks for the software renderer.
//! Run: cargo bench

use blockpix::color::Rgba;
use blockpix::picker::BlockIndex;
use blockpix::session::{PointerEvent, Session, SessionConfig};
use blockpix::software::SoftwareRenderer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::RgbaImage;

fn session_720p() -> Session<SoftwareRenderer> {
    let mut session =
        Session::new(SoftwareRenderer::new(), SessionConfig::default()).expect("create session");
    let image = RgbaImage::from_fn(1280, 720, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 96, 255])
    });
    session.set_image(&image, "bench").expect("apply image");
    session
        .paint_block(BlockIndex::new(3, 3), Rgba::new(255, 0, 0, 200))
        .expect("paint block");
    session
}

fn bench_software_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_frame");
    group.sample_size(20);

    let mut session = session_720p();
    group.bench_function("software_720p_36_blocks", |b| {
        b.iter(|| black_box(session.render().expect("render")));
    });

    group.bench_function("pointer_paint_720p", |b| {
        let mut x = 0.0_f32;
        b.iter(|| {
            x = (x + 37.0) % 1280.0;
            black_box(
                session
                    .pointer(PointerEvent::drag(x, 360.0))
                    .expect("paint"),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_software_render);
criterion_main!(benches);
