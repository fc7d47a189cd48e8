//! End-to-end pipeline tests against a real adapter. Ignored by default;
//! run with `cargo test -- --ignored` on a machine with a GPU.

use effectstack::{parse_stack, Reconciler};
use renderer::{FramePixels, GpuContext, Pass, PassRegistry, PipelineOrchestrator};

fn orchestrator() -> (PipelineOrchestrator, Reconciler<PassRegistry>) {
    let gpu = GpuContext::headless().expect("no usable GPU adapter");
    let registry = PassRegistry::new(gpu.device.clone(), gpu.queue.clone());
    let orchestrator = PipelineOrchestrator::new(gpu).expect("blit program failed");
    (orchestrator, Reconciler::new(registry))
}

fn render_stack(
    orchestrator: &mut PipelineOrchestrator,
    reconciler: &mut Reconciler<PassRegistry>,
    stack_json: &str,
) -> FramePixels {
    let specs = parse_stack(stack_json).expect("stack document");
    let passes = reconciler.reconcile(&specs).expect("reconcile");
    let mut refs: Vec<&mut dyn Pass> =
        passes.into_iter().map(|p| &mut **p as &mut dyn Pass).collect();
    orchestrator.render_frame(&mut refs).expect("render");
    orchestrator.read_frame().expect("readback")
}

#[test]
#[ignore]
fn empty_chain_reproduces_the_input() {
    let (mut orchestrator, mut reconciler) = orchestrator();
    let mut input = FramePixels::new(16, 9);
    for y in 0..9 {
        for x in 0..16 {
            input.put_pixel(x, y, [x as u8 * 16, y as u8 * 28, 7, 255]);
        }
    }
    orchestrator.prepare_frame(&input);
    let output = render_stack(&mut orchestrator, &mut reconciler, "[]");
    assert_eq!(output, input);
}

#[test]
#[ignore]
fn invert_flips_every_channel() {
    let (mut orchestrator, mut reconciler) = orchestrator();
    orchestrator.prepare_frame(&FramePixels::solid(8, 8, [10, 200, 30, 255]));
    let output = render_stack(
        &mut orchestrator,
        &mut reconciler,
        r#"[{"id": "a", "type": "invert"}]"#,
    );
    assert_eq!(output.pixel(3, 5), [245, 55, 225, 255]);
}

#[test]
#[ignore]
fn palette_snaps_red_bitmap_to_red_entry() {
    let (mut orchestrator, mut reconciler) = orchestrator();
    orchestrator.prepare_frame(&FramePixels::solid(100, 50, [255, 0, 0, 255]));
    let output = render_stack(
        &mut orchestrator,
        &mut reconciler,
        r##"[{"id": "p", "type": "palette",
            "options": {"preset": "Custom", "customColors": ["#FF0000", "#0000FF"]}}]"##,
    );
    for y in 0..50 {
        for x in 0..100 {
            assert_eq!(output.pixel(x, y), [255, 0, 0, 255]);
        }
    }
}

#[test]
#[ignore]
fn sobel_on_a_flat_input_detects_no_edges() {
    let (mut orchestrator, mut reconciler) = orchestrator();
    orchestrator.prepare_frame(&FramePixels::solid(8, 8, [120, 120, 120, 255]));
    let output = render_stack(
        &mut orchestrator,
        &mut reconciler,
        r#"[{"id": "e", "type": "sobel"}]"#,
    );
    assert_eq!(output.pixel(4, 4), [0, 0, 0, 255]);
}

#[test]
#[ignore]
fn zero_strength_chroma_is_an_identity() {
    let (mut orchestrator, mut reconciler) = orchestrator();
    let input = FramePixels::solid(8, 8, [40, 90, 200, 255]);
    orchestrator.prepare_frame(&input);
    let output = render_stack(
        &mut orchestrator,
        &mut reconciler,
        r#"[{"id": "c", "type": "chroma", "options": {"strength": 0}}]"#,
    );
    assert_eq!(output, input);
}

#[test]
#[ignore]
fn single_row_sort_is_monotonic_after_full_network() {
    let (mut orchestrator, mut reconciler) = orchestrator();
    let mut input = FramePixels::new(32, 1);
    for x in 0..32 {
        let v = ((x * 37) % 32) as u8 * 8;
        input.put_pixel(x, 0, [v, v, v, 255]);
    }
    orchestrator.prepare_frame(&input);
    let output = render_stack(
        &mut orchestrator,
        &mut reconciler,
        r#"[{"id": "s", "type": "pixelsort",
            "options": {"mode": "Fully Sorted", "sortBy": "Luminance", "direction": "Right"}}]"#,
    );
    let row: Vec<u8> = (0..32).map(|x| output.pixel(x, 0)[0]).collect();
    assert!(
        row.windows(2).all(|w| w[0] <= w[1]),
        "row not sorted: {row:?}"
    );
}

#[test]
#[ignore]
fn grayscale_then_posterize_composes_in_order() {
    let (mut orchestrator, mut reconciler) = orchestrator();
    orchestrator.prepare_frame(&FramePixels::solid(4, 4, [255, 0, 0, 255]));
    let output = render_stack(
        &mut orchestrator,
        &mut reconciler,
        r#"[{"id": "g", "type": "grayscale"},
            {"id": "p", "type": "posterize", "options": {"levels": 2}}]"#,
    );
    let px = output.pixel(0, 0);
    assert_eq!(px[0], px[1]);
    assert_eq!(px[1], px[2]);
    // Red luminance (~0.299) posterizes to the bottom band under 2 levels.
    assert!(px[0] <= 1, "expected bottom band, got {px:?}");
}
