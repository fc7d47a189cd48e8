//! Windowed live preview of the effect chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use effectstack::Reconciler;
use media::MediaSource;
use renderer::{GpuContext, Pass, PassRegistry, PipelineOrchestrator};
use tracing::{error, info};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::cli::PreviewArgs;
use crate::run::{load_media, load_stack, LoadedMedia};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub(crate) fn run_preview(args: PreviewArgs) -> Result<()> {
    let mut source = MediaSource::default();
    match load_media(&args.input)? {
        LoadedMedia::Still(pixels) => source.load_still(pixels),
        LoadedMedia::Animation(animation) => source.load_sequence(animation.frames)?,
    }
    let specs = load_stack(args.stack.as_deref())?;

    let initial = source
        .current_frame()
        .context("media has no frame to display")?;
    let (width, height) = args
        .size
        .unwrap_or((initial.width().max(1), initial.height().max(1)));

    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title("pixelpass preview")
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let size = window.inner_size();
    let gpu = GpuContext::for_surface(window.clone(), size.width, size.height)?;
    let registry = PassRegistry::new(gpu.device.clone(), gpu.queue.clone());
    let mut orchestrator = PipelineOrchestrator::new(gpu)?;
    let mut reconciler = Reconciler::new(registry);

    orchestrator.prepare_frame(initial);
    info!(width, height, animated = source.is_animated(), "preview window ready");

    let mut last_tick = Instant::now();
    let mut next_frame = Instant::now();
    window.request_redraw();

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                WindowEvent::KeyboardInput { event, .. } => {
                    if event.state == ElementState::Pressed {
                        let quit = matches!(event.logical_key, Key::Named(NamedKey::Escape))
                            || matches!(event.logical_key, Key::Character(ref v) if v.as_str() == "q");
                        if quit {
                            elwt.exit();
                        }
                    }
                }
                WindowEvent::Resized(new_size) => {
                    orchestrator.resize_surface(new_size.width, new_size.height);
                    window.request_redraw();
                }
                WindowEvent::Occluded(occluded) => {
                    // Pacing would otherwise burn the hidden interval in one
                    // jump when the window comes back.
                    if !occluded {
                        source.reset_pacing();
                        last_tick = Instant::now();
                    }
                }
                WindowEvent::RedrawRequested => {
                    let now = Instant::now();
                    let elapsed_ms = now.duration_since(last_tick).as_secs_f64() * 1000.0;
                    last_tick = now;

                    match source.tick(elapsed_ms) {
                        Ok(Some(frame)) => orchestrator.prepare_frame(&frame),
                        Ok(None) => {}
                        Err(err) => {
                            error!("media source failed: {err}");
                            elwt.exit();
                            return;
                        }
                    }

                    let render = reconciler.reconcile(&specs).and_then(|passes| {
                        let mut refs: Vec<&mut dyn Pass> =
                            passes.into_iter().map(|p| &mut **p as &mut dyn Pass).collect();
                        orchestrator.render_frame(&mut refs)
                    });
                    if let Err(err) = render {
                        error!("render failed: {err:?}");
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                if source.is_animated() {
                    let now = Instant::now();
                    if now >= next_frame {
                        next_frame = now + FRAME_INTERVAL;
                        window.request_redraw();
                    }
                    elwt.set_control_flow(ControlFlow::WaitUntil(next_frame));
                } else {
                    elwt.set_control_flow(ControlFlow::Wait);
                }
            }
            _ => {}
        })
        .map_err(|err| anyhow!("window event loop error: {err}"))
}
