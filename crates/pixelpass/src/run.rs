use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use effectstack::{parse_stack, PassSpec, Reconciler};
use media::{decode_gif, decode_still, encode_gif, DecodedAnimation};
use renderer::{FramePixels, GpuContext, Pass, PassRegistry, PipelineOrchestrator};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, GifArgs, RenderArgs};
use crate::window;

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();
    match cli.command {
        Command::Render(args) => render_still(args),
        Command::Gif(args) => render_gif(args),
        Command::Preview(args) => window::run_preview(args),
        Command::Passes => {
            for kind in PassRegistry::kinds() {
                println!("{kind}");
            }
            Ok(())
        }
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub(crate) enum LoadedMedia {
    Still(FramePixels),
    Animation(DecodedAnimation),
}

pub(crate) fn load_media(path: &Path) -> Result<LoadedMedia> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read media {}", path.display()))?;
    let is_gif = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"));
    if is_gif {
        Ok(LoadedMedia::Animation(decode_gif(&bytes)?))
    } else {
        Ok(LoadedMedia::Still(decode_still(&bytes)?))
    }
}

pub(crate) fn load_stack(path: Option<&Path>) -> Result<Vec<PassSpec>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_stack(&text)?)
}

fn headless_pipeline() -> Result<(PipelineOrchestrator, Reconciler<PassRegistry>)> {
    let gpu = GpuContext::headless()?;
    let registry = PassRegistry::new(gpu.device.clone(), gpu.queue.clone());
    let orchestrator = PipelineOrchestrator::new(gpu)?;
    Ok((orchestrator, Reconciler::new(registry)))
}

fn render_still(args: RenderArgs) -> Result<()> {
    let pixels = match load_media(&args.input)? {
        LoadedMedia::Still(pixels) => pixels,
        LoadedMedia::Animation(animation) => animation.frames[0].pixels.clone(),
    };
    let specs = load_stack(args.stack.as_deref())?;

    let (mut orchestrator, mut reconciler) = headless_pipeline()?;
    orchestrator.prepare_frame(&pixels);
    let passes = reconciler.reconcile(&specs)?;
    let mut refs: Vec<&mut dyn Pass> =
        passes.into_iter().map(|p| &mut **p as &mut dyn Pass).collect();
    orchestrator.render_frame(&mut refs)?;

    let png = media::export_current_frame(&orchestrator)?;
    fs::write(&args.output, png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    tracing::info!(output = %args.output.display(), "wrote processed image");
    Ok(())
}

fn render_gif(args: GifArgs) -> Result<()> {
    let animation = match load_media(&args.input)? {
        LoadedMedia::Animation(animation) => animation,
        LoadedMedia::Still(_) => anyhow::bail!(
            "{} is not an animated GIF; use `render` for stills",
            args.input.display()
        ),
    };
    let specs = load_stack(args.stack.as_deref())?;

    let (mut orchestrator, mut reconciler) = headless_pipeline()?;
    let frames =
        media::render_animation(&mut orchestrator, &mut reconciler, &specs, &animation.frames)?;
    let bytes = encode_gif(&frames)?;
    fs::write(&args.output, bytes)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    tracing::info!(
        output = %args.output.display(),
        frames = frames.len(),
        "wrote processed animation"
    );
    Ok(())
}
