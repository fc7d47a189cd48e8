//! Off-screen export of the processed output.

use std::io::Cursor;

use anyhow::{Context, Result};
use effectstack::{PassSpec, Reconciler};
use renderer::{FramePixels, Pass, PassRegistry, PipelineOrchestrator};
use tracing::info;

use crate::codec::AnimationFrame;

/// Encodes the most recently rendered frame as PNG bytes.
pub fn export_current_frame(orchestrator: &PipelineOrchestrator) -> Result<Vec<u8>> {
    let pixels = orchestrator.read_frame()?;
    encode_png(&pixels)
}

pub fn encode_png(pixels: &FramePixels) -> Result<Vec<u8>> {
    let image = image::RgbaImage::from_raw(
        pixels.width(),
        pixels.height(),
        pixels.data().to_vec(),
    )
    .context("raster length does not match its dimensions")?;
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .context("PNG encode failed")?;
    Ok(bytes)
}

/// Runs every source frame through the pass chain and collects the processed
/// frames with their original delays. The caller encodes the result with
/// [`encode_gif`](crate::codec::encode_gif).
///
/// Each frame is rendered and read back synchronously; this is an export
/// path, not a display path.
pub fn render_animation(
    orchestrator: &mut PipelineOrchestrator,
    reconciler: &mut Reconciler<PassRegistry>,
    specs: &[PassSpec],
    frames: &[AnimationFrame],
) -> Result<Vec<AnimationFrame>> {
    let mut rendered = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        orchestrator.prepare_frame(&frame.pixels);
        let passes = reconciler.reconcile(specs)?;
        let mut refs: Vec<&mut dyn Pass> =
            passes.into_iter().map(|p| &mut **p as &mut dyn Pass).collect();
        orchestrator.render_frame(&mut refs)?;
        rendered.push(AnimationFrame {
            pixels: orchestrator.read_frame()?,
            delay_ms: frame.delay_ms,
        });
        if (i + 1) % 16 == 0 {
            info!(done = i + 1, total = frames.len(), "rendering animation frames");
        }
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_bytes_round_trip_through_the_decoder() {
        let mut pixels = FramePixels::new(3, 2);
        pixels.put_pixel(0, 0, [255, 0, 0, 255]);
        pixels.put_pixel(2, 1, [0, 0, 255, 128]);

        let bytes = encode_png(&pixels).unwrap();
        let decoded = crate::decode_still(&bytes).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn png_header_is_present() {
        let bytes = encode_png(&FramePixels::solid(1, 1, [0, 0, 0, 255])).unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
