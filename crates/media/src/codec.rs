//! Animated GIF decode and encode.
//!
//! Decoding composites every frame onto a full-size canvas honoring the
//! disposal method of its predecessor, so consumers always receive complete
//! rasters. Encoding quantizes each frame to its own 256-color palette.

use std::borrow::Cow;
use std::io::Cursor;

use color_quant::NeuQuant;
use renderer::FramePixels;
use tracing::debug;

use crate::MediaError;

/// One composited animation frame plus its presentation delay.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub pixels: FramePixels,
    pub delay_ms: u32,
}

#[derive(Debug, Clone)]
pub struct DecodedAnimation {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<AnimationFrame>,
}

/// Copies a decoded frame rect onto the canvas, skipping transparent
/// texels so the previous contents show through.
fn blit_frame(
    canvas: &mut [u8],
    canvas_width: u32,
    rect: (u32, u32, u32, u32),
    rgba: &[u8],
) {
    let (left, top, width, height) = rect;
    for row in 0..height {
        for col in 0..width {
            let src = 4 * (row * width + col) as usize;
            if rgba[src + 3] == 0 {
                continue;
            }
            let dst = 4 * ((top + row) * canvas_width + (left + col)) as usize;
            canvas[dst..dst + 4].copy_from_slice(&rgba[src..src + 4]);
        }
    }
}

pub fn decode_gif(bytes: &[u8]) -> Result<DecodedAnimation, MediaError> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut decoder = options.read_info(Cursor::new(bytes))?;
    let width = decoder.width() as u32;
    let height = decoder.height() as u32;
    let canvas_len = (width as usize) * (height as usize) * 4;

    let mut previous = vec![0u8; canvas_len];
    let mut frames = Vec::new();

    while let Some(frame) = decoder.read_next_frame()? {
        let mut canvas = previous.clone();
        blit_frame(
            &mut canvas,
            width,
            (
                frame.left as u32,
                frame.top as u32,
                frame.width as u32,
                frame.height as u32,
            ),
            &frame.buffer,
        );

        frames.push(AnimationFrame {
            pixels: FramePixels::from_rgba(width, height, canvas.clone())
                .expect("canvas sized from decoder dimensions"),
            delay_ms: frame.delay as u32 * 10,
        });

        match frame.dispose {
            gif::DisposalMethod::Any | gif::DisposalMethod::Keep => previous = canvas,
            gif::DisposalMethod::Background => previous = vec![0u8; canvas_len],
            // `previous` still holds the canvas from before this frame was
            // drawn, which is exactly what Previous disposal restores.
            gif::DisposalMethod::Previous => {}
        }
    }

    if frames.is_empty() {
        return Err(MediaError::EmptyAnimation);
    }
    debug!(frames = frames.len(), width, height, "decoded animation");
    Ok(DecodedAnimation {
        width,
        height,
        frames,
    })
}

pub fn encode_gif(frames: &[AnimationFrame]) -> Result<Vec<u8>, MediaError> {
    let first = frames.first().ok_or(MediaError::EmptyAnimation)?;
    let width = first.pixels.width();
    let height = first.pixels.height();

    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, width as u16, height as u16, &[])?;
        encoder.set_repeat(gif::Repeat::Infinite)?;

        for frame in frames {
            if frame.pixels.width() != width || frame.pixels.height() != height {
                return Err(MediaError::FrameSizeMismatch {
                    width,
                    height,
                    got_width: frame.pixels.width(),
                    got_height: frame.pixels.height(),
                });
            }

            let quantizer = NeuQuant::new(1, 256, frame.pixels.data());
            let palette = quantizer.color_map_rgb();
            let indices: Vec<u8> = frame
                .pixels
                .data()
                .chunks_exact(4)
                .map(|px| quantizer.index_of(px) as u8)
                .collect();

            let mut gif_frame = gif::Frame {
                width: width as u16,
                height: height as u16,
                buffer: Cow::Owned(indices),
                palette: Some(palette),
                delay: (frame.delay_ms / 10) as u16,
                ..gif::Frame::default()
            };
            gif_frame.dispose = gif::DisposalMethod::Keep;
            encoder.write_frame(&gif_frame)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [u8; 4], b: [u8; 4], tol: u8) -> bool {
        a.iter()
            .zip(b.iter())
            .take(3)
            .all(|(x, y)| x.abs_diff(*y) <= tol)
    }

    #[test]
    fn four_frame_round_trip_keeps_count_and_delays() {
        let colors = [[250u8, 5, 5, 255], [5, 250, 5, 255], [5, 5, 250, 255], [250, 250, 5, 255]];
        let frames: Vec<AnimationFrame> = colors
            .iter()
            .map(|&rgba| AnimationFrame {
                pixels: FramePixels::solid(10, 8, rgba),
                delay_ms: 100,
            })
            .collect();

        let bytes = encode_gif(&frames).unwrap();
        let decoded = decode_gif(&bytes).unwrap();

        assert_eq!(decoded.width, 10);
        assert_eq!(decoded.height, 8);
        assert_eq!(decoded.frames.len(), 4);
        for (frame, &expected) in decoded.frames.iter().zip(colors.iter()) {
            assert_eq!(frame.delay_ms, 100);
            assert!(
                close(frame.pixels.pixel(5, 4), expected, 12),
                "quantized color drifted: {:?} vs {:?}",
                frame.pixels.pixel(5, 4),
                expected
            );
        }
    }

    #[test]
    fn partial_frames_composite_over_their_predecessor() {
        // Frame 1: full red. Frame 2: a 2x2 blue patch at (1,1), keep
        // disposal, so the rest of frame 2 must still read red.
        let mut bytes = Vec::new();
        {
            let palette = [255, 0, 0, 0, 0, 255];
            let mut encoder = gif::Encoder::new(&mut bytes, 4, 4, &palette).unwrap();
            let full = gif::Frame {
                width: 4,
                height: 4,
                buffer: Cow::Owned(vec![0u8; 16]),
                delay: 10,
                dispose: gif::DisposalMethod::Keep,
                ..gif::Frame::default()
            };
            encoder.write_frame(&full).unwrap();
            let patch = gif::Frame {
                left: 1,
                top: 1,
                width: 2,
                height: 2,
                buffer: Cow::Owned(vec![1u8; 4]),
                delay: 10,
                dispose: gif::DisposalMethod::Keep,
                ..gif::Frame::default()
            };
            encoder.write_frame(&patch).unwrap();
        }

        let decoded = decode_gif(&bytes).unwrap();
        assert_eq!(decoded.frames.len(), 2);
        let second = &decoded.frames[1].pixels;
        assert_eq!(second.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(second.pixel(1, 1), [0, 0, 255, 255]);
        assert_eq!(second.pixel(2, 2), [0, 0, 255, 255]);
        assert_eq!(second.pixel(3, 3), [255, 0, 0, 255]);
    }

    #[test]
    fn background_disposal_clears_the_canvas_between_frames() {
        let mut bytes = Vec::new();
        {
            let palette = [255, 0, 0, 0, 255, 0];
            let mut encoder = gif::Encoder::new(&mut bytes, 2, 2, &palette).unwrap();
            let first = gif::Frame {
                width: 2,
                height: 2,
                buffer: Cow::Owned(vec![0u8; 4]),
                dispose: gif::DisposalMethod::Background,
                ..gif::Frame::default()
            };
            encoder.write_frame(&first).unwrap();
            let second = gif::Frame {
                left: 0,
                top: 0,
                width: 1,
                height: 1,
                buffer: Cow::Owned(vec![1u8]),
                dispose: gif::DisposalMethod::Keep,
                ..gif::Frame::default()
            };
            encoder.write_frame(&second).unwrap();
        }

        let decoded = decode_gif(&bytes).unwrap();
        let second = &decoded.frames[1].pixels;
        assert_eq!(second.pixel(0, 0), [0, 255, 0, 255]);
        // Disposed region is transparent, not stale red.
        assert_eq!(second.pixel(1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn previous_disposal_restores_each_frames_own_predecessor() {
        // Two Previous-disposed patches separated by a full Keep frame: each
        // must restore the canvas from just before it was drawn, so frames
        // after the green repaint composite over green, not the earlier red.
        let mut bytes = Vec::new();
        {
            let palette = [255, 0, 0, 0, 0, 255, 0, 255, 0, 255, 255, 0];
            let mut encoder = gif::Encoder::new(&mut bytes, 2, 2, &palette).unwrap();
            let full = |index: u8, dispose| gif::Frame {
                width: 2,
                height: 2,
                buffer: Cow::Owned(vec![index; 4]),
                dispose,
                ..gif::Frame::default()
            };
            let patch = |index: u8, dispose| gif::Frame {
                width: 1,
                height: 1,
                buffer: Cow::Owned(vec![index]),
                dispose,
                ..gif::Frame::default()
            };
            encoder.write_frame(&full(0, gif::DisposalMethod::Keep)).unwrap();
            encoder.write_frame(&patch(1, gif::DisposalMethod::Previous)).unwrap();
            encoder.write_frame(&full(2, gif::DisposalMethod::Keep)).unwrap();
            encoder.write_frame(&patch(3, gif::DisposalMethod::Previous)).unwrap();
            encoder.write_frame(&patch(1, gif::DisposalMethod::Keep)).unwrap();
        }

        let decoded = decode_gif(&bytes).unwrap();
        assert_eq!(decoded.frames.len(), 5);
        let green = [0, 255, 0, 255];
        assert_eq!(decoded.frames[1].pixels.pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(decoded.frames[1].pixels.pixel(1, 1), [255, 0, 0, 255]);
        assert_eq!(decoded.frames[3].pixels.pixel(0, 0), [255, 255, 0, 255]);
        assert_eq!(decoded.frames[3].pixels.pixel(1, 1), green);
        // The last frame composites over the green canvas frame 3 left.
        assert_eq!(decoded.frames[4].pixels.pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(decoded.frames[4].pixels.pixel(1, 1), green);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(encode_gif(&[]), Err(MediaError::EmptyAnimation)));
    }

    #[test]
    fn mismatched_frame_sizes_are_rejected() {
        let frames = vec![
            AnimationFrame {
                pixels: FramePixels::solid(4, 4, [255, 0, 0, 255]),
                delay_ms: 50,
            },
            AnimationFrame {
                pixels: FramePixels::solid(2, 4, [255, 0, 0, 255]),
                delay_ms: 50,
            },
        ];
        assert!(matches!(
            encode_gif(&frames),
            Err(MediaError::FrameSizeMismatch { .. })
        ));
    }
}
