//! Media sources and codecs for the effect pipeline.
//!
//! Three mutually exclusive sources feed the renderer: a still image, a
//! decoded animation frame sequence with per-frame delays, and a live
//! capture stream. [`MediaSource`] owns whichever is active and hands the
//! per-frame render cycle the raster to upload. [`codec`] decodes and
//! encodes animated GIFs; [`export`] re-runs the pass chain off-screen to
//! produce exportable bytes.

pub mod codec;
pub mod export;
pub mod source;

pub use codec::{decode_gif, encode_gif, AnimationFrame, DecodedAnimation};
pub use export::{encode_png, export_current_frame, render_animation};
pub use source::{CaptureDevice, CaptureStream, ChannelCapture, MediaSource, SequencePlayer};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to decode GIF: {0}")]
    GifDecode(#[from] gif::DecodingError),
    #[error("failed to encode GIF: {0}")]
    GifEncode(#[from] gif::EncodingError),
    #[error("animation has no frames")]
    EmptyAnimation,
    #[error("frame size {got_width}x{got_height} does not match animation size {width}x{height}")]
    FrameSizeMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("capture stream ended")]
    CaptureEnded,
}

/// Decodes a still image (PNG, JPEG, BMP, WebP) into the pipeline's RGBA
/// exchange format.
pub fn decode_still(bytes: &[u8]) -> Result<renderer::FramePixels, MediaError> {
    let decoded = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = decoded.dimensions();
    Ok(renderer::FramePixels::from_rgba(width, height, decoded.into_raw())
        .expect("image buffer length matches its dimensions"))
}
