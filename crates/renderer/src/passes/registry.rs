//! Maps stack-document type names to pass constructors and declares each
//! type's structural option keys for the reconciler.

use anyhow::{bail, Result};
use effectstack::{OptionMap, PassFactory};

use super::ascii::AsciiPass;
use super::basic::{
    ChromaticAberrationPass, DownsamplePass, EmbossPass, GrayscalePass, InvertPass,
    PosterizePass, SharpenPass, SobelPass,
};
use super::blur::GaussianBlurPass;
use super::dither::DitherPass;
use super::palette::PalettePass;
use super::sort::PixelSortPass;
use super::xdog::XDoGPass;
use super::Pass;

/// Every registered pass type with its structural keys, in menu order.
const KINDS: &[(&str, &'static [&'static str])] = &[
    ("invert", &[]),
    ("grayscale", &[]),
    ("posterize", &[]),
    ("sharpen", &[]),
    ("sobel", &[]),
    ("emboss", &["strength"]),
    ("chroma", &["strength"]),
    ("blur", &["sigma"]),
    ("downsample", &["scale"]),
    ("palette", &["preset", "customColors"]),
    ("dither", &["algo", "levels"]),
    ("pixelsort", &["mode", "sortBy", "direction"]),
    ("ascii", &["blockSize", "density", "chars", "font"]),
    (
        "xdog",
        &["sigmaC", "sigmaE", "k", "sigmaM", "p", "phi", "epsilon", "sigmaA"],
    ),
];

pub struct PassRegistry {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl PassRegistry {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    pub fn kinds() -> impl Iterator<Item = &'static str> {
        KINDS.iter().map(|(kind, _)| *kind)
    }
}

impl PassFactory for PassRegistry {
    type Pass = Box<dyn Pass>;

    fn build(&mut self, kind: &str, options: &OptionMap) -> Result<Box<dyn Pass>> {
        let pass: Box<dyn Pass> = match kind {
            "invert" => Box::new(InvertPass::new(&self.device, options)?),
            "grayscale" => Box::new(GrayscalePass::new(&self.device, options)?),
            "posterize" => Box::new(PosterizePass::new(&self.device, options)?),
            "sharpen" => Box::new(SharpenPass::new(&self.device, options)?),
            "sobel" => Box::new(SobelPass::new(&self.device, options)?),
            "emboss" => Box::new(EmbossPass::new(&self.device, options)?),
            "chroma" => Box::new(ChromaticAberrationPass::new(&self.device, options)?),
            "blur" => Box::new(GaussianBlurPass::new(&self.device, options)?),
            "downsample" => Box::new(DownsamplePass::new(&self.device, options)?),
            "palette" => Box::new(PalettePass::new(&self.device, options)?),
            "dither" => Box::new(DitherPass::new(&self.device, options)?),
            "pixelsort" => Box::new(PixelSortPass::new(&self.device, options)?),
            "ascii" => Box::new(AsciiPass::new(&self.device, &self.queue, options)?),
            "xdog" => Box::new(XDoGPass::new(&self.device, options)?),
            other => bail!("unknown pass type '{other}'"),
        };
        Ok(pass)
    }

    fn structural_keys(&self, kind: &str) -> Option<&'static [&'static str]> {
        KINDS
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, keys)| *keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in PassRegistry::kinds() {
            assert!(seen.insert(kind), "duplicate kind {kind}");
        }
        assert_eq!(seen.len(), 14);
    }

    #[test]
    fn convolution_kinds_declare_their_rebuild_keys() {
        let keys = |kind: &str| {
            KINDS
                .iter()
                .find(|(name, _)| *name == kind)
                .map(|(_, keys)| *keys)
                .unwrap()
        };
        assert!(keys("sobel").is_empty());
        assert_eq!(keys("emboss"), &["strength"]);
        assert_eq!(keys("chroma"), &["strength"]);
    }

    #[test]
    fn sort_keys_are_the_rebuild_triggers() {
        let keys = KINDS
            .iter()
            .find(|(name, _)| *name == "pixelsort")
            .map(|(_, keys)| *keys)
            .unwrap();
        assert!(keys.contains(&"direction"));
        assert!(!keys.contains(&"low"));
        assert!(!keys.contains(&"high"));
    }
}
