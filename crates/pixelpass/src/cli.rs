use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "pixelpass",
    author,
    version,
    about = "GPU multi-pass pixel effect pipeline",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a still image through the effect chain and write a PNG.
    Render(RenderArgs),
    /// Run every frame of an animated GIF through the chain and write a GIF.
    Gif(GifArgs),
    /// Open a window and play the media through the chain live.
    Preview(PreviewArgs),
    /// List the registered pass types.
    Passes,
}

#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Source image (PNG, JPEG, BMP, WebP, or GIF; GIFs use the first frame).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Effect chain document (JSON array of passes). Empty chain if omitted.
    #[arg(long, value_name = "PATH")]
    pub stack: Option<PathBuf>,

    /// Output PNG path.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct GifArgs {
    /// Source animated GIF.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Effect chain document (JSON array of passes). Empty chain if omitted.
    #[arg(long, value_name = "PATH")]
    pub stack: Option<PathBuf>,

    /// Output GIF path.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct PreviewArgs {
    /// Source image or animated GIF.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Effect chain document (JSON array of passes). Empty chain if omitted.
    #[arg(long, value_name = "PATH")]
    pub stack: Option<PathBuf>,

    /// Window size (e.g. `1280x720`); defaults to the media size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{value}`"))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("bad width `{w}`"))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("bad height `{h}`"))?;
    if width == 0 || height == 0 {
        return Err("window dimensions must be non-zero".into());
    }
    Ok((width, height))
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parses_both_separators() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size("640X480"), Ok((640, 480)));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
    }
}
