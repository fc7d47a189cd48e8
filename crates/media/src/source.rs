//! The three mutually exclusive media sources and their frame pacing.

use anyhow::Result;
use renderer::FramePixels;
use tracing::debug;

use crate::codec::AnimationFrame;
use crate::MediaError;

/// Advances through a decoded frame sequence using each frame's declared
/// delay. The elapsed time handed to [`tick`](Self::tick) is clamped to the
/// current frame's delay, so one host callback never advances more than one
/// source frame regardless of how long the host stalled.
#[derive(Debug, Clone)]
pub struct SequencePlayer {
    frames: Vec<AnimationFrame>,
    index: usize,
    accumulator: f64,
}

impl SequencePlayer {
    pub fn new(frames: Vec<AnimationFrame>) -> Result<Self, MediaError> {
        if frames.is_empty() {
            return Err(MediaError::EmptyAnimation);
        }
        Ok(Self {
            frames,
            index: 0,
            accumulator: 0.0,
        })
    }

    pub fn current(&self) -> &FramePixels {
        &self.frames[self.index].pixels
    }

    pub fn frames(&self) -> &[AnimationFrame] {
        &self.frames
    }

    /// Feeds `elapsed_ms` of wall time into the pacing accumulator and
    /// advances at most one frame. Returns true when the frame changed.
    pub fn tick(&mut self, elapsed_ms: f64) -> bool {
        let delay = self.frames[self.index].delay_ms as f64;
        self.accumulator += elapsed_ms.min(delay);
        if self.accumulator >= delay && delay > 0.0 {
            self.accumulator -= delay;
            self.index = (self.index + 1) % self.frames.len();
            return true;
        }
        false
    }

    /// Drops accumulated time. Called when the host was suspended, so the
    /// animation resumes at its normal pace instead of jumping.
    pub fn reset_pacing(&mut self) {
        self.accumulator = 0.0;
    }
}

/// A live frame producer. The render loop waits on
/// [`next_frame`](Self::next_frame) before each render, per the capture
/// contract.
pub trait CaptureStream: Send {
    fn next_frame(&mut self) -> Result<FramePixels, MediaError>;

    /// Latest frame without waiting, if one is ready.
    fn try_frame(&mut self) -> Option<FramePixels>;
}

/// Opens capture streams. Implementations wrap whatever device backend the
/// host links in; the pipeline itself never talks to hardware.
pub trait CaptureDevice {
    fn name(&self) -> &str;
    fn open(&self) -> Result<Box<dyn CaptureStream>>;
}

/// Channel-backed capture stream: a producer thread pushes rasters, the
/// render loop drains to the most recent one.
pub struct ChannelCapture {
    receiver: crossbeam_channel::Receiver<FramePixels>,
}

impl ChannelCapture {
    pub fn new(receiver: crossbeam_channel::Receiver<FramePixels>) -> Self {
        Self { receiver }
    }
}

impl CaptureStream for ChannelCapture {
    fn next_frame(&mut self) -> Result<FramePixels, MediaError> {
        self.receiver.recv().map_err(|_| MediaError::CaptureEnded)
    }

    fn try_frame(&mut self) -> Option<FramePixels> {
        let mut latest = None;
        while let Ok(frame) = self.receiver.try_recv() {
            latest = Some(frame);
        }
        latest
    }
}

/// The active media source. Loading a new source replaces the previous one
/// wholesale; the variants never coexist.
#[derive(Default)]
pub enum MediaSource {
    #[default]
    Idle,
    Still(FramePixels),
    Sequence(SequencePlayer),
    Capture(Box<dyn CaptureStream>),
}

impl MediaSource {
    pub fn load_still(&mut self, pixels: FramePixels) {
        debug!(width = pixels.width(), height = pixels.height(), "loaded still image");
        *self = MediaSource::Still(pixels);
    }

    pub fn load_sequence(&mut self, frames: Vec<AnimationFrame>) -> Result<(), MediaError> {
        debug!(frames = frames.len(), "loaded frame sequence");
        *self = MediaSource::Sequence(SequencePlayer::new(frames)?);
        Ok(())
    }

    pub fn load_capture(&mut self, stream: Box<dyn CaptureStream>) {
        debug!("switched to capture stream");
        *self = MediaSource::Capture(stream);
    }

    pub fn clear(&mut self) {
        *self = MediaSource::Idle;
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, MediaSource::Sequence(_) | MediaSource::Capture(_))
    }

    /// Advances pacing by `elapsed_ms` and returns the raster to upload for
    /// this render cycle, or `None` when nothing changed since the last one.
    ///
    /// Stills upload once at load time, so they never report a new frame
    /// here; sequences report on frame advance; capture reports whenever
    /// the device delivered.
    pub fn tick(&mut self, elapsed_ms: f64) -> Result<Option<FramePixels>, MediaError> {
        match self {
            MediaSource::Idle | MediaSource::Still(_) => Ok(None),
            MediaSource::Sequence(player) => {
                if player.tick(elapsed_ms) {
                    Ok(Some(player.current().clone()))
                } else {
                    Ok(None)
                }
            }
            MediaSource::Capture(stream) => Ok(stream.try_frame()),
        }
    }

    /// The frame a fresh render should start from, regardless of pacing.
    pub fn current_frame(&self) -> Option<&FramePixels> {
        match self {
            MediaSource::Idle | MediaSource::Capture(_) => None,
            MediaSource::Still(pixels) => Some(pixels),
            MediaSource::Sequence(player) => Some(player.current()),
        }
    }

    pub fn reset_pacing(&mut self) {
        if let MediaSource::Sequence(player) = self {
            player.reset_pacing();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(delays: &[u32]) -> Vec<AnimationFrame> {
        delays
            .iter()
            .enumerate()
            .map(|(i, &delay_ms)| AnimationFrame {
                pixels: FramePixels::solid(2, 2, [i as u8, 0, 0, 255]),
                delay_ms,
            })
            .collect()
    }

    #[test]
    fn advances_once_per_elapsed_delay() {
        let mut player = SequencePlayer::new(frames(&[100, 100, 100, 100])).unwrap();
        assert!(!player.tick(50.0));
        assert!(player.tick(50.0));
        assert_eq!(player.current().pixel(0, 0)[0], 1);
    }

    #[test]
    fn long_stall_advances_at_most_one_frame() {
        let mut player = SequencePlayer::new(frames(&[100, 100, 100, 100])).unwrap();
        assert!(player.tick(5000.0));
        assert_eq!(player.current().pixel(0, 0)[0], 1);
        // The clamp also drops the excess, so the next short tick does not
        // immediately advance again.
        assert!(!player.tick(16.0));
    }

    #[test]
    fn wraps_around_to_the_first_frame() {
        let mut player = SequencePlayer::new(frames(&[10, 10])).unwrap();
        assert!(player.tick(10.0));
        assert!(player.tick(10.0));
        assert_eq!(player.current().pixel(0, 0)[0], 0);
    }

    #[test]
    fn per_frame_delays_are_honored_individually() {
        let mut player = SequencePlayer::new(frames(&[30, 100, 30])).unwrap();
        assert!(player.tick(30.0));
        assert!(!player.tick(30.0));
        assert!(!player.tick(30.0));
        assert!(player.tick(40.0));
        assert_eq!(player.current().pixel(0, 0)[0], 2);
    }

    #[test]
    fn reset_drops_accumulated_time() {
        let mut player = SequencePlayer::new(frames(&[100, 100])).unwrap();
        assert!(!player.tick(90.0));
        player.reset_pacing();
        assert!(!player.tick(90.0));
        assert!(player.tick(10.0));
    }

    #[test]
    fn still_source_reports_no_new_frames() {
        let mut source = MediaSource::default();
        source.load_still(FramePixels::solid(1, 1, [9, 9, 9, 255]));
        assert!(source.tick(1000.0).unwrap().is_none());
        assert!(source.current_frame().is_some());
        assert!(!source.is_animated());
    }

    #[test]
    fn capture_drains_to_the_most_recent_frame() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut source = MediaSource::default();
        source.load_capture(Box::new(ChannelCapture::new(rx)));

        tx.send(FramePixels::solid(1, 1, [1, 0, 0, 255])).unwrap();
        tx.send(FramePixels::solid(1, 1, [2, 0, 0, 255])).unwrap();
        let frame = source.tick(16.0).unwrap().expect("frame delivered");
        assert_eq!(frame.pixel(0, 0)[0], 2);
        assert!(source.tick(16.0).unwrap().is_none());
    }

    #[test]
    fn loading_a_source_replaces_the_previous_one() {
        let mut source = MediaSource::default();
        source.load_sequence(frames(&[10])).unwrap();
        assert!(source.is_animated());
        source.load_still(FramePixels::solid(1, 1, [0, 0, 0, 255]));
        assert!(!source.is_animated());
        source.clear();
        assert!(source.current_frame().is_none());
    }
}
