/// Frame providers: live monitor capture via `xcap`, and a pre-loaded image
/// sequence for replaying recorded boards.
use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use image::RgbaImage;
use xcap::Monitor;

use crate::errors::{GridWatchError, GridWatchResult};
use crate::perception::frame::Frame;
use crate::perception::traits::FrameProvider;

/// Captures one monitor per call. Capture runs on a blocking thread; the
/// monitor list is re-enumerated each time so hot-plugging is tolerated.
pub struct ScreenCapture {
    monitor_index: usize,
}

impl ScreenCapture {
    pub fn new(monitor_index: usize) -> Self {
        Self { monitor_index }
    }

    /// Fail early when the requested monitor does not exist.
    pub fn probe(monitor_index: usize) -> GridWatchResult<Self> {
        let count = Monitor::all()
            .map_err(|e| GridWatchError::Capture(format!("enumerate monitors: {e}")))?
            .len();
        if monitor_index >= count {
            return Err(GridWatchError::Capture(format!(
                "monitor {monitor_index} not found ({count} available)"
            )));
        }
        tracing::info!(monitor = monitor_index, available = count, "screen capture ready");
        Ok(Self::new(monitor_index))
    }
}

fn capture_monitor(index: usize) -> GridWatchResult<RgbaImage> {
    let monitors = Monitor::all()
        .map_err(|e| GridWatchError::Capture(format!("enumerate monitors: {e}")))?;
    let monitor = monitors
        .get(index)
        .ok_or_else(|| GridWatchError::Capture(format!("monitor {index} disappeared")))?;
    monitor
        .capture_image()
        .map_err(|e| GridWatchError::Capture(format!("capture monitor {index}: {e}")))
}

#[async_trait]
impl FrameProvider for ScreenCapture {
    async fn next_frame(&mut self) -> GridWatchResult<Option<Frame>> {
        let index = self.monitor_index;
        let image = tokio::task::spawn_blocking(move || capture_monitor(index))
            .await
            .map_err(|e| GridWatchError::Capture(format!("join: {e}")))??;
        Ok(Some(Frame::new(image)))
    }

    fn describe(&self) -> String {
        format!("monitor #{}", self.monitor_index)
    }
}

/// Plays back a fixed list of frames. Once exhausted it either keeps
/// returning the last frame or reports the end of the stream.
pub struct ImageSequence {
    frames: VecDeque<Frame>,
    last: Option<Frame>,
    repeat_last: bool,
}

impl ImageSequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            last: None,
            repeat_last: true,
        }
    }

    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> GridWatchResult<Self> {
        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let img = image::open(path.as_ref())?;
            frames.push(Frame::from_dynamic(img));
        }
        tracing::debug!(count = frames.len(), "image sequence loaded");
        Ok(Self::new(frames))
    }

    /// End the stream after the last frame instead of repeating it.
    pub fn ending(mut self) -> Self {
        self.repeat_last = false;
        self
    }
}

#[async_trait]
impl FrameProvider for ImageSequence {
    async fn next_frame(&mut self) -> GridWatchResult<Option<Frame>> {
        if let Some(frame) = self.frames.pop_front() {
            self.last = Some(frame.clone());
            return Ok(Some(frame));
        }
        if self.repeat_last {
            Ok(self.last.clone())
        } else {
            Ok(None)
        }
    }

    fn describe(&self) -> String {
        format!("image sequence ({} queued)", self.frames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::traits::FrameSource;
    use crate::perception::types::CaptureRect;
    use image::Rgba;

    fn solid(v: u8) -> Frame {
        Frame::new(RgbaImage::from_pixel(4, 4, Rgba([v, v, v, 255])))
    }

    fn red_at_origin(frame: &Frame) -> u8 {
        let px = frame.extract(&CaptureRect::new(0.0, 0.0, 1.0, 1.0), 1, 1).unwrap();
        px.get_pixel(0, 0)[0]
    }

    #[tokio::test]
    async fn test_sequence_repeats_last_frame() {
        let mut seq = ImageSequence::new(vec![solid(1), solid(2)]);
        let a = seq.next_frame().await.unwrap().unwrap();
        let b = seq.next_frame().await.unwrap().unwrap();
        let c = seq.next_frame().await.unwrap().unwrap();
        assert_eq!(red_at_origin(&a), 1);
        assert_eq!(red_at_origin(&b), 2);
        assert_eq!(red_at_origin(&c), 2);
    }

    #[tokio::test]
    async fn test_ending_sequence_reports_end_of_stream() {
        let mut seq = ImageSequence::new(vec![solid(9)]).ending();
        assert!(seq.next_frame().await.unwrap().is_some());
        assert!(seq.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sequence_from_paths() {
        let path = std::env::temp_dir().join(format!("gridwatch_seq_{}.png", std::process::id()));
        RgbaImage::from_pixel(6, 3, Rgba([1, 2, 3, 255])).save(&path).unwrap();
        let mut seq = ImageSequence::from_paths(&[&path]).unwrap();
        let frame = seq.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.dimensions().width, 6);
        assert_eq!(frame.dimensions().height, 3);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    #[ignore = "requires a graphical display and screen recording permissions"]
    async fn test_capture_primary_monitor() {
        let mut cap = ScreenCapture::probe(0).expect("no monitor");
        let frame = cap.next_frame().await.unwrap().unwrap();
        assert!(frame.dimensions().is_ready());
    }
}
