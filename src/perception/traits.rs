use async_trait::async_trait;
use image::RgbaImage;

use crate::errors::GridWatchResult;
use crate::perception::frame::Frame;
use crate::perception::types::{CaptureRect, FrameDimensions};

/// A picture that regions can be pulled out of.
///
/// `extract` follows canvas `drawImage` semantics: the requested rectangle
/// is resampled to `out_w` × `out_h`, and any part of it lying outside the
/// picture comes back fully transparent.
pub trait FrameSource {
    fn dimensions(&self) -> FrameDimensions;

    fn extract(&self, rect: &CaptureRect, out_w: u32, out_h: u32) -> GridWatchResult<RgbaImage>;
}

/// Strategy trait for live frame acquisition.
/// Two implementations: xcap monitor capture and a pre-loaded image sequence.
#[async_trait]
pub trait FrameProvider: Send {
    /// Next picture of the feed. `Ok(None)` means the stream has ended.
    async fn next_frame(&mut self) -> GridWatchResult<Option<Frame>>;

    fn describe(&self) -> String;
}
