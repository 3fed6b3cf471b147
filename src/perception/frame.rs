/// Owned RGBA snapshot of one video frame plus the region helpers the
/// sampler and matcher rely on.
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};

use crate::errors::{GridWatchError, GridWatchResult};
use crate::perception::traits::FrameSource;
use crate::perception::types::{CaptureRect, FrameDimensions};

#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.to_rgba8())
    }
}

impl FrameSource for Frame {
    fn dimensions(&self) -> FrameDimensions {
        FrameDimensions::new(self.image.width(), self.image.height())
    }

    fn extract(&self, rect: &CaptureRect, out_w: u32, out_h: u32) -> GridWatchResult<RgbaImage> {
        if out_w == 0 || out_h == 0 {
            return Err(GridWatchError::Extraction(format!(
                "zero-size output {out_w}x{out_h}"
            )));
        }
        if !(rect.width > 0.0 && rect.height > 0.0) {
            return Err(GridWatchError::Extraction(format!(
                "degenerate region {}x{}",
                rect.width, rect.height
            )));
        }
        let dims = self.dimensions();
        if !dims.is_ready() {
            return Err(GridWatchError::Extraction("frame has no pixels".into()));
        }

        let mut out = RgbaImage::new(out_w, out_h);

        // Visible part of the region, in source pixels
        let sx0 = rect.x.max(0.0);
        let sy0 = rect.y.max(0.0);
        let sx1 = (rect.x + rect.width).min(dims.width as f64);
        let sy1 = (rect.y + rect.height).min(dims.height as f64);
        if sx1 <= sx0 || sy1 <= sy0 {
            return Ok(out);
        }

        // Where that part lands in the output
        let scale_x = out_w as f64 / rect.width;
        let scale_y = out_h as f64 / rect.height;
        let dx0 = ((sx0 - rect.x) * scale_x).round() as u32;
        let dy0 = ((sy0 - rect.y) * scale_y).round() as u32;
        let dx1 = (((sx1 - rect.x) * scale_x).round() as u32).min(out_w);
        let dy1 = (((sy1 - rect.y) * scale_y).round() as u32).min(out_h);
        if dx1 <= dx0 || dy1 <= dy0 {
            return Ok(out);
        }

        let cx = sx0.floor() as u32;
        let cy = sy0.floor() as u32;
        let cw = (sx1.ceil() as u32).saturating_sub(cx).max(1);
        let ch = (sy1.ceil() as u32).saturating_sub(cy).max(1);
        let crop = imageops::crop_imm(&self.image, cx, cy, cw, ch).to_image();

        let (tw, th) = (dx1 - dx0, dy1 - dy0);
        let scaled = if (cw, ch) == (tw, th) {
            crop
        } else {
            imageops::resize(&crop, tw, th, FilterType::Triangle)
        };
        imageops::replace(&mut out, &scaled, dx0 as i64, dy0 as i64);

        Ok(out)
    }
}

/// Encode an RGBA buffer as a `data:image/jpeg;base64,...` URL.
/// JPEG has no alpha channel, so transparency is dropped.
pub fn encode_jpeg_data_url(image: &RgbaImage, quality: u8) -> GridWatchResult<String> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| GridWatchError::Encode(format!("JPEG encode: {e}")))?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    Ok(format!("data:image/jpeg;base64,{b64}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(w: u32, h: u32) -> Frame {
        Frame::new(RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 7, 255])
        }))
    }

    #[test]
    fn test_native_extract_copies_pixels() {
        let frame = gradient(40, 30);
        let out = frame
            .extract(&CaptureRect::new(5.0, 6.0, 10.0, 10.0), 10, 10)
            .unwrap();
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(out.get_pixel(0, 0), &Rgba([5, 6, 7, 255]));
        assert_eq!(out.get_pixel(9, 9), &Rgba([14, 15, 7, 255]));
    }

    #[test]
    fn test_extract_resizes_to_requested_output() {
        let frame = Frame::new(RgbaImage::from_pixel(200, 100, Rgba([30, 60, 90, 255])));
        let out = frame
            .extract(&CaptureRect::new(10.0, 10.0, 120.0, 50.0), 64, 64)
            .unwrap();
        assert_eq!(out.dimensions(), (64, 64));
        assert!(out.pixels().all(|p| *p == Rgba([30, 60, 90, 255])));
    }

    #[test]
    fn test_region_outside_frame_is_transparent() {
        let frame = gradient(20, 20);
        let out = frame
            .extract(&CaptureRect::new(-10.0, 0.0, 20.0, 10.0), 20, 10)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(9, 0)[3], 0);
        assert_eq!(out.get_pixel(10, 0), &Rgba([0, 0, 7, 255]));

        let gone = frame
            .extract(&CaptureRect::new(100.0, 100.0, 5.0, 5.0), 5, 5)
            .unwrap();
        assert!(gone.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_extract_rejects_bad_requests() {
        let frame = gradient(20, 20);
        let rect = CaptureRect::new(0.0, 0.0, 5.0, 5.0);
        assert!(frame.extract(&rect, 0, 5).is_err());
        assert!(frame.extract(&CaptureRect::new(0.0, 0.0, 0.0, 5.0), 5, 5).is_err());
        assert!(Frame::new(RgbaImage::new(0, 0)).extract(&rect, 5, 5).is_err());
    }

    #[test]
    fn test_jpeg_data_url() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([200, 10, 10, 255]));
        let url = encode_jpeg_data_url(&img, 80).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert!(url.len() > "data:image/jpeg;base64,".len());
    }
}
