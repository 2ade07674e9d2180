//! Grayscale frame type and pixel-format conversion.

use image::GrayImage;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_PCT);
        Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Copy into an `image` buffer, e.g. for saving to disk.
    pub fn to_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_PCT: f32 = 0.95;

/// Extract the Y channel from packed YUYV 4:2:2 ([Y0, U, Y1, V] per two pixels).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grey to 8 bits.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Decode a motion-JPEG buffer to grayscale.
pub fn mjpeg_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_luma8();
    if img.width() != width || img.height() != height {
        return Err(FrameError::Decode(format!(
            "decoded {}x{}, negotiated {width}x{height}",
            img.width(),
            img.height()
        )));
    }
    Ok(img.into_raw())
}

/// True when more than `threshold_pct` of pixels fall below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv: Vec<u8> = (0..16).collect();
        assert_eq!(
            yuyv_to_grayscale(&yuyv, 4, 2).unwrap(),
            vec![0, 2, 4, 6, 8, 10, 12, 14]
        );
    }

    #[test]
    fn test_yuyv_too_short() {
        assert!(matches!(
            yuyv_to_grayscale(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_y16_takes_high_byte() {
        let buf = [0x34, 0x12, 0xff, 0x80];
        assert_eq!(y16_to_grayscale(&buf, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_mjpeg_garbage_is_decode_error() {
        assert!(matches!(
            mjpeg_to_grayscale(&[0, 1, 2, 3], 2, 2),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn test_mjpeg_roundtrip_through_encoder() {
        let img = GrayImage::from_pixel(8, 8, image::Luma([200u8]));
        let mut jpeg = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();
        let gray = mjpeg_to_grayscale(&jpeg, 8, 8).unwrap();
        assert_eq!(gray.len(), 64);
        assert!(gray.iter().all(|&p| (p as i32 - 200).abs() <= 3));
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[], DARK_FRAME_PCT));
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_PCT));
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_PCT));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend([128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, DARK_FRAME_PCT));

        let mut borderline = vec![10u8; 940];
        borderline.extend([128u8; 60]);
        assert!(!is_dark_frame(&borderline, DARK_FRAME_PCT));
    }

    #[test]
    fn test_frame_brightness_and_image() {
        let f = Frame::new(vec![10, 20, 30, 40], 2, 2, 7);
        assert!((f.avg_brightness() - 25.0).abs() < 1e-6);
        assert!(f.is_dark);
        let img = f.to_image().unwrap();
        assert_eq!(img.get_pixel(1, 1).0, [40]);
    }
}
