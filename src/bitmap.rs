//! Raw Bitmaps - the scan result handed to encoders

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Layout of the pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 1 bit per pixel, MSB first, 1 = white
    Mono1,
    Gray8,
    Rgb24,
    Rgba32,
}

impl PixelFormat {
    pub fn bits_per_pixel(&self) -> u16 {
        match self {
            PixelFormat::Mono1 => 1,
            PixelFormat::Gray8 => 8,
            PixelFormat::Rgb24 => 24,
            PixelFormat::Rgba32 => 32,
        }
    }
}

/// A scanned bitmap. Rows are tightly packed; 1-bit rows are padded to a
/// whole byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBitmapDescriptor {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u16,
    pub pixel_format: PixelFormat,
    /// Absent when the platform bitmap handle could not be obtained
    #[serde(default, with = "pixels_base64")]
    pub pixels: Option<Arc<[u8]>>,
}

impl RawBitmapDescriptor {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth: pixel_format.bits_per_pixel(),
            pixel_format,
            pixels: Some(pixels.into()),
        }
    }

    /// Blank (all white) 1-bit bitmap
    pub fn blank_mono(width: u32, height: u32) -> Self {
        let len = Self::stride_for(width, 1).checked_mul(height as usize).unwrap_or(0);
        Self::new(width, height, PixelFormat::Mono1, vec![0xFF; len])
    }

    /// Descriptor whose buffer was never obtained
    pub fn without_buffer(width: u32, height: u32, bit_depth: u16, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            bit_depth,
            pixel_format,
            pixels: None,
        }
    }

    fn stride_for(width: u32, bits_per_pixel: u16) -> usize {
        (width as usize).saturating_mul(bits_per_pixel as usize).div_ceil(8)
    }

    /// Bytes per row for the pixel format
    pub fn stride(&self) -> usize {
        Self::stride_for(self.width, self.pixel_format.bits_per_pixel())
    }

    /// Borrow the pixel buffer. `None` if it is absent or too short to hold
    /// `height` rows.
    pub fn acquire(&self) -> Option<&[u8]> {
        let pixels = self.pixels.as_deref()?;
        let needed = self.stride().checked_mul(self.height as usize)?;
        (pixels.len() >= needed).then_some(pixels)
    }

    /// Row `y` of an acquired buffer
    pub fn row<'a>(&self, pixels: &'a [u8], y: u32) -> &'a [u8] {
        let stride = self.stride();
        let start = stride * y as usize;
        &pixels[start..start + stride]
    }
}

mod pixels_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S: Serializer>(pixels: &Option<Arc<[u8]>>, s: S) -> Result<S::Ok, S::Error> {
        match pixels {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Arc<[u8]>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map(Arc::from).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_stride_rounds_up() {
        let bmp = RawBitmapDescriptor::blank_mono(9, 2);
        assert_eq!(bmp.stride(), 2);
        assert_eq!(bmp.acquire().map(|p| p.len()), Some(4));
    }

    #[test]
    fn test_short_buffer_is_not_acquirable() {
        let bmp = RawBitmapDescriptor::new(4, 4, PixelFormat::Gray8, vec![0; 15]);
        assert!(bmp.acquire().is_none());
    }

    #[test]
    fn test_missing_buffer_is_not_acquirable() {
        let bmp = RawBitmapDescriptor::without_buffer(4, 4, 1, PixelFormat::Mono1);
        assert!(bmp.acquire().is_none());
    }

    #[test]
    fn test_payload_pixels_are_base64() {
        let json = r#"{"width":8,"height":1,"bitDepth":1,"pixelFormat":"mono1","pixels":"/w=="}"#;
        let bmp: RawBitmapDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(bmp.acquire(), Some(&[0xFFu8][..]));

        let no_pixels: RawBitmapDescriptor =
            serde_json::from_str(r#"{"width":8,"height":1,"bitDepth":1,"pixelFormat":"mono1"}"#).unwrap();
        assert!(no_pixels.pixels.is_none());
    }
}
