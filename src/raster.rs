//! BMP and PNG encoders
//!
//! Both accept 1, 8, 24 and 32 bpp input and delegate the file format to the
//! `image` crate. 1-bit input is expanded to 8-bit grayscale.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;

use crate::bitmap::{PixelFormat, RawBitmapDescriptor};
use crate::encoder::{EncodeError, Encoder, EncoderPolicy, OutputFormat};

const RASTER_DEPTHS: [u16; 4] = [1, 8, 24, 32];
const RASTER_MAX_DIMENSION: u32 = u16::MAX as u32;

/// Build an in-memory image from a validated bitmap
pub fn to_dynamic_image(bitmap: &RawBitmapDescriptor, pixels: &[u8]) -> Result<DynamicImage, EncodeError> {
    let (w, h) = (bitmap.width, bitmap.height);
    let tight = || {
        let mut rows = Vec::with_capacity(bitmap.stride() * h as usize);
        for y in 0..h {
            rows.extend_from_slice(bitmap.row(pixels, y));
        }
        rows
    };

    let too_short = || EncodeError::Transcode(format!("buffer does not fit {}x{}", w, h));
    let image = match bitmap.pixel_format {
        PixelFormat::Mono1 => {
            let mut gray = Vec::with_capacity(w as usize * h as usize);
            for y in 0..h {
                let row = bitmap.row(pixels, y);
                gray.extend((0..w as usize).map(|x| {
                    if row[x / 8] & (0x80 >> (x % 8)) != 0 { 255 } else { 0 }
                }));
            }
            DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, gray).ok_or_else(too_short)?)
        }
        PixelFormat::Gray8 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, tight()).ok_or_else(too_short)?),
        PixelFormat::Rgb24 => DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, tight()).ok_or_else(too_short)?),
        PixelFormat::Rgba32 => DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, tight()).ok_or_else(too_short)?),
    };
    Ok(image)
}

fn encode_with(
    format: ImageFormat,
    bitmap: &RawBitmapDescriptor,
    pixels: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    let image = to_dynamic_image(bitmap, pixels)?;
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .map_err(|e| EncodeError::Transcode(e.to_string()))?;
    Ok(out.into_inner())
}

pub struct BmpEncoder {
    policy: EncoderPolicy,
}

impl BmpEncoder {
    pub fn new() -> Self {
        Self {
            policy: EncoderPolicy::multi_depth(&RASTER_DEPTHS, RASTER_MAX_DIMENSION, RASTER_MAX_DIMENSION),
        }
    }
}

impl Default for BmpEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for BmpEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Bmp
    }

    fn policy(&self) -> &EncoderPolicy {
        &self.policy
    }

    fn transcode(&self, bitmap: &RawBitmapDescriptor, pixels: &[u8]) -> Result<Vec<u8>, EncodeError> {
        encode_with(ImageFormat::Bmp, bitmap, pixels)
    }
}

pub struct PngEncoder {
    policy: EncoderPolicy,
}

impl PngEncoder {
    pub fn new() -> Self {
        Self {
            policy: EncoderPolicy::multi_depth(&RASTER_DEPTHS, RASTER_MAX_DIMENSION, RASTER_MAX_DIMENSION),
        }
    }
}

impl Default for PngEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for PngEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Png
    }

    fn policy(&self) -> &EncoderPolicy {
        &self.policy
    }

    fn transcode(&self, bitmap: &RawBitmapDescriptor, pixels: &[u8]) -> Result<Vec<u8>, EncodeError> {
        encode_with(ImageFormat::Png, bitmap, pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_expands_to_gray() {
        let bitmap = RawBitmapDescriptor::new(3, 1, PixelFormat::Mono1, vec![0b1010_0000]);
        let image = to_dynamic_image(&bitmap, bitmap.acquire().unwrap()).unwrap();
        assert_eq!(image.to_luma8().into_raw(), vec![255, 0, 255]);
    }

    #[test]
    fn test_png_signature() {
        let bitmap = RawBitmapDescriptor::new(2, 2, PixelFormat::Rgb24, vec![10; 12]);
        let data = PngEncoder::new().transcode(&bitmap, bitmap.acquire().unwrap()).unwrap();
        assert_eq!(&data[..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn test_bmp_signature() {
        let bitmap = RawBitmapDescriptor::new(2, 2, PixelFormat::Gray8, vec![0, 64, 128, 255]);
        let data = BmpEncoder::new().transcode(&bitmap, bitmap.acquire().unwrap()).unwrap();
        assert_eq!(&data[..2], b"BM");
    }
}
