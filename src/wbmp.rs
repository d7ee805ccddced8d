//! WBMP (Wireless Bitmap, type 0) encoder
//!
//! Monochrome only, at most 255 x 255. Pixels are packed MSB first with
//! 1 = white, which is already the layout of a `Mono1` buffer.

use crate::bitmap::{PixelFormat, RawBitmapDescriptor};
use crate::encoder::{EncodeError, Encoder, EncoderPolicy, OutputFormat};

pub const WBMP_MAX_DIMENSION: u32 = 255;

pub struct WbmpEncoder {
    policy: EncoderPolicy,
}

impl WbmpEncoder {
    pub fn new() -> Self {
        Self {
            policy: EncoderPolicy::single_depth(1, WBMP_MAX_DIMENSION, WBMP_MAX_DIMENSION),
        }
    }
}

impl Default for WbmpEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for WbmpEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Wbmp
    }

    fn policy(&self) -> &EncoderPolicy {
        &self.policy
    }

    fn transcode(&self, bitmap: &RawBitmapDescriptor, pixels: &[u8]) -> Result<Vec<u8>, EncodeError> {
        if bitmap.pixel_format != PixelFormat::Mono1 {
            return Err(EncodeError::Transcode(format!(
                "WBMP needs mono1 pixels, got {:?}",
                bitmap.pixel_format
            )));
        }

        let stride = bitmap.stride();
        if stride == 0 {
            return Err(EncodeError::Transcode("empty bitmap".to_string()));
        }
        let mut out = Vec::with_capacity(8 + stride * bitmap.height as usize);
        out.push(0x00); // type 0
        out.push(0x00); // fixed header
        push_multibyte(&mut out, bitmap.width);
        push_multibyte(&mut out, bitmap.height);

        // Unused low bits of the last byte in a row are zeroed.
        let tail_bits = (bitmap.width % 8) as u8;
        let tail_mask = if tail_bits == 0 { 0xFF } else { 0xFFu8 << (8 - tail_bits) };

        for y in 0..bitmap.height {
            let row = bitmap.row(pixels, y);
            out.extend_from_slice(&row[..stride - 1]);
            out.push(row[stride - 1] & tail_mask);
        }
        Ok(out)
    }
}

/// WBMP multi-byte integer: 7 bits per byte, most significant group first,
/// high bit set on every byte but the last.
fn push_multibyte(out: &mut Vec<u8>, mut value: u32) {
    let mut groups = [0u8; 5];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7F) as u8;
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0x00 };
        out.push(groups[i] | continuation);
    }
}
