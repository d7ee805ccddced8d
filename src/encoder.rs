//! Encoder Framework - validate, then write
//!
//! Every output format is an [`Encoder`] with its own [`EncoderPolicy`]. The
//! [`EncoderRegistry`] maps format tags to encoders and is the only encode
//! entry point: it always validates first, and a failed validation never
//! touches the filesystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bitmap::RawBitmapDescriptor;
use crate::hashing::sha256_hex;
use crate::raster::{BmpEncoder, PngEncoder};
use crate::validation::{ValidationResult, Validator};
use crate::wbmp::WbmpEncoder;

/// Output format tags. Not every tag has a registered encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wbmp,
    Bmp,
    Png,
    Tiff,
    Jpeg,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Wbmp,
        OutputFormat::Bmp,
        OutputFormat::Png,
        OutputFormat::Tiff,
        OutputFormat::Jpeg,
        OutputFormat::Pdf,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Wbmp => "wbmp",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tif",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            OutputFormat::Wbmp => "wbmp",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Pdf => "pdf",
        };
        f.write_str(tag)
    }
}

impl FromStr for OutputFormat {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wbmp" => Ok(OutputFormat::Wbmp),
            "bmp" => Ok(OutputFormat::Bmp),
            "png" => Ok(OutputFormat::Png),
            "tif" | "tiff" => Ok(OutputFormat::Tiff),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(EncodeError::UnknownFormat(other.to_string())),
        }
    }
}

/// Result of an encode call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Success,
    BufferUnavailable,
    InvalidBitDepth,
    InvalidDimensions,
    PathUnavailable,
    UnknownFormat,
    WriteFailed,
}

impl StatusCode {
    /// Stable numeric code; zero is success.
    pub fn code(&self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::BufferUnavailable => -1,
            StatusCode::InvalidBitDepth => -2,
            StatusCode::InvalidDimensions => -3,
            StatusCode::PathUnavailable => -4,
            StatusCode::UnknownFormat => -5,
            StatusCode::WriteFailed => -6,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == StatusCode::Success
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Unknown output format: {0}")]
    UnknownFormat(String),

    #[error("Pixel buffer unavailable")]
    BufferUnavailable,

    #[error("Invalid bit depth: {0}")]
    InvalidBitDepth(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Target path unavailable: {0}")]
    PathUnavailable(PathBuf),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl EncodeError {
    pub fn status(&self) -> StatusCode {
        match self {
            EncodeError::UnknownFormat(_) => StatusCode::UnknownFormat,
            EncodeError::BufferUnavailable => StatusCode::BufferUnavailable,
            EncodeError::InvalidBitDepth(_) => StatusCode::InvalidBitDepth,
            EncodeError::InvalidDimensions(_) => StatusCode::InvalidDimensions,
            EncodeError::PathUnavailable(_) => StatusCode::PathUnavailable,
            EncodeError::Transcode(_) | EncodeError::Io(_) => StatusCode::WriteFailed,
        }
    }

    /// Convert a failed validation into the error for its first violation
    pub fn from_validation(result: &ValidationResult, target: &Path) -> Option<Self> {
        let v = result.first_violation()?;
        let detail = format!(
            "{} (expected {}, got {})",
            v.message,
            v.expected.as_deref().unwrap_or("-"),
            v.actual.as_deref().unwrap_or("-")
        );
        Some(match v.status {
            StatusCode::BufferUnavailable => EncodeError::BufferUnavailable,
            StatusCode::InvalidBitDepth => EncodeError::InvalidBitDepth(detail),
            StatusCode::InvalidDimensions => EncodeError::InvalidDimensions(detail),
            StatusCode::PathUnavailable => EncodeError::PathUnavailable(target.to_path_buf()),
            StatusCode::UnknownFormat => EncodeError::UnknownFormat(result.format.to_string()),
            StatusCode::Success | StatusCode::WriteFailed => EncodeError::Transcode(detail),
        })
    }
}

/// Structural limits for one format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderPolicy {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub allowed_depths: Vec<u16>,
    /// Set when the format has exactly one legal depth
    pub required_depth: Option<u16>,
}

impl EncoderPolicy {
    pub fn single_depth(depth: u16, max_width: u32, max_height: u32) -> Self {
        Self {
            min_width: 1,
            min_height: 1,
            max_width,
            max_height,
            allowed_depths: vec![depth],
            required_depth: Some(depth),
        }
    }

    pub fn multi_depth(depths: &[u16], max_width: u32, max_height: u32) -> Self {
        Self {
            min_width: 1,
            min_height: 1,
            max_width,
            max_height,
            allowed_depths: depths.to_vec(),
            required_depth: None,
        }
    }

    pub fn allows_depth(&self, depth: u16) -> bool {
        self.allowed_depths.contains(&depth)
    }
}

/// What a successful write produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeReport {
    pub job_id: Uuid,
    pub format: OutputFormat,
    pub path: PathBuf,
    pub bytes: usize,
    pub sha256: String,
    pub written_at: DateTime<Utc>,
}

/// A format-specific encoder
pub trait Encoder: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn policy(&self) -> &EncoderPolicy;

    /// Produce the encoded file contents from an acquired buffer
    fn transcode(&self, bitmap: &RawBitmapDescriptor, pixels: &[u8]) -> Result<Vec<u8>, EncodeError>;

    fn validate(&self, bitmap: &RawBitmapDescriptor, target: &Path) -> ValidationResult {
        Validator::new().validate(self.format(), bitmap, self.policy(), target)
    }

    /// Transcode and write. Expects a bitmap that passed [`validate`](Self::validate).
    fn write(&self, bitmap: &RawBitmapDescriptor, target: &Path) -> Result<EncodeReport, EncodeError> {
        let pixels = bitmap.acquire().ok_or(EncodeError::BufferUnavailable)?;
        let data = self.transcode(bitmap, pixels)?;
        write_file_atomic(target, &data)?;

        Ok(EncodeReport {
            job_id: Uuid::new_v4(),
            format: self.format(),
            path: target.to_path_buf(),
            bytes: data.len(),
            sha256: sha256_hex(&data),
            written_at: Utc::now(),
        })
    }
}

/// Write through a temp file in the target directory; the target only
/// appears once every byte is on disk. The file gets the same mode as a
/// plain create (0666 less umask), not the temp file default of 0600.
pub fn write_file_atomic(target: &Path, data: &[u8]) -> Result<(), EncodeError> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => return Err(EncodeError::PathUnavailable(target.to_path_buf())),
    };
    let mut builder = tempfile::Builder::new();
    builder.prefix(".scanforge-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(target).map_err(|e| EncodeError::Io(e.error))?;
    Ok(())
}

/// Format tag to encoder map, populated at startup
pub struct EncoderRegistry {
    encoders: HashMap<OutputFormat, Box<dyn Encoder>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self { encoders: HashMap::new() }
    }

    /// Registry with every built-in encoder
    pub fn with_builtin() -> Self {
        Self::with_formats(&OutputFormat::ALL)
    }

    /// Registry with the built-in encoders for `formats`; tags without a
    /// built-in encoder are skipped.
    pub fn with_formats(formats: &[OutputFormat]) -> Self {
        let mut registry = Self::new();
        for format in formats {
            match format {
                OutputFormat::Wbmp => registry.register(Box::new(WbmpEncoder::new())),
                OutputFormat::Bmp => registry.register(Box::new(BmpEncoder::new())),
                OutputFormat::Png => registry.register(Box::new(PngEncoder::new())),
                other => debug!(format = %other, "no built-in encoder"),
            }
        }
        registry
    }

    pub fn register(&mut self, encoder: Box<dyn Encoder>) {
        self.encoders.insert(encoder.format(), encoder);
    }

    pub fn get(&self, format: OutputFormat) -> Option<&dyn Encoder> {
        self.encoders.get(&format).map(|e| &**e)
    }

    pub fn list(&self) -> Vec<&dyn Encoder> {
        let mut encoders: Vec<_> = self.encoders.values().map(|e| &**e).collect();
        encoders.sort_by_key(|e| e.format().to_string());
        encoders
    }

    /// Validate then write. This is the only encode entry point.
    pub fn encode(
        &self,
        format: OutputFormat,
        bitmap: &RawBitmapDescriptor,
        target: &Path,
    ) -> Result<EncodeReport, EncodeError> {
        let encoder = self
            .get(format)
            .ok_or_else(|| EncodeError::UnknownFormat(format.to_string()))?;

        let validation = encoder.validate(bitmap, target);
        if let Some(err) = EncodeError::from_validation(&validation, target) {
            warn!(format = %format, status = ?err.status(), error = %err, "bitmap rejected");
            return Err(err);
        }

        let report = encoder.write(bitmap, target)?;
        info!(
            format = %format,
            path = %report.path.display(),
            bytes = report.bytes,
            "bitmap written"
        );
        Ok(report)
    }

    /// Same as [`encode`](Self::encode) but with a string format tag
    pub fn encode_tag(
        &self,
        tag: &str,
        bitmap: &RawBitmapDescriptor,
        target: &Path,
    ) -> Result<EncodeReport, EncodeError> {
        let format: OutputFormat = tag.parse()?;
        self.encode(format, bitmap, target)
    }
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = EncoderRegistry::with_builtin();
        let formats: Vec<_> = registry.list().iter().map(|e| e.format()).collect();
        assert_eq!(formats, vec![OutputFormat::Bmp, OutputFormat::Png, OutputFormat::Wbmp]);
        assert!(registry.get(OutputFormat::Tiff).is_none());
    }

    #[test]
    fn test_unregistered_tag_is_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EncoderRegistry::with_builtin();
        let bitmap = RawBitmapDescriptor::blank_mono(8, 8);

        let err = registry.encode(OutputFormat::Tiff, &bitmap, &dir.path().join("a.tif")).unwrap_err();
        assert_eq!(err.status(), StatusCode::UnknownFormat);

        let err = registry.encode_tag("xcf", &bitmap, &dir.path().join("a.xcf")).unwrap_err();
        assert_eq!(err.status(), StatusCode::UnknownFormat);
    }

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(StatusCode::Success.code(), 0);
        assert!(StatusCode::Success.is_success());
        assert_eq!(StatusCode::UnknownFormat.code(), -5);
        assert_eq!(serde_json::to_string(&StatusCode::PathUnavailable).unwrap(), "\"path_unavailable\"");
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        write_file_atomic(&target, b"abc").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"abc");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_uses_plain_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let plain = dir.path().join("plain.bin");
        write_file_atomic(&target, b"abc").unwrap();
        std::fs::write(&plain, b"abc").unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&target), mode(&plain));
    }

    #[test]
    fn test_tag_aliases() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("tif".parse::<OutputFormat>().unwrap(), OutputFormat::Tiff);
        assert_eq!(OutputFormat::Tiff.to_string(), "tiff");
    }
}
