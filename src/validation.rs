//! Validation System - ordered structural rules
//!
//! Rules produce structured violations. The first violation decides the
//! status an encode call reports; nothing is written unless the result is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bitmap::RawBitmapDescriptor;
use crate::encoder::{EncoderPolicy, OutputFormat, StatusCode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub status: StatusCode,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub format: OutputFormat,
}

impl ValidationResult {
    pub fn success(format: OutputFormat) -> Self {
        Self {
            valid: true,
            violations: vec![],
            format,
        }
    }

    pub fn failure(format: OutputFormat, violations: Vec<ValidationViolation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
            format,
        }
    }

    /// Status of the first failing rule, or `Success`
    pub fn status(&self) -> StatusCode {
        self.violations
            .first()
            .map(|v| v.status)
            .unwrap_or(StatusCode::Success)
    }

    pub fn first_violation(&self) -> Option<&ValidationViolation> {
        self.violations.first()
    }
}

/// Everything a rule may look at
pub struct ValidationInput<'a> {
    pub bitmap: &'a RawBitmapDescriptor,
    pub policy: &'a EncoderPolicy,
    pub target: &'a Path,
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct BufferRule;

impl ValidationRule for BufferRule {
    fn name(&self) -> &'static str { "buffer" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        if input.bitmap.acquire().is_some() {
            return vec![];
        }
        let actual = match &input.bitmap.pixels {
            None => "no buffer".to_string(),
            Some(p) => format!("{} bytes", p.len()),
        };
        vec![ValidationViolation {
            rule: self.name().to_string(),
            status: StatusCode::BufferUnavailable,
            message: "Pixel buffer could not be acquired".to_string(),
            expected: Some(match input.bitmap.stride().checked_mul(input.bitmap.height as usize) {
                Some(needed) => format!("{} bytes", needed),
                None => "overflow".to_string(),
            }),
            actual: Some(actual),
            remediation: vec!["Re-acquire the bitmap from the completed transfer".to_string()],
        }]
    }
}

/// Formats with a single legal depth
pub struct ExactDepthRule;

impl ValidationRule for ExactDepthRule {
    fn name(&self) -> &'static str { "exact_bit_depth" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        match input.policy.required_depth {
            Some(required) if input.bitmap.bit_depth != required => vec![ValidationViolation {
                rule: self.name().to_string(),
                status: StatusCode::InvalidBitDepth,
                message: "Format supports a single bit depth".to_string(),
                expected: Some(format!("{} bpp", required)),
                actual: Some(format!("{} bpp", input.bitmap.bit_depth)),
                remediation: vec![format!("Scan or convert to {} bpp", required)],
            }],
            _ => vec![],
        }
    }
}

pub struct DimensionRule;

impl ValidationRule for DimensionRule {
    fn name(&self) -> &'static str { "dimensions" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        let p = input.policy;
        let (w, h) = (input.bitmap.width, input.bitmap.height);

        if w < p.min_width || h < p.min_height || w > p.max_width || h > p.max_height {
            vec![ValidationViolation {
                rule: self.name().to_string(),
                status: StatusCode::InvalidDimensions,
                message: "Dimensions outside format limits".to_string(),
                expected: Some(format!(
                    "{}x{} to {}x{}",
                    p.min_width, p.min_height, p.max_width, p.max_height
                )),
                actual: Some(format!("{}x{}", w, h)),
                remediation: vec!["Crop or scale the image, or pick a format without this limit".to_string()],
            }]
        } else {
            vec![]
        }
    }
}

/// Shared allowed-depth predicate; every encoder runs it.
pub struct AllowedDepthRule;

impl ValidationRule for AllowedDepthRule {
    fn name(&self) -> &'static str { "allowed_bit_depth" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        if input.policy.allows_depth(input.bitmap.bit_depth) {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            status: StatusCode::InvalidBitDepth,
            message: "Bit depth not allowed for this format".to_string(),
            expected: Some(format!("{:?}", input.policy.allowed_depths)),
            actual: Some(input.bitmap.bit_depth.to_string()),
            remediation: vec!["Convert the bitmap to an allowed depth".to_string()],
        }]
    }
}

/// Declared depth must agree with the buffer layout
pub struct PixelLayoutRule;

impl ValidationRule for PixelLayoutRule {
    fn name(&self) -> &'static str { "pixel_layout" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        let layout_bpp = input.bitmap.pixel_format.bits_per_pixel();
        if input.bitmap.bit_depth == layout_bpp {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            status: StatusCode::InvalidBitDepth,
            message: "Bit depth does not match pixel format".to_string(),
            expected: Some(format!("{} bpp for {:?}", layout_bpp, input.bitmap.pixel_format)),
            actual: Some(format!("{} bpp", input.bitmap.bit_depth)),
            remediation: vec![],
        }]
    }
}

/// The encoder never creates directories.
pub struct TargetPathRule;

impl ValidationRule for TargetPathRule {
    fn name(&self) -> &'static str { "target_path" }

    fn validate(&self, input: &ValidationInput<'_>) -> Vec<ValidationViolation> {
        if parent_directory_exists(input.target) {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            status: StatusCode::PathUnavailable,
            message: "Target directory does not exist".to_string(),
            expected: None,
            actual: Some(input.target.display().to_string()),
            remediation: vec!["Create the directory before encoding".to_string()],
        }]
    }
}

pub fn parent_directory_exists(path: &Path) -> bool {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new(".").is_dir(),
        Some(parent) => parent.is_dir(),
        None => false,
    }
}

/// Runs rules in a fixed order
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(BufferRule),
                Box::new(ExactDepthRule),
                Box::new(DimensionRule),
                Box::new(AllowedDepthRule),
                Box::new(PixelLayoutRule),
                Box::new(TargetPathRule),
            ],
        }
    }

    pub fn validate(
        &self,
        format: OutputFormat,
        bitmap: &RawBitmapDescriptor,
        policy: &EncoderPolicy,
        target: &Path,
    ) -> ValidationResult {
        let input = ValidationInput { bitmap, policy, target };
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(&input))
            .collect();

        if violations.is_empty() {
            ValidationResult::success(format)
        } else {
            ValidationResult::failure(format, violations)
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
