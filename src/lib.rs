//! ScanForge Core - scanner capability resolution and bitmap output
//!
//! # Two Guarantees
//! 1. A (product, capability) pair is negotiated with the driver at most once
//!    per process; unsupported answers are remembered for the session.
//! 2. Encoders validate before they write. A rejected bitmap leaves nothing on disk.

pub mod bitmap;
pub mod cache;
pub mod capability;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod hashing;
pub mod legacy;
pub mod logging;
pub mod raster;
pub mod resolver;
pub mod session;
pub mod transport;
pub mod validation;
pub mod wbmp;

pub use bitmap::{PixelFormat, RawBitmapDescriptor};
pub use cache::CapabilityCacheTable;
pub use capability::{CapabilityId, CapabilityInfo};
pub use config::EngineConfig;
pub use encoder::{EncodeError, EncodeReport, Encoder, EncoderPolicy, EncoderRegistry, OutputFormat, StatusCode};
pub use engine::Engine;
pub use resolver::{CapabilityResolver, Resolution, ResolveError};
pub use session::{DeviceSession, RetrievalMode, SessionHandle};
pub use transport::{DriverTransport, ProfileError, TransportError};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_ENGINE_VERSION: &str = "1.0.0";
