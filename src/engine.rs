//! Engine - boundary entry point
//!
//! Owns the session table, the resolver and the encoder registry. Every
//! boundary call records its outcome in the thread-local legacy slot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bitmap::RawBitmapDescriptor;
use crate::cache::CapabilityCacheTable;
use crate::capability::{CapabilityId, CapabilityInfo};
use crate::config::EngineConfig;
use crate::encoder::{EncodeError, EncodeReport, EncoderRegistry, OutputFormat, StatusCode};
use crate::legacy::{self, LastStatus};
use crate::resolver::{CapabilityResolver, Resolution, ResolveError};
use crate::session::{DeviceSession, RetrievalMode, SessionHandle};
use crate::transport::DriverTransport;

pub struct Engine {
    resolver: CapabilityResolver,
    encoders: EncoderRegistry,
    sessions: HashMap<SessionHandle, DeviceSession>,
    default_mode: RetrievalMode,
    next_handle: u32,
}

impl Engine {
    /// Engine with its own cache table
    pub fn new(transport: Arc<dyn DriverTransport>, config: &EngineConfig) -> Self {
        Self::with_cache(Arc::new(CapabilityCacheTable::new()), transport, config)
    }

    /// Engine sharing a process-wide cache table with other engines
    pub fn with_cache(
        cache: Arc<CapabilityCacheTable>,
        transport: Arc<dyn DriverTransport>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            resolver: CapabilityResolver::new(cache, transport),
            encoders: EncoderRegistry::with_formats(&config.enabled_formats),
            sessions: HashMap::new(),
            default_mode: config.retrieval_mode(),
            next_handle: 1,
        }
    }

    pub fn cache(&self) -> &Arc<CapabilityCacheTable> {
        self.resolver.cache()
    }

    pub fn encoders(&self) -> &EncoderRegistry {
        &self.encoders
    }

    pub fn open_session(&mut self, product_name: &str) -> SessionHandle {
        self.open_session_with_mode(product_name, self.default_mode)
    }

    pub fn open_session_with_mode(&mut self, product_name: &str, mode: RetrievalMode) -> SessionHandle {
        let handle = self.allocate_handle();
        self.sessions
            .insert(handle, DeviceSession::opened(handle, product_name, mode));
        info!(session = %handle, product = %product_name, ?mode, "session opened");
        handle
    }

    /// Close a session. Its handle stays valid for [`reopen_session`](Self::reopen_session).
    pub fn close_session(&mut self, handle: SessionHandle) -> Result<(), ResolveError> {
        let session = self
            .sessions
            .get_mut(&handle)
            .ok_or(ResolveError::InvalidSession(handle))?;
        session.close();
        info!(session = %handle, "session closed");
        Ok(())
    }

    /// Drop a session from the table. The handle becomes invalid and may be
    /// reused; cached capability data is kept.
    pub fn release_session(&mut self, handle: SessionHandle) -> Result<(), ResolveError> {
        self.sessions
            .remove(&handle)
            .ok_or(ResolveError::InvalidSession(handle))?;
        debug!(session = %handle, "session released");
        Ok(())
    }

    /// Next unused handle. Zero is never issued.
    fn allocate_handle(&mut self) -> SessionHandle {
        loop {
            let handle = SessionHandle(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
            if !self.sessions.contains_key(&handle) {
                return handle;
            }
        }
    }

    pub fn reopen_session(&mut self, handle: SessionHandle) -> Result<(), ResolveError> {
        let session = self
            .sessions
            .get_mut(&handle)
            .ok_or(ResolveError::InvalidSession(handle))?;
        session.open();
        debug!(session = %handle, "session reopened");
        Ok(())
    }

    pub fn set_retrieval_mode(&mut self, handle: SessionHandle, mode: RetrievalMode) -> Result<(), ResolveError> {
        let session = self
            .sessions
            .get_mut(&handle)
            .ok_or(ResolveError::InvalidSession(handle))?;
        session.set_mode(mode);
        Ok(())
    }

    pub fn session(&self, handle: SessionHandle) -> Option<&DeviceSession> {
        self.sessions.get(&handle)
    }

    pub fn resolve(&mut self, handle: SessionHandle, id: CapabilityId) -> Result<Resolution, ResolveError> {
        let result = match self.sessions.get_mut(&handle) {
            Some(session) => self.resolver.resolve(session, id),
            None => Err(ResolveError::InvalidSession(handle)),
        };
        legacy::record(LastStatus::Resolve(result.as_ref().err().cloned()));
        result
    }

    /// `Ok(false)` means unsupported; errors are reserved for caller mistakes.
    pub fn is_capability_supported(&mut self, handle: SessionHandle, id: CapabilityId) -> Result<bool, ResolveError> {
        self.resolve(handle, id).map(|r| r.is_supported())
    }

    /// Cached metadata for a supported capability
    pub fn capability_info(&mut self, handle: SessionHandle, id: CapabilityId) -> Result<Option<CapabilityInfo>, ResolveError> {
        self.resolve(handle, id).map(|r| r.info().cloned())
    }

    pub fn encode_bitmap_report(
        &self,
        format: OutputFormat,
        bitmap: &RawBitmapDescriptor,
        target: &Path,
    ) -> Result<EncodeReport, EncodeError> {
        let result = self.encoders.encode(format, bitmap, target);
        let status = match &result {
            Ok(_) => StatusCode::Success,
            Err(e) => e.status(),
        };
        legacy::record(LastStatus::Encode(status));
        result
    }

    pub fn encode_bitmap(&self, format: OutputFormat, bitmap: &RawBitmapDescriptor, target: &Path) -> StatusCode {
        match self.encode_bitmap_report(format, bitmap, target) {
            Ok(_) => StatusCode::Success,
            Err(e) => e.status(),
        }
    }

    /// String-tag form of [`encode_bitmap`](Self::encode_bitmap)
    pub fn encode_bitmap_tag(&self, tag: &str, bitmap: &RawBitmapDescriptor, target: &Path) -> StatusCode {
        match tag.parse::<OutputFormat>() {
            Ok(format) => self.encode_bitmap(format, bitmap, target),
            Err(e) => {
                legacy::record(LastStatus::Encode(e.status()));
                e.status()
            }
        }
    }
}
