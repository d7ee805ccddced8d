//! Capability Resolver
//!
//! Answers "is this capability supported" for an open session, consulting in
//! order: the shared cache table, the session's unsupported set, then the
//! driver (single query or one bulk enumeration, depending on the session's
//! retrieval mode). Unsupported is a normal answer, not an error. A driver
//! failure is recorded as unsupported for the rest of the session.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CapabilityCacheTable, ProductCache};
use crate::capability::{CapabilityId, CapabilityInfo};
use crate::session::{DeviceSession, RetrievalMode, SessionHandle};
use crate::transport::DriverTransport;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Source not open: {0}")]
    SourceNotOpen(SessionHandle),

    #[error("Invalid session handle: {0}")]
    InvalidSession(SessionHandle),
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Resolution {
    Supported(CapabilityInfo),
    Unsupported,
}

impl Resolution {
    pub fn is_supported(&self) -> bool {
        matches!(self, Resolution::Supported(_))
    }

    pub fn info(&self) -> Option<&CapabilityInfo> {
        match self {
            Resolution::Supported(info) => Some(info),
            Resolution::Unsupported => None,
        }
    }
}

pub struct CapabilityResolver {
    cache: Arc<CapabilityCacheTable>,
    transport: Arc<dyn DriverTransport>,
}

impl CapabilityResolver {
    pub fn new(cache: Arc<CapabilityCacheTable>, transport: Arc<dyn DriverTransport>) -> Self {
        Self { cache, transport }
    }

    pub fn cache(&self) -> &Arc<CapabilityCacheTable> {
        &self.cache
    }

    /// Resolve support for `id`. The caller must not resolve concurrently
    /// on the same session.
    pub fn resolve(
        &self,
        session: &mut DeviceSession,
        id: CapabilityId,
    ) -> Result<Resolution, ResolveError> {
        if !session.is_open() {
            return Err(ResolveError::SourceNotOpen(session.handle()));
        }

        let product = self.cache.product(session.product_name());

        if let Some(info) = product.get(id) {
            debug!(product = %session.product_name(), capability = %id, "capability cache hit");
            return Ok(Resolution::Supported(self.cached(session, &product, info)));
        }

        if session.is_known_unsupported(id) {
            debug!(session = %session.handle(), capability = %id, "capability known unsupported");
            return Ok(Resolution::Unsupported);
        }

        let gate = product.gate(id);
        let negotiating = gate.lock();

        // Another session of this product may have finished while we waited.
        if let Some(info) = product.get(id) {
            drop(negotiating);
            return Ok(Resolution::Supported(self.cached(session, &product, info)));
        }

        let supported = match session.mode() {
            RetrievalMode::Slow => self.query_single(session, id),
            RetrievalMode::Fast => self.query_enumerated(session, id),
        };

        if supported {
            Ok(Resolution::Supported(self.populate(session, &product, id)))
        } else {
            session.mark_unsupported(id);
            debug!(session = %session.handle(), capability = %id, "capability not supported");
            Ok(Resolution::Unsupported)
        }
    }

    /// Boolean form of [`resolve`](Self::resolve)
    pub fn is_supported(
        &self,
        session: &mut DeviceSession,
        id: CapabilityId,
    ) -> Result<bool, ResolveError> {
        self.resolve(session, id).map(|r| r.is_supported())
    }

    fn query_single(&self, session: &DeviceSession, id: CapabilityId) -> bool {
        match self.transport.query_capability(session, id) {
            Ok(supported) => supported,
            Err(e) => {
                warn!(
                    product = %session.product_name(),
                    capability = %id,
                    error = %e,
                    "capability query failed, treating as unsupported"
                );
                false
            }
        }
    }

    fn query_enumerated(&self, session: &mut DeviceSession, id: CapabilityId) -> bool {
        if !session.all_enumerated() {
            let caps = match self.transport.enumerate_capabilities(session) {
                Ok(caps) => caps,
                Err(e) => {
                    warn!(
                        product = %session.product_name(),
                        error = %e,
                        "capability enumeration failed, session sees no capabilities"
                    );
                    Default::default()
                }
            };
            debug!(session = %session.handle(), count = caps.len(), "enumerated capabilities");
            session.store_enumeration(caps);
        }
        session.enumerated().contains(&id)
    }

    /// Cache a newly confirmed capability, describing it if possible.
    /// Called with the capability's gate held.
    fn populate(&self, session: &DeviceSession, product: &ProductCache, id: CapabilityId) -> CapabilityInfo {
        let info = match self.transport.describe_capability(session, id) {
            Ok(details) => CapabilityInfo::with_details(id, details),
            Err(e) => {
                debug!(capability = %id, error = %e, "capability detail unavailable");
                CapabilityInfo::bare(id)
            }
        };
        debug!(product = %session.product_name(), capability = %id, "caching supported capability");
        product.insert_if_absent(info)
    }

    /// A cache hit, with detail gathering retried if the entry lacks it.
    /// Must be called without the capability's gate held.
    fn cached(&self, session: &DeviceSession, product: &ProductCache, info: CapabilityInfo) -> CapabilityInfo {
        if info.details_gathered {
            info
        } else {
            self.gather_details(session, product, info)
        }
    }

    /// Best effort; the supported verdict stands whether or not this succeeds.
    fn gather_details(
        &self,
        session: &DeviceSession,
        product: &ProductCache,
        info: CapabilityInfo,
    ) -> CapabilityInfo {
        let id = info.id;
        let gate = product.gate(id);
        let _negotiating = gate.lock();

        if let Some(current) = product.get(id) {
            if current.details_gathered {
                return current;
            }
        }

        match self.transport.describe_capability(session, id) {
            Ok(details) => {
                product.complete_details(id, details);
                product.get(id).unwrap_or(info)
            }
            Err(e) => {
                debug!(capability = %id, error = %e, "detail gathering failed on cache hit");
                info
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityDetails, ContainerKind, ItemType};
    use crate::transport::{DeviceProfile, ScriptedTransport};

    fn resolver_for(profile: DeviceProfile) -> (CapabilityResolver, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(profile));
        let resolver = CapabilityResolver::new(Arc::new(CapabilityCacheTable::new()), transport.clone());
        (resolver, transport)
    }

    fn detailed() -> CapabilityDetails {
        CapabilityDetails {
            item_type: Some(ItemType::Uint16),
            container: Some(ContainerKind::OneValue),
            ..Default::default()
        }
    }

    #[test]
    fn test_closed_session_touches_nothing() {
        let (resolver, transport) = resolver_for(DeviceProfile::new("p"));
        let mut session = DeviceSession::new(SessionHandle(1), "p", RetrievalMode::Slow);

        let err = resolver.resolve(&mut session, CapabilityId(0x0140)).unwrap_err();

        assert_eq!(err, ResolveError::SourceNotOpen(SessionHandle(1)));
        assert_eq!(transport.calls().queries, 0);
        assert_eq!(resolver.cache().product_count(), 0);
    }

    #[test]
    fn test_supported_result_carries_details() {
        let profile = DeviceProfile::new("p").with_capability(CapabilityId(0x0150), detailed());
        let (resolver, _) = resolver_for(profile);
        let mut session = DeviceSession::opened(SessionHandle(1), "p", RetrievalMode::Slow);

        let resolution = resolver.resolve(&mut session, CapabilityId(0x0150)).unwrap();
        let info = resolution.info().unwrap();
        assert!(info.details_gathered);
        assert_eq!(info.item_type, Some(ItemType::Uint16));
    }

    #[test]
    fn test_cache_hit_retries_missing_details_only() {
        let profile = DeviceProfile::new("p")
            .with_capability(CapabilityId(0x0150), detailed())
            .with_undescribable(CapabilityId(0x0150));
        let (resolver, transport) = resolver_for(profile);
        let mut session = DeviceSession::opened(SessionHandle(1), "p", RetrievalMode::Slow);

        assert!(resolver.is_supported(&mut session, CapabilityId(0x0150)).unwrap());
        assert!(resolver.is_supported(&mut session, CapabilityId(0x0150)).unwrap());

        let calls = transport.calls();
        assert_eq!(calls.queries, 1);
        assert_eq!(calls.descriptions, 2);
    }

    #[test]
    fn test_undescribable_capability_across_sessions() {
        let profile = DeviceProfile::new("p")
            .with_capability(CapabilityId(0x0150), detailed())
            .with_undescribable(CapabilityId(0x0150));
        let (resolver, transport) = resolver_for(profile);
        let mut first = DeviceSession::opened(SessionHandle(1), "p", RetrievalMode::Slow);
        let mut second = DeviceSession::opened(SessionHandle(2), "p", RetrievalMode::Slow);

        let a = resolver.resolve(&mut first, CapabilityId(0x0150)).unwrap();
        let b = resolver.resolve(&mut second, CapabilityId(0x0150)).unwrap();

        assert!(!a.info().unwrap().details_gathered);
        assert!(!b.info().unwrap().details_gathered);
        let calls = transport.calls();
        assert_eq!(calls.queries, 1);
        assert_eq!(calls.descriptions, 2);
    }

    #[test]
    fn test_entry_cached_while_waiting_gets_details() {
        let profile = DeviceProfile::new("p").with_capability(CapabilityId(0x0150), detailed());
        let (resolver, transport) = resolver_for(profile);
        let resolver = Arc::new(resolver);
        let product = resolver.cache().product("p");

        let gate = product.gate(CapabilityId(0x0150));
        let held = gate.lock();
        let waiter = {
            let resolver = resolver.clone();
            std::thread::spawn(move || {
                let mut session = DeviceSession::opened(SessionHandle(2), "p", RetrievalMode::Slow);
                resolver.resolve(&mut session, CapabilityId(0x0150)).unwrap()
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        product.insert_if_absent(CapabilityInfo::bare(CapabilityId(0x0150)));
        drop(held);

        let resolution = waiter.join().unwrap();
        assert!(resolution.info().unwrap().details_gathered);
        assert!(product.get(CapabilityId(0x0150)).unwrap().details_gathered);
        let calls = transport.calls();
        assert_eq!(calls.queries, 0);
        assert_eq!(calls.descriptions, 1);
    }

    #[test]
    fn test_transport_failure_becomes_unsupported() {
        let profile = DeviceProfile::new("p")
            .with_capability(CapabilityId(0x0170), detailed())
            .with_failing(CapabilityId(0x0170));
        let (resolver, transport) = resolver_for(profile);
        let mut session = DeviceSession::opened(SessionHandle(1), "p", RetrievalMode::Slow);

        assert_eq!(resolver.resolve(&mut session, CapabilityId(0x0170)), Ok(Resolution::Unsupported));
        assert_eq!(resolver.resolve(&mut session, CapabilityId(0x0170)), Ok(Resolution::Unsupported));
        assert!(session.is_known_unsupported(CapabilityId(0x0170)));
        assert_eq!(transport.queries_for(CapabilityId(0x0170)), 1);
    }

    #[test]
    fn test_fast_mode_enumerates_once() {
        let profile = DeviceProfile::new("p")
            .with_capability(CapabilityId(0x0101), detailed())
            .with_capability(CapabilityId(0x0102), detailed());
        let (resolver, transport) = resolver_for(profile);
        let mut session = DeviceSession::opened(SessionHandle(1), "p", RetrievalMode::Fast);

        assert!(resolver.is_supported(&mut session, CapabilityId(0x0101)).unwrap());
        assert!(resolver.is_supported(&mut session, CapabilityId(0x0102)).unwrap());
        assert!(!resolver.is_supported(&mut session, CapabilityId(0x0103)).unwrap());
        assert!(!resolver.is_supported(&mut session, CapabilityId(0x0104)).unwrap());

        let calls = transport.calls();
        assert_eq!(calls.enumerations, 1);
        assert_eq!(calls.queries, 0);
        assert!(session.all_enumerated());
        assert!(session.is_known_unsupported(CapabilityId(0x0103)));
    }

    #[test]
    fn test_failed_enumeration_is_not_retried() {
        let mut profile = DeviceProfile::new("p").with_capability(CapabilityId(0x0101), detailed());
        profile.enumeration_fails = true;
        let (resolver, transport) = resolver_for(profile);
        let mut session = DeviceSession::opened(SessionHandle(1), "p", RetrievalMode::Fast);

        assert!(!resolver.is_supported(&mut session, CapabilityId(0x0101)).unwrap());
        assert!(!resolver.is_supported(&mut session, CapabilityId(0x0102)).unwrap());
        assert_eq!(transport.calls().enumerations, 1);
    }

    #[test]
    fn test_supported_never_enters_unsupported_set() {
        let profile = DeviceProfile::new("p").with_capability(CapabilityId(0x0150), detailed());
        let (resolver, _) = resolver_for(profile);
        let mut session = DeviceSession::opened(SessionHandle(1), "p", RetrievalMode::Fast);

        for _ in 0..3 {
            assert!(resolver.is_supported(&mut session, CapabilityId(0x0150)).unwrap());
        }
        assert!(!session.is_known_unsupported(CapabilityId(0x0150)));
    }
}
