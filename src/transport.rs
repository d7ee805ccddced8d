//! Driver Transport - the expensive side of capability negotiation
//!
//! Every call here is a blocking round-trip to the device driver.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::capability::{CapabilityDetails, CapabilityId};
use crate::session::DeviceSession;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Communication failure: {0}")]
    Communication(String),

    #[error("Driver not ready: {0}")]
    NotReady(String),

    #[error("Driver rejected request for {capability}: {reason}")]
    Rejected { capability: CapabilityId, reason: String },
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read device profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device profile: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Handshake operations the resolver needs from a driver
pub trait DriverTransport: Send + Sync {
    /// Ask the driver whether a single capability is supported
    fn query_capability(
        &self,
        session: &DeviceSession,
        id: CapabilityId,
    ) -> Result<bool, TransportError>;

    /// Enumerate every capability the driver reports as supported
    fn enumerate_capabilities(
        &self,
        session: &DeviceSession,
    ) -> Result<HashSet<CapabilityId>, TransportError>;

    /// Gather type, container and value detail for a supported capability
    fn describe_capability(
        &self,
        session: &DeviceSession,
        id: CapabilityId,
    ) -> Result<CapabilityDetails, TransportError>;
}

/// Simulated device description, loadable from JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub product_name: String,
    #[serde(default)]
    pub capabilities: HashMap<CapabilityId, CapabilityDetails>,
    /// Capabilities whose single query fails with a communication error
    #[serde(default)]
    pub failing: HashSet<CapabilityId>,
    /// Capabilities that are supported but cannot be described
    #[serde(default)]
    pub undescribable: HashSet<CapabilityId>,
    #[serde(default)]
    pub enumeration_fails: bool,
}

impl DeviceProfile {
    pub fn new(product_name: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_capability(mut self, id: CapabilityId, details: CapabilityDetails) -> Self {
        self.capabilities.insert(id, details);
        self
    }

    pub fn with_failing(mut self, id: CapabilityId) -> Self {
        self.failing.insert(id);
        self
    }

    pub fn with_undescribable(mut self, id: CapabilityId) -> Self {
        self.undescribable.insert(id);
        self
    }
}

/// Call counts observed by a [`ScriptedTransport`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportCalls {
    pub queries: usize,
    pub enumerations: usize,
    pub descriptions: usize,
}

/// Deterministic in-process driver backed by a [`DeviceProfile`]
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    profile: DeviceProfile,
    queries: AtomicUsize,
    enumerations: AtomicUsize,
    descriptions: AtomicUsize,
    per_capability: parking_lot::Mutex<HashMap<CapabilityId, usize>>,
}

impl ScriptedTransport {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn calls(&self) -> TransportCalls {
        TransportCalls {
            queries: self.queries.load(Ordering::SeqCst),
            enumerations: self.enumerations.load(Ordering::SeqCst),
            descriptions: self.descriptions.load(Ordering::SeqCst),
        }
    }

    /// Single-capability queries issued for `id`
    pub fn queries_for(&self, id: CapabilityId) -> usize {
        self.per_capability.lock().get(&id).copied().unwrap_or(0)
    }
}

impl DriverTransport for ScriptedTransport {
    fn query_capability(
        &self,
        _session: &DeviceSession,
        id: CapabilityId,
    ) -> Result<bool, TransportError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.per_capability.lock().entry(id).or_insert(0) += 1;

        if self.profile.failing.contains(&id) {
            return Err(TransportError::Communication(format!(
                "no response for {}",
                id
            )));
        }
        Ok(self.profile.capabilities.contains_key(&id))
    }

    fn enumerate_capabilities(
        &self,
        _session: &DeviceSession,
    ) -> Result<HashSet<CapabilityId>, TransportError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);

        if self.profile.enumeration_fails {
            return Err(TransportError::NotReady(
                "supported-capabilities list unavailable".to_string(),
            ));
        }
        Ok(self.profile.capabilities.keys().copied().collect())
    }

    fn describe_capability(
        &self,
        _session: &DeviceSession,
        id: CapabilityId,
    ) -> Result<CapabilityDetails, TransportError> {
        self.descriptions.fetch_add(1, Ordering::SeqCst);

        if self.profile.undescribable.contains(&id) {
            return Err(TransportError::Rejected {
                capability: id,
                reason: "get request failed".to_string(),
            });
        }
        self.profile
            .capabilities
            .get(&id)
            .cloned()
            .ok_or_else(|| TransportError::Rejected {
                capability: id,
                reason: "not supported".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{RetrievalMode, SessionHandle};

    #[test]
    fn test_scripted_transport_counts_calls() {
        let profile = DeviceProfile::new("Sheetfeed")
            .with_capability(CapabilityId(0x0150), CapabilityDetails::default())
            .with_failing(CapabilityId(0x0170));
        let transport = ScriptedTransport::new(profile);
        let session = DeviceSession::opened(SessionHandle(1), "Sheetfeed", RetrievalMode::Slow);

        assert_eq!(transport.query_capability(&session, CapabilityId(0x0150)), Ok(true));
        assert_eq!(transport.query_capability(&session, CapabilityId(0x0160)), Ok(false));
        assert!(transport.query_capability(&session, CapabilityId(0x0170)).is_err());
        assert_eq!(transport.enumerate_capabilities(&session).unwrap().len(), 1);

        let calls = transport.calls();
        assert_eq!(calls.queries, 3);
        assert_eq!(calls.enumerations, 1);
        assert_eq!(transport.queries_for(CapabilityId(0x0150)), 1);
    }

    #[test]
    fn test_profile_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();

        assert!(matches!(DeviceProfile::load(&bad), Err(ProfileError::Parse(_))));
        assert!(matches!(
            DeviceProfile::load(&dir.path().join("missing.json")),
            Err(ProfileError::Io(_))
        ));
    }

    #[test]
    fn test_profile_from_json() {
        let json = r#"{
            "productName": "Flatbed 9000",
            "capabilities": {
                "4376": { "itemType": "fix32", "container": "enumeration", "current": 300.0 }
            },
            "enumerationFails": true
        }"#;
        let profile: DeviceProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.product_name, "Flatbed 9000");
        assert!(profile.capabilities.contains_key(&CapabilityId(0x1118)));
        assert!(profile.enumeration_fails);
    }
}
