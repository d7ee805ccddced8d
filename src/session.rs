//! Device Sessions
//!
//! A session is one opened device. It carries the retrieval mode and the
//! session-local capability sets; the product-wide cache lives elsewhere.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::capability::CapabilityId;

/// Driver-assigned session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub u32);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// How capability support is discovered for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// One driver query per capability
    #[default]
    Slow,
    /// One bulk enumeration per session, then in-memory lookups
    Fast,
}

#[derive(Debug)]
pub struct DeviceSession {
    handle: SessionHandle,
    product_name: String,
    is_open: bool,
    mode: RetrievalMode,
    all_enumerated: bool,
    enumerated: HashSet<CapabilityId>,
    unsupported: HashSet<CapabilityId>,
}

impl DeviceSession {
    /// A closed session for the given device model
    pub fn new(handle: SessionHandle, product_name: impl Into<String>, mode: RetrievalMode) -> Self {
        Self {
            handle,
            product_name: product_name.into(),
            is_open: false,
            mode,
            all_enumerated: false,
            enumerated: HashSet::new(),
            unsupported: HashSet::new(),
        }
    }

    pub fn opened(handle: SessionHandle, product_name: impl Into<String>, mode: RetrievalMode) -> Self {
        let mut session = Self::new(handle, product_name, mode);
        session.open();
        session
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RetrievalMode) {
        self.mode = mode;
    }

    pub fn all_enumerated(&self) -> bool {
        self.all_enumerated
    }

    pub fn enumerated(&self) -> &HashSet<CapabilityId> {
        &self.enumerated
    }

    pub fn unsupported(&self) -> &HashSet<CapabilityId> {
        &self.unsupported
    }

    pub fn open(&mut self) {
        self.is_open = true;
    }

    /// Close the session. Session-local sets are discarded so a reopen
    /// starts negotiation from scratch.
    pub fn close(&mut self) {
        self.is_open = false;
        self.all_enumerated = false;
        self.enumerated.clear();
        self.unsupported.clear();
    }

    pub fn is_known_unsupported(&self, id: CapabilityId) -> bool {
        self.unsupported.contains(&id)
    }

    /// Entries are only ever added while the session is open.
    pub(crate) fn mark_unsupported(&mut self, id: CapabilityId) {
        self.unsupported.insert(id);
    }

    /// Store the bulk enumeration result. Authoritative until close.
    pub(crate) fn store_enumeration(&mut self, caps: HashSet<CapabilityId>) {
        self.enumerated = caps;
        self.all_enumerated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_clears_session_sets() {
        let mut session = DeviceSession::opened(SessionHandle(1), "Flatbed 9000", RetrievalMode::Fast);
        session.store_enumeration([CapabilityId(0x0101)].into_iter().collect());
        session.mark_unsupported(CapabilityId(0x0160));

        session.close();

        assert!(!session.is_open());
        assert!(!session.all_enumerated());
        assert!(session.enumerated().is_empty());
        assert!(session.unsupported().is_empty());
        assert_eq!(session.product_name(), "Flatbed 9000");
    }

    #[test]
    fn test_new_session_is_closed() {
        let session = DeviceSession::new(SessionHandle(7), "x", RetrievalMode::Slow);
        assert!(!session.is_open());
        assert_eq!(session.handle().to_string(), "session#7");
    }
}
