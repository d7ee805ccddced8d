//! Capability Cache Table
//!
//! Process-wide store of negotiated capability metadata, keyed by device
//! product name so that every session of the same model shares it. Entries
//! are created lazily and never evicted.
//!
//! Locking is two-level: the table lock only guards the product map, and each
//! product carries its own lock for its capability map. Neither is held while
//! a driver call is in flight. Callers that are about to negotiate a
//! capability take that capability's gate instead, which serializes duplicate
//! negotiations of the same (product, capability) pair without blocking
//! anything else.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::{CapabilityDetails, CapabilityId, CapabilityInfo, CapabilityInfoMap};

/// Cached capability data for one device model
#[derive(Debug)]
pub struct ProductCache {
    product_name: String,
    infos: RwLock<CapabilityInfoMap>,
    gates: Mutex<HashMap<CapabilityId, Arc<Mutex<()>>>>,
}

impl ProductCache {
    fn new(product_name: &str) -> Self {
        Self {
            product_name: product_name.to_string(),
            infos: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn get(&self, id: CapabilityId) -> Option<CapabilityInfo> {
        self.infos.read().get(&id).cloned()
    }

    pub fn contains(&self, id: CapabilityId) -> bool {
        self.infos.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.infos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.read().is_empty()
    }

    /// Insert unless another session got there first. Returns the stored entry.
    pub fn insert_if_absent(&self, info: CapabilityInfo) -> CapabilityInfo {
        let mut infos = self.infos.write();
        infos.entry(info.id).or_insert(info).clone()
    }

    /// Fill in detail for an entry that was cached without it.
    /// Returns false if there is no entry or it already has detail.
    pub fn complete_details(&self, id: CapabilityId, details: CapabilityDetails) -> bool {
        let mut infos = self.infos.write();
        match infos.get_mut(&id) {
            Some(info) if !info.details_gathered => {
                info.apply_details(details);
                true
            }
            _ => false,
        }
    }

    /// Per-capability negotiation gate. Lock the returned mutex for the
    /// duration of a driver round-trip for `id`.
    pub fn gate(&self, id: CapabilityId) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn snapshot(&self) -> Vec<CapabilityInfo> {
        let mut infos: Vec<_> = self.infos.read().values().cloned().collect();
        infos.sort_by_key(|i| i.id);
        infos
    }
}

/// Shared by every resolver in the process; construct once and pass an `Arc`.
#[derive(Debug, Default)]
pub struct CapabilityCacheTable {
    products: RwLock<HashMap<String, Arc<ProductCache>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductSnapshot {
    pub product_name: String,
    pub capabilities: Vec<CapabilityInfo>,
}

impl CapabilityCacheTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the product's cache, creating it on first use
    pub fn product(&self, product_name: &str) -> Arc<ProductCache> {
        if let Some(existing) = self.products.read().get(product_name) {
            return existing.clone();
        }
        self.products
            .write()
            .entry(product_name.to_string())
            .or_insert_with(|| Arc::new(ProductCache::new(product_name)))
            .clone()
    }

    /// Look up without creating the product entry
    pub fn lookup(&self, product_name: &str, id: CapabilityId) -> Option<CapabilityInfo> {
        let product = self.products.read().get(product_name).cloned()?;
        product.get(id)
    }

    pub fn product_count(&self) -> usize {
        self.products.read().len()
    }

    pub fn snapshot(&self) -> Vec<ProductSnapshot> {
        let products: Vec<_> = self.products.read().values().cloned().collect();
        let mut out: Vec<_> = products
            .iter()
            .map(|p| ProductSnapshot {
                product_name: p.product_name().to_string(),
                capabilities: p.snapshot(),
            })
            .collect();
        out.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_product_entry_is_shared() {
        let table = CapabilityCacheTable::new();
        let a = table.product("Flatbed 9000");
        let b = table.product("Flatbed 9000");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.product_count(), 1);
    }

    #[test]
    fn test_lookup_does_not_create_entry() {
        let table = CapabilityCacheTable::new();
        assert!(table.lookup("nobody", CapabilityId(1)).is_none());
        assert_eq!(table.product_count(), 0);
    }

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let table = CapabilityCacheTable::new();
        let product = table.product("p");
        let first = CapabilityInfo::with_details(CapabilityId(0x0150), CapabilityDetails::default());
        product.insert_if_absent(first.clone());
        let stored = product.insert_if_absent(CapabilityInfo::bare(CapabilityId(0x0150)));
        assert!(stored.details_gathered);
        assert_eq!(product.len(), 1);
    }

    #[test]
    fn test_complete_details_only_once() {
        let table = CapabilityCacheTable::new();
        let product = table.product("p");
        product.insert_if_absent(CapabilityInfo::bare(CapabilityId(7)));
        assert!(product.complete_details(CapabilityId(7), CapabilityDetails::default()));
        assert!(!product.complete_details(CapabilityId(7), CapabilityDetails::default()));
        assert!(!product.complete_details(CapabilityId(8), CapabilityDetails::default()));
    }

    #[test]
    fn test_concurrent_inserts_across_threads() {
        let table = Arc::new(CapabilityCacheTable::new());
        let handles: Vec<_> = (0..8u16)
            .map(|n| {
                let table = table.clone();
                thread::spawn(move || {
                    let product = table.product("shared");
                    for id in 0..50u16 {
                        product.insert_if_absent(CapabilityInfo::bare(CapabilityId(id * 8 + n % 8)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.product_count(), 1);
        assert_eq!(table.product("shared").len(), 400);
    }
}
