//! Named log-interest filters and the registry the sync loop reads from.
//!
//! A filter declares which addresses and event signatures a consumer cares
//! about. The registry's effective query set for a poll cycle is the union
//! across all registered filters — an address covered by no filter is never
//! indexed, which bounds storage to declared interest.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PollerError;
use crate::types::{Address, Hash};

// ─── Filter ──────────────────────────────────────────────────────────────────

/// A named declaration of interest in logs from given addresses and/or
/// event signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Unique key; registering under an existing name overwrites it.
    pub name: String,
    /// Emitting addresses of interest (empty = any address).
    pub addresses: BTreeSet<Address>,
    /// Event signatures of interest (empty = any event).
    pub event_sigs: BTreeSet<Hash>,
    /// How long matched records must be kept; `None` = keep forever.
    pub retention: Option<Duration>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: BTreeSet::new(),
            event_sigs: BTreeSet::new(),
            retention: None,
        }
    }

    /// Add an address of interest.
    pub fn address(mut self, addr: Address) -> Self {
        self.addresses.insert(addr);
        self
    }

    /// Add an event signature of interest.
    pub fn event_sig(mut self, sig: Hash) -> Self {
        self.event_sigs.insert(sig);
        self
    }

    /// Set a finite retention window.
    pub fn retention(mut self, window: Duration) -> Self {
        self.retention = Some(window);
        self
    }

    /// Returns `true` if a log from `address` with signature `sig` is of
    /// interest to this filter. An empty address (resp. signature) set
    /// matches everything on that axis.
    pub fn matches(&self, address: &Address, sig: &Hash) -> bool {
        (self.addresses.is_empty() || self.addresses.contains(address))
            && (self.event_sigs.is_empty() || self.event_sigs.contains(sig))
    }

    fn validate(&self) -> Result<(), PollerError> {
        if self.name.is_empty() {
            return Err(PollerError::InvalidFilter("name must not be empty".into()));
        }
        if self.addresses.is_empty() && self.event_sigs.is_empty() {
            return Err(PollerError::InvalidFilter(format!(
                "filter {:?} needs at least one address or event signature",
                self.name
            )));
        }
        Ok(())
    }
}

// ─── FilterSet ───────────────────────────────────────────────────────────────

/// A point-in-time snapshot of all registered filters.
///
/// Taken once per poll cycle; concurrent registrations take effect with the
/// next cycle's snapshot, never retroactively.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Union of all filters' addresses, sorted and deduplicated.
    pub fn addresses(&self) -> Vec<Address> {
        let set: BTreeSet<Address> = self
            .filters
            .iter()
            .flat_map(|f| f.addresses.iter().copied())
            .collect();
        set.into_iter().collect()
    }

    /// Union of all filters' event signatures, sorted and deduplicated.
    pub fn event_sigs(&self) -> Vec<Hash> {
        let set: BTreeSet<Hash> = self
            .filters
            .iter()
            .flat_map(|f| f.event_sigs.iter().copied())
            .collect();
        set.into_iter().collect()
    }

    /// Returns `true` if any registered filter matches the log.
    pub fn matches(&self, address: &Address, sig: &Hash) -> bool {
        self.filters.iter().any(|f| f.matches(address, sig))
    }

    /// The widest retention window across filters, or `None` when pruning is
    /// not allowed (no filters, or at least one filter keeps logs forever).
    pub fn max_retention(&self) -> Option<Duration> {
        if self.filters.is_empty() {
            return None;
        }
        let mut max = Duration::ZERO;
        for f in &self.filters {
            match f.retention {
                Some(window) => max = max.max(window),
                None => return None,
            }
        }
        Some(max)
    }
}

// ─── FilterRegistry ──────────────────────────────────────────────────────────

/// Holds the set of named filters. Read-mostly: the sync loop snapshots it
/// every cycle, registration is occasional.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: RwLock<HashMap<String, Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (upsert) a filter. Replaces any filter with the same name.
    pub fn register(&self, filter: Filter) -> Result<(), PollerError> {
        filter.validate()?;
        let name = filter.name.clone();
        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        let replaced = filters.insert(name.clone(), filter).is_some();
        tracing::debug!(%name, replaced, "filter registered");
        Ok(())
    }

    /// Remove a filter by name. Errors with `FilterNotFound` if absent.
    pub fn unregister(&self, name: &str) -> Result<(), PollerError> {
        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        if filters.remove(name).is_none() {
            return Err(PollerError::FilterNotFound(name.to_string()));
        }
        tracing::debug!(name, "filter unregistered");
        Ok(())
    }

    /// Consistent point-in-time copy of all filters, ordered by name.
    pub fn snapshot(&self) -> FilterSet {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Filter> = filters.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        FilterSet { filters: list }
    }

    pub fn len(&self) -> usize {
        self.filters.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(v: u64) -> Address {
        Address::from_u64(v)
    }

    fn sig(v: u64) -> Hash {
        Hash::from_u64(v)
    }

    #[test]
    fn register_validates() {
        let reg = FilterRegistry::new();
        let empty_name = Filter::new("").address(addr(1));
        assert!(matches!(
            reg.register(empty_name),
            Err(PollerError::InvalidFilter(_))
        ));

        let no_interest = Filter::new("f");
        assert!(matches!(
            reg.register(no_interest),
            Err(PollerError::InvalidFilter(_))
        ));

        reg.register(Filter::new("f").address(addr(1))).unwrap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_is_upsert() {
        let reg = FilterRegistry::new();
        reg.register(Filter::new("f").address(addr(1))).unwrap();
        reg.register(Filter::new("f").address(addr(2))).unwrap();

        let snap = reg.snapshot();
        assert_eq!(snap.filters().len(), 1);
        // Overwrite, not additive: only the second address remains.
        assert_eq!(snap.addresses(), vec![addr(2)]);
    }

    #[test]
    fn unregister_unknown_errors() {
        let reg = FilterRegistry::new();
        assert!(matches!(
            reg.unregister("ghost"),
            Err(PollerError::FilterNotFound(_))
        ));

        reg.register(Filter::new("f").event_sig(sig(1))).unwrap();
        reg.unregister("f").unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_is_ordered_union() {
        let reg = FilterRegistry::new();
        reg.register(Filter::new("b").address(addr(2)).event_sig(sig(9)))
            .unwrap();
        reg.register(Filter::new("a").address(addr(1)).event_sig(sig(9)))
            .unwrap();

        let snap = reg.snapshot();
        let names: Vec<&str> = snap.filters().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(snap.addresses(), vec![addr(1), addr(2)]);
        assert_eq!(snap.event_sigs(), vec![sig(9)]); // deduplicated
    }

    #[test]
    fn snapshot_isolated_from_later_writes() {
        let reg = FilterRegistry::new();
        reg.register(Filter::new("f").address(addr(1))).unwrap();
        let snap = reg.snapshot();
        reg.register(Filter::new("g").address(addr(2))).unwrap();
        assert_eq!(snap.filters().len(), 1);
    }

    #[test]
    fn filter_match_semantics() {
        let f = Filter::new("f").address(addr(1)).event_sig(sig(7));
        assert!(f.matches(&addr(1), &sig(7)));
        assert!(!f.matches(&addr(1), &sig(8)));
        assert!(!f.matches(&addr(2), &sig(7)));

        // Address-only filter matches any signature from that address.
        let addr_only = Filter::new("a").address(addr(1));
        assert!(addr_only.matches(&addr(1), &sig(42)));
        assert!(!addr_only.matches(&addr(2), &sig(42)));
    }

    #[test]
    fn max_retention_rules() {
        let reg = FilterRegistry::new();
        assert_eq!(reg.snapshot().max_retention(), None); // empty → no pruning

        reg.register(
            Filter::new("short")
                .address(addr(1))
                .retention(Duration::from_secs(60)),
        )
        .unwrap();
        reg.register(
            Filter::new("long")
                .address(addr(2))
                .retention(Duration::from_secs(3600)),
        )
        .unwrap();
        assert_eq!(
            reg.snapshot().max_retention(),
            Some(Duration::from_secs(3600))
        );

        // One unbounded filter disables pruning entirely.
        reg.register(Filter::new("forever").address(addr(3))).unwrap();
        assert_eq!(reg.snapshot().max_retention(), None);
    }
}
