//! Name-resolution cache keyed by a leaf's raw identity
//!
//! Entries are grouped by scope, one scope per scraped endpoint, so that a
//! complete walk of one endpoint only evicts that endpoint's unseen
//! identities. Readers take a snapshot of a scope without locking. Writers
//! build a new map and swap it in, one writer at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use super::engine::Outcome;

type Entries = HashMap<String, Outcome>;
type Scopes = HashMap<String, Arc<Entries>>;

/// Scope used by sessions that are not tied to an endpoint
pub const UNSCOPED: &str = "";

#[derive(Debug)]
pub struct RuleCache {
    scopes: ArcSwap<Scopes>,
    writer: Mutex<()>,
}

impl Default for RuleCache {
    fn default() -> Self {
        Self {
            scopes: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
        }
    }
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time view of every entry of `scope`
    pub fn snapshot(&self, scope: &str) -> Arc<Entries> {
        self.scopes.load().get(scope).cloned().unwrap_or_default()
    }

    pub fn get(&self, scope: &str, raw_identity: &str) -> Option<Outcome> {
        self.scopes
            .load()
            .get(scope)
            .and_then(|entries| entries.get(raw_identity))
            .cloned()
    }

    /// Merge `pending` into `scope`
    ///
    /// With `retain`, entries of `scope` whose identity is not in the set are
    /// evicted in the same swap. Other scopes are untouched.
    pub fn commit(&self, scope: &str, pending: Entries, retain: Option<&HashSet<String>>) {
        if pending.is_empty() && retain.is_none() {
            return;
        }

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.scopes.load();
        let existing = current.get(scope);

        let mut entries: Entries = match (existing, retain) {
            (Some(existing), Some(keep)) => existing
                .iter()
                .filter(|(k, _)| keep.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            (Some(existing), None) => HashMap::clone(existing),
            (None, _) => HashMap::new(),
        };
        entries.extend(pending);

        let mut next = Scopes::clone(&current);
        next.insert(scope.to_string(), Arc::new(entries));
        self.scopes.store(Arc::new(next));
    }

    pub fn clear(&self) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.scopes.store(Arc::new(HashMap::new()));
    }

    /// Entries across every scope
    pub fn len(&self) -> usize {
        self.scopes.load().values().map(|entries| entries.len()).sum()
    }

    pub fn scope_len(&self, scope: &str) -> usize {
        self.scopes.load().get(scope).map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(keys: &[&str]) -> Entries {
        keys.iter()
            .map(|k| (k.to_string(), Outcome::Excluded))
            .collect()
    }

    #[test]
    fn test_commit_merges() {
        let cache = RuleCache::new();
        cache.commit(UNSCOPED, pending(&["a"]), None);
        cache.commit(UNSCOPED, pending(&["b"]), None);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(UNSCOPED, "a").is_some());
    }

    #[test]
    fn test_commit_with_retain_evicts_unseen() {
        let cache = RuleCache::new();
        cache.commit(UNSCOPED, pending(&["a", "b"]), None);

        let keep: HashSet<String> = ["a".to_string()].into();
        cache.commit(UNSCOPED, pending(&["c"]), Some(&keep));

        assert!(cache.get(UNSCOPED, "a").is_some());
        assert!(cache.get(UNSCOPED, "b").is_none());
        assert!(cache.get(UNSCOPED, "c").is_some());
    }

    #[test]
    fn test_eviction_is_scoped() {
        let cache = RuleCache::new();
        cache.commit("pool", pending(&["p1", "p2"]), None);
        cache.commit("default", pending(&["d1"]), None);

        let keep: HashSet<String> = ["d1".to_string()].into();
        cache.commit("default", HashMap::new(), Some(&keep));

        assert_eq!(cache.scope_len("pool"), 2);
        assert_eq!(cache.scope_len("default"), 1);
        assert_eq!(cache.len(), 3);
        assert!(cache.get("default", "p1").is_none());
    }

    #[test]
    fn test_snapshot_is_stable_across_commits() {
        let cache = RuleCache::new();
        cache.commit(UNSCOPED, pending(&["a"]), None);
        let before = cache.snapshot(UNSCOPED);
        cache.commit(UNSCOPED, pending(&["b"]), None);
        assert_eq!(before.len(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear() {
        let cache = RuleCache::new();
        cache.commit(UNSCOPED, pending(&["a"]), None);
        cache.commit("other", pending(&["b"]), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
