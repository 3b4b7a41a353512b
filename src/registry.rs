// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Allow-list of (source, counter) pairs to collect.
//!
//! The registry is built once from configuration and is read-only afterwards,
//! so it is shared between threads behind a plain `Arc` with no locking.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::CollectionRequest;

/// Identifies one tracked metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey {
    pub source_name: String,
    pub counter_name: String,
}

impl CounterKey {
    pub fn new(source_name: impl Into<String>, counter_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            counter_name: counter_name.into(),
        }
    }

    /// Outward metric name: `source|counter`.
    pub fn metric_name(&self) -> String {
        format!("{}|{}", self.source_name, self.counter_name)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.source_name, self.counter_name)
    }
}

impl From<&CollectionRequest> for CounterKey {
    fn from(request: &CollectionRequest) -> Self {
        Self::new(request.source_name.clone(), request.counter_name.clone())
    }
}

/// Set of configured collection requests, indexed by source.
#[derive(Debug, Default, Clone)]
pub struct CounterRegistry {
    /// source name -> counter names
    sources: HashMap<String, HashSet<String>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured requests.
    pub fn from_requests<'a>(requests: impl IntoIterator<Item = &'a CollectionRequest>) -> Self {
        let mut registry = Self::new();
        for request in requests {
            registry.add(request);
        }
        registry
    }

    /// Insert a request. Duplicates are no-ops; malformed entries are
    /// accepted but never indexed, so they never match.
    pub fn add(&mut self, request: &CollectionRequest) {
        if !request.is_well_formed() {
            return;
        }
        self.sources
            .entry(request.source_name.clone())
            .or_default()
            .insert(request.counter_name.clone());
    }

    /// Whether `(source_name, counter_name)` is configured.
    pub fn matches(&self, source_name: &str, counter_name: &str) -> bool {
        self.sources
            .get(source_name)
            .map_or(false, |counters| counters.contains(counter_name))
    }

    /// Whether any configured counter belongs to `source_name`.
    pub fn references_source(&self, source_name: &str) -> bool {
        self.sources.contains_key(source_name)
    }

    /// All source names referenced by at least one request.
    pub fn sources_referenced(&self) -> HashSet<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Configured counter names for one source, sorted.
    pub fn counters_for(&self, source_name: &str) -> Vec<&str> {
        let mut counters: Vec<&str> = self
            .sources
            .get(source_name)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default();
        counters.sort_unstable();
        counters
    }

    /// Every configured key, sorted for a stable flush order.
    pub fn keys(&self) -> Vec<CounterKey> {
        let mut keys: Vec<CounterKey> = self
            .sources
            .iter()
            .flat_map(|(source, counters)| {
                counters
                    .iter()
                    .map(move |counter| CounterKey::new(source.clone(), counter.clone()))
            })
            .collect();
        keys.sort();
        keys
    }

    /// Number of distinct configured keys
    pub fn len(&self) -> usize {
        self.sources.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
