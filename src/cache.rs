//! The in-memory persistent cache format (§6, §4.7).
//!
//! Serializing this to disk, and deciding when to invalidate it against the
//! filesystem, is a host/CLI concern and out of scope here; the crate only
//! defines the shape and the reuse rule (`originalCode` matches byte-for-byte
//! and no `customTransformCache` marker).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ast::ParsedModule;

/// A cached, already-transformed module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCacheEntry {
    pub id: String,
    pub original_code: String,
    /// When true, this module opted out of caching (e.g. a plugin attached
    /// state that can't be safely serialized) and must always re-transform.
    pub custom_transform_cache: bool,
    /// Transform assets (e.g. emitted side files) to re-emit verbatim on
    /// cache hit, keyed by asset name.
    pub transform_assets: HashMap<String, Vec<u8>>,
    #[serde(skip)]
    pub parsed: Option<ParsedModule>,
}

/// `{key -> [accessCount, value]}` for one plugin's cache namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginCacheNamespace {
    pub entries: HashMap<String, (u32, serde_json::Value)>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildCache {
    pub modules: HashMap<String, ModuleCacheEntry>,
    pub plugins: HashMap<String, PluginCacheNamespace>,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: &str, original_code: &str) -> Option<&ModuleCacheEntry> {
        self.modules.get(id).filter(|entry| {
            !entry.custom_transform_cache && entry.original_code == original_code && entry.parsed.is_some()
        })
    }

    pub fn store(&mut self, entry: ModuleCacheEntry) {
        self.modules.insert(entry.id.clone(), entry);
    }

    /// Touch a plugin cache key, bumping its access counter, ahead of the
    /// end-of-build eviction sweep (§5 "Shared resources").
    pub fn touch_plugin_entry(&mut self, plugin: &str, key: &str, value: serde_json::Value) {
        let ns = self.plugins.entry(plugin.to_string()).or_default();
        let entry = ns.entries.entry(key.to_string()).or_insert((0, value.clone()));
        entry.0 += 1;
        entry.1 = value;
    }

    /// Evict plugin cache entries that went untouched this build (counter
    /// reached `cache_expiry` after pre-increment), and drop any plugin
    /// namespace left empty.
    pub fn evict_stale(&mut self, cache_expiry: u32, touched: &HashMap<(String, String), ()>) {
        for (plugin, ns) in self.plugins.iter_mut() {
            ns.entries.retain(|key, (count, _)| {
                let was_touched = touched.contains_key(&(plugin.clone(), key.clone()));
                if !was_touched {
                    *count += 1;
                }
                *count < cache_expiry
            });
        }
        self.plugins.retain(|_, ns| !ns.entries.is_empty());
    }
}
