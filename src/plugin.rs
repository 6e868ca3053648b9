//! The plugin driver: the only external collaborator the loader talks to.
//!
//! Hook signatures mirror §6. Only `resolveId`/`load`/`transform`/
//! `resolveDynamicImport`/`watchChange` are modeled; everything else a real
//! plugin system would offer (build-start/end, output generation hooks, ...)
//! is out of scope for the Graph core.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::ParsedModule;

/// What `resolveId` returned for a given specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveIdResult {
    /// `false`: a hard external with no further resolution.
    HardExternal,
    /// A plain string id; externality is still decided by the external
    /// predicate in the loader.
    Id(String),
    /// An object result used verbatim.
    Resolved { id: String, external: bool },
    /// `null`/`undefined`: fall through to the loader's default rule.
    NotResolved,
}

/// What `load` returned for a resolved id.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub code: String,
}

/// What `resolveDynamicImport` returned for a dynamic import expression.
#[derive(Debug, Clone)]
pub enum DynamicImportResolution {
    /// `null`/`undefined`: leave the site unresolved.
    Unresolved,
    /// A string target, to be fetched/resolved like a static import.
    Id(String),
    /// A pre-parsed AST fragment attached directly, bypassing resolution.
    Inline(ParsedModule),
}

/// A single plugin's hook implementations. A plugin need not implement every
/// hook; the default (`Ok(None)`-shaped) return lets the driver fall through
/// to the next plugin, matching rollup's "first non-null result wins".
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve_id(
        &self,
        _source: &str,
        _importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveIdResult>> {
        Ok(None)
    }

    async fn load(&self, _id: &str) -> anyhow::Result<Option<LoadResult>> {
        Ok(None)
    }

    async fn transform(&self, id: &str, code: &str) -> anyhow::Result<ParsedModule> {
        crate::ast::parse_module(id, code)
    }

    async fn resolve_dynamic_import(
        &self,
        _expression: &str,
        _importer: &str,
    ) -> anyhow::Result<Option<DynamicImportResolution>> {
        Ok(None)
    }

    fn watch_change(&self, _id: &str) {}
}

/// First-wins dispatcher over an ordered list of plugins.
#[derive(Clone, Default)]
pub struct PluginDriver {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginDriver {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub async fn resolve_id(
        &self,
        source: &str,
        importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolveIdResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.resolve_id(source, importer).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub async fn load(&self, id: &str) -> anyhow::Result<Option<LoadResult>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.load(id).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// `transform` always runs: the first plugin able to produce a parsed
    /// module wins. A driver with no plugins falls back to the crate's own
    /// reference parser so the loader always has something to link against.
    pub async fn transform(&self, id: &str, code: &str) -> anyhow::Result<ParsedModule> {
        for plugin in &self.plugins {
            return plugin.transform(id, code).await;
        }
        crate::ast::parse_module(id, code)
    }

    pub async fn resolve_dynamic_import(
        &self,
        expression: &str,
        importer: &str,
    ) -> anyhow::Result<Option<DynamicImportResolution>> {
        for plugin in &self.plugins {
            if let Some(result) = plugin.resolve_dynamic_import(expression, importer).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub fn watch_change(&self, id: &str) {
        for plugin in &self.plugins {
            plugin.watch_change(id);
        }
    }
}
