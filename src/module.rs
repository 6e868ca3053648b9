//! Module / ExternalModule data records (§3) and their arena.

use std::collections::HashMap;

use crate::ast::ParsedModule;
use crate::id::ModuleId;

/// A 10-byte entry-point reachability fingerprint (§4.5).
pub type EntryPointsHash = [u8; 10];

pub const ZERO_HASH: EntryPointsHash = [0u8; 10];

/// What a raw import specifier resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    pub id: ModuleId,
    pub external: bool,
}

/// `{name, source, start}` — where a local name was bound by an import. The
/// source is the raw specifier; it is resolved to a concrete module id via
/// `Module::resolved_ids` once the loader has fetched dependencies.
#[derive(Debug, Clone)]
pub struct ImportDescription {
    pub imported_name: String,
    pub source: String,
    pub start: usize,
}

/// A binding this module exports, and which module id actually owns it
/// (itself, unless the export is transitively re-exported through a chain).
#[derive(Debug, Clone)]
pub struct ExportBinding {
    pub owner: ModuleId,
    pub local_name: String,
}

#[derive(Debug, Clone)]
pub struct DynamicImport {
    pub expression: String,
    pub alias: Option<String>,
    pub resolution: Option<ResolvedId>,
}

/// An internal, loaded module.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    pub original_code: String,
    pub parsed: ParsedModule,

    /// Raw import specifiers as written in source, in declaration order.
    pub sources: Vec<String>,
    pub resolved_ids: HashMap<String, ResolvedId>,
    pub import_descriptions: HashMap<String, ImportDescription>,

    /// Names this module exports directly (`export const x = ...`).
    pub exports: Vec<String>,
    /// `export { a as b } from './c'` style re-exports.
    pub reexports: Vec<crate::ast::ReexportSite>,
    pub export_all_sources: Vec<String>,
    /// Populated by the loader: every name reachable via `export *`,
    /// resolved down to the module that actually owns it.
    pub exports_all: HashMap<String, ModuleId>,

    pub dynamic_imports: Vec<DynamicImport>,

    pub is_entry_point: bool,
    pub is_executed: bool,
    pub chunk_alias: Option<String>,
    /// Set by the chunker's colouring pass when this module was assigned to
    /// a caller-declared manual chunk, distinct from `chunk_alias` (which an
    /// entry module also carries purely for output naming).
    pub in_manual_chunk: bool,
    pub entry_points_hash: EntryPointsHash,

    /// Assigned by the execution analyzer; `usize::MAX` until then.
    pub exec_order: usize,

    /// Linked exports after `bindReferences`: name -> concrete binding.
    pub linked_exports: HashMap<String, ExportBinding>,
    /// Linked imports after `bindReferences`: local name -> concrete binding.
    pub linked_imports: HashMap<String, ExportBinding>,
    pub namespace_referenced: bool,

    /// Whether this was re-emitted verbatim from the persistent cache.
    pub from_cache: bool,
}

impl Module {
    pub fn new(id: ModuleId, original_code: String, parsed: ParsedModule) -> Self {
        let sources: Vec<String> = {
            let mut seen = Vec::new();
            for site in &parsed.imports {
                if !seen.contains(&site.source) {
                    seen.push(site.source.clone());
                }
            }
            for site in &parsed.reexports {
                if !seen.contains(&site.source) {
                    seen.push(site.source.clone());
                }
            }
            for source in &parsed.export_all_sources {
                if !seen.contains(source) {
                    seen.push(source.clone());
                }
            }
            seen
        };
        let exports = parsed.exports.iter().map(|e| e.exported_as.clone()).collect();
        let reexports = parsed.reexports.clone();
        let export_all_sources = parsed.export_all_sources.clone();
        let import_descriptions = parsed
            .imports
            .iter()
            .map(|site| {
                (
                    site.local.clone(),
                    ImportDescription {
                        imported_name: site.imported.clone(),
                        source: site.source.clone(),
                        start: site.start,
                    },
                )
            })
            .collect();

        Self {
            id,
            original_code,
            parsed,
            sources,
            resolved_ids: HashMap::new(),
            import_descriptions,
            exports,
            reexports,
            export_all_sources,
            exports_all: HashMap::new(),
            dynamic_imports: Vec::new(),
            is_entry_point: false,
            is_executed: false,
            chunk_alias: None,
            in_manual_chunk: false,
            entry_points_hash: ZERO_HASH,
            exec_order: usize::MAX,
            linked_exports: HashMap::new(),
            linked_imports: HashMap::new(),
            namespace_referenced: false,
            from_cache: false,
        }
    }

    /// Does this module define (not merely re-export) `name`?
    pub fn find_own_export_statement(&self, name: &str) -> Option<usize> {
        self.parsed.statement_for_export(name)
    }

    pub fn include_all_exports(&mut self) {
        self.namespace_referenced = true;
        for site in self.parsed.exports.clone() {
            self.parsed.statements[site.statement].included = true;
        }
    }

    pub fn include_all_in_bundle(&mut self) {
        for statement in &mut self.parsed.statements {
            statement.included = true;
        }
    }

    /// Mark every side-effecting top-level statement as included. Runs
    /// unconditionally for executed modules, tree-shaking or not.
    pub fn include_side_effects(&mut self) -> bool {
        let mut changed = false;
        for statement in &mut self.parsed.statements {
            if statement.side_effect && !statement.included {
                statement.included = true;
                changed = true;
            }
        }
        changed
    }
}

/// An external module: its contents are never loaded, only referenced.
#[derive(Debug, Clone)]
pub struct ExternalModule {
    pub id: ModuleId,
    pub exports_namespace: bool,
    pub used_imports: Vec<String>,
    pub is_entry_point: bool,
    pub chunk_alias: Option<String>,
}

impl ExternalModule {
    pub fn new(id: ModuleId) -> Self {
        Self { id, exports_namespace: false, used_imports: Vec::new(), is_entry_point: false, chunk_alias: None }
    }

    pub fn mark_used(&mut self, name: &str) {
        if !self.used_imports.iter().any(|n| n == name) {
            self.used_imports.push(name.to_string());
        }
    }
}

/// Tagged union over the two module kinds `modulesById` may hold (§9: "Use a
/// tagged variant").
#[derive(Debug, Clone)]
pub enum ModuleOrExternal {
    Normal(Module),
    External(ExternalModule),
}

impl ModuleOrExternal {
    pub fn id(&self) -> &ModuleId {
        match self {
            ModuleOrExternal::Normal(m) => &m.id,
            ModuleOrExternal::External(e) => &e.id,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ModuleOrExternal::External(_))
    }

    pub fn as_normal(&self) -> Option<&Module> {
        match self {
            ModuleOrExternal::Normal(m) => Some(m),
            ModuleOrExternal::External(_) => None,
        }
    }

    pub fn as_normal_mut(&mut self) -> Option<&mut Module> {
        match self {
            ModuleOrExternal::Normal(m) => Some(m),
            ModuleOrExternal::External(_) => None,
        }
    }

    pub fn as_external(&self) -> Option<&ExternalModule> {
        match self {
            ModuleOrExternal::External(e) => Some(e),
            ModuleOrExternal::Normal(_) => None,
        }
    }

    pub fn as_external_mut(&mut self) -> Option<&mut ExternalModule> {
        match self {
            ModuleOrExternal::External(e) => Some(e),
            ModuleOrExternal::Normal(_) => None,
        }
    }

    pub fn set_entry_point(&mut self, value: bool) {
        match self {
            ModuleOrExternal::Normal(m) => m.is_entry_point = value,
            ModuleOrExternal::External(e) => e.is_entry_point = value,
        }
    }

    pub fn chunk_alias(&self) -> Option<&str> {
        match self {
            ModuleOrExternal::Normal(m) => m.chunk_alias.as_deref(),
            ModuleOrExternal::External(e) => e.chunk_alias.as_deref(),
        }
    }

    pub fn set_chunk_alias(&mut self, alias: Option<String>) {
        match self {
            ModuleOrExternal::Normal(m) => m.chunk_alias = alias,
            ModuleOrExternal::External(e) => e.chunk_alias = alias,
        }
    }
}
