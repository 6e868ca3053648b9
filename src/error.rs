//! Typed build errors and warnings (§6 error codes, §7 severities).

use std::fmt;

use crate::id::ModuleId;

/// Fatal errors abort `Graph::build`. Each variant carries the `code` a
/// caller-facing diagnostic would key off of (§6's error-code table).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Could not resolve entry module \"{specifier}\"")]
    UnresolvedEntry { specifier: String },

    #[error("Could not resolve \"{specifier}\" from \"{importer}\"")]
    UnresolvedImport { specifier: String, importer: ModuleId },

    #[error("Could not load {id}{}", importer.as_ref().map(|i| format!(" (imported by {i})")).unwrap_or_default())]
    BadLoader {
        id: ModuleId,
        importer: Option<ModuleId>,
        #[source]
        source: anyhow::Error,
    },

    #[error("load hook returned a value that is neither a string nor {{code: string}} for {id}")]
    BadLoaderReturn { id: ModuleId },

    #[error("Duplicate entry point \"{specifier}\" (resolves to the module already named \"{existing}\")")]
    DuplicateEntryPoints { specifier: String, existing: ModuleId },

    #[error("\"{id}\" is already present in the graph as a different module kind")]
    InvalidExternalId { id: ModuleId },

    #[error("inlineDynamicImports requires exactly one entry point, got {count}")]
    MultipleEntriesWithInlineDynamicImports { count: usize },

    #[error("fetchModule called for external module \"{id}\"")]
    FetchedExternalAsInternal { id: ModuleId },

    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}

impl BuildError {
    /// The stable, user-visible error code from §6.
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::UnresolvedEntry { .. } => "UNRESOLVED_ENTRY",
            BuildError::UnresolvedImport { .. } => "UNRESOLVED_IMPORT",
            BuildError::BadLoader { .. } | BuildError::BadLoaderReturn { .. } => "BAD_LOADER",
            BuildError::DuplicateEntryPoints { .. } => "DUPLICATE_ENTRY_POINTS",
            BuildError::InvalidExternalId { .. } => "INVALID_EXTERNAL_ID",
            BuildError::MultipleEntriesWithInlineDynamicImports { .. } => "INVALID_OPTION",
            BuildError::FetchedExternalAsInternal { .. } => "INTERNAL",
            BuildError::Plugin(_) => "PLUGIN_ERROR",
        }
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

/// A source position a warning can be anchored to. Optional because not every
/// warning (e.g. a cache-eviction note) comes from a specific AST location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loc {
    pub file: Option<ModuleId>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    CircularDependency { cycle: Vec<ModuleId> },
    NonExistentExport { exported_name: String, module: ModuleId },
    NamespaceConflict { name: String, candidates: Vec<ModuleId> },
    ShimmedExport { exported_name: String, module: ModuleId },
    UnresolvedImport { specifier: String, importer: ModuleId },
    AmbiguousExternalNamespace { name: String, module: ModuleId, used: ModuleId, others: Vec<ModuleId> },
}

impl WarningKind {
    pub fn code(&self) -> &'static str {
        match self {
            WarningKind::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            WarningKind::NonExistentExport { .. } => "NON_EXISTENT_EXPORT",
            WarningKind::NamespaceConflict { .. } => "NAMESPACE_CONFLICT",
            WarningKind::ShimmedExport { .. } => "SHIMMED_EXPORT",
            WarningKind::UnresolvedImport { .. } => "UNRESOLVED_IMPORT",
            WarningKind::AmbiguousExternalNamespace { .. } => "AMBIGUOUS_EXTERNAL_NAMESPACE",
        }
    }

    fn message(&self) -> String {
        match self {
            WarningKind::CircularDependency { cycle } => {
                format!("Circular dependency: {}", cycle.iter().map(|m| m.as_ref()).collect::<Vec<_>>().join(" -> "))
            }
            WarningKind::NonExistentExport { exported_name, module } => {
                format!("\"{exported_name}\" is not exported by \"{module}\"")
            }
            WarningKind::NamespaceConflict { name, candidates } => {
                format!(
                    "Conflicting namespace export \"{name}\" from {}",
                    candidates.iter().map(|m| m.as_ref()).collect::<Vec<_>>().join(", ")
                )
            }
            WarningKind::ShimmedExport { exported_name, module } => {
                format!("\"{exported_name}\" was shimmed with `undefined` in \"{module}\"")
            }
            WarningKind::UnresolvedImport { specifier, importer } => {
                format!("\"{specifier}\" imported by \"{importer}\" could not be resolved; treating as external")
            }
            WarningKind::AmbiguousExternalNamespace { name, module, used, others } => {
                format!(
                    "ambiguous re-export \"{name}\" in \"{module}\" resolved to \"{used}\" but could also be {}",
                    others.iter().map(|m| m.as_ref()).collect::<Vec<_>>().join(", ")
                )
            }
        }
    }
}

/// A warning reported via `on_warn`. `to_string` is only computed when
/// actually rendered, mirroring the spec's "lazily-computed toString".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub plugin: Option<String>,
    pub loc: Loc,
}

impl Warning {
    pub fn new(kind: WarningKind) -> Self {
        Self { kind, plugin: None, loc: Loc::default() }
    }

    pub fn at(mut self, loc: Loc) -> Self {
        self.loc = loc;
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(plugin) = &self.plugin {
            write!(f, "({plugin}) ")?;
        }
        if let Some(file) = &self.loc.file {
            write!(f, "{file} ")?;
            if let (Some(line), Some(col)) = (self.loc.line, self.loc.column) {
                write!(f, "({line}:{col}) ")?;
            }
        }
        write!(f, "{}", self.kind.message())
    }
}
