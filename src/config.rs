//! Build configuration recognized by the Graph core (§6).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Warning;

/// `input`: a single entry, an array of entries, or an alias map.
#[derive(Debug, Clone)]
pub enum InputSpec {
    Single(String),
    Many(Vec<String>),
    Aliased(Vec<(String, String)>),
}

impl InputSpec {
    /// Normalize into `(alias, specifier)` pairs, synthesizing aliases from
    /// the specifier's basename when none was given.
    pub fn into_entries(self) -> Vec<(Option<String>, String)> {
        match self {
            InputSpec::Single(s) => vec![(None, s)],
            InputSpec::Many(many) => many.into_iter().map(|s| (None, s)).collect(),
            InputSpec::Aliased(pairs) => pairs.into_iter().map(|(alias, s)| (Some(alias), s)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeshakeOptions {
    pub annotations: bool,
    pub property_read_side_effects: bool,
    pub pure_external_modules: bool,
}

impl Default for TreeshakeOptions {
    fn default() -> Self {
        Self { annotations: true, property_read_side_effects: true, pure_external_modules: false }
    }
}

#[derive(Debug, Clone)]
pub enum Treeshake {
    Disabled,
    Enabled(TreeshakeOptions),
}

impl Default for Treeshake {
    fn default() -> Self {
        Treeshake::Enabled(TreeshakeOptions::default())
    }
}

impl Treeshake {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Treeshake::Enabled(_))
    }
}

/// `external`: either an explicit list of bare specifiers, or a predicate.
#[derive(Clone)]
pub enum ExternalOption {
    List(Vec<String>),
    Predicate(Arc<dyn Fn(&str, Option<&str>, bool) -> bool + Send + Sync>),
    None,
}

impl std::fmt::Debug for ExternalOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalOption::List(list) => f.debug_tuple("List").field(list).finish(),
            ExternalOption::Predicate(_) => f.write_str("Predicate(..)"),
            ExternalOption::None => f.write_str("None"),
        }
    }
}

impl Default for ExternalOption {
    fn default() -> Self {
        ExternalOption::None
    }
}

impl ExternalOption {
    pub fn is_external(&self, source: &str, importer: Option<&str>, is_resolved: bool) -> bool {
        match self {
            ExternalOption::List(list) => list.iter().any(|s| s == source),
            ExternalOption::Predicate(f) => f(source, importer, is_resolved),
            ExternalOption::None => false,
        }
    }
}

pub type OnWarn = Arc<dyn Fn(Warning) + Send + Sync>;

#[derive(Clone)]
pub struct BuildOptions {
    pub input: InputSpec,
    pub external: ExternalOption,
    pub treeshake: Treeshake,
    pub preserve_modules: bool,
    pub inline_dynamic_imports: bool,
    pub context: String,
    pub module_context: HashMap<String, String>,
    pub shim_missing_exports: bool,
    pub experimental_top_level_await: bool,
    pub on_warn: OnWarn,
    pub experimental_cache_expiry: u32,
}

impl std::fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOptions")
            .field("input", &self.input)
            .field("external", &self.external)
            .field("treeshake", &self.treeshake)
            .field("preserve_modules", &self.preserve_modules)
            .field("inline_dynamic_imports", &self.inline_dynamic_imports)
            .field("context", &self.context)
            .field("shim_missing_exports", &self.shim_missing_exports)
            .field("experimental_top_level_await", &self.experimental_top_level_await)
            .field("experimental_cache_expiry", &self.experimental_cache_expiry)
            .finish()
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            input: InputSpec::Many(Vec::new()),
            external: ExternalOption::default(),
            treeshake: Treeshake::default(),
            preserve_modules: false,
            inline_dynamic_imports: false,
            context: "undefined".to_string(),
            module_context: HashMap::new(),
            shim_missing_exports: false,
            experimental_top_level_await: false,
            on_warn: Arc::new(|warning| tracing::warn!(%warning, code = warning.kind.code(), "build warning")),
            experimental_cache_expiry: 10,
        }
    }
}

pub type ManualChunks = HashMap<String, Vec<String>>;
