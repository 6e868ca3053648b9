//! Module graph core for a JavaScript/TypeScript bundler.
//!
//! Given a set of entry points, this crate resolves and fetches a module
//! graph, links imports to exports, tree-shakes it to a fixpoint, and
//! partitions what survives into output chunks. It does not parse full
//! source files for production use, generate code, or touch the filesystem —
//! those are host/plugin concerns (see [`plugin`]).

pub mod ast;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod graph;
pub mod id;
pub mod linker;
pub mod loader;
pub mod module;
pub mod order;
pub mod plugin;
pub mod treeshake;

pub use cache::BuildCache;
pub use chunk::Chunk;
pub use config::{BuildOptions, ExternalOption, InputSpec, ManualChunks, Treeshake, TreeshakeOptions};
pub use error::{BuildError, BuildResult, Warning, WarningKind};
pub use graph::{BuildOutput, Graph};
pub use id::ModuleId;
pub use module::{ExternalModule, Module, ModuleOrExternal};
pub use plugin::{DynamicImportResolution, LoadResult, Plugin, PluginDriver, ResolveIdResult};
