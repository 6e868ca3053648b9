//! The Graph facade (§3, §9): orchestrates discovery, linking, marking and
//! chunk generation, and enforces single-use.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::BuildCache;
use crate::chunk::{self, Chunk};
use crate::config::{BuildOptions, ManualChunks};
use crate::error::{BuildError, BuildResult, Warning};
use crate::linker;
use crate::loader::ModuleLoader;
use crate::order;
use crate::plugin::{Plugin, PluginDriver};
use crate::treeshake;

fn unwrap_arc_error(err: Arc<BuildError>) -> BuildError {
    match Arc::try_unwrap(err) {
        Ok(inner) => inner,
        Err(still_shared) => BuildError::Plugin(anyhow::anyhow!(still_shared.to_string())),
    }
}

pub struct BuildOutput {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<Warning>,
    pub cache: BuildCache,
}

/// Single-use module graph builder (§9 "Single-assignment Graph"):
/// `build` consumes `self`, so a finished Graph cannot be rebuilt.
pub struct Graph {
    loader: Arc<ModuleLoader>,
    options: Arc<BuildOptions>,
    manual_chunks: ManualChunks,
}

impl Graph {
    pub fn new(options: BuildOptions, plugins: Vec<Arc<dyn Plugin>>, manual_chunks: ManualChunks, cache: BuildCache) -> Self {
        let options = Arc::new(options);
        let driver = PluginDriver::new(plugins);
        let loader = ModuleLoader::new(driver, options.clone(), cache);
        Self { loader, options, manual_chunks }
    }

    pub async fn build(self) -> BuildResult<BuildOutput> {
        let unresolved = self.options.input.clone().into_entries();
        let entry_result = self.loader.add_entry_modules(unresolved).await.map_err(unwrap_arc_error)?;

        let manual_result = if self.manual_chunks.is_empty() {
            HashMap::new()
        } else {
            self.loader.add_manual_chunks(self.manual_chunks.clone()).await.map_err(unwrap_arc_error)?
        };

        let mut store = self.loader.take_store().await;
        let cache = self.loader.take_cache().await;

        linker::link_dependencies(&mut store);
        let link_warnings = linker::bind_references(&mut store, self.options.shim_missing_exports);

        let entry_indices: Vec<usize> =
            entry_result.entry_modules.iter().filter_map(|e| store.by_id.get(&e.id).copied()).collect();
        let order_result = order::compute_execution_order(&mut store, &entry_indices);

        treeshake::shake(&mut store, &order_result.order, &entry_indices, self.options.treeshake.is_enabled());

        let mut warnings = Vec::new();
        warnings.extend(link_warnings);
        warnings.extend(order_result.warnings);

        let chunks = if self.options.inline_dynamic_imports {
            chunk::inline_dynamic_imports(&store, &order_result.order, &entry_result.entry_modules)?
        } else if self.options.preserve_modules {
            chunk::preserve_modules(&store, &order_result.order)
        } else {
            let seed_entries: Vec<(usize, String)> = entry_result
                .entry_modules
                .iter()
                .filter_map(|e| store.by_id.get(&e.id).map(|&idx| (idx, e.id.to_string())))
                .collect();
            chunk::colour_modules(&mut store, &seed_entries, &manual_result);
            chunk::assign_entry_aliases(&mut store, &entry_result.entry_modules);
            let mut chunks = chunk::partition(&store, &order_result.order);
            chunk::synthesize_facades(&store, &mut chunks, &entry_result.entry_modules);
            chunk::link_chunks(&store, &mut chunks);
            chunk::drop_dead_chunks(chunks)
        };

        for warning in &warnings {
            (self.options.on_warn)(warning.clone());
        }

        // §5 "Shared resources": sweep plugin cache entries this build never touched
        // before handing the cache back to the caller for the next build.
        let touched = self.loader.take_touched();
        let mut cache = cache;
        cache.evict_stale(self.options.experimental_cache_expiry, &touched);

        Ok(BuildOutput { chunks, warnings, cache })
    }
}
