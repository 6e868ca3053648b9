//! The Module Loader (§4.1, §5): resolves and fetches the module graph.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use tokio::sync::{oneshot, Mutex};

use crate::ast::ParsedModule;
use crate::cache::{BuildCache, ModuleCacheEntry};
use crate::config::BuildOptions;
use crate::error::{BuildError, Warning, WarningKind};
use crate::id::{intern, is_relative, join_relative, ModuleId};
use crate::module::{DynamicImport, ExternalModule, Module, ModuleOrExternal, ResolvedId};
use crate::plugin::{DynamicImportResolution, LoadResult, PluginDriver, ResolveIdResult};

type FetchResult = Result<usize, Arc<BuildError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// The arena all Modules/ExternalModules live in, owned by the loader during
/// discovery and handed to the Graph for the synchronous phases afterwards.
#[derive(Default)]
pub struct ModuleStore {
    pub by_id: IndexMap<ModuleId, usize>,
    pub modules: Vec<ModuleOrExternal>,
    /// Index order in which fetches *completed* (§5 ordering guarantees).
    pub completed: Vec<usize>,
}

impl ModuleStore {
    fn insert_placeholder(&mut self, id: ModuleId) -> usize {
        let idx = self.modules.len();
        let empty = ParsedModule {
            program: swc_ecma_ast::Program::Module(swc_ecma_ast::Module {
                span: swc_common::DUMMY_SP,
                body: vec![],
                shebang: None,
            }),
            statements: vec![],
            imports: vec![],
            exports: vec![],
            reexports: vec![],
            export_all_sources: vec![],
            dynamic_imports: vec![],
        };
        self.modules.push(ModuleOrExternal::Normal(Module::new(id.clone(), String::new(), empty)));
        self.by_id.insert(id, idx);
        idx
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub alias: Option<String>,
    pub id: ModuleId,
}

#[derive(Debug, Clone, Default)]
pub struct EntryModulesResult {
    pub entry_modules: Vec<ResolvedEntry>,
    pub manual_chunk_modules: HashMap<String, Vec<ModuleId>>,
}

pub struct ModuleLoader {
    store: Mutex<ModuleStore>,
    in_flight: std::sync::Mutex<HashMap<ModuleId, SharedFetch>>,
    /// Cyclic back-edge fetches deferred out of the recursive await chain,
    /// to be drained once it's safe to wait on them (see `fetch_all_dependencies`).
    deferred: std::sync::Mutex<Vec<SharedFetch>>,
    /// Plugin cache keys this build actually touched, namespace + key, fed
    /// to `BuildCache::evict_stale` at the end of the build.
    touched: std::sync::Mutex<HashMap<(String, String), ()>>,
    plugins: PluginDriver,
    options: Arc<BuildOptions>,
    cache: Mutex<BuildCache>,
    /// The single pending-future chain node (§4.1 "Pending-work discipline").
    pending: Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
}

/// The loader doesn't expose a per-plugin cache handle to hooks (§6 hook
/// surface is resolveId/load/transform/resolveDynamicImport/watchChange
/// only); it uses the same plugin-cache namespace for its own module-load
/// bookkeeping so the access counter and eviction sweep are real.
const LOADER_CACHE_NAMESPACE: &str = "loader";

impl ModuleLoader {
    pub fn new(plugins: PluginDriver, options: Arc<BuildOptions>, cache: BuildCache) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(ModuleStore::default()),
            in_flight: std::sync::Mutex::new(HashMap::new()),
            deferred: std::sync::Mutex::new(Vec::new()),
            touched: std::sync::Mutex::new(HashMap::new()),
            plugins,
            options,
            cache: Mutex::new(cache),
            pending: Mutex::new(None),
        })
    }

    pub async fn take_store(&self) -> ModuleStore {
        std::mem::take(&mut *self.store.lock().await)
    }

    pub async fn take_cache(&self) -> BuildCache {
        std::mem::take(&mut *self.cache.lock().await)
    }

    pub fn take_touched(&self) -> HashMap<(String, String), ()> {
        std::mem::take(&mut *self.touched.lock().unwrap())
    }

    /// Join whatever cyclic back-edge fetches were deferred during discovery
    /// instead of recursively awaited, now that the whole chain has unwound
    /// and waiting on them can't reenter a `Shared` future still being polled.
    async fn join_deferred(&self) -> Result<(), Arc<BuildError>> {
        loop {
            let batch: Vec<SharedFetch> = std::mem::take(&mut *self.deferred.lock().unwrap());
            if batch.is_empty() {
                return Ok(());
            }
            for result in futures::future::join_all(batch).await {
                result?;
            }
        }
    }

    /// Chains `work` onto the pending future so this call's result is only
    /// observed once every previously queued `add_entry_modules`/
    /// `add_manual_chunks` call has also completed, while `work` itself
    /// starts running immediately (§4.1, §5).
    async fn chain<T: Send + 'static>(
        &self,
        work: impl Future<Output = Result<T, Arc<BuildError>>> + Send + 'static,
    ) -> Result<T, Arc<BuildError>> {
        let (tx, rx) = oneshot::channel();
        let spawned = tokio::spawn(async move {
            let result = work.await;
            let _ = tx.send(());
            result
        });
        let own_signal: BoxFuture<'static, ()> = Box::pin(async move {
            let _ = rx.await;
        });

        let mut guard = self.pending.lock().await;
        let prior = guard.take();
        let combined: BoxFuture<'static, ()> = match prior {
            Some(prior) => Box::pin(async move {
                prior.await;
                own_signal.await;
            }),
            None => own_signal,
        };
        let shared_combined = combined.shared();
        *guard = Some(shared_combined.clone());
        drop(guard);

        shared_combined.await;
        match spawned.await {
            Ok(result) => result,
            Err(join_error) => {
                Err(Arc::new(BuildError::Plugin(anyhow::anyhow!("loader task panicked: {join_error}"))))
            }
        }
    }

    pub async fn add_entry_modules(
        self: &Arc<Self>,
        unresolved: Vec<(Option<String>, String)>,
    ) -> Result<EntryModulesResult, Arc<BuildError>> {
        let loader = self.clone();
        self.chain(async move { loader.add_entry_modules_inner(unresolved).await }).await
    }

    pub async fn add_manual_chunks(
        self: &Arc<Self>,
        chunks: HashMap<String, Vec<String>>,
    ) -> Result<HashMap<String, Vec<ModuleId>>, Arc<BuildError>> {
        let loader = self.clone();
        self.chain(async move { loader.add_manual_chunks_inner(chunks).await }).await
    }

    async fn add_entry_modules_inner(
        self: Arc<Self>,
        unresolved: Vec<(Option<String>, String)>,
    ) -> Result<EntryModulesResult, Arc<BuildError>> {
        let mut entry_modules = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (alias, specifier) in unresolved {
            let id = self.resolve_entry(&specifier).await?;
            if !seen.insert(id.clone()) {
                return Err(Arc::new(BuildError::DuplicateEntryPoints { specifier, existing: id }));
            }
            let idx = self.clone().fetch_module(id.clone(), None).await?;
            {
                let mut store = self.store.lock().await;
                store.modules[idx].set_entry_point(true);
            }
            entry_modules.push(ResolvedEntry { alias, id });
        }
        self.join_deferred().await?;
        Ok(EntryModulesResult { entry_modules, manual_chunk_modules: HashMap::new() })
    }

    async fn add_manual_chunks_inner(
        self: Arc<Self>,
        chunks: HashMap<String, Vec<String>>,
    ) -> Result<HashMap<String, Vec<ModuleId>>, Arc<BuildError>> {
        let mut out = HashMap::new();
        for (alias, specifiers) in chunks {
            let mut ids = Vec::new();
            for specifier in specifiers {
                let id = self.resolve_entry(&specifier).await?;
                self.clone().fetch_module(id.clone(), None).await?;
                ids.push(id);
            }
            out.insert(alias, ids);
        }
        self.join_deferred().await?;
        Ok(out)
    }

    async fn resolve_entry(&self, specifier: &str) -> Result<ModuleId, Arc<BuildError>> {
        match self.plugins.resolve_id(specifier, None).await {
            Ok(Some(ResolveIdResult::Id(id))) => Ok(intern(id)),
            Ok(Some(ResolveIdResult::Resolved { id, .. })) => Ok(intern(id)),
            Ok(Some(ResolveIdResult::HardExternal)) | Ok(Some(ResolveIdResult::NotResolved)) | Ok(None) => {
                Err(Arc::new(BuildError::UnresolvedEntry { specifier: specifier.to_string() }))
            }
            Err(e) => Err(Arc::new(BuildError::Plugin(e))),
        }
    }

    /// `fetchModule(id, importer)`: returns the store index of the loaded
    /// module, coalescing concurrent fetches of the same id (§4.1, §5).
    pub fn fetch_module(self: Arc<Self>, id: ModuleId, importer: Option<ModuleId>) -> SharedFetch {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(existing) = in_flight.get(&id) {
            return existing.clone();
        }
        let loader = self.clone();
        let fetch_id = id.clone();
        let fut: SharedFetch = async move { loader.fetch_module_uncached(fetch_id, importer).await }
            .boxed()
            .shared();
        in_flight.insert(id, fut.clone());
        fut
    }

    async fn fetch_module_uncached(self: Arc<Self>, id: ModuleId, importer: Option<ModuleId>) -> FetchResult {
        let existing_idx = {
            let store = self.store.lock().await;
            store.by_id.get(&id).copied()
        };
        if let Some(idx) = existing_idx {
            let is_external = {
                let store = self.store.lock().await;
                store.modules[idx].is_external()
            };
            if is_external {
                return Err(Arc::new(BuildError::FetchedExternalAsInternal { id }));
            }
            return Ok(idx);
        }

        let idx = {
            let mut store = self.store.lock().await;
            store.insert_placeholder(id.clone())
        };

        let result = self.clone().do_fetch(&id, importer, idx).await;
        self.in_flight.lock().unwrap().remove(&id);
        result
    }

    async fn do_fetch(self: Arc<Self>, id: &ModuleId, importer: Option<ModuleId>, idx: usize) -> FetchResult {
        let load_result = self
            .plugins
            .load(id)
            .await
            .map_err(|e| Arc::new(BuildError::BadLoader { id: id.clone(), importer: importer.clone(), source: e }))?;
        let code = match load_result {
            Some(LoadResult { code }) => code,
            None => return Err(Arc::new(BuildError::BadLoaderReturn { id: id.clone() })),
        };

        let cached = {
            let cache = self.cache.lock().await;
            cache.lookup(id, &code).cloned()
        };

        let (parsed, from_cache) = if let Some(entry) = cached {
            (entry.parsed.expect("cache hit must carry a parsed module"), true)
        } else {
            let parsed = self
                .plugins
                .transform(id, &code)
                .await
                .map_err(|e| Arc::new(BuildError::Plugin(e)))?;
            {
                let mut cache = self.cache.lock().await;
                cache.store(ModuleCacheEntry {
                    id: id.to_string(),
                    original_code: code.clone(),
                    custom_transform_cache: false,
                    transform_assets: HashMap::new(),
                    parsed: Some(parsed.clone()),
                });
            }
            (parsed, false)
        };

        {
            let mut cache = self.cache.lock().await;
            cache.touch_plugin_entry(LOADER_CACHE_NAMESPACE, id.as_ref(), serde_json::json!(from_cache));
        }
        self.touched.lock().unwrap().insert((LOADER_CACHE_NAMESPACE.to_string(), id.to_string()));

        let mut module = Module::new(id.clone(), code, parsed);
        module.from_cache = from_cache;
        // every loaded module executes; this crate has no type-only or
        // elided-module concept that would leave it unexecuted (§3, §4.4).
        module.is_executed = true;

        let mut resolved_ids = HashMap::new();
        for source in module.sources.clone() {
            let resolved = self.resolve_dependency(&source, id).await?;
            resolved_ids.insert(source, resolved);
        }
        module.resolved_ids = resolved_ids.clone();

        {
            let mut store = self.store.lock().await;
            store.modules[idx] = ModuleOrExternal::Normal(module);
        }

        self.fetch_all_dependencies(id, &resolved_ids).await?;

        {
            let mut store = self.store.lock().await;
            self.merge_exports_all(&mut store, idx)?;
            store.completed.push(idx);
        }

        self.fetch_dynamic_imports(id, idx).await;

        Ok(idx)
    }

    async fn resolve_dependency(&self, source: &str, importer: &ModuleId) -> Result<ResolvedId, Arc<BuildError>> {
        if self.options.external.is_external(source, Some(importer.as_ref()), false) {
            return Ok(ResolvedId { id: intern(source), external: true });
        }
        match self.plugins.resolve_id(source, Some(importer.as_ref())).await {
            Ok(Some(ResolveIdResult::HardExternal)) => Ok(ResolvedId { id: intern(source), external: true }),
            Ok(Some(ResolveIdResult::Id(resolved_id))) => {
                let external = self.options.external.is_external(&resolved_id, Some(importer.as_ref()), true);
                Ok(ResolvedId { id: intern(resolved_id), external })
            }
            Ok(Some(ResolveIdResult::Resolved { id, external })) => Ok(ResolvedId { id: intern(id), external }),
            Ok(Some(ResolveIdResult::NotResolved)) | Ok(None) => self.default_resolution(source, importer),
            Err(e) => Err(Arc::new(BuildError::Plugin(e))),
        }
    }

    fn default_resolution(&self, source: &str, importer: &ModuleId) -> Result<ResolvedId, Arc<BuildError>> {
        if is_relative(source) {
            let joined = join_relative(importer, source);
            let _ = joined; // the id a real resolver would have produced, for diagnostics only
            Err(Arc::new(BuildError::UnresolvedImport { specifier: source.to_string(), importer: importer.clone() }))
        } else {
            (self.options.on_warn)(Warning::new(WarningKind::UnresolvedImport {
                specifier: source.to_string(),
                importer: importer.clone(),
            }));
            Ok(ResolvedId { id: intern(source), external: true })
        }
    }

    async fn fetch_all_dependencies(
        self: &Arc<Self>,
        importer: &ModuleId,
        resolved_ids: &HashMap<String, ResolvedId>,
    ) -> Result<(), Arc<BuildError>> {
        let mut static_fetches = Vec::new();
        for resolved in resolved_ids.values() {
            if resolved.external {
                self.ensure_external(resolved.id.clone()).await?;
                continue;
            }

            // A dependency id already present in the store has its
            // placeholder inserted before this very check: it's either a
            // module that already finished loading, or an ancestor of this
            // fetch reached through a cycle (a→b→a). Awaiting its in-flight
            // future here would be a reentrant poll of the exact `Shared`
            // future suspended driving that ancestor's own call — it can
            // never resolve, since the ancestor is itself blocked on us.
            // Defer it instead: the ancestor unwinds and completes once we
            // return, and the top-level `add_entry_modules`/
            // `add_manual_chunks` call joins whatever is left outstanding.
            let already_known = {
                let store = self.store.lock().await;
                store.by_id.contains_key(&resolved.id)
            };
            if already_known {
                if let Some(in_flight) = self.in_flight.lock().unwrap().get(&resolved.id).cloned() {
                    self.deferred.lock().unwrap().push(in_flight);
                }
                continue;
            }

            static_fetches.push(self.clone().fetch_module(resolved.id.clone(), Some(importer.clone())));
        }
        for result in futures::future::join_all(static_fetches).await {
            result?;
        }
        Ok(())
    }

    async fn ensure_external(&self, id: ModuleId) -> Result<usize, Arc<BuildError>> {
        let mut store = self.store.lock().await;
        if let Some(&idx) = store.by_id.get(&id) {
            return if store.modules[idx].is_external() {
                Ok(idx)
            } else {
                Err(Arc::new(BuildError::InvalidExternalId { id }))
            };
        }
        let idx = store.modules.len();
        store.modules.push(ModuleOrExternal::External(ExternalModule::new(id.clone())));
        store.by_id.insert(id, idx);
        store.completed.push(idx);
        Ok(idx)
    }

    fn merge_exports_all(&self, store: &mut ModuleStore, idx: usize) -> Result<(), Arc<BuildError>> {
        let (self_id, own_exports, export_all_sources, resolved_ids) = {
            let m = store.modules[idx].as_normal().expect("merge_exports_all on internal module");
            (m.id.clone(), m.exports.clone(), m.export_all_sources.clone(), m.resolved_ids.clone())
        };

        let mut merged: HashMap<String, ModuleId> = HashMap::new();
        for name in &own_exports {
            merged.insert(name.clone(), self_id.clone());
        }

        let mut conflicts: Vec<(String, Vec<ModuleId>)> = Vec::new();
        for source in &export_all_sources {
            let Some(resolved) = resolved_ids.get(source) else { continue };
            if resolved.external {
                continue;
            }
            let Some(&dep_idx) = store.by_id.get(&resolved.id) else { continue };
            let dep_exports_all = match &store.modules[dep_idx] {
                ModuleOrExternal::Normal(dep) => dep.exports_all.clone(),
                ModuleOrExternal::External(_) => HashMap::new(),
            };
            for (name, owner) in dep_exports_all {
                match merged.get(&name) {
                    Some(existing) if *existing != owner => {
                        conflicts.push((name, vec![existing.clone(), owner]));
                    }
                    Some(_) => {}
                    None => {
                        merged.insert(name, owner);
                    }
                }
            }
        }

        if let Some(m) = store.modules[idx].as_normal_mut() {
            m.exports_all = merged;
        }
        for (name, candidates) in conflicts {
            (self.options.on_warn)(Warning::new(WarningKind::NamespaceConflict { name, candidates }));
        }
        Ok(())
    }

    /// Dynamic imports are resolved after every static dependency has
    /// settled; any failure here is swallowed (§4.1, §7 "Silent").
    async fn fetch_dynamic_imports(self: &Arc<Self>, importer: &ModuleId, idx: usize) {
        let sites = {
            let store = self.store.lock().await;
            store.modules[idx]
                .as_normal()
                .map(|m| m.parsed.dynamic_imports.clone())
                .unwrap_or_default()
        };

        let mut resolved = Vec::with_capacity(sites.len());
        for site in sites {
            let resolution = self.resolve_one_dynamic_import(importer, &site).await;
            resolved.push(DynamicImport { expression: site.expression, alias: None, resolution });
        }

        let mut store = self.store.lock().await;
        if let Some(m) = store.modules[idx].as_normal_mut() {
            m.dynamic_imports = resolved;
        }
    }

    async fn resolve_one_dynamic_import(
        self: &Arc<Self>,
        importer: &ModuleId,
        site: &crate::ast::DynamicImportSite,
    ) -> Option<ResolvedId> {
        let outcome = self.plugins.resolve_dynamic_import(&site.expression, importer).await;
        let resolution = match outcome {
            Ok(Some(resolution)) => resolution,
            Ok(None) => match &site.literal_target {
                Some(target) => DynamicImportResolution::Id(target.clone()),
                None => DynamicImportResolution::Unresolved,
            },
            Err(error) => {
                tracing::debug!(%error, %importer, "resolveDynamicImport failed; swallowed per spec");
                return None;
            }
        };

        match resolution {
            DynamicImportResolution::Unresolved => None,
            DynamicImportResolution::Inline(_parsed) => None,
            DynamicImportResolution::Id(target) => {
                let is_external = self.options.external.is_external(&target, Some(importer.as_ref()), false);
                let id = intern(&target);
                if is_external {
                    match self.ensure_external(id.clone()).await {
                        Ok(ext_idx) => {
                            let mut store = self.store.lock().await;
                            if let Some(ext) = store.modules[ext_idx].as_external_mut() {
                                ext.exports_namespace = true;
                            }
                            Some(ResolvedId { id, external: true })
                        }
                        Err(error) => {
                            tracing::debug!(%error, "dynamic external resolution failed; swallowed");
                            None
                        }
                    }
                } else {
                    let already_known = {
                        let store = self.store.lock().await;
                        store.by_id.contains_key(&id)
                    };
                    if already_known {
                        if let Some(in_flight) = self.in_flight.lock().unwrap().get(&id).cloned() {
                            self.deferred.lock().unwrap().push(in_flight);
                        }
                        return Some(ResolvedId { id, external: false });
                    }
                    match self.clone().fetch_module(id.clone(), Some(importer.clone())).await {
                        Ok(_) => Some(ResolvedId { id, external: false }),
                        Err(error) => {
                            tracing::debug!(%error, "dynamic import fetch failed; swallowed");
                            None
                        }
                    }
                }
            }
        }
    }
}
