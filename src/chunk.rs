//! The Chunker (§4.5): entry-point colouring, partitioning, and facade
//! synthesis.

use std::collections::{HashMap, HashSet, VecDeque};

use rustc_hash::FxHashSet;

use crate::error::BuildError;
use crate::id::ModuleId;
use crate::loader::{ModuleStore, ResolvedEntry};
use crate::module::{EntryPointsHash, ModuleOrExternal, ZERO_HASH};
use crate::order::static_deps;

fn seed_hash(key: &str) -> EntryPointsHash {
    let digest = blake3::hash(key.as_bytes());
    let mut seed = ZERO_HASH;
    seed.copy_from_slice(&digest.as_bytes()[..10]);
    seed
}

fn xor_into(hash: &mut EntryPointsHash, seed: &EntryPointsHash) {
    for i in 0..10 {
        hash[i] ^= seed[i];
    }
}

fn reachable_from(store: &ModuleStore, root: usize) -> Vec<usize> {
    let mut seen = FxHashSet::default();
    let mut queue = VecDeque::new();
    let mut out = Vec::new();
    queue.push_back(root);
    seen.insert(root);
    while let Some(idx) = queue.pop_front() {
        out.push(idx);
        for dep in static_deps(store, idx) {
            if seen.insert(dep) {
                queue.push_back(dep);
            }
        }
    }
    out
}

fn default_alias(id: &str) -> String {
    std::path::Path::new(id)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string())
}

/// Entry-point colouring (§4.5 steps 1-3): every module's `entryPointsHash`
/// ends up as the XOR of the seed of every entry point (or manual-chunk
/// alias) that transitively needs it.
pub fn colour_modules(store: &mut ModuleStore, entries: &[(usize, String)], manual_chunk_modules: &HashMap<String, Vec<ModuleId>>) {
    for idx in 0..store.modules.len() {
        if let Some(m) = store.modules[idx].as_normal_mut() {
            m.entry_points_hash = ZERO_HASH;
        }
    }

    for (entry_idx, seed_key) in entries {
        let seed = seed_hash(seed_key);
        for idx in reachable_from(store, *entry_idx) {
            if let Some(m) = store.modules[idx].as_normal_mut() {
                xor_into(&mut m.entry_points_hash, &seed);
            }
        }
    }

    // Manual chunks override rather than blend: a listed module is coloured
    // by its alias's seed alone, regardless of which entries also reach it,
    // so it always lands in its declared chunk instead of a variant shared
    // with whichever entries happen to import it too.
    for (alias, ids) in manual_chunk_modules {
        let seed = seed_hash(alias);
        for id in ids {
            if let Some(&idx) = store.by_id.get(id) {
                if let Some(m) = store.modules[idx].as_normal_mut() {
                    m.entry_points_hash = seed;
                    m.chunk_alias = Some(alias.clone());
                    m.in_manual_chunk = true;
                }
            }
        }
    }
}

/// Set each entry module's preferred output alias. Declared in reverse so
/// that, in the object-graph this is modelled on, the first-declared entry's
/// write lands last; here each module is written at most once, so we just
/// walk entries in original order and take the first writer per module,
/// which is equivalent.
pub fn assign_entry_aliases(store: &mut ModuleStore, entries: &[ResolvedEntry]) {
    for entry in entries {
        if let Some(&idx) = store.by_id.get(&entry.id) {
            if let Some(m) = store.modules[idx].as_normal_mut() {
                if m.chunk_alias.is_none() {
                    m.chunk_alias = Some(entry.alias.clone().unwrap_or_else(|| default_alias(&entry.id)));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub ordered_modules: Vec<ModuleId>,
    pub entry_modules: Vec<ModuleId>,
    pub is_manual_chunk: bool,
    pub facade_module: Option<ModuleId>,
    pub alias: Option<String>,
    /// Set only for a synthesized facade chunk: the index of the chunk whose
    /// contents it re-exports.
    pub reexports_chunk: Option<usize>,
    /// Cross-chunk imports: other-chunk-index -> names pulled from it.
    pub imports: HashMap<usize, Vec<String>>,
    pub exports: HashSet<String>,
    /// True when this chunk hosts more than one entry's code, so at most
    /// one of those entries can render its public surface verbatim here.
    pub tainted: bool,
}

/// Partition step (§4.5): group by hex-identical hash, execution order
/// within a group, one Chunk per group.
pub fn partition(store: &ModuleStore, order: &[usize]) -> Vec<Chunk> {
    let mut groups: indexmap::IndexMap<EntryPointsHash, Vec<usize>> = indexmap::IndexMap::new();
    for &idx in order {
        if store.modules[idx].as_normal().is_some() {
            let hash = store.modules[idx].as_normal().unwrap().entry_points_hash;
            groups.entry(hash).or_default().push(idx);
        }
    }

    groups
        .into_values()
        .map(|indices| {
            let ordered_modules: Vec<ModuleId> = indices.iter().map(|&i| store.modules[i].id().clone()).collect();
            let entry_modules: Vec<ModuleId> = indices
                .iter()
                .filter(|&&i| store.modules[i].as_normal().map(|m| m.is_entry_point).unwrap_or(false))
                .map(|&i| store.modules[i].id().clone())
                .collect();
            let is_manual_chunk = indices.iter().any(|&i| store.modules[i].as_normal().map(|m| m.in_manual_chunk).unwrap_or(false));
            let facade_module = indices
                .iter()
                .find(|&&i| store.modules[i].as_normal().map(|m| m.is_entry_point && m.chunk_alias.is_some()).unwrap_or(false))
                .map(|&i| store.modules[i].id().clone());
            Chunk {
                ordered_modules,
                tainted: entry_modules.len() > 1,
                entry_modules,
                is_manual_chunk,
                facade_module,
                alias: None,
                reexports_chunk: None,
                imports: HashMap::new(),
                exports: HashSet::new(),
            }
        })
        .collect()
}

/// Facade synthesis (§4.5): every entry whose chunk is dominated by another
/// module gets an empty chunk that only re-exports it.
pub fn synthesize_facades(store: &ModuleStore, chunks: &mut Vec<Chunk>, entries: &[ResolvedEntry]) {
    let module_chunk: HashMap<ModuleId, usize> = chunks
        .iter()
        .enumerate()
        .flat_map(|(chunk_idx, chunk)| chunk.ordered_modules.iter().map(move |id| (id.clone(), chunk_idx)))
        .collect();

    let mut facades = Vec::new();
    for entry in entries {
        let Some(&chunk_idx) = module_chunk.get(&entry.id) else { continue };
        if chunks[chunk_idx].facade_module.as_ref() == Some(&entry.id) {
            continue;
        }
        let alias = entry.alias.clone().unwrap_or_else(|| default_alias(&entry.id));
        let exports = store
            .by_id
            .get(&entry.id)
            .and_then(|&idx| store.modules[idx].as_normal())
            .map(|m| m.linked_exports.keys().cloned().collect())
            .unwrap_or_default();
        let mut facade_imports = HashMap::new();
        facade_imports.insert(chunk_idx, exports);
        facades.push(Chunk {
            ordered_modules: Vec::new(),
            entry_modules: vec![entry.id.clone()],
            is_manual_chunk: false,
            facade_module: Some(entry.id.clone()),
            alias: Some(alias),
            reexports_chunk: Some(chunk_idx),
            imports: facade_imports,
            exports: HashSet::new(),
            tainted: false,
        });
    }
    chunks.extend(facades);
}

/// Chunk linking: cross-chunk imports/exports based on which bindings a
/// module in one chunk pulls from a module in another.
pub fn link_chunks(store: &ModuleStore, chunks: &mut [Chunk]) {
    let module_chunk: HashMap<ModuleId, usize> = chunks
        .iter()
        .enumerate()
        .flat_map(|(chunk_idx, chunk)| chunk.ordered_modules.iter().map(move |id| (id.clone(), chunk_idx)))
        .collect();

    let mut cross_imports: Vec<(usize, usize, String)> = Vec::new();
    let mut cross_exports: Vec<(usize, String)> = Vec::new();

    for (chunk_idx, chunk) in chunks.iter().enumerate() {
        for module_id in &chunk.ordered_modules {
            let Some(&idx) = store.by_id.get(module_id) else { continue };
            let Some(module) = store.modules[idx].as_normal() else { continue };
            for binding in module.linked_imports.values() {
                let Some(&owner_chunk) = module_chunk.get(&binding.owner) else { continue };
                if owner_chunk != chunk_idx {
                    cross_imports.push((chunk_idx, owner_chunk, binding.local_name.clone()));
                    cross_exports.push((owner_chunk, binding.local_name.clone()));
                }
            }
        }
    }

    for (chunk_idx, owner_chunk, name) in cross_imports {
        chunks[chunk_idx].imports.entry(owner_chunk).or_default().push(name);
    }
    for (owner_chunk, name) in cross_exports {
        chunks[owner_chunk].exports.insert(name);
    }
}

/// `preserveModules` mode (§4.5): one chunk per module, no colouring.
pub fn preserve_modules(store: &ModuleStore, order: &[usize]) -> Vec<Chunk> {
    order
        .iter()
        .filter_map(|&idx| {
            let module = store.modules[idx].as_normal()?;
            Some(Chunk {
                ordered_modules: vec![module.id.clone()],
                entry_modules: if module.is_entry_point { vec![module.id.clone()] } else { Vec::new() },
                is_manual_chunk: false,
                facade_module: if module.is_entry_point { Some(module.id.clone()) } else { None },
                alias: module.chunk_alias.clone(),
                reexports_chunk: None,
                imports: HashMap::new(),
                exports: HashSet::new(),
                tainted: false,
            })
        })
        .collect()
}

/// `inlineDynamicImports` mode (§4.5): a single chunk holding every reachable
/// module. Requires exactly one entry.
pub fn inline_dynamic_imports(store: &ModuleStore, order: &[usize], entries: &[ResolvedEntry]) -> Result<Vec<Chunk>, BuildError> {
    if entries.len() != 1 {
        return Err(BuildError::MultipleEntriesWithInlineDynamicImports { count: entries.len() });
    }
    let ordered_modules: Vec<ModuleId> =
        order.iter().filter_map(|&idx| store.modules[idx].as_normal().map(|m| m.id.clone())).collect();
    Ok(vec![Chunk {
        ordered_modules,
        entry_modules: vec![entries[0].id.clone()],
        is_manual_chunk: false,
        facade_module: Some(entries[0].id.clone()),
        alias: Some(entries[0].alias.clone().unwrap_or_else(|| default_alias(&entries[0].id))),
        reexports_chunk: None,
        imports: HashMap::new(),
        exports: HashSet::new(),
        tainted: false,
    }])
}

/// Drop chunks that ended up empty, have no entry, and weren't a manual
/// grouping — a leftover of a group whose only modules got shaken away
/// entirely would otherwise surface as a pointless empty artifact.
pub fn drop_dead_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|chunk| !chunk.ordered_modules.is_empty() || !chunk.entry_modules.is_empty() || chunk.is_manual_chunk)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParsedModule;
    use crate::id::intern;
    use crate::module::{Module, ResolvedId};
    use indexmap::IndexMap;

    fn empty_parsed() -> ParsedModule {
        ParsedModule {
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
        }
    }

    fn module(id: &str, dep: Option<&str>) -> Module {
        let mut parsed = empty_parsed();
        if let Some(dep) = dep {
            parsed.imports.push(crate::ast::ImportSite { local: "v".into(), imported: "v".into(), source: dep.into(), start: 0 });
        }
        let mut m = Module::new(intern(id), String::new(), parsed);
        if let Some(dep) = dep {
            m.resolved_ids.insert(dep.into(), ResolvedId { id: intern(dep), external: false });
        }
        m
    }

    #[test]
    fn diamond_shared_module_gets_its_own_chunk() {
        let mut x = module("x.js", Some("shared.js"));
        let mut y = module("y.js", Some("shared.js"));
        let shared = module("shared.js", None);
        x.is_entry_point = true;
        y.is_entry_point = true;

        let mut by_id = IndexMap::new();
        by_id.insert(intern("x.js"), 0usize);
        by_id.insert(intern("y.js"), 1usize);
        by_id.insert(intern("shared.js"), 2usize);
        let mut store = ModuleStore {
            by_id,
            modules: vec![ModuleOrExternal::Normal(x), ModuleOrExternal::Normal(y), ModuleOrExternal::Normal(shared)],
            completed: vec![0, 1, 2],
        };

        colour_modules(&mut store, &[(0, "x.js".to_string()), (1, "y.js".to_string())], &HashMap::new());

        let hash_x = store.modules[0].as_normal().unwrap().entry_points_hash;
        let hash_y = store.modules[1].as_normal().unwrap().entry_points_hash;
        let hash_shared = store.modules[2].as_normal().unwrap().entry_points_hash;
        assert_ne!(hash_x, hash_y);
        assert_ne!(hash_shared, hash_x);
        assert_ne!(hash_shared, hash_y);

        let order = vec![2, 0, 1];
        let chunks = partition(&store, &order);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn manual_chunk_colours_by_its_own_seed_alone() {
        let mut x = module("x.js", Some("shared.js"));
        let mut y = module("y.js", Some("shared.js"));
        let shared = module("shared.js", None);
        x.is_entry_point = true;
        y.is_entry_point = true;

        let mut by_id = IndexMap::new();
        by_id.insert(intern("x.js"), 0usize);
        by_id.insert(intern("y.js"), 1usize);
        by_id.insert(intern("shared.js"), 2usize);
        let mut store = ModuleStore {
            by_id,
            modules: vec![ModuleOrExternal::Normal(x), ModuleOrExternal::Normal(y), ModuleOrExternal::Normal(shared)],
            completed: vec![0, 1, 2],
        };

        let mut manual = HashMap::new();
        manual.insert("vendor".to_string(), vec![intern("shared.js")]);
        colour_modules(&mut store, &[(0, "x.js".to_string()), (1, "y.js".to_string())], &manual);

        let shared = store.modules[2].as_normal().unwrap();
        assert_eq!(shared.entry_points_hash, seed_hash("vendor"), "manual seed must not be XORed with reaching entries");
        assert_eq!(shared.chunk_alias.as_deref(), Some("vendor"));
        assert!(shared.in_manual_chunk);

        let entries = [(0, "x.js".to_string()), (1, "y.js".to_string())].to_vec();
        let resolved_entries =
            vec![ResolvedEntry { alias: None, id: intern("x.js") }, ResolvedEntry { alias: None, id: intern("y.js") }];
        assign_entry_aliases(&mut store, &resolved_entries);
        let _ = entries;

        let order = vec![2, 0, 1];
        let chunks = partition(&store, &order);
        let vendor_chunk = chunks.iter().find(|c| c.ordered_modules.iter().any(|m| m.as_ref() == "shared.js")).unwrap();
        assert!(vendor_chunk.is_manual_chunk);

        let x_chunk = chunks.iter().find(|c| c.entry_modules.iter().any(|m| m.as_ref() == "x.js")).unwrap();
        assert!(!x_chunk.is_manual_chunk, "an ordinary entry chunk must not be flagged manual");
    }
}
