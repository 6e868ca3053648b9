//! The Tree-shaker (§4.4): a monotone fixpoint over statement inclusion.
//!
//! Mode 1 (tree-shaking enabled) seeds side-effecting statements and every
//! entry module's export surface, then repeatedly propagates "this name is
//! referenced" both within a module and across import/export edges until a
//! pass makes no further change. Mode 2 (disabled) just includes everything,
//! but still runs through the same binding data the linker produced.

use rustc_hash::FxHashSet;

use crate::id::ModuleId;
use crate::loader::ModuleStore;
use crate::module::Module;

enum ImportRequest {
    Namespace(ModuleId),
    Named(ModuleId, String),
}

fn referenced_names(module: &Module) -> FxHashSet<String> {
    module.parsed.statements.iter().filter(|s| s.included).flat_map(|s| s.references.iter().cloned()).collect()
}

fn propagate_local(store: &mut ModuleStore, idx: usize) -> bool {
    let Some(module) = store.modules[idx].as_normal_mut() else { return false };
    let referenced = referenced_names(module);
    let mut changed = false;
    for statement in &mut module.parsed.statements {
        if statement.included {
            continue;
        }
        if statement.defines.iter().any(|name| referenced.contains(name)) {
            statement.included = true;
            changed = true;
        }
    }
    changed
}

fn propagate_imports(store: &mut ModuleStore, idx: usize) -> bool {
    let requests: Vec<ImportRequest> = {
        let Some(module) = store.modules[idx].as_normal() else { return false };
        let referenced = referenced_names(module);
        let mut requests = Vec::new();
        for (local_name, description) in &module.import_descriptions {
            if !referenced.contains(local_name) {
                continue;
            }
            if description.imported_name == "*" {
                if let Some(resolved) = module.resolved_ids.get(&description.source) {
                    requests.push(ImportRequest::Namespace(resolved.id.clone()));
                }
                continue;
            }
            if let Some(binding) = module.linked_imports.get(local_name) {
                requests.push(ImportRequest::Named(binding.owner.clone(), binding.local_name.clone()));
            }
        }
        requests
    };

    let mut changed = false;
    for request in requests {
        match request {
            ImportRequest::Namespace(owner_id) => {
                let Some(&owner_idx) = store.by_id.get(&owner_id) else { continue };
                if let Some(owner) = store.modules[owner_idx].as_normal_mut() {
                    if !owner.namespace_referenced {
                        owner.include_all_exports();
                        changed = true;
                    }
                }
            }
            ImportRequest::Named(owner_id, exported_name) => {
                let Some(&owner_idx) = store.by_id.get(&owner_id) else { continue };
                if let Some(owner) = store.modules[owner_idx].as_normal_mut() {
                    if let Some(stmt_idx) = owner.find_own_export_statement(&exported_name) {
                        if !owner.parsed.statements[stmt_idx].included {
                            owner.parsed.statements[stmt_idx].included = true;
                            changed = true;
                        }
                    }
                }
            }
        }
    }
    changed
}

/// Run the tree-shaker over every module in the store.
///
/// `order` need not be execution order; any stable iteration order converges
/// to the same fixpoint since inclusion only ever grows.
pub fn shake(store: &mut ModuleStore, order: &[usize], entry_indices: &[usize], enabled: bool) {
    if !enabled {
        for idx in 0..store.modules.len() {
            if let Some(module) = store.modules[idx].as_normal_mut() {
                if module.is_executed {
                    module.include_all_in_bundle();
                }
            }
        }
        return;
    }

    for idx in 0..store.modules.len() {
        if let Some(module) = store.modules[idx].as_normal_mut() {
            if module.is_executed {
                module.include_side_effects();
            }
        }
    }
    for &idx in entry_indices {
        if let Some(module) = store.modules[idx].as_normal_mut() {
            module.include_all_exports();
        }
    }

    // §4.4: only executed modules participate in the inclusion fixpoint.
    let executed: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&idx| store.modules[idx].as_normal().map(|m| m.is_executed).unwrap_or(false))
        .collect();

    loop {
        let mut changed = false;
        for &idx in &executed {
            changed |= propagate_local(store, idx);
        }
        for &idx in &executed {
            changed |= propagate_imports(store, idx);
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExportSite, ImportSite, ParsedModule, Statement};
    use crate::id::intern;
    use crate::linker::{bind_references, link_dependencies};
    use crate::module::{Module, ModuleOrExternal, ResolvedId};
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

    #[test]
    fn unused_export_is_dropped_used_export_is_kept() {
        let mut util_parsed = empty_parsed();
        util_parsed.statements.push(Statement { defines: vec!["used".into()], ..Default::default() });
        util_parsed.statements.push(Statement { defines: vec!["unused".into()], ..Default::default() });
        util_parsed.exports.push(ExportSite { exported_as: "used".into(), statement: 0 });
        util_parsed.exports.push(ExportSite { exported_as: "unused".into(), statement: 1 });
        let mut util = Module::new(intern("util.js"), String::new(), util_parsed);

        let mut entry_parsed = empty_parsed();
        entry_parsed.statements.push(Statement {
            defines: vec![],
            references: ["used".to_string()].into_iter().collect(),
            side_effect: true,
            included: false,
        });
        entry_parsed.imports.push(ImportSite { local: "used".into(), imported: "used".into(), source: "./util.js".into(), start: 0 });
        let mut entry = Module::new(intern("entry.js"), String::new(), entry_parsed);
        entry.resolved_ids.insert("./util.js".into(), ResolvedId { id: intern("util.js"), external: false });
        util.resolved_ids.clear();

        let mut by_id = IndexMap::new();
        by_id.insert(intern("util.js"), 0usize);
        by_id.insert(intern("entry.js"), 1usize);
        let mut store = ModuleStore {
            by_id,
            modules: vec![ModuleOrExternal::Normal(util), ModuleOrExternal::Normal(entry)],
            completed: vec![0, 1],
        };

        link_dependencies(&mut store);
        bind_references(&mut store, false);
        shake(&mut store, &[0, 1], &[1], true);

        let util = store.modules[0].as_normal().unwrap();
        assert!(util.parsed.statements[0].included, "used export must be kept");
        assert!(!util.parsed.statements[1].included, "unused export must be dropped");
    }

    #[test]
    fn disabled_treeshake_keeps_everything() {
        let mut parsed = empty_parsed();
        parsed.statements.push(Statement { defines: vec!["x".into()], ..Default::default() });
        let m = Module::new(intern("a.js"), String::new(), parsed);
        let mut by_id = IndexMap::new();
        by_id.insert(intern("a.js"), 0usize);
        let mut store = ModuleStore { by_id, modules: vec![ModuleOrExternal::Normal(m)], completed: vec![0] };

        shake(&mut store, &[0], &[0], false);
        assert!(store.modules[0].as_normal().unwrap().parsed.statements[0].included);
    }
}
