//! The Linker (§4.2): `linkDependencies` then `bindReferences`.

use std::collections::HashSet;

use crate::error::{Warning, WarningKind};
use crate::id::ModuleId;
use crate::loader::ModuleStore;
use crate::module::{ExportBinding, ModuleOrExternal};

/// Follow a module's export surface for `name` down to the module that
/// actually defines it, chasing `export {x} from`/`export *` re-export
/// chains. `visited` guards against a cyclic re-export chain.
fn resolve_export(store: &ModuleStore, start: usize, name: &str, visited: &mut HashSet<usize>) -> Option<ExportBinding> {
    if !visited.insert(start) {
        return None;
    }
    let module = match &store.modules[start] {
        ModuleOrExternal::Normal(m) => m,
        ModuleOrExternal::External(e) => {
            return Some(ExportBinding { owner: e.id.clone(), local_name: name.to_string() });
        }
    };

    if module.exports.iter().any(|n| n == name) {
        return Some(ExportBinding { owner: module.id.clone(), local_name: name.to_string() });
    }

    if let Some(reexport) = module.reexports.iter().find(|r| r.exported_as == name) {
        let resolved = module.resolved_ids.get(&reexport.source)?;
        if resolved.external {
            return Some(ExportBinding { owner: resolved.id.clone(), local_name: reexport.imported.clone() });
        }
        let dep_idx = *store.by_id.get(&resolved.id)?;
        return resolve_export(store, dep_idx, &reexport.imported, visited);
    }

    if let Some(owner) = module.exports_all.get(name) {
        if owner == &module.id {
            return None;
        }
        let dep_idx = *store.by_id.get(owner)?;
        return resolve_export(store, dep_idx, name, visited);
    }

    None
}

/// Pass 1: resolve every module's public export surface (own exports, named
/// re-exports, `export *` merges) down to the module that actually owns each
/// binding. Emits `NAMESPACE_CONFLICT` is handled by the loader when
/// `exports_all` is built; this pass only resolves names, it does not detect
/// conflicts again.
pub fn link_dependencies(store: &mut ModuleStore) {
    let indices: Vec<usize> = (0..store.modules.len()).collect();
    for idx in indices {
        if store.modules[idx].is_external() {
            continue;
        }
        let names: Vec<String> = {
            let m = store.modules[idx].as_normal().unwrap();
            let mut names: Vec<String> = m.exports.clone();
            names.extend(m.reexports.iter().map(|r| r.exported_as.clone()));
            names.extend(m.exports_all.keys().cloned());
            names.sort();
            names.dedup();
            names
        };
        let mut linked = std::collections::HashMap::new();
        for name in names {
            let mut visited = HashSet::new();
            if let Some(binding) = resolve_export(store, idx, &name, &mut visited) {
                linked.insert(name, binding);
            }
        }
        if let Some(m) = store.modules[idx].as_normal_mut() {
            m.linked_exports = linked;
        }
    }
}

/// Pass 2: resolve every import's local binding against the source module's
/// linked export surface, warning (not failing) on a missing export per §7.
pub fn bind_references(store: &mut ModuleStore, shim_missing_exports: bool) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let indices: Vec<usize> = (0..store.modules.len()).collect();

    for idx in indices {
        if store.modules[idx].is_external() {
            continue;
        }
        let (module_id, import_descriptions, resolved_ids) = {
            let m = store.modules[idx].as_normal().unwrap();
            (m.id.clone(), m.import_descriptions.clone(), m.resolved_ids.clone())
        };

        let mut linked_imports = std::collections::HashMap::new();
        let mut shimmed = Vec::new();

        for (local_name, description) in &import_descriptions {
            let Some(resolved) = resolved_ids.get(&description.source) else { continue };

            if resolved.external {
                if let Some(ext) = find_external_mut(store, &resolved.id) {
                    ext.mark_used(&description.imported_name);
                }
                linked_imports.insert(
                    local_name.clone(),
                    ExportBinding { owner: resolved.id.clone(), local_name: description.imported_name.clone() },
                );
                continue;
            }

            if description.imported_name == "*" {
                linked_imports.insert(
                    local_name.clone(),
                    ExportBinding { owner: resolved.id.clone(), local_name: "*".to_string() },
                );
                mark_namespace_referenced(store, &resolved.id);
                continue;
            }

            let Some(&dep_idx) = store.by_id.get(&resolved.id) else { continue };
            let mut visited = HashSet::new();
            match resolve_export(store, dep_idx, &description.imported_name, &mut visited) {
                Some(binding) => {
                    linked_imports.insert(local_name.clone(), binding);
                }
                None => {
                    warnings.push(Warning::new(WarningKind::NonExistentExport {
                        exported_name: description.imported_name.clone(),
                        module: resolved.id.clone(),
                    }));
                    if shim_missing_exports {
                        shimmed.push(description.imported_name.clone());
                        linked_imports.insert(
                            local_name.clone(),
                            ExportBinding { owner: resolved.id.clone(), local_name: description.imported_name.clone() },
                        );
                    }
                }
            }
        }

        for name in &shimmed {
            warnings.push(Warning::new(WarningKind::ShimmedExport {
                exported_name: name.clone(),
                module: module_id.clone(),
            }));
        }

        if let Some(m) = store.modules[idx].as_normal_mut() {
            m.linked_imports = linked_imports;
        }
    }

    warnings
}

fn find_external_mut<'a>(store: &'a mut ModuleStore, id: &ModuleId) -> Option<&'a mut crate::module::ExternalModule> {
    let idx = *store.by_id.get(id)?;
    store.modules[idx].as_external_mut()
}

fn mark_namespace_referenced(store: &mut ModuleStore, id: &ModuleId) {
    if let Some(&idx) = store.by_id.get(id) {
        if let Some(m) = store.modules[idx].as_normal_mut() {
            m.namespace_referenced = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExportSite, ImportSite, ParsedModule, Statement};
    use crate::id::intern;
    use crate::module::{Module, ResolvedId};
    use indexmap::IndexMap;
    use swc_ecma_ast::Program;

    fn empty_parsed() -> ParsedModule {
        ParsedModule {
            program: Program::Module(swc_ecma_ast::Module { span: swc_common::DUMMY_SP, body: vec![], shebang: None }),
            statements: vec![],
            imports: vec![],
            exports: vec![],
            reexports: vec![],
            export_all_sources: vec![],
            dynamic_imports: vec![],
        }
    }

    #[test]
    fn binds_direct_import_to_its_export() {
        let mut a_parsed = empty_parsed();
        a_parsed.statements.push(Statement { defines: vec!["value".into()], included: false, side_effect: false, ..Default::default() });
        a_parsed.exports.push(ExportSite { exported_as: "value".into(), statement: 0 });
        let mut a = Module::new(intern("a.js"), String::new(), a_parsed);
        a.resolved_ids.insert("./a.js".into(), ResolvedId { id: intern("a.js"), external: false });

        let mut b_parsed = empty_parsed();
        b_parsed.imports.push(ImportSite { local: "value".into(), imported: "value".into(), source: "./a.js".into(), start: 0 });
        let mut b = Module::new(intern("b.js"), String::new(), b_parsed);
        b.resolved_ids.insert("./a.js".into(), ResolvedId { id: intern("a.js"), external: false });

        let mut by_id = IndexMap::new();
        by_id.insert(intern("a.js"), 0usize);
        by_id.insert(intern("b.js"), 1usize);
        let mut store = ModuleStore { by_id, modules: vec![ModuleOrExternal::Normal(a), ModuleOrExternal::Normal(b)], completed: vec![0, 1] };

        link_dependencies(&mut store);
        let warnings = bind_references(&mut store, false);
        assert!(warnings.is_empty());

        let b = store.modules[1].as_normal().unwrap();
        let binding = &b.linked_imports["value"];
        assert_eq!(binding.owner.as_ref(), "a.js");
        assert_eq!(binding.local_name, "value");
    }

    #[test]
    fn warns_on_non_existent_export() {
        let a_parsed = empty_parsed();
        let mut a = Module::new(intern("a.js"), String::new(), a_parsed);
        a.resolved_ids.clear();

        let mut b_parsed = empty_parsed();
        b_parsed.imports.push(ImportSite { local: "missing".into(), imported: "missing".into(), source: "./a.js".into(), start: 0 });
        let mut b = Module::new(intern("b.js"), String::new(), b_parsed);
        b.resolved_ids.insert("./a.js".into(), ResolvedId { id: intern("a.js"), external: false });

        let mut by_id = IndexMap::new();
        by_id.insert(intern("a.js"), 0usize);
        by_id.insert(intern("b.js"), 1usize);
        let mut store = ModuleStore { by_id, modules: vec![ModuleOrExternal::Normal(a), ModuleOrExternal::Normal(b)], completed: vec![0, 1] };

        link_dependencies(&mut store);
        let warnings = bind_references(&mut store, false);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind.code(), "NON_EXISTENT_EXPORT");
    }
}
