//! The out-of-scope AST/parser collaborator, reduced to a reference adapter.
//!
//! Real bundlers delegate parsing and the fine-grained `include()` semantics
//! of tree-shaking to a dedicated AST crate (acorn+magic-string for rollup,
//! oxc for rolldown/soku). That component is explicitly out of scope here
//! (§1); what follows is a deliberately small stand-in built on `swc_ecma_*`
//! that extracts enough structure — top-level statements, what each one
//! defines and references, import/export/re-export/dynamic-import sites —
//! for the Graph core to drive linking and tree-shaking against something
//! real, without pretending to be a production front end.

use std::collections::HashSet;

use swc_common::sync::Lrc;
use swc_common::{FileName, SourceMap};
use swc_ecma_ast::*;
use swc_ecma_parser::{EsConfig, Parser, StringInput, Syntax};
use swc_ecma_visit::{Visit, VisitWith};

/// A single static or dynamic import specifier as written in source.
#[derive(Debug, Clone)]
pub struct ImportSite {
    pub local: String,
    /// The imported name, `"default"` for a default import, `"*"` for a
    /// namespace import.
    pub imported: String,
    pub source: String,
    pub start: usize,
}

#[derive(Debug, Clone)]
pub struct ExportSite {
    pub exported_as: String,
    pub statement: usize,
}

#[derive(Debug, Clone)]
pub struct ReexportSite {
    pub imported: String,
    pub exported_as: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct DynamicImportSite {
    pub expression: String,
    /// Statically known target when the argument is a string literal.
    pub literal_target: Option<String>,
}

/// One top-level statement, as the unit tree-shaking includes or drops.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    pub defines: Vec<String>,
    pub references: HashSet<String>,
    /// Side-effecting statements (anything that is not a pure declaration)
    /// are always included once their module executes.
    pub side_effect: bool,
    pub included: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedModule {
    pub program: Program,
    pub statements: Vec<Statement>,
    pub imports: Vec<ImportSite>,
    pub exports: Vec<ExportSite>,
    pub reexports: Vec<ReexportSite>,
    pub export_all_sources: Vec<String>,
    pub dynamic_imports: Vec<DynamicImportSite>,
}

impl ParsedModule {
    /// Indices of statements that directly correspond to an exported name.
    pub fn statement_for_export(&self, name: &str) -> Option<usize> {
        self.exports.iter().find(|e| e.exported_as == name).map(|e| e.statement)
    }
}

pub fn parse_module(id: &str, code: &str) -> anyhow::Result<ParsedModule> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(FileName::Custom(id.to_string()), code.to_string());
    let syntax = Syntax::Es(EsConfig { jsx: id.ends_with(".jsx") || id.ends_with(".tsx"), ..Default::default() });
    let mut parser = Parser::new(syntax, StringInput::from(&*fm), None);
    let program = parser
        .parse_program()
        .map_err(|e| anyhow::anyhow!("parse error in {id}: {e:?}"))?;

    let module = match &program {
        Program::Module(m) => m.clone(),
        Program::Script(_) => Module { span: Default::default(), body: vec![], shebang: None },
    };

    let mut statements = Vec::with_capacity(module.body.len());
    let mut imports = Vec::new();
    let mut export_all_sources = Vec::new();
    let mut dynamic_imports = Vec::new();
    // (local binding name, exported-as name) pairs awaiting resolution once
    // every statement's `defines` set is known.
    let mut pending_named_exports: Vec<(String, String)> = Vec::new();
    let mut exports = Vec::new();
    let mut reexports = Vec::new();

    for item in &module.body {
        let mut statement = Statement::default();
        collect_dynamic_imports(item, &mut dynamic_imports);

        match item {
            ModuleItem::ModuleDecl(ModuleDecl::Import(decl)) => {
                let source = decl.src.value.to_string();
                for specifier in &decl.specifiers {
                    match specifier {
                        ImportSpecifier::Named(named) => {
                            let imported = named
                                .imported
                                .as_ref()
                                .map(module_export_name_to_string)
                                .unwrap_or_else(|| named.local.sym.to_string());
                            imports.push(ImportSite {
                                local: named.local.sym.to_string(),
                                imported,
                                source: source.clone(),
                                start: decl.span.lo.0 as usize,
                            });
                        }
                        ImportSpecifier::Default(default) => {
                            imports.push(ImportSite {
                                local: default.local.sym.to_string(),
                                imported: "default".to_string(),
                                source: source.clone(),
                                start: decl.span.lo.0 as usize,
                            });
                        }
                        ImportSpecifier::Namespace(ns) => {
                            imports.push(ImportSite {
                                local: ns.local.sym.to_string(),
                                imported: "*".to_string(),
                                source: source.clone(),
                                start: decl.span.lo.0 as usize,
                            });
                        }
                    }
                }
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
                collect_decl_bindings(&export.decl, &mut statement.defines);
                collect_decl_references(&export.decl, &mut statement.references);
                for name in statement.defines.clone() {
                    exports.push(ExportSite { exported_as: name, statement: statements.len() });
                }
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
                let name = match &export.decl {
                    DefaultDecl::Fn(f) => f.ident.as_ref().map(|i| i.sym.to_string()),
                    DefaultDecl::Class(c) => c.ident.as_ref().map(|i| i.sym.to_string()),
                    DefaultDecl::TsInterfaceDecl(d) => Some(d.id.sym.to_string()),
                };
                if let Some(name) = &name {
                    statement.defines.push(name.clone());
                }
                statement.defines.push("default".to_string());
                exports.push(ExportSite { exported_as: "default".to_string(), statement: statements.len() });
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)) => {
                let mut visitor = UsageVisitor::default();
                export.expr.visit_with(&mut visitor);
                statement.references = visitor.used;
                statement.defines.push("default".to_string());
                exports.push(ExportSite { exported_as: "default".to_string(), statement: statements.len() });
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(named)) => {
                if let Some(src) = &named.src {
                    let source = src.value.to_string();
                    for spec in &named.specifiers {
                        if let ExportSpecifier::Named(named_spec) = spec {
                            let imported = module_export_name_to_string(&named_spec.orig);
                            let exported_as = named_spec
                                .exported
                                .as_ref()
                                .map(module_export_name_to_string)
                                .unwrap_or_else(|| imported.clone());
                            reexports.push(ReexportSite { imported, exported_as, source: source.clone() });
                        }
                    }
                } else {
                    for spec in &named.specifiers {
                        if let ExportSpecifier::Named(named_spec) = spec {
                            let local = module_export_name_to_string(&named_spec.orig);
                            let exported_as = named_spec
                                .exported
                                .as_ref()
                                .map(module_export_name_to_string)
                                .unwrap_or_else(|| local.clone());
                            pending_named_exports.push((local, exported_as));
                        }
                    }
                }
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)) => {
                export_all_sources.push(export.src.value.to_string());
            }
            ModuleItem::ModuleDecl(_) => {}
            ModuleItem::Stmt(stmt) => {
                collect_stmt_bindings(stmt, &mut statement.defines);
                let mut visitor = UsageVisitor::default();
                stmt.visit_with(&mut visitor);
                statement.references = visitor.used;
                statement.side_effect = is_side_effecting(stmt);
            }
        }

        statements.push(statement);
    }

    let defines_index: std::collections::HashMap<String, usize> = statements
        .iter()
        .enumerate()
        .flat_map(|(idx, stmt)| stmt.defines.iter().map(move |name| (name.clone(), idx)))
        .collect();
    let import_locals: std::collections::HashMap<String, &ImportSite> =
        imports.iter().map(|site| (site.local.clone(), site)).collect();

    for (local, exported_as) in pending_named_exports {
        if let Some(&statement) = defines_index.get(&local) {
            exports.push(ExportSite { exported_as, statement });
        } else if let Some(site) = import_locals.get(&local) {
            reexports.push(ReexportSite {
                imported: site.imported.clone(),
                exported_as,
                source: site.source.clone(),
            });
        }
    }

    Ok(ParsedModule {
        program,
        statements,
        imports,
        exports,
        reexports,
        export_all_sources,
        dynamic_imports,
    })
}

fn module_export_name_to_string(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

fn collect_decl_bindings(decl: &Decl, out: &mut Vec<String>) {
    match decl {
        Decl::Var(var) => {
            for d in &var.decls {
                collect_pat_bindings(&d.name, out);
            }
        }
        Decl::Fn(f) => out.push(f.ident.sym.to_string()),
        Decl::Class(c) => out.push(c.ident.sym.to_string()),
        _ => {}
    }
}

fn collect_decl_references(decl: &Decl, out: &mut HashSet<String>) {
    let mut visitor = UsageVisitor::default();
    decl.visit_with(&mut visitor);
    out.extend(visitor.used);
}

fn collect_stmt_bindings(stmt: &Stmt, out: &mut Vec<String>) {
    if let Stmt::Decl(decl) = stmt {
        collect_decl_bindings(decl, out);
    }
}

fn collect_pat_bindings(pat: &Pat, out: &mut Vec<String>) {
    match pat {
        Pat::Ident(ident) => out.push(ident.id.sym.to_string()),
        Pat::Array(arr) => {
            for elem in arr.elems.iter().flatten() {
                collect_pat_bindings(elem, out);
            }
        }
        Pat::Object(obj) => {
            for prop in &obj.props {
                match prop {
                    ObjectPatProp::KeyValue(kv) => collect_pat_bindings(&kv.value, out),
                    ObjectPatProp::Assign(a) => out.push(a.key.sym.to_string()),
                    ObjectPatProp::Rest(r) => collect_pat_bindings(&r.arg, out),
                }
            }
        }
        Pat::Assign(a) => collect_pat_bindings(&a.left, out),
        Pat::Rest(r) => collect_pat_bindings(&r.arg, out),
        _ => {}
    }
}

fn is_side_effecting(stmt: &Stmt) -> bool {
    !matches!(stmt, Stmt::Decl(Decl::Fn(_)) | Stmt::Decl(Decl::Class(_)) | Stmt::Empty(_))
}

#[derive(Default)]
struct UsageVisitor {
    used: HashSet<String>,
}

impl Visit for UsageVisitor {
    fn visit_ident(&mut self, ident: &Ident) {
        self.used.insert(ident.sym.to_string());
    }
}

fn collect_dynamic_imports(item: &ModuleItem, out: &mut Vec<DynamicImportSite>) {
    struct DynImportVisitor<'a> {
        out: &'a mut Vec<DynamicImportSite>,
    }
    impl<'a> Visit for DynImportVisitor<'a> {
        fn visit_call_expr(&mut self, call: &CallExpr) {
            if let Callee::Import(_) = &call.callee {
                if let Some(arg) = call.args.first() {
                    let literal_target = match &*arg.expr {
                        Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
                        _ => None,
                    };
                    self.out.push(DynamicImportSite {
                        expression: format!("{:?}", arg.expr).chars().take(64).collect(),
                        literal_target,
                    });
                }
            }
            call.visit_children_with(self);
        }
    }
    let mut visitor = DynImportVisitor { out };
    item.visit_with(&mut visitor);
}
