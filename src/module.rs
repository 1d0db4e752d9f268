//! Modules and the importer.
//!
//! A [`Module`] owns its AST, its context tree (and thereby all lowered IR),
//! and its top-level declarations indexed by name. The [`Importer`] resolves
//! `import` expressions to module ids; [`FileImporter`] is the filesystem
//! implementation, resolving relative locators against a configurable path
//! list and compiling each file once.

use std::path::{Path, PathBuf};
use hashbrown::HashMap;
use crate::Symbol;
use crate::context::ContextTree;
use crate::diag::DiagnosticConsumer;
use crate::types::ast::{Ast, DeclFlags, DeclId, ScopeId};
use crate::types::{Idx, ModuleId};
use crate::types::ty::Arch;

/// A fully analyzed module.
#[derive(Debug)]
pub struct Module {
  /// The importer-issued id.
  pub id: ModuleId,
  /// The syntax tree, immutable after parse.
  pub ast: Ast,
  /// The analysis results and owned IR.
  pub tree: ContextTree,
  /// Top-level declarations by name.
  pub symbols: HashMap<Symbol, Vec<DeclId>>,
  /// Modules whose exported names are visible here without qualification.
  pub embedded: Vec<ModuleId>,
  /// The initializer function holding the lowered top-level statements.
  pub init: Option<crate::ir::FnId>,
}

impl Module {
  /// Index the top-level declarations of `ast`.
  #[must_use] pub fn symbol_table(ast: &Ast) -> HashMap<Symbol, Vec<DeclId>> {
    let mut symbols: HashMap<Symbol, Vec<DeclId>> = HashMap::new();
    for &d in &ast.scope(ScopeId(0)).decls {
      symbols.entry(ast.decl(d).name).or_default().push(d);
    }
    symbols
  }

  /// The exported declarations with the given name.
  #[must_use] pub fn exported(&self, name: Symbol) -> Vec<DeclId> {
    self.symbols.get(&name).map_or_else(Vec::new, |ds| {
      ds.iter().copied()
        .filter(|&d| {
          let decl = self.ast.decl(d);
          decl.hashtags.contains(crate::types::ast::Hashtags::EXPORT)
            || decl.flags.contains(DeclFlags::CONST)
        })
        .collect()
    })
  }
}

/// Schedules imports requested by `import` expressions. Implementations must
/// be idempotent per locator; `get` may only be called for completed modules,
/// and `complete_work` joins any outstanding loads.
pub trait Importer {
  /// Resolve and (if necessary) compile a module. Returns `None` if the
  /// locator cannot be resolved.
  fn import(&mut self, locator: &str) -> Option<ModuleId>;
  /// A completed module.
  fn get(&self, id: ModuleId) -> &Module;
  /// Join all outstanding imports.
  fn complete_work(&mut self);
  /// Modules embedded into every compiled module.
  fn embedded_modules(&self) -> &[ModuleId];
}

/// Resolve a locator against the lookup path list. Absolute locators resolve
/// to themselves.
#[must_use] pub fn resolve_module_path(locator: &str, lookup_paths: &[PathBuf]) -> Option<PathBuf> {
  let p = Path::new(locator);
  if p.is_absolute() { return p.exists().then(|| p.to_owned()) }
  for dir in lookup_paths {
    let candidate = dir.join(p);
    if candidate.exists() { return Some(candidate) }
  }
  // Fall back to the working directory.
  p.exists().then(|| p.to_owned())
}

/// The default lookup paths from `ICARUS_MODULE_PATH` (colon-separated).
#[must_use] pub fn module_paths_from_env() -> Vec<PathBuf> {
  match std::env::var("ICARUS_MODULE_PATH") {
    Ok(v) => v.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect(),
    Err(_) => vec![],
  }
}

/// A front-end supplied by the driver: turns source text into an AST.
pub type ParseFn = Box<dyn FnMut(&str, &mut dyn DiagnosticConsumer) -> Ast>;

/// The filesystem importer. Loads each canonical file once, compiles it, and
/// hands out stable ids. This reference implementation loads sequentially;
/// requests are idempotent, so a concurrent implementation of [`Importer`]
/// may service sibling imports in parallel and join them in
/// [`Importer::complete_work`].
pub struct FileImporter {
  /// Directories searched for relative locators.
  pub module_lookup_paths: Vec<PathBuf>,
  parse: ParseFn,
  diag: Box<dyn DiagnosticConsumer>,
  arch: Arch,
  next_id: ModuleId,
  by_locator: HashMap<PathBuf, ModuleId>,
  modules: HashMap<ModuleId, Module>,
  embedded: Vec<ModuleId>,
}

impl std::fmt::Debug for FileImporter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileImporter")
      .field("module_lookup_paths", &self.module_lookup_paths)
      .field("loaded", &self.by_locator)
      .finish()
  }
}

impl FileImporter {
  /// An importer resolving against `paths`, parsing with `parse`.
  pub fn new(paths: Vec<PathBuf>, parse: ParseFn, diag: Box<dyn DiagnosticConsumer>,
      arch: Arch) -> Self {
    FileImporter {
      module_lookup_paths: paths,
      parse,
      diag,
      arch,
      next_id: ModuleId(0),
      by_locator: HashMap::new(),
      modules: HashMap::new(),
      embedded: vec![],
    }
  }

  /// The number of diagnostics produced so far.
  #[must_use] pub fn diagnostic_count(&self) -> usize { self.diag.num_consumed() }

  /// Compile a file that is not itself imported (a root source file).
  /// Returns `None` if the file cannot be read.
  pub fn compile_root(&mut self, path: &Path) -> Option<ModuleId> {
    let canonical = path.canonicalize().ok()?;
    if let Some(&id) = self.by_locator.get(&canonical) { return Some(id) }
    let text = std::fs::read_to_string(&canonical).ok()?;
    let id = self.next_id.fresh();
    self.by_locator.insert(canonical, id);
    // Each compile collects into a local consumer; the importer is borrowed
    // by the compile, so the main consumer is fed afterwards.
    let mut local = crate::diag::TrackingConsumer::default();
    let ast = (self.parse)(&text, &mut local);
    let arch = self.arch;
    let module = crate::compile_module(ast, id, self, &mut local, arch);
    for d in local.diagnostics { self.diag.consume(d) }
    // The importer owns the module from here on.
    self.modules.insert(id, module);
    Some(id)
  }
}

impl Importer for FileImporter {
  fn import(&mut self, locator: &str) -> Option<ModuleId> {
    let path = resolve_module_path(locator, &self.module_lookup_paths)?;
    let canonical = path.canonicalize().ok()?;
    if let Some(&id) = self.by_locator.get(&canonical) { return Some(id) }
    log::info!("importing {}", canonical.display());
    self.compile_root(&canonical)
  }

  fn get(&self, id: ModuleId) -> &Module {
    self.modules.get(&id).expect("module is not complete")
  }

  fn complete_work(&mut self) {}

  fn embedded_modules(&self) -> &[ModuleId] { &self.embedded }
}

/// An importer over preloaded modules, used by tests.
#[derive(Debug, Default)]
pub struct TestImporter {
  /// Loaded modules by id.
  pub modules: HashMap<ModuleId, Module>,
  /// Locator to id.
  pub by_name: HashMap<String, ModuleId>,
}

impl TestImporter {
  /// Register a preloaded module under a locator.
  pub fn add(&mut self, locator: &str, module: Module) -> ModuleId {
    let id = module.id;
    self.by_name.insert(locator.to_owned(), id);
    self.modules.insert(id, module);
    id
  }
}

impl Importer for TestImporter {
  fn import(&mut self, locator: &str) -> Option<ModuleId> {
    self.by_name.get(locator).copied()
  }
  fn get(&self, id: ModuleId) -> &Module {
    self.modules.get(&id).expect("module is not complete")
  }
  fn complete_work(&mut self) {}
  fn embedded_modules(&self) -> &[ModuleId] { &[] }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::TrackingConsumer;
  use crate::intern;
  use crate::types::ast::{AstBuilder, DeclFlags};

  // A stand-in front-end: one `name ::= int` constant per line.
  fn line_parser() -> ParseFn {
    Box::new(|text, _diag| {
      let mut b = AstBuilder::new();
      for line in text.lines() {
        if let Some((name, val)) = line.split_once("::=") {
          let init = b.int(val.trim().parse().expect("test source"));
          let d = b.decl(intern(name.trim()), None, Some(init), DeclFlags::CONST);
          b.top(d.0);
        }
      }
      b.finish()
    })
  }

  #[test]
  fn file_importer_loads_each_file_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("lib.ic"), "k ::= 3\n").expect("write");

    let mut imp = FileImporter::new(vec![dir.path().to_owned()], line_parser(),
      Box::new(TrackingConsumer::default()), Arch::HOST);
    let a = imp.import("lib.ic").expect("resolved");
    let b = imp.import("lib.ic").expect("resolved");
    assert_eq!(a, b);
    assert_eq!(imp.diagnostic_count(), 0);

    let m = imp.get(a);
    assert_eq!(m.exported(intern("k")).len(), 1);
    assert_eq!(m.tree.load_constant(crate::context::CtxId::ROOT,
      m.exported(intern("k"))[0]), crate::ir::Value::from(3));
  }

  #[test]
  fn unresolvable_locators_fail_without_loading() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut imp = FileImporter::new(vec![dir.path().to_owned()], line_parser(),
      Box::new(TrackingConsumer::default()), Arch::HOST);
    assert_eq!(imp.import("missing.ic"), None);
  }

  #[test]
  fn module_paths_resolve_relative_locators() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("m.ic");
    std::fs::write(&path, "").expect("write");
    let found = resolve_module_path("m.ic", &[dir.path().to_owned()]).expect("found");
    assert_eq!(found, path);
    assert!(resolve_module_path("nope.ic", &[dir.path().to_owned()]).is_none());
  }
}
