//! The middle-end of the Icarus compiler.
//!
//! Given a parsed syntax tree and a module importer, this crate performs
//! semantic analysis (name resolution, type checking, overload resolution,
//! generic instantiation, compile-time evaluation) and lowers the tree to a
//! typed, block-structured IR that a back-end can translate to object code.
//!
//! The main entry point is [`compile_module`]; the pieces are:
//!
//! * [`types::ty`]: the hash-consed type universe;
//! * [`ir`]: the IR model, builder, and jump inliner;
//! * [`context`]: the per-instantiation context tree;
//! * [`verify`]: the verifier, which computes a [`types::ty::QualType`] for
//!   every expression;
//! * [`dispatch`]: overload resolution;
//! * [`instantiate`]: monomorphisation of generic functions and structs;
//! * [`lower`]: IR emission;
//! * [`eval`] and [`interp`]: compile-time evaluation;
//! * [`queue`]: the work queue driving deferred tasks.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod context;
pub mod diag;
pub mod dispatch;
pub mod eval;
pub mod instantiate;
pub mod interp;
pub mod ir;
pub mod lower;
pub mod module;
pub mod queue;
pub mod symbol;
pub mod types;
pub mod verify;

pub use symbol::{Interner, Symbol, intern};
pub use types::Idx;

use context::{ContextTree, CtxId};
use diag::DiagnosticConsumer;
use module::{Importer, Module};
use types::ModuleId;
use types::ast::Ast;
use types::ty::Arch;

/// Analyze and lower one module: verify every top-level node (constants
/// first), drain the work queue, then lower the non-constant top-level
/// statements into the module's initializer function.
pub fn compile_module(ast: Ast, id: ModuleId, importer: &mut dyn Importer,
    diag: &mut dyn DiagnosticConsumer, arch: Arch) -> Module {
  let mut tree = ContextTree::new(id);
  let symbols = Module::symbol_table(&ast);
  let embedded = importer.embedded_modules().to_vec();
  let init;
  {
    let mut c = verify::Compiler::new(&ast, &mut tree, id, importer, diag, arch);
    let top = ast.top.clone();
    c.tree.track_jumps(CtxId::ROOT, &ast, &top);
    c.verify_all(&top);
    init = c.lower_module_init(&top);
  }
  Module { id, ast, tree, symbols, embedded, init }
}

/// Run a lowered function of a compiled module on the compile-time
/// interpreter. This is the hook the driver uses for `$`-style whole-program
/// execution and what tests observe lowered IR through.
pub fn interpret_fn(module: &mut Module, importer: &mut dyn Importer,
    diag: &mut dyn DiagnosticConsumer, f: ir::FnRef, args: Vec<ir::Value>)
    -> Result<Vec<ir::Value>, String> {
  let ast = &module.ast;
  let tree = &mut module.tree;
  let mut c = verify::Compiler::new(ast, tree, module.id, importer, diag, Arch::HOST);
  c.interpret_at_compile_time(f, args)
}
