//! The verifier: computes a [`QualType`] for every expression, fills the
//! context tree, and enqueues deferred work.
//!
//! Verification, overload resolution, generic instantiation, compile-time
//! evaluation and lowering are tied together in one [`Compiler`] value
//! because they do not happen in a fixed order: computing a type may require
//! emitting and executing code, which may require verifying more of the tree.

mod decl;
mod op;
mod call;
mod literal;
mod misc;
mod scope_node;
mod structs;

use hashbrown::HashMap;
use crate::context::{ContextTree, CtxId};
use crate::diag::{DiagKind, Diagnostic, DiagnosticConsumer};
use crate::ir::Value;
use crate::module::Importer;
use crate::queue::{WorkItem, WorkKind, WorkQueue, WorkResult};
use crate::types::ast::{Ast, DeclFlags, DeclId, ExprId, ExprKind, Literal};
use crate::types::ty::{self, QualType, Quals, Type, TypeKind};
use crate::types::{ModuleId, Span};
use crate::types::entity::BuiltinFn;

/// The compiler for one module: verification, dispatch, instantiation,
/// evaluation and lowering against a single context tree.
pub struct Compiler<'a> {
  /// The module's syntax tree.
  pub ast: &'a Ast,
  /// The module's context tree.
  pub tree: &'a mut ContextTree,
  /// The module being compiled.
  pub module: ModuleId,
  /// The context verification currently writes into.
  pub ctx: CtxId,
  /// The module importer.
  pub importer: &'a mut dyn Importer,
  /// The diagnostic sink.
  pub diag: &'a mut dyn DiagnosticConsumer,
  /// Deferred verification and lowering tasks.
  pub queue: WorkQueue,
  /// The target architecture.
  pub arch: crate::types::ty::Arch,
  // The chain of expressions currently being verified through identifier
  // references, for cyclic dependency detection.
  cyclic: Vec<ExprId>,
  // Modules to consult for argument-dependent lookup, per callee identifier.
  pub(crate) adl_modules: HashMap<ExprId, Vec<ModuleId>>,
  // Identifiers resolved to declarations of other modules.
  pub(crate) xmodule_decls: HashMap<ExprId, (ModuleId, DeclId)>,
  // Landing information for the scopes lowering is currently inside of.
  pub(crate) scope_landings: Vec<crate::lower::ScopeLanding>,
}

impl<'a> Compiler<'a> {
  /// A compiler for `ast` writing into `tree`.
  pub fn new(ast: &'a Ast, tree: &'a mut ContextTree, module: ModuleId,
      importer: &'a mut dyn Importer, diag: &'a mut dyn DiagnosticConsumer,
      arch: crate::types::ty::Arch) -> Self {
    Compiler {
      ast, tree, module, importer, diag, arch,
      ctx: CtxId::ROOT,
      queue: WorkQueue::new(),
      cyclic: vec![],
      adl_modules: HashMap::new(),
      xmodule_decls: HashMap::new(),
      scope_landings: vec![],
    }
  }

  /// The cached qualified type of `e` in the current context.
  #[must_use] pub fn qt(&self, e: ExprId) -> Option<QualType> {
    self.tree.qual_type(self.ctx, e)
  }

  /// Cache a qualified type for `e` in the current context.
  pub fn set_qt(&mut self, e: ExprId, qt: QualType) -> QualType {
    self.tree.set_qual_type(self.ctx, e, qt)
  }

  /// Report a diagnostic at `e`.
  pub fn report(&mut self, e: ExprId, kind: DiagKind) {
    self.diag.consume(Diagnostic { kind, range: self.ast[e].span });
  }

  /// Report a diagnostic and poison `e`.
  pub fn err(&mut self, e: ExprId, kind: DiagKind) -> QualType {
    self.report(e, kind);
    self.set_qt(e, QualType::error())
  }

  /// The span of a node.
  #[must_use] pub fn span(&self, e: ExprId) -> Span { self.ast[e].span }

  /// Run `f` with the current context switched to `ctx`.
  pub fn in_ctx<R>(&mut self, ctx: CtxId, f: impl FnOnce(&mut Self) -> R) -> R {
    let old = std::mem::replace(&mut self.ctx, ctx);
    let r = f(self);
    self.ctx = old;
    r
  }

  /// The type given to statements.
  #[must_use] pub fn unit_qt() -> QualType { QualType::non_constant(ty::tup(vec![])) }

  /// Verify `nodes` in order: constant declarations first, then the rest,
  /// then drain the work queue.
  pub fn verify_all(&mut self, nodes: &[ExprId]) {
    for &node in nodes {
      if let ExprKind::Decl(d) = &self.ast[node].k {
        if d.flags.contains(DeclFlags::CONST) { self.verify_type(node); }
      }
    }
    for &node in nodes {
      if let ExprKind::Decl(d) = &self.ast[node].k {
        if d.flags.contains(DeclFlags::CONST) { continue }
      }
      self.verify_type(node);
    }
    self.complete_work_queue();
  }

  /// Drain the work queue.
  pub fn complete_work_queue(&mut self) {
    while let Some(item) = self.queue.pop() {
      let result = self.process(&item);
      self.queue.finish(item, result);
    }
  }

  fn process(&mut self, item: &WorkItem) -> WorkResult {
    log::debug!("processing {item:?}");
    let ctx = item.ctx;
    match item.kind {
      WorkKind::VerifyType(e) => self.in_ctx(ctx, |c| {
        let qt = c.verify_type(e);
        if qt.ok() { WorkResult::Success } else { WorkResult::Failure }
      }),
      WorkKind::VerifyBody(e) => self.in_ctx(ctx, |c| c.verify_body(e)),
      WorkKind::EmitValue(e) => self.in_ctx(ctx, |c| c.emit_constant_decl(e)),
      WorkKind::CompleteStructMembers(e) => self.in_ctx(ctx, |c| c.complete_struct(e)),
    }
  }

  /// Compute (or return the cached) qualified type of a node in the current
  /// context.
  pub fn verify_type(&mut self, e: ExprId) -> QualType {
    if let Some(qt) = self.qt(e) { return qt }
    let qt = match &self.ast[e].k {
      ExprKind::Terminal(lit) => self.verify_terminal(e, &lit.clone()),
      ExprKind::Ident(name) => self.verify_identifier(e, *name),
      ExprKind::Decl(_) => self.verify_declaration(e),
      ExprKind::Binop { op, lhs, rhs } => self.verify_binop(e, *op, *lhs, *rhs),
      ExprKind::Unop { op, operand } => self.verify_unop(e, *op, *operand),
      ExprKind::Call { .. } => self.verify_call_expr(e),
      ExprKind::Cast { expr, ty } => self.verify_cast(e, *expr, *ty),
      ExprKind::Index { base, index } => self.verify_index(e, *base, *index),
      ExprKind::Access { base, member } => self.verify_access(e, *base, *member),
      ExprKind::ArrayLit(_) => self.verify_array_literal(e),
      ExprKind::ArrayType { len, elem } => self.verify_array_type(e, *len, *elem),
      ExprKind::FnLit(_) => self.verify_fn_literal(e),
      ExprKind::JumpLit(_) => self.verify_jump_literal(e),
      ExprKind::ScopeLit(_) => self.verify_scope_literal(e),
      ExprKind::BlockLit(_) => self.verify_block_literal(e),
      ExprKind::StructLit { .. } | ExprKind::ParamStructLit { .. } =>
        self.verify_struct_literal(e),
      ExprKind::DesignatedInit { ty, .. } => self.verify_designated_initializer(e, *ty),
      ExprKind::EnumLit { .. } => self.verify_enum_literal(e),
      ExprKind::ScopeNode { .. } => self.verify_scope_node(e),
      ExprKind::BlockNode { .. } => Self::unit_qt(),
      ExprKind::Return(_) => self.verify_return(e),
      ExprKind::Yield { .. } => self.verify_yield(e),
      ExprKind::Goto { .. } => self.verify_goto(e),
      ExprKind::Import(operand) => self.verify_import(e, *operand),
    };
    self.set_qt(e, qt)
  }

  /// Deferred body verification, driven by the work queue.
  pub fn verify_body(&mut self, e: ExprId) -> WorkResult {
    match &self.ast[e].k {
      ExprKind::FnLit(_) => self.verify_fn_body(e),
      ExprKind::JumpLit(_) => self.verify_jump_body(e),
      ExprKind::StructLit { .. } | ExprKind::ParamStructLit { .. } =>
        self.verify_struct_body(e),
      ExprKind::EnumLit { .. } => self.verify_enum_body(e),
      _ => WorkResult::Success,
    }
  }

  fn verify_terminal(&mut self, _e: ExprId, lit: &Literal) -> QualType {
    match lit {
      Literal::Int(_) => QualType::constant(ty::i64_ty()),
      Literal::Bool(_) => QualType::constant(ty::bool_ty()),
      Literal::Char(_) => QualType::constant(ty::char_ty()),
      Literal::String(_) => QualType::constant(ty::str_ty()),
      Literal::Type(_) => QualType::constant(ty::type_ty()),
      Literal::Null => QualType::constant(ty::null_ptr_ty()),
    }
  }

  /// The qualified type of a declaration as seen from a use site, verifying
  /// the declaration on demand when the use is legal.
  pub(crate) fn decl_use_qt(&mut self, d: DeclId, use_site: ExprId) -> Result<QualType, DiagKind> {
    let decl = self.ast.decl(d);
    let constant = decl.flags.contains(DeclFlags::CONST);
    let qt = match self.qt(d.0) {
      Some(qt) => qt,
      None if constant || decl.flags.contains(DeclFlags::PARAM) || d.0 < use_site =>
        self.verify_type(d.0),
      None => return Err(DiagKind::DeclOutOfOrder(decl.name)),
    };
    if !qt.ok() { return Ok(qt) }
    // Local non-constants denote storage.
    if constant { Ok(qt) } else { Ok(QualType::new(qt.ty, qt.quals | Quals::REF)) }
  }

  fn verify_identifier(&mut self, e: ExprId, name: crate::Symbol) -> QualType {
    // Rediscovering an expression already on the verification stack means
    // the program is cyclic.
    if self.cyclic.contains(&e) {
      if self.tree.note_cyclic_error(self.ctx, e) {
        self.report(e, DiagKind::CyclicDependency);
      }
      return QualType::error()
    }
    self.cyclic.push(e);
    let qt = self.verify_identifier_inner(e, name);
    self.cyclic.pop();
    qt
  }

  fn verify_identifier_inner(&mut self, e: ExprId, name: crate::Symbol) -> QualType {
    let lookup = self.ast.lookup(self.ast.scope_of(e), name);
    match &*lookup.visible {
      [] => {}
      &[d] => {
        self.tree.set_decls(self.ctx, e, vec![d]);
        return match self.decl_use_qt(d, e) {
          Ok(qt) => qt,
          Err(kind) => self.err(e, kind),
        }
      }
      ds => {
        // Multiple declarations are legal only when every one of them is
        // callable; the identifier becomes an overload set.
        let mut members = Vec::with_capacity(ds.len());
        let mut os = crate::context::OverloadSet::new();
        for &d in ds {
          let qt = match self.decl_use_qt(d, e) {
            Ok(qt) => qt,
            Err(kind) => return self.err(e, kind),
          };
          if !qt.ok() { return qt }
          if !qt.ty.callable() {
            return self.err(e, DiagKind::NonCallableInOverloadSet)
          }
          members.push(qt.ty);
          os.insert(self.module, d.0);
        }
        self.tree.set_decls(self.ctx, e, ds.to_vec());
        self.tree.set_all_overloads(self.ctx, e, os);
        return QualType::constant(ty::overload_set(members))
      }
    }

    // No local declarations: builtins, then embedded modules.
    if let Some(b) = BuiltinFn::from_symbol(name) {
      if let Some(t) = b.ty() { return QualType::constant(t) }
      // `foreign` has no standalone type; only calls of it verify.
      return QualType::constant(ty::overload_set(vec![]))
    }
    let embedded = self.importer.embedded_modules().to_vec();
    for m in embedded {
      let found = self.importer.get(m).exported(name);
      if let &[d] = &*found {
        let qt = self.importer.get(m).tree.qual_type(CtxId::ROOT, d.0);
        if let Some(qt) = qt {
          self.xmodule_decls.insert(e, (m, d));
          return qt
        }
      }
    }

    // Argument-dependent lookup: a callee may be named only in the defining
    // modules of its argument types.
    let adl = self.adl_modules.get(&e).cloned().unwrap_or_default();
    let mut members = vec![];
    let mut os = crate::context::OverloadSet::new();
    for m in adl {
      for d in self.importer.get(m).exported(name) {
        if let Some(qt) = self.importer.get(m).tree.qual_type(CtxId::ROOT, d.0) {
          if qt.ok() && qt.ty.callable() {
            members.push(qt.ty);
            os.insert(m, d.0);
          }
        }
      }
    }
    match &*members {
      [] => {}
      &[t] => {
        let &(m, d) = os.members().first().expect("nonempty");
        self.xmodule_decls.insert(e, (m, DeclId(d)));
        self.tree.set_all_overloads(self.ctx, e, os);
        return QualType::constant(t)
      }
      _ => {
        self.tree.set_all_overloads(self.ctx, e, os);
        return QualType::constant(ty::overload_set(members))
      }
    }

    if lookup.uncapturable.is_empty() {
      self.err(e, DiagKind::UndeclaredIdentifier(name))
    } else {
      self.err(e, DiagKind::UncapturedIdentifier(name))
    }
  }

  /// Evaluate and store the value of a constant declaration (queue item).
  fn emit_constant_decl(&mut self, e: ExprId) -> WorkResult {
    let d = DeclId(e);
    let Some(qt) = self.qt(e) else { return WorkResult::Deferred };
    if !qt.ok() { return WorkResult::Failure }
    if let Some(c) = self.tree.constant(self.ctx, d) {
      if c.complete { return WorkResult::Success }
    }
    let decl = self.ast.decl(d);
    let Some(init) = decl.init else {
      // A default-initialized constant carries its type's default; nothing
      // further to compute.
      self.tree.complete_constant(self.ctx, d);
      return WorkResult::Success
    };
    match self.evaluate(init, qt.ty, false) {
      Ok(v) => {
        self.tree.set_constant(self.ctx, d, v, true);
        WorkResult::Success
      }
      Err(f) => {
        self.report(e, DiagKind::EvaluationFailure(f.to_string()));
        WorkResult::Failure
      }
    }
  }

  /// Require that `e` is a constant expression of type `type`, and evaluate
  /// it to a [`Type`]. Reports on failure.
  pub(crate) fn expect_type_expr(&mut self, e: ExprId) -> Option<Type> {
    let qt = self.verify_type(e);
    if !qt.ok() { return None }
    if qt.ty != ty::type_ty() {
      self.report(e, DiagKind::NotAType(qt.ty));
      return None
    }
    if !qt.constant_q() {
      self.report(e, DiagKind::NonConstantTypeInDeclaration);
      return None
    }
    match self.evaluate(e, ty::type_ty(), false) {
      Ok(v) => v.as_type(),
      Err(f) => {
        self.report(e, DiagKind::EvaluationFailure(f.to_string()));
        None
      }
    }
  }

  /// The constant value of a declaration, possibly of another module.
  pub(crate) fn foreign_constant(&self, m: ModuleId, d: DeclId) -> Value {
    if m == self.module { return self.tree.load_constant(CtxId::ROOT, d) }
    self.importer.get(m).tree.load_constant(CtxId::ROOT, d)
  }

  /// The element type seen through pointers, used by deref-like rules.
  pub(crate) fn pointee(t: Type) -> Option<(Type, bool)> {
    match t.kind() {
      TypeKind::Ptr(p) => Some((*p, false)),
      TypeKind::BufPtr(p) => Some((*p, true)),
      _ => None,
    }
  }
}
