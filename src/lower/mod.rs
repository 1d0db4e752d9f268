//! The lowerer: consumes the verified AST and emits IR into per-function
//! block groups. Expression emission returns an operand; lvalue emission
//! returns an address; init/assign emission writes into caller-provided
//! slots. Every statement runs in a RAII-style scope that destroys its
//! temporaries in reverse order of acquisition.

mod call;
mod expr;
mod scope;
mod special;
mod structs;

use crate::Symbol;
use crate::context::CtxId;
use crate::ir::builder::{Builder, Termination};
use crate::ir::{BlockId, FnId, FnRef, JumpRef, Operand, Reg, Value};
use crate::types::ast::{DeclFlags, DeclId, ExprId, ExprKind};
use crate::types::ty::{self, Type, TypeFlags};
use crate::types::{Params, Typed};
use crate::verify::Compiler;

/// Landing information for a scope the lowerer is currently inside of:
/// where `yield` transfers control and where its result value lives.
#[derive(Debug)]
pub struct ScopeLanding {
  /// The scope node.
  pub node: ExprId,
  /// The scope's label, for labeled yields.
  pub label: Option<Symbol>,
  /// The landing pad control reaches after the scope is done.
  pub done: BlockId,
  /// Result storage, when the scope produces a value.
  pub result: Option<(Type, Reg)>,
  /// The exit callables of the scope construct.
  pub exits: Vec<crate::ir::AnyFn>,
}

/// Per-function lowering state: the builder plus the live local slots that
/// destructors run over on `return`.
#[derive(Debug)]
pub(crate) struct Lower {
  pub(crate) b: Builder,
  // Non-constant locals in declaration order.
  pub(crate) locals: Vec<(Type, Reg)>,
}

impl Lower {
  pub(crate) fn new(arch: ty::Arch) -> Self {
    Lower { b: Builder::new(arch), locals: vec![] }
  }
}

impl Compiler<'_> {
  // The context in which a node's qualified type is cached.
  pub(crate) fn ctx_of_qt(&self, e: ExprId) -> CtxId {
    let mut ctx = self.ctx;
    loop {
      if self.tree.qual_type(ctx, e).is_some() { return ctx }
      match self.tree.parent(ctx) {
        Some(p) => ctx = p,
        None => return CtxId::ROOT,
      }
    }
  }

  /// Lower a concrete function literal in the current context, memoised on
  /// the owning context node.
  pub(crate) fn ensure_fn_lowered(&mut self, e: ExprId) -> Option<FnRef> {
    self.verify_body(e);
    let fty = self.qt_anywhere(e)?.ty;
    let data = fty.as_fn()?;
    let ExprKind::FnLit(f) = &self.ast[e].k else { return None };
    let (params_ast, body) = (f.params.clone(), f.body.clone());

    let typed_params: Params<Typed<DeclId>> = params_ast.iter().zip(data.params.iter())
      .map(|(p, tp)| crate::types::Param {
        name: p.name,
        value: Typed::new(p.value, tp.value),
        flags: tp.flags,
      })
      .collect();

    let owner = self.ctx_of_qt(e);
    let (id, inserted) = self.tree.add_func(owner, e, fty, typed_params.clone());
    let fref = FnRef { module: self.module, id };
    if !inserted { return Some(fref) }

    let mut lw = Lower::new(self.arch);
    // Parameter `i` arrives in register `i`; give each a stack slot so the
    // body can take references uniformly.
    for _ in 0..typed_params.len() { lw.b.reserve(); }
    for (i, p) in typed_params.iter().enumerate() {
      let slot = lw.b.alloca(p.value.ty);
      lw.b.store(p.value.ty, Reg(i as u32).into(), slot.into());
      self.tree.set_addr(self.ctx, p.value.val, slot);
    }

    self.emit_stmts(&mut lw, &body);
    if lw.b.more_stmts_allowed() && lw.b.is_open() {
      self.emit_return(&mut lw, &[]);
    }
    self.tree.fn_defs[id].group = lw.b.finish();
    log::debug!("lowered fn {id:?}:\n{}", self.tree.fn_defs[id].group);
    Some(fref)
  }

  /// Lower a jump literal in the current context.
  pub(crate) fn ensure_jump_lowered(&mut self, e: ExprId) -> Option<JumpRef> {
    self.verify_body(e);
    let jty = self.qt_anywhere(e)?.ty;
    let data = jty.as_jump()?;
    let ExprKind::JumpLit(j) = &self.ast[e].k else { return None };
    let (state, params_ast, body) = (j.state, j.params.clone(), j.body.clone());

    let typed_params: Params<Typed<DeclId>> = params_ast.iter().zip(data.params.iter())
      .map(|(p, tp)| crate::types::Param {
        name: p.name,
        value: Typed::new(p.value, tp.value),
        flags: tp.flags,
      })
      .collect();

    let owner = self.ctx_of_qt(e);
    let (id, inserted) = self.tree.add_jump(owner, e, jty, typed_params.clone());
    let jref = JumpRef { module: self.module, id };
    if !inserted { return Some(jref) }

    let mut lw = Lower::new(self.arch);
    // The state pointer, when present, is register 0 and parameters follow.
    let base = usize::from(data.state.is_some());
    for _ in 0..typed_params.len() + base { lw.b.reserve(); }
    if let (Some(state_decl), Some(state_ty)) = (state, data.state) {
      let slot = lw.b.alloca(state_ty);
      lw.b.store(state_ty, Reg(0).into(), slot.into());
      self.tree.set_addr(self.ctx, state_decl, slot);
    }
    for (i, p) in typed_params.iter().enumerate() {
      let slot = lw.b.alloca(p.value.ty);
      lw.b.store(p.value.ty, Reg((i + base) as u32).into(), slot.into());
      self.tree.set_addr(self.ctx, p.value.val, slot);
    }

    self.emit_stmts(&mut lw, &body);
    if lw.b.more_stmts_allowed() && lw.b.is_open() {
      // Falling off the end of a jump body leaves through `done`.
      lw.b.exit_jump(crate::intern("done"));
    }
    self.tree.jump_defs[id].group = lw.b.group;
    Some(jref)
  }

  /// Lower the module's top-level non-constant statements into its
  /// initializer function.
  pub fn lower_module_init(&mut self, top: &[ExprId]) -> Option<FnId> {
    if self.diag.num_consumed() > 0 {
      // Lowering is skipped when verification produced errors.
      return None
    }
    let mut lw = Lower::new(self.arch);
    let stmts: Vec<ExprId> = top.iter().copied()
      .filter(|&e| !self.is_const_decl(e))
      .collect();
    self.emit_stmts(&mut lw, &stmts);
    if lw.b.more_stmts_allowed() && lw.b.is_open() {
      self.emit_return(&mut lw, &[]);
    } else if lw.b.is_open() {
      lw.b.return_jump();
    }
    let group = lw.b.finish();
    let id = self.tree.fn_defs.push(crate::ir::CompiledFn {
      ty: ty::func(Params::new(), vec![]),
      params: Params::new(),
      group,
    });
    Some(id)
  }

  /// Emit a statement list, stopping early once control has left the block.
  pub(crate) fn emit_stmts(&mut self, lw: &mut Lower, stmts: &[ExprId]) {
    for &stmt in stmts {
      if !lw.b.more_stmts_allowed() { break }
      self.emit_stmt(lw, stmt);
    }
  }

  /// Emit one statement inside a temporary-destruction scope.
  pub(crate) fn emit_stmt(&mut self, lw: &mut Lower, e: ExprId) {
    let saved = lw.b.save_temporaries();
    match &self.ast[e].k {
      ExprKind::Decl(_) => self.emit_decl_stmt(lw, DeclId(e)),
      ExprKind::Return(exprs) => {
        let exprs = exprs.clone();
        self.emit_return(lw, &exprs);
      }
      ExprKind::Yield { label, exprs } => {
        let (label, exprs) = (*label, exprs.clone());
        self.emit_yield(lw, label, &exprs);
      }
      _ => { self.emit_value(lw, e); }
    }
    // Destroy the statement's temporaries in reverse order of acquisition.
    let temps = lw.b.save_temporaries();
    if lw.b.more_stmts_allowed() && lw.b.is_open() {
      for t in temps.into_iter().rev() {
        if t.ty.flags().contains(TypeFlags::HAS_DTOR) {
          self.emit_destroy(lw, t.ty, t.val.into());
        }
      }
    }
    lw.b.restore_temporaries(saved);
  }

  fn emit_decl_stmt(&mut self, lw: &mut Lower, d: DeclId) {
    let decl = self.ast.decl(d).clone();
    if decl.flags.contains(DeclFlags::CONST) {
      // Constants were computed at verification time.
      return
    }
    let Some(qt) = self.qt(d.0).or_else(|| self.qt_anywhere(d.0)) else { return };
    if !qt.ok() { return }
    let slot = lw.b.alloca(qt.ty);
    self.tree.set_addr(self.ctx, d, slot);
    lw.locals.push((qt.ty, slot));
    match decl.init {
      Some(init) => {
        let dest = [Typed::new(Operand::Reg(slot), qt.ty)];
        self.emit_move_init(lw, init, &dest);
      }
      None if !decl.flags.contains(DeclFlags::UNINITIALIZED) => {
        self.emit_default_init(lw, qt.ty, slot.into());
      }
      None => {}
    }
  }

  /// Emit a `return`: return values, then destructors for all live locals
  /// in reverse declaration order, then the return jump.
  pub(crate) fn emit_return(&mut self, lw: &mut Lower, exprs: &[ExprId]) {
    for (i, &x) in exprs.iter().enumerate() {
      let v = self.emit_value(lw, x);
      lw.b.push(crate::ir::Instruction::SetRet { index: i as u16, val: v });
    }
    for (t, slot) in lw.locals.clone().into_iter().rev() {
      if t.flags().contains(TypeFlags::HAS_DTOR) {
        self.emit_destroy(lw, t, slot.into());
      }
    }
    lw.b.return_jump();
    lw.b.termination = Termination::Returned;
  }

  fn emit_yield(&mut self, lw: &mut Lower, label: Option<Symbol>, exprs: &[ExprId]) {
    let args: Vec<Operand> = exprs.iter().map(|&x| self.emit_value(lw, x)).collect();
    let landing_idx = match label {
      None => self.scope_landings.len().checked_sub(1),
      Some(l) => self.scope_landings.iter().rposition(|s| s.label == Some(l)),
    };
    let Some(idx) = landing_idx else {
      // A yield outside any scope is verified against; nothing to emit.
      lw.b.termination = Termination::Yielded;
      return
    };
    let (done, result, exits) = {
      let landing = &self.scope_landings[idx];
      (landing.done, landing.result, landing.exits.clone())
    };

    // Control leaves through the scope's exit overload set; its result, if
    // any, lands in the scope's result slot.
    let exit_out = self.emit_exit_call(lw, &exits, &args);
    if let (Some((t, slot)), Some(v)) = (result, exit_out) {
      lw.b.store(t, v, slot.into());
    }
    lw.b.uncond_jump(done);
    lw.b.termination = match label {
      None => Termination::Yielded,
      Some(l) => Termination::LabeledYielded(l),
    };
  }

  // Call the matching exit overload with the yielded arguments.
  fn emit_exit_call(&mut self, lw: &mut Lower, exits: &[crate::ir::AnyFn],
      args: &[Operand]) -> Option<Operand> {
    for &f in exits {
      let Some(fty) = self.any_fn_type(f) else { continue };
      let Some(data) = fty.as_fn() else { continue };
      if data.params.len() != args.len() { continue }
      let outs = lw.b.out_params(data.rets.len());
      let first = outs.0.first().copied();
      lw.b.push(crate::ir::Instruction::Call {
        fty,
        f: Operand::Value(Value::Fn(f)),
        args: args.to_vec().into(),
        outs,
      });
      return first.map(Operand::Reg)
    }
    // No exit matched: a bare yield passes its single value through.
    args.first().cloned()
  }
}
