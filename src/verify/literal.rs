//! Verification of function, jump, scope and block literals, including
//! deferred body verification and return-type inference.

use crate::diag::DiagKind;
use crate::queue::{WorkItem, WorkKind, WorkResult};
use crate::types::ast::{ExprId, ExprKind};
use crate::types::ty::{self, QualType, Type};
use crate::types::Params;
use super::Compiler;

impl Compiler<'_> {
  pub(super) fn verify_fn_literal(&mut self, e: ExprId) -> QualType {
    let ExprKind::FnLit(f) = &self.ast[e].k else { unreachable!() };
    let (params, rets, deps) = (f.params.clone(), f.rets.clone(), f.deps.clone());

    // A function with constant parameters, or whose parameters feed other
    // parameters' types, has no concrete signature until instantiated.
    if self.params_are_generic(&params, &deps) {
      return QualType::constant(ty::generic_fn(self.module, e))
    }

    let Some(param_qts) = self.verify_params(&params) else { return QualType::error() };
    let param_tys: Params<Type> = param_qts.map(|qt| qt.ty);
    let rets = match rets {
      Some(rets) => {
        let mut out = vec![];
        for &r in &*rets {
          match self.expect_type_expr(r) {
            Some(t) => out.push(t),
            None => return QualType::error(),
          }
        }
        self.queue.enqueue(WorkItem { ctx: self.ctx, kind: WorkKind::VerifyBody(e) });
        out
      }
      // Short form: the signature needs the body, so verify it now.
      None => match self.infer_fn_rets(e) {
        Ok(rets) => rets,
        Err(kind) => return self.err(e, kind),
      },
    };
    QualType::constant(ty::func(param_tys, rets))
  }

  /// Verify the body statements of a function literal and infer its return
  /// types from the `return` statements that target it.
  pub(crate) fn infer_fn_rets(&mut self, e: ExprId) -> Result<Vec<Type>, DiagKind> {
    let ExprKind::FnLit(f) = &self.ast[e].k else { unreachable!() };
    let body = f.body.clone();
    // Claim the body so the queued VerifyBody item becomes a no-op.
    self.tree.should_verify_body(self.ctx, e);
    for &stmt in &*body { self.verify_type(stmt); }

    let returns = self.tree.returns_to(self.ctx, e).to_vec();
    let mut rets: Option<Vec<Type>> = None;
    for r in returns {
      let ExprKind::Return(exprs) = &self.ast[r].k else { unreachable!() };
      let mut tys = vec![];
      for &x in &**exprs {
        let qt = self.qt(x).unwrap_or_else(QualType::error);
        if !qt.ok() { return Err(DiagKind::UninferrableType) }
        tys.push(qt.ty);
      }
      rets = Some(match rets {
        None => tys,
        Some(prev) => {
          if prev.len() != tys.len() { return Err(DiagKind::UninferrableType) }
          let mut merged = vec![];
          for (a, b) in prev.into_iter().zip(tys) {
            merged.push(ty::meet(a, b).ok_or(DiagKind::UninferrableType)?);
          }
          merged
        }
      });
    }
    Ok(rets.unwrap_or_default())
  }

  pub(super) fn verify_fn_body(&mut self, e: ExprId) -> WorkResult {
    if !self.tree.should_verify_body(self.ctx, e) { return WorkResult::Success }
    let ExprKind::FnLit(f) = &self.ast[e].k else { unreachable!() };
    let (body, rets) = (f.body.clone(), f.rets.clone());

    let mut failed = false;
    for &stmt in &*body {
      if !self.verify_type(stmt).ok() { failed = true }
    }

    // Check every return against the declared output types.
    if let Some(rets) = rets {
      let mut declared = vec![];
      for &r in &*rets {
        match self.expect_type_expr(r) {
          Some(t) => declared.push(t),
          None => return WorkResult::Failure,
        }
      }
      let returns = self.tree.returns_to(self.ctx, e).to_vec();
      for r in returns {
        let ExprKind::Return(exprs) = &self.ast[r].k else { unreachable!() };
        let exprs = exprs.clone();
        if exprs.len() != declared.len() {
          self.report(r, DiagKind::TypeMismatch {
            param: "return".into(), arg_ty: ty::tup(vec![]),
          });
          failed = true;
          continue
        }
        for (&x, &want) in exprs.iter().zip(&declared) {
          let qt = self.qt(x).unwrap_or_else(QualType::error);
          if qt.ok() && !ty::can_cast_implicitly(qt.ty, want) {
            self.report(x, DiagKind::TypeMismatch {
              param: "return".into(), arg_ty: qt.ty,
            });
            failed = true;
          }
        }
      }
    }
    if failed { WorkResult::Failure } else { WorkResult::Success }
  }

  pub(super) fn verify_jump_literal(&mut self, e: ExprId) -> QualType {
    let ExprKind::JumpLit(j) = &self.ast[e].k else { unreachable!() };
    let (state, params, deps) = (j.state, j.params.clone(), j.deps.clone());

    if self.params_are_generic(&params, &deps) {
      return QualType::constant(ty::generic_fn(self.module, e))
    }

    let state_ty = match state {
      Some(s) => {
        let decl = self.ast.decl(s).clone();
        let Some(t) = decl.ty else {
          return self.err(e, DiagKind::UninferrableType)
        };
        match self.expect_type_expr(t) {
          Some(t) => {
            self.set_qt(s.0, QualType::non_constant(t));
            Some(t)
          }
          None => return QualType::error(),
        }
      }
      None => None,
    };
    let Some(param_qts) = self.verify_params(&params) else { return QualType::error() };
    self.queue.enqueue(WorkItem { ctx: self.ctx, kind: WorkKind::VerifyBody(e) });
    QualType::constant(ty::jump(state_ty, param_qts.map(|qt| qt.ty)))
  }

  pub(super) fn verify_jump_body(&mut self, e: ExprId) -> WorkResult {
    if !self.tree.should_verify_body(self.ctx, e) { return WorkResult::Success }
    let ExprKind::JumpLit(j) = &self.ast[e].k else { unreachable!() };
    let body = j.body.clone();
    let mut failed = false;
    for &stmt in &*body {
      if !self.verify_type(stmt).ok() { failed = true }
    }
    if failed { WorkResult::Failure } else { WorkResult::Success }
  }

  pub(super) fn verify_scope_literal(&mut self, e: ExprId) -> QualType {
    let ExprKind::ScopeLit(s) = &self.ast[e].k else { unreachable!() };
    let (state_ty, decls) = (s.state_ty, s.decls.clone());
    if let Some(t) = state_ty {
      if self.expect_type_expr(t).is_none() { return QualType::error() }
    }
    let mut failed = false;
    for &d in &*decls {
      if !self.verify_type(d.0).ok() { failed = true }
    }
    if failed { QualType::error() } else { QualType::constant(ty::scope_ty()) }
  }

  pub(super) fn verify_block_literal(&mut self, e: ExprId) -> QualType {
    let ExprKind::BlockLit(b) = &self.ast[e].k else { unreachable!() };
    let decls = b.decls.clone();
    let mut failed = false;
    for &d in &*decls {
      if !self.verify_type(d.0).ok() { failed = true }
    }
    if failed { QualType::error() } else { QualType::constant(ty::block_ty()) }
  }
}
