//! Verification of scope usages (`name (args) [blocks]`) against the
//! user-defined scope construct they invoke.

use crate::diag::DiagKind;
use crate::ir::{AnyFn, ScopeRef, Value};
use crate::types::ast::{ExprId, ExprKind};
use crate::types::ty::{self, QualType, Type};
use super::Compiler;

impl Compiler<'_> {
  /// The function type of a callable value.
  pub(crate) fn any_fn_type(&self, f: AnyFn) -> Option<Type> {
    match f {
      AnyFn::Native(r) => {
        if r.module == self.module {
          Some(self.tree.fn_defs[r.id].ty)
        } else {
          Some(self.importer.get(r.module).tree.fn_defs[r.id].ty)
        }
      }
      AnyFn::Builtin(b) => b.ty(),
    }
  }

  /// The scope construct a scope value refers to, cloned out of its owning
  /// tree.
  pub(crate) fn scope_def(&self, r: ScopeRef) -> crate::ir::CompiledScope {
    if r.module == self.module {
      self.tree.scope_defs[r.id].clone()
    } else {
      self.importer.get(r.module).tree.scope_defs[r.id].clone()
    }
  }

  /// The block handler a block value refers to.
  pub(crate) fn block_def(&self, r: crate::ir::BlockRef) -> crate::ir::CompiledBlock {
    if r.module == self.module {
      self.tree.block_defs[r.id].clone()
    } else {
      self.importer.get(r.module).tree.block_defs[r.id].clone()
    }
  }

  pub(super) fn verify_scope_node(&mut self, e: ExprId) -> QualType {
    let ExprKind::ScopeNode { name, args, blocks, .. } = &self.ast[e].k else { unreachable!() };
    let (name, args, blocks) = (*name, args.clone(), blocks.clone());

    let Some(arg_vals) = self.verify_arguments(&args) else { return QualType::error() };

    let name_qt = self.verify_type(name);
    if !name_qt.ok() { return QualType::error() }
    if name_qt.ty != ty::scope_ty() || !name_qt.constant_q() {
      return self.err(e, DiagKind::UncallableExpression(name_qt.ty))
    }
    let scope_ref = match self.evaluate(name, ty::scope_ty(), false) {
      Ok(Value::Scope(r)) => r,
      Ok(_) => return self.err(e, DiagKind::UncallableExpression(name_qt.ty)),
      Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
    };
    let scope_def = self.scope_def(scope_ref);

    // The enter jumps must accept the supplied arguments.
    let mut enter_ok = scope_def.enter.is_empty();
    for &j in &scope_def.enter {
      let jump_ty = if scope_ref.module == self.module {
        self.tree.jump_defs[j].ty
      } else {
        self.importer.get(scope_ref.module).tree.jump_defs[j].ty
      };
      if let Some(params) = Self::callable_params(jump_ty) {
        if crate::dispatch::match_arguments_to_parameters(params, &arg_vals).is_none() {
          let mut ok = true;
          for (i, a) in arg_vals.pos.iter().enumerate() {
            if !ty::can_cast_implicitly(a.ty, params[i].value) { ok = false }
          }
          if ok { enter_ok = true }
        }
      }
    }
    if !enter_ok {
      return self.err(e, DiagKind::TypeMismatch {
        param: "enter".into(),
        arg_ty: arg_vals.pos.first().map_or_else(ty::error_ty, |a| a.ty),
      })
    }

    // Verify the block nodes; every named block must exist on the scope.
    let mut failed = false;
    for &b in &*blocks {
      let ExprKind::BlockNode { name: block_name, params, body } = &self.ast[b].k else {
        unreachable!()
      };
      let (block_name, params, body) = (*block_name, params.clone(), body.clone());
      if !scope_def.blocks.iter().any(|&(n, _)| n == block_name) {
        self.report(b, DiagKind::NoBlockWithName(block_name));
        failed = true;
        continue
      }
      for p in &params {
        if !self.verify_type(p.value.0).ok() { failed = true }
      }
      for &stmt in &*body {
        if !self.verify_type(stmt).ok() { failed = true }
      }
      self.set_qt(b, Self::unit_qt());
    }
    if failed { return QualType::error() }

    // The result type comes from the exit overload set, keyed on the yield
    // argument tuples and merged via meet.
    let yields = self.tree.yields_to(self.ctx, e).to_vec();
    if yields.is_empty() || scope_def.exit.is_empty() {
      return Self::unit_qt()
    }
    let mut result: Option<Type> = None;
    for y in yields {
      let ExprKind::Yield { exprs, .. } = &self.ast[y].k else { unreachable!() };
      let arg_tys: Vec<Type> = exprs.iter()
        .map(|&x| self.qt(x).map_or_else(ty::error_ty, |qt| qt.ty))
        .collect();
      let Some(rets) = self.exit_result(&scope_def.exit, &arg_tys) else {
        return self.err(y, DiagKind::TypeMismatch {
          param: "exit".into(),
          arg_ty: arg_tys.first().copied().unwrap_or_else(ty::error_ty),
        })
      };
      let ret = match &*rets {
        [] => ty::tup(vec![]),
        [t] => *t,
        ts => ty::tup(ts.to_vec()),
      };
      result = Some(match result {
        None => ret,
        Some(prev) => match ty::meet(prev, ret) {
          Some(t) => t,
          None => return self.err(e, DiagKind::UninferrableType),
        },
      });
    }
    result.map_or_else(Self::unit_qt, QualType::non_constant)
  }

  // The return types of the first exit overload whose parameters accept the
  // yielded argument types.
  fn exit_result(&self, exits: &[AnyFn], arg_tys: &[Type]) -> Option<Vec<Type>> {
    'exits: for &f in exits {
      let Some(fty) = self.any_fn_type(f) else { continue };
      let Some(data) = fty.as_fn() else { continue };
      if data.params.len() != arg_tys.len() { continue }
      for (param, &arg) in data.params.iter().zip(arg_tys) {
        if !ty::can_cast_implicitly(arg, param.value) { continue 'exits }
      }
      return Some(data.rets.to_vec())
    }
    None
  }
}
