//! Call verification: argument verification (with compile-time evaluation of
//! constant arguments), callee verification with argument-dependent lookup,
//! and overload resolution.

use crate::context::OverloadSet;
use crate::diag::DiagKind;
use crate::ir::Value;
use crate::types::ast::{ExprId, ExprKind};
use crate::types::ty::{self, QualType, Type, TypeKind};
use crate::types::{Arguments, ModuleId, Typed};
use crate::types::entity::BuiltinFn;
use super::Compiler;

impl Compiler<'_> {
  pub(super) fn verify_call_expr(&mut self, e: ExprId) -> QualType {
    let ExprKind::Call { callee, args } = &self.ast[e].k else { unreachable!() };
    let (callee, args) = (*callee, args.clone());

    // `foreign` is signature polymorphic: its second argument names the
    // result type, so it cannot go through normal resolution.
    if let ExprKind::Ident(name) = self.ast[callee].k {
      if BuiltinFn::from_symbol(name) == Some(BuiltinFn::Foreign)
          && self.ast.lookup(self.ast.scope_of(callee), name).visible.is_empty() {
        return self.verify_foreign_call(e, callee, &args)
      }
    }

    // (1) Verify arguments; constants carry their values.
    let Some(arg_vals) = self.verify_arguments(&args) else {
      return QualType::error()
    };

    // (2) Verify the callee with ADL enabled on the argument types.
    let (callee_qt, os) = self.verify_callee(callee, &arg_vals);
    if !callee_qt.ok() { return QualType::error() }

    // (3) Resolve.
    let resolved = if os.is_empty() {
      if !callee_qt.ty.callable() {
        return self.err(e, DiagKind::UncallableExpression(callee_qt.ty))
      }
      self.resolve_direct(callee, callee_qt.ty, &arg_vals)
    } else {
      self.resolve_overloads(callee, &os, &arg_vals)
    };
    match resolved {
      Ok(qt) => qt,
      Err(err) => {
        self.report_call_error(e, err);
        self.set_qt(e, QualType::error())
      }
    }
  }

  /// Verify each argument expression, evaluating constants. Returns `None`
  /// if any argument failed.
  pub(crate) fn verify_arguments(&mut self, args: &Arguments<ExprId>)
      -> Option<Arguments<Typed<Value>>> {
    let mut err = false;
    let out = args.map(|&a| {
      let qt = self.verify_type(a);
      if !qt.ok() {
        err = true;
        return Typed::new(Value::Empty, ty::error_ty())
      }
      self.evaluate_if_constant(a, qt)
    });
    (!err).then_some(out)
  }

  /// Verify a callee expression. Enables argument-dependent lookup before
  /// verification so identifier resolution can see the argument types'
  /// defining modules, then assembles the candidate set.
  pub(crate) fn verify_callee(&mut self, callee: ExprId, args: &Arguments<Typed<Value>>)
      -> (QualType, OverloadSet) {
    let adl: Vec<ModuleId> = args.iter()
      .filter_map(|a| a.ty.as_struct())
      .map(|s| s.module)
      .filter(|&m| m != self.module)
      .collect();
    if let ExprKind::Ident(_) = self.ast[callee].k {
      self.adl_modules.insert(callee, adl.clone());
    }

    let qt = self.verify_type(callee);
    if !qt.ok() { return (qt, OverloadSet::new()) }

    let mut os = match self.tree.all_overloads(self.ctx, callee) {
      Some(os) => os.clone(),
      None => {
        let mut os = OverloadSet::new();
        if let Some(ds) = self.tree.decls(self.ctx, callee) {
          for &d in ds { os.insert(self.module, d.0) }
        } else if let Some(&(m, d)) = self.xmodule_decls.get(&callee) {
          os.insert(m, d.0);
        }
        os
      }
    };

    // Argument-dependent lookup: add same-named exported callables from the
    // defining module of every struct argument.
    if let ExprKind::Ident(name) = self.ast[callee].k {
      for m in adl {
        for d in self.importer.get(m).exported(name) {
          let callable = self.importer.get(m).tree
            .qual_type(crate::context::CtxId::ROOT, d.0)
            .is_some_and(|qt| qt.ok() && qt.ty.callable());
          if callable { os.insert(m, d.0) }
        }
      }
    }

    if !os.is_empty() {
      self.tree.set_all_overloads(self.ctx, callee, os.clone());
    }
    (qt, os)
  }

  // `foreign(name, T)` binds `name` from a linked library at type `T`.
  fn verify_foreign_call(&mut self, e: ExprId, callee: ExprId, args: &Arguments<ExprId>)
      -> QualType {
    self.set_qt(callee, QualType::constant(ty::overload_set(vec![])));
    let &[name_arg, ty_arg] = &args.pos[..] else {
      return self.err(e, DiagKind::TooManyArguments { provided: args.len(), max: 2 })
    };
    let name_qt = self.verify_type(name_arg);
    if !name_qt.ok() { return QualType::error() }
    if name_qt.ty != ty::str_ty() || !name_qt.constant_q() {
      return self.err(e, DiagKind::TypeMismatch { param: "0".into(), arg_ty: name_qt.ty })
    }
    match self.expect_type_expr(ty_arg) {
      Some(t) => QualType::constant(t),
      None => QualType::error(),
    }
  }

  /// The concrete callable a call site dispatches to, for lowering: the
  /// single viable overload, if resolution succeeded.
  pub(crate) fn dispatched_callee(&self, callee: ExprId) -> Option<(ModuleId, ExprId, Type)> {
    let os = self.tree.viable_overloads(self.ctx, callee)?;
    let &(m, expr) = os.members().first()?;
    let qt = if m == self.module {
      self.qt_anywhere(expr)?
    } else {
      self.importer.get(m).tree.qual_type(crate::context::CtxId::ROOT, expr)?
    };
    Some((m, expr, qt.ty))
  }

  /// The declared parameter types of a callable type.
  pub(crate) fn callable_params(t: Type) -> Option<&'static crate::types::Params<Type>> {
    match t.kind() {
      TypeKind::Fn(f) => Some(&f.params),
      TypeKind::Jump(j) => Some(&j.params),
      _ => None,
    }
  }
}
