//! Declaration verification: the four shapes `x: T`, `x := e`, `x: T = e`,
//! and `x: T = --`, plus shadowing detection and constant scheduling.

use crate::diag::DiagKind;
use crate::queue::{WorkItem, WorkKind};
use crate::types::ast::{DeclFlags, DeclId, ExprId, ExprKind};
use crate::types::ty::{self, QualType, TypeKind};
use super::Compiler;

impl Compiler<'_> {
  pub(super) fn verify_declaration(&mut self, e: ExprId) -> QualType {
    let d = DeclId(e);
    let decl = self.ast.decl(d).clone();
    let constant = decl.flags.contains(DeclFlags::CONST);

    let qt = match (decl.ty, decl.init, decl.flags.contains(DeclFlags::UNINITIALIZED)) {
      // x: T
      (Some(t), None, false) => {
        match self.expect_type_expr(t) {
          Some(t) => if constant { QualType::constant(t) } else { QualType::non_constant(t) },
          None => QualType::error(),
        }
      }
      // x := e
      (None, Some(init), _) => {
        let init_qt = self.verify_type(init);
        if !init_qt.ok() {
          QualType::error()
        } else if matches!(init_qt.ty.kind(),
            TypeKind::Prim(ty::Prim::EmptyArray | ty::Prim::NullPtr)) {
          self.report(e, DiagKind::UninferrableType);
          QualType::error()
        } else if constant {
          QualType::constant(init_qt.ty)
        } else {
          QualType::non_constant(init_qt.ty)
        }
      }
      // x: T = e
      (Some(t), Some(init), _) => {
        let init_qt = self.verify_type(init);
        match self.expect_type_expr(t) {
          Some(t) => {
            if init_qt.ok() && !ty::can_cast_implicitly(init_qt.ty, t) {
              self.report(e, DiagKind::InvalidInitializerType {
                expected: t, given: init_qt.ty,
              });
              QualType::error()
            } else if !init_qt.ok() {
              QualType::new(t, init_qt.quals)
            } else if constant {
              QualType::constant(t)
            } else {
              QualType::non_constant(t)
            }
          }
          None => QualType::error(),
        }
      }
      // x: T = --
      (Some(t), None, true) => {
        let t = self.expect_type_expr(t);
        if constant {
          self.report(e, DiagKind::UninitializedConstant);
          QualType::error()
        } else {
          t.map_or_else(QualType::error, QualType::non_constant)
        }
      }
      (None, None, _) => {
        self.report(e, DiagKind::UninferrableType);
        QualType::error()
      }
    };

    if qt.ok() { self.check_shadowing(e, &decl, qt) }

    // Constants get their values computed once the rest of the scope has
    // been verified.
    if qt.ok() && constant && !decl.flags.contains(DeclFlags::PARAM) {
      if decl.init.is_some() {
        self.queue.enqueue(WorkItem { ctx: self.ctx, kind: WorkKind::EmitValue(e) });
      } else {
        // Default-initialized constant: the value is the type's default.
        self.tree.set_constant(self.ctx, d, crate::ir::Value::Empty, false);
      }
    }
    qt
  }

  // A declaration may share a name with another visible declaration only if
  // both are callable (overloading); anything else shadows.
  fn check_shadowing(&mut self, e: ExprId, decl: &crate::types::ast::Decl, qt: QualType) {
    let lookup = self.ast.lookup(self.ast.scope_of(e), decl.name);
    for other in lookup.visible {
      if other.0 == e { continue }
      let Some(other_qt) = self.qt(other.0) else { continue };
      if !other_qt.ok() { continue }
      if !(qt.ty.callable() && other_qt.ty.callable()) {
        self.report(e, DiagKind::ShadowingDeclaration(decl.name));
        return
      }
    }
  }

  /// Verify a parameter list, returning the per-parameter qualified types,
  /// or `None` if any parameter failed.
  pub(crate) fn verify_params(&mut self, params: &crate::types::Params<DeclId>)
      -> Option<crate::types::Params<QualType>> {
    let mut out = crate::types::Params::new();
    let mut err = false;
    for p in params {
      let qt = self.verify_type(p.value.0);
      if qt.ok() {
        let mut flags = p.flags;
        if self.ast.decl(p.value).init.is_some() {
          flags |= crate::types::ParamFlags::HAS_DEFAULT;
        }
        if self.ast.decl(p.value).flags.contains(DeclFlags::CONST) {
          flags |= crate::types::ParamFlags::CONST;
        }
        out.push(p.name, qt, flags);
      } else {
        err = true;
      }
    }
    (!err).then_some(out)
  }

  /// Does the node's statement list contain a declaration that makes the
  /// enclosing parameterized expression generic? A function is generic if
  /// any parameter is a constant or is depended on by another parameter.
  pub(crate) fn params_are_generic(&self, params: &crate::types::Params<DeclId>,
      deps: &[crate::types::ast::DepNode]) -> bool {
    params.iter().any(|p| self.ast.decl(p.value).flags.contains(DeclFlags::CONST))
      || deps.iter().any(|d| matches!(d.kind,
           crate::types::ast::DepKind::ArgValue | crate::types::ast::DepKind::ParamValue))
  }

  /// Is this node a declaration with the CONST flag?
  #[must_use] pub fn is_const_decl(&self, e: ExprId) -> bool {
    matches!(&self.ast[e].k, ExprKind::Decl(d) if d.flags.contains(DeclFlags::CONST))
  }
}
