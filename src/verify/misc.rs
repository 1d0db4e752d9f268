//! Verification of casts, indexing, member access, array expressions,
//! imports, and the control-flow statements.

use num::ToPrimitive;
use crate::context::{CtxId, OverloadSet};
use crate::diag::DiagKind;
use crate::types::ast::{ExprId, ExprKind};
use crate::types::ty::{self, QualType, Quals, TypeKind};
use super::Compiler;

impl Compiler<'_> {
  pub(super) fn verify_cast(&mut self, e: ExprId, expr: ExprId, ty_e: ExprId) -> QualType {
    let operand = self.verify_type(expr);
    let target_qt = self.verify_type(ty_e);
    if !operand.ok() || !target_qt.ok() { return QualType::error() }
    if target_qt.ty != ty::type_ty() {
      return self.err(e, DiagKind::NotAType(target_qt.ty))
    }
    if !target_qt.constant_q() {
      return self.err(e, DiagKind::CastToNonConstantType)
    }
    let target = match self.evaluate(ty_e, ty::type_ty(), false) {
      Ok(v) => match v.as_type() {
        Some(t) => t,
        None => return self.err(e, DiagKind::NotAType(target_qt.ty)),
      },
      Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
    };
    if !ty::can_cast_explicitly(operand.ty, target) {
      return self.err(e, DiagKind::InvalidCast { from: operand.ty, to: target })
    }
    QualType::new(target, operand.quals & Quals::CONST)
  }

  pub(super) fn verify_index(&mut self, e: ExprId, base: ExprId, index: ExprId) -> QualType {
    let b = self.verify_type(base);
    let i = self.verify_type(index);
    if !b.ok() || !i.ok() { return QualType::error() }

    let integral = matches!(i.ty.kind(), TypeKind::Int(_));
    match b.kind_for_indexing() {
      TypeKind::Array { elem, .. } if integral =>
        QualType::new(*elem, b.quals & (Quals::REF | Quals::CONST)),
      TypeKind::BufPtr(elem) if integral => QualType::new(*elem, Quals::REF | Quals::BUF),
      TypeKind::Slice(elem) if integral =>
        QualType::new(*elem, Quals::REF | (b.quals & Quals::CONST)),
      TypeKind::Tuple(elems) if integral => {
        if !i.constant_q() {
          return self.err(e, DiagKind::NonConstantTupleIndex)
        }
        let idx = match self.evaluate(index, i.ty, false) {
          Ok(v) => v.as_int().and_then(ToPrimitive::to_usize),
          Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
        };
        match idx.and_then(|n| elems.get(n)) {
          Some(&t) => QualType::new(t, b.quals & (Quals::REF | Quals::CONST)),
          None => self.err(e, DiagKind::InvalidIndexing(b.ty)),
        }
      }
      _ => self.err(e, DiagKind::InvalidIndexing(b.ty)),
    }
  }

  pub(super) fn verify_access(&mut self, e: ExprId, base: ExprId, member: crate::Symbol)
      -> QualType {
    let b = self.verify_type(base);
    if !b.ok() { return QualType::error() }

    // Module member: resolve against the module's exported declarations.
    if b.ty == ty::module_ty() {
      let m = match self.evaluate(base, ty::module_ty(), false) {
        Ok(v) => match v.as_module() {
          Some(m) => m,
          None => return self.err(e, DiagKind::MissingMember(member)),
        },
        Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
      };
      let found = self.importer.get(m).exported(member);
      return match &*found {
        [] => self.err(e, DiagKind::MissingMember(member)),
        &[d] => {
          match self.importer.get(m).tree.qual_type(CtxId::ROOT, d.0) {
            Some(qt) => {
              self.xmodule_decls.insert(e, (m, d));
              qt
            }
            None => self.err(e, DiagKind::MissingMember(member)),
          }
        }
        ds => {
          let mut members = vec![];
          let mut os = OverloadSet::new();
          for &d in ds {
            let Some(qt) = self.importer.get(m).tree.qual_type(CtxId::ROOT, d.0) else {
              return self.err(e, DiagKind::MissingMember(member))
            };
            if !qt.ty.callable() {
              return self.err(e, DiagKind::NonCallableInOverloadSet)
            }
            members.push(qt.ty);
            os.insert(m, d.0);
          }
          self.tree.set_all_overloads(self.ctx, e, os);
          QualType::constant(ty::overload_set(members))
        }
      }
    }

    // Enum or flags member: `E.name` is a constant of type `E`.
    if b.ty == ty::type_ty() && b.constant_q() {
      let t = match self.evaluate(base, ty::type_ty(), false) {
        Ok(v) => v.as_type(),
        Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
      };
      if let Some(t) = t {
        if let TypeKind::Enum(data) | TypeKind::Flags(data) = t.kind() {
          return if data.value(member).is_some() {
            QualType::constant(t)
          } else {
            self.err(e, DiagKind::MissingMember(member))
          }
        }
      }
      return self.err(e, DiagKind::MissingMember(member))
    }

    // Struct field access.
    if b.ty.as_struct().is_some() {
      if !self.ensure_data_complete(b.ty) {
        return self.err(e, DiagKind::IncompleteField)
      }
      let s = b.ty.as_struct().expect("checked");
      let Some((_, field)) = s.field(member) else {
        return self.err(e, DiagKind::MissingMember(member))
      };
      if s.module != self.module && !field.exported() {
        return self.err(e, DiagKind::NonExportedField(member))
      }
      return QualType::new(field.ty, b.quals & (Quals::REF | Quals::CONST))
    }

    self.err(e, DiagKind::MissingMember(member))
  }

  pub(super) fn verify_array_literal(&mut self, e: ExprId) -> QualType {
    let ExprKind::ArrayLit(elems) = &self.ast[e].k else { unreachable!() };
    let elems = elems.clone();
    if elems.is_empty() { return QualType::constant(ty::empty_array_ty()) }
    let mut quals = Quals::CONST;
    let mut elem_ty = None;
    for &x in &*elems {
      let qt = self.verify_type(x);
      if !qt.ok() { return QualType::error() }
      quals &= qt.quals;
      elem_ty = Some(match elem_ty {
        None => qt.ty,
        Some(prev) => match ty::meet(prev, qt.ty) {
          Some(t) => t,
          None => return self.err(e, DiagKind::UninferrableType),
        },
      });
    }
    QualType::new(ty::arr(elems.len() as u64, elem_ty.expect("nonempty")), quals)
  }

  pub(super) fn verify_array_type(&mut self, e: ExprId, len: ExprId, elem: ExprId) -> QualType {
    let len_qt = self.verify_type(len);
    if !len_qt.ok() { return QualType::error() }
    if !matches!(len_qt.ty.kind(), TypeKind::Int(_)) || !len_qt.constant_q() {
      return self.err(e, DiagKind::NonConstantTypeInDeclaration)
    }
    match self.expect_type_expr(elem) {
      Some(_) => QualType::constant(ty::type_ty()),
      None => QualType::error(),
    }
  }

  pub(super) fn verify_import(&mut self, e: ExprId, operand: ExprId) -> QualType {
    let o = self.verify_type(operand);
    if !o.ok() { return QualType::error() }
    if o.ty != ty::str_ty() {
      return self.err(e, DiagKind::InvalidImport(crate::intern("")))
    }
    if !o.constant_q() {
      return self.err(e, DiagKind::NonConstantImport)
    }
    let locator = match self.evaluate(operand, o.ty, false) {
      Ok(v) => match v.as_string() {
        Some(s) => s,
        None => return self.err(e, DiagKind::InvalidImport(crate::intern(""))),
      },
      Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
    };
    match self.importer.import(locator.as_str()) {
      Some(m) => {
        self.tree.set_imported_module(self.ctx, e, m);
        QualType::constant(ty::module_ty())
      }
      None => self.err(e, DiagKind::InvalidImport(locator)),
    }
  }

  pub(super) fn verify_return(&mut self, e: ExprId) -> QualType {
    let ExprKind::Return(exprs) = &self.ast[e].k else { unreachable!() };
    let exprs = exprs.clone();
    let mut failed = false;
    for &x in &*exprs {
      if !self.verify_type(x).ok() { failed = true }
    }
    if failed { QualType::error() } else { Self::unit_qt() }
  }

  pub(super) fn verify_yield(&mut self, e: ExprId) -> QualType {
    let ExprKind::Yield { exprs, .. } = &self.ast[e].k else { unreachable!() };
    let exprs = exprs.clone();
    let mut failed = false;
    for &x in &*exprs {
      if !self.verify_type(x).ok() { failed = true }
    }
    if failed { QualType::error() } else { Self::unit_qt() }
  }

  pub(super) fn verify_goto(&mut self, e: ExprId) -> QualType {
    let ExprKind::Goto { cond, options } = &self.ast[e].k else { unreachable!() };
    let (cond, options) = (*cond, options.clone());
    let mut failed = false;
    if let Some(c) = cond {
      let qt = self.verify_type(c);
      if !qt.ok() {
        failed = true;
      } else if qt.ty != ty::bool_ty() {
        self.report(c, DiagKind::TypeMismatch { param: "condition".into(), arg_ty: qt.ty });
        failed = true;
      }
    }
    for opt in &*options {
      for &a in &*opt.args {
        if !self.verify_type(a).ok() { failed = true }
      }
    }
    if failed { QualType::error() } else { Self::unit_qt() }
  }
}

impl QualType {
  // Indexing sees through one level of reference-ness; the base's own kind
  // decides the rule.
  fn kind_for_indexing(self) -> &'static TypeKind { self.ty.kind() }
}
