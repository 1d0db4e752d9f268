//! Verification of struct literals (incomplete-then-complete workflow),
//! parameterised struct literals, enum and flags literals, and designated
//! initializers.

use num::ToPrimitive;
use crate::diag::DiagKind;
use crate::queue::{WorkItem, WorkKind, WorkResult};
use crate::types::ast::{EnumKind, ExprId, ExprKind};
use crate::types::ty::{self, QualType, Quals, Type};
use super::Compiler;

impl Compiler<'_> {
  pub(super) fn verify_struct_literal(&mut self, e: ExprId) -> QualType {
    if let ExprKind::ParamStructLit { .. } = self.ast[e].k {
      return QualType::constant(ty::generic_struct(self.module, e))
    }
    self.allocate_struct_for(e);
    QualType::constant(ty::type_ty())
  }

  /// Allocate (or return) the incomplete struct type for a struct literal in
  /// the current context, verify its field declarations, and queue the
  /// completion work item. The type is cached before the fields are
  /// verified so self-referential fields terminate.
  pub(crate) fn allocate_struct_for(&mut self, e: ExprId) -> Type {
    if let Some(t) = self.tree.get_struct(self.ctx, e) { return t }
    let fields = match &self.ast[e].k {
      ExprKind::StructLit { fields } | ExprKind::ParamStructLit { fields, .. } => fields.clone(),
      _ => unreachable!("not a struct literal"),
    };
    let strukt = ty::new_struct(self.tree.module, self.ast.scope_of(e));
    self.tree.set_struct(self.ctx, e, strukt);
    // Cache the literal's own type early as well, so that a constant
    // declaration initialized by this literal can be named from the fields.
    self.set_qt(e, QualType::constant(ty::type_ty()));

    for &f in &*fields { self.verify_type(f.0); }
    self.queue.enqueue(WorkItem { ctx: self.ctx, kind: WorkKind::CompleteStructMembers(e) });
    strukt
  }

  pub(super) fn verify_struct_body(&mut self, e: ExprId) -> WorkResult {
    if !self.tree.should_verify_body(self.ctx, e) { return WorkResult::Success }
    let fields = match &self.ast[e].k {
      ExprKind::StructLit { fields } | ExprKind::ParamStructLit { fields, .. } => fields.clone(),
      _ => unreachable!(),
    };
    let mut failed = false;
    for &f in &*fields {
      if !self.verify_type(f.0).ok() { failed = true }
    }
    if failed { WorkResult::Failure } else { WorkResult::Success }
  }

  pub(super) fn verify_enum_literal(&mut self, e: ExprId) -> QualType {
    let ExprKind::EnumLit { kind, entries } = &self.ast[e].k else { unreachable!() };
    let (kind, entries) = (*kind, entries.clone());
    if self.tree.get_struct(self.ctx, e).is_some() {
      return QualType::constant(ty::type_ty())
    }

    let mut members = Vec::with_capacity(entries.len());
    let mut next: u64 = match kind { EnumKind::Enum => 0, EnumKind::Flags => 1 };
    for (name, specified) in &*entries {
      let value = match specified {
        Some(expr) => {
          let qt = self.verify_type(*expr);
          if !qt.ok() { return QualType::error() }
          if !qt.constant_q() {
            return self.err(e, DiagKind::NonConstantTypeInDeclaration)
          }
          match self.evaluate(*expr, qt.ty, false) {
            Ok(v) => match v.as_int().and_then(ToPrimitive::to_u64) {
              Some(n) => n,
              None => return self.err(e, DiagKind::NotAType(qt.ty)),
            },
            Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
          }
        }
        None => next,
      };
      next = match kind {
        EnumKind::Enum => value + 1,
        EnumKind::Flags => (value.max(1)).next_power_of_two() << 1,
      };
      members.push((*name, value));
    }

    let t = match kind {
      EnumKind::Enum => ty::new_enum(self.tree.module, members.into()),
      EnumKind::Flags => ty::new_flags(self.tree.module, members.into()),
    };
    self.tree.set_struct(self.ctx, e, t);
    QualType::constant(ty::type_ty())
  }

  pub(super) fn verify_enum_body(&mut self, _e: ExprId) -> WorkResult { WorkResult::Success }

  /// Make a struct type's fields available, running its queued completion
  /// early if a use site needs them before the queue drains.
  pub(crate) fn ensure_data_complete(&mut self, t: Type) -> bool {
    if t.data_complete() { return true }
    let mut ctx = self.ctx;
    let lit = loop {
      if let Some(lit) = self.tree.ast_struct(ctx, t) { break Some((ctx, lit)) }
      match self.tree.parent(ctx) {
        Some(p) => ctx = p,
        None => break None,
      }
    };
    if let Some((ctx, lit)) = lit {
      self.in_ctx(ctx, |c| c.complete_struct(lit));
    }
    t.data_complete()
  }

  pub(super) fn verify_designated_initializer(&mut self, e: ExprId, ty_e: ExprId) -> QualType {
    let ExprKind::DesignatedInit { inits, .. } = &self.ast[e].k else { unreachable!() };
    let inits = inits.clone();

    let ty_qt = self.verify_type(ty_e);
    if !ty_qt.ok() { return QualType::error() }
    if ty_qt.ty != ty::type_ty() || !ty_qt.constant_q() {
      return self.err(e, DiagKind::NotAType(ty_qt.ty))
    }
    let t = match self.evaluate(ty_e, ty::type_ty(), false) {
      Ok(v) => match v.as_type() {
        Some(t) => t,
        None => return self.err(e, DiagKind::NotAType(ty_qt.ty)),
      },
      Err(f) => return self.err(e, DiagKind::EvaluationFailure(f.to_string())),
    };
    if t.as_struct().is_none() {
      return self.err(e, DiagKind::NonStructDesignatedInitializerType(t))
    }
    if !self.ensure_data_complete(t) {
      return self.err(e, DiagKind::IncompleteField)
    }
    let s = t.as_struct().expect("checked");

    let mut quals = Quals::CONST;
    let mut failed = false;
    for &(name, init) in &*inits {
      let init_qt = self.verify_type(init);
      if !init_qt.ok() { failed = true; continue }
      quals &= init_qt.quals;
      let Some((_, field)) = s.field(name) else {
        self.report(e, DiagKind::MissingStructField(name));
        failed = true;
        continue
      };
      if s.module != self.module && !field.exported() {
        self.report(e, DiagKind::NonExportedField(name));
        failed = true;
        continue
      }
      if !ty::can_cast_implicitly(init_qt.ty, field.ty) {
        self.report(init, DiagKind::InvalidInitializerType {
          expected: field.ty, given: init_qt.ty,
        });
        failed = true;
      }
    }
    // Fields not designated default-initialize; that needs the trait.
    if failed { QualType::error() } else { QualType::new(t, quals) }
  }
}
