//! Binary and unary operator verification: built-in rules first, operator
//! overload lookup when the operands are not a built-in pair.

use crate::context::OverloadSet;
use crate::diag::DiagKind;
use crate::ir::Value;
use crate::types::ast::{Binop, ExprId, Unop};
use crate::types::ty::{self, QualType, Quals, Type, TypeFlags, TypeKind};
use crate::types::{Arguments, Typed};
use super::Compiler;

fn both_const(a: QualType, b: QualType) -> Quals {
  if a.constant_q() && b.constant_q() { Quals::CONST } else { Quals::empty() }
}

fn numeric(t: Type) -> bool {
  matches!(t.kind(), TypeKind::Int(_) | TypeKind::Float(_))
}

impl Compiler<'_> {
  pub(super) fn verify_binop(&mut self, e: ExprId, op: Binop, lhs: ExprId, rhs: ExprId)
      -> QualType {
    let l = self.verify_type(lhs);
    let r = self.verify_type(rhs);
    if !l.ok() || !r.ok() { return QualType::error() }

    if op == Binop::Assign { return self.verify_assignment(e, None, l, r) }
    if let Some(base) = op.base_op() { return self.verify_assignment(e, Some(base), l, r) }

    match self.builtin_binop(op, l, r) {
      Some(qt) => qt,
      None => self.verify_binary_overload(op.token(), e, l, r),
    }
  }

  // Built-in operator rules. `None` means the pair is not built-in and the
  // overload path decides.
  fn builtin_binop(&mut self, op: Binop, l: QualType, r: QualType) -> Option<QualType> {
    let quals = both_const(l, r);
    match op {
      Binop::Add | Binop::Sub | Binop::Mul | Binop::Div | Binop::Mod => {
        if numeric(l.ty) && l.ty == r.ty {
          return Some(QualType::new(l.ty, quals))
        }
        // Buffer pointer arithmetic.
        if matches!(op, Binop::Add | Binop::Sub) {
          if let (TypeKind::BufPtr(_), TypeKind::Int(_)) = (l.ty.kind(), r.ty.kind()) {
            return Some(QualType::new(l.ty, quals))
          }
          if op == Binop::Add {
            if let (TypeKind::Int(_), TypeKind::BufPtr(_)) = (l.ty.kind(), r.ty.kind()) {
              return Some(QualType::new(r.ty, quals))
            }
          }
          if op == Binop::Sub && matches!(l.ty.kind(), TypeKind::BufPtr(_)) && l.ty == r.ty {
            return Some(QualType::new(ty::i64_ty(), quals))
          }
        }
        None
      }
      Binop::And | Binop::Or | Binop::Xor => {
        if matches!(l.ty.kind(), TypeKind::Flags(_)) && l.ty == r.ty {
          return Some(QualType::new(l.ty, quals))
        }
        if l.ty == ty::bool_ty() && r.ty == ty::bool_ty() {
          return Some(QualType::new(ty::bool_ty(), quals))
        }
        None
      }
      Binop::Lt | Binop::Le | Binop::Gt | Binop::Ge => {
        if (numeric(l.ty) || l.ty == ty::char_ty() || matches!(l.ty.kind(), TypeKind::Flags(_)))
            && l.ty == r.ty {
          return Some(QualType::new(ty::bool_ty(), quals))
        }
        None
      }
      Binop::Eq | Binop::Ne => {
        let comparable = numeric(l.ty) || matches!(l.ty.kind(),
          TypeKind::Prim(_) | TypeKind::Ptr(_) | TypeKind::BufPtr(_) |
          TypeKind::Enum(_) | TypeKind::Flags(_));
        if comparable && ty::meet(l.ty, r.ty).is_some() {
          return Some(QualType::new(ty::bool_ty(), quals))
        }
        None
      }
      _ => None,
    }
  }

  // `lhs op= rhs` requires the left side to denote mutable storage; logical
  // variants additionally require bool or flags operands.
  fn verify_assignment(&mut self, e: ExprId, base: Option<Binop>, l: QualType, r: QualType)
      -> QualType {
    if !l.ref_q() || l.constant_q() {
      self.report(e, DiagKind::InvalidAssignmentOperatorLhsValueCategory);
      return QualType::error()
    }
    match base {
      None => {
        if !ty::can_cast_implicitly(r.ty, l.ty) {
          self.report(e, DiagKind::BinaryOperatorTypeMismatch { lhs: l.ty, rhs: r.ty });
          return QualType::error()
        }
      }
      Some(Binop::And | Binop::Or | Binop::Xor) => {
        let logical = l.ty == ty::bool_ty() || matches!(l.ty.kind(), TypeKind::Flags(_));
        if !logical {
          self.report(e, DiagKind::LogicalAssignmentNeedsBoolOrFlags(l.ty));
          return QualType::error()
        }
        if l.ty != r.ty {
          self.report(e, DiagKind::BinaryOperatorTypeMismatch { lhs: l.ty, rhs: r.ty });
          return QualType::error()
        }
      }
      Some(op) => {
        if self.builtin_binop(op, QualType::non_constant(l.ty), r).is_none() {
          self.report(e, DiagKind::BinaryOperatorTypeMismatch { lhs: l.ty, rhs: r.ty });
          return QualType::error()
        }
      }
    }
    Self::unit_qt()
  }

  /// Resolve a binary operator against user overloads named by its token.
  pub(crate) fn verify_binary_overload(&mut self, token: &str, e: ExprId, l: QualType,
      r: QualType) -> QualType {
    let sym = crate::intern(token);
    let Some(os) = self.operator_overload_set(e, sym) else {
      return self.err(e, DiagKind::NoMatchingBinaryOperator)
    };
    let args = Arguments::positional(vec![
      Typed::new(Value::Empty, l.ty), Typed::new(Value::Empty, r.ty),
    ]);
    match self.resolve_overloads(e, &os, &args) {
      Ok(qt) => qt,
      Err(_) => self.err(e, DiagKind::InvalidBinaryOperatorOverload),
    }
  }

  fn verify_unary_overload(&mut self, token: &str, e: ExprId, operand: QualType) -> QualType {
    let sym = crate::intern(token);
    let Some(os) = self.operator_overload_set(e, sym) else {
      return self.err(e, DiagKind::NoMatchingBinaryOperator)
    };
    let args = Arguments::positional(vec![Typed::new(Value::Empty, operand.ty)]);
    match self.resolve_overloads(e, &os, &args) {
      Ok(qt) => qt,
      Err(_) => self.err(e, DiagKind::InvalidBinaryOperatorOverload),
    }
  }

  // The callable declarations named by an operator token, visible from the
  // operator's scope.
  fn operator_overload_set(&mut self, e: ExprId, sym: crate::Symbol) -> Option<OverloadSet> {
    let lookup = self.ast.lookup(self.ast.scope_of(e), sym);
    let mut os = OverloadSet::new();
    for d in lookup.visible {
      let qt = self.decl_use_qt(d, e).ok()?;
      if !qt.ok() || !qt.ty.callable() { return None }
      os.insert(self.module, d.0);
    }
    if os.is_empty() { None } else { Some(os) }
  }

  pub(super) fn verify_unop(&mut self, e: ExprId, op: Unop, operand: ExprId) -> QualType {
    let o = self.verify_type(operand);
    if !o.ok() { return QualType::error() }
    let quals = o.quals & Quals::CONST;
    match op {
      Unop::Not => {
        if o.ty == ty::bool_ty() || matches!(o.ty.kind(), TypeKind::Flags(_)) {
          QualType::new(o.ty, quals)
        } else {
          self.verify_unary_overload(op.token(), e, o)
        }
      }
      Unop::Neg => {
        let negatable = matches!(o.ty.kind(),
          TypeKind::Int(ity) if ity.signed()) || matches!(o.ty.kind(), TypeKind::Float(_));
        if negatable {
          QualType::new(o.ty, quals)
        } else {
          self.verify_unary_overload(op.token(), e, o)
        }
      }
      Unop::Addr => {
        if o.ref_q() {
          QualType::non_constant(ty::ptr(o.ty))
        } else {
          self.err(e, DiagKind::NonAddressableExpression)
        }
      }
      Unop::Deref => {
        match Self::pointee(o.ty) {
          Some((t, buf)) => {
            let mut quals = Quals::REF;
            if buf { quals |= Quals::BUF }
            QualType::new(t, quals)
          }
          None => self.err(e, DiagKind::DereferencingNonPointer(o.ty)),
        }
      }
      Unop::Eval => {
        if !o.constant_q() {
          return self.err(e, DiagKind::NonConstantEvaluation)
        }
        QualType::constant(o.ty)
      }
      Unop::Copy => {
        if o.ty.flags().contains(TypeFlags::COPY) {
          QualType::new(o.ty, quals)
        } else {
          self.err(e, DiagKind::MoveOrCopyUnsupported(o.ty))
        }
      }
      Unop::Move => {
        if o.ty.flags().contains(TypeFlags::MOVE) {
          QualType::new(o.ty, quals)
        } else {
          self.err(e, DiagKind::MoveOrCopyUnsupported(o.ty))
        }
      }
      Unop::PtrTy | Unop::BufPtrTy => {
        if o.ty != ty::type_ty() {
          return self.err(e, DiagKind::NotAType(o.ty))
        }
        if !o.constant_q() {
          return self.err(e, DiagKind::NonConstantTypeInDeclaration)
        }
        QualType::constant(ty::type_ty())
      }
    }
  }
}
