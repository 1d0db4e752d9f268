//! Expression lowering: rvalue emission, lvalue emission, and the
//! move/copy-init and assignment forms that write into caller slots.

use if_chain::if_chain;
use crate::diag::DiagKind;
use crate::ir::{BinOp, Instruction, Operand, UnOp, Value};
use crate::types::ast::{Binop, ExprId, ExprKind, Literal, Unop};
use crate::types::ty::{self, Type, TypeKind};
use crate::types::Typed;
use crate::verify::Compiler;
use super::Lower;

fn ir_binop(op: Binop) -> Option<(BinOp, bool)> {
  Some(match op {
    Binop::Add => (BinOp::Add, false),
    Binop::Sub => (BinOp::Sub, false),
    Binop::Mul => (BinOp::Mul, false),
    Binop::Div => (BinOp::Div, false),
    Binop::Mod => (BinOp::Mod, false),
    Binop::And => (BinOp::And, false),
    Binop::Or => (BinOp::Or, false),
    Binop::Xor => (BinOp::Xor, false),
    Binop::Lt => (BinOp::Lt, false),
    Binop::Le => (BinOp::Le, false),
    Binop::Gt => (BinOp::Lt, true),
    Binop::Ge => (BinOp::Le, true),
    Binop::Eq => (BinOp::Eq, false),
    Binop::Ne => (BinOp::Ne, false),
    _ => return None,
  })
}

impl Compiler<'_> {
  /// Emit an expression as a value. Aggregates are represented by the
  /// address of a temporary.
  pub(crate) fn emit_value(&mut self, lw: &mut Lower, e: ExprId) -> Operand {
    let qt = self.qt_anywhere(e).unwrap_or_else(ty::QualType::error);

    // Constant expressions with no side effects read their stored value.
    if qt.constant_q() && self.is_pure_constant(e) {
      return Operand::Value(self.evaluate_or_diagnose(e, qt.ty))
    }

    match &self.ast[e].k {
      ExprKind::Terminal(lit) => Operand::Value(match lit {
        Literal::Int(n) => Value::Int(n.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Char(c) => Value::Char(*c),
        Literal::String(s) => Value::String(*s),
        Literal::Type(t) => Value::Type(*t),
        Literal::Null => Value::Addr(crate::ir::Addr::Null),
      }),
      ExprKind::Ident(_) => {
        let addr = self.emit_ref(lw, e);
        lw.b.load(qt.ty, addr)
      }
      ExprKind::Decl(_) => Operand::Value(Value::Empty),
      ExprKind::Binop { op, lhs, rhs } => {
        let (op, lhs, rhs) = (*op, *lhs, *rhs);
        self.emit_binop(lw, e, op, lhs, rhs)
      }
      ExprKind::Unop { op, operand } => {
        let (op, operand) = (*op, *operand);
        self.emit_unop(lw, e, op, operand, qt.ty)
      }
      ExprKind::Call { .. } => self.emit_call(lw, e),
      ExprKind::Cast { expr, .. } => {
        let expr = *expr;
        let from = self.qt_anywhere(expr).map_or_else(ty::error_ty, |q| q.ty);
        let v = self.emit_value(lw, expr);
        lw.b.cast(from, qt.ty, v)
      }
      ExprKind::Index { .. } | ExprKind::Access { .. } => {
        let addr = self.emit_ref(lw, e);
        lw.b.load(qt.ty, addr)
      }
      ExprKind::ArrayLit(elems) => {
        let elems = elems.clone();
        let TypeKind::Array { elem, .. } = qt.ty.kind() else {
          return Operand::Value(Value::Empty)
        };
        let slot = lw.b.tmp_alloca(qt.ty);
        for (i, &x) in elems.iter().enumerate() {
          let out = lw.b.reserve();
          lw.b.push(Instruction::PtrIncr {
            elem: *elem, ptr: slot.into(), by: Operand::Value(Value::from(i as i64)), out,
          });
          let dest = [Typed::new(Operand::Reg(out), *elem)];
          self.emit_move_init(lw, x, &dest);
        }
        slot.into()
      }
      ExprKind::DesignatedInit { inits, .. } => {
        let inits = inits.clone();
        let slot = lw.b.tmp_alloca(qt.ty);
        self.emit_designated_init(lw, qt.ty, &inits, slot);
        slot.into()
      }
      ExprKind::ScopeNode { .. } => self.emit_scope_node(lw, e),
      ExprKind::Goto { .. } => {
        self.emit_goto(lw, e);
        Operand::Value(Value::Empty)
      }
      ExprKind::Return(_) | ExprKind::Yield { .. } | ExprKind::BlockNode { .. } =>
        Operand::Value(Value::Empty),
      // Everything else is a compile-time construct.
      _ => Operand::Value(self.evaluate_or_diagnose(e, qt.ty)),
    }
  }

  // Nodes whose constant value may be read directly without emitting code.
  fn is_pure_constant(&self, e: ExprId) -> bool {
    matches!(&self.ast[e].k,
      ExprKind::Terminal(_) | ExprKind::Ident(_) | ExprKind::Access { .. } |
      ExprKind::ArrayType { .. } | ExprKind::StructLit { .. } |
      ExprKind::ParamStructLit { .. } | ExprKind::EnumLit { .. } |
      ExprKind::ScopeLit(_) | ExprKind::BlockLit(_) | ExprKind::FnLit(_) |
      ExprKind::JumpLit(_) | ExprKind::Import(_) |
      ExprKind::Unop { op: Unop::PtrTy | Unop::BufPtrTy | Unop::Eval, .. })
  }

  /// Emit an expression as an lvalue: a register holding its address.
  pub(crate) fn emit_ref(&mut self, lw: &mut Lower, e: ExprId) -> Operand {
    let qt = self.qt_anywhere(e).unwrap_or_else(ty::QualType::error);
    match &self.ast[e].k {
      ExprKind::Ident(_) => {
        if_chain! {
          if let Some(ds) = self.decls_anywhere(e);
          if let &[d] = &*ds;
          if let Some(addr) = self.tree.addr(self.ctx, d);
          then { return addr.into() }
        }
        // Constants are spilled to a temporary when their address is taken.
        let v = self.evaluate_or_diagnose(e, qt.ty);
        let slot = lw.b.tmp_alloca(qt.ty);
        lw.b.store(qt.ty, Operand::Value(v), slot.into());
        slot.into()
      }
      ExprKind::Index { base, index } => {
        let (base, index) = (*base, *index);
        let base_qt = self.qt_anywhere(base).unwrap_or_else(ty::QualType::error);
        let i = self.emit_value(lw, index);
        match base_qt.ty.kind() {
          TypeKind::Array { elem, .. } => {
            let addr = self.emit_ref(lw, base);
            let out = lw.b.reserve();
            lw.b.push(Instruction::PtrIncr { elem: *elem, ptr: addr, by: i, out });
            out.into()
          }
          TypeKind::BufPtr(elem) => {
            let p = self.emit_value(lw, base);
            let out = lw.b.reserve();
            lw.b.push(Instruction::PtrIncr { elem: *elem, ptr: p, by: i, out });
            out.into()
          }
          TypeKind::Slice(elem) => {
            let p = self.emit_value(lw, base);
            let out = lw.b.reserve();
            lw.b.push(Instruction::PtrIncr { elem: *elem, ptr: p, by: i, out });
            out.into()
          }
          TypeKind::Tuple(_) => {
            let addr = self.emit_ref(lw, base);
            let idx = self.qt_anywhere(index)
              .filter(|q| q.constant_q())
              .and_then(|q| self.evaluate(index, q.ty, false).ok())
              .and_then(|v| v.as_u64())
              .unwrap_or(0);
            let out = lw.b.reserve();
            lw.b.push(Instruction::Field {
              base_ty: base_qt.ty, base: addr, index: idx as u32, out,
            });
            out.into()
          }
          _ => Operand::Value(Value::Empty),
        }
      }
      ExprKind::Access { base, member } => {
        let (base, member) = (*base, *member);
        let base_qt = self.qt_anywhere(base).unwrap_or_else(ty::QualType::error);
        if let Some(s) = base_qt.ty.as_struct() {
          let Some((index, _)) = s.field(member) else {
            return Operand::Value(Value::Empty)
          };
          let addr = self.emit_ref(lw, base);
          let out = lw.b.reserve();
          lw.b.push(Instruction::Field {
            base_ty: base_qt.ty, base: addr, index: index as u32, out,
          });
          return out.into()
        }
        Operand::Value(Value::Empty)
      }
      ExprKind::Unop { op: Unop::Deref, operand } => {
        let operand = *operand;
        self.emit_value(lw, operand)
      }
      _ => {
        let slot = lw.b.tmp_alloca(qt.ty);
        let dest = [Typed::new(Operand::Reg(slot), qt.ty)];
        self.emit_move_init(lw, e, &dest);
        slot.into()
      }
    }
  }

  // Identifier resolution results, searching ancestor contexts too.
  pub(crate) fn decls_anywhere(&self, e: ExprId) -> Option<Vec<crate::types::ast::DeclId>> {
    let mut ctx = self.ctx;
    loop {
      if let Some(ds) = self.tree.decls(ctx, e) { return Some(ds.to_vec()) }
      ctx = self.tree.parent(ctx)?;
    }
  }

  fn emit_binop(&mut self, lw: &mut Lower, e: ExprId, op: Binop, lhs: ExprId, rhs: ExprId)
      -> Operand {
    // Assignments are statements.
    if op == Binop::Assign {
      let addr = self.emit_ref(lw, lhs);
      let lhs_ty = self.qt_anywhere(lhs).map_or_else(ty::error_ty, |q| q.ty);
      self.emit_assign(lw, rhs, &[Typed::new(addr, lhs_ty)]);
      return Operand::Value(Value::Empty)
    }
    if let Some(base) = op.base_op() {
      let addr = self.emit_ref(lw, lhs);
      let lhs_ty = self.qt_anywhere(lhs).map_or_else(ty::error_ty, |q| q.ty);
      let cur = lw.b.load(lhs_ty, addr.clone());
      let rhs_v = self.emit_value(lw, rhs);
      let (ir_op, swap) = ir_binop(base).expect("compound assignment base");
      let (a, b) = if swap { (rhs_v, cur) } else { (cur, rhs_v) };
      let v = lw.b.binop(ir_op, lhs_ty, a, b);
      lw.b.store(lhs_ty, v, addr);
      return Operand::Value(Value::Empty)
    }

    // A resolved overload means this operator lowers as a call.
    if self.tree.viable_overloads(self.ctx, e).is_some_and(|os| !os.is_empty()) {
      let l = self.emit_value(lw, lhs);
      let r = self.emit_value(lw, rhs);
      return self.emit_known_call(lw, e, vec![l, r])
    }

    let lhs_ty = self.qt_anywhere(lhs).map_or_else(ty::error_ty, |q| q.ty);
    let rhs_ty = self.qt_anywhere(rhs).map_or_else(ty::error_ty, |q| q.ty);
    let l = self.emit_value(lw, lhs);
    let r = self.emit_value(lw, rhs);

    // Buffer pointer arithmetic lowers to pointer displacement.
    if let (TypeKind::BufPtr(elem), TypeKind::Int(_)) = (lhs_ty.kind(), rhs_ty.kind()) {
      let by = if op == Binop::Sub { lw.b.unop(UnOp::Neg, rhs_ty, r) } else { r };
      let out = lw.b.reserve();
      lw.b.push(Instruction::PtrIncr { elem: *elem, ptr: l, by, out });
      return out.into()
    }

    let (ir_op, swap) = match ir_binop(op) {
      Some(x) => x,
      None => return Operand::Value(Value::Empty),
    };
    let (a, b) = if swap { (r, l) } else { (l, r) };
    lw.b.binop(ir_op, lhs_ty, a, b)
  }

  fn emit_unop(&mut self, lw: &mut Lower, e: ExprId, op: Unop, operand: ExprId, out_ty: Type)
      -> Operand {
    match op {
      Unop::Not => {
        let v = self.emit_value(lw, operand);
        lw.b.unop(UnOp::Not, out_ty, v)
      }
      Unop::Neg => {
        let v = self.emit_value(lw, operand);
        lw.b.unop(UnOp::Neg, out_ty, v)
      }
      Unop::Addr => self.emit_ref(lw, operand),
      Unop::Deref => {
        let p = self.emit_value(lw, operand);
        lw.b.load(out_ty, p)
      }
      Unop::Eval => Operand::Value(self.evaluate_or_diagnose(e, out_ty)),
      Unop::Copy | Unop::Move => self.emit_value(lw, operand),
      Unop::PtrTy | Unop::BufPtrTy =>
        Operand::Value(self.evaluate_or_diagnose(e, out_ty)),
    }
  }

  /// Initialize the destination slots by moving out of `e`.
  pub(crate) fn emit_move_init(&mut self, lw: &mut Lower, e: ExprId,
      dests: &[Typed<Operand>]) {
    match &self.ast[e].k {
      ExprKind::Call { .. } if dests.len() > 1 => {
        self.emit_call_into(lw, e, dests);
        return
      }
      // An explicit `copy` initializer copies instead of moving.
      ExprKind::Unop { op: Unop::Copy, operand } => {
        let operand = *operand;
        self.emit_copy_init(lw, operand, dests);
        return
      }
      _ => {}
    }
    let v = self.emit_value(lw, e);
    if let Some(dest) = dests.first() {
      lw.b.push(Instruction::Move { ty: dest.ty, from: v, to: dest.val.clone() });
    }
  }

  /// Initialize the destination slots by copying out of `e`.
  pub(crate) fn emit_copy_init(&mut self, lw: &mut Lower, e: ExprId,
      dests: &[Typed<Operand>]) {
    let v = self.emit_value(lw, e);
    if let Some(dest) = dests.first() {
      lw.b.push(Instruction::Copy { ty: dest.ty, from: v, to: dest.val.clone() });
    }
  }

  /// Assign `e` over the already initialized destination slots.
  pub(crate) fn emit_assign(&mut self, lw: &mut Lower, e: ExprId, dests: &[Typed<Operand>]) {
    if let ExprKind::Unop { op: Unop::Copy, operand } = self.ast[e].k {
      let v = self.emit_value(lw, operand);
      if let Some(dest) = dests.first() {
        let dest_val = dest.val.clone();
        self.emit_copy_assign(lw, dest.ty, v, dest_val);
      }
      return
    }
    let v = self.emit_value(lw, e);
    if let Some(dest) = dests.first() {
      let dest_val = dest.val.clone();
      self.emit_move_assign(lw, dest.ty, v, dest_val);
    }
  }

  fn emit_designated_init(&mut self, lw: &mut Lower, t: Type,
      inits: &[(crate::Symbol, ExprId)], slot: crate::ir::Reg) {
    let Some(s) = t.as_struct() else { return };
    let Some(fields) = s.fields() else {
      self.diag.consume(crate::diag::Diagnostic {
        kind: DiagKind::IncompleteField,
        range: crate::types::Span::default(),
      });
      return
    };
    let fields = fields.to_vec();
    for (index, field) in fields.iter().enumerate() {
      let out = lw.b.reserve();
      lw.b.push(Instruction::Field {
        base_ty: t, base: slot.into(), index: index as u32, out,
      });
      if let Some(&(_, init)) = inits.iter().find(|&&(n, _)| n == field.name) {
        let dest = [Typed::new(Operand::Reg(out), field.ty)];
        self.emit_move_init(lw, init, &dest);
      } else if let Some(default) = field.default {
        let dest = [Typed::new(Operand::Reg(out), field.ty)];
        self.emit_move_init(lw, default, &dest);
      } else {
        self.emit_default_init(lw, field.ty, out.into());
      }
    }
  }
}
