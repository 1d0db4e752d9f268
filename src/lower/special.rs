//! Special-member emission: default-initialization, destruction, and
//! move/copy assignment, dispatched on the type. Structs call their
//! completed special members; aggregates recurse fieldwise; scalars emit
//! single instructions.

use crate::ir::{AnyFn, Instruction, Operand, Value};
use crate::types::ty::{Type, TypeFlags, TypeKind};
use crate::verify::Compiler;
use super::Lower;

impl Compiler<'_> {
  /// Default-initialize the storage at `addr`.
  pub(crate) fn emit_default_init(&mut self, lw: &mut Lower, t: Type, addr: Operand) {
    match t.kind() {
      TypeKind::Struct(s) => {
        if let Some(fields) = s.fields() {
          let fields = fields.to_vec();
          for (i, field) in fields.iter().enumerate() {
            let out = lw.b.reserve();
            lw.b.push(Instruction::Field {
              base_ty: t, base: addr.clone(), index: i as u32, out,
            });
            match field.default {
              Some(init) => {
                let dest = [crate::types::Typed::new(Operand::Reg(out), field.ty)];
                self.emit_move_init(lw, init, &dest);
              }
              None => self.emit_default_init(lw, field.ty, out.into()),
            }
          }
        }
      }
      TypeKind::Tuple(ts) => {
        let ts = ts.to_vec();
        for (i, &ft) in ts.iter().enumerate() {
          let out = lw.b.reserve();
          lw.b.push(Instruction::Field {
            base_ty: t, base: addr.clone(), index: i as u32, out,
          });
          self.emit_default_init(lw, ft, out.into());
        }
      }
      TypeKind::Array { len, elem } => {
        let (len, elem) = (*len, *elem);
        for i in 0..len {
          let out = lw.b.reserve();
          lw.b.push(Instruction::PtrIncr {
            elem, ptr: addr.clone(), by: Operand::Value(Value::from(i as i64)), out,
          });
          self.emit_default_init(lw, elem, out.into());
        }
      }
      _ => lw.b.push(Instruction::Init { ty: t, dst: addr }),
    }
  }

  /// Destroy the value at `addr`, in field order reversed for aggregates.
  pub(crate) fn emit_destroy(&mut self, lw: &mut Lower, t: Type, addr: Operand) {
    if !t.flags().contains(TypeFlags::HAS_DTOR) { return }
    match t.kind() {
      TypeKind::Struct(s) => {
        if let Some(destroy) = s.specials().and_then(|sp| sp.destroy) {
          self.emit_special_call(lw, destroy, &[addr]);
        } else if let Some(fields) = s.fields() {
          let fields = fields.to_vec();
          for (i, field) in fields.iter().enumerate().rev() {
            let out = lw.b.reserve();
            lw.b.push(Instruction::Field {
              base_ty: t, base: addr.clone(), index: i as u32, out,
            });
            self.emit_destroy(lw, field.ty, out.into());
          }
        }
      }
      TypeKind::Tuple(ts) => {
        let ts = ts.to_vec();
        for (i, &ft) in ts.iter().enumerate().rev() {
          let out = lw.b.reserve();
          lw.b.push(Instruction::Field {
            base_ty: t, base: addr.clone(), index: i as u32, out,
          });
          self.emit_destroy(lw, ft, out.into());
        }
      }
      TypeKind::Array { len, elem } => {
        let (len, elem) = (*len, *elem);
        for i in (0..len).rev() {
          let out = lw.b.reserve();
          lw.b.push(Instruction::PtrIncr {
            elem, ptr: addr.clone(), by: Operand::Value(Value::from(i as i64)), out,
          });
          self.emit_destroy(lw, elem, out.into());
        }
      }
      _ => lw.b.push(Instruction::Destroy { ty: t, dst: addr }),
    }
  }

  /// Move-assign `from` over the initialized storage at `to`.
  pub(crate) fn emit_move_assign(&mut self, lw: &mut Lower, t: Type, from: Operand,
      to: Operand) {
    if let Some(assign) = t.as_struct()
        .and_then(|s| s.specials())
        .and_then(|sp| sp.move_assign) {
      self.emit_special_call(lw, assign, &[to, from]);
      return
    }
    lw.b.push(Instruction::Move { ty: t, from, to });
  }

  /// Copy-assign `from` over the initialized storage at `to`.
  pub(crate) fn emit_copy_assign(&mut self, lw: &mut Lower, t: Type, from: Operand,
      to: Operand) {
    if let Some(assign) = t.as_struct()
        .and_then(|s| s.specials())
        .and_then(|sp| sp.copy_assign) {
      self.emit_special_call(lw, assign, &[to, from]);
      return
    }
    lw.b.push(Instruction::Copy { ty: t, from, to });
  }

  fn emit_special_call(&mut self, lw: &mut Lower, f: AnyFn, args: &[Operand]) {
    let Some(fty) = self.any_fn_type(f) else { return };
    lw.b.push(Instruction::Call {
      fty,
      f: Operand::Value(Value::Fn(f)),
      args: args.to_vec().into(),
      outs: crate::ir::OutParams::default(),
    });
  }
}
