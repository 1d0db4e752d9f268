//! Struct completion: one IR function per struct which, when executed at
//! compile time, constructs the struct's field table; then synthesis of the
//! special member functions, with user-supplied members taking precedence.

use crate::ir::{AnyFn, CompiledFn, FnRef, Instruction, Operand, Reg, Value};
use crate::queue::WorkResult;
use crate::types::ast::{DeclFlags, DeclId, ExprId, ExprKind};
use crate::types::ty::{self, Completeness, SpecialMembers, Type, TypeFlags};
use crate::types::Params;
use crate::verify::Compiler;
use super::Lower;

impl Compiler<'_> {
  /// Queue entry point: complete the struct allocated for a struct literal.
  pub(crate) fn complete_struct(&mut self, e: ExprId) -> WorkResult {
    let Some(strukt) = self.tree.find_struct(self.ctx, e) else {
      return WorkResult::Deferred
    };
    if strukt.completeness() == Completeness::Complete { return WorkResult::Success }

    let field_decls = match &self.ast[e].k {
      ExprKind::StructLit { fields } | ExprKind::ParamStructLit { fields, .. } => fields.clone(),
      _ => return WorkResult::Failure,
    };

    // Constant function members become special members rather than data
    // fields.
    let (data_fields, user_specials) = self.split_members(&field_decls);

    if strukt.completeness() == Completeness::Incomplete {
      match self.run_completion_fn(strukt, &data_fields) {
        Ok(()) => {}
        Err(result) => return result,
      }
    }

    let specials = self.synthesize_specials(strukt, user_specials);
    strukt.complete_struct_specials(specials);
    WorkResult::Success
  }

  // Partition struct literal members into data fields and user-supplied
  // special members (constant declarations named `copy`, `move`, `destroy`).
  fn split_members(&mut self, decls: &[DeclId]) -> (Vec<DeclId>, UserSpecials) {
    let copy_sym = crate::intern("copy");
    let move_sym = crate::intern("move");
    let destroy_sym = crate::intern("destroy");
    let mut fields = vec![];
    let mut specials = UserSpecials::default();
    for &d in decls {
      let decl = self.ast.decl(d).clone();
      if decl.flags.contains(DeclFlags::CONST) {
        let target = if decl.name == copy_sym { Some(&mut specials.copy) }
          else if decl.name == move_sym { Some(&mut specials.mov) }
          else if decl.name == destroy_sym { Some(&mut specials.destroy) }
          else { None };
        if let (Some(slot), Some(init)) = (target, decl.init) {
          if let Ok(Value::Fn(f)) = self.evaluate(init, ty::error_ty(), false) {
            *slot = Some(f);
            continue
          }
        }
        // Other constants in a struct body are scoped declarations, not
        // fields.
        continue
      }
      fields.push(d);
    }
    (fields, specials)
  }

  // Emit and immediately execute the completion function, which computes
  // every field type and finishes the field table.
  fn run_completion_fn(&mut self, strukt: Type, field_decls: &[DeclId])
      -> Result<(), WorkResult> {
    let mut lw = Lower::new(self.arch);
    let mut fields = Vec::with_capacity(field_decls.len());
    for &d in field_decls {
      let decl = self.ast.decl(d).clone();
      let ty_operand = match decl.ty {
        Some(t) => self.emit_value(&mut lw, t),
        None => match decl.init {
          Some(init) => {
            let qt = self.qt_anywhere(init)
              .unwrap_or_else(ty::QualType::error);
            Operand::Value(Value::Type(qt.ty))
          }
          None => {
            self.report(d.0, crate::diag::DiagKind::IncompleteField);
            return Err(WorkResult::Failure)
          }
        },
      };
      if matches!(ty_operand, Operand::Value(Value::Empty)) {
        self.report(d.0, crate::diag::DiagKind::IncompleteField);
        return Err(WorkResult::Failure)
      }
      fields.push((decl.name, ty_operand, decl.hashtags, decl.init));
    }
    let out = lw.b.reserve();
    lw.b.push(Instruction::TyStruct { strukt, fields: fields.into(), out });
    lw.b.push(Instruction::SetRet { index: 0, val: out.into() });
    lw.b.return_jump();

    let id = self.tree.fn_defs.push(CompiledFn {
      ty: ty::func(Params::new(), vec![ty::type_ty()]),
      params: Params::new(),
      group: lw.b.finish(),
    });
    let fref = FnRef { module: self.module, id };
    match self.interpret_at_compile_time(fref, vec![]) {
      Ok(_) => Ok(()),
      Err(msg) => {
        self.report(ExprId(0), crate::diag::DiagKind::EvaluationFailure(msg));
        Err(WorkResult::Failure)
      }
    }
  }

  // Field-wise defaults for whatever the user did not supply.
  fn synthesize_specials(&mut self, strukt: Type, user: UserSpecials) -> SpecialMembers {
    let flags = strukt.flags();
    let destroy = user.destroy.or_else(|| {
      flags.contains(TypeFlags::HAS_DTOR)
        .then(|| self.synthesize_destroy(strukt))
    });
    let assign = |c: &mut Self, copy: bool| c.synthesize_assign(strukt, copy);
    let copy_assign = user.copy.or_else(|| {
      flags.contains(TypeFlags::COPY).then(|| assign(self, true))
    });
    let move_assign = user.mov.or_else(|| {
      flags.contains(TypeFlags::MOVE).then(|| assign(self, false))
    });
    SpecialMembers {
      copy_init: copy_assign,
      move_init: move_assign,
      copy_assign,
      move_assign,
      destroy,
    }
  }

  // destroy :: (p: *S) -> (): field-wise destruction in reverse order.
  fn synthesize_destroy(&mut self, strukt: Type) -> AnyFn {
    let mut lw = Lower::new(self.arch);
    lw.b.reserve();
    let p: Operand = Reg(0).into();
    let fields = strukt.as_struct().and_then(|s| s.fields()).unwrap_or(&[]).to_vec();
    for (i, field) in fields.iter().enumerate().rev() {
      if !field.ty.flags().contains(TypeFlags::HAS_DTOR) { continue }
      let out = lw.b.reserve();
      lw.b.push(Instruction::Field { base_ty: strukt, base: p.clone(), index: i as u32, out });
      self.emit_destroy(&mut lw, field.ty, out.into());
    }
    lw.b.return_jump();
    self.push_special_fn(lw, &[("p", ty::ptr(strukt))])
  }

  // assign :: (to: *S, from: *S) -> (): field-wise move or copy.
  fn synthesize_assign(&mut self, strukt: Type, copy: bool) -> AnyFn {
    let mut lw = Lower::new(self.arch);
    lw.b.reserve();
    lw.b.reserve();
    let (to, from): (Operand, Operand) = (Reg(0).into(), Reg(1).into());
    let fields = strukt.as_struct().and_then(|s| s.fields()).unwrap_or(&[]).to_vec();
    for (i, field) in fields.iter().enumerate() {
      let to_f = lw.b.reserve();
      lw.b.push(Instruction::Field {
        base_ty: strukt, base: to.clone(), index: i as u32, out: to_f,
      });
      let from_f = lw.b.reserve();
      lw.b.push(Instruction::Field {
        base_ty: strukt, base: from.clone(), index: i as u32, out: from_f,
      });
      if copy {
        lw.b.push(Instruction::Copy { ty: field.ty, from: from_f.into(), to: to_f.into() });
      } else {
        lw.b.push(Instruction::Move { ty: field.ty, from: from_f.into(), to: to_f.into() });
      }
    }
    lw.b.return_jump();
    self.push_special_fn(lw, &[("to", ty::ptr(strukt)), ("from", ty::ptr(strukt))])
  }

  fn push_special_fn(&mut self, lw: Lower, params: &[(&str, Type)]) -> AnyFn {
    let mut ps = Params::new();
    for &(name, t) in params {
      ps.push(crate::intern(name), t, crate::types::ParamFlags::empty());
    }
    let fty = ty::func(ps, vec![]);
    let id = self.tree.fn_defs.push(CompiledFn {
      ty: fty,
      params: Params::new(),
      group: lw.b.finish(),
    });
    AnyFn::Native(FnRef { module: self.module, id })
  }
}

#[derive(Default)]
struct UserSpecials {
  copy: Option<AnyFn>,
  mov: Option<AnyFn>,
  destroy: Option<AnyFn>,
}
