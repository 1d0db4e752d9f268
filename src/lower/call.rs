//! Call lowering: arguments are prepared in parameter order with implicit
//! conversions and default substitution; results arrive through out-param
//! registers that the caller moves into its destination.

use crate::ir::{AnyFn, FnRef, Instruction, Operand, Value};
use crate::types::ast::{ExprId, ExprKind};
use crate::types::ty::{self, Quals, Type, TypeKind};
use crate::types::{Arguments, ModuleId, Typed};
use crate::verify::Compiler;
use super::Lower;

impl Compiler<'_> {
  /// Emit a call expression, returning its (first) result.
  pub(crate) fn emit_call(&mut self, lw: &mut Lower, e: ExprId) -> Operand {
    let qt = self.qt_anywhere(e).unwrap_or_else(ty::QualType::error);
    // Constant calls (generic struct instantiation, `bytes`, ...) were
    // computed during verification.
    if qt.constant_q() {
      return Operand::Value(self.evaluate_or_diagnose(e, qt.ty))
    }

    let ExprKind::Call { callee, args } = &self.ast[e].k else { unreachable!() };
    let (callee, args) = (*callee, args.clone());

    let Some((f, fty)) = self.callee_operand(lw, callee, &args) else {
      return Operand::Value(Value::Empty)
    };
    let arg_ops = self.prepare_call_args(lw, &args, fty);
    let n_rets = fty.as_fn().map_or(0, |d| d.rets.len());
    let outs = lw.b.out_params(n_rets);
    let out_regs = outs.0.clone();
    lw.b.push(Instruction::Call { fty, f, args: arg_ops.into(), outs });

    match &*out_regs {
      [] => Operand::Value(Value::Empty),
      &[r] => {
        let ret_ty = fty.as_fn().map_or_else(ty::error_ty, |d| d.rets[0]);
        if ret_ty.is_big(self.arch) {
          // Big results land in a temporary the caller owns.
          let slot = lw.b.tmp_alloca(ret_ty);
          lw.b.push(Instruction::Move { ty: ret_ty, from: r.into(), to: slot.into() });
          slot.into()
        } else {
          r.into()
        }
      }
      rs => {
        let data = fty.as_fn().expect("function type");
        let tuple = ty::tup(data.rets.to_vec());
        let slot = lw.b.tmp_alloca(tuple);
        for (i, &r) in rs.iter().enumerate() {
          let field = lw.b.reserve();
          lw.b.push(Instruction::Field {
            base_ty: tuple, base: slot.into(), index: i as u32, out: field,
          });
          lw.b.push(Instruction::Move { ty: data.rets[i], from: r.into(), to: field.into() });
        }
        slot.into()
      }
    }
  }

  /// Emit a call whose results initialize the given slots.
  pub(crate) fn emit_call_into(&mut self, lw: &mut Lower, e: ExprId,
      dests: &[Typed<Operand>]) {
    let ExprKind::Call { callee, args } = &self.ast[e].k else { unreachable!() };
    let (callee, args) = (*callee, args.clone());
    let Some((f, fty)) = self.callee_operand(lw, callee, &args) else { return };
    let arg_ops = self.prepare_call_args(lw, &args, fty);
    let n_rets = fty.as_fn().map_or(0, |d| d.rets.len());
    let outs = lw.b.out_params(n_rets);
    let out_regs = outs.0.clone();
    lw.b.push(Instruction::Call { fty, f, args: arg_ops.into(), outs });
    for (r, dest) in out_regs.iter().zip(dests) {
      lw.b.push(Instruction::Move { ty: dest.ty, from: (*r).into(), to: dest.val.clone() });
    }
  }

  /// Emit a call at a site whose dispatch was already resolved, with
  /// pre-lowered argument operands (operator overloads).
  pub(crate) fn emit_known_call(&mut self, lw: &mut Lower, key: ExprId,
      args: Vec<Operand>) -> Operand {
    let Some((m, target, callable)) = self.dispatched_callee(key) else {
      return Operand::Value(Value::Empty)
    };
    let Some(fref) = self.lowered_callee(m, target) else {
      return Operand::Value(Value::Empty)
    };
    let fty = self.any_fn_type(AnyFn::Native(fref)).unwrap_or_else(ty::error_ty);
    let n_rets = fty.as_fn().map_or(0, |d| d.rets.len());
    let outs = lw.b.out_params(n_rets);
    let first = outs.0.first().copied();
    lw.b.push(Instruction::Call {
      fty, f: Operand::Value(Value::Fn(AnyFn::Native(fref))), args: args.into(), outs,
    });
    first.map_or(Operand::Value(Value::Empty), Operand::Reg)
  }

  // The callee as an operand plus its concrete function type, resolving
  // dispatch and lowering the target on demand.
  fn callee_operand(&mut self, lw: &mut Lower, callee: ExprId, args: &Arguments<ExprId>)
      -> Option<(Operand, Type)> {
    if let Some((m, target, callable)) = self.dispatched_callee(callee) {
      match callable.kind() {
        TypeKind::Fn(_) => {
          let fref = self.lowered_callee(m, target)?;
          return Some((Operand::Value(Value::Fn(AnyFn::Native(fref))), callable))
        }
        TypeKind::GenericFn(_) => {
          let arg_vals = self.verify_arguments(args)?;
          if m != self.module { return None }
          let lit = self.generic_expr_of(m, target)?;
          let inst = self.instantiate(lit, &arg_vals).ok()?;
          let concrete = inst.concrete;
          let fref = self.in_ctx(inst.ctx, |c| {
            c.verify_body(lit);
            c.ensure_fn_lowered(lit)
          })?;
          return Some((Operand::Value(Value::Fn(AnyFn::Native(fref))), concrete))
        }
        _ => {}
      }
    }
    // No dispatch record: the callee is a runtime function value.
    let qt = self.qt_anywhere(callee)?;
    if !matches!(qt.ty.kind(), TypeKind::Fn(_)) { return None }
    let f = self.emit_value(lw, callee);
    Some((f, qt.ty))
  }

  /// Resolve a dispatched-to declaration to its lowered function.
  pub(crate) fn lowered_callee(&mut self, m: ModuleId, target: ExprId) -> Option<FnRef> {
    let lit = self.generic_expr_of(m, target)?;
    if m == self.module {
      self.verify_body(lit);
      self.ensure_fn_lowered(lit)
    } else {
      let id = self.importer.get(m).tree.find_fn(crate::context::CtxId::ROOT, lit)?;
      Some(FnRef { module: m, id })
    }
  }

  // The function/jump/struct literal behind a dispatch target, which may be
  // the declaration that binds it.
  pub(crate) fn generic_expr_of(&self, m: ModuleId, target: ExprId) -> Option<ExprId> {
    let ast = if m == self.module { self.ast } else { &self.importer.get(m).ast };
    match &ast[target].k {
      ExprKind::Decl(d) => d.init,
      _ => Some(target),
    }
  }

  // Arguments in parameter order, inserting implicit conversions and
  // defaults for missing arguments.
  fn prepare_call_args(&mut self, lw: &mut Lower, args: &Arguments<ExprId>, fty: Type)
      -> Vec<Operand> {
    let Some(data) = fty.as_fn() else { return vec![] };
    let params = data.params.clone();
    let mut out = Vec::with_capacity(params.len());
    for (i, p) in params.iter().enumerate() {
      let arg = args.pos.get(i).copied().or_else(|| args.named(p.name).copied());
      match arg {
        Some(a) => out.push(self.prepare_one_arg(lw, a, p.value)),
        None => {
          // Default-value substitution. The default expression lives in the
          // callee's scope; constants evaluate, anything else lowers here.
          let default = self.default_expr_for(fty, i);
          match default {
            Some(d) => {
              let v = self.emit_value(lw, d);
              out.push(v);
            }
            None => out.push(Operand::Value(Value::Empty)),
          }
        }
      }
    }
    out
  }

  fn prepare_one_arg(&mut self, lw: &mut Lower, a: ExprId, param_ty: Type) -> Operand {
    let arg_qt = self.qt_anywhere(a).unwrap_or_else(ty::QualType::error);
    // Value-to-pointer: a reference argument binds a pointer parameter by
    // taking its address.
    if let TypeKind::Ptr(pointee) = param_ty.kind() {
      if arg_qt.ty == *pointee && arg_qt.quals.contains(Quals::REF) {
        return self.emit_ref(lw, a)
      }
    }
    let v = self.emit_value(lw, a);
    // Buffer pointers coerce to plain pointers and the null literal adopts
    // any pointer type without representation change; numeric implicit
    // conversions are identities at this level.
    v
  }

  // The default initializer of parameter `i` of a lowered function type.
  fn default_expr_for(&self, fty: Type, i: usize) -> Option<ExprId> {
    for (_, def) in self.tree.fn_defs.enum_iter() {
      if def.ty == fty {
        let decl = def.params[i].value.val;
        return self.ast.decl(decl).init
      }
    }
    None
  }
}
