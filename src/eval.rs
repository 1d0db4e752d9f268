//! The compile-time evaluator.
//!
//! Constant expressions are evaluated structurally where possible; anything
//! that crosses a function boundary is lowered to IR and run on the
//! interpreter ([`crate::interp`]). Evaluation is re-entrant: it may trigger
//! further verification, instantiation and lowering.

use num::BigInt;
use crate::diag::DiagKind;
use crate::ir::{self, AnyFn, Addr, FnRef, JumpRef, Value};
use crate::types::ast::{Binop, DeclFlags, ExprId, ExprKind, Literal, Unop};
use crate::types::ty::{self, Completeness, Type, TypeKind};
use crate::types::{Span, Typed};
use crate::verify::Compiler;

/// Why compile-time evaluation failed.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
  /// The expression has no compile-time value.
  #[error("expression is not a compile-time constant")]
  NotConstant,
  /// The value's type is required complete but is not.
  #[error("type is not complete")]
  Incomplete,
  /// The interpreter trapped.
  #[error("{0}")]
  Trap(String),
}

/// A compile-time evaluation failure, reported through the diagnostic
/// consumer where it is encountered.
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct EvaluationFailure {
  /// Why.
  pub cause: FailureCause,
  /// Where.
  pub range: Span,
}

impl Compiler<'_> {
  fn fail(&self, e: ExprId, cause: FailureCause) -> EvaluationFailure {
    EvaluationFailure { cause, range: self.span(e) }
  }

  /// Evaluate `e`, which must already verify as a constant of type `ty`.
  /// With `must_complete`, a resulting struct type must be fully complete.
  pub fn evaluate(&mut self, e: ExprId, ty: Type, must_complete: bool)
      -> Result<Value, EvaluationFailure> {
    let v = self.eval(e)?;
    if must_complete {
      if let Value::Type(t) = v {
        if t.completeness() < Completeness::Complete {
          return Err(self.fail(e, FailureCause::Incomplete))
        }
      }
    }
    if let (Value::Int(n), TypeKind::Int(ity)) = (&v, ty.kind()) {
      if !ity.contains(n) {
        return Err(self.fail(e, FailureCause::Trap(format!("{n} does not fit in {ity}"))))
      }
    }
    Ok(v)
  }

  /// Evaluate a constant expression, consuming the failure as a diagnostic.
  pub fn evaluate_or_diagnose(&mut self, e: ExprId, ty: Type) -> Value {
    match self.evaluate(e, ty, false) {
      Ok(v) => v,
      Err(f) => {
        self.report(e, DiagKind::EvaluationFailure(f.to_string()));
        Value::Empty
      }
    }
  }

  /// Evaluate an expression known to denote a type, consuming failures.
  pub fn evaluate_or_diagnose_as_type(&mut self, e: ExprId) -> Option<Type> {
    match self.evaluate(e, ty::type_ty(), false) {
      Ok(v) => v.as_type(),
      Err(f) => {
        self.report(e, DiagKind::EvaluationFailure(f.to_string()));
        None
      }
    }
  }

  /// Evaluate `e` if its qualified type is constant; non-constants carry the
  /// empty value, preserving only their type.
  pub fn evaluate_if_constant(&mut self, e: ExprId, qt: ty::QualType) -> Typed<Value> {
    if qt.constant_q() {
      match self.evaluate(e, qt.ty, false) {
        Ok(v) => return Typed::new(v, qt.ty),
        Err(f) => self.report(e, DiagKind::EvaluationFailure(f.to_string())),
      }
    }
    Typed::new(Value::Empty, qt.ty)
  }

  /// Run a fully lowered function on the interpreter.
  pub fn interpret_at_compile_time(&mut self, f: FnRef, args: Vec<Value>)
      -> Result<Vec<Value>, String> {
    crate::interp::Interp::new(self).call(f, args)
  }

  fn eval(&mut self, e: ExprId) -> Result<Value, EvaluationFailure> {
    match &self.ast[e].k {
      ExprKind::Terminal(lit) => Ok(match lit {
        Literal::Int(n) => Value::Int(n.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Char(c) => Value::Char(*c),
        Literal::String(s) => Value::String(*s),
        Literal::Type(t) => Value::Type(*t),
        Literal::Null => Value::Addr(Addr::Null),
      }),
      ExprKind::Ident(name) => self.eval_ident(e, *name),
      ExprKind::Binop { op, lhs, rhs } => {
        let (op, lhs, rhs) = (*op, *lhs, *rhs);
        let (ir_op, swap) = ast_binop_to_ir(op)
          .ok_or_else(|| self.fail(e, FailureCause::NotConstant))?;
        let mut a = self.eval(lhs)?;
        let mut b = self.eval(rhs)?;
        if swap { std::mem::swap(&mut a, &mut b) }
        crate::ir::builder::fold_binop(ir_op, &a, &b)
          .ok_or_else(|| self.fail(e, FailureCause::NotConstant))
      }
      ExprKind::Unop { op, operand } => {
        let (op, operand) = (*op, *operand);
        match op {
          Unop::Eval | Unop::Copy | Unop::Move => self.eval(operand),
          Unop::Not => match self.eval(operand)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::FlagsVal(v) => Ok(Value::FlagsVal(!v)),
            _ => Err(self.fail(e, FailureCause::NotConstant)),
          },
          Unop::Neg => match self.eval(operand)? {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::F64(bits) => Ok(Value::f64(-f64::from_bits(bits))),
            Value::F32(bits) => Ok(Value::f32(-f32::from_bits(bits))),
            _ => Err(self.fail(e, FailureCause::NotConstant)),
          },
          Unop::PtrTy => {
            let t = self.eval_type(operand)?;
            Ok(Value::Type(ty::ptr(t)))
          }
          Unop::BufPtrTy => {
            let t = self.eval_type(operand)?;
            Ok(Value::Type(ty::buf_ptr(t)))
          }
          Unop::Addr | Unop::Deref => Err(self.fail(e, FailureCause::NotConstant)),
        }
      }
      ExprKind::Cast { expr, .. } => self.eval(*expr),
      ExprKind::Call { .. } => self.eval_call(e),
      ExprKind::Access { base, member } => {
        let (base, member) = (*base, *member);
        let b = self.eval(base)?;
        match b {
          Value::Module(m) => {
            let found = self.importer.get(m).exported(member);
            match &*found {
              &[d] => Ok(self.foreign_constant(m, d)),
              _ => Err(self.fail(e, FailureCause::NotConstant)),
            }
          }
          Value::Type(t) => match t.kind() {
            TypeKind::Enum(data) => data.value(member).map(Value::EnumVal)
              .ok_or_else(|| self.fail(e, FailureCause::NotConstant)),
            TypeKind::Flags(data) => data.value(member).map(Value::FlagsVal)
              .ok_or_else(|| self.fail(e, FailureCause::NotConstant)),
            _ => Err(self.fail(e, FailureCause::NotConstant)),
          },
          _ => Err(self.fail(e, FailureCause::NotConstant)),
        }
      }
      ExprKind::ArrayType { len, elem } => {
        let (len, elem) = (*len, *elem);
        let n = match self.eval(len)? {
          Value::Int(n) => u64::try_from(n.clone())
            .map_err(|_| self.fail(e, FailureCause::NotConstant))?,
          _ => return Err(self.fail(e, FailureCause::NotConstant)),
        };
        let t = self.eval_type(elem)?;
        Ok(Value::Type(ty::arr(n, t)))
      }
      ExprKind::FnLit(_) => {
        if matches!(self.qt_anywhere(e).map(|qt| qt.ty.kind()),
            Some(TypeKind::GenericFn(_))) {
          return Ok(Value::Empty)
        }
        match self.ensure_fn_lowered(e) {
          Some(f) => Ok(Value::Fn(AnyFn::Native(f))),
          None => Err(self.fail(e, FailureCause::NotConstant)),
        }
      }
      ExprKind::JumpLit(_) => {
        match self.ensure_jump_lowered(e) {
          Some(j) => Ok(Value::Jump(j)),
          None => Err(self.fail(e, FailureCause::NotConstant)),
        }
      }
      ExprKind::StructLit { .. } | ExprKind::ParamStructLit { .. } => {
        match self.tree.find_struct(self.ctx, e) {
          Some(t) => Ok(Value::Type(t)),
          None => {
            if let ExprKind::ParamStructLit { .. } = self.ast[e].k {
              return Err(self.fail(e, FailureCause::NotConstant))
            }
            Ok(Value::Type(self.allocate_struct_for(e)))
          }
        }
      }
      ExprKind::EnumLit { .. } => {
        self.verify_type(e);
        self.tree.find_struct(self.ctx, e).map(Value::Type)
          .ok_or_else(|| self.fail(e, FailureCause::NotConstant))
      }
      ExprKind::ScopeLit(_) => self.eval_scope_literal(e),
      ExprKind::BlockLit(_) => self.eval_block_literal(e),
      ExprKind::Import(_) => {
        let mut ctx = self.ctx;
        loop {
          if let Some(m) = self.tree.imported_module(ctx, e) {
            return Ok(Value::Module(m))
          }
          match self.tree.parent(ctx) {
            Some(p) => ctx = p,
            None => return Err(self.fail(e, FailureCause::NotConstant)),
          }
        }
      }
      ExprKind::Index { base, index } => {
        let (base, index) = (*base, *index);
        let b = self.eval(base)?;
        let i = self.eval(index)?;
        match (b, i) {
          (Value::String(s), Value::Int(n)) => {
            let s = s.as_str();
            usize::try_from(n).ok().and_then(|n| s.as_bytes().get(n))
              .map(|&b| Value::Char(b as char))
              .ok_or_else(|| self.fail(e, FailureCause::Trap("index out of range".into())))
          }
          _ => Err(self.fail(e, FailureCause::NotConstant)),
        }
      }
      _ => Err(self.fail(e, FailureCause::NotConstant)),
    }
  }

  fn eval_type(&mut self, e: ExprId) -> Result<Type, EvaluationFailure> {
    match self.eval(e)? {
      Value::Type(t) => Ok(t),
      _ => Err(self.fail(e, FailureCause::NotConstant)),
    }
  }

  fn eval_ident(&mut self, e: ExprId, name: crate::Symbol) -> Result<Value, EvaluationFailure> {
    if let Some(&(m, d)) = self.xmodule_decls.get(&e) {
      let v = self.foreign_constant(m, d);
      if !v.is_empty() { return Ok(v) }
    }
    let decls = self.tree.decls(self.ctx, e)
      .or_else(|| {
        // The identifier may have been resolved in an ancestor context.
        let mut ctx = self.ctx;
        loop {
          match self.tree.parent(ctx) {
            Some(p) => ctx = p,
            None => return None,
          }
          if let Some(ds) = self.tree.decls(ctx, e) { return Some(ds) }
        }
      })
      .map(<[crate::types::ast::DeclId]>::to_vec);
    match decls.as_deref() {
      Some(&[d]) => {
        let v = self.tree.load_constant(self.ctx, d);
        if !v.is_empty() { return Ok(v) }
        let decl = self.ast.decl(d).clone();
        if decl.flags.contains(DeclFlags::CONST) {
          if let Some(init) = decl.init {
            let v = self.eval(init)?;
            self.tree.set_constant(self.ctx, d, v.clone(), false);
            return Ok(v)
          }
          // A default-initialized constant takes its type's zero value.
          if let Some(qt) = self.qt_anywhere(d.0) {
            if let Some(v) = default_value(qt.ty) { return Ok(v) }
          }
        }
        Err(self.fail(e, FailureCause::NotConstant))
      }
      Some(ds) if ds.len() > 1 => Err(self.fail(e, FailureCause::NotConstant)),
      _ => {
        if let Some(b) = crate::types::entity::BuiltinFn::from_symbol(name) {
          return Ok(Value::Fn(AnyFn::Builtin(b)))
        }
        Err(self.fail(e, FailureCause::NotConstant))
      }
    }
  }

  fn eval_call(&mut self, e: ExprId) -> Result<Value, EvaluationFailure> {
    let ExprKind::Call { callee, args } = &self.ast[e].k else { unreachable!() };
    let (callee, args) = (*callee, args.clone());

    // Builtins evaluate directly.
    if let ExprKind::Ident(name) = self.ast[callee].k {
      if let Some(b) = crate::types::entity::BuiltinFn::from_symbol(name) {
        if self.ast.lookup(self.ast.scope_of(callee), name).visible.is_empty() {
          return self.eval_builtin_call(e, b, &args)
        }
      }
    }

    let Some((m, target, callable)) = self.dispatched_callee(callee) else {
      return Err(self.fail(e, FailureCause::NotConstant))
    };

    match callable.kind() {
      TypeKind::GenericStruct(_) => {
        let Some(arg_vals) = self.verify_arguments(&args) else {
          return Err(self.fail(e, FailureCause::NotConstant))
        };
        let decl_init = self.generic_expr_of(m, target)
          .ok_or_else(|| self.fail(e, FailureCause::NotConstant))?;
        match self.instantiate(decl_init, &arg_vals) {
          Ok(inst) => Ok(Value::Type(inst.concrete)),
          Err(_) => Err(self.fail(e, FailureCause::NotConstant)),
        }
      }
      TypeKind::GenericFn(_) => {
        let Some(arg_vals) = self.verify_arguments(&args) else {
          return Err(self.fail(e, FailureCause::NotConstant))
        };
        if m != self.module { return Err(self.fail(e, FailureCause::NotConstant)) }
        let lit = self.generic_expr_of(m, target)
          .ok_or_else(|| self.fail(e, FailureCause::NotConstant))?;
        let inst = self.instantiate(lit, &arg_vals)
          .map_err(|_| self.fail(e, FailureCause::NotConstant))?;
        let fty = inst.concrete;
        let fref = self.in_ctx(inst.ctx, |c| c.ensure_fn_lowered(lit))
          .ok_or_else(|| self.fail(e, FailureCause::NotConstant))?;
        let arg_vals = self.eval_call_args(&args, fty)?;
        self.interpret_at_compile_time(fref, arg_vals)
          .map_err(|msg| self.fail(e, FailureCause::Trap(msg)))
          .map(|mut outs| if outs.len() == 1 { outs.swap_remove(0) } else { Value::Empty })
      }
      TypeKind::Fn(_) => {
        let fref = self.lowered_callee(m, target)
          .ok_or_else(|| self.fail(e, FailureCause::NotConstant))?;
        let arg_vals = self.eval_call_args(&args, callable)?;
        self.interpret_at_compile_time(fref, arg_vals)
          .map_err(|msg| self.fail(e, FailureCause::Trap(msg)))
          .map(|mut outs| if outs.len() == 1 { outs.swap_remove(0) } else { Value::Empty })
      }
      _ => Err(self.fail(e, FailureCause::NotConstant)),
    }
  }

  // Evaluate call arguments in parameter order, substituting defaults.
  fn eval_call_args(&mut self, args: &crate::types::Arguments<ExprId>, fty: Type)
      -> Result<Vec<Value>, EvaluationFailure> {
    let Some(f) = fty.as_fn() else { return Ok(vec![]) };
    let params = f.params.clone();
    let mut out = vec![];
    for (i, p) in params.iter().enumerate() {
      if let Some(&a) = args.pos.get(i).or_else(|| args.named(p.name)) {
        out.push(self.eval(a)?);
      } else {
        // Missing argument: the parameter's default.
        let d = self.default_of_param(fty, i)
          .ok_or_else(|| EvaluationFailure {
            cause: FailureCause::NotConstant, range: Span::default(),
          })?;
        out.push(self.eval(d)?);
      }
    }
    Ok(out)
  }

  fn eval_builtin_call(&mut self, e: ExprId, b: crate::types::entity::BuiltinFn,
      args: &crate::types::Arguments<ExprId>) -> Result<Value, EvaluationFailure> {
    use crate::types::entity::BuiltinFn;
    match b {
      BuiltinFn::Bytes => {
        let t = self.eval_type(args.pos[0])?;
        Ok(Value::Int(BigInt::from(t.bytes(self.arch))))
      }
      BuiltinFn::Alignment => {
        let t = self.eval_type(args.pos[0])?;
        Ok(Value::Int(BigInt::from(t.align(self.arch))))
      }
      BuiltinFn::Opaque => {
        Ok(Value::Type(ty::new_struct(self.module, self.ast.scope_of(e))))
      }
      BuiltinFn::Foreign => {
        let name = match self.eval(args.pos[0])? {
          Value::String(s) => s,
          _ => return Err(self.fail(e, FailureCause::NotConstant)),
        };
        Ok(Value::ForeignFn(name))
      }
      BuiltinFn::DebugIr => Ok(Value::Empty),
    }
  }

  fn eval_scope_literal(&mut self, e: ExprId) -> Result<Value, EvaluationFailure> {
    if let Some(id) = self.tree.find_scope_val(self.ctx, e) {
      return Ok(Value::Scope(crate::ir::ScopeRef { module: self.module, id }))
    }
    let ExprKind::ScopeLit(s) = &self.ast[e].k else { unreachable!() };
    let (state_ty, decls) = (s.state_ty, s.decls.clone());

    let state_ty = match state_ty {
      Some(t) => Some(self.eval_type(t)?),
      None => None,
    };
    let mut enter = vec![];
    let mut exit = vec![];
    let mut blocks = vec![];
    let enter_sym = crate::intern("enter");
    let exit_sym = crate::intern("exit");
    for &d in &*decls {
      let decl = self.ast.decl(d).clone();
      let Some(init) = decl.init else { continue };
      let v = self.eval(init)?;
      if decl.name == enter_sym {
        match v {
          Value::Jump(JumpRef { module, id }) if module == self.module => enter.push(id),
          _ => return Err(self.fail(d.0, FailureCause::NotConstant)),
        }
      } else if decl.name == exit_sym {
        match v {
          Value::Fn(f) => exit.push(f),
          _ => return Err(self.fail(d.0, FailureCause::NotConstant)),
        }
      } else {
        match v {
          Value::Block(r) if r.module == self.module => blocks.push((decl.name, r.id)),
          _ => return Err(self.fail(d.0, FailureCause::NotConstant)),
        }
      }
    }
    let id = self.tree.add_scope(crate::ir::CompiledScope {
      state_ty, enter, exit, blocks,
      defn_scope: self.ast.scope_of(e),
    });
    self.tree.set_scope_val(self.ctx, e, id);
    Ok(Value::Scope(crate::ir::ScopeRef { module: self.module, id }))
  }

  fn eval_block_literal(&mut self, e: ExprId) -> Result<Value, EvaluationFailure> {
    if let Some(id) = self.tree.find_block_val(self.ctx, e) {
      return Ok(Value::Block(crate::ir::BlockRef { module: self.module, id }))
    }
    let ExprKind::BlockLit(b) = &self.ast[e].k else { unreachable!() };
    let decls = b.decls.clone();
    let mut before = vec![];
    let mut after = vec![];
    let before_sym = crate::intern("before");
    let after_sym = crate::intern("after");
    for &d in &*decls {
      let decl = self.ast.decl(d).clone();
      let Some(init) = decl.init else { continue };
      let v = self.eval(init)?;
      if decl.name == before_sym {
        match v {
          Value::Fn(f) => before.push(f),
          _ => return Err(self.fail(d.0, FailureCause::NotConstant)),
        }
      } else if decl.name == after_sym {
        match v {
          Value::Jump(crate::ir::JumpRef { module, id }) if module == self.module =>
            after.push(id),
          _ => return Err(self.fail(d.0, FailureCause::NotConstant)),
        }
      }
    }
    let id = self.tree.add_block(crate::ir::CompiledBlock { before, after });
    self.tree.set_block_val(self.ctx, e, id);
    Ok(Value::Block(crate::ir::BlockRef { module: self.module, id }))
  }

}

// Map a source operator to the IR operator, flipping `>`/`>=` into the
// canonical `<`/`<=` with swapped operands.
fn ast_binop_to_ir(op: Binop) -> Option<(ir::BinOp, bool)> {
  Some(match op {
    Binop::Add => (ir::BinOp::Add, false),
    Binop::Sub => (ir::BinOp::Sub, false),
    Binop::Mul => (ir::BinOp::Mul, false),
    Binop::Div => (ir::BinOp::Div, false),
    Binop::Mod => (ir::BinOp::Mod, false),
    Binop::And => (ir::BinOp::And, false),
    Binop::Or => (ir::BinOp::Or, false),
    Binop::Xor => (ir::BinOp::Xor, false),
    Binop::Lt => (ir::BinOp::Lt, false),
    Binop::Le => (ir::BinOp::Le, false),
    Binop::Gt => (ir::BinOp::Lt, true),
    Binop::Ge => (ir::BinOp::Le, true),
    Binop::Eq => (ir::BinOp::Eq, false),
    Binop::Ne => (ir::BinOp::Ne, false),
    _ => return None,
  })
}

fn default_value(t: Type) -> Option<Value> {
  match t.kind() {
    TypeKind::Int(_) => Some(Value::Int(BigInt::from(0))),
    TypeKind::Float(crate::types::FloatTy::F32) => Some(Value::f32(0.0)),
    TypeKind::Float(crate::types::FloatTy::F64) => Some(Value::f64(0.0)),
    TypeKind::Prim(ty::Prim::Bool) => Some(Value::Bool(false)),
    TypeKind::Prim(ty::Prim::Char) => Some(Value::Char('\0')),
    TypeKind::Flags(_) => Some(Value::FlagsVal(0)),
    _ => None,
  }
}

impl Compiler<'_> {
  // The default initializer expression of parameter `i`, recovered from the
  // declaration behind the lowered function's parameter list.
  fn default_of_param(&self, fty: Type, i: usize) -> Option<ExprId> {
    let fref = self.fn_by_type(fty)?;
    let def = if fref.module == self.module {
      &self.tree.fn_defs[fref.id]
    } else {
      &self.importer.get(fref.module).tree.fn_defs[fref.id]
    };
    let decl = def.params[i].value.val;
    let ast = if fref.module == self.module { self.ast } else {
      &self.importer.get(fref.module).ast
    };
    ast.decl(decl).init
  }

  // A lowered function with the given type, if any exists.
  fn fn_by_type(&self, fty: Type) -> Option<FnRef> {
    for (id, def) in self.tree.fn_defs.enum_iter() {
      if def.ty == fty {
        return Some(FnRef { module: self.module, id })
      }
    }
    None
  }
}
