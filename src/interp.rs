//! A reference interpreter for lowered IR, used for compile-time execution.
//!
//! The interpreter is a value holding a handle back to the compiler driver
//! rather than ambient state; evaluation may re-enter the compiler through
//! builtin calls. Each activation owns a frame with a register file and a
//! byte stack; scalar stores are encoded little-endian into the stack, and
//! values without a byte representation (types, functions) live in an
//! overlay keyed by address.

use bumpalo::Bump;
use hashbrown::HashMap;
use num::{BigInt, ToPrimitive};
use crate::ir::{self, Addr, AnyFn, BinOp, BlockId, CompiledFn, FnRef, Instruction, JumpCmd,
  Operand, Reg, UnOp, Value};
use crate::types::entity::BuiltinFn;
use crate::types::ty::{self, Field, Type, TypeKind};
use crate::types::{FloatTy, Idx};
use crate::verify::Compiler;

const FUEL: usize = 1_000_000;

/// The compile-time executor.
pub struct Interp<'c, 'a> {
  c: &'c mut Compiler<'a>,
  fuel: usize,
}

struct Frame<'b> {
  regs: Vec<Value>,
  stack: bumpalo::collections::Vec<'b, u8>,
  overlay: HashMap<u64, Value>,
}

impl<'c, 'a> Interp<'c, 'a> {
  /// An interpreter bound to the driving compiler.
  pub fn new(c: &'c mut Compiler<'a>) -> Self { Interp { c, fuel: FUEL } }

  fn fn_def(&self, f: FnRef) -> CompiledFn {
    if f.module == self.c.module {
      self.c.tree.fn_defs[f.id].clone()
    } else {
      self.c.importer.get(f.module).tree.fn_defs[f.id].clone()
    }
  }

  /// Run a fully lowered function with the given argument values, returning
  /// its outputs.
  pub fn call(&mut self, f: FnRef, args: Vec<Value>) -> Result<Vec<Value>, String> {
    let def = self.fn_def(f);
    if def.group.blocks.is_empty() {
      return Err("function body has not been lowered".into())
    }
    let n_rets = def.ty.as_fn().map_or(0, |data| data.rets.len());
    let bump = Bump::new();
    let mut frame = Frame {
      regs: vec![Value::Empty; def.group.num_regs as usize],
      stack: bumpalo::collections::Vec::new_in(&bump),
      overlay: HashMap::new(),
    };
    for (i, a) in args.into_iter().enumerate() {
      frame.regs[i] = a;
    }
    let mut rets = vec![Value::Empty; n_rets];

    let mut block = BlockId::ENTRY;
    let mut prev: Option<BlockId> = None;
    loop {
      if self.fuel == 0 { return Err("compile-time execution fuel exhausted".into()) }
      self.fuel -= 1;
      let b = &def.group.blocks[block];
      for instr in &b.instrs {
        self.step(&mut frame, &mut rets, prev, instr)?;
      }
      match b.jump.as_ref().ok_or("unterminated block")? {
        JumpCmd::Uncond(t) => { prev = Some(block); block = *t }
        JumpCmd::Cond { cond, then_, else_ } => {
          let v = Self::operand(&frame, cond)?;
          let taken = v.as_bool().ok_or("condition is not a bool")?;
          prev = Some(block);
          block = if taken { *then_ } else { *else_ };
        }
        JumpCmd::Return => return Ok(rets),
        JumpCmd::Unreachable => return Err("reached unreachable code".into()),
        JumpCmd::Choose { .. } | JumpCmd::Exit(_) =>
          return Err("jump group terminator escaped inlining".into()),
      }
    }
  }

  fn operand(frame: &Frame<'_>, o: &Operand) -> Result<Value, String> {
    match o {
      Operand::Reg(r) => Ok(frame.regs[r.into_usize()].clone()),
      Operand::Value(Value::Reg(r)) => Ok(frame.regs[r.into_usize()].clone()),
      Operand::Value(v) => Ok(v.clone()),
    }
  }

  fn set(frame: &mut Frame<'_>, r: Reg, v: Value) { frame.regs[r.into_usize()] = v }

  fn alloca(&self, frame: &mut Frame<'_>, t: Type) -> Addr {
    let align = self.c.arch.ptr_bytes.max(t.align(self.c.arch));
    let off = (frame.stack.len() as u64).div_ceil(align) * align;
    let end = off + t.bytes(self.c.arch).max(1);
    frame.stack.resize(end as usize, 0);
    Addr::Stack(off)
  }

  fn store(&self, frame: &mut Frame<'_>, t: Type, val: &Value, addr: Addr) -> Result<(), String> {
    let Addr::Stack(off) = addr else { return Err(format!("store to {addr:?}")) };
    let size = t.bytes(self.c.arch) as usize;
    let off_usize = off as usize;
    if off_usize + size > frame.stack.len() {
      frame.stack.resize(off_usize + size.max(1), 0);
    }
    match val {
      Value::Bool(_) | Value::Char(_) | Value::Int(_) | Value::F32(_) | Value::F64(_) |
      Value::EnumVal(_) | Value::FlagsVal(_) | Value::Buffer(_) => {
        val.write_le(&mut frame.stack[off_usize..off_usize + size]);
        frame.overlay.remove(&off);
      }
      v => { frame.overlay.insert(off, v.clone()); }
    }
    Ok(())
  }

  fn load(&self, frame: &Frame<'_>, t: Type, addr: Addr) -> Result<Value, String> {
    let Addr::Stack(off) = addr else { return Err(format!("load from {addr:?}")) };
    if let Some(v) = frame.overlay.get(&off) { return Ok(v.clone()) }
    let size = t.bytes(self.c.arch) as usize;
    let off = off as usize;
    let bytes = frame.stack.get(off..off + size).ok_or("load out of range")?;
    Ok(match t.kind() {
      TypeKind::Int(ity) => Value::read_int_le(bytes, ity.signed()),
      TypeKind::Prim(ty::Prim::Bool) => Value::Bool(bytes[0] != 0),
      TypeKind::Prim(ty::Prim::Char) => Value::Char(bytes[0] as char),
      TypeKind::Float(FloatTy::F32) => Value::F32(u32::from_le_bytes(bytes.try_into().unwrap())),
      TypeKind::Float(FloatTy::F64) => Value::F64(u64::from_le_bytes(bytes.try_into().unwrap())),
      TypeKind::Enum(_) => Value::EnumVal(u64::from_le_bytes(bytes.try_into().unwrap())),
      TypeKind::Flags(_) => Value::FlagsVal(u64::from_le_bytes(bytes.try_into().unwrap())),
      _ => Value::Buffer(bytes.into()),
    })
  }

  fn field_offset(&self, t: Type, index: usize) -> Result<(u64, Type), String> {
    let tys: Vec<Type> = match t.kind() {
      TypeKind::Struct(s) => s.fields().ok_or("incomplete struct")?
        .iter().map(|f| f.ty).collect(),
      TypeKind::Tuple(ts) => ts.to_vec(),
      _ => return Err(format!("field access on {t}")),
    };
    let mut off: u64 = 0;
    for (i, &ft) in tys.iter().enumerate() {
      off = off.div_ceil(ft.align(self.c.arch)) * ft.align(self.c.arch);
      if i == index { return Ok((off, ft)) }
      off += ft.bytes(self.c.arch);
    }
    Err("field index out of range".into())
  }

  #[allow(clippy::too_many_lines)]
  fn step(&mut self, frame: &mut Frame<'_>, rets: &mut [Value], prev: Option<BlockId>,
      instr: &Instruction) -> Result<(), String> {
    match instr {
      Instruction::Binop { op, lhs, rhs, out, .. } => {
        let a = Self::operand(frame, lhs)?;
        let b = Self::operand(frame, rhs)?;
        let v = fold_or_float(*op, &a, &b).ok_or_else(|| format!("binop on {a} and {b}"))?;
        Self::set(frame, *out, v);
      }
      Instruction::Unop { op, operand, out, .. } => {
        let v = match (op, Self::operand(frame, operand)?) {
          (UnOp::Neg, Value::Int(n)) => Value::Int(-n),
          (UnOp::Neg, Value::F64(b)) => Value::f64(-f64::from_bits(b)),
          (UnOp::Neg, Value::F32(b)) => Value::f32(-f32::from_bits(b)),
          (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
          (UnOp::Not, Value::FlagsVal(v)) => Value::FlagsVal(!v),
          (op, v) => return Err(format!("unop {op:?} on {v}")),
        };
        Self::set(frame, *out, v);
      }
      Instruction::Cast { to, operand, out, .. } => {
        let v = match (Self::operand(frame, operand)?, to.kind()) {
          (Value::Int(n), TypeKind::Int(_)) => Value::Int(n),
          (Value::Int(n), TypeKind::Float(FloatTy::F64)) =>
            Value::f64(n.to_f64().unwrap_or(0.0)),
          (Value::F32(b), TypeKind::Float(FloatTy::F64)) =>
            Value::f64(f64::from(f32::from_bits(b))),
          (v, _) => v,
        };
        Self::set(frame, *out, v);
      }
      Instruction::Load { ty, addr, out } => {
        let a = match Self::operand(frame, addr)? {
          Value::Addr(a) => a,
          v => return Err(format!("load from non-address {v}")),
        };
        let v = self.load(frame, *ty, a)?;
        Self::set(frame, *out, v);
      }
      Instruction::Store { ty, val, addr } => {
        let v = Self::operand(frame, val)?;
        let a = match Self::operand(frame, addr)? {
          Value::Addr(a) => a,
          v => return Err(format!("store to non-address {v}")),
        };
        self.store(frame, *ty, &v, a)?;
      }
      Instruction::Alloca { ty, out } => {
        let a = self.alloca(frame, *ty);
        Self::set(frame, *out, Value::Addr(a));
      }
      Instruction::PtrIncr { elem, ptr, by, out } => {
        let a = match Self::operand(frame, ptr)? {
          Value::Addr(a) => a,
          v => return Err(format!("pointer arithmetic on {v}")),
        };
        let by = Self::operand(frame, by)?.as_int().and_then(ToPrimitive::to_i64)
          .ok_or("non-integer pointer increment")?;
        let stride = elem.bytes(self.c.arch) as i64;
        Self::set(frame, *out, Value::Addr(a.offset(by * stride)));
      }
      Instruction::Field { base_ty, base, index, out } => {
        let a = match Self::operand(frame, base)? {
          Value::Addr(a) => a,
          v => return Err(format!("field access on {v}")),
        };
        let (off, _) = self.field_offset(*base_ty, *index as usize)?;
        Self::set(frame, *out, Value::Addr(a.offset(off as i64)));
      }
      Instruction::VariantType { addr, out } => {
        let a = match Self::operand(frame, addr)? {
          Value::Addr(a) => a,
          v => return Err(format!("variant access on {v}")),
        };
        Self::set(frame, *out, Value::Addr(a));
      }
      Instruction::VariantValue { addr, out, .. } => {
        let a = match Self::operand(frame, addr)? {
          Value::Addr(a) => a,
          v => return Err(format!("variant access on {v}")),
        };
        Self::set(frame, *out, Value::Addr(a.offset(self.c.arch.ptr_bytes as i64)));
      }
      Instruction::Call { f, args, outs, .. } => {
        let callee = Self::operand(frame, f)?;
        let mut arg_vals = Vec::with_capacity(args.len());
        for a in &**args { arg_vals.push(Self::operand(frame, a)?) }
        let results = match callee {
          Value::Fn(AnyFn::Native(fref)) => self.call(fref, arg_vals)?,
          Value::Fn(AnyFn::Builtin(b)) => self.builtin(b, &arg_vals)?,
          v => return Err(format!("call of non-function {v}")),
        };
        for (r, v) in outs.0.iter().zip(results) {
          Self::set(frame, *r, v);
        }
      }
      Instruction::Phi { incoming, out, .. } => {
        let prev = prev.ok_or("phi in entry block")?;
        let (_, o) = incoming.iter().find(|&&(b, _)| b == prev)
          .ok_or("phi misses predecessor")?;
        let v = Self::operand(frame, o)?;
        Self::set(frame, *out, v);
      }
      Instruction::Register { val, out, .. } => {
        let v = Self::operand(frame, val)?;
        Self::set(frame, *out, v);
      }
      Instruction::TyPtr { operand, out } => {
        let t = Self::operand(frame, operand)?.as_type().ok_or("not a type")?;
        Self::set(frame, *out, Value::Type(ty::ptr(t)));
      }
      Instruction::TyBufPtr { operand, out } => {
        let t = Self::operand(frame, operand)?.as_type().ok_or("not a type")?;
        Self::set(frame, *out, Value::Type(ty::buf_ptr(t)));
      }
      Instruction::TyArray { len, elem, out } => {
        let n = Self::operand(frame, len)?.as_u64().ok_or("not a length")?;
        let t = Self::operand(frame, elem)?.as_type().ok_or("not a type")?;
        Self::set(frame, *out, Value::Type(ty::arr(n, t)));
      }
      Instruction::TyArrow { params, rets: out_tys, out } => {
        let mut ps = crate::types::Params::new();
        for (name, o) in &**params {
          let t = Self::operand(frame, o)?.as_type().ok_or("not a type")?;
          ps.push(*name, t, crate::types::ParamFlags::empty());
        }
        let mut rs = vec![];
        for o in &**out_tys {
          rs.push(Self::operand(frame, o)?.as_type().ok_or("not a type")?);
        }
        Self::set(frame, *out, Value::Type(ty::func(ps, rs)));
      }
      Instruction::TyTuple { elems, out } => {
        let mut ts = vec![];
        for o in &**elems { ts.push(Self::operand(frame, o)?.as_type().ok_or("not a type")?) }
        Self::set(frame, *out, Value::Type(ty::tup(ts)));
      }
      Instruction::TyVariant { elems, out } => {
        let mut ts = vec![];
        for o in &**elems { ts.push(Self::operand(frame, o)?.as_type().ok_or("not a type")?) }
        Self::set(frame, *out, Value::Type(ty::var(ts)));
      }
      Instruction::TyEnum { module, names, specified, out } => {
        let t = ty::new_enum(*module, self.enum_members(frame, names, specified, false)?);
        Self::set(frame, *out, Value::Type(t));
      }
      Instruction::TyFlags { module, names, specified, out } => {
        let t = ty::new_flags(*module, self.enum_members(frame, names, specified, true)?);
        Self::set(frame, *out, Value::Type(t));
      }
      Instruction::TyStruct { strukt, fields, out } => {
        let mut out_fields = Vec::with_capacity(fields.len());
        for (name, o, hashtags, default) in &**fields {
          let t = Self::operand(frame, o)?.as_type().ok_or("not a type")?;
          out_fields.push(Field { name: *name, ty: t, hashtags: *hashtags, default: *default });
        }
        strukt.complete_struct_fields(out_fields.into());
        Self::set(frame, *out, Value::Type(*strukt));
      }
      Instruction::Init { ty, dst } => {
        let a = match Self::operand(frame, dst)? {
          Value::Addr(a) => a,
          v => return Err(format!("init of {v}")),
        };
        if let Some(v) = zero_value(*ty) { self.store(frame, *ty, &v, a)? }
      }
      Instruction::Destroy { dst, .. } => {
        if let Value::Addr(Addr::Stack(off)) = Self::operand(frame, dst)? {
          frame.overlay.remove(&off);
        }
      }
      Instruction::Move { ty, from, to } | Instruction::Copy { ty, from, to } => {
        let from = match Self::operand(frame, from)? {
          Value::Addr(a) => self.load(frame, *ty, a)?,
          v => v,
        };
        let a = match Self::operand(frame, to)? {
          Value::Addr(a) => a,
          v => return Err(format!("move into {v}")),
        };
        self.store(frame, *ty, &from, a)?;
      }
      Instruction::Print { val, .. } => {
        let v = Self::operand(frame, val)?;
        log::info!("print: {v}");
      }
      Instruction::DebugIr => log::debug!("debug_ir"),
      Instruction::LoadSymbol { name, out, .. } => {
        Self::set(frame, *out, Value::ForeignFn(*name));
      }
      Instruction::SetRet { index, val } => {
        let v = Self::operand(frame, val)?;
        rets[*index as usize] = v;
      }
    }
    Ok(())
  }

  fn enum_members(&mut self, frame: &Frame<'_>, names: &[crate::Symbol],
      specified: &[(crate::Symbol, Operand)], flags: bool)
      -> Result<Box<[(crate::Symbol, u64)]>, String> {
    let mut members = Vec::with_capacity(names.len());
    let mut next: u64 = if flags { 1 } else { 0 };
    for &name in names {
      let value = match specified.iter().find(|&&(n, _)| n == name) {
        Some((_, o)) => Self::operand(frame, o)?.as_u64().ok_or("non-integer enum value")?,
        None => next,
      };
      next = if flags { (value.max(1)).next_power_of_two() << 1 } else { value + 1 };
      members.push((name, value));
    }
    Ok(members.into())
  }

  fn builtin(&mut self, b: BuiltinFn, args: &[Value]) -> Result<Vec<Value>, String> {
    Ok(match b {
      BuiltinFn::Bytes => {
        let t = args[0].as_type().ok_or("bytes of non-type")?;
        vec![Value::Int(BigInt::from(t.bytes(self.c.arch)))]
      }
      BuiltinFn::Alignment => {
        let t = args[0].as_type().ok_or("alignment of non-type")?;
        vec![Value::Int(BigInt::from(t.align(self.c.arch)))]
      }
      BuiltinFn::Opaque => {
        vec![Value::Type(ty::new_struct(self.c.module, crate::types::ast::ScopeId(0)))]
      }
      BuiltinFn::Foreign => return Err("foreign cannot run at compile time".into()),
      BuiltinFn::DebugIr => vec![],
    })
  }
}

fn fold_or_float(op: BinOp, a: &Value, b: &Value) -> Option<Value> {
  if let Some(v) = ir::builder::fold_binop(op, a, b) { return Some(v) }
  if let (Value::F64(x), Value::F64(y)) = (a, b) {
    let (x, y) = (f64::from_bits(*x), f64::from_bits(*y));
    return Some(match op {
      BinOp::Add => Value::f64(x + y),
      BinOp::Sub => Value::f64(x - y),
      BinOp::Mul => Value::f64(x * y),
      BinOp::Div => Value::f64(x / y),
      BinOp::Mod => Value::f64(x % y),
      BinOp::Lt => Value::Bool(x < y),
      BinOp::Le => Value::Bool(x <= y),
      BinOp::Eq => Value::Bool(x == y),
      BinOp::Ne => Value::Bool(x != y),
      BinOp::And | BinOp::Or | BinOp::Xor => return None,
    })
  }
  None
}

fn zero_value(t: Type) -> Option<Value> {
  match t.kind() {
    TypeKind::Int(_) => Some(Value::Int(BigInt::from(0))),
    TypeKind::Prim(ty::Prim::Bool) => Some(Value::Bool(false)),
    TypeKind::Prim(ty::Prim::Char) => Some(Value::Char('\0')),
    TypeKind::Float(FloatTy::F32) => Some(Value::f32(0.0)),
    TypeKind::Float(FloatTy::F64) => Some(Value::f64(0.0)),
    TypeKind::Flags(_) => Some(Value::FlagsVal(0)),
    _ => None,
  }
}
