//! The IR builder: an explicit value holding the group under construction,
//! the current block, the temporaries to destroy at statement end, and the
//! termination state of the surrounding statement list.

use hashbrown::HashMap;
use num::BigInt;
use smallvec::SmallVec;
use crate::Symbol;
use crate::types::ty::{Arch, Type};
use crate::types::Typed;
use super::{BasicBlock, BinOp, BlockGroup, BlockId, Instruction, JumpCmd, Operand, OutParams,
  Reg, UnOp, Value};

/// Where control stands after emitting a statement. Once a statement list
/// leaves `MoreStatements`, the remaining statements are skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Termination {
  /// Control flows to the next statement.
  #[default]
  MoreStatements,
  /// A `return` was emitted.
  Returned,
  /// A `yield` left the innermost scope.
  Yielded,
  /// A labeled `yield` left an outer scope.
  LabeledYielded(Symbol),
}

/// The builder state for one block group.
#[derive(Debug)]
pub struct Builder {
  /// The group under construction.
  pub group: BlockGroup,
  /// The block instructions are appended to.
  block: BlockId,
  /// The target architecture.
  pub arch: Arch,
  /// The termination state of the current statement list.
  pub termination: Termination,
  temporaries: Vec<Typed<Reg>>,
  // Loads from the same address register within one block reuse the first
  // result; invalidated by stores and block switches.
  load_cache: HashMap<Reg, Reg>,
}

impl Builder {
  /// A builder positioned at the entry block of a fresh group.
  #[must_use] pub fn new(arch: Arch) -> Self {
    Builder {
      group: BlockGroup::new(),
      block: BlockId::ENTRY,
      arch,
      termination: Termination::MoreStatements,
      temporaries: vec![],
      load_cache: HashMap::new(),
    }
  }

  /// The block currently being appended to.
  #[must_use] pub fn current_block(&self) -> BlockId { self.block }

  /// Switch the insertion point.
  pub fn set_block(&mut self, b: BlockId) {
    self.block = b;
    self.load_cache.clear();
  }

  /// Append an empty block without switching to it.
  pub fn new_block(&mut self) -> BlockId { self.group.new_block() }

  /// Reserve a fresh register.
  pub fn reserve(&mut self) -> Reg { self.group.reserve() }

  fn cur(&mut self) -> &mut BasicBlock { &mut self.group.blocks[self.block] }

  /// Append an instruction verbatim.
  pub fn push(&mut self, instr: Instruction) { self.cur().instrs.push(instr) }

  /// Is the current block still open?
  #[must_use] pub fn is_open(&self) -> bool { !self.group.blocks[self.block].is_terminated() }

  /// Terminate the current block and record the predecessor edges.
  pub fn terminate(&mut self, cmd: JumpCmd) {
    let this = self.block;
    for succ in cmd.successors() {
      self.group.blocks[succ].incoming.push(this);
    }
    self.cur().terminate(cmd);
    self.load_cache.clear();
  }

  /// Terminate with an unconditional jump.
  pub fn uncond_jump(&mut self, b: BlockId) { self.terminate(JumpCmd::Uncond(b)) }

  /// Terminate with a conditional jump.
  pub fn cond_jump(&mut self, cond: Operand, then_: BlockId, else_: BlockId) {
    match cond.value().and_then(Value::as_bool) {
      Some(true) => self.uncond_jump(then_),
      Some(false) => self.uncond_jump(else_),
      None => self.terminate(JumpCmd::Cond { cond, then_, else_ }),
    }
  }

  /// Terminate with a return.
  pub fn return_jump(&mut self) { self.terminate(JumpCmd::Return) }

  /// Terminate with a choose command (jump groups only).
  pub fn choose_jump(&mut self, names: Box<[Symbol]>, blocks: Box<[BlockId]>,
      args: Box<[Box<[Operand]>]>) {
    self.terminate(JumpCmd::Choose { names, blocks, args })
  }

  /// Terminate with a named exit (jump groups only).
  pub fn exit_jump(&mut self, name: Symbol) { self.terminate(JumpCmd::Exit(name)) }

  /// Reserve out-param registers for a call returning `n` values.
  pub fn out_params(&mut self, n: usize) -> OutParams {
    OutParams((0..n).map(|_| self.reserve()).collect())
  }

  /// Emit a binary operation, folding constant operands.
  pub fn binop(&mut self, op: BinOp, ty: Type, lhs: Operand, rhs: Operand) -> Operand {
    if let (Some(a), Some(b)) = (lhs.value(), rhs.value()) {
      if let Some(v) = fold_binop(op, a, b) { return v.into() }
    }
    let out = self.reserve();
    self.push(Instruction::Binop { op, ty, lhs, rhs, out });
    out.into()
  }

  /// Emit a unary operation, folding constant operands.
  pub fn unop(&mut self, op: UnOp, ty: Type, operand: Operand) -> Operand {
    if let Some(v) = operand.value() {
      match (op, v) {
        (UnOp::Not, Value::Bool(b)) => return Value::Bool(!b).into(),
        (UnOp::Neg, Value::Int(n)) => return Value::Int(-n).into(),
        _ => {}
      }
    }
    let out = self.reserve();
    self.push(Instruction::Unop { op, ty, operand, out });
    out.into()
  }

  /// Emit a numeric cast.
  pub fn cast(&mut self, from: Type, to: Type, operand: Operand) -> Operand {
    if from == to { return operand }
    if let Some(v) = operand.value() {
      if let Value::Int(_) = v { return v.clone().into() }
    }
    let out = self.reserve();
    self.push(Instruction::Cast { from, to, operand, out });
    out.into()
  }

  /// Emit a load, reusing a prior load from the same register in this block.
  pub fn load(&mut self, ty: Type, addr: Operand) -> Operand {
    if let Operand::Reg(r) = addr {
      if let Some(&cached) = self.load_cache.get(&r) { return cached.into() }
      let out = self.reserve();
      self.push(Instruction::Load { ty, addr, out });
      self.load_cache.insert(r, out);
      out.into()
    } else {
      let out = self.reserve();
      self.push(Instruction::Load { ty, addr, out });
      out.into()
    }
  }

  /// Emit a store, invalidating the load cache.
  pub fn store(&mut self, ty: Type, val: Operand, addr: Operand) {
    self.load_cache.clear();
    self.push(Instruction::Store { ty, val, addr });
  }

  /// Reserve stack storage. The alloca lives in the entry block regardless
  /// of the insertion point.
  pub fn alloca(&mut self, ty: Type) -> Reg {
    let out = self.group.reserve();
    self.group.blocks[BlockId::ENTRY].instrs.insert(0, Instruction::Alloca { ty, out });
    out
  }

  /// An alloca registered for destruction at the end of the statement.
  pub fn tmp_alloca(&mut self, ty: Type) -> Reg {
    let r = self.alloca(ty);
    self.temporaries.push(Typed::new(r, ty));
    r
  }

  /// Apply the callable to each temporary in reverse order, and clear the
  /// list of temporaries.
  pub fn finish_temporaries_with(&mut self, mut f: impl FnMut(&mut Self, Typed<Reg>)) {
    let temps = std::mem::take(&mut self.temporaries);
    for t in temps.into_iter().rev() { f(self, t) }
  }

  /// Swap in a fresh temporaries list, returning the old one. The caller
  /// restores it with [`Self::restore_temporaries`] when the nested
  /// statement scope ends.
  pub fn save_temporaries(&mut self) -> Vec<Typed<Reg>> {
    std::mem::take(&mut self.temporaries)
  }

  /// Restore a temporaries list saved by [`Self::save_temporaries`].
  pub fn restore_temporaries(&mut self, saved: Vec<Typed<Reg>>) {
    self.temporaries = saved;
  }

  /// Emit a phi whose inputs must cover the block's predecessors.
  pub fn phi(&mut self, ty: Type, incoming: SmallVec<[(BlockId, Operand); 2]>) -> Reg {
    let out = self.reserve();
    self.push(Instruction::Phi { ty, incoming, out });
    out
  }

  /// Bind a value to a register.
  pub fn register(&mut self, ty: Type, val: Operand) -> Reg {
    let out = self.reserve();
    self.push(Instruction::Register { ty, val, out });
    out
  }

  /// Are more statements allowed in the current list?
  #[must_use] pub fn more_stmts_allowed(&self) -> bool {
    self.termination == Termination::MoreStatements
  }

  /// Finish the group, checking invariants in debug builds.
  #[must_use] pub fn finish(self) -> BlockGroup {
    debug_assert!(self.temporaries.is_empty(), "temporaries leaked");
    if cfg!(debug_assertions) { self.group.validate() }
    self.group
  }
}

pub(crate) fn fold_binop(op: BinOp, a: &Value, b: &Value) -> Option<Value> {
  match (a, b) {
    (Value::Int(x), Value::Int(y)) => Some(match op {
      BinOp::Add => Value::Int(x + y),
      BinOp::Sub => Value::Int(x - y),
      BinOp::Mul => Value::Int(x * y),
      BinOp::Div => { if *y == BigInt::from(0) { return None } Value::Int(x / y) }
      BinOp::Mod => { if *y == BigInt::from(0) { return None } Value::Int(x % y) }
      BinOp::And => Value::Int(x & y),
      BinOp::Or => Value::Int(x | y),
      BinOp::Xor => Value::Int(x ^ y),
      BinOp::Lt => Value::Bool(x < y),
      BinOp::Le => Value::Bool(x <= y),
      BinOp::Eq => Value::Bool(x == y),
      BinOp::Ne => Value::Bool(x != y),
    }),
    (Value::Bool(x), Value::Bool(y)) => Some(match op {
      BinOp::Eq => Value::Bool(x == y),
      BinOp::Ne => Value::Bool(x != y),
      BinOp::And => Value::Bool(*x && *y),
      BinOp::Or => Value::Bool(*x || *y),
      BinOp::Xor => Value::Bool(x != y),
      _ => return None,
    }),
    (Value::FlagsVal(x), Value::FlagsVal(y)) => Some(match op {
      BinOp::And => Value::FlagsVal(x & y),
      BinOp::Or => Value::FlagsVal(x | y),
      BinOp::Xor => Value::FlagsVal(x ^ y),
      BinOp::Eq => Value::Bool(x == y),
      BinOp::Ne => Value::Bool(x != y),
      _ => return None,
    }),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty;

  #[test]
  fn constant_folding() {
    let mut b = Builder::new(Arch::HOST);
    let v = b.binop(BinOp::Add, ty::i64_ty(), Value::from(2).into(), Value::from(3).into());
    assert_eq!(v, Operand::Value(Value::from(5)));
    assert!(b.group.blocks[BlockId::ENTRY].instrs.is_empty());
    let v = b.binop(BinOp::Lt, ty::i64_ty(), Value::from(2).into(), Value::from(3).into());
    assert_eq!(v, Operand::Value(Value::Bool(true)));
  }

  #[test]
  fn load_cache_within_block() {
    let mut b = Builder::new(Arch::HOST);
    let addr = b.alloca(ty::i64_ty());
    let l1 = b.load(ty::i64_ty(), addr.into());
    let l2 = b.load(ty::i64_ty(), addr.into());
    assert_eq!(l1, l2);
    b.store(ty::i64_ty(), Value::from(1).into(), addr.into());
    let l3 = b.load(ty::i64_ty(), addr.into());
    assert_ne!(l1, l3);
  }

  #[test]
  fn terminate_records_predecessors() {
    let mut b = Builder::new(Arch::HOST);
    let next = b.new_block();
    b.uncond_jump(next);
    assert_eq!(&b.group.blocks[next].incoming[..], &[BlockId::ENTRY]);
    b.set_block(next);
    b.return_jump();
    let g = b.finish();
    assert_eq!(g.blocks.len(), 2);
  }
}
