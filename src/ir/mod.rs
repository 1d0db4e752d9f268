//! The typed intermediate representation: instructions, basic blocks, jump
//! commands, and block groups.
//!
//! Invariants maintained here: every non-terminal instruction defines at most
//! one register, every finished basic block ends in exactly one jump command,
//! and blocks form a connected graph rooted at the entry block.

pub mod builder;
pub mod inliner;
pub mod value;

pub use builder::{Builder, Termination};
pub use value::{Addr, AnyFn, Value};

use std::fmt;
use bit_set::BitSet;
use smallvec::SmallVec;
use crate::Symbol;
use crate::types::ast::{DeclId, ScopeId};
use crate::types::ty::Type;
use crate::types::{IdxVec, Idx, ModuleId, Params, Typed};

crate::mk_id! {
  /// A virtual register, numbered densely within one block group.
  Reg,
  /// A basic block within one block group.
  BlockId,
  /// A lowered native function, owned by a context.
  FnId,
  /// A lowered jump, owned by a context.
  JumpId,
  /// A scope construct value, owned by a context.
  ScopeValId,
  /// A block handler value, owned by a context.
  BlockValId,
}

impl BlockId {
  /// The entry block of every group.
  pub const ENTRY: Self = Self(0);
}

/// A module-qualified reference to a lowered function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FnRef {
  /// The owning module.
  pub module: ModuleId,
  /// The function within that module's context tree.
  pub id: FnId,
}

/// A module-qualified reference to a lowered jump.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct JumpRef {
  /// The owning module.
  pub module: ModuleId,
  /// The jump within that module's context tree.
  pub id: JumpId,
}

/// A module-qualified reference to a scope construct.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeRef {
  /// The owning module.
  pub module: ModuleId,
  /// The scope value within that module's context tree.
  pub id: ScopeValId,
}

/// A module-qualified reference to a block handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef {
  /// The owning module.
  pub module: ModuleId,
  /// The block value within that module's context tree.
  pub id: BlockValId,
}

/// Either a register or an immediate value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
  /// Read the register.
  Reg(Reg),
  /// Use the constant.
  Value(Value),
}

impl Operand {
  /// The constant payload, if this is not a register.
  #[must_use] pub fn value(&self) -> Option<&Value> {
    match self {
      Operand::Reg(_) => None,
      Operand::Value(v) => Some(v),
    }
  }
}

impl From<Reg> for Operand {
  fn from(r: Reg) -> Self { Operand::Reg(r) }
}
impl From<Value> for Operand {
  fn from(v: Value) -> Self {
    match v {
      Value::Reg(r) => Operand::Reg(r),
      v => Operand::Value(v),
    }
  }
}

/// Caller-side registers receiving the return values of a call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutParams(pub SmallVec<[Reg; 2]>);

/// Arithmetic and comparison operators on numeric and flags types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
  /// Addition.
  Add,
  /// Subtraction.
  Sub,
  /// Multiplication.
  Mul,
  /// Division.
  Div,
  /// Remainder.
  Mod,
  /// Bitwise and flags conjunction.
  And,
  /// Bitwise and flags disjunction.
  Or,
  /// Bitwise and flags exclusive or.
  Xor,
  /// Less-than; result is `bool`.
  Lt,
  /// Less-or-equal; result is `bool`.
  Le,
  /// Equality; result is `bool`.
  Eq,
  /// Disequality; result is `bool`.
  Ne,
}

/// Unary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
  /// Numeric negation.
  Neg,
  /// Boolean negation.
  Not,
}

/// A single IR instruction. Instructions that produce a value carry their
/// destination register in `out`.
#[derive(Clone, Debug)]
pub enum Instruction {
  /// A binary operation on values of type `ty`.
  Binop {
    /// The operator.
    op: BinOp,
    /// The operand type.
    ty: Type,
    /// Left operand.
    lhs: Operand,
    /// Right operand.
    rhs: Operand,
    /// Result register.
    out: Reg,
  },
  /// A unary operation.
  Unop {
    /// The operator.
    op: UnOp,
    /// The operand type.
    ty: Type,
    /// The operand.
    operand: Operand,
    /// Result register.
    out: Reg,
  },
  /// A numeric conversion.
  Cast {
    /// Source type.
    from: Type,
    /// Target type.
    to: Type,
    /// The operand.
    operand: Operand,
    /// Result register.
    out: Reg,
  },
  /// Read a value of type `ty` from an address.
  Load {
    /// The loaded type.
    ty: Type,
    /// The address.
    addr: Operand,
    /// Result register.
    out: Reg,
  },
  /// Write a value of type `ty` to an address.
  Store {
    /// The stored type.
    ty: Type,
    /// The value.
    val: Operand,
    /// The address.
    addr: Operand,
  },
  /// Reserve stack storage for a value of type `ty`. Allocas live in the
  /// entry block.
  Alloca {
    /// The allocated type.
    ty: Type,
    /// The address register.
    out: Reg,
  },
  /// Displace a pointer by `by` elements of type `elem`.
  PtrIncr {
    /// The element type.
    elem: Type,
    /// The pointer.
    ptr: Operand,
    /// The element count.
    by: Operand,
    /// Result register.
    out: Reg,
  },
  /// The address of field `index` of the struct or tuple at `base`.
  Field {
    /// The aggregate type.
    base_ty: Type,
    /// The aggregate address.
    base: Operand,
    /// The field position.
    index: u32,
    /// Result register.
    out: Reg,
  },
  /// The address of the type tag of a variant.
  VariantType {
    /// The variant address.
    addr: Operand,
    /// Result register.
    out: Reg,
  },
  /// The address of the payload of a variant.
  VariantValue {
    /// The variant type.
    ty: Type,
    /// The variant address.
    addr: Operand,
    /// Result register.
    out: Reg,
  },
  /// Call a function.
  Call {
    /// The function type.
    fty: Type,
    /// The callee.
    f: Operand,
    /// Arguments in parameter order.
    args: Box<[Operand]>,
    /// Registers receiving the results.
    outs: OutParams,
  },
  /// Select a value according to the predecessor block.
  Phi {
    /// The value type.
    ty: Type,
    /// `(predecessor, value)` pairs; must match the block's predecessors
    /// exactly.
    incoming: SmallVec<[(BlockId, Operand); 2]>,
    /// Result register.
    out: Reg,
  },
  /// Bind a value to a fresh register.
  Register {
    /// The value type.
    ty: Type,
    /// The value.
    val: Operand,
    /// Result register.
    out: Reg,
  },
  /// Construct a pointer type.
  TyPtr {
    /// The pointee.
    operand: Operand,
    /// Result register.
    out: Reg,
  },
  /// Construct a buffer pointer type.
  TyBufPtr {
    /// The pointee.
    operand: Operand,
    /// Result register.
    out: Reg,
  },
  /// Construct an array type.
  TyArray {
    /// The length.
    len: Operand,
    /// The element type.
    elem: Operand,
    /// Result register.
    out: Reg,
  },
  /// Construct a function type.
  TyArrow {
    /// Parameter types.
    params: Box<[(Symbol, Operand)]>,
    /// Return types.
    rets: Box<[Operand]>,
    /// Result register.
    out: Reg,
  },
  /// Construct a tuple type.
  TyTuple {
    /// Element types.
    elems: Box<[Operand]>,
    /// Result register.
    out: Reg,
  },
  /// Construct a variant type.
  TyVariant {
    /// Member types.
    elems: Box<[Operand]>,
    /// Result register.
    out: Reg,
  },
  /// Construct an enum type.
  TyEnum {
    /// The defining module.
    module: ModuleId,
    /// Member names in declaration order.
    names: Box<[Symbol]>,
    /// Explicitly specified member values.
    specified: Box<[(Symbol, Operand)]>,
    /// Result register.
    out: Reg,
  },
  /// Construct a flags type.
  TyFlags {
    /// The defining module.
    module: ModuleId,
    /// Member names in declaration order.
    names: Box<[Symbol]>,
    /// Explicitly specified member values.
    specified: Box<[(Symbol, Operand)]>,
    /// Result register.
    out: Reg,
  },
  /// Complete a struct type from computed field types.
  TyStruct {
    /// The struct being completed.
    strukt: Type,
    /// Field names, types, attributes and default initializers.
    fields: Box<[(Symbol, Operand, crate::types::ast::Hashtags, Option<crate::types::ast::ExprId>)]>,
    /// Result register.
    out: Reg,
  },
  /// Default-initialize the storage at `dst`.
  Init {
    /// The stored type.
    ty: Type,
    /// The storage address.
    dst: Operand,
  },
  /// Destroy the value at `dst`.
  Destroy {
    /// The stored type.
    ty: Type,
    /// The storage address.
    dst: Operand,
  },
  /// Move the value at `from` into the storage at `to`.
  Move {
    /// The value type.
    ty: Type,
    /// Source address.
    from: Operand,
    /// Destination address.
    to: Operand,
  },
  /// Copy the value at `from` into the storage at `to`.
  Copy {
    /// The value type.
    ty: Type,
    /// Source address.
    from: Operand,
    /// Destination address.
    to: Operand,
  },
  /// Print a value, for compile-time debugging.
  Print {
    /// The value type.
    ty: Type,
    /// The value.
    val: Operand,
  },
  /// Dump the current group to the log.
  DebugIr,
  /// Resolve a symbol in a linked library.
  LoadSymbol {
    /// The symbol name.
    name: Symbol,
    /// The declared type.
    ty: Type,
    /// Result register.
    out: Reg,
  },
  /// Write a return value into return slot `index`.
  SetRet {
    /// The return slot.
    index: u16,
    /// The value.
    val: Operand,
  },
}

impl Instruction {
  /// The register this instruction defines, if any.
  #[must_use] pub fn defines(&self) -> Option<Reg> {
    match *self {
      Instruction::Binop { out, .. } | Instruction::Unop { out, .. } |
      Instruction::Cast { out, .. } | Instruction::Load { out, .. } |
      Instruction::Alloca { out, .. } | Instruction::PtrIncr { out, .. } |
      Instruction::Field { out, .. } | Instruction::VariantType { out, .. } |
      Instruction::VariantValue { out, .. } | Instruction::Phi { out, .. } |
      Instruction::Register { out, .. } | Instruction::TyPtr { out, .. } |
      Instruction::TyBufPtr { out, .. } | Instruction::TyArray { out, .. } |
      Instruction::TyArrow { out, .. } | Instruction::TyTuple { out, .. } |
      Instruction::TyVariant { out, .. } | Instruction::TyEnum { out, .. } |
      Instruction::TyFlags { out, .. } | Instruction::TyStruct { out, .. } |
      Instruction::LoadSymbol { out, .. } => Some(out),
      Instruction::Call { .. } | Instruction::Store { .. } | Instruction::Init { .. } |
      Instruction::Destroy { .. } | Instruction::Move { .. } | Instruction::Copy { .. } |
      Instruction::Print { .. } | Instruction::DebugIr | Instruction::SetRet { .. } => None,
    }
  }

  /// Apply `f` to every register mentioned by this instruction, definitions
  /// included. Used by the inliner to renumber registers.
  pub fn visit_regs(&mut self, mut f: impl FnMut(&mut Reg)) {
    fn op(o: &mut Operand, f: &mut impl FnMut(&mut Reg)) {
      match o {
        Operand::Reg(r) => f(r),
        Operand::Value(Value::Reg(r)) => f(r),
        Operand::Value(_) => {}
      }
    }
    match self {
      Instruction::Binop { lhs, rhs, out, .. } => { op(lhs, &mut f); op(rhs, &mut f); f(out) }
      Instruction::Unop { operand, out, .. } | Instruction::Cast { operand, out, .. } |
      Instruction::TyPtr { operand, out } | Instruction::TyBufPtr { operand, out } =>
        { op(operand, &mut f); f(out) }
      Instruction::Load { addr, out, .. } => { op(addr, &mut f); f(out) }
      Instruction::Store { val, addr, .. } => { op(val, &mut f); op(addr, &mut f) }
      Instruction::Alloca { out, .. } => f(out),
      Instruction::PtrIncr { ptr, by, out, .. } => { op(ptr, &mut f); op(by, &mut f); f(out) }
      Instruction::Field { base, out, .. } => { op(base, &mut f); f(out) }
      Instruction::VariantType { addr, out } | Instruction::VariantValue { addr, out, .. } =>
        { op(addr, &mut f); f(out) }
      Instruction::Call { f: callee, args, outs, .. } => {
        op(callee, &mut f);
        for a in &mut **args { op(a, &mut f) }
        for r in &mut outs.0 { f(r) }
      }
      Instruction::Phi { incoming, out, .. } => {
        for (_, o) in incoming { op(o, &mut f) }
        f(out)
      }
      Instruction::Register { val, out, .. } => { op(val, &mut f); f(out) }
      Instruction::TyArray { len, elem, out } => { op(len, &mut f); op(elem, &mut f); f(out) }
      Instruction::TyArrow { params, rets, out } => {
        for (_, o) in &mut **params { op(o, &mut f) }
        for o in &mut **rets { op(o, &mut f) }
        f(out)
      }
      Instruction::TyTuple { elems, out } | Instruction::TyVariant { elems, out } => {
        for o in &mut **elems { op(o, &mut f) }
        f(out)
      }
      Instruction::TyEnum { specified, out, .. } | Instruction::TyFlags { specified, out, .. } => {
        for (_, o) in &mut **specified { op(o, &mut f) }
        f(out)
      }
      Instruction::TyStruct { fields, out, .. } => {
        for (_, o, _, _) in &mut **fields { op(o, &mut f) }
        f(out)
      }
      Instruction::Init { dst, .. } | Instruction::Destroy { dst, .. } => op(dst, &mut f),
      Instruction::Move { from, to, .. } | Instruction::Copy { from, to, .. } =>
        { op(from, &mut f); op(to, &mut f) }
      Instruction::Print { val, .. } => op(val, &mut f),
      Instruction::DebugIr => {}
      Instruction::LoadSymbol { out, .. } => f(out),
      Instruction::SetRet { val, .. } => op(val, &mut f),
    }
  }
}

/// The terminator of a basic block.
#[derive(Clone, Debug)]
pub enum JumpCmd {
  /// Transfer control to `0`.
  Uncond(BlockId),
  /// Branch on a boolean.
  Cond {
    /// The condition.
    cond: Operand,
    /// Target when true.
    then_: BlockId,
    /// Target when false.
    else_: BlockId,
  },
  /// Choose a continuation by name. Only appears inside jump groups; the
  /// inliner rewrites it when splicing the jump into a function.
  Choose {
    /// Candidate continuation names, in priority order.
    names: Box<[Symbol]>,
    /// The local block each candidate continues through.
    blocks: Box<[BlockId]>,
    /// The arguments yielded to each candidate.
    args: Box<[Box<[Operand]>]>,
  },
  /// Leave the jump group through the named continuation. Only appears
  /// inside jump groups.
  Exit(Symbol),
  /// Return from the function.
  Return,
  /// Control cannot reach here.
  Unreachable,
}

impl JumpCmd {
  /// Apply `f` to every block reference.
  pub fn visit_blocks(&mut self, mut f: impl FnMut(&mut BlockId)) {
    match self {
      JumpCmd::Uncond(b) => f(b),
      JumpCmd::Cond { then_, else_, .. } => { f(then_); f(else_) }
      JumpCmd::Choose { blocks, .. } => for b in &mut **blocks { f(b) },
      JumpCmd::Exit(_) | JumpCmd::Return | JumpCmd::Unreachable => {}
    }
  }

  /// The blocks this command can transfer control to.
  #[must_use] pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
    match self {
      JumpCmd::Uncond(b) => SmallVec::from_slice(&[*b]),
      JumpCmd::Cond { then_, else_, .. } => SmallVec::from_slice(&[*then_, *else_]),
      JumpCmd::Choose { blocks, .. } => blocks.iter().copied().collect(),
      JumpCmd::Exit(_) | JumpCmd::Return | JumpCmd::Unreachable => SmallVec::new(),
    }
  }

  /// Apply `f` to every register mentioned.
  pub fn visit_regs(&mut self, mut f: impl FnMut(&mut Reg)) {
    fn op(o: &mut Operand, f: &mut impl FnMut(&mut Reg)) {
      match o {
        Operand::Reg(r) => f(r),
        Operand::Value(Value::Reg(r)) => f(r),
        Operand::Value(_) => {}
      }
    }
    match self {
      JumpCmd::Cond { cond, .. } => op(cond, &mut f),
      JumpCmd::Choose { args, .. } =>
        for group in &mut **args { for a in &mut **group { op(a, &mut f) } },
      _ => {}
    }
  }
}

/// A basic block: instructions followed by exactly one jump command. The
/// terminator is absent only while the block is under construction.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
  /// The instructions, in order.
  pub instrs: Vec<Instruction>,
  /// The terminator.
  pub jump: Option<JumpCmd>,
  /// The predecessor blocks.
  pub incoming: SmallVec<[BlockId; 2]>,
}

impl BasicBlock {
  /// Finish this basic block by adding the terminator. It is a bug to
  /// terminate a block twice.
  pub fn terminate(&mut self, cmd: JumpCmd) {
    assert!(std::mem::replace(&mut self.jump, Some(cmd)).is_none(), "block terminated twice");
  }

  /// Has this block been terminated?
  #[must_use] pub fn is_terminated(&self) -> bool { self.jump.is_some() }
}

/// A function or jump under construction or completed: the owner of its
/// basic blocks and its dense register numbering.
#[derive(Clone, Debug, Default)]
pub struct BlockGroup {
  /// The basic blocks; entry is block 0.
  pub blocks: IdxVec<BlockId, BasicBlock>,
  /// The number of registers reserved so far.
  pub num_regs: u32,
}

impl BlockGroup {
  /// A group with an unterminated entry block.
  #[must_use] pub fn new() -> Self {
    let mut g = BlockGroup::default();
    g.blocks.push(BasicBlock::default());
    g
  }

  /// Reserve a fresh register.
  pub fn reserve(&mut self) -> Reg {
    let r = Reg(self.num_regs);
    self.num_regs += 1;
    r
  }

  /// Append an empty block.
  pub fn new_block(&mut self) -> BlockId { self.blocks.push(BasicBlock::default()) }

  /// The entry block.
  #[must_use] pub fn entry(&self) -> &BasicBlock { &self.blocks[BlockId::ENTRY] }

  /// Check the structural invariants: every block is terminated, predecessor
  /// sets match the jump commands, and every block is reachable from entry.
  /// Panics on violation; called when a group is finished in debug builds.
  pub fn validate(&self) {
    let mut incoming: Vec<SmallVec<[BlockId; 2]>> = vec![SmallVec::new(); self.blocks.len()];
    for (id, block) in self.blocks.enum_iter() {
      let jump = block.jump.as_ref().unwrap_or_else(|| panic!("unterminated block {id:?}"));
      for succ in jump.successors() { incoming[succ.into_usize()].push(id) }
    }
    for (id, block) in self.blocks.enum_iter() {
      let mut expect = incoming[id.into_usize()].clone();
      let mut got = block.incoming.clone();
      expect.sort();
      got.sort();
      assert!(expect == got, "predecessor mismatch at {id:?}: {expect:?} != {got:?}");
      // Every phi must cover the block's predecessors exactly.
      for instr in &block.instrs {
        if let Instruction::Phi { incoming, .. } = instr {
          let mut ins: Vec<BlockId> = incoming.iter().map(|&(b, _)| b).collect();
          ins.sort();
          assert!(ins == got.to_vec(), "phi does not match predecessors at {id:?}");
        }
      }
    }
    let mut reachable = BitSet::with_capacity(self.blocks.len());
    let mut stack = vec![BlockId::ENTRY];
    while let Some(b) = stack.pop() {
      if !reachable.insert(b.into_usize()) { continue }
      if let Some(jump) = &self.blocks[b].jump {
        stack.extend(jump.successors());
      }
    }
    // Dead landing pads (empty, explicitly unreachable) are tolerated; the
    // back-end prunes them.
    let live = self.blocks.enum_iter().filter(|(id, b)| {
      reachable.contains(id.into_usize())
        || !(b.instrs.is_empty() && matches!(b.jump, Some(JumpCmd::Unreachable)))
    }).count();
    assert!(reachable.len() == live,
      "unreachable blocks: {} of {}", live - reachable.len(), self.blocks.len());
  }
}

/// A lowered function.
#[derive(Clone, Debug)]
pub struct CompiledFn {
  /// The function type.
  pub ty: Type,
  /// The parameter declarations with their types. Parameter `i` is bound to
  /// register `i` on entry.
  pub params: Params<Typed<DeclId>>,
  /// The body.
  pub group: BlockGroup,
}

/// A lowered jump. Jumps never return; their blocks end in [`JumpCmd::Choose`]
/// or [`JumpCmd::Exit`] and are spliced into callers by the inliner.
#[derive(Clone, Debug)]
pub struct CompiledJump {
  /// The jump type.
  pub ty: Type,
  /// The parameter declarations. The state pointer, if present, is bound to
  /// register 0 and parameter `i` to register `i + 1`; stateless jumps bind
  /// parameter `i` to register `i`.
  pub params: Params<Typed<DeclId>>,
  /// The body.
  pub group: BlockGroup,
}

impl CompiledJump {
  /// The register bound to parameter `i`.
  #[must_use] pub fn param_reg(&self, i: usize) -> Reg {
    let state = self.ty.as_jump().is_some_and(|j| j.state.is_some());
    Reg((i + usize::from(state)) as u32)
  }
}

/// A user scope construct: its `enter` jumps, its exit overload set, and its
/// named blocks.
#[derive(Clone, Debug)]
pub struct CompiledScope {
  /// The state type for stateful scopes.
  pub state_ty: Option<Type>,
  /// The `enter` jumps.
  pub enter: Vec<JumpId>,
  /// The `exit` callables, an overload set keyed on yield argument types.
  pub exit: Vec<AnyFn>,
  /// The named blocks.
  pub blocks: Vec<(Symbol, BlockValId)>,
  /// The lexical scope of the defining literal.
  pub defn_scope: ScopeId,
}

/// A block handler of a user scope.
#[derive(Clone, Debug)]
pub struct CompiledBlock {
  /// The `before` functions, called when the block is entered.
  pub before: Vec<AnyFn>,
  /// The `after` jumps, inlined when the block body finishes.
  pub after: Vec<JumpId>,
}

impl fmt::Display for BlockGroup {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (id, block) in self.blocks.enum_iter() {
      writeln!(f, "b{}: <- {:?}", id.0, block.incoming)?;
      for i in &block.instrs { writeln!(f, "  {i:?}")? }
      writeln!(f, "  {:?}", block.jump)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty;

  #[test]
  fn group_invariants() {
    let mut g = BlockGroup::new();
    let b = g.new_block();
    let r = g.reserve();
    g.blocks[BlockId::ENTRY].instrs.push(Instruction::Register {
      ty: ty::bool_ty(), val: Value::Bool(true).into(), out: r,
    });
    g.blocks[BlockId::ENTRY].terminate(JumpCmd::Uncond(b));
    g.blocks[b].incoming.push(BlockId::ENTRY);
    g.blocks[b].terminate(JumpCmd::Return);
    g.validate();
  }

  #[test]
  #[should_panic(expected = "terminated twice")]
  fn double_terminate_panics() {
    let mut g = BlockGroup::new();
    g.blocks[BlockId::ENTRY].terminate(JumpCmd::Return);
    g.blocks[BlockId::ENTRY].terminate(JumpCmd::Return);
  }
}
