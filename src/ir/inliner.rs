//! Splices a lowered jump into the function group under construction. All of
//! the jump's reachable blocks are copied with registers renumbered into the
//! caller's register space, and `Choose`/`Exit` terminators are rewritten to
//! concrete targets from the caller's block interpretation.

use hashbrown::HashMap;
use crate::Symbol;
use super::builder::Builder;
use super::{BlockId, CompiledJump, Instruction, JumpCmd, Operand, Reg};

/// The mapping from continuation names to landing pads in the caller,
/// assembled by scope lowering. Contains the scope's block names plus the
/// special continuations `start` and `done`.
#[derive(Debug, Default)]
pub struct LocalBlockInterpretation {
  map: Vec<(Symbol, BlockId)>,
}

impl LocalBlockInterpretation {
  /// Build an interpretation from name/landing-pad pairs.
  #[must_use] pub fn new(map: Vec<(Symbol, BlockId)>) -> Self { Self { map } }

  /// The landing pad for a continuation name.
  #[must_use] pub fn get(&self, name: Symbol) -> Option<BlockId> {
    self.map.iter().find(|&&(n, _)| n == name).map(|&(_, b)| b)
  }
}

/// The outcome of inlining one jump.
#[derive(Debug, Default)]
pub struct InlineResult {
  /// For each continuation name reached, the copied blocks that exit through
  /// it and the arguments they yield, for phi construction at the landing
  /// pad.
  pub args_by_name: HashMap<Symbol, Vec<(BlockId, Box<[Operand]>)>>,
}

struct InstructionInliner<'a> {
  jump: &'a CompiledJump,
  interp: &'a LocalBlockInterpretation,
  offset: u32,
  // original block -> copied block, for the reachable subgraph only
  blocks: HashMap<BlockId, BlockId>,
  // original exit-path block -> the arguments chosen for it
  choose_args: HashMap<BlockId, Box<[Operand]>>,
  result: InlineResult,
}

impl<'a> InstructionInliner<'a> {
  fn chosen(&self, names: &[Symbol], blocks: &[BlockId]) -> (usize, BlockId) {
    for (i, &name) in names.iter().enumerate() {
      if self.interp.get(name).is_some() { return (i, blocks[i]) }
    }
    panic!("no continuation of {names:?} is interpretable at this usage site")
  }

  fn reg(&self, r: &mut Reg) { r.0 += self.offset }

  fn operand(&self, o: &Operand) -> Operand {
    let mut o = o.clone();
    if let Operand::Reg(r) | Operand::Value(super::Value::Reg(r)) = &mut o { self.reg(r) }
    o
  }

  // Walk the jump group from its entry, following only the chosen branch of
  // each choose, collecting the blocks to copy and the argument vector that
  // each exit path carries.
  fn collect(&mut self, builder: &mut Builder) {
    let mut stack = vec![BlockId::ENTRY];
    while let Some(b) = stack.pop() {
      if self.blocks.contains_key(&b) { continue }
      self.blocks.insert(b, builder.new_block());
      match self.jump.group.blocks[b].jump.as_ref().expect("unterminated jump block") {
        JumpCmd::Uncond(t) => stack.push(*t),
        JumpCmd::Cond { then_, else_, .. } => { stack.push(*then_); stack.push(*else_) }
        JumpCmd::Choose { names, blocks, args } => {
          let (i, target) = self.chosen(names, blocks);
          self.choose_args.insert(target,
            args[i].iter().map(|a| self.operand(a)).collect());
          stack.push(target);
        }
        JumpCmd::Exit(_) | JumpCmd::Unreachable => {}
        JumpCmd::Return => panic!("return terminator inside a jump group"),
      }
    }
  }

  fn rewrite_jump(&mut self, orig: BlockId, cmd: &JumpCmd) -> JumpCmd {
    match cmd {
      JumpCmd::Uncond(t) => JumpCmd::Uncond(self.blocks[t]),
      JumpCmd::Cond { cond, then_, else_ } => JumpCmd::Cond {
        cond: self.operand(cond),
        then_: self.blocks[then_],
        else_: self.blocks[else_],
      },
      JumpCmd::Choose { names, blocks, .. } => {
        let (_, target) = self.chosen(names, blocks);
        JumpCmd::Uncond(self.blocks[&target])
      }
      JumpCmd::Exit(name) => {
        let pad = self.interp.get(*name).expect("uninterpretable exit");
        let args = self.choose_args.get(&orig).cloned().unwrap_or_default();
        self.result.args_by_name.entry(*name).or_default().push((self.blocks[&orig], args));
        JumpCmd::Uncond(pad)
      }
      JumpCmd::Unreachable => JumpCmd::Unreachable,
      JumpCmd::Return => unreachable!(),
    }
  }
}

/// Inline `jump` into the builder's current block, binding `args` to the
/// jump's parameters. For stateful jumps, `args[0]` is the state pointer and
/// the parameters follow. The current block is terminated with a jump to the
/// copied entry; control leaves the copied subgraph through the landing pads
/// named by `interp`.
pub fn inline(builder: &mut Builder, jump: &CompiledJump, args: &[Operand],
    interp: &LocalBlockInterpretation) -> InlineResult {
  let offset = builder.group.num_regs;
  builder.group.num_regs += jump.group.num_regs;

  let mut inliner = InstructionInliner {
    jump, interp, offset,
    blocks: HashMap::new(),
    choose_args: HashMap::new(),
    result: InlineResult::default(),
  };
  inliner.collect(builder);

  // Bind the state pointer and arguments to the jump's renumbered parameter
  // registers, then enter the copied subgraph.
  let stateful = jump.ty.as_jump().is_some_and(|j| j.state.is_some());
  let base = usize::from(stateful);
  assert!(args.len() == jump.params.len() + base, "jump arity mismatch");
  if stateful {
    let mut out = Reg(0);
    inliner.reg(&mut out);
    // The state parameter's declared type is already the pointer type.
    let state_ty = jump.ty.as_jump().and_then(|j| j.state).expect("stateful");
    builder.push(Instruction::Register { ty: state_ty, val: args[0].clone(), out });
  }
  for (i, (arg, param)) in args[base..].iter().zip(jump.params.iter()).enumerate() {
    let mut out = jump.param_reg(i);
    inliner.reg(&mut out);
    builder.push(Instruction::Register { ty: param.value.ty, val: arg.clone(), out });
  }
  builder.uncond_jump(inliner.blocks[&BlockId::ENTRY]);

  let copied: Vec<(BlockId, BlockId)> = inliner.blocks.iter().map(|(&a, &b)| (a, b)).collect();
  for &(orig, new) in &copied {
    let src = &jump.group.blocks[orig];
    let mut instrs = src.instrs.clone();
    for instr in &mut instrs { instr.visit_regs(|r| inliner.reg(r)) }
    let cmd = inliner.rewrite_jump(orig, src.jump.as_ref().expect("unterminated"));
    let block = &mut builder.group.blocks[new];
    block.instrs = instrs;
    block.jump = Some(cmd);
  }

  // Rebuild predecessor edges for the copied subgraph and its landing pads.
  for &(_, new) in &copied {
    let succs = builder.group.blocks[new].jump.as_ref().expect("terminated above").successors();
    for succ in succs {
      builder.group.blocks[succ].incoming.push(new);
    }
  }

  inliner.result
}

#[cfg(test)]
mod tests {
  use smallvec::smallvec;
  use crate::types::ty::{self, Arch};
  use crate::types::{Params, Typed};
  use crate::intern;
  use super::*;
  use super::super::{BasicBlock, BlockGroup, Value};

  // A jump taking one parameter `n` which chooses `done()` if `n == 0` and
  // `do(n)` otherwise.
  fn test_jump() -> CompiledJump {
    let mut group = BlockGroup::new();
    let n = Reg(0);
    group.num_regs = 1;
    let cmp = Reg(group.num_regs);
    group.num_regs += 1;
    let b_done = group.blocks.push(BasicBlock::default());
    let b_do = group.blocks.push(BasicBlock::default());
    let entry = &mut group.blocks[BlockId::ENTRY];
    entry.instrs.push(Instruction::Binop {
      op: super::super::BinOp::Eq, ty: ty::i64_ty(),
      lhs: n.into(), rhs: Value::from(0).into(), out: cmp,
    });
    entry.terminate(JumpCmd::Cond { cond: cmp.into(), then_: b_done, else_: b_do });
    group.blocks[b_done].incoming.push(BlockId::ENTRY);
    group.blocks[b_done].terminate(JumpCmd::Exit(intern("done")));
    group.blocks[b_do].incoming.push(BlockId::ENTRY);
    group.blocks[b_do].terminate(JumpCmd::Exit(intern("do")));

    let mut params = Params::new();
    params.push(intern("n"), Typed::new(crate::types::ast::DeclId(crate::types::ast::ExprId(0)),
      ty::i64_ty()), crate::types::ParamFlags::empty());
    let jty = ty::jump(None, {
      let mut p = Params::new();
      p.push(intern("n"), ty::i64_ty(), crate::types::ParamFlags::empty());
      p
    });
    CompiledJump { ty: jty, params, group }
  }

  #[test]
  fn inline_renumbers_and_rewrites() {
    let jump = test_jump();
    let mut b = Builder::new(Arch::HOST);
    let base = b.register(ty::i64_ty(), Value::from(7).into());
    let pad_done = b.new_block();
    let pad_do = b.new_block();
    let interp = LocalBlockInterpretation::new(vec![
      (intern("done"), pad_done), (intern("do"), pad_do),
    ]);
    let res = inline(&mut b, &jump, &[base.into()], &interp);
    assert!(res.args_by_name.contains_key(&intern("done")));
    assert!(res.args_by_name.contains_key(&intern("do")));
    // The copied compare instruction must use renumbered registers.
    let renumbered = b.group.blocks.0.iter().flat_map(|bl| &bl.instrs).any(|i| matches!(
      i, Instruction::Binop { lhs: Operand::Reg(r), .. } if r.0 > base.0
    ));
    assert!(renumbered);
    // Landing pads got predecessor edges from the copied exit blocks.
    assert_eq!(b.group.blocks[pad_done].incoming.len(), 1);
    assert_eq!(b.group.blocks[pad_do].incoming.len(), 1);
  }
}
