//! Lowering of user-defined control flow: scope nodes inline their `enter`
//! jump, block bodies inline their `after` jumps, and `goto` inside jump
//! bodies produces the `Choose`/`Exit` terminators the inliner rewrites.

use crate::Symbol;
use crate::ir::builder::Termination;
use crate::ir::inliner::{self, InlineResult, LocalBlockInterpretation};
use crate::ir::{BlockId, CompiledJump, Instruction, JumpCmd, JumpRef, Operand, Reg, Value};
use crate::types::ast::{ExprId, ExprKind};
use crate::types::ty::{self, Type};
use crate::verify::Compiler;
use super::{Lower, ScopeLanding};

// A landing pad for one block node of a scope usage.
struct Pad {
  name: Symbol,
  pad: BlockId,
  node: ExprId,
  // One slot per block parameter, stored by the exit stubs.
  param_slots: Vec<(Type, Reg)>,
}

impl Compiler<'_> {
  pub(crate) fn jump_def(&self, r: JumpRef) -> CompiledJump {
    if r.module == self.module {
      self.tree.jump_defs[r.id].clone()
    } else {
      self.importer.get(r.module).tree.jump_defs[r.id].clone()
    }
  }

  /// Lower a scope usage by inlining its user-defined control flow into the
  /// current function.
  pub(crate) fn emit_scope_node(&mut self, lw: &mut Lower, e: ExprId) -> Operand {
    let ExprKind::ScopeNode { name, args, blocks, label } = &self.ast[e].k else {
      unreachable!()
    };
    let (name, args, blocks, label) = (*name, args.clone(), blocks.clone(), *label);
    let qt = self.qt_anywhere(e).unwrap_or_else(ty::QualType::error);

    let scope_ref = match self.evaluate(name, ty::scope_ty(), false) {
      Ok(Value::Scope(r)) => r,
      _ => return Operand::Value(Value::Empty),
    };
    let scope_def = self.scope_def(scope_ref);

    // Evaluate the scope arguments in the current block, ahead of the
    // inlined control flow.
    let mut user_args: Vec<Operand> = vec![];
    for &a in args.iter() { user_args.push(self.emit_value(lw, a)) }

    // State storage for stateful scopes; its address is the implicit first
    // binding of every jump of this scope.
    let state_op = scope_def.state_ty.map(|t| {
      let slot = lw.b.alloca(t);
      Operand::Reg(slot)
    });

    // Landing pads: `done`, one per block node, and the result slot.
    let pad_done = lw.b.new_block();
    let unit = ty::tup(vec![]);
    let result = (qt.ok() && qt.ty != unit).then(|| (qt.ty, lw.b.alloca(qt.ty)));

    let mut pads: Vec<Pad> = vec![];
    for &bn in &*blocks {
      let ExprKind::BlockNode { name: bname, params, .. } = &self.ast[bn].k else {
        unreachable!()
      };
      let (bname, params) = (*bname, params.clone());
      let pad = lw.b.new_block();
      let mut param_slots = vec![];
      for p in &params {
        let pty = self.qt_anywhere(p.value.0).map_or_else(ty::error_ty, |q| q.ty);
        let slot = lw.b.alloca(pty);
        self.tree.set_addr(self.ctx, p.value, slot);
        param_slots.push((pty, slot));
      }
      pads.push(Pad { name: bname, pad, node: bn, param_slots });
    }

    // Enter through a dedicated header block so that `start` can re-enter.
    let header = lw.b.new_block();
    lw.b.uncond_jump(header);
    lw.b.set_block(header);

    let mut interp_map = vec![
      (crate::intern("start"), header),
      (crate::intern("done"), pad_done),
    ];
    for p in &pads { interp_map.push((p.name, p.pad)) }
    let interp = LocalBlockInterpretation::new(interp_map);

    let mut jargs = vec![];
    if let Some(s) = &state_op { jargs.push(s.clone()) }
    jargs.extend(user_args.iter().cloned());
    let Some(enter) = self.pick_jump(&scope_def.enter, scope_ref.module, user_args.len())
    else {
      return Operand::Value(Value::Empty)
    };
    let enter_def = self.jump_def(JumpRef { module: scope_ref.module, id: enter });
    let res = inliner::inline(&mut lw.b, &enter_def, &jargs, &interp);
    self.apply_exit_bindings(lw, &res, &pads, result);

    // Emit the block bodies, each followed by its `after` jump.
    self.scope_landings.push(ScopeLanding {
      node: e, label, done: pad_done, result,
      exits: scope_def.exit.clone(),
    });
    for i in 0..pads.len() {
      let (pad, pad_name, node) = (pads[i].pad, pads[i].name, pads[i].node);
      let ExprKind::BlockNode { body, .. } = &self.ast[node].k else { unreachable!() };
      let body = body.clone();
      lw.b.set_block(pad);
      let saved_term = std::mem::take(&mut lw.b.termination);
      self.emit_stmts(lw, &body);
      if lw.b.more_stmts_allowed() && lw.b.is_open() {
        // The block body finished; control continues through the block's
        // `after` jump, or leaves the scope if there is none.
        let after = scope_def.blocks.iter()
          .find(|&&(n, _)| n == pad_name)
          .map(|&(_, b)| self.block_def(crate::ir::BlockRef {
            module: scope_ref.module, id: b,
          }))
          .and_then(|b| b.after.first().copied());
        match after {
          Some(after_jump) => {
            let after_def = self.jump_def(JumpRef { module: scope_ref.module, id: after_jump });
            let stateful = after_def.ty.as_jump().is_some_and(|j| j.state.is_some());
            let mut aargs = vec![];
            if stateful {
              aargs.push(state_op.clone().expect("stateless scope with stateful jump"));
            }
            let res = inliner::inline(&mut lw.b, &after_def, &aargs, &interp);
            self.apply_exit_bindings(lw, &res, &pads, result);
          }
          None => lw.b.uncond_jump(pad_done),
        }
      }
      lw.b.termination = saved_term;
    }
    self.scope_landings.pop();

    // A block that never received an edge is a dead landing pad.
    for p in &pads {
      if lw.b.group.blocks[p.pad].incoming.is_empty()
          && !lw.b.group.blocks[p.pad].is_terminated() {
        lw.b.group.blocks[p.pad].terminate(JumpCmd::Unreachable);
      }
    }

    lw.b.set_block(pad_done);
    match result {
      Some((t, slot)) => lw.b.load(t, slot.into()),
      None => Operand::Value(Value::Empty),
    }
  }

  // The first enter jump accepting `n` user arguments.
  fn pick_jump(&self, enters: &[crate::ir::JumpId], module: crate::types::ModuleId,
      n: usize) -> Option<crate::ir::JumpId> {
    for &j in enters {
      let def = self.jump_def(JumpRef { module, id: j });
      if def.params.len() == n { return Some(j) }
    }
    enters.first().copied()
  }

  // Write the arguments carried by each rewritten exit into the matching
  // landing pad's parameter slots (or the scope result slot for `done`),
  // by appending stores to the already terminated exit stubs.
  fn apply_exit_bindings(&mut self, lw: &mut Lower, res: &InlineResult, pads: &[Pad],
      result: Option<(Type, Reg)>) {
    let done = crate::intern("done");
    for (name, entries) in &res.args_by_name {
      if let Some(pad) = pads.iter().find(|p| p.name == *name) {
        for (stub, args) in entries {
          for ((pty, slot), arg) in pad.param_slots.iter().zip(&**args) {
            lw.b.group.blocks[*stub].instrs.push(Instruction::Store {
              ty: *pty, val: arg.clone(), addr: Operand::Reg(*slot),
            });
          }
        }
      } else if *name == done {
        if let Some((t, slot)) = result {
          for (stub, args) in entries {
            if let Some(arg) = args.first() {
              lw.b.group.blocks[*stub].instrs.push(Instruction::Store {
                ty: t, val: arg.clone(), addr: Operand::Reg(slot),
              });
            }
          }
        }
      }
    }
  }

  /// Lower a `goto` inside a jump body.
  pub(crate) fn emit_goto(&mut self, lw: &mut Lower, e: ExprId) {
    let ExprKind::Goto { cond, options } = &self.ast[e].k else { unreachable!() };
    let (cond, options) = (*cond, options.clone());

    match cond {
      None => self.emit_goto_options(lw, &options),
      Some(c) => {
        let v = self.emit_value(lw, c);
        let b_t = lw.b.new_block();
        let b_f = lw.b.new_block();
        lw.b.cond_jump(v, b_t, b_f);
        let (first, rest) = options.split_first().expect("conditional goto without options");
        lw.b.set_block(b_t);
        self.emit_goto_options(lw, std::slice::from_ref(first));
        lw.b.set_block(b_f);
        self.emit_goto_options(lw, rest);
      }
    }
    lw.b.termination = Termination::Returned;
  }

  // A prioritized choose over the given continuations, each leaving through
  // its own exit stub.
  fn emit_goto_options(&mut self, lw: &mut Lower, options: &[crate::types::ast::GotoOption]) {
    let mut names = Vec::with_capacity(options.len());
    let mut stubs = Vec::with_capacity(options.len());
    let mut all_args: Vec<Box<[Operand]>> = Vec::with_capacity(options.len());
    for opt in options {
      let mut args = Vec::with_capacity(opt.args.len());
      for &a in &*opt.args { args.push(self.emit_value(lw, a)) }
      let stub = lw.b.new_block();
      lw.b.group.blocks[stub].terminate(JumpCmd::Exit(opt.block));
      names.push(opt.block);
      stubs.push(stub);
      all_args.push(args.into());
    }
    lw.b.choose_jump(names.into(), stubs.into(), all_args.into());
  }
}
