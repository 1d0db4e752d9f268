//! End-to-end scenarios: programmatically built modules pushed through
//! verification, lowering, and the compile-time interpreter.

use icarusc::context::CtxId;
use icarusc::diag::TrackingConsumer;
use icarusc::intern;
use icarusc::ir::{AnyFn, Value};
use icarusc::module::{Module, TestImporter};
use icarusc::types::ast::{self, AstBuilder, Binop, BlockLit, DeclFlags, DeclId, ExprId,
  ExprKind, FnLit, GotoOption, JumpLit, ScopeKind, ScopeLit, Unop};
use icarusc::types::ty::{self, Arch, Quals, Type};
use icarusc::types::{Arguments, ModuleId, ParamFlags, Params};

fn compile<R>(build: impl FnOnce(&mut AstBuilder) -> R)
    -> (Module, TestImporter, TrackingConsumer, R) {
  let mut b = AstBuilder::new();
  let r = build(&mut b);
  let ast = b.finish();
  let mut importer = TestImporter::default();
  let mut diag = TrackingConsumer::default();
  let m = icarusc::compile_module(ast, ModuleId(0), &mut importer, &mut diag, Arch::HOST);
  (m, importer, diag, r)
}

// A function literal with simple typed parameters.
fn fn_lit(b: &mut AstBuilder, params: &[(&str, Type, bool)], rets: Option<Vec<Type>>,
    body: impl FnOnce(&mut AstBuilder) -> Vec<ExprId>) -> ExprId {
  b.open_scope(ScopeKind::Fn);
  let mut ps = Params::new();
  for &(name, t, constant) in params {
    let ty_e = b.ty(t);
    let mut flags = DeclFlags::PARAM;
    let mut pflags = ParamFlags::empty();
    if constant {
      flags |= DeclFlags::CONST;
      pflags |= ParamFlags::CONST;
    }
    let d = b.decl(intern(name), Some(ty_e), None, flags);
    ps.push(intern(name), d, pflags);
  }
  let body = body(b);
  b.close_scope();
  let rets = rets.map(|ts| {
    ts.into_iter().map(|t| b.ty(t)).collect::<Vec<_>>().into()
  });
  let deps = ast::default_deps(&ps);
  b.push(ExprKind::FnLit(FnLit { params: ps, rets, body: body.into(), deps }))
}

// A jump literal, optionally stateful.
fn jump_lit(b: &mut AstBuilder, state: Option<Type>, params: &[(&str, Type)],
    body: impl FnOnce(&mut AstBuilder) -> Vec<ExprId>) -> ExprId {
  b.open_scope(ScopeKind::Fn);
  let state = state.map(|t| {
    let ty_e = b.ty(t);
    b.decl(intern("state"), Some(ty_e), None, DeclFlags::PARAM)
  });
  let mut ps = Params::new();
  for &(name, t) in params {
    let ty_e = b.ty(t);
    let d = b.decl(intern(name), Some(ty_e), None, DeclFlags::PARAM);
    ps.push(intern(name), d, ParamFlags::empty());
  }
  let body = body(b);
  b.close_scope();
  let deps = ast::default_deps(&ps);
  b.push(ExprKind::JumpLit(JumpLit { state, params: ps, body: body.into(), deps }))
}

fn i64t() -> Type { ty::i64_ty() }

#[test]
fn declared_identifier_has_reference_type() {
  // n: i64, then `n` as an identifier: qt = (i64, Ref), no diagnostic.
  let (m, _imp, diag, n) = compile(|b| {
    let t = b.ty(i64t());
    let d = b.decl(intern("n"), Some(t), None, DeclFlags::empty());
    b.top(d.0);
    let n = b.ident("n");
    b.top(n);
    n
  });
  assert_eq!(diag.pairs(), vec![]);
  let qt = m.tree.qual_type(CtxId::ROOT, n).expect("verified");
  assert_eq!(qt.ty, i64t());
  assert!(qt.quals.contains(Quals::REF));
  assert!(!qt.quals.contains(Quals::CONST));
}

#[test]
fn empty_array_initializer_is_uninferrable() {
  // n := [] is an error and the declaration is poisoned.
  let (m, _imp, diag, d) = compile(|b| {
    let init = b.push(ExprKind::ArrayLit(Box::new([])));
    let d = b.decl(intern("n"), None, Some(init), DeclFlags::empty());
    b.top(d.0);
    d
  });
  assert_eq!(diag.pairs(), vec![("type-error", "uninferrable-type")]);
  let qt = m.tree.qual_type(CtxId::ROOT, d.0).expect("verified");
  assert!(!qt.ok());
}

#[test]
fn call_type_mismatch_empties_viable_overloads() {
  // f ::= (n: i64) => n; f(true): type-mismatch, ViableOverloads(f) empty.
  let (m, _imp, diag, f_ident) = compile(|b| {
    let lit = fn_lit(b, &[("n", i64t(), false)], None, |b| {
      let n = b.ident("n");
      vec![b.push(ExprKind::Return(Box::new([n])))]
    });
    let f = b.decl(intern("f"), None, Some(lit), DeclFlags::CONST);
    b.top(f.0);
    let f_ident = b.ident("f");
    let arg = b.bool(true);
    let call = b.push(ExprKind::Call {
      callee: f_ident, args: Arguments::positional(vec![arg]),
    });
    b.top(call);
    f_ident
  });
  assert!(diag.pairs().contains(&("type-error", "type-mismatch")), "{:?}", diag.pairs());
  let viable = m.tree.viable_overloads(CtxId::ROOT, f_ident).expect("recorded");
  assert!(viable.is_empty());
}

#[test]
fn self_referential_struct_completes() {
  // S ::= struct { next: *S }: after completion, field `next` is *S.
  let (m, _imp, diag, s_decl) = compile(|b| {
    b.open_scope(ScopeKind::Plain);
    let s_ident = b.ident("S");
    let ptr_s = b.push(ExprKind::Unop { op: Unop::PtrTy, operand: s_ident });
    let next = b.decl(intern("next"), Some(ptr_s), None, DeclFlags::empty());
    b.close_scope();
    let lit = b.push(ExprKind::StructLit { fields: Box::new([next]) });
    let s = b.decl(intern("S"), None, Some(lit), DeclFlags::CONST);
    b.top(s.0);
    s
  });
  assert_eq!(diag.pairs(), vec![]);
  let Value::Type(s_ty) = m.tree.load_constant(CtxId::ROOT, s_decl) else {
    panic!("S is not a type constant")
  };
  assert_eq!(s_ty.completeness(), ty::Completeness::Complete);
  let data = s_ty.as_struct().expect("struct");
  let fields = data.fields().expect("complete");
  assert_eq!(fields.len(), 1);
  assert_eq!(fields[0].name, intern("next"));
  assert_eq!(fields[0].ty, ty::ptr(s_ty));
}

#[test]
fn designated_initializer_type_mismatch() {
  // S ::= struct { n: i64 }; s := S.{n = "abc"}: invalid-initializer-type.
  let (_m, _imp, diag, ()) = compile(|b| {
    b.open_scope(ScopeKind::Plain);
    let t = b.ty(i64t());
    let n = b.decl(intern("n"), Some(t), None, DeclFlags::empty());
    b.close_scope();
    let lit = b.push(ExprKind::StructLit { fields: Box::new([n]) });
    let s = b.decl(intern("S"), None, Some(lit), DeclFlags::CONST);
    b.top(s.0);
    let s_ident = b.ident("S");
    let text = b.string("abc");
    let init = b.push(ExprKind::DesignatedInit {
      ty: s_ident, inits: Box::new([(intern("n"), text)]),
    });
    let v = b.decl(intern("s"), None, Some(init), DeclFlags::empty());
    b.top(v.0);
  });
  assert_eq!(diag.pairs(), vec![("type-error", "invalid-initializer-type")]);
}

// Build `repeat`, a user scope with a stateful enter jump counting down to
// zero, a `do` block with a decrementing `after` jump, and an exit.
fn build_repeat_scope(b: &mut AstBuilder) -> DeclId {
  let ptr_i64 = ty::ptr(i64t());
  b.open_scope(ScopeKind::Plain);

  // enter ::= jump [state: *i64] (n: i64) { @state = n; goto @state == 0, done(), do() }
  let enter_jump = jump_lit(b, Some(ptr_i64), &[("n", i64t())], |b| {
    let st = b.ident("state");
    let dst = b.push(ExprKind::Unop { op: Unop::Deref, operand: st });
    let n = b.ident("n");
    let assign = b.push(ExprKind::Binop { op: Binop::Assign, lhs: dst, rhs: n });
    let st2 = b.ident("state");
    let cur = b.push(ExprKind::Unop { op: Unop::Deref, operand: st2 });
    let zero = b.int(0);
    let cond = b.push(ExprKind::Binop { op: Binop::Eq, lhs: cur, rhs: zero });
    let goto = b.push(ExprKind::Goto {
      cond: Some(cond),
      options: Box::new([
        GotoOption { block: intern("done"), args: Box::new([]) },
        GotoOption { block: intern("do"), args: Box::new([]) },
      ]),
    });
    vec![assign, goto]
  });
  let enter = b.decl(intern("enter"), None, Some(enter_jump), DeclFlags::CONST);

  // exit ::= () => ()
  let exit_fn = fn_lit(b, &[], None, |_| vec![]);
  let exit = b.decl(intern("exit"), None, Some(exit_fn), DeclFlags::CONST);

  // do ::= block { after ::= jump [state: *i64] () { @state = @state - 1;
  //                goto @state == 0, done(), do() } }
  b.open_scope(ScopeKind::Plain);
  let after_jump = jump_lit(b, Some(ptr_i64), &[], |b| {
    let st = b.ident("state");
    let dst = b.push(ExprKind::Unop { op: Unop::Deref, operand: st });
    let st2 = b.ident("state");
    let cur = b.push(ExprKind::Unop { op: Unop::Deref, operand: st2 });
    let one = b.int(1);
    let dec = b.push(ExprKind::Binop { op: Binop::Sub, lhs: cur, rhs: one });
    let assign = b.push(ExprKind::Binop { op: Binop::Assign, lhs: dst, rhs: dec });
    let st3 = b.ident("state");
    let cur2 = b.push(ExprKind::Unop { op: Unop::Deref, operand: st3 });
    let zero = b.int(0);
    let cond = b.push(ExprKind::Binop { op: Binop::Eq, lhs: cur2, rhs: zero });
    let goto = b.push(ExprKind::Goto {
      cond: Some(cond),
      options: Box::new([
        GotoOption { block: intern("done"), args: Box::new([]) },
        GotoOption { block: intern("do"), args: Box::new([]) },
      ]),
    });
    vec![assign, goto]
  });
  let after = b.decl(intern("after"), None, Some(after_jump), DeclFlags::CONST);
  b.close_scope();
  let do_block = b.push(ExprKind::BlockLit(BlockLit { decls: Box::new([after]) }));
  let do_decl = b.decl(intern("do"), None, Some(do_block), DeclFlags::CONST);

  b.close_scope();
  let state_ty = b.ty(i64t());
  let scope = b.push(ExprKind::ScopeLit(ScopeLit {
    state_ty: Some(state_ty),
    decls: Box::new([enter, exit, do_decl]),
  }));
  b.decl(intern("repeat"), None, Some(scope), DeclFlags::CONST)
}

#[test]
fn repeat_scope_lowers_to_one_loop() {
  // f ::= () -> i64 { num := 1; repeat(10) do { num *= 2 }; return num }
  let (mut m, mut imp, diag, f_decl) = compile(|b| {
    let repeat = build_repeat_scope(b);
    b.top(repeat.0);

    let f_lit = fn_lit(b, &[], Some(vec![i64t()]), |b| {
      let one = b.int(1);
      let num = b.decl(intern("num"), None, Some(one), DeclFlags::empty());
      let repeat_ident = b.ident("repeat");
      let ten = b.int(10);
      b.open_scope(ScopeKind::Plain);
      let num_i = b.ident("num");
      let two = b.int(2);
      let mul = b.push(ExprKind::Binop { op: Binop::MulAssign, lhs: num_i, rhs: two });
      b.close_scope();
      let block_node = b.push(ExprKind::BlockNode {
        name: intern("do"), params: Params::new(), body: Box::new([mul]),
      });
      let scope_node = b.push(ExprKind::ScopeNode {
        name: repeat_ident,
        args: Arguments::positional(vec![ten]),
        blocks: Box::new([block_node]),
        label: None,
      });
      let num_r = b.ident("num");
      let ret = b.push(ExprKind::Return(Box::new([num_r])));
      vec![num.0, scope_node, ret]
    });
    let f = b.decl(intern("f"), None, Some(f_lit), DeclFlags::CONST);
    b.top(f.0);
    f
  });
  assert_eq!(diag.pairs(), vec![], "unexpected diagnostics");

  let Value::Fn(AnyFn::Native(fref)) = m.tree.load_constant(CtxId::ROOT, f_decl) else {
    panic!("f is not a lowered function")
  };

  // The lowered IR contains exactly one loop: the blocks lying on a cycle
  // are nonempty and mutually reachable (a single strongly connected
  // component).
  let group = &m.tree.fn_defs[fref.id].group;
  // Is there a path of at least one edge from `from` to `to`?
  let reaches = |from: icarusc::ir::BlockId, to: icarusc::ir::BlockId| {
    let mut seen = vec![false; group.blocks.len()];
    let mut stack: Vec<icarusc::ir::BlockId> = group.blocks[from].jump
      .as_ref().map_or_else(Vec::new, |j| j.successors().to_vec());
    while let Some(b) = stack.pop() {
      if b == to { return true }
      if std::mem::replace(&mut seen[b.0 as usize], true) { continue }
      if let Some(jump) = &group.blocks[b].jump {
        stack.extend(jump.successors());
      }
    }
    false
  };
  let cycle: Vec<_> = group.blocks.enum_iter()
    .map(|(id, _)| id)
    .filter(|&id| reaches(id, id))
    .collect();
  assert!(!cycle.is_empty(), "expected a loop\n{group}");
  for &a in &cycle {
    for &b in &cycle {
      assert!(reaches(a, b), "more than one loop\n{group}");
    }
  }

  // Running it computes 2^10 starting from 1.
  let mut diag = TrackingConsumer::default();
  let outs = icarusc::interpret_fn(&mut m, &mut imp, &mut diag, fref, vec![])
    .expect("interpretation");
  assert_eq!(outs, vec![Value::Int(1024.into())]);
}

#[test]
fn generic_instantiation_is_memoised() {
  // size ::= (T :: type) => bytes(T); size(i64) twice shares one context.
  let (m, _imp, diag, call_site) = compile(|b| {
    let lit = fn_lit(b, &[("T", ty::type_ty(), true)], None, |b| {
      let bytes = b.ident("bytes");
      let t = b.ident("T");
      let call = b.push(ExprKind::Call {
        callee: bytes, args: Arguments::positional(vec![t]),
      });
      vec![b.push(ExprKind::Return(Box::new([call])))]
    });
    let size = b.decl(intern("size"), None, Some(lit), DeclFlags::CONST);
    b.top(size.0);

    let mut mk_call = |b: &mut AstBuilder| {
      let callee = b.ident("size");
      let arg = b.ty(i64t());
      let call = b.push(ExprKind::Call {
        callee, args: Arguments::positional(vec![arg]),
      });
      let d = b.decl(icarusc::Symbol::UNDER, None, Some(call), DeclFlags::empty());
      b.top(d.0);
      call
    };
    let first = mk_call(b);
    mk_call(b);
    first
  });
  assert_eq!(diag.pairs(), vec![]);
  let qt = m.tree.qual_type(CtxId::ROOT, call_site).expect("verified");
  assert_eq!(qt.ty, i64t());
}

#[test]
fn enum_members_are_constants() {
  // E ::= enum { A, B, C }; x ::= E.B
  let (m, _imp, diag, x) = compile(|b| {
    let lit = b.push(ExprKind::EnumLit {
      kind: ast::EnumKind::Enum,
      entries: Box::new([(intern("A"), None), (intern("B"), None), (intern("C"), None)]),
    });
    let e = b.decl(intern("E"), None, Some(lit), DeclFlags::CONST);
    b.top(e.0);
    let e_ident = b.ident("E");
    let access = b.push(ExprKind::Access { base: e_ident, member: intern("B") });
    let x = b.decl(intern("x"), None, Some(access), DeclFlags::CONST);
    b.top(x.0);
    x
  });
  assert_eq!(diag.pairs(), vec![]);
  assert_eq!(m.tree.load_constant(CtxId::ROOT, x), Value::EnumVal(1));
}

#[test]
fn undeclared_identifier_reports() {
  let (_m, _imp, diag, ()) = compile(|b| {
    let n = b.ident("nope");
    b.top(n);
  });
  assert_eq!(diag.pairs(), vec![("type-error", "undeclared-identifier")]);
}
