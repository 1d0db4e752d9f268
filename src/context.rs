//! The context tree: per-instantiation analysis results.
//!
//! Everything the compiler learns about a program lives here, keyed on AST
//! nodes, and may depend on constant parameters to a generic function, jump,
//! or struct. To account for such dependencies the contexts form a tree: each
//! node has a parent, and children are keyed on the generic binding that
//! produced them. Reads of constants, addresses, lowered functions and viable
//! overload sets fall through to the parent; writes are always local.
//!
//! The tree is an arena indexed by [`CtxId`]: children are created only after
//! their parent, so cycles are impossible by construction, and the module
//! that owns the tree owns every node and every lowered IR artifact.

use hashbrown::{HashMap, HashSet};
use crate::Symbol;
use crate::ir::{CompiledBlock, CompiledFn, CompiledJump, CompiledScope, BlockValId, FnId,
  JumpId, Reg, ScopeValId, Value};
use crate::types::ast::{Ast, DeclId, ExprId, ExprKind};
use crate::types::ty::{self, QualType, Type};
use crate::types::{IdxVec, ModuleId, Params, Typed};

crate::mk_id! {
  /// A node in a module's context tree.
  CtxId,
}

impl CtxId {
  /// The root context of every module.
  pub const ROOT: Self = Self(0);
}

/// The generic binding that keys a subcontext: for each parameter, the bound
/// compile-time value (empty if runtime) and its qualified type.
pub type BindingKey = Params<(Value, QualType)>;

/// A constant's value together with whether its body has been fully emitted.
#[derive(Clone, Debug, Default)]
pub struct ConstantValue {
  /// The value.
  pub value: Value,
  /// Whether the held value is complete. A function or struct constant may
  /// exist before its body has been emitted.
  pub complete: bool,
}

/// A set of callable declarations produced during name resolution, each
/// tagged with its defining module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverloadSet {
  members: Vec<(ModuleId, ExprId)>,
}

impl OverloadSet {
  /// An empty set.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Insert a member; duplicates are suppressed.
  pub fn insert(&mut self, module: ModuleId, expr: ExprId) {
    if !self.members.contains(&(module, expr)) { self.members.push((module, expr)) }
  }

  /// The members in insertion order.
  #[must_use] pub fn members(&self) -> &[(ModuleId, ExprId)] { &self.members }

  /// The number of members.
  #[must_use] pub fn len(&self) -> usize { self.members.len() }
  /// Is the set empty?
  #[must_use] pub fn is_empty(&self) -> bool { self.members.is_empty() }
}

/// The reverse jump maps for a subtree: which `return`s leave each function
/// literal and which `yield`s leave each scope or block node.
#[derive(Debug, Default)]
pub struct JumpMap {
  returns: HashMap<ExprId, Vec<ExprId>>,
  yields: HashMap<ExprId, Vec<ExprId>>,
}

impl JumpMap {
  /// Populate the maps for the subtree rooted at each of `roots`.
  pub fn track(&mut self, ast: &Ast, roots: &[ExprId]) {
    for &root in roots { self.visit(ast, root, None, None) }
  }

  // `fn_target` is the innermost function literal, `yield_target` the
  // innermost scope or block node.
  fn visit(&mut self, ast: &Ast, e: ExprId, fn_target: Option<ExprId>,
      yield_target: Option<ExprId>) {
    macro_rules! walk { ($($x:expr),*) => {{ $(self.visit(ast, $x, fn_target, yield_target);)* }} }
    match &ast[e].k {
      ExprKind::Return(exprs) => {
        if let Some(t) = fn_target { self.returns.entry(t).or_default().push(e) }
        for &x in &**exprs { walk!(x) }
      }
      ExprKind::Yield { exprs, .. } => {
        if let Some(t) = yield_target { self.yields.entry(t).or_default().push(e) }
        for &x in &**exprs { walk!(x) }
      }
      ExprKind::FnLit(f) => {
        for &x in &*f.body { self.visit(ast, x, Some(e), yield_target) }
      }
      ExprKind::JumpLit(j) => {
        for &x in &*j.body { self.visit(ast, x, Some(e), yield_target) }
      }
      ExprKind::ScopeNode { name, args, blocks, .. } => {
        walk!(*name);
        for &a in args.iter() { walk!(a) }
        for &b in &**blocks { self.visit(ast, b, fn_target, Some(e)) }
      }
      ExprKind::BlockNode { body, .. } => {
        for &x in &**body { self.visit(ast, x, fn_target, Some(e)) }
      }
      ExprKind::Decl(d) => {
        if let Some(t) = d.ty { walk!(t) }
        if let Some(i) = d.init { walk!(i) }
      }
      ExprKind::Binop { lhs, rhs, .. } => walk!(*lhs, *rhs),
      ExprKind::Unop { operand, .. } => walk!(*operand),
      ExprKind::Call { callee, args } => {
        walk!(*callee);
        for &a in args.iter() { walk!(a) }
      }
      ExprKind::Cast { expr, ty } => walk!(*expr, *ty),
      ExprKind::Index { base, index } => walk!(*base, *index),
      ExprKind::Access { base, .. } => walk!(*base),
      ExprKind::ArrayLit(es) => for &x in &**es { walk!(x) },
      ExprKind::ArrayType { len, elem } => walk!(*len, *elem),
      ExprKind::DesignatedInit { ty, inits } => {
        walk!(*ty);
        for &(_, x) in &**inits { walk!(x) }
      }
      ExprKind::Goto { cond, options } => {
        if let Some(c) = cond { walk!(*c) }
        for opt in &**options { for &a in &*opt.args { walk!(a) } }
      }
      ExprKind::Import(x) => walk!(*x),
      // Literal members may nest function literals of their own.
      ExprKind::StructLit { fields } => for &d in &**fields { walk!(d.0) },
      ExprKind::ParamStructLit { params, fields, .. } => {
        for p in params.iter() { walk!(p.value.0) }
        for &d in &**fields { walk!(d.0) }
      }
      ExprKind::ScopeLit(s) => for &d in &*s.decls { walk!(d.0) },
      ExprKind::BlockLit(b) => for &d in &*b.decls { walk!(d.0) },
      ExprKind::Terminal(_) | ExprKind::Ident(_) | ExprKind::EnumLit { .. } => {}
    }
  }

  /// The `return` statements that leave the given function literal.
  #[must_use] pub fn returns_to(&self, node: ExprId) -> &[ExprId] {
    self.returns.get(&node).map_or(&[], |v| v)
  }

  /// The `yield` statements that leave the given scope or block node.
  #[must_use] pub fn yields_to(&self, node: ExprId) -> &[ExprId] {
    self.yields.get(&node).map_or(&[], |v| v)
  }
}

/// One node of the context tree.
#[derive(Debug, Default)]
pub struct Context {
  parent: Option<CtxId>,
  children: HashMap<(ExprId, BindingKey), CtxId>,
  qual_types: HashMap<ExprId, QualType>,
  constants: HashMap<DeclId, ConstantValue>,
  decls: HashMap<ExprId, Vec<DeclId>>,
  addrs: HashMap<DeclId, Reg>,
  all_overloads: HashMap<ExprId, OverloadSet>,
  viable_overloads: HashMap<ExprId, OverloadSet>,
  imported: HashMap<ExprId, ModuleId>,
  fns: HashMap<ExprId, FnId>,
  jumps: HashMap<ExprId, JumpId>,
  structs: HashMap<ExprId, Type>,
  reverse_structs: HashMap<Type, ExprId>,
  scope_vals: HashMap<ExprId, ScopeValId>,
  block_vals: HashMap<ExprId, BlockValId>,
  cyclic_error_ids: HashSet<ExprId>,
  arg_types: HashMap<Symbol, Type>,
  arg_vals: HashMap<Symbol, Value>,
  body_verified: HashSet<ExprId>,
  /// The return types recorded for the instantiation this context represents.
  pub rets: Vec<Type>,
  /// The generic binding this context was created for.
  pub binding: BindingKey,
  jump_map: JumpMap,
}

/// A module's context tree, together with the IR artifacts its contexts own.
#[derive(Debug)]
pub struct ContextTree {
  /// The module this tree belongs to.
  pub module: ModuleId,
  nodes: IdxVec<CtxId, Context>,
  /// All lowered functions, whether directly compiled or instantiated.
  pub fn_defs: IdxVec<FnId, CompiledFn>,
  /// All lowered jumps.
  pub jump_defs: IdxVec<JumpId, CompiledJump>,
  /// All scope constructs.
  pub scope_defs: IdxVec<ScopeValId, CompiledScope>,
  /// All block handlers.
  pub block_defs: IdxVec<BlockValId, CompiledBlock>,
}

/// The result of [`ContextTree::insert_subcontext`].
#[derive(Debug)]
pub struct InsertSubcontext {
  /// The subcontext for the binding.
  pub ctx: CtxId,
  /// Whether a new subcontext was created; `false` means an equivalent
  /// instantiation already exists.
  pub inserted: bool,
}

impl ContextTree {
  /// A tree containing only the root context.
  #[must_use] pub fn new(module: ModuleId) -> Self {
    let mut nodes = IdxVec::new();
    nodes.push(Context::default());
    ContextTree {
      module, nodes,
      fn_defs: IdxVec::new(),
      jump_defs: IdxVec::new(),
      scope_defs: IdxVec::new(),
      block_defs: IdxVec::new(),
    }
  }

  /// The parent of a context.
  #[must_use] pub fn parent(&self, ctx: CtxId) -> Option<CtxId> { self.nodes[ctx].parent }

  /// Direct access to a context node.
  #[must_use] pub fn get(&self, ctx: CtxId) -> &Context { &self.nodes[ctx] }

  /// Mutable access to a context node.
  pub fn get_mut(&mut self, ctx: CtxId) -> &mut Context { &mut self.nodes[ctx] }

  /// The cached qualified type of an expression, if set in this node.
  #[must_use] pub fn qual_type(&self, ctx: CtxId, e: ExprId) -> Option<QualType> {
    self.nodes[ctx].qual_types.get(&e).copied()
  }

  /// Cache the qualified type of an expression in this node, returning the
  /// installed value.
  pub fn set_qual_type(&mut self, ctx: CtxId, e: ExprId, qt: QualType) -> QualType {
    self.nodes[ctx].qual_types.insert(e, qt);
    qt
  }

  /// The constant bound to a declaration, walking up to the root. Returns
  /// the empty value if no ancestor has it.
  #[must_use] pub fn load_constant(&self, mut ctx: CtxId, d: DeclId) -> Value {
    loop {
      if let Some(c) = self.nodes[ctx].constants.get(&d) {
        if !c.value.is_empty() { return c.value.clone() }
      }
      match self.nodes[ctx].parent {
        Some(p) => ctx = p,
        None => return Value::Empty,
      }
    }
  }

  /// The full constant record, walking up to the root.
  #[must_use] pub fn constant(&self, mut ctx: CtxId, d: DeclId) -> Option<&ConstantValue> {
    loop {
      if let Some(c) = self.nodes[ctx].constants.get(&d) { return Some(c) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// Bind a constant in this node.
  pub fn set_constant(&mut self, ctx: CtxId, d: DeclId, value: Value, complete: bool) {
    self.nodes[ctx].constants.insert(d, ConstantValue { value, complete });
  }

  /// Mark a constant's value complete.
  pub fn complete_constant(&mut self, ctx: CtxId, d: DeclId) {
    if let Some(c) = self.nodes[ctx].constants.get_mut(&d) { c.complete = true }
  }

  /// The name-resolution outcome for an identifier in this node.
  #[must_use] pub fn decls(&self, ctx: CtxId, id: ExprId) -> Option<&[DeclId]> {
    self.nodes[ctx].decls.get(&id).map(|v| &**v)
  }

  /// Record the name-resolution outcome for an identifier.
  pub fn set_decls(&mut self, ctx: CtxId, id: ExprId, decls: Vec<DeclId>) {
    self.nodes[ctx].decls.insert(id, decls);
  }

  /// The storage register of a declaration, walking up to the root.
  #[must_use] pub fn addr(&self, mut ctx: CtxId, d: DeclId) -> Option<Reg> {
    loop {
      if let Some(&r) = self.nodes[ctx].addrs.get(&d) { return Some(r) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// Bind a declaration to its storage register.
  pub fn set_addr(&mut self, ctx: CtxId, d: DeclId, r: Reg) {
    self.nodes[ctx].addrs.insert(d, r);
  }

  /// All overloads collected for a callee, including non-viable ones.
  #[must_use] pub fn all_overloads(&self, ctx: CtxId, callee: ExprId) -> Option<&OverloadSet> {
    self.nodes[ctx].all_overloads.get(&callee)
  }

  /// Record the full overload set for a callee.
  pub fn set_all_overloads(&mut self, ctx: CtxId, callee: ExprId, os: OverloadSet) {
    self.nodes[ctx].all_overloads.insert(callee, os);
  }

  /// The viable overloads for a callee, walking up to the root.
  #[must_use] pub fn viable_overloads(&self, mut ctx: CtxId, callee: ExprId) -> Option<&OverloadSet> {
    loop {
      if let Some(os) = self.nodes[ctx].viable_overloads.get(&callee) { return Some(os) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// Record the surviving overloads for a callee in this node.
  pub fn set_viable_overloads(&mut self, ctx: CtxId, callee: ExprId, os: OverloadSet) {
    let prev = self.nodes[ctx].viable_overloads.insert(callee, os);
    assert!(prev.is_none(), "viable overloads set twice for {callee:?}");
  }

  /// The module an import expression resolved to.
  #[must_use] pub fn imported_module(&self, ctx: CtxId, e: ExprId) -> Option<ModuleId> {
    self.nodes[ctx].imported.get(&e).copied()
  }

  /// Record an import resolution.
  pub fn set_imported_module(&mut self, ctx: CtxId, e: ExprId, m: ModuleId) {
    self.nodes[ctx].imported.insert(e, m);
  }

  /// Whether an identifier already produced a cyclic-dependency diagnostic,
  /// so each cycle is reported once rather than once per loop.
  pub fn note_cyclic_error(&mut self, ctx: CtxId, id: ExprId) -> bool {
    self.nodes[ctx].cyclic_error_ids.insert(id)
  }

  /// The struct type allocated for a struct literal in this context.
  #[must_use] pub fn get_struct(&self, ctx: CtxId, lit: ExprId) -> Option<Type> {
    self.nodes[ctx].structs.get(&lit).copied()
  }

  /// Cache the struct type for a struct literal.
  pub fn set_struct(&mut self, ctx: CtxId, lit: ExprId, t: Type) {
    self.nodes[ctx].structs.insert(lit, t);
    self.nodes[ctx].reverse_structs.insert(t, lit);
  }

  /// The struct literal a struct type came from.
  #[must_use] pub fn ast_struct(&self, ctx: CtxId, t: Type) -> Option<ExprId> {
    self.nodes[ctx].reverse_structs.get(&t).copied()
  }

  /// The argument type bound to a generic parameter name during
  /// instantiation.
  #[must_use] pub fn arg_type(&self, ctx: CtxId, name: Symbol) -> Option<Type> {
    self.nodes[ctx].arg_types.get(&name).copied()
  }

  /// Bind an argument type during instantiation.
  pub fn set_arg_type(&mut self, ctx: CtxId, name: Symbol, t: Type) {
    self.nodes[ctx].arg_types.insert(name, t);
  }

  /// The argument value bound to a generic parameter name.
  #[must_use] pub fn arg_value(&self, ctx: CtxId, name: Symbol) -> Option<&Value> {
    self.nodes[ctx].arg_vals.get(&name)
  }

  /// Bind an argument value during instantiation.
  pub fn set_arg_value(&mut self, ctx: CtxId, name: Symbol, v: Value) {
    self.nodes[ctx].arg_vals.insert(name, v);
  }

  /// Should the body of this node still be verified? Flips to `false` once
  /// claimed.
  pub fn should_verify_body(&mut self, ctx: CtxId, node: ExprId) -> bool {
    self.nodes[ctx].body_verified.insert(node)
  }

  /// Populate the reverse jump maps for the given roots.
  pub fn track_jumps(&mut self, ctx: CtxId, ast: &Ast, roots: &[ExprId]) {
    self.nodes[ctx].jump_map.track(ast, roots);
  }

  /// The `return`s that target a function literal, walking up to the root.
  #[must_use] pub fn returns_to(&self, mut ctx: CtxId, node: ExprId) -> &[ExprId] {
    loop {
      let rs = self.nodes[ctx].jump_map.returns_to(node);
      if !rs.is_empty() { return rs }
      match self.nodes[ctx].parent {
        Some(p) => ctx = p,
        None => return &[],
      }
    }
  }

  /// The `yield`s that target a scope or block node, walking up to the root.
  #[must_use] pub fn yields_to(&self, mut ctx: CtxId, node: ExprId) -> &[ExprId] {
    loop {
      let ys = self.nodes[ctx].jump_map.yields_to(node);
      if !ys.is_empty() { return ys }
      match self.nodes[ctx].parent {
        Some(p) => ctx = p,
        None => return &[],
      }
    }
  }

  /// Find or create the subcontext of `ctx` for instantiating `node` with
  /// the given binding.
  pub fn insert_subcontext(&mut self, ctx: CtxId, node: ExprId, binding: BindingKey)
      -> InsertSubcontext {
    if let Some(&child) = self.nodes[ctx].children.get(&(node, binding.clone())) {
      return InsertSubcontext { ctx: child, inserted: false }
    }
    let child = self.nodes.push(Context {
      parent: Some(ctx),
      binding: binding.clone(),
      ..Context::default()
    });
    self.nodes[ctx].children.insert((node, binding), child);
    InsertSubcontext { ctx: child, inserted: true }
  }

  /// The existing subcontext for a binding. It must already exist.
  #[must_use] pub fn find_subcontext(&self, ctx: CtxId, node: ExprId, binding: &BindingKey)
      -> CtxId {
    *self.nodes[ctx].children.get(&(node, binding.clone()))
      .unwrap_or_else(|| panic!("no instantiation of {node:?} for this binding"))
  }

  /// A child context not registered with its parent, usable as a scratchpad
  /// for computations that may be thrown away.
  pub fn scratchpad_subcontext(&mut self, ctx: CtxId) -> CtxId {
    self.nodes.push(Context { parent: Some(ctx), ..Context::default() })
  }

  /// Lazily create the IR function for a parameterized expression in this
  /// context. Returns the id and whether it was inserted.
  pub fn add_func(&mut self, ctx: CtxId, node: ExprId, ty: Type,
      params: Params<Typed<DeclId>>) -> (FnId, bool) {
    if let Some(&id) = self.nodes[ctx].fns.get(&node) { return (id, false) }
    let id = self.fn_defs.push(CompiledFn { ty, params, group: Default::default() });
    self.nodes[ctx].fns.insert(node, id);
    (id, true)
  }

  /// Lazily create the IR jump for a jump literal in this context.
  pub fn add_jump(&mut self, ctx: CtxId, node: ExprId, ty: Type,
      params: Params<Typed<DeclId>>) -> (JumpId, bool) {
    if let Some(&id) = self.nodes[ctx].jumps.get(&node) { return (id, false) }
    let id = self.jump_defs.push(CompiledJump { ty, params, group: Default::default() });
    self.nodes[ctx].jumps.insert(node, id);
    (id, true)
  }

  /// The lowered function for a node, walking up to the root.
  #[must_use] pub fn find_fn(&self, mut ctx: CtxId, node: ExprId) -> Option<FnId> {
    loop {
      if let Some(&id) = self.nodes[ctx].fns.get(&node) { return Some(id) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// The lowered jump for a node, walking up to the root.
  #[must_use] pub fn find_jump(&self, mut ctx: CtxId, node: ExprId) -> Option<JumpId> {
    loop {
      if let Some(&id) = self.nodes[ctx].jumps.get(&node) { return Some(id) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// Register a scope construct.
  pub fn add_scope(&mut self, scope: CompiledScope) -> ScopeValId {
    self.scope_defs.push(scope)
  }

  /// Register a block handler.
  pub fn add_block(&mut self, block: CompiledBlock) -> BlockValId {
    self.block_defs.push(block)
  }

  /// The scope value built for a scope literal, walking up to the root.
  #[must_use] pub fn find_scope_val(&self, mut ctx: CtxId, e: ExprId) -> Option<ScopeValId> {
    loop {
      if let Some(&id) = self.nodes[ctx].scope_vals.get(&e) { return Some(id) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// Cache the scope value for a scope literal.
  pub fn set_scope_val(&mut self, ctx: CtxId, e: ExprId, id: ScopeValId) {
    self.nodes[ctx].scope_vals.insert(e, id);
  }

  /// The block value built for a block literal, walking up to the root.
  #[must_use] pub fn find_block_val(&self, mut ctx: CtxId, e: ExprId) -> Option<BlockValId> {
    loop {
      if let Some(&id) = self.nodes[ctx].block_vals.get(&e) { return Some(id) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// Cache the block value for a block literal.
  pub fn set_block_val(&mut self, ctx: CtxId, e: ExprId, id: BlockValId) {
    self.nodes[ctx].block_vals.insert(e, id);
  }

  /// The struct type for a struct literal, walking up to the root.
  #[must_use] pub fn find_struct(&self, mut ctx: CtxId, e: ExprId) -> Option<Type> {
    loop {
      if let Some(&t) = self.nodes[ctx].structs.get(&e) { return Some(t) }
      ctx = self.nodes[ctx].parent?;
    }
  }

  /// Iterate over every lowered function, for back-end consumption.
  pub fn for_each_compiled_fn(&self, mut f: impl FnMut(FnId, &CompiledFn)) {
    for (id, def) in self.fn_defs.enum_iter() { f(id, def) }
  }
}

impl ty::Type {
  /// Whether this struct type's fields may be accessed yet.
  #[must_use] pub fn data_complete(self) -> bool {
    self.completeness() >= ty::Completeness::DataComplete
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ty;

  #[test]
  fn constants_fall_through_to_parent() {
    let mut tree = ContextTree::new(ModuleId(0));
    let d = DeclId(ExprId(0));
    tree.set_constant(CtxId::ROOT, d, Value::from(7), true);
    let sub = tree.insert_subcontext(CtxId::ROOT, ExprId(1), BindingKey::new());
    assert!(sub.inserted);
    assert_eq!(tree.load_constant(sub.ctx, d), Value::from(7));
    // Local writes shadow without touching the parent.
    tree.set_constant(sub.ctx, d, Value::from(8), true);
    assert_eq!(tree.load_constant(sub.ctx, d), Value::from(8));
    assert_eq!(tree.load_constant(CtxId::ROOT, d), Value::from(7));
  }

  #[test]
  fn subcontexts_memoise_on_binding() {
    let mut tree = ContextTree::new(ModuleId(0));
    let node = ExprId(4);
    let mut key = BindingKey::new();
    key.push(crate::intern("n"), (Value::from(3), QualType::constant(ty::i64_ty())),
      crate::types::ParamFlags::CONST);
    let a = tree.insert_subcontext(CtxId::ROOT, node, key.clone());
    assert!(a.inserted);
    let b = tree.insert_subcontext(CtxId::ROOT, node, key.clone());
    assert!(!b.inserted);
    assert_eq!(a.ctx, b.ctx);
    assert_eq!(tree.find_subcontext(CtxId::ROOT, node, &key), a.ctx);
  }

  #[test]
  fn scratchpads_are_unregistered() {
    let mut tree = ContextTree::new(ModuleId(0));
    let pad = tree.scratchpad_subcontext(CtxId::ROOT);
    assert_eq!(tree.parent(pad), Some(CtxId::ROOT));
    // qual_type reads are local to the node.
    tree.set_qual_type(pad, ExprId(0), QualType::constant(ty::bool_ty()));
    assert!(tree.qual_type(CtxId::ROOT, ExprId(0)).is_none());
  }
}
