//! The abstract syntax tree handed to the middle-end by the front-end.
//!
//! The tree is immutable after construction; all analysis results are stored
//! in the [`Context`](crate::context::Context) tree, never on the nodes. Nodes
//! are addressed by [`ExprId`] into a dense per-module table, and every node
//! records the lexical scope it was parsed in.

use num::BigInt;
use smallvec::SmallVec;
use crate::Symbol;
use super::{Arguments, Idx, IdxVec, Params, Span, Spanned};
use super::ty::Type;

crate::mk_id! {
  /// An index of an AST node in its module's table.
  ExprId,
  /// An index of a lexical scope in its module's table.
  ScopeId,
}

/// A reference to a node known to be a [`ExprKind::Decl`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeclId(pub ExprId);

impl std::fmt::Debug for DeclId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "DeclId({})", self.0.0)
  }
}

bitflags::bitflags! {
  /// Properties of a declaration, set by the parser.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
  pub struct DeclFlags: u8 {
    /// Declared with `::` or `::=`: the value is a compile-time constant.
    const CONST = 1;
    /// The declaration is a function, jump, or struct parameter.
    const PARAM = 2;
    /// Declared as `x: T = --`: storage is left uninitialized.
    const UNINITIALIZED = 4;
  }
}

bitflags::bitflags! {
  /// Source-level `#{...}` attributes on declarations and fields.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
  pub struct Hashtags: u8 {
    /// `#{export}`: visible to importing modules.
    const EXPORT = 1;
    /// `#{uncopyable}`: suppress the copy trait.
    const UNCOPYABLE = 2;
  }
}

/// A literal leaf expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
  /// An integer literal. Adopts any integral type it fits in; defaults to
  /// `i64`.
  Int(BigInt),
  /// A boolean literal.
  Bool(bool),
  /// A character literal.
  Char(char),
  /// A string literal, typed `[]char`.
  String(Symbol),
  /// A type keyword such as `i64` or `bool`, pre-resolved by the front-end.
  Type(Type),
  /// The null pointer literal.
  Null,
}

/// A binary operator token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Binop {
  /// `+`
  Add,
  /// `-`
  Sub,
  /// `*`
  Mul,
  /// `/`
  Div,
  /// `%`
  Mod,
  /// `&`
  And,
  /// `|`
  Or,
  /// `^`
  Xor,
  /// `<`
  Lt,
  /// `<=`
  Le,
  /// `>`
  Gt,
  /// `>=`
  Ge,
  /// `==`
  Eq,
  /// `!=`
  Ne,
  /// `=`
  Assign,
  /// `+=`
  AddAssign,
  /// `-=`
  SubAssign,
  /// `*=`
  MulAssign,
  /// `/=`
  DivAssign,
  /// `%=`
  ModAssign,
  /// `&=`
  AndAssign,
  /// `|=`
  OrAssign,
  /// `^=`
  XorAssign,
}

impl Binop {
  /// Is this `=` or a compound assignment?
  #[must_use] pub fn is_assignment(self) -> bool { self.base_op().is_some() || self == Binop::Assign }

  /// For a compound assignment, the underlying operator.
  #[must_use] pub fn base_op(self) -> Option<Binop> {
    match self {
      Binop::AddAssign => Some(Binop::Add),
      Binop::SubAssign => Some(Binop::Sub),
      Binop::MulAssign => Some(Binop::Mul),
      Binop::DivAssign => Some(Binop::Div),
      Binop::ModAssign => Some(Binop::Mod),
      Binop::AndAssign => Some(Binop::And),
      Binop::OrAssign => Some(Binop::Or),
      Binop::XorAssign => Some(Binop::Xor),
      _ => None,
    }
  }

  /// Is this a comparison operator (result type `bool`)?
  #[must_use] pub fn is_comparison(self) -> bool {
    matches!(self, Binop::Lt | Binop::Le | Binop::Gt | Binop::Ge | Binop::Eq | Binop::Ne)
  }

  /// The source token, used for operator-overload lookup.
  #[must_use] pub fn token(self) -> &'static str {
    match self {
      Binop::Add => "+", Binop::Sub => "-", Binop::Mul => "*", Binop::Div => "/",
      Binop::Mod => "%", Binop::And => "&", Binop::Or => "|", Binop::Xor => "^",
      Binop::Lt => "<", Binop::Le => "<=", Binop::Gt => ">", Binop::Ge => ">=",
      Binop::Eq => "==", Binop::Ne => "!=", Binop::Assign => "=",
      Binop::AddAssign => "+=", Binop::SubAssign => "-=", Binop::MulAssign => "*=",
      Binop::DivAssign => "/=", Binop::ModAssign => "%=", Binop::AndAssign => "&=",
      Binop::OrAssign => "|=", Binop::XorAssign => "^=",
    }
  }
}

/// A unary operator token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Unop {
  /// `not e`
  Not,
  /// `-e`
  Neg,
  /// `&e`: address of a reference expression.
  Addr,
  /// `@p`: dereference.
  Deref,
  /// `$e`: compile-time evaluation.
  Eval,
  /// `copy e`
  Copy,
  /// `move e`
  Move,
  /// `*T`: pointer type constructor.
  PtrTy,
  /// `[*]T`: buffer pointer type constructor.
  BufPtrTy,
}

impl Unop {
  /// The source token, used for operator-overload lookup.
  #[must_use] pub fn token(self) -> &'static str {
    match self {
      Unop::Not => "not", Unop::Neg => "-", Unop::Addr => "&", Unop::Deref => "@",
      Unop::Eval => "$", Unop::Copy => "copy", Unop::Move => "move",
      Unop::PtrTy => "*", Unop::BufPtrTy => "[*]",
    }
  }
}

/// A declaration in one of the four shapes `x: T`, `x := e`, `x: T = e`,
/// `x: T = --`.
#[derive(Clone, Debug)]
pub struct Decl {
  /// The declared name.
  pub name: Symbol,
  /// The type annotation, absent in `x := e`.
  pub ty: Option<ExprId>,
  /// The initializer, absent in `x: T` and `x: T = --`.
  pub init: Option<ExprId>,
  /// Shape and constness.
  pub flags: DeclFlags,
  /// `#{...}` attributes.
  pub hashtags: Hashtags,
}

/// Which of the four instantiation-relevant facts a dependency node names.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DepKind {
  /// The type of the argument bound to the parameter.
  ArgType,
  /// The compile-time value of the argument bound to the parameter.
  ArgValue,
  /// The declared type of the parameter.
  ParamType,
  /// The compile-time value of the parameter.
  ParamValue,
}

/// One node of the ordered dependency graph over a parameter list, supplied
/// by the front-end.
#[derive(Copy, Clone, Debug)]
pub struct DepNode {
  /// Which fact this node computes.
  pub kind: DepKind,
  /// The index of the parameter it concerns.
  pub param: u32,
}

/// A function literal, long form `(params) -> (rets) { body }` or short form
/// `(params) => expr`.
#[derive(Clone, Debug)]
pub struct FnLit {
  /// The parameter declarations.
  pub params: Params<DeclId>,
  /// The output type expressions; `None` means inferred from `return`s.
  pub rets: Option<Box<[ExprId]>>,
  /// The body statements.
  pub body: Box<[ExprId]>,
  /// The ordered dependency graph over `params`.
  pub deps: Box<[DepNode]>,
}

/// A jump literal `jump [state: T] (params) { body }`.
#[derive(Clone, Debug)]
pub struct JumpLit {
  /// The scope-state declaration, if the jump is stateful.
  pub state: Option<DeclId>,
  /// The parameter declarations.
  pub params: Params<DeclId>,
  /// The body statements.
  pub body: Box<[ExprId]>,
  /// The ordered dependency graph over `params`.
  pub deps: Box<[DepNode]>,
}

/// A scope literal: a user-defined control-flow construct with `enter`/`exit`
/// declarations and block declarations.
#[derive(Clone, Debug)]
pub struct ScopeLit {
  /// The state type expression for stateful scopes.
  pub state_ty: Option<ExprId>,
  /// The member declarations (`enter`, `exit`, and one per block name).
  pub decls: Box<[DeclId]>,
}

/// A block literal inside a scope literal, carrying `before` and `after`
/// handler declarations.
#[derive(Clone, Debug)]
pub struct BlockLit {
  /// The member declarations (`before` functions, `after` jumps).
  pub decls: Box<[DeclId]>,
}

/// One option of a `goto` inside a jump body.
#[derive(Clone, Debug)]
pub struct GotoOption {
  /// The named continuation to leave through.
  pub block: Symbol,
  /// The arguments yielded to that continuation.
  pub args: Box<[ExprId]>,
}

/// Whether an [`ExprKind::EnumLit`] declares an enum or a flags type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnumKind {
  /// Sequential values.
  Enum,
  /// Power-of-two values.
  Flags,
}

/// An AST node.
#[derive(Clone, Debug)]
pub enum ExprKind {
  /// A literal.
  Terminal(Literal),
  /// A name to be resolved.
  Ident(Symbol),
  /// A declaration statement.
  Decl(Decl),
  /// A binary operator application.
  Binop {
    /// The operator.
    op: Binop,
    /// Left operand.
    lhs: ExprId,
    /// Right operand.
    rhs: ExprId,
  },
  /// A unary operator application.
  Unop {
    /// The operator.
    op: Unop,
    /// The operand.
    operand: ExprId,
  },
  /// A call `f(args)`.
  Call {
    /// The callee expression.
    callee: ExprId,
    /// Positional and named arguments.
    args: Arguments<ExprId>,
  },
  /// An explicit cast `e as T`.
  Cast {
    /// The value being cast.
    expr: ExprId,
    /// The target type expression.
    ty: ExprId,
  },
  /// An indexing expression `a[i]`.
  Index {
    /// The indexed aggregate.
    base: ExprId,
    /// The index.
    index: ExprId,
  },
  /// A member access `e.name`.
  Access {
    /// The accessed value.
    base: ExprId,
    /// The member name.
    member: Symbol,
  },
  /// An array literal `[e, ...]`.
  ArrayLit(Box<[ExprId]>),
  /// An array type expression `[n; T]`.
  ArrayType {
    /// The length expression.
    len: ExprId,
    /// The element type expression.
    elem: ExprId,
  },
  /// A function literal.
  FnLit(FnLit),
  /// A jump literal.
  JumpLit(JumpLit),
  /// A scope literal.
  ScopeLit(ScopeLit),
  /// A block literal inside a scope literal.
  BlockLit(BlockLit),
  /// A struct literal `struct { fields }`.
  StructLit {
    /// The field declarations.
    fields: Box<[DeclId]>,
  },
  /// A parameterised struct literal `struct (params) { fields }`.
  ParamStructLit {
    /// The parameter declarations.
    params: Params<DeclId>,
    /// The field declarations.
    fields: Box<[DeclId]>,
    /// The ordered dependency graph over `params`.
    deps: Box<[DepNode]>,
  },
  /// A designated initializer `T.{f = e, ...}`.
  DesignatedInit {
    /// The struct type expression.
    ty: ExprId,
    /// The designated fields, in source order.
    inits: Box<[(Symbol, ExprId)]>,
  },
  /// An enum or flags literal.
  EnumLit {
    /// Enum or flags.
    kind: EnumKind,
    /// Member names, each with an optional specified value.
    entries: Box<[(Symbol, Option<ExprId>)]>,
  },
  /// A scope usage `name (args) [blocks...]`.
  ScopeNode {
    /// The scope being entered.
    name: ExprId,
    /// The arguments to the scope's `enter` jump.
    args: Arguments<ExprId>,
    /// The block nodes, each an [`ExprKind::BlockNode`].
    blocks: Box<[ExprId]>,
    /// The label for labeled yields.
    label: Option<Symbol>,
  },
  /// One block of a scope usage, e.g. `do { ... }`.
  BlockNode {
    /// The block name, matched against the scope's block declarations.
    name: Symbol,
    /// Parameters bound from the block's `before` handler.
    params: Params<DeclId>,
    /// The body statements.
    body: Box<[ExprId]>,
  },
  /// A return statement.
  Return(Box<[ExprId]>),
  /// A yield statement, leaving the enclosing (possibly labeled) scope.
  Yield {
    /// The target label, or the innermost scope if absent.
    label: Option<Symbol>,
    /// The yielded values.
    exprs: Box<[ExprId]>,
  },
  /// A `goto` inside a jump body, choosing among continuations.
  Goto {
    /// A branch condition; with two options, true selects the first.
    cond: Option<ExprId>,
    /// The continuation options in priority order.
    options: Box<[GotoOption]>,
  },
  /// A module import; the operand must be a constant `[]char`.
  Import(ExprId),
}

/// What kind of region a lexical scope is, for capture checking.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopeKind {
  /// The module's top level.
  Module,
  /// A function or jump body: non-constants outside it are not capturable.
  Fn,
  /// Any other nested region (struct literals, block bodies).
  Plain,
}

/// A lexical scope.
#[derive(Debug)]
pub struct ScopeData {
  /// The enclosing scope.
  pub parent: Option<ScopeId>,
  /// The kind of region.
  pub kind: ScopeKind,
  /// The declarations made directly in this scope, in source order.
  pub decls: Vec<DeclId>,
}

/// The syntax tree of one module.
#[derive(Debug, Default)]
pub struct Ast {
  exprs: IdxVec<ExprId, Spanned<ExprKind>>,
  scope_of: IdxVec<ExprId, ScopeId>,
  scopes: IdxVec<ScopeId, ScopeData>,
  // Per-scope name index: each scope's table is its parent's (a cheap
  // persistent clone) extended with the scope's own declarations.
  scope_symbols: IdxVec<ScopeId, im::HashMap<Symbol, Vec<DeclId>>>,
  /// The top-level statements, in source order.
  pub top: Vec<ExprId>,
}

/// The outcome of resolving a name from a scope.
#[derive(Debug, Default)]
pub struct NameLookup {
  /// Declarations visible from the scope chain, respecting capture rules.
  pub visible: Vec<DeclId>,
  /// Declarations that exist on the chain but are hidden behind a function
  /// boundary (non-constant captures).
  pub uncapturable: Vec<DeclId>,
}

impl Ast {
  /// The node table size.
  #[must_use] pub fn len(&self) -> usize { self.exprs.len() }
  /// Is the tree empty?
  #[must_use] pub fn is_empty(&self) -> bool { self.exprs.is_empty() }

  /// The scope a node was parsed in.
  #[must_use] pub fn scope_of(&self, e: ExprId) -> ScopeId { self.scope_of[e] }

  /// The scope table entry.
  #[must_use] pub fn scope(&self, s: ScopeId) -> &ScopeData { &self.scopes[s] }

  /// The declaration payload of a declaration node.
  #[must_use] pub fn decl(&self, d: DeclId) -> &Decl {
    let ExprKind::Decl(decl) = &self.exprs[d.0].k else { panic!("not a decl: {d:?}") };
    decl
  }

  /// Resolve a name from a scope, splitting results into visible and
  /// uncapturable declarations. Within a single scope, constants are visible
  /// everywhere; non-constants keep their source order (enforced separately
  /// by the verifier). Non-constant declarations behind a function boundary
  /// are not capturable.
  #[must_use] pub fn lookup(&self, scope: ScopeId, name: Symbol) -> NameLookup {
    let mut out = NameLookup::default();
    let Some(ds) = self.scope_symbols[scope].get(&name) else { return out };
    for &d in ds {
      let decl = self.decl(d);
      if decl.flags.contains(DeclFlags::CONST)
          || !self.crosses_fn_boundary(scope, self.scope_of(d.0)) {
        out.visible.push(d);
      } else {
        out.uncapturable.push(d);
      }
    }
    out
  }

  // Does the chain from `from` up to (but excluding) `to` cross a function
  // boundary?
  fn crosses_fn_boundary(&self, mut from: ScopeId, to: ScopeId) -> bool {
    loop {
      if from == to { return false }
      let data = &self.scopes[from];
      if data.kind == ScopeKind::Fn { return true }
      match data.parent {
        Some(p) => from = p,
        None => return false,
      }
    }
  }

  /// Is `a` (or a scope nested inside it) an ancestor-or-self of `b`?
  #[must_use] pub fn scope_contains(&self, a: ScopeId, mut b: ScopeId) -> bool {
    loop {
      if a == b { return true }
      match self.scopes[b].parent {
        Some(p) => b = p,
        None => return false,
      }
    }
  }

  /// The parameter list and dependency graph of a parameterised expression.
  #[must_use] pub fn paramd(&self, e: ExprId) -> Option<(&Params<DeclId>, &[DepNode])> {
    match &self.exprs[e].k {
      ExprKind::FnLit(f) => Some((&f.params, &f.deps)),
      ExprKind::JumpLit(j) => Some((&j.params, &j.deps)),
      ExprKind::ParamStructLit { params, deps, .. } => Some((params, deps)),
      _ => None,
    }
  }
}

impl std::ops::Index<ExprId> for Ast {
  type Output = Spanned<ExprKind>;
  fn index(&self, e: ExprId) -> &Spanned<ExprKind> { &self.exprs[e] }
}

/// The default dependency order for a parameter list: for each parameter in
/// order, its argument type, its declared type, and (for constants) its
/// argument and parameter values.
#[must_use] pub fn default_deps<T>(params: &Params<T>) -> Box<[DepNode]> {
  let mut deps = Vec::with_capacity(params.len() * 2);
  for (i, p) in params.iter().enumerate() {
    let i = i as u32;
    deps.push(DepNode { kind: DepKind::ArgType, param: i });
    deps.push(DepNode { kind: DepKind::ParamType, param: i });
    if p.flags.contains(super::ParamFlags::CONST) {
      deps.push(DepNode { kind: DepKind::ArgValue, param: i });
      deps.push(DepNode { kind: DepKind::ParamValue, param: i });
    }
  }
  deps.into()
}

/// An incremental AST constructor, standing in for the front-end. Tests and
/// the importer use it to assemble modules node by node.
#[derive(Debug)]
pub struct AstBuilder {
  ast: Ast,
  stack: SmallVec<[ScopeId; 4]>,
}

impl Default for AstBuilder {
  fn default() -> Self { Self::new() }
}

impl AstBuilder {
  /// Start a module with its top-level scope.
  #[must_use] pub fn new() -> Self {
    let mut ast = Ast::default();
    let root = ast.scopes.push(ScopeData { parent: None, kind: ScopeKind::Module, decls: vec![] });
    AstBuilder { ast, stack: SmallVec::from_slice(&[root]) }
  }

  fn cur_scope(&self) -> ScopeId { *self.stack.last().expect("scope stack empty") }

  /// Append a node in the current scope.
  pub fn push(&mut self, k: ExprKind) -> ExprId { self.push_spanned(Span::default(), k) }

  /// Append a node with an explicit span.
  pub fn push_spanned(&mut self, span: Span, k: ExprKind) -> ExprId {
    let scope = self.cur_scope();
    let e = self.ast.exprs.push(Spanned { span, k });
    let e2 = self.ast.scope_of.push(scope);
    assert!(e == e2);
    e
  }

  /// Open a nested scope; nodes pushed until [`Self::close_scope`] belong to
  /// it.
  pub fn open_scope(&mut self, kind: ScopeKind) -> ScopeId {
    let s = self.ast.scopes.push(ScopeData {
      parent: Some(self.cur_scope()), kind, decls: vec![],
    });
    self.stack.push(s);
    s
  }

  /// Close the innermost scope.
  pub fn close_scope(&mut self) {
    assert!(self.stack.len() > 1, "cannot close the module scope");
    self.stack.pop();
  }

  /// Append a declaration node and register it in its scope.
  pub fn decl(&mut self, name: Symbol, ty: Option<ExprId>, init: Option<ExprId>,
      flags: DeclFlags) -> DeclId {
    self.decl_tagged(name, ty, init, flags, Hashtags::empty())
  }

  /// [`Self::decl`] with hashtags.
  pub fn decl_tagged(&mut self, name: Symbol, ty: Option<ExprId>, init: Option<ExprId>,
      flags: DeclFlags, hashtags: Hashtags) -> DeclId {
    let d = DeclId(self.push(ExprKind::Decl(Decl { name, ty, init, flags, hashtags })));
    let scope = self.cur_scope();
    self.ast.scopes[scope].decls.push(d);
    d
  }

  /// Append a top-level statement.
  pub fn top(&mut self, e: ExprId) { self.ast.top.push(e) }

  /// Finish construction, building the per-scope name index.
  #[must_use] pub fn finish(self) -> Ast {
    assert!(self.stack.len() == 1, "unbalanced scopes");
    let mut ast = self.ast;
    for i in 0..ast.scopes.len() {
      let s = ScopeId::from_usize(i);
      let mut table = match ast.scopes[s].parent {
        // Parents precede children, so their tables are already built.
        Some(p) => ast.scope_symbols[p].clone(),
        None => im::HashMap::new(),
      };
      for &d in &ast.scopes[s].decls {
        table.entry(ast.decl(d).name).or_insert_with(Vec::new).push(d);
      }
      let s2 = ast.scope_symbols.push(table);
      assert!(s == s2);
    }
    ast
  }

  // Shorthand constructors, mostly for tests.

  /// An integer literal node.
  pub fn int(&mut self, n: i64) -> ExprId {
    self.push(ExprKind::Terminal(Literal::Int(n.into())))
  }
  /// A boolean literal node.
  pub fn bool(&mut self, b: bool) -> ExprId {
    self.push(ExprKind::Terminal(Literal::Bool(b)))
  }
  /// A string literal node.
  pub fn string(&mut self, s: &str) -> ExprId {
    let sym = crate::intern(s);
    self.push(ExprKind::Terminal(Literal::String(sym)))
  }
  /// A pre-resolved type keyword node.
  pub fn ty(&mut self, t: Type) -> ExprId {
    self.push(ExprKind::Terminal(Literal::Type(t)))
  }
  /// An identifier node.
  pub fn ident(&mut self, name: &str) -> ExprId {
    let sym = crate::intern(name);
    self.push(ExprKind::Ident(sym))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;

  #[test]
  fn lookup_respects_fn_boundaries() {
    let mut b = AstBuilder::new();
    let i64e = b.ty(crate::types::ty::i64_ty());
    b.decl(intern("n"), Some(i64e), None, DeclFlags::empty());
    let c = b.int(3);
    b.decl(intern("k"), None, Some(c), DeclFlags::CONST);
    let inner = b.open_scope(ScopeKind::Fn);
    b.close_scope();
    let ast = b.finish();

    let outer = ast.lookup(inner, intern("n"));
    assert!(outer.visible.is_empty());
    assert_eq!(outer.uncapturable.len(), 1);

    let konst = ast.lookup(inner, intern("k"));
    assert_eq!(konst.visible.len(), 1);
    assert!(konst.uncapturable.is_empty());
  }

  #[test]
  fn default_deps_interleave_values() {
    let mut params = Params::new();
    params.push(intern("T"), (), crate::types::ParamFlags::CONST);
    params.push(intern("x"), (), crate::types::ParamFlags::empty());
    let deps = default_deps(&params);
    let kinds: Vec<_> = deps.iter().map(|d| (d.kind, d.param)).collect();
    assert_eq!(kinds, vec![
      (DepKind::ArgType, 0), (DepKind::ParamType, 0),
      (DepKind::ArgValue, 0), (DepKind::ParamValue, 0),
      (DepKind::ArgType, 1), (DepKind::ParamType, 1),
    ]);
  }
}
