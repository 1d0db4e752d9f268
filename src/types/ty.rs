//! The type universe: canonical, hash-consed value types.
//!
//! A [`Type`] is a thin copyable handle to an immutable node owned by the
//! process-wide store. Structural types (pointers, arrays, tuples, functions,
//! ...) are interned, so equal constructor inputs yield handles that are equal
//! by identity. Nominal types (structs, enums, flags, generics) are allocated
//! fresh per declaration and completed in place.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{LazyLock, Mutex, OnceLock};
use hashbrown::HashMap;
use typed_arena::Arena;
use crate::Symbol;
use crate::ir::AnyFn;
use super::ast::{ExprId, Hashtags, ScopeId};
use super::{FloatTy, IntTy, ModuleId, Params};

/// The target architecture parameters that size computation depends on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Arch {
  /// The size of a pointer, in bytes.
  pub ptr_bytes: u64,
}

impl Arch {
  /// The host architecture.
  pub const HOST: Arch = Arch { ptr_bytes: 8 };
}

/// A canonical type handle. Copying is cheap and equality is identity.
#[derive(Copy, Clone)]
pub struct Type(&'static TypeData);

impl PartialEq for Type {
  fn eq(&self, other: &Self) -> bool { std::ptr::eq(self.0, other.0) }
}
impl Eq for Type {}

impl Hash for Type {
  fn hash<H: Hasher>(&self, state: &mut H) {
    std::ptr::from_ref(self.0).hash(state)
  }
}

impl PartialOrd for Type {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl Ord for Type {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    (std::ptr::from_ref(self.0) as usize).cmp(&(std::ptr::from_ref(other.0) as usize))
  }
}

/// The storage for a single type node.
#[derive(Debug)]
pub struct TypeData {
  kind: TypeKind,
  flags: OnceLock<TypeFlags>,
}

/// The different categories of types.
#[derive(Debug)]
pub enum TypeKind {
  /// A primitive type with no structure.
  Prim(Prim),
  /// An integral type.
  Int(IntTy),
  /// A floating point type.
  Float(FloatTy),
  /// A pointer to a single value.
  Ptr(Type),
  /// A pointer to the head of a contiguous buffer, supporting arithmetic.
  BufPtr(Type),
  /// A pointer-and-length view of a contiguous buffer.
  Slice(Type),
  /// A fixed-length homogeneous array.
  Array {
    /// The number of elements.
    len: u64,
    /// The element type.
    elem: Type,
  },
  /// A heterogeneous product type.
  Tuple(Box<[Type]>),
  /// A tagged union over an unordered set of types. Kept sorted and
  /// deduplicated so the set is canonical.
  Variant(Box<[Type]>),
  /// A named enumeration.
  Enum(EnumData),
  /// A named bit-flag set.
  Flags(EnumData),
  /// A user-defined struct, completed in stages.
  Struct(StructData),
  /// A concrete function type.
  Fn(FnData),
  /// A user-defined control-flow jump.
  Jump(JumpData),
  /// A parameterised function; concrete signatures come from instantiation.
  GenericFn(GenericData),
  /// A parameterised struct.
  GenericStruct(GenericData),
  /// A set of callable types produced by name resolution over multiple
  /// declarations.
  OverloadSet(Box<[Type]>),
}

/// Primitive types with no internal structure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Prim {
  /// The boolean type.
  Bool,
  /// A single byte character.
  Char,
  /// The type of types.
  Type,
  /// The type of module values.
  Module,
  /// The type of user-defined scope constructs.
  Scope,
  /// The type of scope block handlers.
  Block,
  /// The type of yield labels.
  Label,
  /// The type of the null pointer literal, castable to any pointer.
  NullPtr,
  /// The type of the empty array literal `[]`.
  EmptyArray,
  /// The poison type produced by failed verification.
  Error,
}

/// Enum and flags payload: the defining module and the named members.
#[derive(Debug)]
pub struct EnumData {
  /// The module the declaration lives in.
  pub module: ModuleId,
  /// Member names and their values, in declaration order.
  pub members: Box<[(Symbol, u64)]>,
  uid: u32,
}

impl EnumData {
  /// The value of the member with the given name.
  #[must_use] pub fn value(&self, name: Symbol) -> Option<u64> {
    self.members.iter().find(|&&(n, _)| n == name).map(|&(_, v)| v)
  }

  /// The name of the member with the given value.
  #[must_use] pub fn name(&self, value: u64) -> Option<Symbol> {
    self.members.iter().find(|&&(_, v)| v == value).map(|&(n, _)| n)
  }
}

/// A struct field.
#[derive(Clone, Debug)]
pub struct Field {
  /// The field name.
  pub name: Symbol,
  /// The field type.
  pub ty: Type,
  /// Source-level attributes like `#{export}`.
  pub hashtags: Hashtags,
  /// The initializer expression for defaulted fields.
  pub default: Option<ExprId>,
}

impl Field {
  /// Is the field visible from other modules?
  #[must_use] pub fn exported(&self) -> bool { self.hashtags.contains(Hashtags::EXPORT) }
}

/// The special member functions of a completed struct.
#[derive(Clone, Debug, Default)]
pub struct SpecialMembers {
  /// Copy-initialization.
  pub copy_init: Option<AnyFn>,
  /// Move-initialization.
  pub move_init: Option<AnyFn>,
  /// Copy-assignment.
  pub copy_assign: Option<AnyFn>,
  /// Move-assignment.
  pub move_assign: Option<AnyFn>,
  /// Destruction.
  pub destroy: Option<AnyFn>,
}

/// The degree to which a partially constructed type is usable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Completeness {
  /// Fields are not yet determined; only pointers to the type may be formed.
  Incomplete,
  /// Fields are known, so size and alignment are usable, but objects may not
  /// be constructed yet.
  DataComplete,
  /// Special members exist; objects may be constructed.
  Complete,
}

/// A user struct. Allocated incomplete so that self-referential fields can
/// name the type, then completed in two stages.
#[derive(Debug)]
pub struct StructData {
  /// The defining module.
  pub module: ModuleId,
  /// The lexical scope of the struct literal.
  pub scope: ScopeId,
  fields: OnceLock<Box<[Field]>>,
  specials: OnceLock<SpecialMembers>,
  uid: u32,
}

impl StructData {
  /// The fields, if the struct is at least data-complete.
  #[must_use] pub fn fields(&self) -> Option<&[Field]> { self.fields.get().map(|f| &**f) }

  /// The special members, if the struct is complete.
  #[must_use] pub fn specials(&self) -> Option<&SpecialMembers> { self.specials.get() }

  /// How far completion has progressed.
  #[must_use] pub fn completeness(&self) -> Completeness {
    if self.specials.get().is_some() { Completeness::Complete }
    else if self.fields.get().is_some() { Completeness::DataComplete }
    else { Completeness::Incomplete }
  }

  /// The index and field with the given name.
  #[must_use] pub fn field(&self, name: Symbol) -> Option<(usize, &Field)> {
    self.fields()?.iter().enumerate().find(|(_, f)| f.name == name)
  }
}

/// A concrete function signature.
#[derive(Debug)]
pub struct FnData {
  /// The parameters.
  pub params: Params<Type>,
  /// The return types.
  pub rets: Box<[Type]>,
}

/// A user-defined jump signature.
#[derive(Debug)]
pub struct JumpData {
  /// The scope state pointer threaded through the jump, if any.
  pub state: Option<Type>,
  /// The parameters.
  pub params: Params<Type>,
}

/// A parameterised function or struct. Instantiation is performed by the
/// compiler against the declaration this handle points back to; the memo
/// table lives in the owning context tree.
#[derive(Debug)]
pub struct GenericData {
  /// The defining module.
  pub module: ModuleId,
  /// The parameterised expression.
  pub decl: ExprId,
}

bitflags::bitflags! {
  /// The four derived traits, propagated bottom-up and cached.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
  pub struct TypeFlags: u8 {
    /// Objects can be default-initialized.
    const DEFAULT_INIT = 1;
    /// Objects can be copied.
    const COPY = 2;
    /// Objects can be moved.
    const MOVE = 4;
    /// Objects require destruction.
    const HAS_DTOR = 8;
  }
}

bitflags::bitflags! {
  /// Expression qualifiers attached to a type in a [`QualType`].
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
  pub struct Quals: u8 {
    /// The expression is computable at compile time.
    const CONST = 1;
    /// The expression denotes storage.
    const REF = 2;
    /// The expression denotes the first element of a contiguous buffer.
    const BUF = 4;
    /// Verification failed somewhere in this expression. Sticky.
    const ERROR = 8;
  }
}

/// A type together with its qualifiers.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct QualType {
  /// The underlying type.
  pub ty: Type,
  /// The qualifier bits.
  pub quals: Quals,
}

impl QualType {
  /// A constant of the given type.
  #[must_use] pub fn constant(ty: Type) -> Self { Self { ty, quals: Quals::CONST } }

  /// A non-constant of the given type.
  #[must_use] pub fn non_constant(ty: Type) -> Self { Self { ty, quals: Quals::empty() } }

  /// A qualified type with explicit qualifiers.
  #[must_use] pub fn new(ty: Type, quals: Quals) -> Self { Self { ty, quals } }

  /// The poisoned qualified type.
  #[must_use] pub fn error() -> Self { Self { ty: error_ty(), quals: Quals::ERROR } }

  /// True unless the error bit is set.
  #[must_use] pub fn ok(self) -> bool { !self.quals.contains(Quals::ERROR) }

  /// Is the expression compile-time computable?
  #[must_use] pub fn constant_q(self) -> bool { self.quals.contains(Quals::CONST) }

  /// Does the expression denote storage?
  #[must_use] pub fn ref_q(self) -> bool { self.quals.contains(Quals::REF) }

  /// Copy of self with the error bit set.
  #[must_use] pub fn with_error(self) -> Self {
    Self { ty: self.ty, quals: self.quals | Quals::ERROR }
  }
}

impl fmt::Debug for QualType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}[{:?}]", self.ty, self.quals)
  }
}

/// The interning key for structural types. Nominal types never enter the map.
#[derive(Clone, PartialEq, Eq, Hash)]
enum TypeKey {
  Prim(Prim),
  Int(IntTy),
  Float(FloatTy),
  Ptr(Type),
  BufPtr(Type),
  Slice(Type),
  Array(u64, Type),
  Tuple(Box<[Type]>),
  Variant(Box<[Type]>),
  Fn(Params<Type>, Box<[Type]>),
  Jump(Option<Type>, Params<Type>),
  OverloadSet(Box<[Type]>),
}

struct StoreInner {
  arena: &'static Arena<TypeData>,
  map: HashMap<TypeKey, Type>,
}

// Safety: the arena reference is only touched under the store mutex, and the
// nodes it hands out are immutable after construction.
unsafe impl Send for StoreInner {}

static STORE: LazyLock<Mutex<StoreInner>> = LazyLock::new(|| {
  Mutex::new(StoreInner {
    arena: Box::leak(Box::new(Arena::new())),
    map: HashMap::new(),
  })
});

static NOMINAL_UID: AtomicU32 = AtomicU32::new(0);

fn alloc(kind: TypeKind) -> Type {
  let store = STORE.lock().expect("poisoned");
  let data: &'static TypeData = store.arena.alloc(TypeData { kind, flags: OnceLock::new() });
  Type(data)
}

fn intern(key: TypeKey, mk: impl FnOnce() -> TypeKind) -> Type {
  let mut store = STORE.lock().expect("poisoned");
  if let Some(&t) = store.map.get(&key) { return t }
  let data: &'static TypeData = store.arena.alloc(TypeData { kind: mk(), flags: OnceLock::new() });
  let t = Type(data);
  store.map.insert(key, t);
  t
}

/// Intern a primitive type.
#[must_use] pub fn prim(p: Prim) -> Type { intern(TypeKey::Prim(p), || TypeKind::Prim(p)) }

/// Intern an integral type.
#[must_use] pub fn int(ity: IntTy) -> Type { intern(TypeKey::Int(ity), || TypeKind::Int(ity)) }

/// Intern a floating point type.
#[must_use] pub fn float(fty: FloatTy) -> Type { intern(TypeKey::Float(fty), || TypeKind::Float(fty)) }

/// The boolean type.
#[must_use] pub fn bool_ty() -> Type { prim(Prim::Bool) }
/// The character type.
#[must_use] pub fn char_ty() -> Type { prim(Prim::Char) }
/// The type of types.
#[must_use] pub fn type_ty() -> Type { prim(Prim::Type) }
/// The type of modules.
#[must_use] pub fn module_ty() -> Type { prim(Prim::Module) }
/// The type of scope constructs.
#[must_use] pub fn scope_ty() -> Type { prim(Prim::Scope) }
/// The type of block handlers.
#[must_use] pub fn block_ty() -> Type { prim(Prim::Block) }
/// The type of yield labels.
#[must_use] pub fn label_ty() -> Type { prim(Prim::Label) }
/// The type of the null pointer literal.
#[must_use] pub fn null_ptr_ty() -> Type { prim(Prim::NullPtr) }
/// The type of the empty array literal.
#[must_use] pub fn empty_array_ty() -> Type { prim(Prim::EmptyArray) }
/// The poison type.
#[must_use] pub fn error_ty() -> Type { prim(Prim::Error) }
/// The 64-bit signed integer type.
#[must_use] pub fn i64_ty() -> Type { int(IntTy::Int(super::Size::S64)) }
/// The byte-slice type `[]char`, the type of string literals.
#[must_use] pub fn str_ty() -> Type { slice(char_ty()) }

/// Intern a pointer type.
#[must_use] pub fn ptr(t: Type) -> Type { intern(TypeKey::Ptr(t), || TypeKind::Ptr(t)) }

/// Intern a buffer pointer type.
#[must_use] pub fn buf_ptr(t: Type) -> Type { intern(TypeKey::BufPtr(t), || TypeKind::BufPtr(t)) }

/// Intern a slice type.
#[must_use] pub fn slice(t: Type) -> Type { intern(TypeKey::Slice(t), || TypeKind::Slice(t)) }

/// Intern an array type.
#[must_use] pub fn arr(len: u64, elem: Type) -> Type {
  intern(TypeKey::Array(len, elem), || TypeKind::Array { len, elem })
}

/// Intern a tuple type. One-element tuples are distinct from their element.
#[must_use] pub fn tup(elems: Vec<Type>) -> Type {
  let elems: Box<[Type]> = elems.into();
  intern(TypeKey::Tuple(elems.clone()), || TypeKind::Tuple(elems))
}

/// Intern a variant type over the given set. The set is sorted and
/// deduplicated; a singleton collapses to its element.
#[must_use] pub fn var(mut elems: Vec<Type>) -> Type {
  elems.sort();
  elems.dedup();
  if let &[t] = &elems[..] { return t }
  let elems: Box<[Type]> = elems.into();
  intern(TypeKey::Variant(elems.clone()), || TypeKind::Variant(elems))
}

/// Intern a function type.
#[must_use] pub fn func(params: Params<Type>, rets: Vec<Type>) -> Type {
  let rets: Box<[Type]> = rets.into();
  intern(TypeKey::Fn(params.clone(), rets.clone()), || TypeKind::Fn(FnData { params, rets }))
}

/// Intern a jump type.
#[must_use] pub fn jump(state: Option<Type>, params: Params<Type>) -> Type {
  intern(TypeKey::Jump(state, params.clone()), || TypeKind::Jump(JumpData { state, params }))
}

/// Intern an overload set type over the given callables.
#[must_use] pub fn overload_set(mut members: Vec<Type>) -> Type {
  members.sort();
  members.dedup();
  let members: Box<[Type]> = members.into();
  intern(TypeKey::OverloadSet(members.clone()), || TypeKind::OverloadSet(members))
}

/// Allocate a fresh incomplete struct type.
#[must_use] pub fn new_struct(module: ModuleId, scope: ScopeId) -> Type {
  alloc(TypeKind::Struct(StructData {
    module, scope,
    fields: OnceLock::new(),
    specials: OnceLock::new(),
    uid: NOMINAL_UID.fetch_add(1, Ordering::Relaxed),
  }))
}

/// Allocate a fresh enum type.
#[must_use] pub fn new_enum(module: ModuleId, members: Box<[(Symbol, u64)]>) -> Type {
  alloc(TypeKind::Enum(EnumData {
    module, members, uid: NOMINAL_UID.fetch_add(1, Ordering::Relaxed),
  }))
}

/// Allocate a fresh flags type.
#[must_use] pub fn new_flags(module: ModuleId, members: Box<[(Symbol, u64)]>) -> Type {
  alloc(TypeKind::Flags(EnumData {
    module, members, uid: NOMINAL_UID.fetch_add(1, Ordering::Relaxed),
  }))
}

/// Allocate a generic function type pointing at its declaration.
#[must_use] pub fn generic_fn(module: ModuleId, decl: ExprId) -> Type {
  alloc(TypeKind::GenericFn(GenericData { module, decl }))
}

/// Allocate a generic struct type pointing at its declaration.
#[must_use] pub fn generic_struct(module: ModuleId, decl: ExprId) -> Type {
  alloc(TypeKind::GenericStruct(GenericData { module, decl }))
}

fn align_to(off: u64, align: u64) -> u64 {
  if align == 0 { return off }
  off.div_ceil(align) * align
}

impl Type {
  /// The node this handle points to.
  #[must_use] pub fn kind(self) -> &'static TypeKind { &self.0.kind }

  /// Is this the poison type?
  #[must_use] pub fn is_error(self) -> bool { matches!(self.0.kind, TypeKind::Prim(Prim::Error)) }

  /// The struct payload, if this is a struct.
  #[must_use] pub fn as_struct(self) -> Option<&'static StructData> {
    if let TypeKind::Struct(s) = &self.0.kind { Some(s) } else { None }
  }

  /// The function payload, if this is a concrete function.
  #[must_use] pub fn as_fn(self) -> Option<&'static FnData> {
    if let TypeKind::Fn(f) = &self.0.kind { Some(f) } else { None }
  }

  /// The jump payload, if this is a jump.
  #[must_use] pub fn as_jump(self) -> Option<&'static JumpData> {
    if let TypeKind::Jump(j) = &self.0.kind { Some(j) } else { None }
  }

  /// Can a call site dispatch to values of this type?
  #[must_use] pub fn callable(self) -> bool {
    matches!(self.0.kind,
      TypeKind::Fn(_) | TypeKind::GenericFn(_) | TypeKind::GenericStruct(_) |
      TypeKind::OverloadSet(_))
  }

  /// How complete the type is. Only structs (and aggregates of structs) can
  /// be less than [`Completeness::Complete`].
  #[must_use] pub fn completeness(self) -> Completeness {
    match &self.0.kind {
      TypeKind::Struct(s) => s.completeness(),
      TypeKind::Array { elem, .. } => elem.completeness(),
      TypeKind::Tuple(ts) | TypeKind::Variant(ts) =>
        ts.iter().map(|t| t.completeness()).min().unwrap_or(Completeness::Complete),
      _ => Completeness::Complete,
    }
  }

  /// The derived trait flags, computed bottom-up and cached per node.
  #[must_use] pub fn flags(self) -> TypeFlags {
    *self.0.flags.get_or_init(|| self.compute_flags())
  }

  fn compute_flags(self) -> TypeFlags {
    let value = TypeFlags::DEFAULT_INIT | TypeFlags::COPY | TypeFlags::MOVE;
    let handle = TypeFlags::COPY | TypeFlags::MOVE;
    match &self.0.kind {
      TypeKind::Prim(Prim::Bool | Prim::Char) | TypeKind::Int(_) | TypeKind::Float(_) => value,
      TypeKind::Prim(_) => handle,
      // All four traits hold for pointer-like types; their destructors do
      // nothing but aggregates containing them stay uniform.
      TypeKind::Ptr(_) | TypeKind::BufPtr(_) | TypeKind::Slice(_) => TypeFlags::all(),
      TypeKind::Array { elem, .. } => elem.flags(),
      TypeKind::Tuple(ts) | TypeKind::Variant(ts) => Self::combine_flags(ts.iter().copied()),
      TypeKind::Enum(_) | TypeKind::Flags(_) => value,
      TypeKind::Struct(s) => {
        let mut flags = match s.fields() {
          Some(fields) => Self::combine_flags(fields.iter().map(|f| f.ty)),
          None => return TypeFlags::empty(),
        };
        for f in s.fields().expect("checked") {
          if f.hashtags.contains(Hashtags::UNCOPYABLE) { flags.remove(TypeFlags::COPY) }
        }
        flags
      }
      TypeKind::Fn(_) | TypeKind::Jump(_) | TypeKind::GenericFn(_) |
      TypeKind::GenericStruct(_) | TypeKind::OverloadSet(_) => handle,
    }
  }

  fn combine_flags(ts: impl Iterator<Item = Type>) -> TypeFlags {
    let mut flags = TypeFlags::DEFAULT_INIT | TypeFlags::COPY | TypeFlags::MOVE;
    let mut dtor = TypeFlags::empty();
    for t in ts {
      flags &= t.flags();
      dtor |= t.flags() & TypeFlags::HAS_DTOR;
    }
    flags | dtor
  }

  /// The byte size of values of this type.
  #[must_use] pub fn bytes(self, arch: Arch) -> u64 {
    match &self.0.kind {
      TypeKind::Prim(Prim::Bool | Prim::Char) => 1,
      TypeKind::Prim(Prim::EmptyArray | Prim::Error) => 0,
      TypeKind::Prim(_) => arch.ptr_bytes,
      TypeKind::Int(ity) => ity.bytes(),
      TypeKind::Float(FloatTy::F32) => 4,
      TypeKind::Float(FloatTy::F64) => 8,
      TypeKind::Ptr(_) | TypeKind::BufPtr(_) => arch.ptr_bytes,
      TypeKind::Slice(_) => 2 * arch.ptr_bytes,
      TypeKind::Array { len, elem } => len * align_to(elem.bytes(arch), elem.align(arch)),
      TypeKind::Tuple(ts) => {
        let mut off = 0;
        for t in &**ts { off = align_to(off, t.align(arch)) + t.bytes(arch) }
        align_to(off, self.align(arch))
      }
      TypeKind::Variant(ts) => {
        let payload = ts.iter().map(|t| t.bytes(arch)).max().unwrap_or(0);
        align_to(arch.ptr_bytes + payload, self.align(arch))
      }
      TypeKind::Enum(_) | TypeKind::Flags(_) => 8,
      TypeKind::Struct(s) => {
        let Some(fields) = s.fields() else { return 0 };
        let mut off = 0;
        for f in fields { off = align_to(off, f.ty.align(arch)) + f.ty.bytes(arch) }
        align_to(off, self.align(arch))
      }
      TypeKind::Fn(_) | TypeKind::Jump(_) | TypeKind::GenericFn(_) |
      TypeKind::GenericStruct(_) | TypeKind::OverloadSet(_) => arch.ptr_bytes,
    }
  }

  /// The alignment of values of this type.
  #[must_use] pub fn align(self, arch: Arch) -> u64 {
    match &self.0.kind {
      TypeKind::Prim(Prim::Bool | Prim::Char) => 1,
      TypeKind::Prim(Prim::EmptyArray | Prim::Error) => 1,
      TypeKind::Prim(_) => arch.ptr_bytes,
      TypeKind::Int(ity) => ity.bytes(),
      TypeKind::Float(FloatTy::F32) => 4,
      TypeKind::Float(FloatTy::F64) => 8,
      TypeKind::Ptr(_) | TypeKind::BufPtr(_) | TypeKind::Slice(_) => arch.ptr_bytes,
      TypeKind::Array { elem, .. } => elem.align(arch),
      TypeKind::Tuple(ts) => ts.iter().map(|t| t.align(arch)).max().unwrap_or(1),
      TypeKind::Variant(ts) =>
        ts.iter().map(|t| t.align(arch)).max().unwrap_or(1).max(arch.ptr_bytes),
      TypeKind::Enum(_) | TypeKind::Flags(_) => 8,
      TypeKind::Struct(s) => {
        let Some(fields) = s.fields() else { return 1 };
        fields.iter().map(|f| f.ty.align(arch)).max().unwrap_or(1)
      }
      TypeKind::Fn(_) | TypeKind::Jump(_) | TypeKind::GenericFn(_) |
      TypeKind::GenericStruct(_) | TypeKind::OverloadSet(_) => arch.ptr_bytes,
    }
  }

  /// Big types are returned through hidden out-parameter slots rather than
  /// registers.
  #[must_use] pub fn is_big(self, arch: Arch) -> bool {
    matches!(self.0.kind,
      TypeKind::Struct(_) | TypeKind::Array { .. } | TypeKind::Tuple(_) | TypeKind::Variant(_))
      && self.bytes(arch) > 2 * arch.ptr_bytes
  }

  /// Finish the field list of an incomplete struct, making it data-complete.
  /// It is a bug to complete a struct twice.
  pub fn complete_struct_fields(self, fields: Box<[Field]>) {
    let TypeKind::Struct(s) = &self.0.kind else { panic!("not a struct: {self:?}") };
    assert!(s.fields.set(fields).is_ok(), "struct completed twice");
  }

  /// Install the special members of a data-complete struct, completing it.
  pub fn complete_struct_specials(self, specials: SpecialMembers) {
    let TypeKind::Struct(s) = &self.0.kind else { panic!("not a struct: {self:?}") };
    assert!(s.fields.get().is_some(), "struct is not data-complete");
    assert!(s.specials.set(specials).is_ok(), "specials completed twice");
  }
}

impl fmt::Debug for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(self, f) }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.0.kind {
      TypeKind::Prim(Prim::Bool) => write!(f, "bool"),
      TypeKind::Prim(Prim::Char) => write!(f, "char"),
      TypeKind::Prim(Prim::Type) => write!(f, "type"),
      TypeKind::Prim(Prim::Module) => write!(f, "module"),
      TypeKind::Prim(Prim::Scope) => write!(f, "scope"),
      TypeKind::Prim(Prim::Block) => write!(f, "block"),
      TypeKind::Prim(Prim::Label) => write!(f, "label"),
      TypeKind::Prim(Prim::NullPtr) => write!(f, "nullptr"),
      TypeKind::Prim(Prim::EmptyArray) => write!(f, "[]"),
      TypeKind::Prim(Prim::Error) => write!(f, "<error>"),
      TypeKind::Int(ity) => write!(f, "{ity}"),
      TypeKind::Float(FloatTy::F32) => write!(f, "f32"),
      TypeKind::Float(FloatTy::F64) => write!(f, "f64"),
      TypeKind::Ptr(t) => write!(f, "*{t}"),
      TypeKind::BufPtr(t) => write!(f, "[*]{t}"),
      TypeKind::Slice(t) => write!(f, "[]{t}"),
      TypeKind::Array { len, elem } => write!(f, "[{len}; {elem}]"),
      TypeKind::Tuple(ts) => {
        write!(f, "(")?;
        for (i, t) in ts.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{t}")?;
        }
        write!(f, ")")
      }
      TypeKind::Variant(ts) => {
        for (i, t) in ts.iter().enumerate() {
          if i != 0 { write!(f, " | ")? }
          write!(f, "{t}")?;
        }
        Ok(())
      }
      TypeKind::Enum(e) => write!(f, "enum.{}", e.uid),
      TypeKind::Flags(e) => write!(f, "flags.{}", e.uid),
      TypeKind::Struct(s) => write!(f, "struct.{}", s.uid),
      TypeKind::Fn(FnData { params, rets }) => {
        write!(f, "(")?;
        for (i, p) in params.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{}: {}", p.name, p.value)?;
        }
        write!(f, ") -> (")?;
        for (i, t) in rets.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{t}")?;
        }
        write!(f, ")")
      }
      TypeKind::Jump(JumpData { state, params }) => {
        write!(f, "jump")?;
        if let Some(state) = state { write!(f, " [{state}]")? }
        write!(f, " (")?;
        for (i, p) in params.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{}: {}", p.name, p.value)?;
        }
        write!(f, ")")
      }
      TypeKind::GenericFn(_) => write!(f, "generic-fn"),
      TypeKind::GenericStruct(_) => write!(f, "generic-struct"),
      TypeKind::OverloadSet(ts) => {
        write!(f, "overloads{{")?;
        for (i, t) in ts.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{t}")?;
        }
        write!(f, "}}")
      }
    }
  }
}

/// The join of two types in the implicit-conversion lattice, or `None` if no
/// common supertype exists. The error type is absorbed by anything.
#[must_use] pub fn meet(a: Type, b: Type) -> Option<Type> {
  if a == b { return Some(a) }
  if a.is_error() { return Some(b) }
  if b.is_error() { return Some(a) }
  match (a.kind(), b.kind()) {
    (TypeKind::Prim(Prim::NullPtr), TypeKind::Ptr(_) | TypeKind::BufPtr(_)) => Some(b),
    (TypeKind::Ptr(_) | TypeKind::BufPtr(_), TypeKind::Prim(Prim::NullPtr)) => Some(a),
    (TypeKind::BufPtr(t), TypeKind::Ptr(u)) => Some(ptr(meet(*t, *u)?)),
    (TypeKind::Ptr(t), TypeKind::BufPtr(u)) => Some(ptr(meet(*t, *u)?)),
    (TypeKind::Ptr(t), TypeKind::Ptr(u)) => Some(ptr(meet(*t, *u)?)),
    (TypeKind::BufPtr(t), TypeKind::BufPtr(u)) => Some(buf_ptr(meet(*t, *u)?)),
    (TypeKind::Slice(t), TypeKind::Slice(u)) => Some(slice(meet(*t, *u)?)),
    (TypeKind::Prim(Prim::EmptyArray), TypeKind::Array { len: 0, .. }) => Some(b),
    (TypeKind::Array { len: 0, .. }, TypeKind::Prim(Prim::EmptyArray)) => Some(a),
    (&TypeKind::Array { len: m, elem: t }, &TypeKind::Array { len: n, elem: u }) if m == n =>
      Some(arr(m, meet(t, u)?)),
    (TypeKind::Tuple(ts), TypeKind::Tuple(us)) if ts.len() == us.len() => {
      let elems = ts.iter().zip(&**us)
        .map(|(&t, &u)| meet(t, u)).collect::<Option<Vec<_>>>()?;
      Some(tup(elems))
    }
    (TypeKind::Variant(ts), TypeKind::Variant(us)) =>
      Some(var(ts.iter().chain(&**us).copied().collect())),
    (TypeKind::Variant(ts), _) => Some(var(ts.iter().copied().chain([b]).collect())),
    (_, TypeKind::Variant(us)) => Some(var(us.iter().copied().chain([a]).collect())),
    _ => None,
  }
}

/// The join of a nonempty sequence of types, where defined.
#[must_use] pub fn meet_all(mut ts: impl Iterator<Item = Type>) -> Option<Type> {
  let mut acc = ts.next()?;
  for t in ts { acc = meet(acc, t)? }
  Some(acc)
}

/// Implicit conversions: `from` converts to `to` iff `to` is its join.
#[must_use] pub fn can_cast_implicitly(from: Type, to: Type) -> bool {
  meet(from, to) == Some(to)
}

fn can_widen(from: IntTy, to: IntTy) -> bool {
  match (from.signed(), to.signed()) {
    (true, false) => false,
    _ => from.size() <= to.size(),
  }
}

/// Explicit casts additionally permit numeric widenings along the partial
/// order `u8 < u16 < u32 < u64`, `i8 < i16 < i32 < i64`, `uN <= iN`, and
/// `f32 < f64`.
#[must_use] pub fn can_cast_explicitly(from: Type, to: Type) -> bool {
  if can_cast_implicitly(from, to) { return true }
  match (from.kind(), to.kind()) {
    (&TypeKind::Int(f), &TypeKind::Int(t)) => can_widen(f, t),
    (TypeKind::Float(FloatTy::F32), TypeKind::Float(FloatTy::F64)) => true,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Size;

  fn i64t() -> Type { i64_ty() }
  fn u8t() -> Type { int(IntTy::UInt(Size::S8)) }

  #[test]
  fn hash_consing_identity() {
    assert_eq!(ptr(i64t()), ptr(i64t()));
    assert_eq!(arr(3, bool_ty()), arr(3, bool_ty()));
    assert_ne!(arr(3, bool_ty()), arr(4, bool_ty()));
    assert_eq!(tup(vec![i64t(), bool_ty()]), tup(vec![i64t(), bool_ty()]));
    // One-element tuples are distinct from their element.
    assert_ne!(tup(vec![i64t()]), i64t());
  }

  #[test]
  fn variant_is_a_canonical_set() {
    assert_eq!(var(vec![i64t(), bool_ty()]), var(vec![bool_ty(), i64t()]));
    assert_eq!(var(vec![i64t(), i64t()]), i64t());
  }

  #[test]
  fn structs_are_nominal() {
    let a = new_struct(ModuleId(0), ScopeId(0));
    let b = new_struct(ModuleId(0), ScopeId(0));
    assert_ne!(a, b);
    assert_eq!(a.completeness(), Completeness::Incomplete);
    a.complete_struct_fields(Box::new([Field {
      name: crate::intern("x"), ty: i64t(), hashtags: Hashtags::empty(), default: None,
    }]));
    assert_eq!(a.completeness(), Completeness::DataComplete);
    assert_eq!(a.bytes(Arch::HOST), 8);
    a.complete_struct_specials(SpecialMembers::default());
    assert_eq!(a.completeness(), Completeness::Complete);
  }

  #[test]
  fn meet_lattice() {
    let p = ptr(i64t());
    assert_eq!(meet(null_ptr_ty(), p), Some(p));
    assert_eq!(meet(buf_ptr(i64t()), p), Some(p));
    assert_eq!(meet(empty_array_ty(), arr(0, i64t())), Some(arr(0, i64t())));
    assert_eq!(meet(empty_array_ty(), arr(2, i64t())), None);
    let v = var(vec![i64t(), bool_ty()]);
    assert_eq!(meet(i64t(), v), Some(v));
    assert_eq!(meet(i64t(), bool_ty()), None);
  }

  #[test]
  fn meet_is_associative_where_defined() {
    let ts = [null_ptr_ty(), ptr(i64t()), ptr(i64t())];
    let left = meet(meet(ts[0], ts[1]).unwrap(), ts[2]);
    let right = ts[1..].iter().try_fold(ts[0], |a, &b| meet(a, b));
    assert_eq!(left, right);
  }

  #[test]
  fn casts() {
    for t in [bool_ty(), i64t(), ptr(bool_ty()), arr(7, char_ty())] {
      assert!(can_cast_implicitly(t, t));
    }
    assert!(can_cast_explicitly(u8t(), i64t()));
    assert!(can_cast_explicitly(u8t(), int(IntTy::Int(Size::S8))));
    assert!(!can_cast_explicitly(i64t(), u8t()));
    assert!(!can_cast_implicitly(u8t(), i64t()));
    assert!(can_cast_explicitly(float(FloatTy::F32), float(FloatTy::F64)));
    assert!(!can_cast_explicitly(float(FloatTy::F64), float(FloatTy::F32)));
  }

  #[test]
  fn trait_flags_propagate() {
    assert!(i64t().flags().contains(TypeFlags::DEFAULT_INIT | TypeFlags::COPY));
    assert!(ptr(i64t()).flags().contains(TypeFlags::HAS_DTOR));
    let t = tup(vec![i64t(), ptr(bool_ty())]);
    assert!(t.flags().contains(TypeFlags::HAS_DTOR));
    assert!(t.flags().contains(TypeFlags::COPY));
  }
}
