//! Compile-time values. A [`Value`] is the result of evaluating a constant
//! expression: a scalar, a handle (type, function, module, ...), or a byte
//! buffer for aggregates.

use std::fmt;
use byteorder::{ByteOrder, LE};
use num::{BigInt, ToPrimitive};
use crate::Symbol;
use crate::types::ModuleId;
use crate::types::ty::Type;
use crate::types::entity::BuiltinFn;
use super::{BlockRef, FnRef, JumpRef, Reg, ScopeRef};

/// A reference to a callable: a lowered native function or a builtin.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AnyFn {
  /// A function lowered by this compiler, owned by a context.
  Native(FnRef),
  /// A compiler builtin.
  Builtin(BuiltinFn),
}

/// An abstract address, produced by allocas and pointer arithmetic during
/// compile-time execution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Addr {
  /// An offset into the current interpreter stack frame.
  Stack(u64),
  /// An offset into the read-only data pool.
  ReadOnly(u64),
  /// The null address.
  Null,
}

impl Addr {
  /// Displace the address by a byte count.
  #[must_use] pub fn offset(self, by: i64) -> Addr {
    match self {
      Addr::Stack(a) => Addr::Stack(a.wrapping_add_signed(by)),
      Addr::ReadOnly(a) => Addr::ReadOnly(a.wrapping_add_signed(by)),
      Addr::Null => Addr::Null,
    }
  }
}

/// A tagged compile-time value. `Empty` marks values that are unknown at
/// compile time (runtime registers erased during instantiation).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Value {
  /// No compile-time value.
  #[default]
  Empty,
  /// A boolean.
  Bool(bool),
  /// A character.
  Char(char),
  /// An integer, typed by the context it appears in.
  Int(BigInt),
  /// A 32-bit float, stored as bits so values hash.
  F32(u32),
  /// A 64-bit float, stored as bits so values hash.
  F64(u64),
  /// A type.
  Type(Type),
  /// A module handle.
  Module(ModuleId),
  /// A callable.
  Fn(AnyFn),
  /// A compiled jump, owned by a context.
  Jump(JumpRef),
  /// A scope construct, owned by a context.
  Scope(ScopeRef),
  /// A block handler, owned by a context.
  Block(BlockRef),
  /// A yield label.
  Label(Symbol),
  /// A symbol in a linked library, produced by `foreign`.
  ForeignFn(Symbol),
  /// An enum member value.
  EnumVal(u64),
  /// A flags value.
  FlagsVal(u64),
  /// An address.
  Addr(Addr),
  /// A register in the group currently being built; not a compile-time
  /// constant.
  Reg(Reg),
  /// A string constant, the value of a `[]char` literal.
  String(Symbol),
  /// The raw bytes of an aggregate constant.
  Buffer(Box<[u8]>),
}

impl Value {
  /// Is this the empty value?
  #[must_use] pub fn is_empty(&self) -> bool { matches!(self, Value::Empty) }

  /// Wrap a float.
  #[must_use] pub fn f32(x: f32) -> Self { Value::F32(x.to_bits()) }
  /// Wrap a double.
  #[must_use] pub fn f64(x: f64) -> Self { Value::F64(x.to_bits()) }

  /// The boolean payload.
  #[must_use] pub fn as_bool(&self) -> Option<bool> {
    if let Value::Bool(b) = *self { Some(b) } else { None }
  }

  /// The integer payload.
  #[must_use] pub fn as_int(&self) -> Option<&BigInt> {
    if let Value::Int(n) = self { Some(n) } else { None }
  }

  /// The integer payload, narrowed to `u64`.
  #[must_use] pub fn as_u64(&self) -> Option<u64> { self.as_int()?.to_u64() }

  /// The type payload.
  #[must_use] pub fn as_type(&self) -> Option<Type> {
    if let Value::Type(t) = *self { Some(t) } else { None }
  }

  /// The module payload.
  #[must_use] pub fn as_module(&self) -> Option<ModuleId> {
    if let Value::Module(m) = *self { Some(m) } else { None }
  }

  /// The callable payload.
  #[must_use] pub fn as_fn(&self) -> Option<AnyFn> {
    if let Value::Fn(f) = *self { Some(f) } else { None }
  }

  /// The string payload.
  #[must_use] pub fn as_string(&self) -> Option<Symbol> {
    if let Value::String(s) = *self { Some(s) } else { None }
  }

  /// Encode a scalar value into a little-endian byte slot of the given
  /// width. Aggregates copy their buffers; handles are not encodable.
  pub fn write_le(&self, out: &mut [u8]) {
    match self {
      Value::Bool(b) => out[0] = u8::from(*b),
      Value::Char(c) => out[0] = *c as u8,
      Value::Int(n) => {
        let raw = n.to_i128().expect("integer out of range").to_le_bytes();
        out.copy_from_slice(&raw[..out.len()]);
      }
      Value::F32(bits) => LE::write_u32(out, *bits),
      Value::F64(bits) => LE::write_u64(out, *bits),
      Value::EnumVal(v) | Value::FlagsVal(v) => LE::write_u64(out, *v),
      Value::Buffer(buf) => out.copy_from_slice(buf),
      _ => panic!("value has no byte representation: {self:?}"),
    }
  }

  /// Decode a scalar of the given signedness and width from a little-endian
  /// byte slot.
  #[must_use] pub fn read_int_le(bytes: &[u8], signed: bool) -> Value {
    let mut raw = [0; 16];
    raw[..bytes.len()].copy_from_slice(bytes);
    if signed && bytes.last().is_some_and(|&b| b & 0x80 != 0) {
      for b in &mut raw[bytes.len()..] { *b = 0xff }
      Value::Int(BigInt::from(i128::from_le_bytes(raw)))
    } else {
      Value::Int(BigInt::from(u128::from_le_bytes(raw)))
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Empty => write!(f, "<empty>"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Char(c) => write!(f, "{c:?}"),
      Value::Int(n) => write!(f, "{n}"),
      Value::F32(bits) => write!(f, "{}", f32::from_bits(*bits)),
      Value::F64(bits) => write!(f, "{}", f64::from_bits(*bits)),
      Value::Type(t) => write!(f, "{t}"),
      Value::Module(m) => write!(f, "module#{}", m.0),
      Value::Fn(AnyFn::Native(r)) => write!(f, "fn#{}.{}", r.module.0, r.id.0),
      Value::Fn(AnyFn::Builtin(b)) => write!(f, "builtin.{b:?}"),
      Value::Jump(r) => write!(f, "jump#{}.{}", r.module.0, r.id.0),
      Value::Scope(r) => write!(f, "scope#{}.{}", r.module.0, r.id.0),
      Value::Block(r) => write!(f, "block#{}.{}", r.module.0, r.id.0),
      Value::Label(s) => write!(f, "#.{s}"),
      Value::ForeignFn(s) => write!(f, "foreign({s})"),
      Value::EnumVal(v) => write!(f, "enum({v})"),
      Value::FlagsVal(v) => write!(f, "flags({v:#x})"),
      Value::Addr(a) => write!(f, "{a:?}"),
      Value::Reg(r) => write!(f, "%{}", r.0),
      Value::String(s) => write!(f, "{:?}", s.as_str()),
      Value::Buffer(buf) => write!(f, "0x{}", hex::encode(buf)),
    }
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self { Value::Bool(b) }
}
impl From<BigInt> for Value {
  fn from(n: BigInt) -> Self { Value::Int(n) }
}
impl From<i64> for Value {
  fn from(n: i64) -> Self { Value::Int(n.into()) }
}
impl From<Type> for Value {
  fn from(t: Type) -> Self { Value::Type(t) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scalar_round_trip() {
    let mut slot = [0u8; 8];
    Value::from(-2i64).write_le(&mut slot);
    assert_eq!(Value::read_int_le(&slot, true), Value::from(-2i64));
    assert_eq!(Value::read_int_le(&slot[..2], false), Value::Int(0xfffe.into()));
  }

  #[test]
  fn floats_hash_by_bits() {
    assert_eq!(Value::f64(1.5), Value::f64(1.5));
    assert_ne!(Value::f64(1.5), Value::f64(-1.5));
  }
}
