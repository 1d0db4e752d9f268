//! Primitive type keywords and builtin functions, with symbol maps used by
//! name resolution when an identifier matches no user declaration.

use std::sync::LazyLock;
use crate::{Idx, Symbol, intern, symbol::init_dense_symbol_map};
use super::{IntTy, FloatTy, Size};
use super::ty::{self, Type};

macro_rules! make_prims {
  {$($(#[$attr0:meta])* enum $name:ident {
    $($(#[$attr:meta])* $x:ident: $e:expr,)*
  })* } => {
    $(
      $(#[$attr0])*
      #[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
      pub enum $name { $($(#[$attr])* $x),* }

      impl $name {
        /// Evaluate a function on all elements of the type, with their names.
        pub fn scan(#[allow(unused)] mut f: impl FnMut(Self, &'static str)) {
          $(f($name::$x, $e);)*
        }

        /// Convert a string into this type.
        #[allow(clippy::should_implement_trait)]
        #[must_use] pub fn from_str(s: &str) -> Option<Self> {
          match s {
            $($e => Some(Self::$x),)*
            _ => None
          }
        }

        /// Get the keyword for a symbol.
        #[must_use] pub fn from_symbol(s: Symbol) -> Option<Self> {
          static SYMBOL_MAP: LazyLock<Box<[Option<$name>]>> = LazyLock::new(|| {
            init_dense_symbol_map(&[$((intern($e), $name::$x)),*])
          });
          SYMBOL_MAP.get(s.into_usize()).map_or(None, |x| *x)
        }

        /// Get the symbol for this primitive.
        #[must_use] pub fn as_symbol(self) -> Symbol {
          static INTERNED: LazyLock<Box<[Symbol]>> =
            LazyLock::new(|| vec![$(intern($e)),*].into());
          INTERNED[self as usize]
        }
      }
    )*
  }
}

make_prims! {
  /// The primitive type keywords.
  enum PrimType {
    /// `bool` is the type of booleans; `sizeof bool = 1`.
    Bool: "bool",
    /// `char` is the type of single byte characters.
    Char: "char",
    /// `i8` is the type of 8 bit signed integers.
    I8: "i8",
    /// `i16` is the type of 16 bit signed integers.
    I16: "i16",
    /// `i32` is the type of 32 bit signed integers.
    I32: "i32",
    /// `i64` is the type of 64 bit signed integers.
    I64: "i64",
    /// `u8` is the type of 8 bit unsigned integers.
    U8: "u8",
    /// `u16` is the type of 16 bit unsigned integers.
    U16: "u16",
    /// `u32` is the type of 32 bit unsigned integers.
    U32: "u32",
    /// `u64` is the type of 64 bit unsigned integers.
    U64: "u64",
    /// `f32` is the type of single precision floats.
    F32: "f32",
    /// `f64` is the type of double precision floats.
    F64: "f64",
    /// `type` is the type of types.
    Type: "type",
    /// `module` is the type of module values produced by `import`.
    Module: "module",
    /// `null_ptr` is the type of the null pointer literal.
    NullPtr: "null_ptr",
  }

  /// Builtin functions, typechecked like regular calls.
  enum BuiltinFn {
    /// `bytes(T)` returns the size of `T` in bytes.
    /// ```text
    /// bytes :: (T: type) -> i64
    /// ```
    Bytes: "bytes",
    /// `alignment(T)` returns the alignment of `T` in bytes.
    /// ```text
    /// alignment :: (T: type) -> i64
    /// ```
    Alignment: "alignment",
    /// `opaque()` creates a fresh opaque type usable only behind pointers.
    /// ```text
    /// opaque :: () -> type
    /// ```
    Opaque: "opaque",
    /// `foreign(name, T)` binds a symbol from a linked library at type `T`.
    Foreign: "foreign",
    /// `debug_ir()` dumps the current block group during lowering.
    DebugIr: "debug_ir",
  }
}

impl PrimType {
  /// The universe type for this keyword.
  #[must_use] pub fn ty(self) -> Type {
    match self {
      PrimType::Bool => ty::bool_ty(),
      PrimType::Char => ty::char_ty(),
      PrimType::I8 => ty::int(IntTy::Int(Size::S8)),
      PrimType::I16 => ty::int(IntTy::Int(Size::S16)),
      PrimType::I32 => ty::int(IntTy::Int(Size::S32)),
      PrimType::I64 => ty::int(IntTy::Int(Size::S64)),
      PrimType::U8 => ty::int(IntTy::UInt(Size::S8)),
      PrimType::U16 => ty::int(IntTy::UInt(Size::S16)),
      PrimType::U32 => ty::int(IntTy::UInt(Size::S32)),
      PrimType::U64 => ty::int(IntTy::UInt(Size::S64)),
      PrimType::F32 => ty::float(FloatTy::F32),
      PrimType::F64 => ty::float(FloatTy::F64),
      PrimType::Type => ty::type_ty(),
      PrimType::Module => ty::module_ty(),
      PrimType::NullPtr => ty::null_ptr_ty(),
    }
  }
}

impl BuiltinFn {
  /// The signature of this builtin. `foreign` is signature-polymorphic and
  /// has no fixed type; its call sites are verified specially.
  #[must_use] pub fn ty(self) -> Option<Type> {
    let tt = ty::type_ty();
    let i64t = ty::i64_ty();
    let mut one_ty = crate::types::Params::new();
    one_ty.push(intern("T"), tt, crate::types::ParamFlags::empty());
    match self {
      BuiltinFn::Bytes | BuiltinFn::Alignment => Some(ty::func(one_ty, vec![i64t])),
      BuiltinFn::Opaque => Some(ty::func(crate::types::Params::new(), vec![tt])),
      BuiltinFn::Foreign => None,
      BuiltinFn::DebugIr => Some(ty::func(crate::types::Params::new(), vec![])),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keyword_round_trip() {
    PrimType::scan(|p, name| {
      assert_eq!(PrimType::from_str(name), Some(p));
      assert_eq!(PrimType::from_symbol(intern(name)), Some(p));
      assert_eq!(p.as_symbol(), intern(name));
    });
    assert_eq!(PrimType::from_str("i128"), None);
  }

  #[test]
  fn builtin_signatures() {
    let f = BuiltinFn::Bytes.ty().unwrap();
    let data = f.as_fn().unwrap();
    assert_eq!(data.params.len(), 1);
    assert_eq!(&*data.rets, &[ty::i64_ty()]);
    assert!(BuiltinFn::Foreign.ty().is_none());
  }
}
