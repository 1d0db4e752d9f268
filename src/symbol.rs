//! The global symbol interner, which provides a bidirectional mapping between
//! strings and [`Symbol`] values. Identifier names, field names and labels are
//! interned once and compared by index thereafter.

use std::fmt;
use std::sync::{LazyLock, Mutex};
use hashbrown::HashMap;
use crate::Idx;

/// An index into the global interner table. Symbols are cheap to copy and
/// compare; two symbols are equal iff they intern the same string.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Idx for Symbol {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { Symbol(n as u32) }
}

/// The string interner. Normally accessed through the global instance via
/// [`intern`], but tests can construct a local one.
#[derive(Debug)]
pub struct Interner {
  names: Vec<&'static str>,
  map: HashMap<&'static str, Symbol>,
}

impl Interner {
  fn new() -> Self {
    let mut i = Interner { names: vec![], map: HashMap::new() };
    i.intern("_");
    i
  }

  /// Intern a string, returning the canonical symbol for it.
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    // Interned strings live for the duration of the process.
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = Symbol(self.names.len().try_into().expect("too many symbols"));
    self.names.push(s);
    self.map.insert(s, sym);
    sym
  }

  /// Get the string backing a symbol.
  #[must_use] pub fn get(&self, s: Symbol) -> &'static str { self.names[s.0 as usize] }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(|| Mutex::new(Interner::new()));

/// Intern a string in the global interner.
pub fn intern(s: &str) -> Symbol {
  INTERNER.lock().expect("poisoned").intern(s)
}

impl Symbol {
  /// The blank symbol `_`, used for anonymous declarations.
  pub const UNDER: Symbol = Symbol(0);

  /// The string backing this symbol.
  #[must_use] pub fn as_str(self) -> &'static str {
    INTERNER.lock().expect("poisoned").get(self)
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

/// Given a list of keyword-symbol pairs, construct a dense map from symbol
/// indices to values, usable for fast keyword classification.
#[must_use] pub fn init_dense_symbol_map<T: Copy>(xs: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let mut vec = vec![];
  for &(s, a) in xs {
    let i = s.into_usize();
    if vec.len() <= i { vec.resize(i + 1, None) }
    vec[i] = Some(a);
  }
  vec.into_boxed_slice()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intern_is_idempotent() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "foo");
    assert_ne!(a, intern("bar"));
  }

  #[test]
  fn under_is_preinterned() {
    assert_eq!(intern("_"), Symbol::UNDER);
  }
}
