//! Structured diagnostics. The middle-end never formats source text; it
//! reports `{category, name, range, payload}` records to a
//! [`DiagnosticConsumer`] supplied by the driver.

use itertools::Itertools;
use crate::Symbol;
use crate::types::Span;
use crate::types::ty::Type;

/// Everything that can go wrong during verification and lowering.
#[derive(Clone, Debug, PartialEq)]
pub enum DiagKind {
  /// The identifier matches no visible declaration.
  UndeclaredIdentifier(Symbol),
  /// The identifier only matches non-constant declarations outside the
  /// current function.
  UncapturedIdentifier(Symbol),
  /// A non-constant identifier was used before its declaration.
  DeclOutOfOrder(Symbol),
  /// An expression depends on itself.
  CyclicDependency,
  /// A declaration shadows an ambiguously callable declaration visible from
  /// both scopes.
  ShadowingDeclaration(Symbol),
  /// A declaration's type annotation is not a constant.
  NonConstantTypeInDeclaration,
  /// The declaration's type cannot be inferred from its initializer.
  UninferrableType,
  /// A constant declared without a value.
  UninitializedConstant,
  /// A non-type where a type was required.
  NotAType(Type),
  /// The explicit cast is not allowed.
  InvalidCast {
    /// Source type.
    from: Type,
    /// Target type.
    to: Type,
  },
  /// The target of `as` is not a constant.
  CastToNonConstantType,
  /// The import operand failed to resolve to a module.
  InvalidImport(Symbol),
  /// The import operand is not a constant.
  NonConstantImport,
  /// Designated initializer on a non-struct type.
  NonStructDesignatedInitializerType(Type),
  /// Designated initializer names a field the struct does not have.
  MissingStructField(Symbol),
  /// Designated initializer names a field not exported to this module.
  NonExportedField(Symbol),
  /// A field initializer is not implicitly convertible to the field type.
  InvalidInitializerType {
    /// The field type.
    expected: Type,
    /// The initializer type.
    given: Type,
  },
  /// A binary operator argument pack was not expanded.
  UnexpandedBinaryOperatorArgument,
  /// Built-in binary operator on mismatched types.
  BinaryOperatorTypeMismatch {
    /// Left operand type.
    lhs: Type,
    /// Right operand type.
    rhs: Type,
  },
  /// No user overload matches the operands.
  NoMatchingBinaryOperator,
  /// A user operator overload is not callable with two arguments.
  InvalidBinaryOperatorOverload,
  /// `&=`, `|=`, `^=` on something other than bool or flags.
  LogicalAssignmentNeedsBoolOrFlags(Type),
  /// Assignment target is not a mutable reference.
  InvalidAssignmentOperatorLhsValueCategory,
  /// More positional arguments than parameters.
  TooManyArguments {
    /// Arguments provided.
    provided: usize,
    /// Maximum accepted.
    max: usize,
  },
  /// Required parameters without arguments or defaults.
  MissingNonDefaultableArguments(Vec<Symbol>),
  /// An argument is not implicitly convertible to its parameter.
  TypeMismatch {
    /// The parameter, by name or position.
    param: String,
    /// The argument type.
    arg_ty: Type,
  },
  /// A named argument matches no parameter.
  NoParameterNamed(Symbol),
  /// A named argument targets a parameter already filled positionally.
  PositionalArgumentNamed(Symbol),
  /// A struct field's type is incomplete.
  IncompleteField,
  /// Compile-time evaluation failed.
  EvaluationFailure(String),
  /// An overload set member is not callable.
  NonCallableInOverloadSet,
  /// The callee is not callable at all.
  UncallableExpression(Type),
  /// The indexed expression cannot be indexed.
  InvalidIndexing(Type),
  /// Tuple indexing with a non-constant index.
  NonConstantTupleIndex,
  /// `copy` of an uncopyable or `move` of an immovable value.
  MoveOrCopyUnsupported(Type),
  /// Member access on a value with no such member.
  MissingMember(Symbol),
  /// The scope usage refers to a block the scope does not define.
  NoBlockWithName(Symbol),
  /// `&` of something that does not denote storage.
  NonAddressableExpression,
  /// `@` of a non-pointer.
  DereferencingNonPointer(Type),
  /// `$e` where `e` is not a compile-time constant.
  NonConstantEvaluation,
}

impl DiagKind {
  /// The diagnostic category.
  #[must_use] pub fn category(&self) -> &'static str {
    match self {
      DiagKind::EvaluationFailure(_) => "evaluation-error",
      _ => "type-error",
    }
  }

  /// The stable kebab-case name tests and tools match on.
  #[must_use] pub fn name(&self) -> &'static str {
    match self {
      DiagKind::UndeclaredIdentifier(_) => "undeclared-identifier",
      DiagKind::UncapturedIdentifier(_) => "uncaptured-identifier",
      DiagKind::DeclOutOfOrder(_) => "declaration-used-before-declared",
      DiagKind::CyclicDependency => "cyclic-dependency",
      DiagKind::ShadowingDeclaration(_) => "shadowing-declaration",
      DiagKind::NonConstantTypeInDeclaration => "non-constant-type-in-declaration",
      DiagKind::UninferrableType => "uninferrable-type",
      DiagKind::UninitializedConstant => "uninitialized-constant",
      DiagKind::NotAType(_) => "not-a-type",
      DiagKind::InvalidCast { .. } => "invalid-cast",
      DiagKind::CastToNonConstantType => "cast-to-non-constant-type",
      DiagKind::InvalidImport(_) => "invalid-import",
      DiagKind::NonConstantImport => "non-constant-import",
      DiagKind::NonStructDesignatedInitializerType(_) =>
        "non-struct-designated-initializer-type",
      DiagKind::MissingStructField(_) => "missing-struct-field",
      DiagKind::NonExportedField(_) => "non-exported-field",
      DiagKind::InvalidInitializerType { .. } => "invalid-initializer-type",
      DiagKind::UnexpandedBinaryOperatorArgument => "unexpanded-binary-operator-argument",
      DiagKind::BinaryOperatorTypeMismatch { .. } => "binary-operator-type-mismatch",
      DiagKind::NoMatchingBinaryOperator => "no-matching-binary-operator",
      DiagKind::InvalidBinaryOperatorOverload => "invalid-binary-operator-overload",
      DiagKind::LogicalAssignmentNeedsBoolOrFlags(_) =>
        "logical-assignment-needs-bool-or-flags",
      DiagKind::InvalidAssignmentOperatorLhsValueCategory =>
        "invalid-assignment-lhs-value-category",
      DiagKind::TooManyArguments { .. } => "too-many-arguments",
      DiagKind::MissingNonDefaultableArguments(_) => "missing-non-defaultable-arguments",
      DiagKind::TypeMismatch { .. } => "type-mismatch",
      DiagKind::NoParameterNamed(_) => "no-parameter-named",
      DiagKind::PositionalArgumentNamed(_) => "positional-argument-named",
      DiagKind::IncompleteField => "incomplete-field",
      DiagKind::EvaluationFailure(_) => "evaluation-failure",
      DiagKind::NonCallableInOverloadSet => "non-callable-in-overload-set",
      DiagKind::UncallableExpression(_) => "uncallable-expression",
      DiagKind::InvalidIndexing(_) => "invalid-indexing",
      DiagKind::NonConstantTupleIndex => "non-constant-tuple-index",
      DiagKind::MoveOrCopyUnsupported(_) => "move-or-copy-unsupported",
      DiagKind::MissingMember(_) => "missing-member",
      DiagKind::NoBlockWithName(_) => "no-block-with-name",
      DiagKind::NonAddressableExpression => "non-addressable-expression",
      DiagKind::DereferencingNonPointer(_) => "dereferencing-non-pointer",
      DiagKind::NonConstantEvaluation => "non-constant-evaluation",
    }
  }

  /// A human-oriented payload string. Rendering into source context is the
  /// driver's job.
  #[must_use] pub fn payload(&self) -> String {
    match self {
      DiagKind::UndeclaredIdentifier(s) | DiagKind::UncapturedIdentifier(s) |
      DiagKind::DeclOutOfOrder(s) | DiagKind::ShadowingDeclaration(s) |
      DiagKind::NoParameterNamed(s) | DiagKind::PositionalArgumentNamed(s) |
      DiagKind::MissingStructField(s) | DiagKind::NonExportedField(s) |
      DiagKind::InvalidImport(s) | DiagKind::MissingMember(s) |
      DiagKind::NoBlockWithName(s) => s.as_str().to_owned(),
      DiagKind::NotAType(t) | DiagKind::LogicalAssignmentNeedsBoolOrFlags(t) |
      DiagKind::UncallableExpression(t) | DiagKind::InvalidIndexing(t) |
      DiagKind::MoveOrCopyUnsupported(t) | DiagKind::DereferencingNonPointer(t) |
      DiagKind::NonStructDesignatedInitializerType(t) => t.to_string(),
      DiagKind::InvalidCast { from, to } => format!("{from} as {to}"),
      DiagKind::InvalidInitializerType { expected, given } =>
        format!("expected {expected}, given {given}"),
      DiagKind::BinaryOperatorTypeMismatch { lhs, rhs } => format!("{lhs} and {rhs}"),
      DiagKind::TooManyArguments { provided, max } => format!("{provided} > {max}"),
      DiagKind::MissingNonDefaultableArguments(names) =>
        names.iter().copied().map(Symbol::as_str).join(", "),
      DiagKind::TypeMismatch { param, arg_ty } => format!("{param}: {arg_ty}"),
      DiagKind::EvaluationFailure(msg) => msg.clone(),
      _ => String::new(),
    }
  }
}

/// One reported diagnostic.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
  /// What went wrong.
  pub kind: DiagKind,
  /// Where.
  pub range: Span,
}

/// The sink the middle-end reports into.
pub trait DiagnosticConsumer {
  /// Receive one diagnostic.
  fn consume(&mut self, d: Diagnostic);
  /// How many diagnostics have been received.
  fn num_consumed(&self) -> usize;
}

/// A consumer that stores diagnostics, used by tests and by the driver to
/// count failures.
#[derive(Debug, Default)]
pub struct TrackingConsumer {
  /// Everything received so far.
  pub diagnostics: Vec<Diagnostic>,
}

impl TrackingConsumer {
  /// `(category, name)` pairs in arrival order.
  #[must_use] pub fn pairs(&self) -> Vec<(&'static str, &'static str)> {
    self.diagnostics.iter().map(|d| (d.kind.category(), d.kind.name())).collect()
  }
}

impl DiagnosticConsumer for TrackingConsumer {
  fn consume(&mut self, d: Diagnostic) {
    log::debug!("diagnostic: {}.{} ({})", d.kind.category(), d.kind.name(), d.kind.payload());
    self.diagnostics.push(d);
  }
  fn num_consumed(&self) -> usize { self.diagnostics.len() }
}

/// A consumer that forwards diagnostics to the log, used by the CLI.
#[derive(Debug, Default)]
pub struct LoggingConsumer {
  count: usize,
}

impl DiagnosticConsumer for LoggingConsumer {
  fn consume(&mut self, d: Diagnostic) {
    self.count += 1;
    log::error!("[{:?}] {}.{}: {}", d.range, d.kind.category(), d.kind.name(), d.kind.payload());
  }
  fn num_consumed(&self) -> usize { self.count }
}
