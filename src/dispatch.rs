//! Overload resolution: matching call-site arguments to candidate callables,
//! checking implicit conversions, and producing the viable overload set and
//! result type for a call.

use bit_vec::BitVec;
use crate::context::{CtxId, OverloadSet};
use crate::diag::DiagKind;
use crate::ir::Value;
use crate::types::ast::ExprId;
use crate::types::ty::{self, QualType, Quals, Type, TypeKind};
use crate::types::{Arguments, ModuleId, Params, Typed};
use crate::verify::Compiler;

/// Why a call failed to resolve: one reason per rejected candidate.
#[derive(Debug, Default)]
pub struct CallError {
  /// `(candidate type, reason)` pairs.
  pub reasons: Vec<(Type, DiagKind)>,
}

impl CallError {
  fn reject(&mut self, callable: Type, reason: DiagKind) {
    self.reasons.push((callable, reason));
  }
}

// A candidate that survived parameter matching and is ready for conversion
// checks.
struct Viable {
  member: Option<(ModuleId, ExprId)>,
  callable: Type,
  params: Params<Type>,
  rets: Vec<Type>,
  generic_struct: bool,
}

/// Match arguments to parameters without conversion checking. Returns the
/// first structural mismatch found.
pub fn match_arguments_to_parameters<T>(params: &Params<T>, args: &Arguments<Typed<Value>>)
    -> Option<DiagKind> {
  if args.pos.len() > params.len() {
    return Some(DiagKind::TooManyArguments {
      provided: args.pos.len(),
      max: params.len(),
    })
  }

  // Which parameter positions have an argument.
  let mut filled = BitVec::from_elem(params.len(), false);
  for i in 0..args.pos.len() { filled.set(i, true) }
  for &(name, _) in &args.named {
    match params.index_of(name) {
      None => return Some(DiagKind::NoParameterNamed(name)),
      Some(i) if filled[i] => return Some(DiagKind::PositionalArgumentNamed(name)),
      Some(i) => filled.set(i, true),
    }
  }

  let missing: Vec<_> = params.iter().enumerate()
    .filter(|&(i, p)| !filled[i] && !p.flags.contains(crate::types::ParamFlags::HAS_DEFAULT))
    .map(|(_, p)| p.name)
    .collect();
  if missing.is_empty() { None } else {
    Some(DiagKind::MissingNonDefaultableArguments(missing))
  }
}

impl Compiler<'_> {
  // The qualified type of an expression, searching the current context and
  // its ancestors. Candidates may have been verified in an outer context.
  pub(crate) fn qt_anywhere(&self, e: ExprId) -> Option<QualType> {
    let mut ctx = self.ctx;
    loop {
      if let Some(qt) = self.tree.qual_type(ctx, e) { return Some(qt) }
      ctx = self.tree.parent(ctx)?;
    }
  }

  fn candidate_qt(&mut self, m: ModuleId, expr: ExprId) -> Option<QualType> {
    if m == self.module {
      self.qt_anywhere(expr).or_else(|| Some(self.verify_type(expr)))
    } else {
      self.importer.get(m).tree.qual_type(CtxId::ROOT, expr)
    }
  }

  // Expand one candidate into zero or more viable signatures, accumulating
  // rejection reasons.
  fn extract_params(&mut self, member: Option<(ModuleId, ExprId)>, callable: Type,
      args: &Arguments<Typed<Value>>, viable: &mut Vec<Viable>, errors: &mut CallError) {
    match callable.kind() {
      TypeKind::Fn(f) => {
        if let Some(reason) = match_arguments_to_parameters(&f.params, args) {
          errors.reject(callable, reason);
        } else {
          viable.push(Viable {
            member, callable,
            params: f.params.clone(),
            rets: f.rets.to_vec(),
            generic_struct: false,
          });
        }
      }
      TypeKind::Jump(j) => {
        if let Some(reason) = match_arguments_to_parameters(&j.params, args) {
          errors.reject(callable, reason);
        } else {
          viable.push(Viable {
            member, callable,
            params: j.params.clone(),
            rets: vec![],
            generic_struct: false,
          });
        }
      }
      TypeKind::OverloadSet(members) => {
        for &m in &**members { self.extract_params(member, m, args, viable, errors) }
      }
      TypeKind::GenericFn(g) | TypeKind::GenericStruct(g) => {
        let strukt = matches!(callable.kind(), TypeKind::GenericStruct(_));
        if g.module != self.module {
          errors.reject(callable, DiagKind::EvaluationFailure(
            "cannot instantiate a generic from another module at this call site".into()));
          return
        }
        let (params_ast, _) = self.ast.paramd(g.decl).expect("generic without parameters");
        let ast_params = params_ast.clone();
        if let Some(reason) = match_arguments_to_parameters(&ast_params, args) {
          errors.reject(callable, reason);
          return
        }
        match self.instantiate(g.decl, args) {
          Ok(inst) => {
            if strukt {
              viable.push(Viable {
                member, callable,
                params: inst.params,
                rets: vec![ty::type_ty()],
                generic_struct: true,
              });
            } else {
              let Some(f) = inst.concrete.as_fn() else {
                errors.reject(callable, DiagKind::NonCallableInOverloadSet);
                return
              };
              viable.push(Viable {
                member, callable,
                params: f.params.clone(),
                rets: f.rets.to_vec(),
                generic_struct: false,
              });
            }
          }
          Err(reason) => errors.reject(callable, reason),
        }
      }
      _ => errors.reject(callable, DiagKind::UncallableExpression(callable)),
    }
  }

  /// Resolve a call whose callee is a single callable type that did not come
  /// from declarations (builtins, lambda expressions).
  pub fn resolve_direct(&mut self, callee: ExprId, callable: Type,
      args: &Arguments<Typed<Value>>) -> Result<QualType, CallError> {
    self.resolve_candidates(callee, vec![(None, callable)], args)
  }

  /// Resolve a call of the candidates in `os` with the given arguments.
  /// On success, stores the viable overload set under `callee` in the
  /// current context and returns the call's qualified type.
  pub fn resolve_overloads(&mut self, callee: ExprId, os: &OverloadSet,
      args: &Arguments<Typed<Value>>) -> Result<QualType, CallError> {
    let mut candidates = vec![];
    let mut missing = vec![];
    for &(m, expr) in os.members() {
      match self.candidate_qt(m, expr) {
        Some(qt) if qt.ok() => candidates.push((Some((m, expr)), qt.ty)),
        _ => missing.push(expr),
      }
    }
    if !missing.is_empty() {
      let mut errors = CallError::default();
      for _ in missing { errors.reject(ty::error_ty(), DiagKind::NonCallableInOverloadSet) }
      if candidates.is_empty() { return Err(errors) }
    }
    self.resolve_candidates(callee, candidates, args)
  }

  fn resolve_candidates(&mut self, callee: ExprId,
      candidates: Vec<(Option<(ModuleId, ExprId)>, Type)>,
      args: &Arguments<Typed<Value>>) -> Result<QualType, CallError> {
    let mut errors = CallError::default();

    let mut viable = vec![];
    for (member, callable) in candidates {
      self.extract_params(member, callable, args, &mut viable, &mut errors);
    }

    // The constness of the call is the AND of argument constness, except
    // that generic struct instantiation always yields a constant.
    let mut quals = Quals::CONST;
    for a in args.iter() {
      if a.val.is_empty() { quals = Quals::empty() }
    }

    let mut surviving = OverloadSet::new();
    let mut result = None;
    'candidates: for v in &viable {
      for (i, arg) in args.pos.iter().enumerate() {
        if !ty::can_cast_implicitly(arg.ty, v.params[i].value) {
          errors.reject(v.callable, DiagKind::TypeMismatch {
            param: i.to_string(), arg_ty: arg.ty,
          });
          continue 'candidates
        }
      }
      for i in args.pos.len()..v.params.len() {
        let param = &v.params[i];
        let Some(arg) = args.named(param.name) else { continue };
        if !ty::can_cast_implicitly(arg.ty, param.value) {
          errors.reject(v.callable, DiagKind::TypeMismatch {
            param: param.name.as_str().to_owned(), arg_ty: arg.ty,
          });
          continue 'candidates
        }
      }
      if let Some((m, expr)) = v.member { surviving.insert(m, expr) }
      if !v.generic_struct { quals.remove(Quals::CONST) }
      let ret = match &*v.rets {
        [] => ty::tup(vec![]),
        [t] => *t,
        ts => ty::tup(ts.to_vec()),
      };
      // Surviving candidates across expansions combine via meet.
      result = Some(match result {
        None => ret,
        Some(prev) => match ty::meet(prev, ret) {
          Some(t) => t,
          None => {
            errors.reject(v.callable, DiagKind::TypeMismatch {
              param: "return".to_owned(), arg_ty: ret,
            });
            continue 'candidates
          }
        },
      });
      break
    }

    match result {
      Some(t) => {
        self.tree.set_viable_overloads(self.ctx, callee, surviving);
        Ok(QualType::new(t, quals))
      }
      None => {
        // Record the empty viable set so the lowerer can observe failure.
        self.tree.set_viable_overloads(self.ctx, callee, surviving);
        Err(errors)
      }
    }
  }

  /// Report every accumulated rejection reason of a failed resolution.
  pub fn report_call_error(&mut self, e: ExprId, err: CallError) {
    for (_, reason) in err.reasons {
      self.report(e, reason);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ParamFlags;
  use crate::intern;

  fn args(pos: Vec<Type>, named: Vec<(&str, Type)>) -> Arguments<Typed<Value>> {
    Arguments {
      pos: pos.into_iter().map(|t| Typed::new(Value::Empty, t)).collect(),
      named: named.into_iter().map(|(n, t)| (intern(n), Typed::new(Value::Empty, t))).collect(),
    }
  }

  fn params(ps: Vec<(&str, Type, ParamFlags)>) -> Params<Type> {
    ps.into_iter().map(|(n, t, f)| crate::types::Param {
      name: intern(n), value: t, flags: f,
    }).collect()
  }

  #[test]
  fn matching_rejects_extra_positional() {
    let ps = params(vec![("a", ty::i64_ty(), ParamFlags::empty())]);
    let reason = match_arguments_to_parameters(&ps, &args(vec![ty::i64_ty(); 2], vec![]));
    assert!(matches!(reason, Some(DiagKind::TooManyArguments { provided: 2, max: 1 })));
  }

  #[test]
  fn matching_requires_nondefaultable() {
    let ps = params(vec![
      ("a", ty::i64_ty(), ParamFlags::empty()),
      ("b", ty::bool_ty(), ParamFlags::HAS_DEFAULT),
    ]);
    let reason = match_arguments_to_parameters(&ps, &args(vec![], vec![]));
    assert!(matches!(reason, Some(DiagKind::MissingNonDefaultableArguments(ns)) if ns.len() == 1));
    assert!(match_arguments_to_parameters(&ps, &args(vec![ty::i64_ty()], vec![])).is_none());
  }

  #[test]
  fn matching_rejects_bad_names() {
    let ps = params(vec![("a", ty::i64_ty(), ParamFlags::empty())]);
    let reason = match_arguments_to_parameters(&ps, &args(vec![ty::i64_ty()], vec![("b", ty::bool_ty())]));
    assert!(matches!(reason, Some(DiagKind::NoParameterNamed(_))));
    let reason = match_arguments_to_parameters(&ps, &args(vec![ty::i64_ty()], vec![("a", ty::i64_ty())]));
    assert!(matches!(reason, Some(DiagKind::PositionalArgumentNamed(_))));
  }
}
