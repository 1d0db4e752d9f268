//! Monomorphisation of parameterised functions, jumps and structs.
//!
//! Instantiation walks the expression's ordered dependency graph over its
//! parameters, computing argument types and values, parameter types and
//! values, in the order the front-end supplied. The computed binding keys a
//! memoised subcontext: repeated instantiation with an equal binding returns
//! the existing context and concrete type.

use smallvec::SmallVec;
use crate::context::{BindingKey, CtxId};
use crate::diag::DiagKind;
use crate::ir::Value;
use crate::queue::{WorkItem, WorkKind};
use crate::types::ast::{DeclFlags, DepKind, ExprId, ExprKind};
use crate::types::ty::{self, QualType, Type};
use crate::types::{Arguments, Params, Typed};
use crate::verify::Compiler;

/// The outcome of instantiating a parameterised expression.
#[derive(Debug)]
pub struct Instantiation {
  /// The per-instantiation context.
  pub ctx: CtxId,
  /// The concretised parameter types, for conversion checking.
  pub params: Params<Type>,
  /// The concrete function, jump, or struct type.
  pub concrete: Type,
  /// Whether this binding was seen for the first time.
  pub inserted: bool,
}

// The facts computed during a dependency walk, replayed into the memoised
// subcontext if the binding turns out to be new.
#[derive(Debug, Default)]
struct WalkRecord {
  arg_types: Vec<(crate::Symbol, Type)>,
  arg_vals: Vec<(crate::Symbol, Value)>,
  param_qts: Vec<(ExprId, QualType)>,
  param_vals: Vec<(ExprId, Value)>,
}

impl Compiler<'_> {
  // The context in which the parameterised expression itself was verified;
  // its instantiations hang off that context, not the call site's.
  fn defining_ctx(&self, node: ExprId) -> CtxId {
    let mut ctx = self.ctx;
    loop {
      if self.tree.qual_type(ctx, node).is_some() { return ctx }
      match self.tree.parent(ctx) {
        Some(p) => ctx = p,
        None => return CtxId::ROOT,
      }
    }
  }

  /// Instantiate `node` with the given arguments, memoised on the computed
  /// binding.
  pub fn instantiate(&mut self, node: ExprId, args: &Arguments<Typed<Value>>)
      -> Result<Instantiation, DiagKind> {
    let (params_ast, deps) = self.ast.paramd(node).expect("not a parameterised expression");
    let params_ast = params_ast.clone();
    let deps = deps.to_vec();
    let owner = self.defining_ctx(node);

    // All parameter and argument computation happens on a scratchpad that
    // is thrown away if an equivalent instantiation already exists.
    let scratch = self.tree.scratchpad_subcontext(owner);
    let mut record = WalkRecord::default();
    let mut binding: SmallVec<[(Value, QualType); 4]> =
      SmallVec::from_elem((Value::Empty, QualType::error()), params_ast.len());

    let result = self.in_ctx(scratch, |c| {
      for dep in &deps {
        let i = dep.param as usize;
        let decl_id = params_ast[i].value;
        let decl = c.ast.decl(decl_id).clone();
        let name = decl.name;
        match dep.kind {
          DepKind::ArgType => {
            let t = if let Some(arg) = positional_or_named(args, i, name) {
              arg.ty
            } else {
              let init = decl.init.ok_or(DiagKind::UninferrableType)?;
              let qt = c.verify_type(init);
              if !qt.ok() { return Err(DiagKind::UninferrableType) }
              qt.ty
            };
            c.tree.set_arg_type(c.ctx, name, t);
            record.arg_types.push((name, t));
          }
          DepKind::ArgValue => {
            let mut val = if let Some(arg) = positional_or_named(args, i, name) {
              arg.val.clone()
            } else {
              let init = decl.init.ok_or(DiagKind::UninferrableType)?;
              let t = c.tree.arg_type(c.ctx, name).unwrap_or_else(ty::error_ty);
              c.evaluate(init, t, false)
                .map_err(|f| DiagKind::EvaluationFailure(f.to_string()))?
            };
            // A runtime register preserves its type but erases its value.
            if matches!(val, Value::Reg(_)) { val = Value::Empty }
            c.tree.set_arg_value(c.ctx, name, val.clone());
            record.arg_vals.push((name, val));
          }
          DepKind::ParamType => {
            let t = if let Some(type_expr) = decl.ty {
              c.expect_type_expr(type_expr).ok_or(DiagKind::NonConstantTypeInDeclaration)?
            } else {
              let init = decl.init.ok_or(DiagKind::UninferrableType)?;
              let qt = c.verify_type(init);
              if !qt.ok() { return Err(DiagKind::UninferrableType) }
              qt.ty
            };
            let qt = if decl.flags.contains(DeclFlags::CONST) {
              QualType::constant(t)
            } else {
              QualType::non_constant(t)
            };
            c.tree.set_qual_type(c.ctx, decl_id.0, qt);
            record.param_qts.push((decl_id.0, qt));
            binding[i].1 = qt;
          }
          DepKind::ParamValue => {
            let t = c.tree.qual_type(c.ctx, decl_id.0)
              .map_or_else(ty::error_ty, |qt| qt.ty);
            let val = if let Some(arg) = positional_or_named(args, i, name) {
              arg.val.clone()
            } else {
              let init = decl.init.ok_or(DiagKind::UninferrableType)?;
              c.evaluate(init, t, false)
                .map_err(|f| DiagKind::EvaluationFailure(f.to_string()))?
            };
            c.tree.set_constant(c.ctx, decl_id, val.clone(), false);
            record.param_vals.push((decl_id.0, val.clone()));
            binding[i].0 = val;
          }
        }
      }
      Ok(())
    });
    result?;

    let mut key = BindingKey::new();
    for (i, p) in params_ast.iter().enumerate() {
      key.push(p.name, binding[i].clone(), p.flags);
    }

    let sub = self.tree.insert_subcontext(owner, node, key.clone());
    let child = sub.ctx;
    let params = key.map(|(_, qt)| qt.ty);

    if !sub.inserted {
      let concrete = self.tree.qual_type(child, node)
        .map_or_else(ty::error_ty, |qt| qt.ty);
      return Ok(Instantiation { ctx: child, params, concrete, inserted: false })
    }

    // Replay the walk into the memoised context.
    for (name, t) in record.arg_types { self.tree.set_arg_type(child, name, t) }
    for (name, v) in record.arg_vals { self.tree.set_arg_value(child, name, v) }
    for (e, qt) in record.param_qts { self.tree.set_qual_type(child, e, qt); }
    for (e, v) in record.param_vals {
      self.tree.set_constant(child, crate::types::ast::DeclId(e), v, false);
    }

    let concrete = self.in_ctx(child, |c| c.concrete_type_of(node, &key))?;
    self.tree.set_qual_type(child, node, QualType::constant(concrete));
    self.queue.enqueue(WorkItem { ctx: child, kind: WorkKind::VerifyBody(node) });
    Ok(Instantiation { ctx: child, params, concrete, inserted: true })
  }

  // The concrete type of an instantiation, computed inside its context.
  fn concrete_type_of(&mut self, node: ExprId, key: &BindingKey) -> Result<Type, DiagKind> {
    let param_types: Params<Type> = key.map(|(_, qt)| qt.ty);
    match &self.ast[node].k {
      ExprKind::FnLit(f) => {
        let rets = match &f.rets {
          Some(rets) => {
            let rets = rets.clone();
            let mut out = vec![];
            for &r in &*rets {
              out.push(self.expect_type_expr(r).ok_or(DiagKind::NonConstantTypeInDeclaration)?);
            }
            out
          }
          None => self.infer_fn_rets(node)?,
        };
        Ok(ty::func(param_types, rets))
      }
      ExprKind::JumpLit(j) => {
        let state = match j.state {
          Some(s) => {
            let type_expr = self.ast.decl(s).ty.ok_or(DiagKind::UninferrableType)?;
            Some(self.expect_type_expr(type_expr).ok_or(DiagKind::NonConstantTypeInDeclaration)?)
          }
          None => None,
        };
        Ok(ty::jump(state, param_types))
      }
      ExprKind::ParamStructLit { .. } => {
        // Allocate the instantiation's struct; completion is queued like any
        // other struct literal.
        Ok(self.allocate_struct_for(node))
      }
      _ => Err(DiagKind::UncallableExpression(ty::error_ty())),
    }
  }
}

fn positional_or_named<'x>(args: &'x Arguments<Typed<Value>>, i: usize,
    name: crate::Symbol) -> Option<&'x Typed<Value>> {
  args.pos.get(i).or_else(|| args.named(name))
}
