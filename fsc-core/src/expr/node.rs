//! Executable expression tree.
//!
//! [`ExprNode`] is the immutable shape of a compiled expression. State
//! carried between cycles (hold memories, controller internals) lives in a
//! slot table owned by the [`EvalTree`], addressed by index from the
//! stateful nodes. Evaluating the same tree with the same slots is
//! therefore the only way state advances.

use std::collections::HashMap;
use std::fmt;

use crate::constants::expr::DT_KEY;
use crate::engine::Controller;

use super::ops::{self, Hold, InfixOp};

/// Result of evaluating a node: a scalar or a flat list of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Option<f64>),
    List(Vec<Option<f64>>),
}

impl Value {
    /// Scalar view; a list in scalar position reads as absent.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => *v,
            Value::List(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        ops::is_truthy(self.as_scalar())
    }

    /// Members of the value when used as a list; scalars become a singleton.
    pub fn into_items(self) -> Vec<Option<f64>> {
        match self {
            Value::Scalar(v) => vec![v],
            Value::List(items) => items,
        }
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        Value::Scalar(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(Some(value))
    }
}

fn fmt_scalar(f: &mut fmt::Formatter<'_>, value: Option<f64>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{}", v),
        None => write!(f, "None"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => fmt_scalar(f, *v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_scalar(f, *item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Variable bindings for one evaluation, including `dt`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    vars: HashMap<String, Option<f64>>,
}

impl EvalContext {
    pub fn new(dt: f64) -> Self {
        let mut ctx = Self::default();
        ctx.set(DT_KEY, Some(dt));
        ctx
    }

    pub fn set(&mut self, name: impl Into<String>, value: Option<f64>) {
        self.vars.insert(name.into(), value);
    }

    /// Value of `name`; unknown names read as absent.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.vars.get(name).copied().flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn dt(&self) -> Option<f64> {
        self.get(DT_KEY)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Lexical scope chain used while evaluating `Bind` nodes.
///
/// Inner bindings shadow outer ones and vanish when their node returns;
/// the caller's [`EvalContext`] is never modified.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Root(&'a EvalContext),
    Bound {
        name: &'a str,
        value: &'a Value,
        parent: &'a Scope<'a>,
    },
}

impl<'a> Scope<'a> {
    pub fn lookup(&self, name: &str) -> Value {
        let mut scope = self;
        loop {
            match scope {
                Scope::Root(ctx) => return Value::Scalar(ctx.get(name)),
                Scope::Bound {
                    name: bound,
                    value,
                    parent,
                } => {
                    if *bound == name {
                        return (*value).clone();
                    }
                    scope = parent;
                }
            }
        }
    }

    pub fn dt(&self) -> Option<f64> {
        self.lookup(DT_KEY).as_scalar()
    }
}

/// Unary operation performed by an `Apply` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOp {
    Hold { slot: usize },
    Max,
    Profile { slot: usize },
}

/// Per-tree mutable state referenced by stateful nodes.
#[derive(Debug)]
pub enum Slot {
    Hold(Hold),
    Profile(Box<dyn Controller>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Infix {
        op: InfixOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Apply {
        name: String,
        op: ApplyOp,
        inner: Box<ExprNode>,
    },
    Ident {
        name: String,
    },
    Bind {
        name: String,
        bound: Box<ExprNode>,
        inner: Box<ExprNode>,
    },
    List {
        items: Vec<ExprNode>,
    },
    Const {
        value: f64,
    },
}

impl ExprNode {
    /// Evaluate against `ctx`, advancing any state held in `slots`.
    pub fn eval(&self, ctx: &EvalContext, slots: &mut [Slot]) -> Value {
        self.eval_in(&Scope::Root(ctx), slots)
    }

    /// Evaluate and also render a trace showing every intermediate value.
    pub fn dbgeval(&self, ctx: &EvalContext, slots: &mut [Slot]) -> (Value, String) {
        self.dbgeval_in(&Scope::Root(ctx), slots)
    }

    fn eval_in(&self, scope: &Scope<'_>, slots: &mut [Slot]) -> Value {
        match self {
            ExprNode::Infix { op, lhs, rhs } => {
                let l = lhs.eval_in(scope, slots).as_scalar();
                let r = rhs.eval_in(scope, slots).as_scalar();
                Value::Scalar(op.apply(l, r))
            }
            ExprNode::Apply { op, inner, .. } => {
                let input = inner.eval_in(scope, slots);
                apply(*op, input, scope, slots)
            }
            ExprNode::Ident { name } => scope.lookup(name),
            ExprNode::Bind { name, bound, inner } => {
                let value = bound.eval_in(scope, slots);
                let child = Scope::Bound {
                    name,
                    value: &value,
                    parent: scope,
                };
                inner.eval_in(&child, slots)
            }
            ExprNode::List { items } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.extend(item.eval_in(scope, slots).into_items());
                }
                Value::List(out)
            }
            ExprNode::Const { value } => Value::Scalar(Some(*value)),
        }
    }

    fn dbgeval_in(&self, scope: &Scope<'_>, slots: &mut [Slot]) -> (Value, String) {
        match self {
            ExprNode::Infix { op, lhs, rhs } => {
                let (l, ltrace) = lhs.dbgeval_in(scope, slots);
                let (r, rtrace) = rhs.dbgeval_in(scope, slots);
                let out = Value::Scalar(op.apply(l.as_scalar(), r.as_scalar()));
                let trace = format!("({} {} {})={}", ltrace, op.symbol(), rtrace, out);
                (out, trace)
            }
            ExprNode::Apply { name, op, inner } => {
                let (input, itrace) = inner.dbgeval_in(scope, slots);
                let out = apply(*op, input, scope, slots);
                let trace = format!("{}({})={}", name, itrace, out);
                (out, trace)
            }
            ExprNode::Ident { name } => {
                let out = scope.lookup(name);
                let trace = format!("{}={}", name, out);
                (out, trace)
            }
            ExprNode::Bind { name, bound, inner } => {
                let (value, btrace) = bound.dbgeval_in(scope, slots);
                let child = Scope::Bound {
                    name,
                    value: &value,
                    parent: scope,
                };
                let (out, itrace) = inner.dbgeval_in(&child, slots);
                let trace = format!("let {} = {} in {}", name, btrace, itrace);
                (out, trace)
            }
            ExprNode::List { items } => {
                let mut out = Vec::with_capacity(items.len());
                let mut traces = Vec::with_capacity(items.len());
                for item in items {
                    let (v, t) = item.dbgeval_in(scope, slots);
                    out.extend(v.into_items());
                    traces.push(t);
                }
                (Value::List(out), format!("[{}]", traces.join(", ")))
            }
            ExprNode::Const { value } => (Value::Scalar(Some(*value)), value.to_string()),
        }
    }
}

fn apply(op: ApplyOp, input: Value, scope: &Scope<'_>, slots: &mut [Slot]) -> Value {
    match op {
        ApplyOp::Max => Value::Scalar(ops::max_of(&input.into_items())),
        ApplyOp::Hold { slot } => match slots.get_mut(slot) {
            Some(Slot::Hold(hold)) => Value::Scalar(hold.apply(input.as_scalar())),
            _ => Value::Scalar(None),
        },
        ApplyOp::Profile { slot } => {
            let Some(x) = input.as_scalar() else {
                return Value::Scalar(None);
            };
            match slots.get_mut(slot) {
                Some(Slot::Profile(controller)) => {
                    Value::Scalar(controller.run(x, scope.dt().unwrap_or(0.0)))
                }
                _ => Value::Scalar(None),
            }
        }
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Infix { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            ExprNode::Apply { name, inner, .. } => write!(f, "{}({})", name, inner),
            ExprNode::Ident { name } => write!(f, "{}", name),
            ExprNode::Bind { name, bound, inner } => {
                write!(f, "let {} = {} in {}", name, bound, inner)
            }
            ExprNode::List { items } => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            ExprNode::Const { value } => write!(f, "{}", value),
        }
    }
}

/// A compiled expression together with the state its nodes carry.
#[derive(Debug)]
pub struct EvalTree {
    root: ExprNode,
    slots: Vec<Slot>,
}

impl EvalTree {
    pub fn new(root: ExprNode, slots: Vec<Slot>) -> Self {
        Self { root, slots }
    }

    pub fn eval(&mut self, ctx: &EvalContext) -> Value {
        self.root.eval(ctx, &mut self.slots)
    }

    pub fn dbgeval(&mut self, ctx: &EvalContext) -> (Value, String) {
        self.root.dbgeval(ctx, &mut self.slots)
    }

    pub fn root(&self) -> &ExprNode {
        &self.root
    }

    /// True when evaluation carries state between cycles.
    pub fn is_stateful(&self) -> bool {
        !self.slots.is_empty()
    }
}

impl fmt::Display for EvalTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}
