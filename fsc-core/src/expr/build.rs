//! Compiles a syntax tree into an executable [`EvalTree`].

use std::collections::BTreeSet;

use fsc_error::{FscError, Result};

use crate::constants::expr::{BUILTIN_HOLD, BUILTIN_MAX, DT_KEY};
use crate::engine::Profiles;

use super::ast::{AstNode, ExprGrammar, JsonGrammar};
use super::node::{ApplyOp, EvalTree, ExprNode, Slot};
use super::ops::{Hold, InfixOp};

/// Names an expression needs from the outside world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionInfo {
    /// Free identifiers, `fru:sensor` or `fru:sensor:number`
    pub ext_vars: BTreeSet<String>,
    /// Profiles applied anywhere in the tree
    pub profiles: BTreeSet<String>,
}

/// Parts of a `fru:sensor[:number]` variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtVar<'a> {
    pub fru: &'a str,
    pub sensor: &'a str,
    pub number: Option<&'a str>,
}

impl<'a> ExtVar<'a> {
    pub fn parse(name: &'a str) -> Option<Self> {
        let mut parts = name.splitn(3, ':');
        let fru = parts.next().filter(|s| !s.is_empty())?;
        let sensor = parts.next().filter(|s| !s.is_empty())?;
        let number = parts.next().filter(|s| !s.is_empty());
        Some(Self {
            fru,
            sensor,
            number,
        })
    }
}

impl ExpressionInfo {
    /// FRUs referenced by well-formed external variables
    pub fn frus(&self) -> BTreeSet<&str> {
        self.ext_vars
            .iter()
            .filter_map(|v| ExtVar::parse(v))
            .map(|v| v.fru)
            .collect()
    }

    /// Sensor names this expression needs from `fru`
    pub fn sensors_for_fru(&self, fru: &str) -> Vec<String> {
        self.ext_vars
            .iter()
            .filter_map(|v| ExtVar::parse(v))
            .filter(|v| v.fru == fru)
            .map(|v| v.sensor.to_string())
            .collect()
    }

    /// Explicit sensor numbers this expression addresses on `fru`
    pub fn numbers_for_fru(&self, fru: &str) -> Vec<String> {
        self.ext_vars
            .iter()
            .filter_map(|v| ExtVar::parse(v))
            .filter(|v| v.fru == fru)
            .filter_map(|v| v.number.map(str::to_string))
            .collect()
    }
}

/// Parse `source` with the JSON grammar and compile it.
pub fn build_eval_tree(source: &str, profiles: &Profiles) -> Result<(EvalTree, ExpressionInfo)> {
    build_eval_tree_with(&JsonGrammar, source, profiles)
}

/// Parse `source` with `grammar` and compile it.
pub fn build_eval_tree_with<G: ExprGrammar + ?Sized>(
    grammar: &G,
    source: &str,
    profiles: &Profiles,
) -> Result<(EvalTree, ExpressionInfo)> {
    let ast = grammar.parse(source)?;
    build_from_ast(&ast, profiles)
}

/// Compile an already-parsed tree.
///
/// Apply names resolve against the builtins (`hold`, `max`) first, then
/// against `profiles`. Each stateful node gets its own slot.
pub fn build_from_ast(ast: &AstNode, profiles: &Profiles) -> Result<(EvalTree, ExpressionInfo)> {
    let mut builder = Builder {
        profiles,
        slots: Vec::new(),
        info: ExpressionInfo::default(),
        bound: Vec::new(),
    };
    let root = builder.build(ast)?;
    Ok((EvalTree::new(root, builder.slots), builder.info))
}

struct Builder<'p> {
    profiles: &'p Profiles,
    slots: Vec<Slot>,
    info: ExpressionInfo,
    /// Names bound by enclosing `Bind` nodes, innermost last
    bound: Vec<String>,
}

impl Builder<'_> {
    fn build(&mut self, ast: &AstNode) -> Result<ExprNode> {
        match ast {
            AstNode::Infix { op, left, right } => {
                let op = InfixOp::from_symbol(op).ok_or_else(|| {
                    FscError::invalid_expression(format!("unknown infix operator '{}'", op))
                })?;
                Ok(ExprNode::Infix {
                    op,
                    lhs: Box::new(self.build(left)?),
                    rhs: Box::new(self.build(right)?),
                })
            }
            AstNode::Apply { name, inner } => {
                let op = self.resolve_apply(name)?;
                Ok(ExprNode::Apply {
                    name: name.clone(),
                    op,
                    inner: Box::new(self.build(inner)?),
                })
            }
            AstNode::Ident { name } => {
                if name != DT_KEY && !self.bound.iter().any(|b| b == name) {
                    self.info.ext_vars.insert(name.clone());
                }
                Ok(ExprNode::Ident { name: name.clone() })
            }
            AstNode::Bind { name, bound, inner } => {
                // The bound expression is evaluated in the enclosing scope
                let bound = self.build(bound)?;
                self.bound.push(name.clone());
                let inner = self.build(inner);
                self.bound.pop();
                Ok(ExprNode::Bind {
                    name: name.clone(),
                    bound: Box::new(bound),
                    inner: Box::new(inner?),
                })
            }
            AstNode::List { content } => Ok(ExprNode::List {
                items: content
                    .iter()
                    .map(|item| self.build(item))
                    .collect::<Result<_>>()?,
            }),
            AstNode::Const { value } => Ok(ExprNode::Const { value: *value }),
        }
    }

    fn resolve_apply(&mut self, name: &str) -> Result<ApplyOp> {
        match name {
            BUILTIN_HOLD => {
                self.slots.push(Slot::Hold(Hold::new()));
                Ok(ApplyOp::Hold {
                    slot: self.slots.len() - 1,
                })
            }
            BUILTIN_MAX => Ok(ApplyOp::Max),
            _ => {
                let controller = self.profiles.create(name).ok_or_else(|| {
                    FscError::invalid_expression(format!(
                        "'{}' is neither a builtin nor a known profile",
                        name
                    ))
                })?;
                self.slots.push(Slot::Profile(controller));
                self.info.profiles.insert(name.to_string());
                Ok(ApplyOp::Profile {
                    slot: self.slots.len() - 1,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LinearSpec, ProfileSpec};
    use crate::expr::{EvalContext, Value};

    fn profiles() -> Profiles {
        let mut profiles = Profiles::new();
        profiles.insert_spec(
            "linear_inlet",
            &ProfileSpec::Linear(LinearSpec {
                data: vec![(20.0, 28.0), (30.0, 40.0)],
                positive_hysteresis: 0.0,
                negative_hysteresis: 0.0,
            }),
        );
        profiles
    }

    #[test]
    fn test_sum_with_absent_operand() {
        let ast = AstNode::infix("+", AstNode::ident("a"), AstNode::ident("b"));
        let (mut tree, info) = build_from_ast(&ast, &Profiles::new()).unwrap();
        assert_eq!(info.ext_vars.len(), 2);

        let mut ctx = EvalContext::new(1.0);
        ctx.set("a", None);
        ctx.set("b", Some(4.0));
        assert_eq!(tree.eval(&ctx), Value::Scalar(Some(4.0)));
    }

    #[test]
    fn test_bind_does_not_leak() {
        let ast = AstNode::bind(
            "x",
            AstNode::constant(10.0),
            AstNode::infix("*", AstNode::ident("x"), AstNode::constant(2.0)),
        );
        let (mut tree, info) = build_from_ast(&ast, &Profiles::new()).unwrap();
        assert!(info.ext_vars.is_empty());

        let ctx = EvalContext::new(1.0);
        assert_eq!(tree.eval(&ctx), Value::Scalar(Some(20.0)));
        assert!(!ctx.contains("x"));
    }

    #[test]
    fn test_name_free_in_bound_expression_stays_external() {
        let ast = AstNode::bind(
            "mb:t",
            AstNode::ident("mb:t"),
            AstNode::ident("mb:t"),
        );
        let (_, info) = build_from_ast(&ast, &Profiles::new()).unwrap();
        assert!(info.ext_vars.contains("mb:t"));
    }

    #[test]
    fn test_unknown_infix_operator() {
        let ast = AstNode::infix("%", AstNode::constant(1.0), AstNode::constant(2.0));
        let err = build_from_ast(&ast, &Profiles::new()).unwrap_err();
        assert!(matches!(err, FscError::InvalidExpression(_)));
    }

    #[test]
    fn test_unknown_apply_name() {
        let ast = AstNode::apply("linear_missing", AstNode::ident("mb:t"));
        let err = build_from_ast(&ast, &profiles()).unwrap_err();
        assert!(err.to_string().contains("linear_missing"));
    }

    #[test]
    fn test_profiles_and_dt_tracking() {
        let ast = AstNode::apply(
            "max",
            AstNode::list(vec![
                AstNode::apply("linear_inlet", AstNode::ident("mb:inlet")),
                AstNode::ident("dt"),
            ]),
        );
        let (mut tree, info) = build_from_ast(&ast, &profiles()).unwrap();
        assert_eq!(info.profiles.iter().collect::<Vec<_>>(), vec!["linear_inlet"]);
        assert_eq!(info.ext_vars.iter().collect::<Vec<_>>(), vec!["mb:inlet"]);

        let mut ctx = EvalContext::new(1.0);
        ctx.set("mb:inlet", Some(33.0));
        assert_eq!(tree.eval(&ctx), Value::Scalar(Some(40.0)));
    }

    #[test]
    fn test_build_from_json_source() {
        let src = r#"{"type": "apply", "name": "hold",
            "inner": {"type": "ident", "name": "mb:inlet_temp"}}"#;
        let (mut tree, info) = build_eval_tree(src, &Profiles::new()).unwrap();
        assert!(tree.is_stateful());
        assert_eq!(info.frus().into_iter().collect::<Vec<_>>(), vec!["mb"]);

        let mut ctx = EvalContext::new(1.0);
        ctx.set("mb:inlet_temp", Some(25.0));
        tree.eval(&ctx);
        assert_eq!(tree.eval(&EvalContext::new(1.0)), Value::Scalar(Some(25.0)));
    }

    #[test]
    fn test_ext_var_parts() {
        let info = ExpressionInfo {
            ext_vars: ["mb:soc_temp", "nic:temp:0x10", "bogus"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            profiles: BTreeSet::new(),
        };
        assert_eq!(info.sensors_for_fru("nic"), vec!["temp"]);
        assert_eq!(info.numbers_for_fru("nic"), vec!["0x10"]);
        assert!(info.numbers_for_fru("mb").is_empty());
        assert_eq!(ExtVar::parse("bogus"), None);
    }
}
