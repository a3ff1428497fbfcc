//! Generic syntax tree produced by a grammar front-end.
//!
//! The evaluator never sees source text. Any grammar that can produce an
//! [`AstNode`] tree plugs in through [`ExprGrammar`]; [`JsonGrammar`] is the
//! built-in front-end that reads the tree directly from its JSON form:
//!
//! ```json
//! {"type": "apply", "name": "max", "inner": {"type": "list", "content": [
//!     {"type": "apply", "name": "linear_inlet", "inner": {"type": "ident", "name": "mb:inlet_temp"}},
//!     {"type": "const", "value": 30}
//! ]}}
//! ```

use fsc_error::{FscError, Result};
use serde::{Deserialize, Serialize};

/// One node of the parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AstNode {
    /// Binary arithmetic; `op` is one of `+ - * /`
    Infix {
        op: String,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
    /// Named unary application: a builtin or a profile
    Apply { name: String, inner: Box<AstNode> },
    Ident { name: String },
    /// Evaluate `bound`, expose it as `name` while evaluating `inner`
    Bind {
        name: String,
        bound: Box<AstNode>,
        inner: Box<AstNode>,
    },
    List { content: Vec<AstNode> },
    Const { value: f64 },
}

impl AstNode {
    pub fn infix(op: &str, left: AstNode, right: AstNode) -> Self {
        AstNode::Infix {
            op: op.to_string(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn apply(name: &str, inner: AstNode) -> Self {
        AstNode::Apply {
            name: name.to_string(),
            inner: Box::new(inner),
        }
    }

    pub fn ident(name: &str) -> Self {
        AstNode::Ident {
            name: name.to_string(),
        }
    }

    pub fn bind(name: &str, bound: AstNode, inner: AstNode) -> Self {
        AstNode::Bind {
            name: name.to_string(),
            bound: Box::new(bound),
            inner: Box::new(inner),
        }
    }

    pub fn list(content: Vec<AstNode>) -> Self {
        AstNode::List { content }
    }

    pub fn constant(value: f64) -> Self {
        AstNode::Const { value }
    }
}

/// Front-end turning expression source text into an [`AstNode`].
pub trait ExprGrammar {
    fn parse(&self, source: &str) -> Result<AstNode>;
}

/// Reads the syntax tree from its JSON serialization.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonGrammar;

impl ExprGrammar for JsonGrammar {
    fn parse(&self, source: &str) -> Result<AstNode> {
        serde_json::from_str(source).map_err(|e| FscError::ExpressionSyntax(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_grammar_parses_nested_tree() {
        let src = r#"{"type": "infix", "op": "+",
            "left": {"type": "ident", "name": "mb:inlet"},
            "right": {"type": "const", "value": 2}}"#;
        let ast = JsonGrammar.parse(src).unwrap();
        assert_eq!(
            ast,
            AstNode::infix("+", AstNode::ident("mb:inlet"), AstNode::constant(2.0))
        );
    }

    #[test]
    fn test_json_grammar_rejects_garbage() {
        let err = JsonGrammar.parse("max(a, b)").unwrap_err();
        assert!(matches!(err, FscError::ExpressionSyntax(_)));
    }

    #[test]
    fn test_unknown_node_type_is_syntax_error() {
        let err = JsonGrammar.parse(r#"{"type": "lambda", "body": 1}"#).unwrap_err();
        assert!(matches!(err, FscError::ExpressionSyntax(_)));
    }
}
