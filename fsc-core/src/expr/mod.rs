//! Control-expression language
//!
//! - `ast` - grammar-independent syntax tree and grammar front-ends
//! - `ops` - operators, `hold` and `max` primitives
//! - `node` - executable tree, values and evaluation context
//! - `build` - compiles a syntax tree into an executable tree

mod ast;
mod build;
mod node;
mod ops;

pub use ast::{AstNode, ExprGrammar, JsonGrammar};
pub use build::{build_eval_tree, build_eval_tree_with, build_from_ast, ExpressionInfo, ExtVar};
pub use node::{ApplyOp, EvalContext, EvalTree, ExprNode, Scope, Slot, Value};
pub use ops::{is_truthy, max_of, Hold, InfixOp};
