//! fscd Core Library
//!
//! Expression-driven fan speed control for BMC platforms.
//!
//! # Features
//!
//! - **Control Expressions**: a small language over sensor readings with
//!   absent-value absorption, `hold`, `max` and named control profiles
//! - **Profiles**: threshold tables and PID loops with hysteresis
//! - **Zones**: per-zone duty-cycle decisions with transitional and boost
//!   fail-safes and edge-triggered alarm logging
//! - **Sensor Sources**: sysfs files (late-bound `hwmon*` directories) and
//!   external utility commands
//!
//! # Module Structure
//!
//! - `expr/` - expression syntax tree, evaluator and builder
//! - `engine/` - profiles and the zone controller
//! - `hw/` - sensor sources and fans
//! - `machine` - sensor acquisition and snapshot parsing
//!
//! # Example
//!
//! ```no_run
//! use fsc_core::{build_eval_tree, EvalContext, Profiles};
//!
//! let src = r#"{"type": "apply", "name": "hold",
//!               "inner": {"type": "ident", "name": "mb:inlet_temp"}}"#;
//! let (mut tree, info) = build_eval_tree(src, &Profiles::new()).unwrap();
//! let mut ctx = EvalContext::new(1.0);
//! ctx.set("mb:inlet_temp", Some(27.0));
//! let value = tree.eval(&ctx);
//! ```

pub mod constants;
pub mod engine;
pub mod expr;
pub mod hw;
pub mod machine;

pub use fsc_error::{FscError, Result};

pub use engine::{
    Controller, FailSensorPolicy, FallbackEdge, FanMode, LinearProfile, PidProfile,
    ProfileFactory, ProfileSpec, Profiles, SsdProgressiveAlgorithm, Zone, ZoneOutcome,
    ZoneSettings,
};

pub use expr::{
    build_eval_tree, build_eval_tree_with, build_from_ast, AstNode, EvalContext, EvalTree,
    ExprGrammar, ExprNode, ExpressionInfo, JsonGrammar, Value,
};

pub use hw::{
    CommandRunner, Fan, ReadScope, SensorSource, ShellRunner, SourceKind, SourceSpec,
    SysfsSource, UtilSource,
};

pub use machine::{read_fans, Machine, SensorReading, Snapshot};
