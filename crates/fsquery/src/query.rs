//! Attribute queries.
//!
//! This module provides the query engine proper:
//! - Query text parsing into an expression tree (negation folded in)
//! - Equations: attribute resolution, typed comparison, wildcard patterns
//! - Scan planning by index score
//! - Index-driven query sessions with rewind
//! - Live query evaluation of single attribute changes

mod equation;
mod executor;
mod expression;
mod live;
mod parser;
mod pattern;
mod planner;
mod value;


pub use equation::{CompareOp, Equation, LiveAttribute};
pub use executor::Query;
pub use expression::{Expression, LogicalOp, Operator, Term, TermId};
pub use live::{classify_transition, LiveQuery, Transition};
pub use pattern::{fixed_prefix_len, is_pattern, is_valid_pattern, matches as pattern_matches};
pub use planner::{unroll, Scores};
pub use value::TypedValue;
