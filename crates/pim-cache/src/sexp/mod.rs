//! Query expression engine.
//!
//! Queries are written in a small Lisp-like language: parenthesized prefix
//! applications over string, integer and boolean literals, e.g.
//!
//! ```text
//! (and (has-start?) (not (has-alarms?)))
//! (occur-in-time-range? (make-time "20170209T000000Z")
//!                       (make-time "20170210T000000Z"))
//! (contains? "summary" "standup")
//! ```
//!
//! [`QueryParser`] turns query text into an [`Expr`] AST; [`Evaluator`]
//! walks the AST against one decoded component plus a
//! [`RecurrenceService`](pim_data_rs::RecurrenceService), producing a typed
//! [`Value`]. [`dominant_occur_range`] is the static analysis the cache
//! uses to answer time-bounded queries from its interval index instead of
//! a full scan.
//!
//! Malformed text is a [`ParseError`]; a well-formed expression applying
//! an unknown function, or a builtin with the wrong argument count or
//! types, fails evaluation with an [`EvalError`]. Neither is a panic.

mod ast;
mod error;
mod eval;
mod lexer;
mod parser;
mod range;

pub use ast::Expr;
pub use error::{EvalError, EvalResult, ParseError, ParseResult};
pub use eval::{Evaluator, Value};
pub use parser::QueryParser;
pub use range::dominant_occur_range;
