//! Error types for the query expression engine.

use thiserror::Error;

/// A specialized Result type for query parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while turning query text into an AST, and by malformed
/// time literals inside an otherwise well-formed expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The query text is empty.
    #[error("query expression is empty")]
    Empty,

    /// A character that cannot start any token.
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte offset in the input.
        position: usize,
    },

    /// A string literal with no closing quote.
    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString {
        /// Byte offset of the opening quote.
        position: usize,
    },

    /// A token in a position the grammar does not allow.
    #[error("unexpected token: {token}")]
    UnexpectedToken {
        /// Display form of the offending token.
        token: String,
    },

    /// Input ended in the middle of an expression.
    #[error("unexpected end of expression")]
    UnexpectedEof,

    /// Input continued past a complete expression.
    #[error("trailing input after expression")]
    TrailingTokens,

    /// A `make-time` argument that is not an ISO 8601 basic timestamp.
    #[error("invalid time literal: {value}")]
    InvalidTime {
        /// The rejected literal.
        value: String,
    },
}

/// A specialized Result type for query evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised while evaluating a parsed expression against an item.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The expression applies a function this engine does not know.
    #[error("unknown function: {name}")]
    UnknownFunction {
        /// The unresolved function name.
        name: String,
    },

    /// A builtin was applied to the wrong number of arguments.
    #[error("'{name}' expects {expected}, got {actual} argument(s)")]
    WrongArity {
        /// The builtin's name.
        name: String,
        /// Human-readable expected count ("2 arguments", "0 or 2 arguments").
        expected: String,
        /// The number of arguments supplied.
        actual: usize,
    },

    /// An argument or result had the wrong type.
    #[error("'{name}' expects {expected}")]
    WrongType {
        /// The builtin's name.
        name: String,
        /// Human-readable expectation ("a string argument", "boolean arguments").
        expected: String,
    },

    /// `contains?` named a field outside its fixed vocabulary.
    #[error("unknown field: {field}")]
    UnknownField {
        /// The rejected field name.
        field: String,
    },

    /// A malformed time literal (from `make-time`).
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Recurrence expansion failed underneath a time-range builtin.
    #[error("recurrence expansion failed: {0}")]
    Recur(#[from] pim_data_rs::DataError),
}
