//! Abstract syntax tree for query expressions.

/// A parsed query expression.
///
/// The grammar is prefix function application over literals: a call
/// `(name arg1 arg2 ...)` whose arguments are strings, integers, booleans
/// or nested calls. Function names are resolved at evaluation time, so an
/// unknown name is an evaluation error rather than a parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A string literal.
    Str(String),

    /// An integer literal.
    Int(i64),

    /// A boolean literal (`#t` / `#f`).
    Bool(bool),

    /// A function application.
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Creates a function application.
    ///
    /// # Example
    ///
    /// ```
    /// use pim_cache_rs::sexp::Expr;
    ///
    /// let expr = Expr::call("has-start?", vec![]);
    /// assert!(matches!(expr, Expr::Call(_, _)));
    /// ```
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(name.into(), args)
    }
}
