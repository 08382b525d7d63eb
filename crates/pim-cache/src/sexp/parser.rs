//! Recursive descent parser for query expressions.

use super::ast::Expr;
use super::error::{ParseError, ParseResult};
use super::lexer::{Lexer, Token};

/// Parser for query expressions.
///
/// # Grammar
///
/// ```text
/// query   ::= call
/// call    ::= "(" symbol expr* ")"
/// expr    ::= call | string | integer | "#t" | "#f"
/// ```
///
/// The top level must be a single call; literals on their own and trailing
/// input are rejected.
///
/// # Example
///
/// ```
/// use pim_cache_rs::sexp::{Expr, QueryParser};
///
/// let expr = QueryParser::parse("(and (has-start?) (uid? \"a\"))").unwrap();
/// assert!(matches!(expr, Expr::Call(name, _) if name == "and"));
/// ```
pub struct QueryParser {
    tokens: Vec<Token>,
    position: usize,
}

impl QueryParser {
    /// Parses query text into an expression AST.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Empty` for blank input, and the other
    /// [`ParseError`] kinds for malformed token streams.
    pub fn parse(input: &str) -> ParseResult<Expr> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }

        let tokens = Lexer::new(trimmed).tokenize()?;
        if tokens.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut parser = Self { tokens, position: 0 };
        let expr = parser.parse_call()?;

        if parser.position < parser.tokens.len() {
            return Err(ParseError::TrailingTokens);
        }
        Ok(expr)
    }

    /// Returns the current token without consuming it.
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    /// Consumes and returns the current token.
    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Parses a call: `"(" symbol expr* ")"`.
    fn parse_call(&mut self) -> ParseResult<Expr> {
        match self.advance() {
            Some(Token::OpenParen) => {}
            Some(token) => {
                return Err(ParseError::UnexpectedToken {
                    token: token.to_string(),
                })
            }
            None => return Err(ParseError::UnexpectedEof),
        }

        let name = match self.advance() {
            Some(Token::Symbol(name)) => name.clone(),
            Some(token) => {
                return Err(ParseError::UnexpectedToken {
                    token: token.to_string(),
                })
            }
            None => return Err(ParseError::UnexpectedEof),
        };

        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(Token::CloseParen) => {
                    self.advance();
                    return Ok(Expr::Call(name, args));
                }
                Some(_) => args.push(self.parse_expr()?),
                None => return Err(ParseError::UnexpectedEof),
            }
        }
    }

    /// Parses one argument expression: a literal or a nested call.
    fn parse_expr(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some(Token::OpenParen) => self.parse_call(),
            Some(Token::Str(value)) => {
                let expr = Expr::Str(value.clone());
                self.advance();
                Ok(expr)
            }
            Some(Token::Int(value)) => {
                let expr = Expr::Int(*value);
                self.advance();
                Ok(expr)
            }
            Some(Token::Bool(value)) => {
                let expr = Expr::Bool(*value);
                self.advance();
                Ok(expr)
            }
            Some(token) => Err(ParseError::UnexpectedToken {
                token: token.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zero_arg_call() {
        let expr = QueryParser::parse("(has-start?)").unwrap();
        assert_eq!(expr, Expr::call("has-start?", vec![]));
    }

    #[test]
    fn test_parse_literal_arguments() {
        let expr = QueryParser::parse("(contains? \"summary\" \"standup\")").unwrap();
        assert_eq!(
            expr,
            Expr::call(
                "contains?",
                vec![
                    Expr::Str("summary".to_string()),
                    Expr::Str("standup".to_string()),
                ]
            )
        );
    }

    #[test]
    fn test_parse_nested_calls() {
        let expr = QueryParser::parse("(and (has-start?) (not (has-alarms?)))").unwrap();
        assert_eq!(
            expr,
            Expr::call(
                "and",
                vec![
                    Expr::call("has-start?", vec![]),
                    Expr::call("not", vec![Expr::call("has-alarms?", vec![])]),
                ]
            )
        );
    }

    #[test]
    fn test_parse_boolean_and_integer_literals() {
        let expr = QueryParser::parse("(has-categories? #f)").unwrap();
        assert_eq!(expr, Expr::call("has-categories?", vec![Expr::Bool(false)]));

        let expr = QueryParser::parse("(time-add-day (time-now) 7)").unwrap();
        assert_eq!(
            expr,
            Expr::call(
                "time-add-day",
                vec![Expr::call("time-now", vec![]), Expr::Int(7)]
            )
        );
    }

    #[test]
    fn test_parse_empty_input() {
        assert_eq!(QueryParser::parse(""), Err(ParseError::Empty));
        assert_eq!(QueryParser::parse("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_parse_bare_literal_rejected() {
        let result = QueryParser::parse("\"just a string\"");
        assert!(matches!(result, Err(ParseError::UnexpectedToken { .. })));
    }

    #[test]
    fn test_parse_missing_close_paren() {
        let result = QueryParser::parse("(and (has-start?)");
        assert_eq!(result, Err(ParseError::UnexpectedEof));
    }

    #[test]
    fn test_parse_trailing_tokens() {
        let result = QueryParser::parse("(has-start?) (has-alarms?)");
        assert_eq!(result, Err(ParseError::TrailingTokens));
    }

    #[test]
    fn test_parse_call_without_name() {
        let result = QueryParser::parse("(42)");
        assert!(matches!(result, Err(ParseError::UnexpectedToken { .. })));
    }
}
