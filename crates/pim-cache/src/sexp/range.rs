//! Static time-range extraction from parsed expressions.
//!
//! Many queries have the shape "... and occurs between T1 and T2": one
//! `occur-in-time-range?` call that every match must satisfy. Discovering
//! that range without evaluating lets the cache consult its interval
//! index instead of scanning every row, and lets a zero-argument
//! `occurrences-count?` reuse the surrounding filter's window.

use chrono::{DateTime, Duration, Utc};

use super::ast::Expr;
use super::eval::{day_begin_local, day_end_local, parse_time_literal};

/// Finds the single dominant time range a parsed expression tests for.
///
/// The walk accepts an `occur-in-time-range?` call only where it dominates
/// the boolean result: at the top level or under `and` nodes. Anything
/// inside `or` or `not` could leave the overall expression true without
/// the range matching, so those subtrees never contribute. Two distinct
/// hits under one `and` are ambiguous and yield `None`. Both bounds must
/// be statically evaluable pure time expressions.
pub fn dominant_occur_range(expr: &Expr) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match expr {
        Expr::Call(name, args) => match name.as_str() {
            "occur-in-time-range?" if args.len() == 2 || args.len() == 3 => {
                let start = static_time(&args[0])?;
                let end = static_time(&args[1])?;
                Some((start, end))
            }
            "and" => {
                let mut found = None;
                for arg in args {
                    if let Some(range) = dominant_occur_range(arg) {
                        if found.is_some() {
                            return None;
                        }
                        found = Some(range);
                    }
                }
                found
            }
            _ => None,
        },
        _ => None,
    }
}

/// Statically evaluates a pure time expression, or `None` if the
/// expression is not one.
fn static_time(expr: &Expr) -> Option<DateTime<Utc>> {
    let Expr::Call(name, args) = expr else {
        return None;
    };
    match (name.as_str(), args.as_slice()) {
        ("make-time", [Expr::Str(literal)]) => parse_time_literal(literal).ok(),
        ("time-now", []) => Some(Utc::now()),
        ("time-add-day", [base, Expr::Int(days)]) => {
            static_time(base).map(|t| t + Duration::days(*days))
        }
        ("time-day-begin", [base]) => static_time(base).map(day_begin_local),
        ("time-day-end", [base]) => static_time(base).map(day_end_local),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sexp::QueryParser;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_top_level_occur_call() {
        let expr = QueryParser::parse(
            "(occur-in-time-range? (make-time \"20170209T000000Z\") (make-time \"20170210T000000Z\"))",
        )
        .unwrap();
        assert_eq!(
            dominant_occur_range(&expr),
            Some((utc(2017, 2, 9), utc(2017, 2, 10)))
        );
    }

    #[test]
    fn test_occur_under_and() {
        let expr = QueryParser::parse(
            "(and (has-start?) (occur-in-time-range? (make-time \"20200101\") (make-time \"20200201\")))",
        )
        .unwrap();
        assert_eq!(
            dominant_occur_range(&expr),
            Some((utc(2020, 1, 1), utc(2020, 2, 1)))
        );
    }

    #[test]
    fn test_occur_under_or_does_not_dominate() {
        let expr = QueryParser::parse(
            "(or (has-start?) (occur-in-time-range? (make-time \"20200101\") (make-time \"20200201\")))",
        )
        .unwrap();
        assert_eq!(dominant_occur_range(&expr), None);
    }

    #[test]
    fn test_occur_under_not_does_not_dominate() {
        let expr = QueryParser::parse(
            "(not (occur-in-time-range? (make-time \"20200101\") (make-time \"20200201\")))",
        )
        .unwrap();
        assert_eq!(dominant_occur_range(&expr), None);
    }

    #[test]
    fn test_two_occur_calls_are_ambiguous() {
        let expr = QueryParser::parse(
            "(and (occur-in-time-range? (make-time \"20200101\") (make-time \"20200201\")) \
                  (occur-in-time-range? (make-time \"20200301\") (make-time \"20200401\")))",
        )
        .unwrap();
        assert_eq!(dominant_occur_range(&expr), None);
    }

    #[test]
    fn test_static_time_arithmetic() {
        let expr = QueryParser::parse(
            "(occur-in-time-range? (make-time \"20200101\") (time-add-day (make-time \"20200101\") 7))",
        )
        .unwrap();
        assert_eq!(
            dominant_occur_range(&expr),
            Some((utc(2020, 1, 1), utc(2020, 1, 8)))
        );

        let expr = QueryParser::parse(
            "(occur-in-time-range? (make-time \"20200101\") (make-time \"not a time\"))",
        )
        .unwrap();
        assert_eq!(dominant_occur_range(&expr), None);
    }

    #[test]
    fn test_nested_and_chain() {
        let expr = QueryParser::parse(
            "(and (and (has-start?) (occur-in-time-range? (make-time \"20200101\") (make-time \"20200201\"))) \
                  (not (has-alarms?)))",
        )
        .unwrap();
        assert_eq!(
            dominant_occur_range(&expr),
            Some((utc(2020, 1, 1), utc(2020, 2, 1)))
        );
    }
}
