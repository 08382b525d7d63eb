//! Query evaluation against one decoded component.
//!
//! The evaluator walks a parsed [`Expr`] against a single
//! [`Component`] plus a [`RecurrenceService`], producing a typed
//! [`Value`]. Evaluation never mutates the component and is deterministic
//! apart from `time-now`; it is safe to run many evaluations concurrently
//! against shared component snapshots.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use pim_data_rs::{Classification, Component, RecurrenceService};

use super::ast::Expr;
use super::error::{EvalError, EvalResult, ParseError};
use super::range::dominant_occur_range;

/// The typed result of evaluating a query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A boolean result.
    Bool(bool),

    /// An integer result.
    Int(i64),

    /// A UTC instant.
    Time(DateTime<Utc>),

    /// A string result.
    Text(String),

    /// No defined value (e.g. `not` of an undefined subexpression).
    Undefined,
}

impl Value {
    /// Returns a short name for the value's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Time(_) => "time",
            Value::Text(_) => "text",
            Value::Undefined => "undefined",
        }
    }
}

/// Evaluates parsed query expressions against one component.
///
/// # Example
///
/// ```
/// use pim_cache_rs::sexp::{Evaluator, QueryParser};
/// use pim_data_rs::{Component, RruleExpander};
///
/// let mut component = Component::new("event-1");
/// component.summary = Some("Weekly standup".to_string());
///
/// let expr = QueryParser::parse("(contains? \"summary\" \"standup\")").unwrap();
/// let service = RruleExpander::new();
/// let evaluator = Evaluator::new(&component, &service);
/// assert!(evaluator.matches(&expr).unwrap());
/// ```
pub struct Evaluator<'a> {
    component: &'a Component,
    service: &'a dyn RecurrenceService,
}

/// The dominant time range of the expression under evaluation, threaded
/// through recursion so `occurrences-count?` can reuse it.
type ExprRange = Option<(DateTime<Utc>, DateTime<Utc>)>;

impl<'a> Evaluator<'a> {
    /// Creates an evaluator for one component.
    pub fn new(component: &'a Component, service: &'a dyn RecurrenceService) -> Self {
        Self { component, service }
    }

    /// Evaluates an expression to its typed result.
    pub fn evaluate(&self, expr: &Expr) -> EvalResult<Value> {
        let expr_range = dominant_occur_range(expr);
        self.eval(expr, expr_range)
    }

    /// Evaluates an expression as a match predicate.
    ///
    /// A boolean result is returned as-is and an undefined result is a
    /// non-match; any other result type is an evaluation error.
    pub fn matches(&self, expr: &Expr) -> EvalResult<bool> {
        match self.evaluate(expr)? {
            Value::Bool(matched) => Ok(matched),
            Value::Undefined => Ok(false),
            other => Err(EvalError::WrongType {
                name: "query".to_string(),
                expected: format!("a boolean result, got {}", other.type_name()),
            }),
        }
    }

    fn eval(&self, expr: &Expr, expr_range: ExprRange) -> EvalResult<Value> {
        match expr {
            Expr::Str(value) => Ok(Value::Text(value.clone())),
            Expr::Int(value) => Ok(Value::Int(*value)),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Call(name, args) => self.apply(name, args, expr_range),
        }
    }

    fn apply(&self, name: &str, args: &[Expr], expr_range: ExprRange) -> EvalResult<Value> {
        match name {
            "and" => self.eval_and(args, expr_range),
            "or" => self.eval_or(args, expr_range),
            "not" => self.eval_not(args, expr_range),
            "=" | "<" | ">" => self.eval_comparison(name, args, expr_range),

            "uid?" => {
                self.expect_arity(name, args, 1)?;
                let uid = self.str_arg(name, &args[0], expr_range)?;
                Ok(Value::Bool(
                    uid.to_lowercase() == self.component.uid.to_lowercase(),
                ))
            }
            "contains?" => {
                self.expect_arity(name, args, 2)?;
                let field = self.str_arg(name, &args[0], expr_range)?;
                let needle = self.str_arg(name, &args[1], expr_range)?;
                self.eval_contains(&field, &needle)
            }
            "has-start?" => {
                self.expect_arity(name, args, 0)?;
                Ok(Value::Bool(self.component.start.is_some()))
            }
            "has-recurrences?" => {
                self.expect_arity(name, args, 0)?;
                Ok(Value::Bool(self.component.has_recurrences()))
            }
            "has-categories?" => self.eval_has_categories(args, expr_range),
            "has-attachments?" => {
                self.expect_arity(name, args, 0)?;
                Ok(Value::Bool(!self.component.attachments.is_empty()))
            }
            "is-completed?" => {
                self.expect_arity(name, args, 0)?;
                Ok(Value::Bool(self.component.completed.is_some()))
            }
            "completed-before?" => {
                self.expect_arity(name, args, 1)?;
                let bound = self.time_arg(name, &args[0], expr_range)?;
                Ok(Value::Bool(
                    self.component.completed.is_some_and(|done| done < bound),
                ))
            }
            "percent-complete?" => {
                self.expect_arity(name, args, 0)?;
                let percent = self
                    .component
                    .percent_complete
                    .map(i64::from)
                    .unwrap_or(-1);
                Ok(Value::Int(percent))
            }
            "due-in-time-range?" => {
                self.expect_arity(name, args, 2)?;
                let range_start = self.time_arg(name, &args[0], expr_range)?;
                let range_end = self.time_arg(name, &args[1], expr_range)?;
                let due = self
                    .component
                    .due
                    .as_ref()
                    .map(|due| due.to_utc(Tz::UTC));
                Ok(Value::Bool(due.is_some_and(|due| {
                    due >= range_start && due <= range_end
                })))
            }
            "occur-in-time-range?" => self.eval_occur_in_time_range(args, expr_range),
            "occurrences-count?" => self.eval_occurrences_count(args, expr_range),
            "has-alarms?" => {
                self.expect_arity(name, args, 0)?;
                Ok(Value::Bool(!self.component.alarms.is_empty()))
            }
            "has-alarms-in-range?" => {
                self.expect_arity(name, args, 2)?;
                let range_start = self.time_arg(name, &args[0], expr_range)?;
                let range_end = self.time_arg(name, &args[1], expr_range)?;
                let alarms = self.service.expand_alarms(
                    self.component,
                    range_start,
                    range_end,
                    Tz::UTC,
                )?;
                Ok(Value::Bool(!alarms.is_empty()))
            }

            "time-now" => {
                self.expect_arity(name, args, 0)?;
                Ok(Value::Time(Utc::now()))
            }
            "make-time" => {
                self.expect_arity(name, args, 1)?;
                let literal = self.str_arg(name, &args[0], expr_range)?;
                Ok(Value::Time(parse_time_literal(&literal)?))
            }
            "time-add-day" => {
                self.expect_arity(name, args, 2)?;
                let base = self.time_arg(name, &args[0], expr_range)?;
                let days = self.int_arg(name, &args[1], expr_range)?;
                Ok(Value::Time(base + Duration::days(days)))
            }
            "time-day-begin" => {
                self.expect_arity(name, args, 1)?;
                let instant = self.time_arg(name, &args[0], expr_range)?;
                Ok(Value::Time(day_begin_local(instant)))
            }
            "time-day-end" => {
                self.expect_arity(name, args, 1)?;
                let instant = self.time_arg(name, &args[0], expr_range)?;
                Ok(Value::Time(day_end_local(instant)))
            }

            _ => Err(EvalError::UnknownFunction {
                name: name.to_string(),
            }),
        }
    }

    /// `(and expr...)` - logical conjunction, short-circuiting on the
    /// first false argument.
    fn eval_and(&self, args: &[Expr], expr_range: ExprRange) -> EvalResult<Value> {
        self.expect_some_args("and", args)?;
        for arg in args {
            if !self.bool_value("and", arg, expr_range)? {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }

    /// `(or expr...)` - logical disjunction, short-circuiting on the
    /// first true argument.
    fn eval_or(&self, args: &[Expr], expr_range: ExprRange) -> EvalResult<Value> {
        self.expect_some_args("or", args)?;
        for arg in args {
            if self.bool_value("or", arg, expr_range)? {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    }

    /// `(not expr)` - negation; undefined stays undefined.
    fn eval_not(&self, args: &[Expr], expr_range: ExprRange) -> EvalResult<Value> {
        self.expect_arity("not", args, 1)?;
        match self.eval(&args[0], expr_range)? {
            Value::Bool(value) => Ok(Value::Bool(!value)),
            Value::Undefined => Ok(Value::Undefined),
            other => Err(EvalError::WrongType {
                name: "not".to_string(),
                expected: format!("a boolean argument, got {}", other.type_name()),
            }),
        }
    }

    /// `(= a b)`, `(< a b)`, `(> a b)` - comparison over two results of
    /// the same type (integers, times or strings). These make the
    /// integer-valued builtins usable inside a boolean query, e.g.
    /// `(= (occurrences-count?) 1)`.
    fn eval_comparison(
        &self,
        name: &str,
        args: &[Expr],
        expr_range: ExprRange,
    ) -> EvalResult<Value> {
        self.expect_arity(name, args, 2)?;
        let left = self.eval(&args[0], expr_range)?;
        let right = self.eval(&args[1], expr_range)?;
        let ordering = match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => {
                return Err(EvalError::WrongType {
                    name: name.to_string(),
                    expected: format!(
                        "two arguments of one comparable type, got {} and {}",
                        left.type_name(),
                        right.type_name()
                    ),
                })
            }
        };
        let matched = match name {
            "<" => ordering == Ordering::Less,
            ">" => ordering == Ordering::Greater,
            _ => ordering == Ordering::Equal,
        };
        Ok(Value::Bool(matched))
    }

    /// `(contains? field str)` - case-insensitive substring test on the
    /// named field; `classification`, `status` and `priority` match their
    /// fixed vocabulary exactly.
    fn eval_contains(&self, field: &str, needle: &str) -> EvalResult<Value> {
        let component = self.component;
        let needle_lc = needle.to_lowercase();
        let in_text = |text: &str| text.to_lowercase().contains(&needle_lc);
        let in_opt = |text: &Option<String>| text.as_deref().is_some_and(in_text);
        let in_attendee = |attendee: &pim_data_rs::Attendee| {
            attendee.name.as_deref().is_some_and(in_text) || in_text(&attendee.email)
        };

        let matched = match field {
            "any" => {
                component.comments.iter().any(|c| in_text(c))
                    || in_opt(&component.description)
                    || in_opt(&component.summary)
                    || in_opt(&component.location)
            }
            "comment" => component.comments.iter().any(|c| in_text(c)),
            "description" => in_opt(&component.description),
            "summary" => in_opt(&component.summary),
            "location" => in_opt(&component.location),
            "attendee" => component.attendees.iter().any(in_attendee),
            "organizer" => component.organizer.as_ref().is_some_and(|o| in_attendee(o)),
            "classification" => {
                // A word outside the vocabulary matches items with no
                // classification set.
                !needle.is_empty()
                    && component.classification == Classification::from_query_str(needle)
            }
            "status" => {
                if needle.is_empty() {
                    false
                } else {
                    let word = component
                        .status
                        .map(|s| s.as_query_str())
                        .unwrap_or("NOT STARTED");
                    word == needle
                }
            }
            "priority" => match component.priority {
                None => needle == "UNDEFINED",
                Some(priority) if priority <= 4 => needle == "HIGH",
                Some(5) => needle == "NORMAL",
                Some(_) => needle == "LOW",
            },
            _ => {
                return Err(EvalError::UnknownField {
                    field: field.to_string(),
                })
            }
        };
        Ok(Value::Bool(matched))
    }

    /// `(has-categories? str... )` or `(has-categories? #f)` - all named
    /// categories present, or no categories at all.
    fn eval_has_categories(&self, args: &[Expr], expr_range: ExprRange) -> EvalResult<Value> {
        self.expect_some_args("has-categories?", args)?;

        if args.len() == 1 {
            match self.eval(&args[0], expr_range)? {
                Value::Bool(false) => {
                    return Ok(Value::Bool(self.component.categories.is_empty()))
                }
                Value::Text(category) => {
                    return Ok(Value::Bool(
                        self.component.categories.iter().any(|c| *c == category),
                    ))
                }
                other => {
                    return Err(EvalError::WrongType {
                        name: "has-categories?".to_string(),
                        expected: format!("#f or category names, got {}", other.type_name()),
                    })
                }
            }
        }

        for arg in args {
            let category = self.str_arg("has-categories?", arg, expr_range)?;
            if !self.component.categories.iter().any(|c| *c == category) {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }

    /// `(occur-in-time-range? start end [zone])` - at least one instance
    /// overlaps the half-open window; the optional zone interprets
    /// date-only and floating values, defaulting to UTC.
    fn eval_occur_in_time_range(&self, args: &[Expr], expr_range: ExprRange) -> EvalResult<Value> {
        if args.len() != 2 && args.len() != 3 {
            return Err(EvalError::WrongArity {
                name: "occur-in-time-range?".to_string(),
                expected: "2 or 3 arguments".to_string(),
                actual: args.len(),
            });
        }
        let range_start = self.time_arg("occur-in-time-range?", &args[0], expr_range)?;
        let range_end = self.time_arg("occur-in-time-range?", &args[1], expr_range)?;
        let zone = if args.len() == 3 {
            let identifier = self.str_arg("occur-in-time-range?", &args[2], expr_range)?;
            self.service.resolve_zone(&identifier).unwrap_or(Tz::UTC)
        } else {
            Tz::UTC
        };

        let occurrences =
            self.service
                .expand_occurrences(self.component, range_start, range_end, zone)?;
        Ok(Value::Bool(!occurrences.is_empty()))
    }

    /// `(occurrences-count? [start end])` - instance count in the explicit
    /// range, or in the range the surrounding expression tests for; -1
    /// when neither is available.
    fn eval_occurrences_count(&self, args: &[Expr], expr_range: ExprRange) -> EvalResult<Value> {
        let range = match args.len() {
            0 => expr_range,
            2 => Some((
                self.time_arg("occurrences-count?", &args[0], expr_range)?,
                self.time_arg("occurrences-count?", &args[1], expr_range)?,
            )),
            actual => {
                return Err(EvalError::WrongArity {
                    name: "occurrences-count?".to_string(),
                    expected: "0 or 2 arguments".to_string(),
                    actual,
                })
            }
        };

        let Some((range_start, range_end)) = range else {
            return Ok(Value::Int(-1));
        };
        let occurrences =
            self.service
                .expand_occurrences(self.component, range_start, range_end, Tz::UTC)?;
        Ok(Value::Int(occurrences.len() as i64))
    }

    // ==================== Argument Helpers ====================

    fn expect_arity(&self, name: &str, args: &[Expr], expected: usize) -> EvalResult<()> {
        if args.len() != expected {
            return Err(EvalError::WrongArity {
                name: name.to_string(),
                expected: match expected {
                    0 => "no arguments".to_string(),
                    1 => "1 argument".to_string(),
                    n => format!("{n} arguments"),
                },
                actual: args.len(),
            });
        }
        Ok(())
    }

    fn expect_some_args(&self, name: &str, args: &[Expr]) -> EvalResult<()> {
        if args.is_empty() {
            return Err(EvalError::WrongArity {
                name: name.to_string(),
                expected: "at least 1 argument".to_string(),
                actual: 0,
            });
        }
        Ok(())
    }

    fn bool_value(&self, name: &str, arg: &Expr, expr_range: ExprRange) -> EvalResult<bool> {
        match self.eval(arg, expr_range)? {
            Value::Bool(value) => Ok(value),
            other => Err(EvalError::WrongType {
                name: name.to_string(),
                expected: format!("boolean arguments, got {}", other.type_name()),
            }),
        }
    }

    fn str_arg(&self, name: &str, arg: &Expr, expr_range: ExprRange) -> EvalResult<String> {
        match self.eval(arg, expr_range)? {
            Value::Text(value) => Ok(value),
            other => Err(EvalError::WrongType {
                name: name.to_string(),
                expected: format!("a string argument, got {}", other.type_name()),
            }),
        }
    }

    fn int_arg(&self, name: &str, arg: &Expr, expr_range: ExprRange) -> EvalResult<i64> {
        match self.eval(arg, expr_range)? {
            Value::Int(value) => Ok(value),
            other => Err(EvalError::WrongType {
                name: name.to_string(),
                expected: format!("an integer argument, got {}", other.type_name()),
            }),
        }
    }

    fn time_arg(
        &self,
        name: &str,
        arg: &Expr,
        expr_range: ExprRange,
    ) -> EvalResult<DateTime<Utc>> {
        match self.eval(arg, expr_range)? {
            Value::Time(value) => Ok(value),
            other => Err(EvalError::WrongType {
                name: name.to_string(),
                expected: format!("a time argument, got {}", other.type_name()),
            }),
        }
    }
}

/// Parses an ISO 8601 basic timestamp: `YYYYMMDDTHHMMSSZ`,
/// `YYYYMMDDTHHMMSS` (read as UTC) or `YYYYMMDD` (midnight UTC).
pub(super) fn parse_time_literal(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ") {
        return Ok(Utc.from_utc_datetime(&datetime));
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Ok(Utc.from_utc_datetime(&datetime));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
    Err(ParseError::InvalidTime {
        value: value.to_string(),
    })
}

/// Start of the local-time day containing `instant`.
pub(super) fn day_begin_local(instant: DateTime<Utc>) -> DateTime<Utc> {
    local_midnight(instant.with_timezone(&Local).date_naive())
}

/// End of the local-time day containing `instant` (start of the next day).
pub(super) fn day_end_local(instant: DateTime<Utc>) -> DateTime<Utc> {
    local_midnight(instant.with_timezone(&Local).date_naive() + Duration::days(1))
}

/// Local midnight of `date` as a UTC instant.
fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(instant) => instant.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&midnight),
    }
}
