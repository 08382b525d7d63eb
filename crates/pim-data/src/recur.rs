//! Recurrence expansion for recurring items.
//!
//! The cache's query engine never expands recurrences itself; it consumes
//! a [`RecurrenceService`]. The shipped [`RruleExpander`] assembles an
//! iCalendar rule text from a component and expands it with the `rrule`
//! crate, clamped to the requested window so unbounded rules terminate.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::component::Component;
use crate::error::{DataError, DataResult};
use crate::time::CalTime;

/// Hard cap on instances produced by a single expansion.
const MAX_INSTANCES: u16 = 730;

/// One concrete time span produced by expanding an item within a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    /// Instance start.
    pub start: DateTime<Utc>,

    /// Instance end; equals `start` for zero-length instances.
    pub end: DateTime<Utc>,
}

impl Occurrence {
    /// Returns true if this instance overlaps the half-open window
    /// `[window_start, window_end)`. A zero-length instance overlaps when
    /// its single point lies inside the window.
    pub fn overlaps(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        if self.start == self.end {
            self.start >= window_start && self.start < window_end
        } else {
            self.start < window_end && self.end > window_start
        }
    }
}

/// One concrete alarm trigger produced by expanding an item's alarms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmInstance {
    /// The instant the alarm triggers.
    pub trigger: DateTime<Utc>,

    /// The occurrence the alarm belongs to.
    pub occurrence: Occurrence,

    /// Alarm description, when set.
    pub description: Option<String>,
}

/// Expansion of recurring items and resolution of timezone identifiers.
///
/// Implementations must terminate even for unbounded rules by stopping at
/// the window end.
pub trait RecurrenceService {
    /// Resolves a timezone identifier to a zone, or `None` if unknown.
    fn resolve_zone(&self, identifier: &str) -> Option<Tz>;

    /// Produces every instance of `component` overlapping the half-open
    /// window `[window_start, window_end)`. `default_zone` interprets
    /// date-only and floating time values.
    fn expand_occurrences(
        &self,
        component: &Component,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        default_zone: Tz,
    ) -> DataResult<Vec<Occurrence>>;

    /// Produces every alarm trigger of `component` falling inside the
    /// half-open window `[window_start, window_end)`.
    fn expand_alarms(
        &self,
        component: &Component,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        default_zone: Tz,
    ) -> DataResult<Vec<AlarmInstance>>;
}

/// [`RecurrenceService`] backed by the `rrule` crate and `chrono-tz`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RruleExpander;

impl RruleExpander {
    /// Creates a new expander.
    pub fn new() -> Self {
        Self
    }
}

impl RecurrenceService for RruleExpander {
    fn resolve_zone(&self, identifier: &str) -> Option<Tz> {
        identifier.parse::<Tz>().ok()
    }

    fn expand_occurrences(
        &self,
        component: &Component,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        default_zone: Tz,
    ) -> DataResult<Vec<Occurrence>> {
        if window_end <= window_start {
            return Ok(Vec::new());
        }

        let (Some(rule), Some(start)) = (&component.rrule, &component.start) else {
            // Non-recurring, or a rule with nothing to anchor it: the item
            // contributes at most its own span.
            return Ok(plain_span(component, window_start, window_end, default_zone)
                .into_iter()
                .collect());
        };

        let duration = span_duration(component, default_zone);
        let text = rule_text(start, rule, &component.exdates);
        let set: RRuleSet = text.parse().map_err(|e: rrule::RRuleError| DataError::InvalidRule {
            uid: component.uid.clone(),
            message: e.to_string(),
        })?;

        // after/before are exclusive bounds; start expanding one span
        // before the window so instances straddling the window start are
        // still seen.
        let tz: rrule::Tz = Utc.into();
        let after = (window_start - duration - Duration::seconds(1)).with_timezone(&tz);
        let before = window_end.with_timezone(&tz);
        let expanded = set.after(after).before(before).all(MAX_INSTANCES);

        let mut occurrences = Vec::new();
        for date in &expanded.dates {
            let instance_start = date.with_timezone(&Utc);
            let occurrence = Occurrence {
                start: instance_start,
                end: instance_start + duration,
            };
            if occurrence.overlaps(window_start, window_end) {
                occurrences.push(occurrence);
            }
        }
        Ok(occurrences)
    }

    fn expand_alarms(
        &self,
        component: &Component,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        default_zone: Tz,
    ) -> DataResult<Vec<AlarmInstance>> {
        if component.alarms.is_empty() || window_end <= window_start {
            return Ok(Vec::new());
        }

        // A trigger inside the window can belong to an occurrence starting
        // after the window end; look ahead by the largest offset.
        let max_offset = component
            .alarms
            .iter()
            .map(|a| a.minutes_before.max(0))
            .max()
            .unwrap_or(0);
        let lookahead = window_end + Duration::minutes(max_offset);
        let occurrences =
            self.expand_occurrences(component, window_start, lookahead, default_zone)?;

        let mut instances = Vec::new();
        for occurrence in &occurrences {
            for alarm in &component.alarms {
                let trigger = occurrence.start - Duration::minutes(alarm.minutes_before);
                if trigger >= window_start && trigger < window_end {
                    instances.push(AlarmInstance {
                        trigger,
                        occurrence: *occurrence,
                        description: alarm.description.clone(),
                    });
                }
            }
        }
        instances.sort_by_key(|instance| instance.trigger);
        Ok(instances)
    }
}

/// Builds the rule text the `rrule` parser expects: a DTSTART line, the
/// RRULE line, and one EXDATE line per excluded occurrence.
fn rule_text(start: &CalTime, rrule: &str, exdates: &[CalTime]) -> String {
    let mut lines = Vec::with_capacity(2 + exdates.len());
    lines.push(time_line("DTSTART", start));
    lines.push(format!("RRULE:{rrule}"));
    for exdate in exdates {
        lines.push(time_line("EXDATE", exdate));
    }
    lines.join("\n")
}

/// Formats one property line for the rule text. The rrule parser wants a
/// datetime, so date-only values become midnight UTC and floating values
/// are pinned to UTC.
fn time_line(property: &str, time: &CalTime) -> String {
    match time {
        CalTime::Date(date) => format!("{property}:{}T000000Z", date.format("%Y%m%d")),
        CalTime::Utc(instant) => format!("{property}:{}", instant.format("%Y%m%dT%H%M%SZ")),
        CalTime::Floating(datetime) => {
            format!("{property}:{}Z", datetime.format("%Y%m%dT%H%M%S"))
        }
        CalTime::Zoned { datetime, tzid } => {
            format!("{property};TZID={tzid}:{}", datetime.format("%Y%m%dT%H%M%S"))
        }
    }
}

/// The span of one instance: explicit end minus start, a whole day for
/// date-only items without an end, zero otherwise.
fn span_duration(component: &Component, zone: Tz) -> Duration {
    match (&component.start, &component.end) {
        (Some(start), Some(end)) => {
            let duration = end.to_utc(zone) - start.to_utc(zone);
            duration.max(Duration::zero())
        }
        (Some(CalTime::Date(_)), None) => Duration::days(1),
        _ => Duration::zero(),
    }
}

/// The single span of a non-recurring component, clipped against the
/// window. The due time anchors items without a start.
fn plain_span(
    component: &Component,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    zone: Tz,
) -> Option<Occurrence> {
    let anchor = component.start.as_ref().or(component.due.as_ref())?;
    let start = anchor.to_utc(zone);
    let end = start + span_duration(component, zone);
    let occurrence = Occurrence { start, end };
    occurrence
        .overlaps(window_start, window_end)
        .then_some(occurrence)
}
