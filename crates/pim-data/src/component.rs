//! The structured content of one stored item.
//!
//! A [`Component`] is the decoded form of the payload the cache persists:
//! one calendar/contact entity with its dates, summary, categories,
//! attendees, alarms and attachments. The cache treats the encoded payload
//! as opaque; the query engine works on the decoded component.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DataResult;
use crate::time::CalTime;

/// The storage key of a component: UID plus optional recurrence id.
///
/// A master item has no recurrence id; a detached exception of a recurring
/// series carries the recurrence id of the occurrence it overrides. The
/// pair is unique within a cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    /// The stable item identifier.
    pub uid: String,

    /// The recurrence id, present only for detached exceptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<String>,
}

impl ComponentKey {
    /// Creates a key from a UID and an optional recurrence id.
    pub fn new(uid: impl Into<String>, recurrence_id: Option<&str>) -> Self {
        Self {
            uid: uid.into(),
            recurrence_id: recurrence_id.map(|r| r.to_string()),
        }
    }
}

impl std::fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.recurrence_id {
            Some(rid) => write!(f, "{}:{}", self.uid, rid),
            None => f.write_str(&self.uid),
        }
    }
}

/// Completion/progress status of an item.
///
/// The variants form a closed vocabulary; [`Status::as_query_str`] yields
/// the exact words the query language matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NeedsAction,
    Completed,
    Cancelled,
    InProcess,
    Tentative,
    Confirmed,
    Draft,
    Final,
    Submitted,
    Pending,
    Failed,
    Deleted,
}

impl Status {
    /// Returns the query-language word for this status.
    pub fn as_query_str(&self) -> &'static str {
        match self {
            Status::NeedsAction => "NEEDS ACTION",
            Status::Completed => "COMPLETED",
            Status::Cancelled => "CANCELLED",
            Status::InProcess => "IN PROGRESS",
            Status::Tentative => "TENTATIVE",
            Status::Confirmed => "CONFIRMED",
            Status::Draft => "DRAFT",
            Status::Final => "FINAL",
            Status::Submitted => "SUBMITTED",
            Status::Pending => "PENDING",
            Status::Failed => "FAILED",
            Status::Deleted => "DELETED",
        }
    }
}

/// Access classification of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Private,
    Confidential,
}

impl Classification {
    /// Returns the query-language word for this classification.
    pub fn as_query_str(&self) -> &'static str {
        match self {
            Classification::Public => "Public",
            Classification::Private => "Private",
            Classification::Confidential => "Confidential",
        }
    }

    /// Parses a query-language word; `None` for anything outside the
    /// vocabulary.
    pub fn from_query_str(word: &str) -> Option<Self> {
        match word {
            "Public" => Some(Classification::Public),
            "Private" => Some(Classification::Private),
            "Confidential" => Some(Classification::Confidential),
            _ => None,
        }
    }
}

/// An attendee or organizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Display name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Email address.
    pub email: String,
}

/// An alarm attached to an item, triggered relative to each occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// Minutes before the occurrence start at which the alarm triggers.
    pub minutes_before: i64,

    /// Alarm description, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An attachment carried by an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    /// A reference to a file on the local filesystem.
    Local {
        /// Path of the referenced file.
        path: PathBuf,
    },

    /// A reference to a remote resource, left untouched by normalization.
    Remote {
        /// The remote URL.
        url: String,
    },

    /// File content stored inline, tagged with the original base name.
    Inline {
        /// Base name of the file the content came from.
        name: String,
        /// Base64-encoded file content.
        data: String,
    },
}

/// The structured content of one stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// The stable item identifier.
    pub uid: String,

    /// The recurrence id, present only for detached exceptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<String>,

    /// One-line summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Longer description body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form comments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,

    /// Location text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Status, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// Access classification, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,

    /// Priority on the 1 (highest) to 9 (lowest) scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// Percent complete, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<u8>,

    /// Completion timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,

    /// Start of the item's span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<CalTime>,

    /// End of the item's span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<CalTime>,

    /// Due time (tasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<CalTime>,

    /// iCalendar RRULE value (e.g. "FREQ=DAILY;COUNT=10"), for masters of
    /// a recurring series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrule: Option<String>,

    /// Occurrences excluded from the recurrence expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exdates: Vec<CalTime>,

    /// Categories assigned to the item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    /// The organizer, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<Attendee>,

    /// Attendees.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,

    /// Alarms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alarms: Vec<Alarm>,

    /// Attachments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Component {
    /// Creates an empty component with the given UID.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            recurrence_id: None,
            summary: None,
            description: None,
            comments: Vec::new(),
            location: None,
            status: None,
            classification: None,
            priority: None,
            percent_complete: None,
            completed: None,
            start: None,
            end: None,
            due: None,
            rrule: None,
            exdates: Vec::new(),
            categories: Vec::new(),
            organizer: None,
            attendees: Vec::new(),
            alarms: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Returns the storage key of this component.
    pub fn key(&self) -> ComponentKey {
        ComponentKey {
            uid: self.uid.clone(),
            recurrence_id: self.recurrence_id.clone(),
        }
    }

    /// Returns true if the component recurs: it carries a recurrence rule
    /// or is itself a detached exception of a recurring series.
    pub fn has_recurrences(&self) -> bool {
        self.rrule.is_some() || self.recurrence_id.is_some()
    }

    /// Serializes this component to its payload form.
    pub fn encode(&self) -> DataResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a component from its payload form.
    pub fn decode(payload: &str) -> DataResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_display() {
        let key = ComponentKey::new("event-1", None);
        assert_eq!(key.to_string(), "event-1");

        let key = ComponentKey::new("event-1", Some("20200101T100000Z"));
        assert_eq!(key.to_string(), "event-1:20200101T100000Z");
    }

    #[test]
    fn test_has_recurrences() {
        let mut component = Component::new("a");
        assert!(!component.has_recurrences());

        component.rrule = Some("FREQ=DAILY".to_string());
        assert!(component.has_recurrences());

        let mut exception = Component::new("a");
        exception.recurrence_id = Some("20200101T100000Z".to_string());
        assert!(exception.has_recurrences());
    }

    #[test]
    fn test_payload_roundtrip_minimal() {
        let component = Component::new("minimal");
        let payload = component.encode().unwrap();
        let back = Component::decode(&payload).unwrap();
        assert_eq!(component, back);
    }

    #[test]
    fn test_payload_roundtrip_full() {
        let mut component = Component::new("full");
        component.recurrence_id = Some("20200102T090000Z".to_string());
        component.summary = Some("Standup".to_string());
        component.description = Some("Daily standup meeting".to_string());
        component.comments = vec!["moved twice".to_string()];
        component.location = Some("Room 4".to_string());
        component.status = Some(Status::Confirmed);
        component.classification = Some(Classification::Private);
        component.priority = Some(3);
        component.percent_complete = Some(40);
        component.completed = Some(Utc.with_ymd_and_hms(2020, 1, 3, 9, 15, 0).unwrap());
        component.start = Some(CalTime::Utc(
            Utc.with_ymd_and_hms(2020, 1, 2, 9, 0, 0).unwrap(),
        ));
        component.end = Some(CalTime::Utc(
            Utc.with_ymd_and_hms(2020, 1, 2, 9, 15, 0).unwrap(),
        ));
        component.categories = vec!["Work".to_string(), "Recurring".to_string()];
        component.organizer = Some(Attendee {
            name: Some("Alice".to_string()),
            email: "alice@example.com".to_string(),
        });
        component.attendees = vec![Attendee {
            name: None,
            email: "bob@example.com".to_string(),
        }];
        component.alarms = vec![Alarm {
            minutes_before: 10,
            description: Some("ping".to_string()),
        }];
        component.attachments = vec![
            Attachment::Remote {
                url: "https://example.com/agenda.txt".to_string(),
            },
            Attachment::Inline {
                name: "notes.txt".to_string(),
                data: "aGVsbG8=".to_string(),
            },
        ];

        let payload = component.encode().unwrap();
        let back = Component::decode(&payload).unwrap();
        assert_eq!(component, back);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Component::decode("not json").is_err());
        assert!(Component::decode("{}").is_err());
    }

    #[test]
    fn test_minimal_payload_decodes_with_defaults() {
        let component = Component::decode(r#"{"uid":"bare"}"#).unwrap();
        assert_eq!(component.uid, "bare");
        assert!(component.recurrence_id.is_none());
        assert!(component.categories.is_empty());
        assert!(component.alarms.is_empty());
    }

    #[test]
    fn test_status_query_vocabulary() {
        assert_eq!(Status::NeedsAction.as_query_str(), "NEEDS ACTION");
        assert_eq!(Status::InProcess.as_query_str(), "IN PROGRESS");
        assert_eq!(Status::Completed.as_query_str(), "COMPLETED");
    }
}
