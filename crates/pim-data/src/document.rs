//! The container document produced by item assembly.

use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::time::TimeZoneDef;

/// A self-contained document: one recurring series (master plus detached
/// exceptions) together with the timezone definitions its instances
/// reference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    /// Definitions for every zone referenced by the components.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timezones: Vec<TimeZoneDef>,

    /// The instances, master first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
}

impl Document {
    /// Returns the master instance, if present.
    pub fn master(&self) -> Option<&Component> {
        self.components.iter().find(|c| c.recurrence_id.is_none())
    }

    /// Returns the timezone definition for a tzid, if carried.
    pub fn timezone(&self, tzid: &str) -> Option<&TimeZoneDef> {
        self.timezones.iter().find(|tz| tz.tzid == tzid)
    }
}
