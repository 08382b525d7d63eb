//! Provider-neutral item model for the pimsync data layer.
//!
//! This crate defines the typed content of one stored calendar/contact item
//! (the [`Component`]), the container document produced when a recurring
//! series is reassembled ([`Document`]), and the recurrence expansion
//! service consumed by the cache's query engine ([`RecurrenceService`]).
//!
//! The cache crate (`pim-cache-rs`) stores components as opaque serialized
//! payloads and decodes them back through [`Component::decode`]; everything
//! here round-trips through serde.

pub mod component;
pub mod document;
pub mod error;
pub mod recur;
pub mod time;

pub use component::{
    Alarm, Attachment, Attendee, Classification, Component, ComponentKey, Status,
};
pub use document::Document;
pub use error::{DataError, DataResult};
pub use recur::{AlarmInstance, Occurrence, RecurrenceService, RruleExpander};
pub use time::{CalTime, TimeZoneDef};
