//! Item assembly and attachment normalization.
//!
//! A recurring series is stored as separate rows: one master plus any
//! detached exceptions. [`merge_instances`] reassembles them into a single
//! self-contained [`Document`], carrying definitions for every timezone
//! the instances reference. [`inline_local_attachments`] and
//! [`externalize_attachments`] convert between local-file attachment
//! references and inline base64 content, losslessly in both directions.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use tracing::debug;

use pim_data_rs::{Attachment, CalTime, Component, Document, RecurrenceService, TimeZoneDef};

/// Errors that can occur during assembly and attachment normalization.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// `merge_instances` was called with no instances.
    #[error("no instances to merge")]
    NoInstances,

    /// The instances do not belong to one series.
    #[error("instances mix uids '{first}' and '{second}'")]
    MixedUids {
        /// UID of the first instance.
        first: String,
        /// The disagreeing UID.
        second: String,
    },

    /// Reading or writing an attachment file failed.
    #[error("attachment i/o failed for '{path}': {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Inline attachment content that is not valid base64.
    #[error("attachment '{name}' is not valid base64: {message}")]
    BadEncoding {
        /// The attachment's stored base name.
        name: String,
        /// Decoder diagnostic.
        message: String,
    },
}

/// Result type for assembly operations.
pub type Result<T> = std::result::Result<T, AssemblyError>;

/// Combines the instances of one series (a master and zero or more
/// detached exceptions sharing a uid) into a single document, carrying a
/// [`TimeZoneDef`] for every zone the instances reference.
///
/// With `canonicalize_zone` set, zone identifiers that resolve through
/// `service` are rewritten to the zone's canonical location name - in the
/// instances and the carried definitions alike, so every reference and
/// its definition still agree after the rewrite. Identifiers that do not
/// resolve are left as they are.
///
/// # Errors
///
/// Returns `AssemblyError::NoInstances` for an empty slice and
/// `AssemblyError::MixedUids` when the instances span several series.
pub fn merge_instances(
    instances: &[Component],
    service: &dyn RecurrenceService,
    canonicalize_zone: bool,
) -> Result<Document> {
    let first = instances.first().ok_or(AssemblyError::NoInstances)?;
    for instance in instances {
        if instance.uid != first.uid {
            return Err(AssemblyError::MixedUids {
                first: first.uid.clone(),
                second: instance.uid.clone(),
            });
        }
    }

    let mut components: Vec<Component> = instances.to_vec();
    // Master first, exceptions in recurrence-id order.
    components.sort_by(|a, b| a.recurrence_id.cmp(&b.recurrence_id));

    // Collect every referenced zone and decide its published identifier.
    let mut renames: BTreeMap<String, String> = BTreeMap::new();
    let mut timezones: Vec<TimeZoneDef> = Vec::new();
    for tzid in referenced_zones(&components) {
        let location = service
            .resolve_zone(&tzid)
            .map(|zone| zone.name().to_string());
        if canonicalize_zone {
            if let Some(location) = location {
                if location != tzid {
                    renames.insert(tzid.clone(), location.clone());
                }
                timezones.push(TimeZoneDef {
                    tzid: location.clone(),
                    location: Some(location),
                });
                continue;
            }
        }
        timezones.push(TimeZoneDef { tzid, location });
    }
    timezones.sort_by(|a, b| a.tzid.cmp(&b.tzid));
    timezones.dedup();

    if !renames.is_empty() {
        for component in &mut components {
            rewrite_zones(component, &renames);
        }
    }

    debug!(
        uid = %first.uid,
        instances = components.len(),
        zones = timezones.len(),
        "merged instances"
    );
    Ok(Document {
        timezones,
        components,
    })
}

/// Every distinct tzid referenced by the components' time values.
fn referenced_zones(components: &[Component]) -> Vec<String> {
    let mut zones: Vec<String> = components
        .iter()
        .flat_map(zone_refs)
        .map(str::to_string)
        .collect();
    zones.sort();
    zones.dedup();
    zones
}

/// The tzids one component references.
fn zone_refs(component: &Component) -> impl Iterator<Item = &str> + '_ {
    component
        .start
        .iter()
        .chain(component.end.iter())
        .chain(component.due.iter())
        .chain(component.exdates.iter())
        .filter_map(CalTime::tzid)
}

/// Rewrites every zone reference through the rename map.
fn rewrite_zones(component: &mut Component, renames: &BTreeMap<String, String>) {
    let mut rewrite = |time: &mut CalTime| {
        if let CalTime::Zoned { tzid, .. } = time {
            if let Some(renamed) = renames.get(tzid) {
                *tzid = renamed.clone();
            }
        }
    };

    if let Some(start) = component.start.as_mut() {
        rewrite(start);
    }
    if let Some(end) = component.end.as_mut() {
        rewrite(end);
    }
    if let Some(due) = component.due.as_mut() {
        rewrite(due);
    }
    for exdate in component.exdates.iter_mut() {
        rewrite(exdate);
    }
}

/// Replaces every local-file attachment reference in the document with
/// the file's content inlined as base64, tagged with the file's base
/// name. Remote references are left untouched.
///
/// # Errors
///
/// Returns `AssemblyError::Io` when a referenced file cannot be read.
pub fn inline_local_attachments(document: &mut Document) -> Result<()> {
    for component in &mut document.components {
        for attachment in &mut component.attachments {
            let Attachment::Local { path } = attachment else {
                continue;
            };
            let content = fs::read(path.as_path()).map_err(|e| AssemblyError::Io {
                path: path.clone(),
                source: e,
            })?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string());
            *attachment = Attachment::Inline {
                name,
                data: BASE64.encode(content),
            };
        }
    }
    Ok(())
}

/// The inverse of [`inline_local_attachments`]: writes every inline
/// attachment out to `dir` under its stored base name and replaces it
/// with a local-file reference. Content that came from
/// [`inline_local_attachments`] round-trips losslessly.
///
/// # Errors
///
/// Returns `AssemblyError::BadEncoding` for inline content that is not
/// valid base64, and `AssemblyError::Io` when a file cannot be written.
pub fn externalize_attachments(document: &mut Document, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| AssemblyError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for component in &mut document.components {
        for attachment in &mut component.attachments {
            let Attachment::Inline { name, data } = attachment else {
                continue;
            };
            let content = BASE64
                .decode(data.as_bytes())
                .map_err(|e| AssemblyError::BadEncoding {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            let path = dir.join(name.as_str());
            fs::write(&path, content).map_err(|e| AssemblyError::Io {
                path: path.clone(),
                source: e,
            })?;
            *attachment = Attachment::Local { path };
        }
    }
    Ok(())
}
