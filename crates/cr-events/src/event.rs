//! The wire-level event type and its four kinds.

use serde::{Deserialize, Serialize};

/// Kind of filesystem change an [`Event`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new object was created.
    Create,
    /// An existing object's content changed.
    Modify,
    /// An object moved from one path to another.
    Rename,
    /// An object was removed.
    Delete,
}

/// A single filesystem-change notification for one object.
///
/// `to` is only meaningful for [`EventType::Rename`] and is empty
/// otherwise; timestamps are not carried (ordering is defined purely by
/// arrival order at the publisher, see the event algebra).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Event {
    /// The kind of change this event describes.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Opaque identifier for the object, stable across renames.
    pub file_id: String,
    /// Path of the object at emission time.
    pub from: String,
    /// Destination path; only populated for `Rename`.
    #[serde(default)]
    pub to: String,
}

impl EventType {
    /// Lowercase label used for metric dimensions and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Rename => "rename",
            Self::Delete => "delete",
        }
    }
}

impl Event {
    /// Construct a `Create`, `Modify`, or `Delete` event (no destination path).
    #[must_use]
    pub fn new(kind: EventType, file_id: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            kind,
            file_id: file_id.into(),
            from: from.into(),
            to: String::new(),
        }
    }

    /// Construct a `Rename` event carrying both endpoints of the move.
    #[must_use]
    pub fn rename(file_id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: EventType::Rename,
            file_id: file_id.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}
