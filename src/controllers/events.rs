use std::fmt::Display;

use crate::crd::{GroupVersion, MultiVersionedUpstream};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Add,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Add => "add",
            EventType::Update => "update",
            EventType::Delete => "delete",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work of the upstream queue. Update events carry the previously seen object, delete events the last
/// known state of the deleted one.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub key: String,
    pub group_version: GroupVersion,
    pub old_object: Option<MultiVersionedUpstream>,
    pub tombstone: Option<MultiVersionedUpstream>,
}

impl Event {
    pub fn add(key: String, group_version: GroupVersion) -> Self {
        Self {
            event_type: EventType::Add,
            key,
            group_version,
            old_object: None,
            tombstone: None,
        }
    }

    pub fn update(key: String, old_object: MultiVersionedUpstream) -> Self {
        Self {
            event_type: EventType::Update,
            key,
            group_version: old_object.group_version(),
            old_object: Some(old_object),
            tombstone: None,
        }
    }

    pub fn delete(key: String, tombstone: MultiVersionedUpstream) -> Self {
        Self {
            event_type: EventType::Delete,
            key,
            group_version: tombstone.group_version(),
            old_object: None,
            tombstone: Some(tombstone),
        }
    }

    pub fn is_delete(&self) -> bool {
        self.event_type == EventType::Delete
    }
}

/// What a delete event resolves to once the cache has been consulted.
#[derive(Clone, Debug, PartialEq)]
pub enum DeleteView {
    /// An object with the same key exists again, the delete is stale.
    Live(MultiVersionedUpstream),
    Deleted(MultiVersionedUpstream),
}

impl DeleteView {
    pub fn resolve(live: Option<MultiVersionedUpstream>, tombstone: Option<MultiVersionedUpstream>) -> Option<Self> {
        match (live, tombstone) {
            (Some(live), _) => Some(DeleteView::Live(live)),
            (None, Some(tombstone)) => Some(DeleteView::Deleted(tombstone)),
            (None, None) => None,
        }
    }
}
