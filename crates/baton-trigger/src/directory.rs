use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Identity of an observed object (the clock hand, its animated body, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Read-only view of externally owned object metadata.
pub trait ObjectDirectory: Send + Sync {
    /// Animated body the object drives, or `None` when the object is not linked to one.
    fn linked_body(&self, object: &ObjectId) -> Option<ObjectId>;

    fn position(&self, object: &ObjectId) -> Option<Position>;

    /// Whether `body` currently exposes animation properties that can be restarted.
    fn has_animation(&self, body: &ObjectId) -> bool;
}

/// One entry of a [`StaticDirectory`], as loaded from a host-provided JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub id: ObjectId,
    #[serde(default, alias = "clockBody")]
    pub linked_body: Option<ObjectId>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub animation: bool,
}

/// In-memory directory; records can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    records: RwLock<HashMap<ObjectId, ObjectRecord>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = ObjectRecord>) -> Self {
        let dir = Self::new();
        for record in records {
            dir.insert(record);
        }
        dir
    }

    pub fn insert(&self, record: ObjectRecord) {
        self.records
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(record.id.clone(), record);
    }

    pub fn set_animation(&self, object: &ObjectId, animation: bool) {
        if let Some(record) = self
            .records
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .get_mut(object)
        {
            record.animation = animation;
        }
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .records
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn with_record<T>(&self, object: &ObjectId, f: impl FnOnce(&ObjectRecord) -> T) -> Option<T> {
        self.records
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(object)
            .map(f)
    }
}

impl ObjectDirectory for StaticDirectory {
    fn linked_body(&self, object: &ObjectId) -> Option<ObjectId> {
        self.with_record(object, |record| record.linked_body.clone())
            .flatten()
    }

    fn position(&self, object: &ObjectId) -> Option<Position> {
        self.with_record(object, |record| record.position).flatten()
    }

    fn has_animation(&self, body: &ObjectId) -> bool {
        self.with_record(body, |record| record.animation)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_records_from_json() {
        let raw = r#"[
            {"id": "hand-1", "clockBody": "body-1", "position": {"x": 1.0, "y": 2.0, "z": 3.0}},
            {"id": "body-1", "animation": true},
            {"id": "orphan"}
        ]"#;
        let records: Vec<ObjectRecord> = serde_json::from_str(raw).unwrap();
        let dir = StaticDirectory::from_records(records);

        let hand = ObjectId::from("hand-1");
        let body = ObjectId::from("body-1");
        assert_eq!(dir.linked_body(&hand), Some(body.clone()));
        assert_eq!(
            dir.position(&hand),
            Some(Position {
                x: 1.0,
                y: 2.0,
                z: 3.0
            })
        );
        assert!(dir.has_animation(&body));
        assert!(!dir.has_animation(&hand));
        assert_eq!(dir.linked_body(&ObjectId::from("orphan")), None);
        assert_eq!(dir.linked_body(&ObjectId::from("missing")), None);

        dir.set_animation(&body, false);
        assert!(!dir.has_animation(&body));
        assert_eq!(dir.ids().len(), 3);
    }
}
