//! Entity paths used as invalidation targets and cache keys

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::{SyncError, SyncResult};

/// Ordered, non-empty sequence of segments naming a collection, an entity,
/// or a sub-resource of an entity.
///
/// ```
/// use sensor_sync::EntityPath;
///
/// let collection = EntityPath::collection("sensors");
/// let details = EntityPath::details("sensors", "sensor-3");
/// assert!(details.starts_with(&collection));
/// assert_eq!(details.to_string(), "sensors/details/sensor-3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityPath(Vec<String>);

impl EntityPath {
    /// Build a path from segments, rejecting an empty sequence
    pub fn new<I, S>(segments: I) -> SyncResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(SyncError::Validation(
                "entity path must have at least one segment".to_string(),
            ));
        }
        Ok(Self(segments))
    }

    /// `[collection]`
    pub fn collection(collection: impl Into<String>) -> Self {
        Self(vec![collection.into()])
    }

    /// `[collection, "list"]`
    pub fn list(collection: impl Into<String>) -> Self {
        Self(vec![collection.into(), "list".to_string()])
    }

    /// `[collection, "details", id]`
    pub fn details(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self(vec![collection.into(), "details".to_string(), id.into()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for the `len`/`is_empty` pair
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First segment, the collection this path belongs to
    pub fn root(&self) -> &str {
        &self.0[0]
    }

    /// True if `prefix` is equal to or a leading part of this path
    pub fn starts_with(&self, prefix: &EntityPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// True if either path is a prefix of the other.
    ///
    /// This is the invalidation matching rule: a notice for `["sensors"]`
    /// reaches everything under it, and a notice for an entity reaches the
    /// ancestor keys that contain it, but siblings never match.
    pub fn is_related(&self, other: &EntityPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl<'de> Deserialize<'de> for EntityPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let segments = Vec::<String>::deserialize(deserializer)?;
        EntityPath::new(segments).map_err(serde::de::Error::custom)
    }
}
