//! Invalidation notice wire format
//!
//! Server → client frames are `{"entity": [<segments>...]}`. There is no
//! sequence number: delivery is lossy and clients recover through the
//! bootstrap notice sent on every (re)connect.

use serde::{Deserialize, Serialize};

use super::{EntityPath, SyncError, SyncResult};

/// Announces that cached data under `path` may be stale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationNotice {
    #[serde(rename = "entity")]
    pub path: EntityPath,
}

impl InvalidationNotice {
    pub fn new(path: EntityPath) -> Self {
        Self { path }
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame. Anything that is not a well-formed notice is a
    /// protocol error.
    pub fn decode(frame: &str) -> SyncResult<Self> {
        serde_json::from_str(frame).map_err(|e| SyncError::Protocol(e.to_string()))
    }
}

impl From<EntityPath> for InvalidationNotice {
    fn from(path: EntityPath) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let notice = InvalidationNotice::new(EntityPath::details("sensors", "sensor-3"));
        assert_eq!(
            notice.encode().unwrap(),
            r#"{"entity":["sensors","details","sensor-3"]}"#
        );
    }

    #[test]
    fn test_decode_collection_notice() {
        let notice = InvalidationNotice::decode(r#"{"entity":["sensors"]}"#).unwrap();
        assert_eq!(notice.path, EntityPath::collection("sensors"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for frame in [
            "Echo: hello",
            "{}",
            r#"{"entity":[]}"#,
            r#"{"entity":"sensors"}"#,
            r#"{"entity":[1,2]}"#,
        ] {
            let result = InvalidationNotice::decode(frame);
            assert!(
                matches!(result, Err(SyncError::Protocol(_))),
                "frame {frame:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let notice =
            InvalidationNotice::decode(r#"{"entity":["sensors","list"],"origin":"test"}"#).unwrap();
        assert_eq!(notice.path, EntityPath::list("sensors"));
    }
}
