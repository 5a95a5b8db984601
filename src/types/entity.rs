//! Entity types for the sensor store

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server-held piece of state identified by a stable id.
///
/// Serialized as a flat JSON object: `{"id": "...", <attributes>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    /// Create a new entity with no attributes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set an attribute, ignoring attempts to shadow `id`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != "id" {
            self.attributes.insert(key, value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Display name, if the entity carries one
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    pub fn brief(&self) -> EntityBrief {
        EntityBrief {
            id: self.id.clone(),
        }
    }
}

/// Id-only view used by list endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBrief {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_serializes_flat() {
        let entity = Entity::new("sensor-1")
            .with_attribute("name", "Sensor 1")
            .with_attribute("latitude", 52.5);

        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(
            value,
            json!({"id": "sensor-1", "name": "Sensor 1", "latitude": 52.5})
        );
    }

    #[test]
    fn test_entity_roundtrip_keeps_attributes() {
        let parsed: Entity =
            serde_json::from_str(r#"{"id":"sensor-2","name":"Dock","online":true}"#).unwrap();
        assert_eq!(parsed.id, "sensor-2");
        assert_eq!(parsed.name(), Some("Dock"));
        assert_eq!(parsed.get("online"), Some(&json!(true)));
        assert!(!parsed.attributes.contains_key("id"));
    }

    #[test]
    fn test_set_refuses_id_attribute() {
        let mut entity = Entity::new("sensor-3");
        entity.set("id", "hijacked");
        assert_eq!(entity.id, "sensor-3");
        assert!(entity.attributes.is_empty());
    }
}
