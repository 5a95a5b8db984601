//! Sensor endpoints
//!
//! Reads go straight to the store. The rename endpoint writes through
//! `EntityStore::update`, which publishes the change the bus broadcasts, so
//! no handler calls the bus directly.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::ApiError;
use crate::api::websocket::state::AppState;
use crate::types::{Entity, EntityBrief, SyncError};
use crate::utils::current_timestamp_ms;

/// Body of `GET /sensors/list`
#[derive(Debug, Serialize, Deserialize)]
pub struct SensorList {
    pub result: Vec<EntityBrief>,
}

/// Body of `PUT /sensors/details/:id`
#[derive(Debug, Deserialize)]
pub struct UpdateSensorRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl UpdateSensorRequest {
    /// The trimmed, non-empty name
    pub fn validated_name(&self) -> Result<&str, SyncError> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SyncError::Validation("Name is required".to_string()))
    }
}

/// GET /sensors/list - Ids of every sensor
pub async fn list_sensors(State(state): State<Arc<AppState>>) -> Json<SensorList> {
    let result = state.store.list().iter().map(Entity::brief).collect();
    Json(SensorList { result })
}

/// GET /sensors/details/:id - Full sensor
pub async fn get_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Entity>, ApiError> {
    Ok(Json(state.store.get(&id)?))
}

/// PUT /sensors/details/:id - Rename a sensor
pub async fn update_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<UpdateSensorRequest>, JsonRejection>,
) -> Result<Json<Entity>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let name = request.validated_name()?;

    let updated = state.store.update(&id, |attrs| {
        attrs.insert("name".into(), json!(name));
        attrs.insert("updatedAt".into(), json!(current_timestamp_ms()));
    })?;

    info!(%id, %name, "sensor renamed");
    Ok(Json(updated))
}
