//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use super::rest::sensors;
use super::websocket::{handler::ws_handler, state::AppState};

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration - allow all origins for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Health check
        .route("/health", get(health_check))
        // REST API endpoints
        .route("/sensors/list", get(sensors::list_sensors))
        .route(
            "/sensors/details/:id",
            get(sensors::get_sensor).put(sensors::update_sensor),
        )
        .layer(cors)
        .with_state(state)
}

async fn root() -> &'static str {
    "Hello from sensor-sync!"
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::websocket::InvalidationBus;
    use crate::store::EntityStore;
    use crate::types::Entity;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(EntityStore::new("sensors"));
        for i in 1..=5 {
            store.insert(
                Entity::new(format!("sensor-{i}")).with_attribute("name", format!("Sensor {i}")),
            );
        }
        Arc::new(AppState::new(store, Arc::new(InvalidationBus::default())))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn put_name(id: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::PUT)
            .uri(format!("/sensors/details/{id}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_list_sensors() {
        let app = create_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/sensors/list").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["result"].as_array().unwrap().len(), 5);
        assert_eq!(body["result"][0], json!({"id": "sensor-1"}));
    }

    #[tokio::test]
    async fn test_get_sensor_and_not_found() {
        let state = test_state();

        let response = create_router(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .uri("/sensors/details/sensor-2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "Sensor 2");

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/sensors/details/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "Sensor not found"}));
    }

    #[tokio::test]
    async fn test_put_validates_name() {
        let state = test_state();

        let response = create_router(Arc::clone(&state))
            .oneshot(put_name("sensor-1", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"error": "Name is required"}));

        let response = create_router(Arc::clone(&state))
            .oneshot(put_name("sensor-1", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = create_router(state)
            .oneshot(put_name("ghost", r#"{"name":"X"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_updates_and_broadcasts() {
        let state = test_state();
        let (link, mut rx) = state.bus.channel();
        state.bus.register(link);
        let forwarder = state.bus.attach(&state.store);

        let response = create_router(Arc::clone(&state))
            .oneshot(put_name("sensor-3", r#"{"name":"X"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], "sensor-3");
        assert_eq!(body["name"], "X");

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, r#"{"entity":["sensors","details","sensor-3"]}"#);

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/sensors/details/sensor-3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["name"], "X");
        forwarder.abort();
    }
}
