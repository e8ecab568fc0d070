use axum::{
    extract::{Path, State},
    Json,
};
use utoipa::OpenApi;

use super::{
    dto::{CommandRequest, EntityDto, HealthDto, SnapshotDto},
    errors::AppError,
    AppState,
};
use crate::{
    control::Command,
    entities::{EntityKind, NumberRange},
};

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Every bound entity rendered against the latest snapshot.
#[utoipa::path(
    get,
    path = "/entities",
    responses(
        (status = 200, description = "All entities", body = Vec<EntityDto>),
    ),
    tag = "entities"
)]
pub async fn list_entities(State(state): State<AppState>) -> Json<Vec<EntityDto>> {
    let mac = state.coordinator.client().mac_address().await;
    let current = state.coordinator.state();
    let entities = state
        .control
        .entities()
        .await
        .states(&current, mac.as_deref())
        .into_iter()
        .map(Into::into)
        .collect();
    Json(entities)
}

#[utoipa::path(
    get,
    path = "/entities/{key}",
    params(
        ("key" = String, Path, description = "Entity key, e.g. `chlor_output_0`"),
    ),
    responses(
        (status = 200, description = "Entity state", body = EntityDto),
        (status = 404, description = "Unknown entity"),
    ),
    tag = "entities"
)]
pub async fn get_entity(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EntityDto>, AppError> {
    render(&state, &key).await.map(Json)
}

/// Apply an action to an entity, then return its refreshed state.
///
/// Failed device writes answer `502` and leave the entity untouched.
#[utoipa::path(
    post,
    path = "/entities/{key}/command",
    params(
        ("key" = String, Path, description = "Entity key"),
    ),
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Command applied", body = EntityDto),
        (status = 400, description = "Action not supported or value invalid"),
        (status = 404, description = "Unknown entity"),
        (status = 502, description = "The hub rejected the write or did not answer"),
    ),
    tag = "entities"
)]
pub async fn post_command(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<EntityDto>, AppError> {
    let command = Command::from_action(&request.action, request.value.as_ref())?;
    state.control.execute(&key, command).await?;
    render(&state, &key).await.map(Json)
}

async fn render(state: &AppState, key: &str) -> Result<EntityDto, AppError> {
    let entities = state.control.entities().await;
    let entity = entities
        .get(key)
        .ok_or_else(|| AppError::NotFound(format!("unknown entity: {key}")))?;
    let mac = state.coordinator.client().mac_address().await;
    Ok(entity.state(&state.coordinator.state(), mac.as_deref()).into())
}

// ---------------------------------------------------------------------------
// Snapshot / refresh
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/snapshot",
    responses(
        (status = 200, description = "Latest raw snapshot and refresh status", body = SnapshotDto),
    ),
    tag = "device"
)]
pub async fn get_snapshot(State(state): State<AppState>) -> Json<SnapshotDto> {
    Json(SnapshotDto::from(&state.coordinator.state()))
}

/// Refresh now. Joins a refresh that is already running.
#[utoipa::path(
    post,
    path = "/refresh",
    responses(
        (status = 200, description = "Refresh succeeded", body = SnapshotDto),
        (status = 502, description = "Refresh failed; previous data kept"),
    ),
    tag = "device"
)]
pub async fn post_refresh(State(state): State<AppState>) -> Result<Json<SnapshotDto>, AppError> {
    state.coordinator.refresh().await?;
    Ok(Json(SnapshotDto::from(&state.coordinator.state())))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// `200 OK` while the server runs; `available` reports whether the hub answered
/// the last refresh.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is running", body = HealthDto),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthDto> {
    let current = state.coordinator.state();
    let mac_address = state.coordinator.client().mac_address().await;
    Json(HealthDto {
        status: "ok".to_owned(),
        available: current.last_update_success,
        stale: current.is_stale(),
        mac_address,
        firmware_version: current
            .snapshot
            .as_ref()
            .and_then(|s| s.firmware_version())
            .map(str::to_owned),
        last_success_at: current.last_success_at,
        last_error: current.last_error.as_ref().map(ToString::to_string),
    })
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(list_entities, get_entity, post_command, get_snapshot, post_refresh, health),
    components(schemas(EntityDto, EntityKind, NumberRange, CommandRequest, SnapshotDto, HealthDto)),
    tags(
        (name = "entities", description = "Entity state and commands"),
        (name = "device",   description = "Raw hub data and refresh"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "PoolSync Bridge API",
        version = "0.1.0",
        description = "REST API for a PoolSync pool equipment hub"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use wiremock::{
        matchers::{body_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{
        api::{router, AppState},
        config::TemperatureUnit,
        coordinator::RefreshCoordinator,
        entities::Entities,
        poolsync::{ClientOptions, PoolSyncClient},
    };

    fn hub_snapshot() -> Value {
        json!({
            "poolSync": {
                "system": { "macAddr": "AA:BB:CC", "fwVersion": "3.0.1" },
                "status": { "boardTemp": 40, "online": true }
            },
            "deviceType": { "0": "chlorSync", "1": "heatPump" },
            "devices": {
                "0": { "config": { "chlorOutput": 40 }, "status": { "waterTemp": 27, "boostRemaining": 0 } },
                "1": { "config": { "mode": 1, "setpoint": 28 }, "status": { "waterTemp": 26 } }
            }
        })
    }

    fn fetch_all() -> wiremock::MockBuilder {
        Mock::given(method("GET"))
            .and(path("/api/poolsync"))
            .and(query_param("cmd", "poolSync"))
    }

    /// Hub stub answering `fetch_all` with `hub_snapshot()`; coordinator
    /// already holds one refresh.
    async fn test_server(hub: &MockServer) -> (TestServer, AppState) {
        let mut options = ClientOptions::new(hub.uri());
        options.request_timeout = Duration::from_secs(2);
        let coordinator = RefreshCoordinator::new(PoolSyncClient::new(options));
        let first = coordinator.refresh().await;
        let entities = Entities::discover(
            first.as_ref().ok().map(|s| s.as_ref()),
            TemperatureUnit::Celsius,
        );
        let state = AppState::new(coordinator, entities);
        (TestServer::new(router(state.clone())).unwrap(), state)
    }

    async fn healthy_hub() -> MockServer {
        let hub = MockServer::start().await;
        fetch_all()
            .respond_with(ResponseTemplate::new(200).set_body_json(hub_snapshot()))
            .mount(&hub)
            .await;
        hub
    }

    // -----------------------------------------------------------------------
    // GET /health
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn health_reports_hub_identity() {
        let hub = healthy_hub().await;
        let (server, _) = test_server(&hub).await;

        let resp = server.get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["available"], true);
        assert_eq!(body["mac_address"], "AA:BB:CC");
        assert_eq!(body["firmware_version"], "3.0.1");
    }

    #[tokio::test]
    async fn health_is_ok_when_hub_is_down() {
        let hub = MockServer::start().await;
        fetch_all()
            .respond_with(ResponseTemplate::new(503))
            .mount(&hub)
            .await;
        let (server, _) = test_server(&hub).await;

        let resp = server.get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["available"], false);
        assert!(body["last_error"].as_str().unwrap().contains("503"));
    }

    // -----------------------------------------------------------------------
    // GET /entities
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn lists_entities_with_unique_ids() {
        let hub = healthy_hub().await;
        let (server, _) = test_server(&hub).await;

        let resp = server.get("/entities").await;
        resp.assert_status_ok();
        let body: Vec<Value> = resp.json();

        let water = body.iter().find(|e| e["key"] == "water_temp_c").unwrap();
        assert_eq!(water["unique_id"], "AA:BB:CC_water_temp_c");
        assert_eq!(water["value"], 27);
        assert_eq!(water["available"], true);
        assert_eq!(water["kind"], "sensor");

        assert!(body.iter().any(|e| e["key"] == "heat_pump_1" && e["kind"] == "climate"));
    }

    #[tokio::test]
    async fn get_entity_and_unknown_entity() {
        let hub = healthy_hub().await;
        let (server, _) = test_server(&hub).await;

        let resp = server.get("/entities/chlor_output_0").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["value"], 40.0);
        assert_eq!(body["range"]["max"], 100.0);

        let resp = server.get("/entities/nope").await;
        resp.assert_status(StatusCode::NOT_FOUND);
        let body: Value = resp.json();
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    // -----------------------------------------------------------------------
    // POST /entities/{key}/command
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn command_writes_and_returns_refreshed_entity() {
        let hub = MockServer::start().await;
        fetch_all()
            .respond_with(ResponseTemplate::new(200).set_body_json(hub_snapshot()))
            .up_to_n_times(1)
            .mount(&hub)
            .await;
        let mut after = hub_snapshot();
        after["devices"]["0"]["config"]["chlorOutput"] = json!(57);
        fetch_all()
            .respond_with(ResponseTemplate::new(200).set_body_json(after))
            .mount(&hub)
            .await;
        Mock::given(method("PATCH"))
            .and(query_param("device", "0"))
            .and(body_json(json!({ "config": { "chlorOutput": 57 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&hub)
            .await;
        let (server, _) = test_server(&hub).await;

        let resp = server
            .post("/entities/chlor_output_0/command")
            .json(&json!({ "action": "set_value", "value": 56.6 }))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["value"], 57.0);
    }

    #[tokio::test]
    async fn command_validation_errors_are_400() {
        let hub = healthy_hub().await;
        let (server, _) = test_server(&hub).await;

        server
            .post("/entities/boost_0/command")
            .json(&json!({ "action": "set_value", "value": 1 }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/entities/heat_setpoint_1/command")
            .json(&json!({ "action": "set_value", "value": 90 }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/entities/heat_pump_1/command")
            .json(&json!({ "action": "set_hvac_mode", "value": "auto" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_write_is_502() {
        let hub = healthy_hub().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500).set_body_string("busy"))
            .mount(&hub)
            .await;
        let (server, _) = test_server(&hub).await;

        let resp = server
            .post("/entities/boost_0/command")
            .json(&json!({ "action": "turn_on" }))
            .await;
        resp.assert_status(StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn ping_is_accepted_while_hub_is_down() {
        let hub = MockServer::start().await;
        fetch_all()
            .respond_with(ResponseTemplate::new(503))
            .mount(&hub)
            .await;
        let (server, _) = test_server(&hub).await;

        let resp = server
            .post("/entities/ping/command")
            .json(&json!({ "action": "press" }))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["available"], true);
    }

    // -----------------------------------------------------------------------
    // /snapshot and /refresh
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn snapshot_is_served_raw() {
        let hub = healthy_hub().await;
        let (server, _) = test_server(&hub).await;

        let resp = server.get("/snapshot").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["snapshot"], hub_snapshot());
        assert_eq!(body["stale"], false);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_data_and_returns_502() {
        let hub = MockServer::start().await;
        fetch_all()
            .respond_with(ResponseTemplate::new(200).set_body_json(hub_snapshot()))
            .up_to_n_times(1)
            .mount(&hub)
            .await;
        fetch_all()
            .respond_with(ResponseTemplate::new(500))
            .mount(&hub)
            .await;
        let (server, state) = test_server(&hub).await;

        server
            .post("/refresh")
            .await
            .assert_status(StatusCode::BAD_GATEWAY);

        assert!(state.coordinator.state().is_stale());
        let body: Value = server.get("/snapshot").await.json();
        assert_eq!(body["stale"], true);
        assert_eq!(body["snapshot"], hub_snapshot());
    }

    // -----------------------------------------------------------------------
    // GET /api-docs/openapi.json
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn openapi_document_is_served() {
        let hub = healthy_hub().await;
        let (server, _) = test_server(&hub).await;

        let resp = server.get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "PoolSync Bridge API");
        assert!(body["paths"]["/entities/{key}/command"].is_object());
    }
}
