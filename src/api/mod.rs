pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{control::ControlService, coordinator::RefreshCoordinator, entities::Entities};
use handlers::ApiDoc;

/// Shared handler state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub coordinator: RefreshCoordinator,
    pub control: ControlService,
}

impl AppState {
    pub fn new(coordinator: RefreshCoordinator, entities: Entities) -> Self {
        let control = ControlService::new(coordinator.clone(), entities);
        Self {
            coordinator,
            control,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/health", get(handlers::health))
        .route("/entities", get(handlers::list_entities))
        .route("/entities/{key}", get(handlers::get_entity))
        .route("/entities/{key}/command", post(handlers::post_command))
        .route("/snapshot", get(handlers::get_snapshot))
        .route("/refresh", post(handlers::post_refresh))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}
