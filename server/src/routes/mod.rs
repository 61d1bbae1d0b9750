use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::registrations::{
    event_roster, my_registrations, register_for_event, register_for_program,
    registration_status,
};
use crate::handlers::verification::verify_registration;
use crate::handlers::health_check;
use crate::state::AppState;

pub fn create_routes(state: AppState, config: &Config) -> Router {
    let registrations = Router::new()
        .route(
            "/events/:event_id/registrations",
            post(register_for_event).get(event_roster),
        )
        .route(
            "/events/:event_id/registrations/status",
            get(registration_status),
        )
        .route(
            "/events/:event_id/programs/:program_id/registrations",
            post(register_for_program),
        )
        .route("/me/registrations", get(my_registrations))
        .route(
            "/verify/:event_id/:registration_id",
            get(verify_registration),
        );

    Router::new()
        .route("/health", get(health_check))
        .merge(registrations)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(config.production))
        .layer(create_cors_layer(&config.cors_allowed_origins))
}
