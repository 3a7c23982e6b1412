pub mod airports;
pub mod auth;
pub mod error;
pub mod metars;
pub mod rate_limit;
pub mod users;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Largest accepted airport import body
pub const MAX_IMPORT_BYTES: usize = 64 * 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Session management, limited more strictly than the rest of the API
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/refresh", get(auth::refresh))
        .route("/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let api_routes = Router::new()
        // Airports
        .route(
            "/airports",
            get(airports::list_airports)
                .post(airports::create_airport)
                .delete(airports::delete_all_airports),
        )
        .route(
            "/airports/import",
            post(airports::import_airports).layer(DefaultBodyLimit::max(MAX_IMPORT_BYTES)),
        )
        .route(
            "/airports/:icao",
            get(airports::get_airport)
                .put(airports::update_airport)
                .delete(airports::delete_airport),
        )
        // Observations
        .route("/metars", get(metars::list_metars))
        .route("/metars/:icaos", get(metars::get_metars))
        // Per-user data
        .route("/users/favorites", get(users::list_favorites))
        .route(
            "/users/favorites/:icao",
            post(users::add_favorite).delete(users::remove_favorite),
        )
        .route(
            "/users/picture",
            get(users::get_picture)
                .post(users::upload_picture)
                .delete(users::delete_picture)
                // Room for the multipart framing around the file
                .layer(DefaultBodyLimit::max(users::MAX_PICTURE_BYTES + 64 * 1024)),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/auth", auth_routes)
        .merge(api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentials are allowed, so an empty origin list mirrors the caller's
/// origin instead of answering with a wildcard.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_credentials(true)
}

async fn health_check() -> &'static str {
    "OK"
}
