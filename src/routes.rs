// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, health, progress, ranking, sessions},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Every route except health requires a bearer token.
/// * Admin routes additionally require the admin role.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let test_routes = Router::new()
        .route("/", post(sessions::create_test))
        .route("/preview", post(sessions::preview_test))
        .route("/{id}/answers", post(sessions::submit_answer))
        .route("/{id}/complete", post(sessions::complete_test));

    let progress_routes = Router::new()
        .route("/topics", get(progress::list_topic_progress))
        .route("/topics/{topic}", get(progress::get_topic_progress))
        .route("/readiness", post(progress::get_readiness));

    let ranking_routes = Router::new()
        .route("/", get(ranking::get_ranking))
        .route("/period", get(ranking::get_period_ranking));

    let medal_routes = Router::new().route("/me", get(ranking::list_my_medals));

    // Auth first, then admin check
    let admin_routes = Router::new()
        .route("/medals", post(admin::award_medals))
        .route("/progress/{user_id}/verify", post(admin::verify_progress))
        .layer(middleware::from_fn(admin_middleware));

    let protected = Router::new()
        .nest("/tests", test_routes)
        .nest("/progress", progress_routes)
        .nest("/ranking", ranking_routes)
        .nest("/medals", medal_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/api/health", get(health::health_check))
        .nest("/api", protected)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
