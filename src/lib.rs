pub mod config;
pub mod modules;
pub mod services;

use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use config::AuthConfig;
use modules::auth::auth_routes;
use modules::auth::service::{AuthRepositories, AuthService};
use services::cookies::CookieSettings;
use services::jwt::JwtService;
use services::rate_limit::RateLimitStore;
use services::security::security_headers;

pub struct AppState {
    pub auth: AuthService,
    pub jwt_service: Arc<JwtService>,
    pub cookies: CookieSettings,
}

pub fn create_app(
    repos: AuthRepositories,
    rate_limiter: Arc<dyn RateLimitStore>,
    jwt_service: JwtService,
    config: AuthConfig,
) -> Router {
    let jwt_service = Arc::new(jwt_service);
    let state = Arc::new(AppState {
        cookies: CookieSettings::for_app(&config.app_name, config.cookie_secure),
        auth: AuthService::new(repos, rate_limiter, jwt_service.clone(), config),
        jwt_service,
    });

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/auth", auth_routes())
        .layer(middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(1024 * 100)) // 100KB max body
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "Catalog Auth API"
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
