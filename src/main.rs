use std::sync::Arc;

use catalog_auth::config::{environment::Config, init_db};
use catalog_auth::modules::auth::{crud::AuthCrud, service::AuthRepositories};
use catalog_auth::services::jwt::JwtService;
use catalog_auth::services::rate_limit::{InMemoryRateLimiter, RateLimitStore, RedisRateLimiter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = init_db(&config.database_url).await?;
    tracing::info!("Connected to MySQL");

    let max_attempts = config.auth.rate_limit_max_attempts;
    let window = config.auth.rate_limit_window;
    let rate_limiter: Arc<dyn RateLimitStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis rate limiter");
            Arc::new(RedisRateLimiter::new(url, max_attempts, window)?)
        }
        None => {
            tracing::warn!("REDIS_URL not set, rate limits are per process");
            Arc::new(InMemoryRateLimiter::new(max_attempts, window)?)
        }
    };

    let jwt_service = JwtService::new(&config.jwt_secret, config.auth.session_ttl);

    let app = catalog_auth::create_app(
        AuthRepositories::from_store(AuthCrud::new(db)),
        rate_limiter,
        jwt_service,
        config.auth,
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server running on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
