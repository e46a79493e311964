use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::controller;
use crate::AppState;

pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(controller::register))
        .route("/login", post(controller::login))
        .route("/logout", post(controller::logout))
        .route("/me", get(controller::me))
        .route("/2fa/setup", post(controller::setup_two_factor))
        .route("/2fa/enable", post(controller::enable_two_factor))
        .route("/2fa/verify", post(controller::verify_two_factor))
        .route("/2fa/disable", post(controller::disable_two_factor))
        .route("/2fa/backup-codes", post(controller::regenerate_backup_codes))
        .route("/2fa/reset", post(controller::reset_two_factor))
        .route(
            "/recover-password/verify-email",
            post(controller::verify_recovery),
        )
        .route("/recover-password", post(controller::recover_password))
}
