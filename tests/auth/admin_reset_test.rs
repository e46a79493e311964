use axum::http::StatusCode;
use serde_json::json;

use crate::common::{test_password, TestContext, SESSION_COOKIE};
use catalog_auth::modules::auth::model::AuditAction;

#[tokio::test]
async fn admin_can_reset_another_users_2fa() {
    let ctx = TestContext::new();
    let admin = ctx.enrolled_account().await;
    let target = ctx.enrolled_account().await;

    ctx.store
        .update_user(&admin.user_id, |user| user.is_admin = true)
        .await;

    let response = ctx
        .server
        .post("/auth/2fa/reset")
        .add_cookie(admin.session)
        .json(&json!({ "userId": &target.user_id }))
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["enabled"], false);

    let login = ctx.login(&target.email, test_password()).await;
    let body: serde_json::Value = login.json();
    assert_eq!(body["requires2FA"], false);
    assert_eq!(body["requiresSetup"], true);

    let actions = ctx.store.audit_actions(&target.user_id).await;
    assert!(actions.contains(&AuditAction::TwoFactorReset));
}

#[tokio::test]
async fn non_admin_reset_returns_forbidden() {
    let ctx = TestContext::new();
    let user = ctx.enrolled_account().await;
    let target = ctx.enrolled_account().await;

    let response = ctx
        .server
        .post("/auth/2fa/reset")
        .add_cookie(user.session)
        .json(&json!({ "userId": &target.user_id }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);

    let login = ctx.login(&target.email, test_password()).await;
    let body: serde_json::Value = login.json();
    assert_eq!(body["requires2FA"], true);
}

#[tokio::test]
async fn revoked_admin_role_takes_effect_on_live_session() {
    let ctx = TestContext::new();
    let admin = ctx.enrolled_account().await;
    let target = ctx.enrolled_account().await;

    ctx.store
        .update_user(&admin.user_id, |user| user.is_admin = true)
        .await;

    // Fresh session whose token claims the admin role.
    let pending = ctx.pending_login(&admin).await;
    let verify = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(pending)
        .json(&json!({
            "userId": &admin.user_id,
            "code": ctx.totp_code(&admin.secret, 1)
        }))
        .await;
    verify.assert_status(StatusCode::OK);
    let body: serde_json::Value = verify.json();
    assert_eq!(body["user"]["isAdmin"], true);
    let session = verify.cookie(SESSION_COOKIE);

    ctx.store
        .update_user(&admin.user_id, |user| user.is_admin = false)
        .await;

    let response = ctx
        .server
        .post("/auth/2fa/reset")
        .add_cookie(session)
        .json(&json!({ "userId": &target.user_id }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reset_for_unknown_user_returns_bad_request() {
    let ctx = TestContext::new();
    let admin = ctx.enrolled_account().await;

    ctx.store
        .update_user(&admin.user_id, |user| user.is_admin = true)
        .await;

    let response = ctx
        .server
        .post("/auth/2fa/reset")
        .add_cookie(admin.session)
        .json(&json!({ "userId": "no-such-user" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reset_without_session_returns_unauthorized() {
    let ctx = TestContext::new();

    let response = ctx
        .server
        .post("/auth/2fa/reset")
        .json(&json!({ "userId": "anyone" }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}
