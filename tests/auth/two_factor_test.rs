use axum::http::StatusCode;
use serde_json::json;

use crate::common::{
    test_config, test_email, test_password, TestContext, PENDING_COOKIE, SESSION_COOKIE,
};
use catalog_auth::config::AuthConfig;
use catalog_auth::modules::auth::interface::TwoFactorRepository;
use catalog_auth::modules::auth::model::AuditAction;

/// Registers an exempt user and returns (user_id, session cookie).
async fn exempt_session(ctx: &TestContext) -> (String, cookie::Cookie<'static>) {
    let email = test_email();
    let registered = ctx.register(&email).await;
    ctx.store
        .update_user(&registered.user_id, |user| user.two_factor_exempt = true)
        .await;

    let response = ctx.login(&email, test_password()).await;
    (registered.user_id, response.cookie(SESSION_COOKIE))
}

// =============================================================================
// SETUP & ENABLE
// =============================================================================

#[tokio::test]
async fn setup_returns_secret_qr_and_backup_codes() {
    let ctx = TestContext::new();
    let email = test_email();
    let registered = ctx.register(&email).await;
    let login = ctx.login(&email, test_password()).await;

    let response = ctx
        .server
        .post("/auth/2fa/setup")
        .add_cookie(login.cookie(PENDING_COOKIE))
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert!(!body["secret"].as_str().unwrap().is_empty());
    assert!(!body["qrCode"].as_str().unwrap().is_empty());
    assert!(body["otpauthUrl"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));
    assert_eq!(body["backupCodes"].as_array().unwrap().len(), 10);

    // Staged only.
    let staged = TwoFactorRepository::find(&ctx.store, &registered.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!staged.enabled);
}

#[tokio::test]
async fn setup_without_credentials_returns_unauthorized() {
    let ctx = TestContext::new();

    let response = ctx.server.post("/auth/2fa/setup").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn enable_via_setup_token_completes_login() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    assert!(!account.session.value().is_empty());

    let me = ctx
        .server
        .get("/auth/me")
        .add_cookie(account.session.clone())
        .await;
    me.assert_status(StatusCode::OK);

    let body: serde_json::Value = me.json();
    assert_eq!(body["id"], account.user_id.as_str());

    let actions = ctx.store.audit_actions(&account.user_id).await;
    assert!(actions.contains(&AuditAction::TwoFactorSetup));
    assert!(actions.contains(&AuditAction::TwoFactorEnabled));
}

#[tokio::test]
async fn enable_with_wrong_code_keeps_secret_staged() {
    let ctx = TestContext::new();
    let email = test_email();
    let registered = ctx.register(&email).await;
    let login = ctx.login(&email, test_password()).await;
    let setup_cookie = login.cookie(PENDING_COOKIE);

    let setup = ctx
        .server
        .post("/auth/2fa/setup")
        .add_cookie(setup_cookie.clone())
        .await;
    let body: serde_json::Value = setup.json();
    let secret = body["secret"].as_str().unwrap();
    let wrong = ctx.totp_code(secret, 10);

    let response = ctx
        .server
        .post("/auth/2fa/enable")
        .add_cookie(setup_cookie)
        .json(&json!({ "code": wrong }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.maybe_cookie(SESSION_COOKIE).is_none());

    let staged = TwoFactorRepository::find(&ctx.store, &registered.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!staged.enabled);
}

#[tokio::test]
async fn enable_without_setup_returns_bad_request() {
    let ctx = TestContext::new();
    let (_, session) = exempt_session(&ctx).await;

    let response = ctx
        .server
        .post("/auth/2fa/enable")
        .add_cookie(session)
        .json(&json!({ "code": "123456" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enable_from_session_does_not_reissue_session() {
    let ctx = TestContext::new();
    let (_, session) = exempt_session(&ctx).await;

    let setup = ctx
        .server
        .post("/auth/2fa/setup")
        .add_cookie(session.clone())
        .await;
    setup.assert_status(StatusCode::OK);
    let body: serde_json::Value = setup.json();
    let code = ctx.totp_code(body["secret"].as_str().unwrap(), 0);

    let response = ctx
        .server
        .post("/auth/2fa/enable")
        .add_cookie(session)
        .json(&json!({ "code": code }))
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["enabled"], true);
    assert!(body.get("user").is_none());
    assert!(response.maybe_cookie(SESSION_COOKIE).is_none());
}

#[tokio::test]
async fn setup_when_already_enabled_returns_conflict() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = ctx
        .server
        .post("/auth/2fa/setup")
        .add_cookie(account.session)
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

// =============================================================================
// VERIFY (second login step)
// =============================================================================

#[tokio::test]
async fn verify_with_totp_code_issues_session() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;
    let pending = ctx.pending_login(&account).await;

    let response = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(pending)
        .json(&json!({
            "userId": &account.user_id,
            "code": ctx.totp_code(&account.secret, 1)
        }))
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["user"]["id"], account.user_id.as_str());

    let session = response.cookie(SESSION_COOKIE);
    let me = ctx.server.get("/auth/me").add_cookie(session).await;
    me.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn verify_with_wrong_code_returns_unauthorized() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;
    let pending = ctx.pending_login(&account).await;

    let response = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(pending)
        .json(&json!({
            "userId": &account.user_id,
            "code": ctx.totp_code(&account.secret, 10)
        }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.maybe_cookie(SESSION_COOKIE).is_none());
}

#[tokio::test]
async fn verify_rejects_replayed_totp_code() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;
    let code = ctx.totp_code(&account.secret, 1);

    let first = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(ctx.pending_login(&account).await)
        .json(&json!({ "userId": &account.user_id, "code": &code }))
        .await;
    first.assert_status(StatusCode::OK);

    let replay = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(ctx.pending_login(&account).await)
        .json(&json!({ "userId": &account.user_id, "code": &code }))
        .await;
    replay.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verify_without_pending_cookie_returns_unauthorized() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = ctx
        .server
        .post("/auth/2fa/verify")
        .json(&json!({
            "userId": &account.user_id,
            "code": ctx.totp_code(&account.secret, 1)
        }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verify_for_another_user_returns_unauthorized() {
    let ctx = TestContext::new();
    let victim = ctx.enrolled_account().await;
    let attacker = ctx.enrolled_account().await;
    let pending = ctx.pending_login(&attacker).await;

    let response = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(pending)
        .json(&json!({
            "userId": &victim.user_id,
            "code": ctx.totp_code(&victim.secret, 1)
        }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_cannot_stand_in_for_pending_cookie() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let mut session_as_pending = account.session.clone();
    session_as_pending.set_name(PENDING_COOKIE);

    let response = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(session_as_pending)
        .json(&json!({
            "userId": &account.user_id,
            "code": ctx.totp_code(&account.secret, 1)
        }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

// =============================================================================
// DISABLE
// =============================================================================

#[tokio::test]
async fn disable_with_password_removes_2fa() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = ctx
        .server
        .post("/auth/2fa/disable")
        .add_cookie(account.session)
        .json(&json!({ "password": test_password() }))
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    assert_eq!(body["enabled"], false);

    assert!(TwoFactorRepository::find(&ctx.store, &account.user_id)
        .await
        .unwrap()
        .is_none());

    // Back to forced enrollment.
    let login = ctx.login(&account.email, test_password()).await;
    let body: serde_json::Value = login.json();
    assert_eq!(body["requiresSetup"], true);
}

#[tokio::test]
async fn disable_with_wrong_password_returns_unauthorized() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = ctx
        .server
        .post("/auth/2fa/disable")
        .add_cookie(account.session)
        .json(&json!({ "password": "WrongPassword123!" }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);

    let secret = TwoFactorRepository::find(&ctx.store, &account.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(secret.enabled);
}

#[tokio::test]
async fn disable_without_2fa_returns_bad_request() {
    let ctx = TestContext::new();
    let (_, session) = exempt_session(&ctx).await;

    let response = ctx
        .server
        .post("/auth/2fa/disable")
        .add_cookie(session)
        .json(&json!({ "password": test_password() }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn repeated_wrong_passwords_on_disable_are_rate_limited() {
    let ctx = TestContext::with_config(AuthConfig {
        rate_limit_max_attempts: 3,
        ..test_config()
    });
    let account = ctx.enrolled_account().await;

    for _ in 0..3 {
        ctx.server
            .post("/auth/2fa/disable")
            .add_cookie(account.session.clone())
            .json(&json!({ "password": "WrongPassword123!" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    let response = ctx
        .server
        .post("/auth/2fa/disable")
        .add_cookie(account.session)
        .json(&json!({ "password": test_password() }))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(TwoFactorRepository::find(&ctx.store, &account.user_id)
        .await
        .unwrap()
        .unwrap()
        .enabled);
}
