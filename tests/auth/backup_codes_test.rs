use axum::http::StatusCode;
use serde_json::json;
use std::future::IntoFuture;

use crate::common::{
    test_config, test_email, test_password, Account, TestContext, SESSION_COOKIE,
};
use catalog_auth::config::AuthConfig;
use catalog_auth::modules::auth::model::AuditAction;

async fn verify_with(ctx: &TestContext, account: &Account, code: &str) -> axum_test::TestResponse {
    let pending = ctx.pending_login(account).await;
    ctx.server
        .post("/auth/2fa/verify")
        .add_cookie(pending)
        .json(&json!({ "userId": &account.user_id, "code": code }))
        .await
}

#[tokio::test]
async fn backup_code_completes_login() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = verify_with(&ctx, &account, &account.backup_codes[0]).await;

    response.assert_status(StatusCode::OK);
    assert!(!response.cookie(SESSION_COOKIE).value().is_empty());

    let actions = ctx.store.audit_actions(&account.user_id).await;
    assert!(actions.contains(&AuditAction::BackupCodeUsed));
}

#[tokio::test]
async fn backup_code_is_accepted_without_dash_or_case() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;
    let sloppy = account.backup_codes[1].replace('-', "").to_lowercase();

    let response = verify_with(&ctx, &account, &sloppy).await;

    response.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn used_backup_code_returns_conflict() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;
    let code = account.backup_codes[2].clone();

    verify_with(&ctx, &account, &code)
        .await
        .assert_status(StatusCode::OK);

    let response = verify_with(&ctx, &account, &code).await;

    response.assert_status(StatusCode::CONFLICT);

    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Code already used");
}

#[tokio::test]
async fn unknown_backup_code_returns_unauthorized() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = verify_with(&ctx, &account, "ZZZZ-ZZZZ").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn backup_codes_are_bound_to_their_owner() {
    let ctx = TestContext::new();
    let owner = ctx.enrolled_account().await;
    let other = ctx.enrolled_account().await;

    let response = verify_with(&ctx, &other, &owner.backup_codes[0]).await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn concurrent_use_of_one_backup_code_succeeds_once() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;
    let code = account.backup_codes[3].clone();

    let first_pending = ctx.pending_login(&account).await;
    let second_pending = ctx.pending_login(&account).await;

    let first = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(first_pending)
        .json(&json!({ "userId": &account.user_id, "code": &code }))
        .into_future();
    let second = ctx
        .server
        .post("/auth/2fa/verify")
        .add_cookie(second_pending)
        .json(&json!({ "userId": &account.user_id, "code": &code }))
        .into_future();

    let (first, second) = futures::join!(first, second);

    let mut statuses = vec![
        first.status_code().as_u16(),
        second.status_code().as_u16(),
    ];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);
}

#[tokio::test]
async fn regenerate_replaces_all_backup_codes() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = ctx
        .server
        .post("/auth/2fa/backup-codes")
        .add_cookie(account.session.clone())
        .json(&json!({ "code": ctx.totp_code(&account.secret, 1) }))
        .await;

    response.assert_status(StatusCode::OK);

    let body: serde_json::Value = response.json();
    let fresh: Vec<String> = body["backupCodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect();
    assert_eq!(fresh.len(), 10);
    assert!(fresh.iter().all(|code| !account.backup_codes.contains(code)));

    // Old codes are gone, new ones work.
    verify_with(&ctx, &account, &account.backup_codes[0])
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    verify_with(&ctx, &account, &fresh[0])
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn regenerate_with_backup_code_returns_unauthorized() {
    let ctx = TestContext::new();
    let account = ctx.enrolled_account().await;

    let response = ctx
        .server
        .post("/auth/2fa/backup-codes")
        .add_cookie(account.session)
        .json(&json!({ "code": &account.backup_codes[0] }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regenerate_without_session_returns_unauthorized() {
    let ctx = TestContext::new();

    let response = ctx
        .server
        .post("/auth/2fa/backup-codes")
        .json(&json!({ "code": "123456" }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regenerate_without_2fa_returns_bad_request() {
    let ctx = TestContext::new();
    let email = test_email();
    let registered = ctx.register(&email).await;
    ctx.store
        .update_user(&registered.user_id, |user| user.two_factor_exempt = true)
        .await;
    let session = ctx
        .login(&email, test_password())
        .await
        .cookie(SESSION_COOKIE);

    let response = ctx
        .server
        .post("/auth/2fa/backup-codes")
        .add_cookie(session)
        .json(&json!({ "code": "123456" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn repeated_wrong_codes_on_regenerate_are_rate_limited() {
    let ctx = TestContext::with_config(AuthConfig {
        rate_limit_max_attempts: 3,
        ..test_config()
    });
    let account = ctx.enrolled_account().await;

    for _ in 0..3 {
        ctx.server
            .post("/auth/2fa/backup-codes")
            .add_cookie(account.session.clone())
            .json(&json!({ "code": ctx.totp_code(&account.secret, 10) }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    let response = ctx
        .server
        .post("/auth/2fa/backup-codes")
        .add_cookie(account.session)
        .json(&json!({ "code": ctx.totp_code(&account.secret, 1) }))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
}
