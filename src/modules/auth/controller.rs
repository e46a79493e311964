use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::modules::auth::{
    extractor::{EnrollingUser, MaybeSession, PendingTwoFactor, SessionUser},
    interface::AuthError,
    schema::{
        BackupCodesResponse, CodeRequest, DisableTwoFactorRequest, LoginRequest, LoginResponse,
        LogoutResponse, RecoverPasswordRequest, RecoverPasswordResponse, RegisterRequest,
        RegisterResponse, ResetTwoFactorRequest, SessionResponse, TwoFactorSetupResponse,
        TwoFactorStatusResponse, UserResponse, VerifyRecoveryRequest, VerifyRecoveryResponse,
        VerifyTwoFactorRequest,
    },
    service::{LoginOutcome, NewPassword},
};
use crate::AppState;

type SetCookies = AppendHeaders<Vec<(HeaderName, String)>>;

fn set_cookies(cookies: Vec<String>) -> SetCookies {
    AppendHeaders(
        cookies
            .into_iter()
            .map(|cookie| (header::SET_COOKIE, cookie))
            .collect(),
    )
}

/// Session cookie set, pending cookie cleared.
fn session_cookies(state: &AppState, token: &str) -> SetCookies {
    set_cookies(vec![
        state
            .cookies
            .session(token, state.jwt_service.session_duration_secs()),
        state.cookies.clear_pending(),
    ])
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    let registration = state
        .auth
        .register(
            &req.email,
            &req.username,
            NewPassword {
                password: &req.password,
                password_confirm: &req.password_confirm,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserResponse::from(&registration.user),
            recovery_code: registration.recovery_code,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let pending_ttl = state.jwt_service.pending_duration_secs();

    let (cookies, body) = match state.auth.login(&req.email, &req.password).await? {
        LoginOutcome::Authenticated {
            user,
            session_token,
        } => (
            session_cookies(&state, &session_token),
            Json(LoginResponse {
                requires_2fa: false,
                requires_setup: false,
                user_id: Some(user.id.clone()),
                user: Some(UserResponse::from(&user)),
            }),
        ),
        LoginOutcome::TwoFactorPending {
            user_id,
            pending_token,
        } => (
            set_cookies(vec![state.cookies.pending(&pending_token, pending_ttl)]),
            Json(LoginResponse {
                requires_2fa: true,
                requires_setup: false,
                user_id: Some(user_id),
                user: None,
            }),
        ),
        LoginOutcome::SetupRequired {
            user_id,
            pending_token,
        } => (
            set_cookies(vec![state.cookies.pending(&pending_token, pending_ttl)]),
            Json(LoginResponse {
                requires_2fa: false,
                requires_setup: true,
                user_id: Some(user_id),
                user: None,
            }),
        ),
    };

    Ok((StatusCode::OK, cookies, body))
}

pub async fn setup_two_factor(
    State(state): State<Arc<AppState>>,
    enrolling: EnrollingUser,
) -> Result<Json<TwoFactorSetupResponse>, AuthError> {
    let enrollment = state.auth.setup_two_factor(&enrolling.user_id).await?;

    Ok(Json(TwoFactorSetupResponse {
        secret: enrollment.setup.secret,
        qr_code: enrollment.setup.qr_code,
        otpauth_url: enrollment.setup.otpauth_url,
        backup_codes: enrollment.backup_codes,
    }))
}

/// Completes the forced-setup login step with a session when reached via a
/// setup token.
pub async fn enable_two_factor(
    State(state): State<Arc<AppState>>,
    enrolling: EnrollingUser,
    Json(req): Json<CodeRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let user = state
        .auth
        .enable_two_factor(&enrolling.user_id, &req.code)
        .await?;

    if !enrolling.via_setup {
        return Ok((
            set_cookies(Vec::new()),
            Json(TwoFactorStatusResponse {
                enabled: true,
                user: None,
            }),
        ));
    }

    let token = state.auth.session_token(&user)?;
    Ok((
        session_cookies(&state, &token),
        Json(TwoFactorStatusResponse {
            enabled: true,
            user: Some(UserResponse::from(&user)),
        }),
    ))
}

pub async fn verify_two_factor(
    State(state): State<Arc<AppState>>,
    PendingTwoFactor(pending): PendingTwoFactor,
    Json(req): Json<VerifyTwoFactorRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let (user, token) = state
        .auth
        .verify_two_factor(&pending.sub, &req.user_id, &req.code)
        .await?;

    Ok((
        session_cookies(&state, &token),
        Json(SessionResponse {
            user: UserResponse::from(&user),
        }),
    ))
}

pub async fn disable_two_factor(
    State(state): State<Arc<AppState>>,
    SessionUser(session): SessionUser,
    Json(req): Json<DisableTwoFactorRequest>,
) -> Result<Json<TwoFactorStatusResponse>, AuthError> {
    state
        .auth
        .disable_two_factor(&session.sub, &req.password)
        .await?;

    Ok(Json(TwoFactorStatusResponse {
        enabled: false,
        user: None,
    }))
}

pub async fn regenerate_backup_codes(
    State(state): State<Arc<AppState>>,
    SessionUser(session): SessionUser,
    Json(req): Json<CodeRequest>,
) -> Result<Json<BackupCodesResponse>, AuthError> {
    let backup_codes = state
        .auth
        .regenerate_backup_codes(&session.sub, &req.code)
        .await?;

    Ok(Json(BackupCodesResponse { backup_codes }))
}

pub async fn reset_two_factor(
    State(state): State<Arc<AppState>>,
    SessionUser(session): SessionUser,
    Json(req): Json<ResetTwoFactorRequest>,
) -> Result<Json<TwoFactorStatusResponse>, AuthError> {
    state
        .auth
        .reset_two_factor(&session.sub, &req.user_id)
        .await?;

    Ok(Json(TwoFactorStatusResponse {
        enabled: false,
        user: None,
    }))
}

pub async fn verify_recovery(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRecoveryRequest>,
) -> Result<Json<VerifyRecoveryResponse>, AuthError> {
    let masked_email = state
        .auth
        .verify_recovery(&req.email, &req.recovery_code)
        .await?;

    Ok(Json(VerifyRecoveryResponse { masked_email }))
}

pub async fn recover_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecoverPasswordRequest>,
) -> Result<Json<RecoverPasswordResponse>, AuthError> {
    let recovery_code = state
        .auth
        .recover_password(
            &req.email,
            &req.recovery_code,
            &req.code,
            NewPassword {
                password: &req.password,
                password_confirm: &req.password_confirm,
            },
        )
        .await?;

    Ok(Json(RecoverPasswordResponse { recovery_code }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    MaybeSession(session): MaybeSession,
) -> impl IntoResponse {
    state
        .auth
        .logout(session.as_ref().map(|claims| claims.sub.as_str()))
        .await;

    (
        set_cookies(vec![
            state.cookies.clear_session(),
            state.cookies.clear_pending(),
        ]),
        Json(LogoutResponse {
            message: "Logged out",
        }),
    )
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    SessionUser(session): SessionUser,
) -> Result<Json<UserResponse>, AuthError> {
    let user = state.auth.current_user(&session.sub).await?;
    Ok(Json(UserResponse::from(&user)))
}
