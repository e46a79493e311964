use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

use super::interface::AuthError;
use crate::services::cookies::{bearer_token, read_cookie};
use crate::services::jwt::{Claims, TokenKind};
use crate::AppState;

fn session_claims(parts: &Parts, state: &AppState) -> Option<Claims> {
    read_cookie(&parts.headers, &state.cookies.session_name)
        .or_else(|| bearer_token(&parts.headers))
        .and_then(|token| state.jwt_service.verify(&token, TokenKind::Session))
}

fn pending_claims(parts: &Parts, state: &AppState, kind: TokenKind) -> Option<Claims> {
    read_cookie(&parts.headers, &state.cookies.pending_name)
        .and_then(|token| state.jwt_service.verify(&token, kind))
}

/// A verified session. Rejects with 401 when absent or invalid.
pub struct SessionUser(pub Claims);

impl FromRequestParts<Arc<AppState>> for SessionUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        session_claims(parts, state)
            .map(SessionUser)
            .ok_or(AuthError::Unauthenticated)
    }
}

/// A session if one was presented; never rejects.
pub struct MaybeSession(pub Option<Claims>);

impl FromRequestParts<Arc<AppState>> for MaybeSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeSession(session_claims(parts, state)))
    }
}

/// The subject of a `two_factor` pending token: password accepted, code outstanding.
pub struct PendingTwoFactor(pub Claims);

impl FromRequestParts<Arc<AppState>> for PendingTwoFactor {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        pending_claims(parts, state, TokenKind::TwoFactor)
            .map(PendingTwoFactor)
            .ok_or(AuthError::Unauthenticated)
    }
}

/// Who may enroll in 2FA: a signed-in user, or a user in the forced-setup
/// step of login.
pub struct EnrollingUser {
    pub user_id: String,
    /// True when authorised by a `setup` token rather than a session.
    pub via_setup: bool,
}

impl FromRequestParts<Arc<AppState>> for EnrollingUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(claims) = session_claims(parts, state) {
            return Ok(EnrollingUser {
                user_id: claims.sub,
                via_setup: false,
            });
        }

        pending_claims(parts, state, TokenKind::Setup)
            .map(|claims| EnrollingUser {
                user_id: claims.sub,
                via_setup: true,
            })
            .ok_or(AuthError::Unauthenticated)
    }
}
