use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modules::auth::model::User;

/// What a token authorises its bearer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Fully authenticated session.
    Session,
    /// Password accepted, second factor outstanding.
    TwoFactor,
    /// Password accepted, 2FA enrollment outstanding.
    Setup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // user id
    pub username: String,
    pub is_admin: bool,
    pub is_moderator: bool,
    pub kind: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_duration: Duration,
    pending_duration: Duration,
}

impl JwtService {
    pub fn new(secret: &str, session_duration: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            session_duration,
            pending_duration: Duration::minutes(5),
        }
    }

    pub fn create_session_token(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        self.create_token(user, TokenKind::Session, self.session_duration)
    }

    /// Token for the `TwoFactor` or `Setup` step of login. Role flags are left
    /// out: a pending token never grants a role.
    pub fn create_pending_token(
        &self,
        user: &User,
        kind: TokenKind,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            is_admin: false,
            is_moderator: false,
            kind,
            exp: (now + self.pending_duration).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    fn create_token(
        &self,
        user: &User,
        kind: TokenKind,
        lifetime: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            is_admin: user.is_admin,
            is_moderator: user.is_moderator,
            kind,
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Checks signature, expiry and kind. Any failure collapses to `None`.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Option<Claims> {
        match decode::<Claims>(token, &self.decoding_key, &Validation::default()) {
            Ok(data) if data.claims.kind == expected => Some(data.claims),
            Ok(data) => {
                tracing::debug!(kind = ?data.claims.kind, expected = ?expected, "token kind mismatch");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "token rejected");
                None
            }
        }
    }

    pub fn session_duration_secs(&self) -> i64 {
        self.session_duration.num_seconds()
    }

    pub fn pending_duration_secs(&self) -> i64 {
        self.pending_duration.num_seconds()
    }
}
