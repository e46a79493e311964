//! RFC 6238 time-based one-time passwords.

use std::time::{SystemTime, UNIX_EPOCH};

use totp_rs::{Algorithm, Secret, TOTP};

use crate::modules::auth::interface::AuthError;

#[derive(Debug, Clone)]
pub struct TotpConfig {
    /// Issuer name shown in authenticator apps.
    pub issuer: String,
    pub digits: usize,
    /// Time step in seconds.
    pub step: u64,
    /// Steps accepted either side of the current one.
    pub skew: u8,
}

impl TotpConfig {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            digits: 6,
            step: 30,
            skew: 1,
        }
    }
}

/// Provisioning data handed to the user at enrollment.
#[derive(Debug, Clone)]
pub struct TotpSetup {
    /// Base32 secret, stored server side.
    pub secret: String,
    /// `otpauth://totp/...` URL.
    pub otpauth_url: String,
    /// Base64 PNG of the QR code for `otpauth_url`.
    pub qr_code: String,
}

#[derive(Clone)]
pub struct TotpService {
    config: TotpConfig,
}

impl TotpService {
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    pub fn generate_setup(&self, account_name: &str) -> Result<TotpSetup, AuthError> {
        let secret = Secret::generate_secret().to_encoded().to_string();
        let totp = self.build(&secret, account_name)?;

        let qr_code = totp
            .get_qr_base64()
            .map_err(|e| AuthError::Internal(format!("Failed to render QR code: {}", e)))?;

        Ok(TotpSetup {
            otpauth_url: totp.get_url(),
            qr_code,
            secret,
        })
    }

    /// Whether `code` has the shape of a TOTP code rather than a backup code.
    pub fn looks_like_totp(&self, code: &str) -> bool {
        let code = strip_separators(code);
        code.len() == self.config.digits && code.bytes().all(|b| b.is_ascii_digit())
    }

    /// Checks `code` against the steps around `unix_time` and returns the
    /// matching time step, if any. Callers enforce once-per-step use.
    pub fn verify_at(&self, secret: &str, code: &str, unix_time: u64) -> Result<Option<u64>, AuthError> {
        let totp = self.build(secret, "verify")?;
        let code = strip_separators(code);

        let current = unix_time / self.config.step;
        let skew = u64::from(self.config.skew);
        let mut matched = None;

        // Every candidate is compared so timing does not reveal which step hit.
        for step in current.saturating_sub(skew)..=current + skew {
            let candidate = totp.generate(step * self.config.step);
            if crate::services::hashing::constant_time_eq(&candidate, &code) {
                matched = Some(step);
            }
        }

        Ok(matched)
    }

    pub fn verify(&self, secret: &str, code: &str) -> Result<Option<u64>, AuthError> {
        self.verify_at(secret, code, unix_now()?)
    }

    /// The code an authenticator shows at `unix_time`.
    pub fn code_at(&self, secret: &str, unix_time: u64) -> Result<String, AuthError> {
        Ok(self.build(secret, "verify")?.generate(unix_time))
    }

    fn build(&self, secret: &str, account_name: &str) -> Result<TOTP, AuthError> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Internal(format!("Invalid TOTP secret: {:?}", e)))?;

        TOTP::new(
            Algorithm::SHA1,
            self.config.digits,
            self.config.skew,
            self.config.step,
            bytes,
            Some(self.config.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|e| AuthError::Internal(format!("Failed to create TOTP: {}", e)))
    }
}

fn strip_separators(code: &str) -> String {
    code.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
}

pub fn unix_now() -> Result<u64, AuthError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AuthError::Internal(format!("System clock before epoch: {}", e)))
}
