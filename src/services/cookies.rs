use axum::http::{header, HeaderMap};
use cookie::{time::Duration, Cookie, SameSite};

/// Names and flags of the two auth cookies.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Holds the session token.
    pub session_name: String,
    /// Holds a `two_factor` or `setup` token between login steps.
    pub pending_name: String,
    pub secure: bool,
}

impl CookieSettings {
    pub fn for_app(app_name: &str, secure: bool) -> Self {
        Self {
            session_name: format!("{}_session", app_name),
            pending_name: format!("{}_pending", app_name),
            secure,
        }
    }

    pub fn session(&self, token: &str, max_age_secs: i64) -> String {
        self.build(&self.session_name, token, max_age_secs)
    }

    pub fn pending(&self, token: &str, max_age_secs: i64) -> String {
        self.build(&self.pending_name, token, max_age_secs)
    }

    pub fn clear_session(&self) -> String {
        self.removal(&self.session_name)
    }

    pub fn clear_pending(&self) -> String {
        self.removal(&self.pending_name)
    }

    fn build(&self, name: &str, value: &str, max_age_secs: i64) -> String {
        Cookie::build((name.to_string(), value.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(Duration::seconds(max_age_secs))
            .build()
            .to_string()
    }

    fn removal(&self, name: &str) -> String {
        let mut cookie = Cookie::build((name.to_string(), ""))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build();
        cookie.make_removal();
        cookie.to_string()
    }
}

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value.to_string()))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}
