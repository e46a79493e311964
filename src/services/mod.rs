pub mod codes;
pub mod cookies;
pub mod hashing;
pub mod jwt;
pub mod rate_limit;
pub mod security;
pub mod totp;
