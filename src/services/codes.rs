//! Backup and recovery code generation.

use rand::Rng;

// No 0, O, 1, I to avoid confusion
const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LENGTH: usize = 8;
const RECOVERY_CODE_GROUPS: usize = 8;

fn random_string(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Groups a code in blocks of four: `ABCD-EFGH`.
fn grouped(code: &str) -> String {
    code.as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// A fresh set of single-use backup codes, formatted for display.
pub fn generate_backup_codes() -> Vec<String> {
    (0..BACKUP_CODE_COUNT)
        .map(|_| grouped(&random_string(BACKUP_CODE_LENGTH)))
        .collect()
}

/// A 32-character recovery code (160 bits), formatted for display.
pub fn generate_recovery_code() -> String {
    grouped(&random_string(RECOVERY_CODE_GROUPS * 4))
}
