use rand::Rng;
use shared::IdentityToken;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Letters and digits that are hard to confuse when read aloud or off a screen
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const SESSION_CODE_LEN: usize = 6;

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

pub fn generate_session_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SESSION_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn normalize_session_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn new_identity_token() -> IdentityToken {
    IdentityToken(uuid::Uuid::new_v4().to_string())
}
