//! Time-based one-time passwords (RFC 6238, SHA1, 6 digits, 30 s step).

use totp_rs::{Algorithm, Secret, TOTP};

use super::AuthError;

fn totp(secret_base32: &str) -> Result<TOTP, AuthError> {
    let bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| AuthError::Internal(format!("otp secret: {e:?}")))?;
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, String::new())
        .map_err(|e| AuthError::Internal(format!("otp init: {e}")))
}

/// Check a code against the current step (±1 step of skew).
pub fn verify_code(secret_base32: &str, code: &str) -> Result<bool, AuthError> {
    let code = code.trim();
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }
    totp(secret_base32)?
        .check_current(code)
        .map_err(|e| AuthError::Internal(format!("system clock: {e}")))
}
