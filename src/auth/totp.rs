//! Time-based one-time passwords (RFC 6238) for optional two-factor login.
//!
//! Secrets are 160-bit random values exchanged with authenticator apps as
//! unpadded base32. Codes are 6 digits over HMAC-SHA1 with a 30 s step, and
//! verification accepts one step of clock skew either way. A successful check
//! reports the matched step so callers can refuse to accept it twice.

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;
use totp_rs::{Algorithm, TOTP};

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;
const ALLOWED_SKEW_STEPS: u64 = 1;
const SECRET_BYTES: usize = 20;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TotpError {
    #[error("TOTP secret is not valid base32")]
    InvalidSecret,
    #[error("TOTP code must be 6 digits")]
    MalformedCode,
}

/// Generate a fresh base32 secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// `otpauth://` URI understood by authenticator apps (rendered as a QR code by the client).
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={DIGITS}&period={STEP_SECONDS}",
        issuer = urlencoding::encode(issuer),
        account = urlencoding::encode(account),
        secret = secret,
    )
}

fn totp_for(secret: &str) -> Result<TOTP, TotpError> {
    let normalized = secret.trim().trim_end_matches('=').to_uppercase();
    let key = BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| TotpError::InvalidSecret)?;
    TOTP::new(Algorithm::SHA1, DIGITS, 0, STEP_SECONDS, key).map_err(|_| TotpError::InvalidSecret)
}

/// Code for the step containing `unix_time`.
pub fn code_at(secret: &str, unix_time: u64) -> Result<String, TotpError> {
    Ok(totp_for(secret)?.generate(unix_time))
}

/// Time step (`unix_time / 30`) of `unix_time`.
pub fn step_of(unix_time: u64) -> u64 {
    unix_time / STEP_SECONDS
}

/// Check `code` against the steps around `unix_time`, returning the step it matched.
pub fn verify_code(secret: &str, code: &str, unix_time: u64) -> Result<Option<u64>, TotpError> {
    let code = code.trim();
    if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(TotpError::MalformedCode);
    }

    let totp = totp_for(secret)?;
    let current = step_of(unix_time);
    let earliest = current.saturating_sub(ALLOWED_SKEW_STEPS);

    for step in earliest..=current + ALLOWED_SKEW_STEPS {
        let candidate = totp.generate(step * STEP_SECONDS);
        if bool::from(candidate.as_bytes().ct_eq(code.as_bytes())) {
            return Ok(Some(step));
        }
    }

    Ok(None)
}
