use regex::Regex;
use std::sync::LazyLock;
use validator::{ValidationError, ValidationErrors};

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{6,14}$").expect("valid phone regex"));

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{3}$").expect("valid currency regex"));

/// Phone numbers are stored in E.164 form so they can be handed to SMS/WhatsApp providers as is.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if PHONE_RE.is_match(phone) {
        Ok(())
    } else {
        Err(ValidationError::new("phone_e164"))
    }
}

/// ISO-4217 code in lowercase, as the payment provider expects.
pub fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if CURRENCY_RE.is_match(currency) {
        Ok(())
    } else {
        Err(ValidationError::new("currency_iso4217"))
    }
}

pub fn validate_specialties(specialties: &[String]) -> Result<(), ValidationError> {
    if specialties.len() > 20 {
        return Err(ValidationError::new("too_many_specialties"));
    }
    if specialties.iter().any(|s| s.trim().is_empty() || s.len() > 50) {
        return Err(ValidationError::new("invalid_specialty"));
    }
    Ok(())
}

/// Flatten validator output into a single human readable line.
pub fn describe_validation_errors(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let codes: Vec<&str> = errs.iter().map(|e| e.code.as_ref()).collect();
            format!("{}: {}", field, codes.join(", "))
        })
        .collect();
    parts.sort();
    parts.join("; ")
}
