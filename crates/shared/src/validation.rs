//! Form and upload rules shared by the gateway and its clients.

use std::collections::BTreeMap;

use crate::protocol::{LoginRequest, RegisterRequest};

pub const ALLOWED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];
/// 10 MiB, inclusive.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Field name to message, ordered for stable output.
pub type FieldErrors = BTreeMap<&'static str, &'static str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRejection {
    UnsupportedType,
    TooLarge,
}

pub fn is_allowed_image_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED_IMAGE_TYPES.contains(&essence.as_str())
}

pub fn check_upload(content_type: &str, size_bytes: usize) -> Result<(), UploadRejection> {
    if !is_allowed_image_type(content_type) {
        return Err(UploadRejection::UnsupportedType);
    }
    if size_bytes > MAX_UPLOAD_BYTES {
        return Err(UploadRejection::TooLarge);
    }
    Ok(())
}

/// Loose `\S+@\S+\.\S+` check.
pub fn looks_like_email(value: &str) -> bool {
    value.split_whitespace().any(|token| {
        token.match_indices('@').any(|(at, _)| {
            let domain = &token[at + 1..];
            at > 0
                && domain
                    .char_indices()
                    .any(|(idx, ch)| ch == '.' && idx >= 1 && idx + 1 < domain.len())
        })
    })
}

pub fn phone_digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

pub fn validate_login(req: &LoginRequest) -> Result<(), &'static str> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err("Please fill in all fields");
    }
    Ok(())
}

pub fn validate_registration(req: &RegisterRequest) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if req.first_name.trim().is_empty() {
        errors.insert("firstName", "First name is required");
    }
    if req.last_name.trim().is_empty() {
        errors.insert("lastName", "Last name is required");
    }
    if req.email.trim().is_empty() {
        errors.insert("email", "Email is required");
    } else if !looks_like_email(&req.email) {
        errors.insert("email", "Email is invalid");
    }
    if req.phone.trim().is_empty() {
        errors.insert("phone", "Phone number is required");
    } else if phone_digits(&req.phone).len() != 10 {
        errors.insert("phone", "Phone number must be 10 digits");
    }
    if req.date_of_birth.trim().is_empty() {
        errors.insert("dateOfBirth", "Date of birth is required");
    }
    if req.gender.trim().is_empty() {
        errors.insert("gender", "Gender is required");
    }
    if req.password.is_empty() {
        errors.insert("password", "Password is required");
    } else if req.password.chars().count() < MIN_PASSWORD_LEN {
        errors.insert("password", "Password must be at least 6 characters");
    }
    if req.password != req.confirm_password {
        errors.insert("confirmPassword", "Passwords do not match");
    }
    if !req.agree_terms {
        errors.insert("agreeTerms", "You must agree to the terms");
    }
    if !req.agree_privacy {
        errors.insert("agreePrivacy", "You must agree to the privacy policy");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
