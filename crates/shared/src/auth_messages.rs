//! User-facing text for identity-provider error codes.

/// Normalised `auth/*` code for an Identity Toolkit REST error message.
///
/// The REST API reports errors like `"WEAK_PASSWORD : Password should be at
/// least 6 characters"`; only the leading token matters.
pub fn code_for_provider_message(message: &str, idp_flow: bool) -> &'static str {
    let token = message
        .split(|c: char| c == ':' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    match token {
        "EMAIL_EXISTS" if idp_flow => "auth/account-exists-with-different-credential",
        "EMAIL_EXISTS" => "auth/email-already-in-use",
        "FEDERATED_USER_ID_ALREADY_LINKED" => "auth/account-exists-with-different-credential",
        "EMAIL_NOT_FOUND" => "auth/user-not-found",
        "INVALID_PASSWORD" => "auth/wrong-password",
        "INVALID_LOGIN_CREDENTIALS" | "INVALID_IDP_RESPONSE" => "auth/invalid-credential",
        "INVALID_EMAIL" | "MISSING_EMAIL" => "auth/invalid-email",
        "WEAK_PASSWORD" | "MISSING_PASSWORD" => "auth/weak-password",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "auth/too-many-requests",
        "USER_DISABLED" => "auth/user-disabled",
        _ => "auth/internal-error",
    }
}

pub fn message_for_code(code: &str) -> &'static str {
    match code {
        "auth/user-not-found" => "No account found with this email address",
        "auth/wrong-password" => "Incorrect password",
        "auth/invalid-credential" => "Invalid email or password",
        "auth/invalid-email" => "Invalid email address",
        "auth/too-many-requests" => "Too many failed attempts. Please try again later",
        "auth/email-already-in-use" => "Email already in use. Please try a different email.",
        "auth/weak-password" => "Password is too weak. Please use a stronger password.",
        "auth/popup-closed-by-user" => "Sign-in was cancelled",
        "auth/popup-blocked" => "Popup was blocked. Please allow popups and try again.",
        "auth/account-exists-with-different-credential" => {
            "An account already exists with this email using a different sign-in method."
        }
        "auth/user-disabled" => "This account has been disabled",
        _ => "Authentication failed. Please try again",
    }
}
