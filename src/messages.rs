//! Turning normalized errors into the text shown to users.
//!
//! Backend codes are looked up in [`ErrorMessages`]; provider codes get the
//! per-operation wording the sign-in, registration, conversion and reset
//! forms use. Embedders wanting translated text override table entries.

use std::collections::HashMap;

use crate::error::{Error, ProviderErrorCode};

/// Backend error code → user-facing message.
#[derive(Debug, Clone)]
pub struct ErrorMessages {
    table: HashMap<String, String>,
}

impl Default for ErrorMessages {
    fn default() -> Self {
        let table = [
            ("INVALID_CREDENTIALS", "Invalid email or password."),
            ("USER_NOT_FOUND", "No account found with this email."),
            ("USER_ALREADY_EXISTS", "This email is already registered. Please log in instead."),
            ("EMAIL_IN_USE", "This email is already in use. Please use a different email."),
            ("INVALID_EMAIL", "Please enter a valid email address."),
            ("WEAK_PASSWORD", "Password should be at least 6 characters."),
            ("RATE_LIMIT_EXCEEDED", "Too many requests. Please try again later."),
            ("INVALID_FIREBASE_TOKEN", "Your sign-in could not be verified. Please try again."),
            ("INVALID_REFRESH_TOKEN", "Session expired. Please log in again."),
            ("NOT_ANONYMOUS_ACCOUNT", "This account is already a full account."),
            ("CONVERSION_FAILED", "Failed to convert account"),
            ("LOGIN_FAILED", "Login failed"),
            ("REGISTRATION_FAILED", "Registration failed"),
            ("UNAUTHORIZED", "Please log in to continue."),
            ("INTERNAL_ERROR", "Server error. Please try again later."),
        ]
        .into_iter()
        .map(|(code, message)| (code.to_owned(), message.to_owned()))
        .collect();
        Self { table }
    }
}

impl ErrorMessages {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides (or adds) the message for `code`.
    #[must_use]
    pub fn with_message(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.table.insert(code.into(), message.into());
        self
    }

    /// Message for `code`, or `fallback` if the code is unknown or absent.
    #[must_use]
    pub fn get(&self, code: Option<&str>, fallback: &str) -> String {
        code.and_then(|c| self.table.get(c))
            .map_or_else(|| fallback.to_owned(), Clone::clone)
    }

    /// Shared tail of every per-operation mapping: backend body message,
    /// then the error's own text.
    fn generic(error: &Error) -> String {
        match error {
            Error::Backend {
                message: Some(message),
                ..
            } => message.clone(),
            Error::Network(_) => "Network error. Please check your connection.".into(),
            Error::Provider { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }

    /// Message for a failed email/password sign-in.
    #[must_use]
    pub fn describe_login(&self, error: &Error) -> String {
        if let Some(code) = error.backend_code() {
            return self.get(Some(code), "Login failed");
        }
        match error.provider_code() {
            Some(ProviderErrorCode::InvalidCredential) => {
                self.get(Some("INVALID_CREDENTIALS"), "Invalid email or password.")
            }
            Some(ProviderErrorCode::UserNotFound) => {
                self.get(Some("USER_NOT_FOUND"), "No account found with this email.")
            }
            Some(ProviderErrorCode::WrongPassword) => {
                self.get(Some("INVALID_CREDENTIALS"), "Incorrect password.")
            }
            Some(ProviderErrorCode::TooManyRequests) => self.get(
                Some("RATE_LIMIT_EXCEEDED"),
                "Too many requests. Please try again later.",
            ),
            _ => Self::generic(error),
        }
    }

    /// Message for a failed account creation.
    #[must_use]
    pub fn describe_register(&self, error: &Error) -> String {
        if let Some(code) = error.backend_code() {
            return self.get(Some(code), "Registration failed");
        }
        match error.provider_code() {
            Some(ProviderErrorCode::EmailInUse) => self.get(
                Some("USER_ALREADY_EXISTS"),
                "This email is already registered. Please log in instead.",
            ),
            Some(ProviderErrorCode::InvalidEmail) => {
                self.get(Some("INVALID_EMAIL"), "Please enter a valid email address.")
            }
            Some(ProviderErrorCode::WeakPassword) => self.get(
                Some("WEAK_PASSWORD"),
                "Password should be at least 6 characters.",
            ),
            _ => Self::generic(error),
        }
    }

    /// Message for a failed anonymous-to-full conversion.
    #[must_use]
    pub fn describe_conversion(&self, error: &Error) -> String {
        if let Some(code) = error.backend_code() {
            return self.get(Some(code), "Failed to convert account");
        }
        match error.provider_code() {
            Some(ProviderErrorCode::EmailInUse) => self.get(
                Some("EMAIL_IN_USE"),
                "This email is already in use. Please use a different email.",
            ),
            Some(ProviderErrorCode::InvalidEmail) => {
                self.get(Some("INVALID_EMAIL"), "Please enter a valid email address.")
            }
            Some(ProviderErrorCode::WeakPassword) => self.get(
                Some("WEAK_PASSWORD"),
                "Password should be at least 6 characters.",
            ),
            Some(ProviderErrorCode::RequiresRecentLogin) => {
                "Please log out and log back in before converting your account.".into()
            }
            _ => Self::generic(error),
        }
    }

    /// Message for a failed password-reset dispatch.
    #[must_use]
    pub fn describe_password_reset(&self, error: &Error) -> String {
        match error.provider_code() {
            Some(ProviderErrorCode::InvalidEmail) => {
                self.get(Some("INVALID_EMAIL"), "Please enter a valid email address.")
            }
            Some(ProviderErrorCode::TooManyRequests) => self.get(
                Some("RATE_LIMIT_EXCEEDED"),
                "Too many requests. Please try again later.",
            ),
            _ => Self::generic(error),
        }
    }
}

/// Global message for a failed API request, keyed on HTTP status.
///
/// `status = None` means no response arrived.
#[must_use]
pub fn http_status_message(status: Option<u16>, message: Option<&str>, errors: &[String]) -> String {
    let Some(status) = status else {
        return "Network error. Please check your connection.".into();
    };
    let or = |default: &str| message.map_or_else(|| default.to_owned(), str::to_owned);
    match status {
        403 => or("Access denied"),
        404 => or("Resource not found"),
        422 => {
            let base = or("Validation failed");
            if errors.is_empty() {
                base
            } else {
                format!("{base}: {}", errors.join(", "))
            }
        }
        500 => or("Server error. Please try again later."),
        other => or(&format!("Error: {other}")),
    }
}
