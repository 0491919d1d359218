use std::fmt;

/// Normalized identity-provider error codes.
///
/// Both the SDK-style codes (`auth/email-already-in-use`) and the REST API
/// strings (`EMAIL_EXISTS`) map onto the same variant, so nothing above the
/// provider layer branches on provider-specific spellings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderErrorCode {
    InvalidCredential,
    UserNotFound,
    WrongPassword,
    EmailInUse,
    InvalidEmail,
    WeakPassword,
    TooManyRequests,
    RequiresRecentLogin,
    NetworkRequestFailed,
    /// No signed-in provider user where one was required.
    NoCurrentUser,
    Other(String),
}

impl ProviderErrorCode {
    /// Maps a raw provider code onto the normalized enumeration.
    ///
    /// REST error messages may carry a trailing explanation
    /// (`WEAK_PASSWORD : Password should be at least 6 characters`); only the
    /// leading token is significant.
    #[must_use]
    pub fn from_code(raw: &str) -> Self {
        let code = raw.split(':').next().unwrap_or_default().trim();
        match code {
            "auth/invalid-credential" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_ID_TOKEN" => {
                Self::InvalidCredential
            }
            "auth/user-not-found" | "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => Self::UserNotFound,
            "auth/wrong-password" | "INVALID_PASSWORD" => Self::WrongPassword,
            "auth/email-already-in-use" | "EMAIL_EXISTS" => Self::EmailInUse,
            "auth/invalid-email" | "INVALID_EMAIL" | "MISSING_EMAIL" => Self::InvalidEmail,
            "auth/weak-password" | "WEAK_PASSWORD" => Self::WeakPassword,
            "auth/too-many-requests" | "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyRequests,
            "auth/requires-recent-login" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" | "TOKEN_EXPIRED" => {
                Self::RequiresRecentLogin
            }
            "auth/network-request-failed" => Self::NetworkRequestFailed,
            "auth/no-current-user" => Self::NoCurrentUser,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidCredential => "invalid-credential",
            Self::UserNotFound => "user-not-found",
            Self::WrongPassword => "wrong-password",
            Self::EmailInUse => "email-already-in-use",
            Self::InvalidEmail => "invalid-email",
            Self::WeakPassword => "weak-password",
            Self::TooManyRequests => "too-many-requests",
            Self::RequiresRecentLogin => "requires-recent-login",
            Self::NetworkRequestFailed => "network-request-failed",
            Self::NoCurrentUser => "no-current-user",
            Self::Other(code) => code,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Identity provider rejected the operation.
    #[error("Identity provider error ({code}): {message}")]
    Provider {
        code: ProviderErrorCode,
        message: String,
    },

    /// Backend answered with a non-2xx status.
    #[error("Backend error (HTTP {status}): {}", message.as_deref().or(code.as_deref()).unwrap_or("no details"))]
    Backend {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },

    /// No response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// A 2xx response did not carry what the contract promises.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No active session")]
    NoActiveSession,

    #[error("Session expired")]
    SessionExpired,

    #[error("Not an admin account")]
    NotAdmin,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// Shorthand for a provider error built from a raw code.
    pub fn provider(raw_code: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            code: ProviderErrorCode::from_code(raw_code),
            message: message.into(),
        }
    }

    /// HTTP status when the backend answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured backend error code (`USER_NOT_FOUND`, ...), if any.
    #[must_use]
    pub fn backend_code(&self) -> Option<&str> {
        match self {
            Self::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Normalized provider code, if this is a provider error.
    #[must_use]
    pub fn provider_code(&self) -> Option<&ProviderErrorCode> {
        match self {
            Self::Provider { code, .. } => Some(code),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Backend says the account does not exist yet.
    #[must_use]
    pub fn is_backend_user_not_found(&self) -> bool {
        self.backend_code() == Some("USER_NOT_FOUND") || self.status() == Some(404)
    }

    /// The message carried by the backend body, if any.
    #[must_use]
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Backend { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::InvalidResponse(e.to_string());
        }
        match e.status() {
            Some(status) => Self::Backend {
                status: status.as_u16(),
                code: None,
                message: None,
            },
            None => Self::Network(e.to_string()),
        }
    }
}
