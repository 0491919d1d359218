use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Backend user identifier (UUID string, kept opaque).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity-provider user id (Firebase `localId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct ProviderUid(pub String);

/// Role markers the backend emits for administrators.
pub(crate) const ADMIN_ROLES: [&str; 2] = ["ADMIN", "ROLE_ADMIN"];

pub(crate) fn is_admin_marker(role: Option<&str>, authority: Option<&str>) -> bool {
    role.is_some_and(|r| ADMIN_ROLES.contains(&r)) || authority == Some("ROLE_ADMIN")
}

/// Resolved identity returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default)]
    pub anonymous_mode: bool,
}

impl UserProfile {
    #[must_use]
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_anonymous_mode(mut self, anonymous: bool) -> Self {
        self.anonymous_mode = anonymous;
        self
    }

    /// `role` or `authority` marks an administrator.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        is_admin_marker(self.role.as_deref(), self.authority.as_deref())
    }

    /// The user states a role, and it is not administrative.
    #[must_use]
    pub fn states_non_admin_role(&self) -> bool {
        (self.role.is_some() || self.authority.is_some()) && !self.is_admin()
    }

    /// Overlays the fields present in `patch`.
    pub fn merge(&mut self, patch: UserPatch) {
        if let Some(id) = patch.id {
            self.id = Some(id);
        }
        if let Some(email) = patch.email {
            self.email = Some(email);
        }
        if let Some(role) = patch.role {
            self.role = Some(role);
        }
        if let Some(authority) = patch.authority {
            self.authority = Some(authority);
        }
        if let Some(anonymous_mode) = patch.anonymous_mode {
            self.anonymous_mode = anonymous_mode;
        }
    }
}

/// Partial user as returned by update endpoints; absent fields stay untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UserPatch {
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub anonymous_mode: Option<bool>,
}

/// Access/refresh token pair plus the resolved user, as issued by
/// `login`, `register` and `convert-anonymous`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl AuthResponse {
    #[must_use]
    pub fn new(token: impl Into<String>, refresh_token: Option<String>, user: UserProfile) -> Self {
        Self {
            token: token.into(),
            refresh_token,
            user: Some(user),
        }
    }
}

/// Rotated token pair from `POST /api/auth/refresh`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: Option<String>,
}

impl TokenPair {
    #[must_use]
    pub fn new(token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            token: token.into(),
            refresh_token,
        }
    }
}

/// Identity-provider account as seen after a sign-in call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ProviderUser {
    pub uid: ProviderUid,
    pub email: Option<String>,
    pub is_anonymous: bool,
}

impl ProviderUser {
    #[must_use]
    pub fn new(uid: impl Into<String>, email: Option<String>, is_anonymous: bool) -> Self {
        Self {
            uid: ProviderUid(uid.into()),
            email,
            is_anonymous,
        }
    }
}
