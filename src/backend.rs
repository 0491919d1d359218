use std::future::Future;

use crate::error::Error;
use crate::types::{AuthResponse, TokenPair, UserId, UserPatch, UserProfile};

/// MindEase backend auth endpoints.
///
/// Implementations turn non-2xx answers into [`Error::Backend`] (keeping the
/// status and the body's `code`/`message`) and missing responses into
/// [`Error::Network`]. [`HttpAuthBackend`](crate::http::HttpAuthBackend) is
/// the reqwest implementation.
pub trait AuthBackend: Send + Sync + 'static {
    /// `POST /api/auth/login {firebaseToken}`
    fn login(
        &self,
        firebase_token: &str,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    /// `POST /api/auth/register {email, firebaseToken, anonymousMode}`
    fn register(
        &self,
        email: &str,
        firebase_token: &str,
        anonymous_mode: bool,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    /// `POST /api/auth/refresh {refreshToken}`
    ///
    /// A 2xx answer without a token must be reported as
    /// [`Error::InvalidResponse`].
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenPair, Error>> + Send;

    /// `GET /api/auth/me`
    fn me(&self, access_token: &str) -> impl Future<Output = Result<UserProfile, Error>> + Send;

    /// `POST /api/auth/logout`
    fn logout(&self, access_token: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// `POST /api/auth/request-password-reset {email}`
    fn request_password_reset(&self, email: &str)
    -> impl Future<Output = Result<(), Error>> + Send;

    /// `POST /api/auth/convert-anonymous {email, password, firebaseToken}`
    fn convert_anonymous(
        &self,
        email: &str,
        password: &str,
        firebase_token: &str,
        access_token: Option<&str>,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    /// `PATCH /api/users/{id}/anonymous-mode {anonymousMode}`
    fn update_anonymous_mode(
        &self,
        user_id: &UserId,
        anonymous_mode: bool,
        access_token: &str,
    ) -> impl Future<Output = Result<UserPatch, Error>> + Send;
}
