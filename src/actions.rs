//! User-facing authentication operations.
//!
//! Every operation reports failure as an [`AuthFailure`] carrying the text to
//! show, never a provider-specific code; the same text is emitted as an
//! error notice. Success notices go through the same [`Notifier`] sink.
//!
//! [`Notifier`]: crate::lifecycle::Notifier

use std::sync::Arc;

use crate::backend::AuthBackend;
use crate::config::AuthConfig;
use crate::error::{Error, ProviderErrorCode};
use crate::lifecycle::{LifecycleNotifier, NoticeLevel};
use crate::messages::ErrorMessages;
use crate::provider::IdentityProvider;
use crate::refresh::RefreshCoordinator;
use crate::session::SessionStore;
use crate::types::{AuthResponse, UserProfile};

/// A failed auth operation, ready for display.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
#[non_exhaustive]
pub struct AuthFailure {
    /// Human-readable text for the form or toast.
    pub message: String,
    /// Backend error code, when the backend produced the failure.
    pub code: Option<String>,
    #[source]
    pub error: Error,
}

impl AuthFailure {
    fn new(message: impl Into<String>, error: Error) -> Self {
        Self {
            message: message.into(),
            code: error.backend_code().map(str::to_owned),
            error,
        }
    }
}

/// Credentials issued by a successful sign-in.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SignedIn {
    pub user: Option<UserProfile>,
    pub token: String,
    pub refresh_token: Option<String>,
    /// The account is an administrator. Such sessions are *not* stored in the
    /// regular session; hand them to
    /// [`AdminSessionGuard::adopt`](crate::admin::AdminSessionGuard::adopt).
    pub is_admin: bool,
}

impl SignedIn {
    fn from_response(response: AuthResponse, is_admin: bool) -> Self {
        Self {
            user: response.user,
            token: response.token,
            refresh_token: response.refresh_token,
            is_admin,
        }
    }
}

/// Outcome of [`AuthActions::register`].
#[derive(Debug, Clone)]
pub enum Registration {
    SignedIn(SignedIn),
    /// Account created; the user has to sign in explicitly.
    LoginRequired,
}

/// Requested profile changes. Only `anonymous_mode` is supported today.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct UserUpdate {
    pub anonymous_mode: Option<bool>,
    pub email: Option<String>,
}

impl UserUpdate {
    #[must_use]
    pub fn anonymous_mode(enabled: bool) -> Self {
        Self {
            anonymous_mode: Some(enabled),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }
}

const SIGNED_IN: &str = "Successfully signed in!";
const SIGNED_IN_ADMIN: &str = "Signed in as admin";
const CONTINUING_ANONYMOUSLY: &str = "Continuing anonymously!";
const ANONYMOUS_FAILED: &str = "Failed to continue anonymously. Please try again.";
const ACCOUNT_CREATED: &str = "Account created! Welcome to MindEase!";
const ACCOUNT_CREATED_LOGIN: &str = "Account created! Please log in.";
const ACCOUNT_CONVERTED: &str = "Account converted successfully! Welcome to MindEase!";
const UPDATE_FAILED: &str = "Failed to update user settings";
const LOGGED_OUT: &str = "You have been logged out";

/// Sign-in, registration and account operations against the identity
/// provider and the backend, writing into the regular [`SessionStore`].
pub struct AuthActions<P, B> {
    provider: Arc<P>,
    coordinator: Arc<RefreshCoordinator<B>>,
    lifecycle: Arc<LifecycleNotifier>,
    messages: ErrorMessages,
    anonymous_email_domain: String,
}

impl<P: IdentityProvider, B: AuthBackend> AuthActions<P, B> {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        provider: Arc<P>,
        coordinator: Arc<RefreshCoordinator<B>>,
        lifecycle: Arc<LifecycleNotifier>,
    ) -> Self {
        Self {
            provider,
            coordinator,
            lifecycle,
            messages: ErrorMessages::default(),
            anonymous_email_domain: config.anonymous_email_domain().to_owned(),
        }
    }

    /// Replaces the message table (translations, product wording).
    #[must_use]
    pub fn with_messages(mut self, messages: ErrorMessages) -> Self {
        self.messages = messages;
        self
    }

    fn backend(&self) -> &B {
        self.coordinator.backend()
    }

    fn store(&self) -> &SessionStore {
        self.coordinator.store()
    }

    /// Logs `error`, shows `message`, and wraps both.
    fn fail(&self, operation: &'static str, message: String, error: Error) -> AuthFailure {
        tracing::warn!(operation, error = %error, "Auth operation failed");
        self.lifecycle.notify(NoticeLevel::Error, &message);
        AuthFailure::new(message, error)
    }

    /// Stores a regular session and announces it.
    fn establish(&self, response: AuthResponse, notice: &str) -> Result<SignedIn, Error> {
        self.store().set_session(
            response.token.clone(),
            response.refresh_token.clone(),
            response.user.clone(),
        )?;
        self.lifecycle.mark_authenticated();
        self.lifecycle.notify(NoticeLevel::Success, notice);
        Ok(SignedIn::from_response(response, false))
    }

    /// Email/password sign-in.
    ///
    /// Administrator accounts come back with `is_admin = true` and the
    /// regular session cleared instead of populated.
    ///
    /// # Errors
    ///
    /// Any provider or backend failure, described for the login form.
    pub async fn login(&self, email: &str, password: &str) -> Result<SignedIn, AuthFailure> {
        let exchanged = async {
            self.provider.sign_in_with_email(email, password).await?;
            let firebase_token = self.provider.id_token(false).await?;
            self.backend().login(&firebase_token).await
        }
        .await;

        let outcome = exchanged.and_then(|response| {
            if response.user.as_ref().is_some_and(UserProfile::is_admin) {
                self.store().clear_logged();
                self.lifecycle.reset();
                self.lifecycle.notify(NoticeLevel::Success, SIGNED_IN_ADMIN);
                tracing::info!("Administrator signed in; session handed to caller");
                return Ok(SignedIn::from_response(response, true));
            }
            self.establish(response, SIGNED_IN)
        });
        outcome.map_err(|e| self.fail("login", self.messages.describe_login(&e), e))
    }

    /// Anonymous sign-in, registering an anonymous-mode account on first use.
    ///
    /// # Errors
    ///
    /// Any provider failure, or a backend failure other than "user not
    /// found" on login.
    pub async fn login_anonymously(&self) -> Result<SignedIn, AuthFailure> {
        let exchanged = async {
            let anonymous = self.provider.sign_in_anonymously().await?;
            let firebase_token = self.provider.id_token(false).await?;
            match self.backend().login(&firebase_token).await {
                Err(e) if e.is_backend_user_not_found() => {
                    tracing::info!("No backend account for anonymous user; registering one");
                    let email = format!(
                        "anonymous_{}@{}",
                        anonymous.uid, self.anonymous_email_domain
                    );
                    self.backend().register(&email, &firebase_token, true).await
                }
                other => other,
            }
        }
        .await;

        exchanged
            .and_then(|response| self.establish(response, CONTINUING_ANONYMOUSLY))
            .map_err(|e| self.fail("login_anonymously", ANONYMOUS_FAILED.into(), e))
    }

    /// Creates the provider account and registers it with the backend.
    ///
    /// With `auto_login` the new session is stored; without it the provider
    /// is signed back out and [`Registration::LoginRequired`] is returned.
    ///
    /// # Errors
    ///
    /// Any provider or backend failure, described for the registration form.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        anonymous_mode: bool,
        auto_login: bool,
    ) -> Result<Registration, AuthFailure> {
        let exchanged = async {
            self.provider.create_user_with_email(email, password).await?;
            let firebase_token = self.provider.id_token(false).await?;
            self.backend()
                .register(email, &firebase_token, anonymous_mode)
                .await
        }
        .await;

        let response =
            exchanged.map_err(|e| self.fail("register", self.messages.describe_register(&e), e))?;

        if auto_login {
            return self
                .establish(response, ACCOUNT_CREATED)
                .map(Registration::SignedIn)
                .map_err(|e| self.fail("register", self.messages.describe_register(&e), e));
        }

        if let Err(e) = self.provider.sign_out().await {
            tracing::debug!(error = %e, "Provider sign-out after registration failed");
        }
        self.store().clear_logged();
        self.lifecycle.reset();
        self.lifecycle.notify(NoticeLevel::Success, ACCOUNT_CREATED_LOGIN);
        Ok(Registration::LoginRequired)
    }

    /// Applies `update` to the signed-in user and returns the merged profile.
    ///
    /// # Errors
    ///
    /// [`Error::NoActiveSession`] without a signed-in user,
    /// [`Error::Unsupported`] for anything but an anonymous-mode change, or
    /// the backend failure.
    pub async fn update_user(&self, update: UserUpdate) -> Result<UserProfile, AuthFailure> {
        let session = self.store().snapshot();
        let (Some(user_id), Some(_)) = (
            session.user.as_ref().and_then(|u| u.id.clone()),
            session.access_token,
        ) else {
            return Err(AuthFailure::new("No active session", Error::NoActiveSession));
        };
        let Some(anonymous_mode) = update.anonymous_mode else {
            return Err(AuthFailure::new(
                "Only anonymous mode updates are supported",
                Error::Unsupported("user update without anonymous mode".into()),
            ));
        };

        let backend = self.backend();
        let updated = self
            .coordinator
            .execute(|token| {
                let user_id = &user_id;
                async move {
                    backend
                        .update_anonymous_mode(user_id, anonymous_mode, &token)
                        .await
                }
            })
            .await
            .and_then(|patch| self.store().update_user(patch));
        updated.map_err(|e| self.fail("update_user", UPDATE_FAILED.into(), e))
    }

    /// Upgrades the anonymous provider account to email/password, keeping its
    /// identity, and swaps in the session the backend issues for it.
    ///
    /// # Errors
    ///
    /// Any provider or backend failure, described for the conversion form.
    pub async fn convert_anonymous_to_full(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, AuthFailure> {
        let exchanged = async {
            self.provider.link_email_password(email, password).await?;
            let firebase_token = self.provider.id_token(true).await?;
            let current = self.store().access_token();
            self.backend()
                .convert_anonymous(email, password, &firebase_token, current.as_deref())
                .await
        }
        .await;

        exchanged
            .and_then(|response| self.establish(response, ACCOUNT_CONVERTED))
            .map_err(|e| {
                self.fail(
                    "convert_anonymous_to_full",
                    self.messages.describe_conversion(&e),
                    e,
                )
            })
    }

    /// Asks for a password-reset email.
    ///
    /// The backend is told first, best effort. An unknown email is reported
    /// as success so the form does not reveal which addresses are registered.
    ///
    /// # Errors
    ///
    /// Backend rate limiting, or a provider failure other than "user not
    /// found".
    pub async fn send_password_reset_email(&self, email: &str) -> Result<(), AuthFailure> {
        if let Err(e) = self.backend().request_password_reset(email).await {
            if e.backend_code() == Some("RATE_LIMIT_EXCEEDED") {
                let message = self.messages.get(
                    Some("RATE_LIMIT_EXCEEDED"),
                    "Too many reset requests. Please try again later.",
                );
                return Err(self.fail("send_password_reset_email", message, e));
            }
            tracing::warn!(error = %e, "Backend tracking failed for password reset");
        }

        match self.provider.send_password_reset_email(email).await {
            Ok(()) => {}
            Err(e) if e.provider_code() == Some(&ProviderErrorCode::UserNotFound) => {
                tracing::debug!("Password reset requested for unknown email");
            }
            Err(e) => {
                let message = self.messages.describe_password_reset(&e);
                return Err(self.fail("send_password_reset_email", message, e));
            }
        }
        self.lifecycle.notify(
            NoticeLevel::Success,
            &format!("Password reset email sent to {email}"),
        );
        Ok(())
    }

    /// Signs out everywhere. Local state is cleared before the provider is
    /// contacted; remote failures are logged and ignored.
    pub async fn logout(&self) {
        if let Some(token) = self.store().access_token() {
            if let Err(e) = self.backend().logout(&token).await {
                tracing::warn!(error = %e, "Backend logout failed");
            }
        }

        self.store().clear_logged();
        self.lifecycle.reset();

        if let Err(e) = self.provider.sign_out().await {
            tracing::warn!(error = %e, "Provider sign-out failed");
        }
        self.lifecycle.notify(NoticeLevel::Info, LOGGED_OUT);
    }

    /// Confirms a restored session against `GET /api/auth/me`.
    ///
    /// Returns `Ok(None)` when no session is stored. A confirmed user is
    /// stored and greeted once with "Welcome back!".
    ///
    /// # Errors
    ///
    /// The backend failure. The session is cleared on `401`/`403` (after
    /// one refresh attempt) and kept otherwise.
    pub async fn resume_session(&self) -> Result<Option<UserProfile>, Error> {
        if self.store().access_token().is_none() {
            return Ok(None);
        }
        let backend = self.backend();
        let confirmed = self
            .coordinator
            .execute(|token| async move { backend.me(&token).await })
            .await;

        match confirmed {
            Ok(user) => {
                self.store().set_user(user.clone())?;
                self.lifecycle.show_welcome_back_once();
                Ok(Some(user))
            }
            Err(e) if matches!(e.status(), Some(401 | 403)) => {
                tracing::info!(error = %e, "Stored session rejected; clearing");
                self.store().clear_logged();
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not confirm stored session; keeping it");
                Err(e)
            }
        }
    }
}

impl<P, B> std::fmt::Debug for AuthActions<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthActions")
            .field("anonymous_email_domain", &self.anonymous_email_domain)
            .finish_non_exhaustive()
    }
}
