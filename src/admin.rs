//! Storage-isolated administrator session.
//!
//! Tokens are trusted optimistically from their decoded claims
//! ([`AdminState::Provisional`]) and then confirmed against the backend
//! ([`AdminState::Confirmed`]). Anything that contradicts the admin role
//! clears the admin session.

use std::sync::{Arc, RwLock};

use crate::backend::AuthBackend;
use crate::error::Error;
use crate::lifecycle::{LifecycleNotifier, NoticeLevel};
use crate::provider::IdentityProvider;
use crate::session::SessionStore;
use crate::token::{self, Claims};
use crate::types::UserProfile;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AdminState {
    #[default]
    Signedout,
    /// Decoded claims look administrative; the backend has not confirmed yet.
    Provisional(Claims),
    Confirmed(UserProfile),
    /// The stored session was rejected and cleared.
    Rejected,
}

impl AdminState {
    /// `true` for both provisional and confirmed sessions.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Provisional(_) | Self::Confirmed(_))
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

const ADMIN_SIGNED_IN: &str = "Admin signed in";
const NOT_ADMIN: &str = "Not an admin account";

pub struct AdminSessionGuard<P, B> {
    provider: Arc<P>,
    backend: Arc<B>,
    store: Arc<SessionStore>,
    lifecycle: Arc<LifecycleNotifier>,
    state: RwLock<AdminState>,
}

impl<P: IdentityProvider, B: AuthBackend> AdminSessionGuard<P, B> {
    /// `store` must use [`StorageKeys::admin`](crate::session::StorageKeys::admin).
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        backend: Arc<B>,
        store: Arc<SessionStore>,
        lifecycle: Arc<LifecycleNotifier>,
    ) -> Self {
        Self {
            provider,
            backend,
            store,
            lifecycle,
            state: RwLock::new(AdminState::Signedout),
        }
    }

    #[must_use]
    pub fn state(&self) -> AdminState {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: AdminState) -> AdminState {
        *self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = next.clone();
        next
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn reject(&self, reason: &str) -> AdminState {
        tracing::warn!(reason, "Rejecting stored admin session");
        self.store.clear_logged();
        self.set_state(AdminState::Rejected)
    }

    /// Restores and re-validates the stored admin session.
    ///
    /// Passes through [`AdminState::Provisional`] while `GET /api/auth/me`
    /// is outstanding. Stays provisional when the backend cannot be reached.
    pub async fn bootstrap(&self) -> AdminState {
        let stored = match self.store.restore() {
            Ok(session) => session.access_token,
            Err(e) => {
                tracing::error!(error = %e, "Could not read stored admin session");
                return self.reject("storage unreadable");
            }
        };
        let Some(access) = stored else {
            return self.set_state(AdminState::Signedout);
        };

        match token::decode(&access) {
            Some(claims) if claims.is_admin() => {
                tracing::debug!(admin = claims.display_identity(), "Provisional admin session");
                self.set_state(AdminState::Provisional(claims));
            }
            Some(_) => return self.reject("token claims are not administrative"),
            None => return self.reject("token does not decode"),
        }

        match self.backend.me(&access).await {
            Ok(user) if user.is_admin() => {
                if let Err(e) = self.store.set_user(user.clone()) {
                    tracing::warn!(error = %e, "Could not persist confirmed admin user");
                }
                self.set_state(AdminState::Confirmed(user))
            }
            Ok(_) => self.reject("backend user is not an administrator"),
            Err(Error::Network(e)) => {
                tracing::warn!(error = %e, "Admin confirmation unreachable; staying provisional");
                self.state()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Admin confirmation failed");
                self.reject("confirmation failed")
            }
        }
    }

    /// Takes over an already-issued admin session (one that
    /// [`AuthActions::login`](crate::actions::AuthActions::login) handed
    /// back with `is_admin`).
    ///
    /// # Errors
    ///
    /// [`Error::NotAdmin`] unless the token's claims are administrative and
    /// `user`, when it states a role, agrees. The admin store is untouched
    /// on rejection.
    pub fn adopt(
        &self,
        access_token: &str,
        refresh_token: Option<String>,
        user: Option<UserProfile>,
    ) -> Result<AdminState, Error> {
        let claims = token::decode(access_token)
            .filter(Claims::is_admin)
            .ok_or(Error::NotAdmin)?;
        if user.as_ref().is_some_and(UserProfile::states_non_admin_role) {
            return Err(Error::NotAdmin);
        }

        self.store
            .set_session(access_token, refresh_token, user.clone())?;
        let next = match user {
            Some(user) => AdminState::Confirmed(user),
            None => AdminState::Provisional(claims),
        };
        Ok(self.set_state(next))
    }

    /// Admin sign-in from the admin surface.
    ///
    /// # Errors
    ///
    /// Provider and backend failures as-is; [`Error::NotAdmin`] when the
    /// account is not an administrator, after signing the provider back out.
    pub async fn login(&self, email: &str, password: &str) -> Result<AdminState, Error> {
        let result = async {
            self.provider.sign_in_with_email(email, password).await?;
            let firebase_token = self.provider.id_token(false).await?;
            let response = self.backend.login(&firebase_token).await?;
            if !response.user.as_ref().is_some_and(UserProfile::is_admin) {
                return Err(Error::NotAdmin);
            }
            self.adopt(&response.token, response.refresh_token, response.user)
        }
        .await;

        match result {
            Ok(state) => {
                self.lifecycle.notify(NoticeLevel::Success, ADMIN_SIGNED_IN);
                Ok(state)
            }
            Err(Error::NotAdmin) => {
                if let Err(e) = self.provider.sign_out().await {
                    tracing::debug!(error = %e, "Provider sign-out after admin rejection failed");
                }
                self.lifecycle.notify(NoticeLevel::Error, NOT_ADMIN);
                Err(Error::NotAdmin)
            }
            Err(e) => {
                let message = e
                    .backend_message()
                    .map_or_else(|| e.to_string(), str::to_owned);
                tracing::warn!(error = %e, "Admin login failed");
                self.lifecycle.notify(NoticeLevel::Error, &message);
                Err(e)
            }
        }
    }

    /// Clears the admin session. The provider session is left alone so the
    /// regular app stays signed in.
    pub fn logout(&self) {
        self.store.clear_logged();
        self.set_state(AdminState::Signedout);
    }
}

impl<P, B> std::fmt::Debug for AdminSessionGuard<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSessionGuard")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
