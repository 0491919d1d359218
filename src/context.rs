//! One-per-boot wiring of the session components.

use std::sync::Arc;

use crate::actions::AuthActions;
use crate::admin::AdminSessionGuard;
use crate::backend::AuthBackend;
use crate::config::AuthConfig;
use crate::error::Error;
use crate::lifecycle::{LifecycleNotifier, Notifier};
use crate::provider::IdentityProvider;
use crate::refresh::{RefreshCoordinator, RefreshHandle};
use crate::session::{Session, SessionStore, StorageKeys};
use crate::storage::Storage;

/// Owns the regular session, its refresh coordinator, the lifecycle
/// notifier, the action set and the admin guard.
///
/// Build one per application run and hand out the `Arc`s it exposes.
///
/// ```rust
/// # #[cfg(feature = "http")] {
/// use std::sync::Arc;
/// use mindease_auth::{AuthConfig, AuthContext, FirebaseRestProvider, HttpAuthBackend};
/// use mindease_auth::storage::MemoryStorage;
/// use mindease_auth::lifecycle::TracingNotifier;
///
/// let config = AuthConfig::default().with_firebase_api_key("web-api-key");
/// let context = AuthContext::new(
///     config.clone(),
///     Arc::new(FirebaseRestProvider::from_config(&config).unwrap()),
///     Arc::new(HttpAuthBackend::new(config)),
///     Arc::new(MemoryStorage::new()),
///     Arc::new(TracingNotifier),
/// );
/// assert!(!context.session().is_authenticated());
/// # }
/// ```
pub struct AuthContext<P, B> {
    config: AuthConfig,
    session: Arc<SessionStore>,
    lifecycle: Arc<LifecycleNotifier>,
    refresh: Arc<RefreshCoordinator<B>>,
    actions: Arc<AuthActions<P, B>>,
    admin: Arc<AdminSessionGuard<P, B>>,
}

impl<P: IdentityProvider, B: AuthBackend> AuthContext<P, B> {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        provider: Arc<P>,
        backend: Arc<B>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(storage.clone(), StorageKeys::regular()));
        let admin_session = Arc::new(SessionStore::new(storage, StorageKeys::admin()));
        let lifecycle = Arc::new(LifecycleNotifier::new(
            notifier,
            config.suppressed_route_prefixes().to_vec(),
            config.session_expired_cooldown(),
        ));

        let expired = lifecycle.clone();
        let refresh = Arc::new(
            RefreshCoordinator::new(backend.clone(), session.clone(), config.refresh_skew())
                .with_session_expired_hook(move || {
                    expired.show_session_expired_once();
                }),
        );
        let actions = Arc::new(AuthActions::new(
            &config,
            provider.clone(),
            refresh.clone(),
            lifecycle.clone(),
        ));
        let admin = Arc::new(AdminSessionGuard::new(
            provider,
            backend,
            admin_session,
            lifecycle.clone(),
        ));

        Self {
            config,
            session,
            lifecycle,
            refresh,
            actions,
            admin,
        }
    }

    /// Loads the persisted regular session into memory.
    ///
    /// Follow with [`start_refresh`](Self::start_refresh) and
    /// [`AuthActions::resume_session`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage cannot be read.
    pub fn restore(&self) -> Result<Session, Error> {
        let session = self.session.restore()?;
        tracing::debug!(
            authenticated = session.access_token.is_some(),
            "Restored session"
        );
        Ok(session)
    }

    /// Starts proactive token refresh; it runs until the handle is dropped.
    #[must_use = "dropping the handle stops proactive refresh"]
    pub fn start_refresh(&self) -> RefreshHandle {
        self.refresh.start()
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<LifecycleNotifier> {
        &self.lifecycle
    }

    #[must_use]
    pub fn refresh(&self) -> &Arc<RefreshCoordinator<B>> {
        &self.refresh
    }

    #[must_use]
    pub fn actions(&self) -> &Arc<AuthActions<P, B>> {
        &self.actions
    }

    #[must_use]
    pub fn admin(&self) -> &Arc<AdminSessionGuard<P, B>> {
        &self.admin
    }

    /// API client sharing this context's session and refresh coordinator.
    #[cfg(feature = "http")]
    #[must_use]
    pub fn authed_client(&self) -> crate::http::AuthedClient<B> {
        crate::http::AuthedClient::new(
            self.config.clone(),
            self.refresh.clone(),
            self.lifecycle.clone(),
        )
    }
}

impl<P, B> std::fmt::Debug for AuthContext<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
