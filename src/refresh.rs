//! Access-token renewal.
//!
//! Two triggers lead into a refresh: a proactive timer armed for
//! `exp - skew` on every token change ([`RefreshCoordinator::start`]), and a
//! reactive retry when an authenticated request comes back unauthorized
//! ([`RefreshCoordinator::execute`]). Either way at most one refresh call is
//! on the wire per coordinator; callers arriving meanwhile wait for its
//! outcome.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::backend::AuthBackend;
use crate::error::Error;
use crate::session::{SessionStore, TokenState};
use crate::token;
use crate::types::TokenPair;

/// Where the current access token stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    /// Expiry is further away than the skew window.
    Valid,
    /// Within the skew window; a refresh is due.
    NearExpiry,
    /// A refresh call is in flight.
    Refreshing,
    /// No usable token; the session is gone.
    Expired,
}

type Waiter = oneshot::Sender<Result<String, Error>>;

/// In-flight bookkeeping. Only `Refreshing` owns a queue, so a second
/// network call cannot start while one is outstanding.
enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

type ExpiredHook = Arc<dyn Fn() + Send + Sync>;

pub struct RefreshCoordinator<B> {
    backend: Arc<B>,
    store: Arc<SessionStore>,
    skew: Duration,
    state: Mutex<RefreshState>,
    on_expired: Option<ExpiredHook>,
}

impl<B: AuthBackend> RefreshCoordinator<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, store: Arc<SessionStore>, skew: Duration) -> Self {
        Self {
            backend,
            store,
            skew,
            state: Mutex::new(RefreshState::Idle),
            on_expired: None,
        }
    }

    /// Called once each time a refresh failure ends the session.
    #[must_use]
    pub fn with_session_expired_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_expired = Some(Arc::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn skew_ms(&self) -> i64 {
        i64::try_from(self.skew.as_millis()).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn phase(&self) -> TokenPhase {
        if matches!(*self.lock(), RefreshState::Refreshing { .. }) {
            return TokenPhase::Refreshing;
        }
        match self.store.access_token() {
            None => TokenPhase::Expired,
            Some(access) if token::is_expired(&access, self.skew_ms()) => TokenPhase::NearExpiry,
            Some(_) => TokenPhase::Valid,
        }
    }

    /// Renews the access token, joining the in-flight call if there is one.
    ///
    /// The network call runs in its own task, so dropping this future does
    /// not abandon the refresh for other waiters.
    ///
    /// # Errors
    ///
    /// Every caller waiting on a failed refresh gets the same error; the
    /// session has been cleared by then. [`Error::SessionExpired`] when no
    /// refresh token was available.
    pub async fn refresh(self: &Arc<Self>) -> Result<String, Error> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            match &mut *state {
                RefreshState::Refreshing { waiters } => waiters.push(tx),
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.run_refresh().await });
                }
            }
        }
        rx.await.unwrap_or(Err(Error::SessionExpired))
    }

    async fn run_refresh(&self) {
        let outcome = match self.store.refresh_token() {
            None => {
                tracing::warn!("No refresh token available; ending session");
                self.expire();
                Err(Error::SessionExpired)
            }
            Some(used) => {
                let result = self.backend.refresh(&used).await;
                if self.store.refresh_token().as_deref() != Some(used.as_str()) {
                    // Logout or a new sign-in happened while the call was out.
                    tracing::debug!("Session changed during refresh; discarding result");
                    self.store.access_token().ok_or(Error::SessionExpired)
                } else {
                    match result.and_then(|pair| self.apply(pair, used)) {
                        Ok(access) => Ok(access),
                        Err(e) => {
                            tracing::warn!(error = %e, "Token refresh failed; ending session");
                            self.expire();
                            Err(e)
                        }
                    }
                }
            }
        };

        let waiters = match std::mem::replace(&mut *self.lock(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn apply(&self, pair: TokenPair, used: String) -> Result<String, Error> {
        if pair.token.trim().is_empty() {
            tracing::error!("Refresh response carried no access token");
            return Err(Error::InvalidResponse(
                "missing token in refresh response".into(),
            ));
        }
        let access = pair.token;
        self.store
            .set_tokens(access.clone(), pair.refresh_token.or(Some(used)))?;
        Ok(access)
    }

    fn expire(&self) {
        self.store.clear_logged();
        if let Some(hook) = &self.on_expired {
            hook();
        }
    }

    /// Runs an authenticated request, refreshing and retrying once on
    /// `401 Unauthorized`.
    ///
    /// `request` receives the bearer token to use. The retry's outcome is
    /// returned as-is, so a token that is rejected again does not loop.
    ///
    /// # Errors
    ///
    /// [`Error::NoActiveSession`] without an access token; the refresh error
    /// when renewal fails; otherwise whatever `request` returns.
    pub async fn execute<T, F, Fut>(self: &Arc<Self>, request: F) -> Result<T, Error>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let sent_with = self.store.access_token().ok_or(Error::NoActiveSession)?;
        match request(sent_with.clone()).await {
            Err(e) if e.is_unauthorized() => {
                tracing::debug!("Request unauthorized; refreshing access token");
                let next = match self.store.access_token() {
                    Some(current) if current != sent_with => current,
                    Some(_) => self.refresh().await?,
                    // Already ended by another caller's failed refresh.
                    None => return Err(e),
                };
                request(next).await
            }
            other => other,
        }
    }

    /// Arms the proactive timer and keeps re-arming it on every token change
    /// until the returned handle is dropped.
    #[must_use = "dropping the handle stops proactive refresh"]
    pub fn start(self: &Arc<Self>) -> RefreshHandle {
        let mut tokens = self.store.subscribe();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            // One proactive attempt per access token.
            let mut attempted: Option<String> = None;
            loop {
                let current = tokens.borrow_and_update().clone();
                match this.proactive_delay(&current, attempted.as_deref()) {
                    None => {
                        if tokens.changed().await.is_err() {
                            break;
                        }
                    }
                    Some(delay) => {
                        tokio::select! {
                            changed = tokens.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            () = tokio::time::sleep(delay) => {
                                attempted = current.access_token.clone();
                                tracing::debug!("Refreshing access token ahead of expiry");
                                if let Err(e) = this.refresh().await {
                                    tracing::warn!(error = %e, "Proactive token refresh failed");
                                }
                            }
                        }
                    }
                }
            }
        });
        RefreshHandle { task }
    }

    /// Time until the proactive refresh for `tokens`, `None` if there is
    /// nothing to schedule.
    fn proactive_delay(&self, tokens: &TokenState, attempted: Option<&str>) -> Option<Duration> {
        let access = tokens.access_token.as_deref()?;
        tokens.refresh_token.as_ref()?;
        if attempted == Some(access) {
            return None;
        }
        let expires_at = token::expiration_ms(access)?;
        let due_in = expires_at - token::now_ms() - self.skew_ms();
        Some(Duration::from_millis(u64::try_from(due_in).unwrap_or(0)))
    }
}

impl<B> std::fmt::Debug for RefreshCoordinator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("skew", &self.skew)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Owns the proactive refresh task; aborts it on drop.
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Cancels the proactive refresh task now.
    pub fn stop(self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
