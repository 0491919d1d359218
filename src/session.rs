use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::error::Error;
use crate::storage::Storage;
use crate::types::{UserPatch, UserProfile};

/// Storage keys for one isolated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: &'static str,
    pub refresh_token: &'static str,
    pub user: &'static str,
}

impl StorageKeys {
    /// Keys of the consumer-facing session.
    #[must_use]
    pub const fn regular() -> Self {
        Self {
            access_token: "token",
            refresh_token: "refreshToken",
            user: "user",
        }
    }

    /// Keys of the admin session; disjoint from [`StorageKeys::regular`].
    #[must_use]
    pub const fn admin() -> Self {
        Self {
            access_token: "adminToken",
            refresh_token: "adminRefreshToken",
            user: "adminUser",
        }
    }

    fn all(&self) -> [&'static str; 3] {
        [self.access_token, self.refresh_token, self.user]
    }
}

/// Snapshot of the authenticated identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl Session {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

/// Token half of a session, broadcast to observers on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Owned session state with write-through persistence.
///
/// One instance per isolated session (regular app, admin surface), shared
/// by `Arc`. Mutations hold the write lock across both the in-memory update
/// and the storage write.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    keys: StorageKeys,
    state: RwLock<Session>,
    tokens_tx: watch::Sender<TokenState>,
}

impl SessionStore {
    /// Creates an empty store. Call [`restore`](Self::restore) to load what a
    /// previous run persisted.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, keys: StorageKeys) -> Self {
        let (tokens_tx, _) = watch::channel(TokenState::default());
        Self {
            storage,
            keys,
            state: RwLock::new(Session::default()),
            tokens_tx,
        }
    }

    #[must_use]
    pub fn keys(&self) -> StorageKeys {
        self.keys
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn publish(&self, session: &Session) {
        let next = TokenState {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
        };
        self.tokens_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Loads the persisted session.
    ///
    /// A stored user without a stored access token is discarded, as is a
    /// user object that no longer parses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if storage cannot be read.
    pub fn restore(&self) -> Result<Session, Error> {
        let access_token = self.storage.get(self.keys.access_token)?;
        let refresh_token = self.storage.get(self.keys.refresh_token)?;
        let user = match self.storage.get(self.keys.user)? {
            Some(json) if access_token.is_some() => match serde_json::from_str(&json) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(error = %e, key = self.keys.user, "Discarding unreadable stored user");
                    self.storage.remove(self.keys.user)?;
                    None
                }
            },
            Some(_) => {
                self.storage.remove(self.keys.user)?;
                None
            }
            None => None,
        };

        let mut state = self.write();
        *state = Session {
            access_token,
            refresh_token,
            user,
        };
        self.publish(&state);
        Ok(state.clone())
    }

    /// Replaces the token pair. `refresh_token = None` removes the stored
    /// refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the tokens cannot be persisted; memory
    /// is left unchanged in that case.
    pub fn set_tokens(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Result<(), Error> {
        let access_token = access_token.into();
        let mut state = self.write();
        self.storage.write_all(&[
            (self.keys.access_token, Some(access_token.as_str())),
            (self.keys.refresh_token, refresh_token.as_deref()),
        ])?;
        state.access_token = Some(access_token);
        state.refresh_token = refresh_token;
        self.publish(&state);
        Ok(())
    }

    /// Replaces the whole session: tokens and user together. A `None` user
    /// removes whatever user the previous session held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the session cannot be persisted; memory
    /// is left unchanged in that case.
    pub fn set_session(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        user: Option<UserProfile>,
    ) -> Result<(), Error> {
        let access_token = access_token.into();
        let user_json = user
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let mut state = self.write();
        self.storage.write_all(&[
            (self.keys.access_token, Some(access_token.as_str())),
            (self.keys.refresh_token, refresh_token.as_deref()),
            (self.keys.user, user_json.as_deref()),
        ])?;
        *state = Session {
            access_token: Some(access_token),
            refresh_token,
            user,
        };
        self.publish(&state);
        Ok(())
    }

    /// Stores the resolved user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] when no access token is held, or
    /// [`Error::Storage`] if the user cannot be persisted.
    pub fn set_user(&self, user: UserProfile) -> Result<(), Error> {
        let mut state = self.write();
        if state.access_token.is_none() {
            return Err(Error::NoActiveSession);
        }
        let json = serde_json::to_string(&user).map_err(|e| Error::Storage(e.to_string()))?;
        self.storage.set(self.keys.user, &json)?;
        state.user = Some(user);
        Ok(())
    }

    /// Merges `patch` into the stored user and returns the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] when there is no user to update.
    pub fn update_user(&self, patch: UserPatch) -> Result<UserProfile, Error> {
        let mut state = self.write();
        if state.access_token.is_none() {
            return Err(Error::NoActiveSession);
        }
        let mut user = state.user.clone().ok_or(Error::NoActiveSession)?;
        user.merge(patch);
        let json = serde_json::to_string(&user).map_err(|e| Error::Storage(e.to_string()))?;
        self.storage.set(self.keys.user, &json)?;
        state.user = Some(user.clone());
        Ok(user)
    }

    /// Drops tokens and user.
    ///
    /// Memory is always cleared; a storage failure is reported after the
    /// fact so callers still end up signed out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the persisted keys could not be removed.
    pub fn clear(&self) -> Result<(), Error> {
        let mut state = self.write();
        *state = Session::default();
        self.publish(&state);
        self.storage.remove_all(&self.keys.all())
    }

    /// [`clear`](Self::clear), logging instead of returning storage failures.
    pub fn clear_logged(&self) {
        if let Err(e) = self.clear() {
            tracing::error!(error = %e, "Failed to remove persisted session");
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.read().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        let state = self.read();
        state.access_token.is_some() && state.user.is_some()
    }

    /// Receiver that observes every token change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TokenState> {
        self.tokens_tx.subscribe()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("SessionStore")
            .field("keys", &self.keys)
            .field("has_access_token", &state.access_token.is_some())
            .field("has_refresh_token", &state.refresh_token.is_some())
            .field("user", &state.user)
            .finish()
    }
}
