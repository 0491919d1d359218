#![doc = include_str!("../README.md")]

pub mod actions;
pub mod admin;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
#[cfg(feature = "http")]
pub mod firebase;
#[cfg(feature = "http")]
pub mod http;
pub mod lifecycle;
pub mod messages;
pub mod provider;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use actions::{AuthActions, AuthFailure, Registration, SignedIn, UserUpdate};
pub use admin::{AdminSessionGuard, AdminState};
pub use backend::AuthBackend;
pub use config::AuthConfig;
pub use context::AuthContext;
pub use error::{Error, ProviderErrorCode};
#[cfg(feature = "http")]
pub use firebase::FirebaseRestProvider;
#[cfg(feature = "http")]
pub use http::{AuthedClient, HttpAuthBackend};
pub use lifecycle::{LifecycleNotifier, NoticeLevel, Notifier, TracingNotifier};
pub use messages::ErrorMessages;
pub use provider::IdentityProvider;
pub use refresh::{RefreshCoordinator, RefreshHandle, TokenPhase};
pub use session::{Session, SessionStore, StorageKeys};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use token::Claims;
pub use types::{AuthResponse, ProviderUid, ProviderUser, TokenPair, UserId, UserPatch, UserProfile};
