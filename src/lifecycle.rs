use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Sink for user-visible notices (toasts in the web client).
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Writes notices to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Success | NoticeLevel::Info => tracing::info!(?level, "{message}"),
            NoticeLevel::Error => tracing::warn!(?level, "{message}"),
        }
    }
}

pub const WELCOME_BACK: &str = "Welcome back!";
pub const SESSION_EXPIRED: &str = "Session expired. Please log in again.";

#[derive(Debug, Default)]
struct Flags {
    welcome_shown: bool,
    /// When the session-expired notice last fired; cleared after the cooldown.
    expired_shown_at: Option<Instant>,
    route: String,
}

/// One-shot "welcome back" and "session expired" notices.
pub struct LifecycleNotifier {
    notifier: Arc<dyn Notifier>,
    suppressed_prefixes: Vec<String>,
    cooldown: Duration,
    flags: Mutex<Flags>,
}

impl LifecycleNotifier {
    #[must_use]
    pub fn new(
        notifier: Arc<dyn Notifier>,
        suppressed_prefixes: Vec<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            notifier,
            suppressed_prefixes,
            cooldown,
            flags: Mutex::new(Flags::default()),
        }
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The underlying sink, for notices that are not lifecycle events.
    #[must_use]
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn notify(&self, level: NoticeLevel, message: &str) {
        self.notifier.notify(level, message);
    }

    /// Records the route the UI currently shows.
    pub fn set_route(&self, path: impl Into<String>) {
        self.flags().route = path.into();
    }

    #[must_use]
    pub fn should_suppress(&self) -> bool {
        let flags = self.flags();
        self.is_suppressed(&flags.route)
    }

    fn is_suppressed(&self, route: &str) -> bool {
        self.suppressed_prefixes
            .iter()
            .any(|prefix| route.starts_with(prefix.as_str()))
    }

    /// Explicit sign-in: no welcome-back for this session, expiry may notify.
    pub fn mark_authenticated(&self) {
        let mut flags = self.flags();
        flags.welcome_shown = true;
        flags.expired_shown_at = None;
    }

    /// Sign-out: both notices may fire again.
    pub fn reset(&self) {
        let mut flags = self.flags();
        flags.welcome_shown = false;
        flags.expired_shown_at = None;
    }

    /// Emits "Welcome back!" once per session. Returns whether it fired.
    pub fn show_welcome_back_once(&self) -> bool {
        let mut flags = self.flags();
        if flags.welcome_shown || self.is_suppressed(&flags.route) {
            return false;
        }
        flags.welcome_shown = true;
        drop(flags);
        self.notifier.notify(NoticeLevel::Success, WELCOME_BACK);
        true
    }

    /// Emits the session-expired notice unless it fired within the cooldown.
    /// Returns whether it fired.
    pub fn show_session_expired_once(&self) -> bool {
        let mut flags = self.flags();
        if self.is_suppressed(&flags.route) {
            return false;
        }
        let now = Instant::now();
        if let Some(shown_at) = flags.expired_shown_at {
            if now.duration_since(shown_at) < self.cooldown {
                return false;
            }
        }
        flags.expired_shown_at = Some(now);
        drop(flags);
        self.notifier.notify(NoticeLevel::Error, SESSION_EXPIRED);
        true
    }
}

impl std::fmt::Debug for LifecycleNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleNotifier")
            .field("suppressed_prefixes", &self.suppressed_prefixes)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    fn lifecycle() -> (LifecycleNotifier, Arc<RecordingNotifier>) {
        let recorder = Arc::new(RecordingNotifier::default());
        let lifecycle = LifecycleNotifier::new(
            recorder.clone(),
            vec!["/admin".into(), "/login".into()],
            Duration::from_secs(3),
        );
        (lifecycle, recorder)
    }

    #[test]
    fn welcome_back_fires_once_per_session() {
        let (lifecycle, recorder) = lifecycle();
        lifecycle.set_route("/dashboard");
        assert!(lifecycle.show_welcome_back_once());
        assert!(!lifecycle.show_welcome_back_once());

        lifecycle.reset();
        assert!(lifecycle.show_welcome_back_once());
        assert_eq!(recorder.count(WELCOME_BACK), 2);
    }

    #[test]
    fn explicit_sign_in_skips_welcome_back() {
        let (lifecycle, recorder) = lifecycle();
        lifecycle.mark_authenticated();
        assert!(!lifecycle.show_welcome_back_once());
        assert!(recorder.messages().is_empty());
    }

    #[test]
    fn suppressed_on_admin_and_login_routes() {
        let (lifecycle, recorder) = lifecycle();
        lifecycle.set_route("/admin/crisis");
        assert!(lifecycle.should_suppress());
        assert!(!lifecycle.show_welcome_back_once());
        assert!(!lifecycle.show_session_expired_once());
        lifecycle.set_route("/login");
        assert!(!lifecycle.show_session_expired_once());
        assert!(recorder.messages().is_empty());

        lifecycle.set_route("/journal");
        assert!(lifecycle.show_welcome_back_once());
    }

    #[tokio::test(start_paused = true)]
    async fn session_expired_has_cooldown() {
        let (lifecycle, recorder) = lifecycle();
        assert!(lifecycle.show_session_expired_once());
        assert!(!lifecycle.show_session_expired_once());

        tokio::time::advance(Duration::from_millis(2_999)).await;
        assert!(!lifecycle.show_session_expired_once());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(lifecycle.show_session_expired_once());
        assert_eq!(recorder.count(SESSION_EXPIRED), 2);
    }

    #[test]
    fn sign_in_rearms_session_expired() {
        let (lifecycle, _recorder) = lifecycle();
        assert!(lifecycle.show_session_expired_once());
        lifecycle.mark_authenticated();
        assert!(lifecycle.show_session_expired_once());
    }
}
