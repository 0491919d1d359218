//! In-process fakes for the backend, the identity provider and the notice
//! sink.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::backend::AuthBackend;
use crate::error::Error;
use crate::lifecycle::{NoticeLevel, Notifier};
use crate::provider::IdentityProvider;
use crate::token::test_token;
use crate::types::{AuthResponse, ProviderUser, TokenPair, UserId, UserPatch, UserProfile};

#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingNotifier {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub(crate) fn count(&self, message: &str) -> usize {
        self.messages().iter().filter(|m| *m == message).count()
    }

    pub(crate) fn last(&self) -> Option<(NoticeLevel, String)> {
        self.notices.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().unwrap().push((level, message.to_owned()));
    }
}

pub(crate) fn backend_error(status: u16, code: Option<&str>) -> Error {
    Error::Backend {
        status,
        code: code.map(str::to_owned),
        message: None,
    }
}

pub(crate) fn session_for(user: UserProfile) -> AuthResponse {
    let role = user.role.clone().unwrap_or_else(|| "USER".into());
    AuthResponse::new(test_token(&role, 3600), Some("refresh-token".into()), user)
}

/// Scripted backend. Unscripted endpoints succeed with plausible data.
#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    login: Mutex<Option<Result<AuthResponse, Error>>>,
    register: Mutex<Option<Result<AuthResponse, Error>>>,
    refresh: Mutex<Option<Result<TokenPair, Error>>>,
    me: Mutex<Option<Result<UserProfile, Error>>>,
    logout: Mutex<Option<Result<(), Error>>>,
    password_reset: Mutex<Option<Result<(), Error>>>,
    convert: Mutex<Option<Result<AuthResponse, Error>>>,
    anonymous_mode: Mutex<Option<Result<UserPatch, Error>>>,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    last_refresh_token: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub(crate) fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub(crate) fn script_login(&self, result: Result<AuthResponse, Error>) {
        *self.login.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_register(&self, result: Result<AuthResponse, Error>) {
        *self.register.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_refresh(&self, result: Result<TokenPair, Error>) {
        *self.refresh.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_me(&self, result: Result<UserProfile, Error>) {
        *self.me.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_logout(&self, result: Result<(), Error>) {
        *self.logout.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_password_reset(&self, result: Result<(), Error>) {
        *self.password_reset.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_convert(&self, result: Result<AuthResponse, Error>) {
        *self.convert.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_anonymous_mode(&self, result: Result<UserPatch, Error>) {
        *self.anonymous_mode.lock().unwrap() = Some(result);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().unwrap().clone()
    }

    /// Endpoint log, e.g. `["login", "register anonymous_uid@mindease.com true"]`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn scripted<T: Clone>(slot: &Mutex<Option<Result<T, Error>>>) -> Option<Result<T, Error>> {
        slot.lock().unwrap().clone()
    }
}

impl AuthBackend for FakeBackend {
    async fn login(&self, firebase_token: &str) -> Result<AuthResponse, Error> {
        self.record(format!("login {firebase_token}"));
        Self::scripted(&self.login).unwrap_or_else(|| {
            Ok(session_for(
                UserProfile::new("user-1").with_email("a@b.com").with_role("USER"),
            ))
        })
    }

    async fn register(
        &self,
        email: &str,
        firebase_token: &str,
        anonymous_mode: bool,
    ) -> Result<AuthResponse, Error> {
        self.record(format!("register {email} {anonymous_mode}"));
        let _ = firebase_token;
        Self::scripted(&self.register).unwrap_or_else(|| {
            Ok(session_for(
                UserProfile::new("user-2")
                    .with_email(email)
                    .with_role("USER")
                    .with_anonymous_mode(anonymous_mode),
            ))
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_owned());
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        Self::scripted(&self.refresh).unwrap_or_else(|| {
            Ok(TokenPair::new(
                test_token("USER", 3600),
                Some("rotated-refresh".into()),
            ))
        })
    }

    async fn me(&self, access_token: &str) -> Result<UserProfile, Error> {
        let _ = access_token;
        self.record("me".into());
        Self::scripted(&self.me).unwrap_or_else(|| Ok(UserProfile::new("user-1")))
    }

    async fn logout(&self, access_token: &str) -> Result<(), Error> {
        let _ = access_token;
        self.record("logout".into());
        Self::scripted(&self.logout).unwrap_or(Ok(()))
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), Error> {
        self.record(format!("request-password-reset {email}"));
        Self::scripted(&self.password_reset).unwrap_or(Ok(()))
    }

    async fn convert_anonymous(
        &self,
        email: &str,
        password: &str,
        firebase_token: &str,
        access_token: Option<&str>,
    ) -> Result<AuthResponse, Error> {
        let _ = (password, access_token);
        self.record(format!("convert-anonymous {email} {firebase_token}"));
        Self::scripted(&self.convert).unwrap_or_else(|| {
            Ok(session_for(
                UserProfile::new("user-anon")
                    .with_email(email)
                    .with_role("USER"),
            ))
        })
    }

    async fn update_anonymous_mode(
        &self,
        user_id: &UserId,
        anonymous_mode: bool,
        access_token: &str,
    ) -> Result<UserPatch, Error> {
        let _ = access_token;
        self.record(format!("anonymous-mode {user_id} {anonymous_mode}"));
        Self::scripted(&self.anonymous_mode).unwrap_or_else(|| {
            Ok(UserPatch {
                anonymous_mode: Some(anonymous_mode),
                ..UserPatch::default()
            })
        })
    }
}

/// Scripted identity provider holding a current user like the real one.
#[derive(Debug, Default)]
pub(crate) struct FakeProvider {
    sign_in: Mutex<Option<Result<ProviderUser, Error>>>,
    create: Mutex<Option<Result<ProviderUser, Error>>>,
    link: Mutex<Option<Result<ProviderUser, Error>>>,
    password_reset: Mutex<Option<Result<(), Error>>>,
    sign_out: Mutex<Option<Result<(), Error>>>,
    current: Mutex<Option<ProviderUser>>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub(crate) fn script_sign_in(&self, result: Result<ProviderUser, Error>) {
        *self.sign_in.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_create(&self, result: Result<ProviderUser, Error>) {
        *self.create.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_link(&self, result: Result<ProviderUser, Error>) {
        *self.link.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_password_reset(&self, result: Result<(), Error>) {
        *self.password_reset.lock().unwrap() = Some(result);
    }

    pub(crate) fn script_sign_out(&self, result: Result<(), Error>) {
        *self.sign_out.lock().unwrap() = Some(result);
    }

    pub(crate) fn current_user(&self) -> Option<ProviderUser> {
        self.current.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn become_user(&self, result: Result<ProviderUser, Error>) -> Result<ProviderUser, Error> {
        if let Ok(user) = &result {
            *self.current.lock().unwrap() = Some(user.clone());
        }
        result
    }
}

impl IdentityProvider for FakeProvider {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<ProviderUser, Error> {
        let _ = password;
        self.record(format!("sign-in {email}"));
        let scripted = self.sign_in.lock().unwrap().clone();
        self.become_user(
            scripted.unwrap_or_else(|| Ok(ProviderUser::new("uid-1", Some(email.into()), false))),
        )
    }

    async fn create_user_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderUser, Error> {
        let _ = password;
        self.record(format!("create {email}"));
        let scripted = self.create.lock().unwrap().clone();
        self.become_user(
            scripted.unwrap_or_else(|| Ok(ProviderUser::new("uid-2", Some(email.into()), false))),
        )
    }

    async fn sign_in_anonymously(&self) -> Result<ProviderUser, Error> {
        self.record("sign-in-anonymously".into());
        self.become_user(Ok(ProviderUser::new("anon-uid", None, true)))
    }

    async fn id_token(&self, force_refresh: bool) -> Result<String, Error> {
        let current = self.current.lock().unwrap().clone();
        let user = current.ok_or_else(|| Error::provider("auth/no-current-user", "No active session"))?;
        Ok(if force_refresh {
            format!("firebase-{}-forced", user.uid)
        } else {
            format!("firebase-{}", user.uid)
        })
    }

    async fn link_email_password(&self, email: &str, password: &str) -> Result<ProviderUser, Error> {
        let _ = password;
        self.record(format!("link {email}"));
        let current = self.current.lock().unwrap().clone();
        let Some(current) = current else {
            return Err(Error::provider("auth/no-current-user", "No active session"));
        };
        let scripted = self.link.lock().unwrap().clone();
        self.become_user(scripted.unwrap_or_else(|| {
            Ok(ProviderUser::new(current.uid.0, Some(email.into()), false))
        }))
    }

    async fn send_password_reset_email(&self, email: &str) -> Result<(), Error> {
        self.record(format!("reset {email}"));
        self.password_reset.lock().unwrap().clone().unwrap_or(Ok(()))
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.record("sign-out".into());
        *self.current.lock().unwrap() = None;
        self.sign_out.lock().unwrap().clone().unwrap_or(Ok(()))
    }
}
