//! reqwest implementations: the backend auth endpoints and an authenticated
//! request wrapper that refreshes on `401`.

use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::backend::AuthBackend;
use crate::config::AuthConfig;
use crate::error::Error;
use crate::lifecycle::{LifecycleNotifier, NoticeLevel};
use crate::messages::http_status_message;
use crate::refresh::RefreshCoordinator;
use crate::types::{AuthResponse, TokenPair, UserId, UserPatch, UserProfile};

/// Error body the backend sends with non-2xx answers.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

impl ErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// Validation errors as display strings. Entries may be plain strings
    /// or `{field, message}` objects.
    fn error_strings(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| match e {
                serde_json::Value::String(s) => s.clone(),
                other => other
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| other.to_string(), str::to_owned),
            })
            .collect()
    }

    fn into_error(self, status: StatusCode) -> Error {
        Error::Backend {
            status: status.as_u16(),
            code: self.code,
            message: self.message,
        }
    }
}

/// `POST /api/auth/refresh` answer; some deployments wrap it in `data`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    data: Option<Box<RefreshBody>>,
}

impl RefreshBody {
    fn into_pair(self) -> Option<TokenPair> {
        match self.token.filter(|t| !t.is_empty()) {
            Some(token) => Some(TokenPair::new(token, self.refresh_token)),
            None => self.data.and_then(|data| data.into_pair()),
        }
    }
}

/// `GET /api/auth/me` answers `{user}` on most deployments and a bare user
/// on some.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MeBody {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatchBody {
    Wrapped { user: UserPatch },
    Bare(UserPatch),
}

/// Backend auth client over reqwest.
#[derive(Debug, Clone)]
pub struct HttpAuthBackend {
    config: AuthConfig,
    http: reqwest::Client,
}

impl HttpAuthBackend {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.config.endpoint(path)
    }

    async fn post_auth(&self, path: &str, body: serde_json::Value) -> Result<AuthResponse, Error> {
        let response = self.http.post(self.url(path)?).json(&body).send().await?;
        let response = ensure_success(response).await?;
        response.json::<AuthResponse>().await.map_err(Into::into)
    }
}

/// Returns the response on 2xx, otherwise the backend error it carries.
async fn ensure_success(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ErrorBody::parse(&body).into_error(status))
}

impl AuthBackend for HttpAuthBackend {
    async fn login(&self, firebase_token: &str) -> Result<AuthResponse, Error> {
        self.post_auth("/api/auth/login", json!({ "firebaseToken": firebase_token }))
            .await
    }

    async fn register(
        &self,
        email: &str,
        firebase_token: &str,
        anonymous_mode: bool,
    ) -> Result<AuthResponse, Error> {
        self.post_auth(
            "/api/auth/register",
            json!({
                "email": email,
                "firebaseToken": firebase_token,
                "anonymousMode": anonymous_mode,
            }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        let response = self
            .http
            .post(self.url("/api/auth/refresh")?)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.json::<RefreshBody>().await?;
        body.into_pair().ok_or_else(|| {
            tracing::error!("Refresh endpoint answered 2xx without a token");
            Error::InvalidResponse("missing token in refresh response".into())
        })
    }

    async fn me(&self, access_token: &str) -> Result<UserProfile, Error> {
        let response = self
            .http
            .get(self.url("/api/auth/me")?)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        match response.json::<MeBody>().await? {
            MeBody::Wrapped { user } | MeBody::Bare(user) => Ok(user),
        }
    }

    async fn logout(&self, access_token: &str) -> Result<(), Error> {
        let response = self
            .http
            .post(self.url("/api/auth/logout")?)
            .bearer_auth(access_token)
            .json(&json!({}))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), Error> {
        let response = self
            .http
            .post(self.url("/api/auth/request-password-reset")?)
            .json(&json!({ "email": email }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn convert_anonymous(
        &self,
        email: &str,
        password: &str,
        firebase_token: &str,
        access_token: Option<&str>,
    ) -> Result<AuthResponse, Error> {
        let mut request = self
            .http
            .post(self.url("/api/auth/convert-anonymous")?)
            .json(&json!({
                "email": email,
                "password": password,
                "firebaseToken": firebase_token,
            }));
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        let response = ensure_success(request.send().await?).await?;
        response.json::<AuthResponse>().await.map_err(Into::into)
    }

    async fn update_anonymous_mode(
        &self,
        user_id: &UserId,
        anonymous_mode: bool,
        access_token: &str,
    ) -> Result<UserPatch, Error> {
        let path = format!(
            "/api/users/{}/anonymous-mode",
            urlencoding::encode(&user_id.0)
        );
        let response = self
            .http
            .patch(self.url(&path)?)
            .bearer_auth(access_token)
            .json(&json!({ "anonymousMode": anonymous_mode }))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        match response.json::<PatchBody>().await? {
            PatchBody::Wrapped { user } | PatchBody::Bare(user) => Ok(user),
        }
    }
}

/// Authenticated API client for the rest of the application.
///
/// Attaches the session's bearer token, refreshes once on `401` through the
/// [`RefreshCoordinator`], and reports other failures as global notices
/// (skipped on suppressed routes).
pub struct AuthedClient<B> {
    config: AuthConfig,
    http: reqwest::Client,
    coordinator: Arc<RefreshCoordinator<B>>,
    lifecycle: Arc<LifecycleNotifier>,
}

impl<B: AuthBackend> AuthedClient<B> {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        coordinator: Arc<RefreshCoordinator<B>>,
        lifecycle: Arc<LifecycleNotifier>,
    ) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            coordinator,
            lifecycle,
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Request builder for `path` under the API base URL, without auth.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the path does not join onto the base URL.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, Error> {
        Ok(self.http.request(method, self.config.endpoint(path)?))
    }

    /// Sends `request` with the current bearer token.
    ///
    /// # Errors
    ///
    /// [`Error::NoActiveSession`] without a session; [`Error::Backend`] for
    /// non-2xx answers (after one refresh-and-retry on `401`);
    /// [`Error::Network`] when no response arrived. Non-auth failures are
    /// also reported through the notifier.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, Error> {
        let outcome = self
            .coordinator
            .execute(|bearer| {
                let attempt = request.try_clone();
                async move {
                    let attempt = attempt.ok_or_else(|| {
                        Error::Unsupported("streaming request bodies cannot be retried".into())
                    })?;
                    let response = attempt.bearer_auth(bearer).send().await?;
                    if response.status() == StatusCode::UNAUTHORIZED {
                        return Err(ensure_success(response).await.err().unwrap_or(
                            Error::Backend {
                                status: 401,
                                code: None,
                                message: None,
                            },
                        ));
                    }
                    Ok(response)
                }
            })
            .await;

        match outcome {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = ErrorBody::parse(&response.text().await.unwrap_or_default());
                self.report(
                    Some(status.as_u16()),
                    body.message.as_deref(),
                    &body.error_strings(),
                );
                Err(body.into_error(status))
            }
            Err(e @ Error::Network(_)) => {
                self.report(None, None, &[]);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn report(&self, status: Option<u16>, message: Option<&str>, errors: &[String]) {
        let text = http_status_message(status, message, errors);
        tracing::warn!(?status, "API request failed: {text}");
        if !self.lifecycle.should_suppress() {
            self.lifecycle.notify(NoticeLevel::Error, &text);
        }
    }

    /// `GET path`, decoding the JSON answer.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`Error::InvalidResponse`] for bodies
    /// that do not decode.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// `method path` with a JSON body, decoding the JSON answer.
    ///
    /// # Errors
    ///
    /// As [`get_json`](Self::get_json).
    pub async fn send_json<T, Body>(&self, method: Method, path: &str, body: &Body) -> Result<T, Error>
    where
        T: DeserializeOwned,
        Body: serde::Serialize + ?Sized,
    {
        let response = self.send(self.request(method, path)?.json(body)).await?;
        response.json::<T>().await.map_err(Into::into)
    }
}

impl<B> std::fmt::Debug for AuthedClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthedClient")
            .field("api_base_url", &self.config.api_base_url().as_str())
            .finish_non_exhaustive()
    }
}
