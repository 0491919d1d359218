//! Firebase Authentication over its REST API.

use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::config::AuthConfig;
use crate::error::Error;
use crate::provider::IdentityProvider;
use crate::token;
use crate::types::ProviderUser;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1/";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Cached ID tokens are renewed this long before they expire.
const ID_TOKEN_MARGIN_MS: i64 = 60_000;

/// Signed-in provider user, held in memory only.
#[derive(Clone)]
struct ProviderSession {
    user: ProviderUser,
    id_token: String,
    refresh_token: String,
    expires_at_ms: i64,
}

/// Identity Toolkit answer for sign-in, sign-up and account updates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

/// Secure Token API answer; snake_case unlike the rest of the API.
#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

fn expires_at(expires_in: Option<&str>) -> i64 {
    let secs = expires_in
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(3600);
    token::now_ms().saturating_add(secs.saturating_mul(1000))
}

fn no_current_user() -> Error {
    Error::provider("auth/no-current-user", "No signed-in provider user")
}

/// [`IdentityProvider`] backed by the Identity Toolkit and Secure Token
/// REST endpoints.
///
/// ```rust,no_run
/// use mindease_auth::{AuthConfig, FirebaseRestProvider};
///
/// let config = AuthConfig::default().with_firebase_api_key("web-api-key");
/// let provider = FirebaseRestProvider::from_config(&config).unwrap();
/// ```
pub struct FirebaseRestProvider {
    api_key: String,
    identity_url: Url,
    token_url: Url,
    http: reqwest::Client,
    session: Mutex<Option<ProviderSession>>,
}

impl FirebaseRestProvider {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a built-in endpoint fails to parse.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let identity_url = IDENTITY_TOOLKIT_URL
            .parse()
            .map_err(|e| Error::Config(format!("identity toolkit URL: {e}")))?;
        let token_url = SECURE_TOKEN_URL
            .parse()
            .map_err(|e| Error::Config(format!("secure token URL: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            identity_url,
            token_url,
            http: reqwest::Client::new(),
            session: Mutex::new(None),
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if no Firebase API key is configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self, Error> {
        let key = config
            .firebase_api_key()
            .ok_or_else(|| Error::Config("Firebase API key is not configured".into()))?;
        Self::new(key)
    }

    /// Points the provider at other endpoints (the auth emulator, a test
    /// server). `identity_url` is the `.../v1/` prefix of the `accounts:*`
    /// methods.
    #[must_use]
    pub fn with_endpoints(mut self, identity_url: Url, token_url: Url) -> Self {
        self.identity_url = identity_url;
        self.token_url = token_url;
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    fn session(&self) -> MutexGuard<'_, Option<ProviderSession>> {
        self.session.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn current(&self) -> Option<ProviderSession> {
        self.session().clone()
    }

    fn accounts_url(&self, method: &str) -> Result<Url, Error> {
        let base = self.identity_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/accounts:{method}"))
            .map_err(|e| Error::Config(format!("accounts:{method}: {e}")))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, Error> {
        let response = request.send().await?;
        if response.status().is_success() {
            return response.json::<T>().await.map_err(Into::into);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_default();
        tracing::debug!(status, code = %code, "Identity provider rejected request");
        if code.is_empty() {
            return Err(Error::provider(&format!("http-{status}"), body));
        }
        Err(Error::provider(&code, code.clone()))
    }

    async fn accounts(&self, method: &str, body: serde_json::Value) -> Result<AccountResponse, Error> {
        let request = self.http.post(self.accounts_url(method)?).json(&body);
        self.call(request).await
    }

    fn adopt(&self, account: AccountResponse, is_anonymous: bool) -> ProviderUser {
        let user = ProviderUser::new(account.local_id, account.email, is_anonymous);
        *self.session() = Some(ProviderSession {
            user: user.clone(),
            expires_at_ms: expires_at(account.expires_in.as_deref()),
            id_token: account.id_token,
            refresh_token: account.refresh_token,
        });
        user
    }

    async fn refresh_id_token(&self, refresh_token: &str) -> Result<TokenRefreshResponse, Error> {
        let mut url = self.token_url.clone();
        url.query_pairs_mut().append_pair("key", &self.api_key);
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.call(self.http.post(url).form(&params)).await
    }
}

impl IdentityProvider for FirebaseRestProvider {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<ProviderUser, Error> {
        let account = self
            .accounts(
                "signInWithPassword",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        Ok(self.adopt(account, false))
    }

    async fn create_user_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderUser, Error> {
        let account = self
            .accounts(
                "signUp",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;
        Ok(self.adopt(account, false))
    }

    async fn sign_in_anonymously(&self) -> Result<ProviderUser, Error> {
        let account = self
            .accounts("signUp", json!({ "returnSecureToken": true }))
            .await?;
        Ok(self.adopt(account, true))
    }

    async fn id_token(&self, force_refresh: bool) -> Result<String, Error> {
        let current = self.current().ok_or_else(no_current_user)?;
        if !force_refresh && current.expires_at_ms - token::now_ms() > ID_TOKEN_MARGIN_MS {
            return Ok(current.id_token);
        }
        let refreshed = self.refresh_id_token(&current.refresh_token).await?;
        let mut session = self.session();
        // Signed out (or switched user) while the refresh was out.
        let Some(stored) = session.as_mut().filter(|s| s.user.uid == current.user.uid) else {
            return Err(no_current_user());
        };
        stored.id_token = refreshed.id_token.clone();
        stored.refresh_token = refreshed.refresh_token;
        stored.expires_at_ms = expires_at(refreshed.expires_in.as_deref());
        Ok(refreshed.id_token)
    }

    async fn link_email_password(&self, email: &str, password: &str) -> Result<ProviderUser, Error> {
        let current = self.current().ok_or_else(no_current_user)?;
        let account = self
            .accounts(
                "update",
                json!({
                    "idToken": current.id_token,
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;
        Ok(self.adopt(account, false))
    }

    async fn send_password_reset_email(&self, email: &str) -> Result<(), Error> {
        let request = self
            .http
            .post(self.accounts_url("sendOobCode")?)
            .json(&json!({ "requestType": "PASSWORD_RESET", "email": email }));
        let _: serde_json::Value = self.call(request).await?;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), Error> {
        *self.session() = None;
        Ok(())
    }
}

impl std::fmt::Debug for FirebaseRestProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseRestProvider")
            .field("identity_url", &self.identity_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("signed_in", &self.session().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    #[test]
    fn accounts_url_keeps_method_colon_and_key() {
        let provider = FirebaseRestProvider::new("k3y").unwrap();
        assert_eq!(
            provider.accounts_url("signUp").unwrap().as_str(),
            "https://identitytoolkit.googleapis.com/v1/accounts:signUp?key=k3y"
        );
    }

    #[test]
    fn from_config_requires_api_key() {
        let err = FirebaseRestProvider::from_config(&AuthConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let config = AuthConfig::default().with_firebase_api_key("k");
        assert!(FirebaseRestProvider::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn id_token_without_user_is_no_current_user() {
        let provider = FirebaseRestProvider::new("k").unwrap();
        let err = provider.id_token(false).await.unwrap_err();
        assert_eq!(err.provider_code(), Some(&ProviderErrorCode::NoCurrentUser));
        let err = provider.link_email_password("a@b.com", "pw").await.unwrap_err();
        assert_eq!(err.provider_code(), Some(&ProviderErrorCode::NoCurrentUser));
    }

    #[tokio::test]
    async fn cached_id_token_is_reused_until_margin() {
        let provider = FirebaseRestProvider::new("k").unwrap();
        provider.adopt(
            AccountResponse {
                local_id: "uid-1".into(),
                email: Some("a@b.com".into()),
                id_token: "id-token-1".into(),
                refresh_token: "r".into(),
                expires_in: Some("3600".into()),
            },
            false,
        );
        assert_eq!(provider.id_token(false).await.unwrap(), "id-token-1");

        provider.sign_out().await.unwrap();
        assert!(provider.id_token(false).await.is_err());
    }

    #[test]
    fn expires_in_defaults_to_an_hour() {
        let at = expires_at(None);
        let delta = at - token::now_ms();
        assert!((3_590_000..=3_600_000).contains(&delta));
        assert!(expires_at(Some("60")) - token::now_ms() <= 60_000);
    }
}
