use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Client configuration.
///
/// ```rust
/// use std::time::Duration;
/// use mindease_auth::AuthConfig;
///
/// let config = AuthConfig::new("https://api.mindease.example/".parse().unwrap())
///     .with_refresh_skew(Duration::from_secs(120));
/// assert_eq!(config.api_base_url().as_str(), "https://api.mindease.example/");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthConfig {
    pub(crate) api_base_url: Url,
    pub(crate) firebase_api_key: Option<String>,
    pub(crate) refresh_skew: Duration,
    pub(crate) session_expired_cooldown: Duration,
    pub(crate) anonymous_email_domain: String,
    pub(crate) suppressed_route_prefixes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(
            "http://localhost:8080/"
                .parse()
                .expect("valid default URL"),
        )
    }
}

impl AuthConfig {
    /// Configuration against the backend at `api_base_url`, defaults elsewhere.
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url: normalize_base(api_base_url),
            firebase_api_key: None,
            refresh_skew: Duration::from_secs(5 * 60),
            session_expired_cooldown: Duration::from_secs(3),
            anonymous_email_domain: "mindease.com".into(),
            suppressed_route_prefixes: vec!["/admin".into(), "/login".into()],
        }
    }

    /// Reads configuration from the environment.
    ///
    /// # Env vars
    /// - `MINDEASE_API_BASE_URL`: backend origin (default `http://localhost:8080`)
    /// - `MINDEASE_FIREBASE_API_KEY`: Firebase web API key
    /// - `MINDEASE_REFRESH_SKEW_SECS`: proactive refresh margin (default 300)
    /// - `MINDEASE_ANONYMOUS_EMAIL_DOMAIN`: domain of synthetic anonymous emails
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = match std::env::var("MINDEASE_API_BASE_URL") {
            Ok(raw) => {
                let url: Url = raw
                    .parse()
                    .map_err(|e| Error::Config(format!("MINDEASE_API_BASE_URL: {e}")))?;
                Self::new(url)
            }
            Err(_) => Self::default(),
        };

        if let Ok(key) = std::env::var("MINDEASE_FIREBASE_API_KEY") {
            config = config.with_firebase_api_key(key);
        }
        if let Ok(raw) = std::env::var("MINDEASE_REFRESH_SKEW_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("MINDEASE_REFRESH_SKEW_SECS: {e}")))?;
            config = config.with_refresh_skew(Duration::from_secs(secs));
        }
        if let Ok(domain) = std::env::var("MINDEASE_ANONYMOUS_EMAIL_DOMAIN") {
            if domain.trim().is_empty() || domain.contains('@') {
                return Err(Error::Config(
                    "MINDEASE_ANONYMOUS_EMAIL_DOMAIN must be a bare domain".into(),
                ));
            }
            config = config.with_anonymous_email_domain(domain.trim());
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: Url) -> Self {
        self.api_base_url = normalize_base(url);
        self
    }

    #[must_use]
    pub fn with_firebase_api_key(mut self, key: impl Into<String>) -> Self {
        self.firebase_api_key = Some(key.into());
        self
    }

    /// Margin before `exp` at which the access token is renewed.
    #[must_use]
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    #[must_use]
    pub fn with_session_expired_cooldown(mut self, cooldown: Duration) -> Self {
        self.session_expired_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_anonymous_email_domain(mut self, domain: impl Into<String>) -> Self {
        self.anonymous_email_domain = domain.into();
        self
    }

    /// Routes on which lifecycle notices stay silent.
    #[must_use]
    pub fn with_suppressed_route_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.suppressed_route_prefixes = prefixes;
        self
    }

    #[must_use]
    pub fn api_base_url(&self) -> &Url {
        &self.api_base_url
    }

    #[must_use]
    pub fn firebase_api_key(&self) -> Option<&str> {
        self.firebase_api_key.as_deref()
    }

    #[must_use]
    pub fn refresh_skew(&self) -> Duration {
        self.refresh_skew
    }

    #[must_use]
    pub fn session_expired_cooldown(&self) -> Duration {
        self.session_expired_cooldown
    }

    #[must_use]
    pub fn anonymous_email_domain(&self) -> &str {
        &self.anonymous_email_domain
    }

    #[must_use]
    pub fn suppressed_route_prefixes(&self) -> &[String] {
        &self.suppressed_route_prefixes
    }

    /// Resolves an API path (`/api/auth/login`) against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.api_base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("{path}: {e}")))
    }
}

/// Keeps exactly one trailing slash so relative joins append instead of
/// replacing the last path segment.
fn normalize_base(mut url: Url) -> Url {
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{path}/"));
    url
}
