//! `HttpAuthBackend` and `AuthedClient` against an in-process axum server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use url::Url;

use mindease_auth::{
    AuthBackend, AuthConfig, AuthedClient, Error, HttpAuthBackend, LifecycleNotifier,
    MemoryStorage, NoticeLevel, Notifier, RefreshCoordinator, SessionStore, StorageKeys, UserId,
};

const FRESH: &str = "fresh-token";

#[derive(Default)]
struct Server {
    refresh_calls: AtomicUsize,
    refresh_delay: Duration,
    last_patch_path: Mutex<Option<String>>,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "code": "TOKEN_EXPIRED", "message": "Token expired" })),
    )
        .into_response()
}

async fn login(Json(body): Json<Value>) -> Response {
    match body["firebaseToken"].as_str() {
        Some("unknown") => (
            StatusCode::NOT_FOUND,
            Json(json!({ "code": "USER_NOT_FOUND", "message": "User not found" })),
        )
            .into_response(),
        Some(_) => Json(json!({
            "token": "access-1",
            "refreshToken": "refresh-1",
            "user": { "id": "u-1", "email": "a@b.com", "role": "USER", "anonymousMode": false },
        }))
        .into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn refresh(State(server): State<Arc<Server>>, Json(body): Json<Value>) -> Response {
    server.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if !server.refresh_delay.is_zero() {
        tokio::time::sleep(server.refresh_delay).await;
    }
    match body["refreshToken"].as_str() {
        Some("empty") => Json(json!({})).into_response(),
        Some("revoked") => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "code": "INVALID_REFRESH_TOKEN" })),
        )
            .into_response(),
        Some(_) => Json(json!({ "data": { "token": FRESH, "refreshToken": "refresh-2" } }))
            .into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn me(headers: HeaderMap) -> Response {
    match bearer(&headers) {
        Some("access-1" | FRESH) => {
            Json(json!({ "user": { "id": "u-1", "role": "USER" } })).into_response()
        }
        Some("bare") => Json(json!({ "id": "u-2", "role": "ADMIN" })).into_response(),
        _ => unauthorized(),
    }
}

async fn mood(headers: HeaderMap) -> Response {
    if bearer(&headers) == Some(FRESH) {
        Json(json!({ "mood": 4 })).into_response()
    } else {
        unauthorized()
    }
}

async fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, Json(json!({ "message": "Admins only" }))).into_response()
}

async fn validate() -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "errors": ["mood is required", { "field": "note", "message": "note too long" }] })),
    )
        .into_response()
}

async fn anonymous_mode(
    State(server): State<Arc<Server>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if bearer(&headers).is_none() {
        return unauthorized();
    }
    *server.last_patch_path.lock().unwrap() = Some(id.clone());
    Json(json!({ "id": id, "anonymousMode": body["anonymousMode"] })).into_response()
}

async fn serve(server: Arc<Server>) -> Url {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(|| async { StatusCode::NO_CONTENT }))
        .route("/api/users/{id}/anonymous-mode", patch(anonymous_mode))
        .route("/api/mood", get(mood))
        .route("/api/admin/users", get(forbidden))
        .route("/api/mood/entries", post(validate))
        .with_state(server);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}/").parse().unwrap()
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Notifier for Recorder {
    fn notify(&self, level: NoticeLevel, message: &str) {
        assert_eq!(level, NoticeLevel::Error);
        self.0.lock().unwrap().push(message.to_owned());
    }
}

struct Client {
    api: AuthedClient<HttpAuthBackend>,
    store: Arc<SessionStore>,
    lifecycle: Arc<LifecycleNotifier>,
    notices: Arc<Recorder>,
}

fn client(base: Url) -> Client {
    let config = AuthConfig::new(base);
    let store = Arc::new(SessionStore::new(
        Arc::new(MemoryStorage::new()),
        StorageKeys::regular(),
    ));
    let notices = Arc::new(Recorder::default());
    let lifecycle = Arc::new(LifecycleNotifier::new(
        notices.clone(),
        config.suppressed_route_prefixes().to_vec(),
        config.session_expired_cooldown(),
    ));
    let coordinator = Arc::new(RefreshCoordinator::new(
        Arc::new(HttpAuthBackend::new(config.clone())),
        store.clone(),
        config.refresh_skew(),
    ));
    Client {
        api: AuthedClient::new(config, coordinator, lifecycle.clone()),
        store,
        lifecycle,
        notices,
    }
}

#[tokio::test]
async fn login_and_me() {
    let base = serve(Arc::default()).await;
    let backend = HttpAuthBackend::new(AuthConfig::new(base));

    let response = backend.login("firebase-token").await.unwrap();
    assert_eq!(response.token, "access-1");
    assert_eq!(response.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(response.user.unwrap().email.as_deref(), Some("a@b.com"));

    let wrapped = backend.me("access-1").await.unwrap();
    assert_eq!(wrapped.id, Some(UserId::from("u-1")));
    let bare = backend.me("bare").await.unwrap();
    assert!(bare.is_admin());

    backend.logout("access-1").await.unwrap();
}

#[tokio::test]
async fn error_bodies_become_backend_errors() {
    let base = serve(Arc::default()).await;
    let backend = HttpAuthBackend::new(AuthConfig::new(base));

    let err = backend.login("unknown").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.backend_code(), Some("USER_NOT_FOUND"));
    assert!(err.is_backend_user_not_found());

    let err = backend.me("nope").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(err.backend_message(), Some("Token expired"));
}

#[tokio::test]
async fn refresh_reads_nested_tokens_and_rejects_missing_ones() {
    let base = serve(Arc::default()).await;
    let backend = HttpAuthBackend::new(AuthConfig::new(base));

    let pair = backend.refresh("refresh-1").await.unwrap();
    assert_eq!(pair.token, FRESH);
    assert_eq!(pair.refresh_token.as_deref(), Some("refresh-2"));

    let err = backend.refresh("empty").await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)));
}

#[tokio::test]
async fn anonymous_mode_path_is_encoded() {
    let server = Arc::new(Server::default());
    let base = serve(server.clone()).await;
    let backend = HttpAuthBackend::new(AuthConfig::new(base));

    let patch = backend
        .update_anonymous_mode(&UserId::from("a b/c"), true, "access-1")
        .await
        .unwrap();

    assert_eq!(patch.anonymous_mode, Some(true));
    assert_eq!(
        server.last_patch_path.lock().unwrap().as_deref(),
        Some("a b/c")
    );
}

#[tokio::test]
async fn network_failure_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base: Url = format!("http://{addr}/").parse().unwrap();

    let err = HttpAuthBackend::new(AuthConfig::new(base.clone()))
        .login("x")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));

    let c = client(base);
    c.store.set_tokens("stale", Some("refresh-1".into())).unwrap();
    let err = c.api.get_json::<Value>("/api/mood").await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert_eq!(
        *c.notices.0.lock().unwrap(),
        vec!["Network error. Please check your connection."]
    );
}

#[tokio::test]
async fn authed_client_refreshes_and_retries() {
    let server = Arc::new(Server::default());
    let c = client(serve(server.clone()).await);
    c.store.set_tokens("stale", Some("refresh-1".into())).unwrap();

    let body: Value = c.api.get_json("/api/mood").await.unwrap();

    assert_eq!(body["mood"], 4);
    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(c.store.access_token().as_deref(), Some(FRESH));
    assert_eq!(c.store.refresh_token().as_deref(), Some("refresh-2"));
    assert!(c.notices.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = Arc::new(Server {
        refresh_delay: Duration::from_millis(100),
        ..Server::default()
    });
    let c = Arc::new(client(serve(server.clone()).await));
    c.store.set_tokens("stale", Some("refresh-1".into())).unwrap();

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let c = c.clone();
            tokio::spawn(async move { c.api.get_json::<Value>("/api/mood").await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap()["mood"], 4);
    }

    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_refresh_clears_session() {
    let server = Arc::new(Server::default());
    let c = client(serve(server.clone()).await);
    c.store.set_tokens("stale", Some("revoked".into())).unwrap();

    let err = c.api.get_json::<Value>("/api/mood").await.unwrap_err();

    assert_eq!(err.backend_code(), Some("INVALID_REFRESH_TOKEN"));
    assert!(c.store.snapshot().is_empty());
    assert_eq!(server.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_failures_are_reported_unless_suppressed() {
    let c = client(serve(Arc::default()).await);
    c.store.set_tokens(FRESH, Some("refresh-2".into())).unwrap();

    let err = c.api.get_json::<Value>("/api/admin/users").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    let err = c
        .api
        .send_json::<Value, _>(reqwest::Method::POST, "/api/mood/entries", &json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(422));
    assert_eq!(
        *c.notices.0.lock().unwrap(),
        vec![
            "Admins only",
            "Validation failed: mood is required, note too long",
        ]
    );

    c.lifecycle.set_route("/admin/users");
    assert!(c.api.get_json::<Value>("/api/admin/users").await.is_err());
    assert_eq!(c.notices.0.lock().unwrap().len(), 2);
}
