//! Authenticated HTTP client with single-flight token refresh.

mod coordinator;
mod request;
mod response;
mod transport;

pub use coordinator::{RefreshCoordinator, RefreshPhase};
use coordinator::{Admission, Completion, RefreshFailure, RefreshLeader};
pub use request::{HttpRequest, MultipartForm, Part, RequestBody, RequestConfig};
pub use response::HttpResponse;
pub use transport::{ReqwestTransport, ResponseFuture, Transport, TransportRequest};

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    CredentialKey, CredentialStore, Credentials, MemoryCredentialStore, SessionExpired,
    SessionListener,
};
use crate::config::GatewayConfig;
use crate::services::{AuthService, SpeciesService};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// HTTP client that attaches the stored bearer token to every request and
/// recovers from an expired access token.
///
/// Clones share configuration, transport, credential store and refresh state.
#[derive(Clone)]
pub struct Client {
    config: Arc<GatewayConfig>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    on_session_expired: Option<SessionListener>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn auth(&self) -> AuthService<'_> {
        AuthService::new(self)
    }

    pub fn species(&self) -> SpeciesService<'_> {
        SpeciesService::new(self)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Whether an access token is stored.
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Expiry of the stored session as reported by the backend, if known.
    pub fn session_expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        Credentials::load(self.credentials.as_ref())?.expires()
    }

    pub(crate) fn credential_store(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    /// Send a request.
    ///
    /// A `401` from a protected endpoint, while credentials are stored,
    /// triggers one shared token refresh and a single replay of this request.
    /// Every other outcome is returned unchanged.
    pub async fn request(
        &self,
        method: Method,
        path: impl Into<String>,
        body: Option<RequestBody>,
        config: RequestConfig,
    ) -> Result<HttpResponse> {
        self.execute(HttpRequest::new(method, path, body, config))
            .await
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.get_with(path, RequestConfig::default()).await
    }

    pub async fn get_with(&self, path: &str, config: RequestConfig) -> Result<HttpResponse> {
        self.request(Method::GET, path, None, config).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<HttpResponse> {
        let body = RequestBody::json(body)?;
        self.request(Method::POST, path, Some(body), RequestConfig::default())
            .await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<HttpResponse> {
        let body = RequestBody::json(body)?;
        self.request(Method::PUT, path, Some(body), RequestConfig::default())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.request(Method::DELETE, path, None, RequestConfig::default())
            .await
    }

    pub async fn delete_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<HttpResponse> {
        let body = RequestBody::json(body)?;
        self.request(Method::DELETE, path, Some(body), RequestConfig::default())
            .await
    }

    pub async fn post_multipart(&self, path: &str, form: MultipartForm) -> Result<HttpResponse> {
        self.request(
            Method::POST,
            path,
            Some(RequestBody::Multipart(form)),
            RequestConfig::default(),
        )
        .await
    }

    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let token = self.access_token();
        tracing::debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            authenticated = token.is_some(),
            "Sending request"
        );

        let error = match self.send_once(&request, token.as_deref()).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if !self.should_refresh(&request, &error) {
            return Err(error);
        }

        tracing::debug!(
            request_id = %request.id,
            path = %request.path,
            "Access token rejected"
        );
        self.recover(request, error).await
    }

    fn access_token(&self) -> Option<String> {
        self.credentials.get(CredentialKey::AccessToken)
    }

    fn should_refresh(&self, request: &HttpRequest, error: &Error) -> bool {
        error.is_unauthorized()
            && !self.config.is_public(&request.path)
            && self.access_token().is_some()
    }

    fn prepare(&self, request: &HttpRequest, token: Option<&str>) -> Result<TransportRequest> {
        let mut url = self.config.resolve_url(&request.path)?;
        if !request.config.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.config.query {
                pairs.append_pair(name, value);
            }
        }

        let mut headers = self.config.default_headers.clone();
        headers.extend(request.config.headers.iter().cloned());
        if let Some(token) = token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }

        Ok(TransportRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
            timeout: self.timeout_for(&request.config),
        })
    }

    fn timeout_for(&self, config: &RequestConfig) -> Duration {
        config.timeout.unwrap_or(self.config.timeout)
    }

    fn issue(&self, request: &HttpRequest, token: Option<&str>) -> Result<ResponseFuture> {
        let prepared = self.prepare(request, token)?;
        Ok(self.transport.send(prepared))
    }

    /// One network attempt, no recovery.
    async fn send_once(&self, request: &HttpRequest, token: Option<&str>) -> Result<HttpResponse> {
        if request.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let future = self.issue(request, token)?;
        self.await_response(future, &request.config).await
    }

    async fn await_response(
        &self,
        future: ResponseFuture,
        config: &RequestConfig,
    ) -> Result<HttpResponse> {
        let timeout = self.timeout_for(config);
        let timed = tokio::time::timeout(timeout, future);

        let outcome = match &config.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                outcome = timed => outcome,
            },
            None => timed.await,
        };

        let response = outcome.map_err(|_| Error::Timeout(timeout))??;
        response.error_for_status()
    }

    async fn recover(&self, request: HttpRequest, original: Error) -> Result<HttpResponse> {
        let config = request.config.clone();
        match self.coordinator.admit(request, original) {
            Admission::Queued(rx) => self.await_completion(rx, &config).await,
            Admission::Leader {
                leader,
                request,
                original,
            } => self.lead_refresh(leader, request, original).await,
        }
    }

    async fn await_completion(
        &self,
        rx: oneshot::Receiver<Completion>,
        config: &RequestConfig,
    ) -> Result<HttpResponse> {
        let completion = match &config.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                completion = rx => completion,
            },
            None => rx.await,
        };

        match completion {
            Ok(Completion::Replay(future)) => self.await_response(future, config).await,
            Ok(Completion::Reject(error)) => Err(error),
            Err(_) => Err(Error::Cancelled),
        }
    }

    async fn lead_refresh(
        &self,
        leader: RefreshLeader,
        request: HttpRequest,
        original: Error,
    ) -> Result<HttpResponse> {
        tracing::debug!(request_id = %request.id, "Refreshing access token");

        match self.refresh_tokens(request.config.cancel.as_ref()).await {
            Ok(access_token) => {
                let replayed =
                    leader.replay(|waiting| self.issue(waiting, Some(access_token.as_str())));
                tracing::debug!(replayed, "Replaying queued requests with refreshed token");
                self.send_once(&request, Some(access_token.as_str())).await
            }
            Err(failure) => {
                match &failure {
                    RefreshFailure::Cancelled => {
                        tracing::debug!("Token refresh cancelled");
                    }
                    RefreshFailure::Transient(e) => {
                        tracing::warn!(error = %e, "Token refresh failed, keeping credentials");
                    }
                    RefreshFailure::Invalid(e) => {
                        tracing::warn!(error = %e, "Refresh token rejected, ending session");
                    }
                }
                if failure.ends_session() {
                    self.end_session();
                }

                let rejected = leader.reject();
                tracing::debug!(rejected, "Rejected queued requests");

                match failure {
                    RefreshFailure::Cancelled => Err(Error::Cancelled),
                    RefreshFailure::Transient(_) | RefreshFailure::Invalid(_) => Err(original),
                }
            }
        }
    }

    /// `POST {refresh_path}` with the stored refresh token; stores the result.
    async fn refresh_tokens(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<String, RefreshFailure> {
        let Some(refresh_token) = self.credentials.get(CredentialKey::RefreshToken) else {
            return Err(RefreshFailure::Transient(Error::auth(
                "No refresh token stored",
            )));
        };

        let mut config = RequestConfig::default();
        if let Some(token) = cancel {
            config = config.cancel_token(token.clone());
        }
        let body = RequestBody::Json(serde_json::json!({ "refresh_token": refresh_token }));
        let request = HttpRequest::new(
            Method::POST,
            self.config.refresh_path.clone(),
            Some(body),
            config,
        );

        let response = self
            .send_once(&request, None)
            .await
            .map_err(RefreshFailure::classify)?;
        let refreshed: RefreshResponse = response.json().map_err(RefreshFailure::Transient)?;

        let credentials = Credentials::new(
            refreshed.access_token.clone(),
            refreshed.refresh_token.unwrap_or(refresh_token),
            refreshed.expires_at,
        );
        if let Err(e) = credentials.save(self.credentials.as_ref()) {
            tracing::warn!(error = %e, "Failed to persist refreshed credentials");
        }

        tracing::info!(expires_at = ?refreshed.expires_at, "Access token refreshed");
        Ok(refreshed.access_token)
    }

    fn end_session(&self) {
        if let Err(e) = Credentials::clear(self.credentials.as_ref()) {
            tracing::warn!(error = %e, "Failed to clear credentials");
        }

        let event = SessionExpired::new(self.config.session_expired_message.clone());
        if let Some(listener) = &self.on_session_expired {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    config: Option<GatewayConfig>,
    timeout: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    on_session_expired: Option<SessionListener>,
}

impl ClientBuilder {
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let config = self.config.take().unwrap_or_default();
        self.config = Some(GatewayConfig {
            base_url: Some(url.into()),
            ..config
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a preconfigured `reqwest` client (proxy, TLS, pool settings).
    pub fn http(self, http: reqwest::Client) -> Self {
        self.transport(ReqwestTransport::with_client(http))
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Called once when the backend rejects the refresh token.
    pub fn on_session_expired(
        mut self,
        listener: impl Fn(&SessionExpired) + Send + Sync + 'static,
    ) -> Self {
        self.on_session_expired = Some(Arc::new(listener));
        self
    }

    pub fn build(self) -> Result<Client> {
        let mut config = match self.config {
            Some(config) => config,
            None => GatewayConfig::from_env()?,
        };
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));

        Ok(Client {
            config: Arc::new(config),
            transport,
            credentials,
            coordinator: Arc::new(RefreshCoordinator::new()),
            on_session_expired: self.on_session_expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Handler = dyn Fn(&TransportRequest) -> ResponseFuture + Send + Sync;

    /// Records every issued request and answers through `handler`.
    #[derive(Clone)]
    struct MockTransport {
        calls: Arc<Mutex<Vec<TransportRequest>>>,
        handler: Arc<Handler>,
    }

    impl MockTransport {
        fn new(handler: impl Fn(&TransportRequest) -> ResponseFuture + Send + Sync + 'static) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                handler: Arc::new(handler),
            }
        }

        fn calls(&self) -> Vec<TransportRequest> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_to(&self, path: &str) -> Vec<TransportRequest> {
            self.calls()
                .into_iter()
                .filter(|c| c.url.path() == path)
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, request: TransportRequest) -> ResponseFuture {
            self.calls.lock().unwrap().push(request.clone());
            (self.handler)(&request)
        }
    }

    fn respond(status: u16, body: serde_json::Value) -> ResponseFuture {
        respond_after(status, body, Duration::ZERO)
    }

    fn respond_after(status: u16, body: serde_json::Value, delay: Duration) -> ResponseFuture {
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(HttpResponse::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                body.to_string(),
            ))
        })
    }

    /// Backend where `old` is expired and `/auth/refresh` answers `refresh_status`.
    fn backend(refresh_status: u16) -> MockTransport {
        MockTransport::new(move |req| {
            let path = req.url.path().to_string();
            if path == "/auth/refresh" {
                let body = if refresh_status == 200 {
                    json!({"accessToken": "new", "refresh_token": "refresh-2", "expires_at": 1_900_000_000})
                } else {
                    json!({"message": "refresh failed"})
                };
                return respond_after(refresh_status, body, Duration::from_millis(10));
            }
            match req.bearer_token() {
                Some("new") => respond(200, json!({ "path": path })),
                _ => respond(401, json!({ "message": format!("expired for {path}") })),
            }
        })
    }

    fn store_with(access: &str, refresh: &str) -> Arc<MemoryCredentialStore> {
        let store = Arc::new(MemoryCredentialStore::new());
        Credentials::new(access, refresh, None)
            .save(store.as_ref())
            .unwrap();
        store
    }

    fn client(transport: MockTransport, store: Arc<MemoryCredentialStore>) -> (Client, Arc<AtomicUsize>) {
        let expired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&expired);
        let client = Client::builder()
            .config(GatewayConfig::base_url("https://api.test"))
            .transport(transport)
            .credential_store(store)
            .on_session_expired(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        (client, expired)
    }

    fn path_of(response: &HttpResponse) -> String {
        response.json::<serde_json::Value>().unwrap()["path"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let transport = MockTransport::new(|_| respond(200, json!({})));
        let (client, _) = client(transport.clone(), store_with("tok", "r"));

        client.get("/auth/me").await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].bearer_token(), Some("tok"));
        assert_eq!(calls[0].url.as_str(), "https://api.test/auth/me");
        assert_eq!(calls[0].timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_no_token_sends_without_header() {
        let transport = MockTransport::new(|_| respond(401, json!({})));
        let (client, _) = client(transport.clone(), Arc::new(MemoryCredentialStore::new()));

        let err = client.get("/species/get-all").await.unwrap_err();

        assert!(err.is_unauthorized());
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let transport = backend(200);
        let store = store_with("old", "refresh-1");
        let (client, expired) = client(transport.clone(), Arc::clone(&store));

        let (a, b, c) = tokio::join!(client.get("/a"), client.get("/b"), client.get("/c"));

        assert_eq!(path_of(&a.unwrap()), "/a");
        assert_eq!(path_of(&b.unwrap()), "/b");
        assert_eq!(path_of(&c.unwrap()), "/c");

        let refreshes = transport.calls_to("/auth/refresh");
        assert_eq!(refreshes.len(), 1);
        match &refreshes[0].body {
            Some(RequestBody::Json(body)) => assert_eq!(body["refresh_token"], "refresh-1"),
            other => panic!("unexpected refresh body: {:?}", other),
        }
        assert!(refreshes[0].header("authorization").is_none());

        let replays: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| c.bearer_token() == Some("new"))
            .map(|c| c.url.path().to_string())
            .collect();
        assert_eq!(replays.len(), 3);

        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some("new"));
        assert_eq!(
            store.get(CredentialKey::RefreshToken).as_deref(),
            Some("refresh-2")
        );
        assert_eq!(
            store.get(CredentialKey::ExpiresAt).as_deref(),
            Some("1900000000")
        );
        assert_eq!(expired.load(Ordering::SeqCst), 0);
        assert_eq!(client.coordinator().phase(), RefreshPhase::Idle);
        assert_eq!(client.coordinator().refreshes(), 1);
    }

    #[tokio::test]
    async fn test_session_expiry_follows_refresh() {
        let (client, _) = client(backend(200), store_with("old", "r"));
        assert!(client.session_expires_at().is_none());

        client.get("/a").await.unwrap();

        let expires = client.session_expires_at().unwrap();
        assert_eq!(expires.timestamp(), 1_900_000_000);
    }

    #[tokio::test]
    async fn test_waiters_replayed_in_enqueue_order() {
        let transport = backend(200);
        let (client, _) = client(transport.clone(), store_with("old", "r"));

        let _ = tokio::join!(
            client.get("/lead"),
            client.get("/a"),
            client.get("/b"),
            client.get("/c"),
        );

        let replays: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| c.bearer_token() == Some("new"))
            .map(|c| c.url.path().to_string())
            .collect();
        assert_eq!(replays, vec!["/a", "/b", "/c", "/lead"]);
    }

    #[tokio::test]
    async fn test_public_endpoint_never_refreshes() {
        let transport = backend(200);
        let (client, _) = client(transport.clone(), store_with("old", "r"));

        let err = client
            .post_json("/auth/login", &json!({"email": "a@b.co"}))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(401));
        assert!(transport.calls_to("/auth/refresh").is_empty());
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_401_is_not_retried_again() {
        let transport = MockTransport::new(|req| {
            if req.url.path() == "/auth/refresh" {
                respond(200, json!({"accessToken": "new", "refresh_token": "r2"}))
            } else {
                respond(401, json!({"message": "still expired"}))
            }
        });
        let (client, expired) = client(transport.clone(), store_with("old", "r"));

        let err = client.get("/a").await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(transport.calls_to("/a").len(), 2);
        assert_eq!(transport.calls_to("/auth/refresh").len(), 1);
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_other_statuses_not_refreshed() {
        let transport = MockTransport::new(|req| match req.url.path() {
            "/forbidden" => respond(403, json!({"message": "forbidden"})),
            _ => respond(500, json!({"message": "boom"})),
        });
        let (client, _) = client(transport.clone(), store_with("old", "r"));

        assert_eq!(client.get("/forbidden").await.unwrap_err().status_code(), Some(403));
        assert_eq!(client.get("/boom").await.unwrap_err().status_code(), Some(500));
        assert!(transport.calls_to("/auth/refresh").is_empty());
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_credentials() {
        let transport = backend(500);
        let store = store_with("old", "refresh-1");
        let (client, expired) = client(transport.clone(), Arc::clone(&store));

        let (a, b) = tokio::join!(client.get("/a"), client.get("/b"));

        for (result, path) in [(a, "/a"), (b, "/b")] {
            match result.unwrap_err() {
                Error::Api {
                    status, message, ..
                } => {
                    assert_eq!(status, 401);
                    assert_eq!(message, format!("expired for {path}"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some("old"));
        assert_eq!(
            store.get(CredentialKey::RefreshToken).as_deref(),
            Some("refresh-1")
        );
        assert_eq!(expired.load(Ordering::SeqCst), 0);
        assert_eq!(transport.calls_to("/auth/refresh").len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_refresh_token_ends_session_once() {
        let transport = backend(401);
        let store = store_with("old", "refresh-1");
        let (client, expired) = client(transport.clone(), Arc::clone(&store));

        let results = futures::future::join_all(
            ["/a", "/b", "/c", "/d", "/e", "/f"].map(|p| client.get(p)),
        )
        .await;

        for result in results {
            let err = result.unwrap_err();
            assert!(err.is_unauthorized());
            assert!(err.to_string().contains("expired for"));
        }
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls_to("/auth/refresh").len(), 1);
        assert!(store.is_empty());
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_keeps_session() {
        let transport = backend(200);
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(CredentialKey::AccessToken, "old").unwrap();
        let (client, expired) = client(transport.clone(), Arc::clone(&store));

        let err = client.get("/a").await.unwrap_err();

        assert!(err.is_unauthorized());
        assert!(transport.calls_to("/auth/refresh").is_empty());
        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some("old"));
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_keeps_session() {
        let transport = MockTransport::new(|req| {
            if req.url.path() == "/auth/refresh" {
                respond_after(200, json!({"accessToken": "new"}), Duration::from_secs(30))
            } else {
                respond(401, json!({"message": "expired"}))
            }
        });
        let store = store_with("old", "r");
        let (client, expired) = client(transport.clone(), Arc::clone(&store));

        let token = CancellationToken::new();
        let leader = client.get_with("/a", RequestConfig::new().cancel_token(token.clone()));
        let waiter = client.get("/b");
        let cancel = async {
            while client.coordinator().waiting() < 1 {
                tokio::task::yield_now().await;
            }
            token.cancel();
        };

        let (lead, wait, _) = tokio::join!(leader, waiter, cancel);

        assert!(lead.unwrap_err().is_cancelled());
        assert!(wait.unwrap_err().is_unauthorized());
        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some("old"));
        assert_eq!(expired.load(Ordering::SeqCst), 0);
        assert_eq!(client.coordinator().phase(), RefreshPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_not_replayed() {
        let transport = backend(200);
        let (client, _) = client(transport.clone(), store_with("old", "r"));

        let token = CancellationToken::new();
        let waiter = client.get_with("/b", RequestConfig::new().cancel_token(token.clone()));
        let cancel = async {
            while client.coordinator().waiting() < 1 {
                tokio::task::yield_now().await;
            }
            token.cancel();
        };

        let (lead, wait, _) = tokio::join!(client.get("/a"), waiter, cancel);

        assert_eq!(path_of(&lead.unwrap()), "/a");
        assert!(wait.unwrap_err().is_cancelled());
        assert_eq!(transport.calls_to("/b").len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_network_class() {
        let transport =
            MockTransport::new(|_| respond_after(200, json!({}), Duration::from_secs(30)));
        let (client, _) = client(transport.clone(), store_with("old", "r"));

        let err = client
            .get_with(
                "/slow",
                RequestConfig::new().timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(20)));
        assert_eq!(err.kind(), crate::ErrorKind::Network);
        assert!(transport.calls_to("/auth/refresh").is_empty());
    }

    #[tokio::test]
    async fn test_query_and_headers() {
        let transport = MockTransport::new(|_| respond(200, json!({})));
        let config = GatewayConfig::base_url("https://api.test").header("X-Client", "admin");
        let client = Client::builder()
            .config(config)
            .transport(transport.clone())
            .build()
            .unwrap();

        client
            .get_with(
                "/species/get-all",
                RequestConfig::new()
                    .query("page", 1)
                    .query("search", "ca map")
                    .header("X-Trace", "t-1"),
            )
            .await
            .unwrap();

        let call = &transport.calls()[0];
        assert_eq!(
            call.url.as_str(),
            "https://api.test/species/get-all?page=1&search=ca+map"
        );
        assert_eq!(call.header("x-client"), Some("admin"));
        assert_eq!(call.header("x-trace"), Some("t-1"));
    }

    #[test]
    fn test_builder_timeout_override() {
        let client = Client::builder()
            .base_url("https://api.test")
            .timeout(Duration::from_secs(5))
            .transport(MockTransport::new(|_| respond(200, json!({}))))
            .build()
            .unwrap();
        assert_eq!(client.config().timeout, Duration::from_secs(5));
        assert!(!client.is_authenticated());
    }
}
