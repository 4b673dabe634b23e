//! Authenticated API client.
//!
//! Every request passes through two interceptors:
//!
//! * the request interceptor merges the default headers and attaches
//!   `Authorization: Bearer <access token>` from the token store;
//! * the response interceptor classifies the status code and, on a 401,
//!   refreshes the session through the [`RefreshCoordinator`] and replays the
//!   request once with the new token.
//!
//! Refresh and login calls go straight to the transport so they never
//! re-enter the interceptor chain.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use chrono::Utc;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::auth::{
    FileTokenStore, LoginRequest, MemoryTokenStore, RefreshCoordinator, RefreshGuard,
    RefreshRequest, RefreshStats, Ticket, TokenResponse, TokenStore,
};
use crate::config::{ClientConfig, TokenStoreConfig};
use crate::error::{ApiError, ApiResult, RefreshError};
use crate::events::{
    EventStream, SessionEvent, Subscriber, SESSION_EVENT_BUFFER_SIZE, SESSION_EVENT_CAPACITY,
};
use crate::http_client::{
    Headers, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
};

const AUTHORIZATION: &str = "Authorization";

/// Tokens produced by a successful refresh
struct Refreshed {
    access_token: String,
    refresh_token_rotated: bool,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    coordinator: RefreshCoordinator,
    default_headers: RwLock<Headers>,
    events: EventStream<SessionEvent>,
}

/// HTTP client for the Iris REST API with transparent session refresh.
///
/// Cloning is cheap and every clone shares the same token store, refresh
/// coordinator and event stream.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client over an explicit transport and token store
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let mut default_headers = Headers::new();
        default_headers.set("Accept", "application/json");

        info!(base_url = %config.base_url, "Creating API client");

        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                store,
                coordinator: RefreshCoordinator::new(),
                default_headers: RwLock::new(default_headers),
                events: EventStream::new(SESSION_EVENT_CAPACITY, SESSION_EVENT_BUFFER_SIZE),
            }),
        }
    }

    /// Build the reqwest transport and token store described by `config`
    pub async fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let transport = ReqwestTransport::new(config.request_timeout())?;
        let store: Arc<dyn TokenStore> = match &config.token_store {
            TokenStoreConfig::Memory => Arc::new(MemoryTokenStore::new()),
            TokenStoreConfig::File { path } => Arc::new(FileTokenStore::open(path).await?),
        };

        Ok(Self::new(config, Arc::new(transport), store))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> Subscriber<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.inner.coordinator.stats()
    }

    /// Current value of a default outgoing header
    pub fn default_header(&self, name: &str) -> Option<String> {
        self.inner
            .default_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(str::to_string)
    }

    /// Set a header sent with every request unless the request overrides it
    pub fn set_default_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner
            .default_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(name, value);
    }

    fn remove_default_header(&self, name: &str) {
        self.inner
            .default_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Whether an access token is currently stored
    pub async fn is_authenticated(&self) -> ApiResult<bool> {
        Ok(self.current_access_token().await?.is_some())
    }

    /// Send a request through the interceptor chain
    pub async fn execute(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        // Captured before the token is read so a refresh that settles while
        // this request is in flight is detected on a 401
        let epoch = self.inner.coordinator.epoch();
        let token = self.current_access_token().await?;

        let response = self.dispatch(&request, token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED.as_u16() && !request.is_retried() {
            let mut request = request;
            request.mark_retried();
            return self
                .recover_unauthorized(request, epoch, token, response)
                .await;
        }

        Self::classify(&request, response)
    }

    pub async fn get(&self, path: &str) -> ApiResult<HttpResponse> {
        self.execute(HttpRequest::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<HttpResponse> {
        self.execute(HttpRequest::delete(path)).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<HttpResponse> {
        self.send_with_body(HttpMethod::POST, path, body).await
    }

    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<HttpResponse> {
        self.send_with_body(HttpMethod::PUT, path, body).await
    }

    pub async fn patch_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<HttpResponse> {
        self.send_with_body(HttpMethod::PATCH, path, body).await
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.get(path).await?.json().map_err(ApiError::Decode)
    }

    async fn send_with_body<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: &B,
    ) -> ApiResult<HttpResponse> {
        let request = HttpRequest::new(method, path)
            .with_json(body)
            .map_err(ApiError::Encode)?;
        self.execute(request).await
    }

    /// Exchange credentials for a token pair and store it
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<()> {
        let request = HttpRequest::post(self.inner.config.login_path.as_str())
            .with_json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .map_err(ApiError::Encode)?;

        let url = self.inner.config.url_for(request.path());
        let response = self.inner.transport.send(&url, &request).await?;
        let response = Self::classify(&request, response)?;

        let tokens = response
            .json::<TokenResponse>()
            .map_err(ApiError::Decode)?
            .validate()
            .map_err(ApiError::InvalidResponse)?;
        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            ApiError::InvalidResponse("login response did not include a refresh_token".into())
        })?;

        let store = &self.inner.store;
        store
            .set_access_token(&tokens.access_token)
            .await
            .map_err(ApiError::Storage)?;
        store
            .set_refresh_token(&refresh_token)
            .await
            .map_err(ApiError::Storage)?;
        self.set_default_header(AUTHORIZATION, bearer(&tokens.access_token));

        info!("Logged in");
        let _ = self
            .inner
            .events
            .publish(SessionEvent::LoggedIn { at: Utc::now() })
            .await;
        Ok(())
    }

    /// Forget the stored tokens
    pub async fn logout(&self) -> ApiResult<()> {
        self.inner.store.clear().await.map_err(ApiError::Storage)?;
        self.remove_default_header(AUTHORIZATION);

        info!("Logged out");
        let _ = self
            .inner
            .events
            .publish(SessionEvent::LoggedOut { at: Utc::now() })
            .await;
        Ok(())
    }

    async fn current_access_token(&self) -> ApiResult<Option<String>> {
        self.inner
            .store
            .access_token()
            .await
            .map_err(ApiError::Storage)
    }

    /// Request interceptor: defaults first, then the request's own headers,
    /// and `Authorization` always mirrors the token being sent
    fn apply_headers(&self, request: &HttpRequest, token: Option<&str>) -> HttpRequest {
        let mut outgoing = request.clone();
        {
            let defaults = self
                .inner
                .default_headers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, value) in defaults.iter() {
                if outgoing.headers().get(name).is_none() {
                    outgoing.headers_mut().set(name, value);
                }
            }
        }

        match token {
            Some(token) => outgoing.headers_mut().set(AUTHORIZATION, bearer(token)),
            None => {
                outgoing.headers_mut().remove(AUTHORIZATION);
            }
        }
        outgoing
    }

    async fn dispatch(&self, request: &HttpRequest, token: Option<&str>) -> ApiResult<HttpResponse> {
        let outgoing = self.apply_headers(request, token);
        let url = self.inner.config.url_for(outgoing.path());

        debug!(
            method = %outgoing.method(),
            url = %url,
            authenticated = token.is_some(),
            retried = outgoing.is_retried(),
            "Sending request"
        );

        let response = self.inner.transport.send(&url, &outgoing).await?;
        debug!(status = response.status(), url = %url, "Received response");
        Ok(response)
    }

    /// Response interceptor for everything except the first 401
    fn classify(request: &HttpRequest, response: HttpResponse) -> ApiResult<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }

        match StatusCode::from_u16(response.status()) {
            Ok(StatusCode::TOO_MANY_REQUESTS) => {
                warn!(path = %request.path(), "Rate limited by backend");
                Err(ApiError::RateLimited { response })
            }
            Ok(status) if status.is_server_error() => {
                warn!(path = %request.path(), status = status.as_u16(), "Backend server error");
                Err(ApiError::Server { response })
            }
            _ => Err(ApiError::Status { response }),
        }
    }

    async fn recover_unauthorized(
        &self,
        request: HttpRequest,
        epoch: u64,
        sent_token: Option<String>,
        unauthorized: HttpResponse,
    ) -> ApiResult<HttpResponse> {
        let token = match self.inner.coordinator.begin(epoch, sent_token.as_deref()) {
            Ticket::Leader(guard) => {
                // The refresh runs on its own task so cancelling this caller
                // cannot strand the requests queued behind it
                let client = self.clone();
                let refresh = tokio::spawn(async move { client.lead_refresh(guard).await });
                refresh.await.unwrap_or(Err(RefreshError::Abandoned))?
            }
            Ticket::Follower(waiter) => {
                debug!(path = %request.path(), "Waiting for in-flight refresh");
                waiter.wait().await?
            }
            Ticket::Rotated => match self.current_access_token().await? {
                Some(token) => token,
                // The session ended while this request was in flight
                None => return Err(ApiError::Status { response: unauthorized }),
            },
        };

        let response = self.dispatch(&request, Some(&token)).await?;
        Self::classify(&request, response)
    }

    /// Run the refresh as the single leader and publish its outcome
    async fn lead_refresh(&self, guard: RefreshGuard) -> Result<String, RefreshError> {
        info!("Access token rejected, refreshing session");

        let limit = self.inner.config.refresh_timeout();
        let outcome = match tokio::time::timeout(limit, self.perform_refresh()).await {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Timeout(limit)),
        };

        match outcome {
            Ok(refreshed) => {
                let released = guard.settle(&Ok(refreshed.access_token.clone())).len();
                info!(
                    released,
                    refresh_token_rotated = refreshed.refresh_token_rotated,
                    "Session refreshed"
                );
                let _ = self
                    .inner
                    .events
                    .publish(SessionEvent::TokensRefreshed {
                        refresh_token_rotated: refreshed.refresh_token_rotated,
                        released,
                        at: Utc::now(),
                    })
                    .await;
                Ok(refreshed.access_token)
            }
            Err(err) => {
                // Clear before releasing the queue so no replay reads a dead token
                self.clear_session().await;
                let released = guard.settle(&Err(err.clone())).len();
                error!(error = %err, released, "Session refresh failed, signing out");
                let _ = self
                    .inner
                    .events
                    .publish(SessionEvent::SessionExpired {
                        reason: err.to_string(),
                        redirect_to: self.inner.config.login_redirect.clone(),
                        at: Utc::now(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// The refresh call itself, over the bare transport
    async fn perform_refresh(&self) -> Result<Refreshed, RefreshError> {
        let store = &self.inner.store;

        let refresh_token = store
            .refresh_token()
            .await
            .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?
            .ok_or(RefreshError::MissingRefreshToken)?;

        let request = HttpRequest::post(self.inner.config.refresh_path.as_str())
            .with_header("Accept", "application/json")
            .with_json(&RefreshRequest { refresh_token })
            .map_err(|e| RefreshError::Transport(format!("failed to encode body: {}", e)))?;
        let url = self.inner.config.url_for(request.path());

        let response = self
            .inner
            .transport
            .send(&url, &request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status(),
                body: response.text(),
            });
        }

        let tokens = response
            .json::<TokenResponse>()
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?
            .validate()
            .map_err(RefreshError::InvalidResponse)?;

        store
            .set_access_token(&tokens.access_token)
            .await
            .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?;
        let refresh_token_rotated = match &tokens.refresh_token {
            Some(rotated) => {
                store
                    .set_refresh_token(rotated)
                    .await
                    .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?;
                true
            }
            None => false,
        };

        self.set_default_header(AUTHORIZATION, bearer(&tokens.access_token));

        Ok(Refreshed {
            access_token: tokens.access_token,
            refresh_token_rotated,
        })
    }

    async fn clear_session(&self) {
        if let Err(e) = self.inner.store.clear().await {
            let reason = format!("{:#}", e);
            error!(error = %reason, "Failed to clear stored tokens");
        }
        self.remove_default_header(AUTHORIZATION);
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
