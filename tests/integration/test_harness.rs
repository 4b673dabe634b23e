//! Integration test harness for the Iris client
//! Wraps a mockito server standing in for the Iris backend

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

use iris_client::{
    ApiClient, ClientConfig, CredentialPair, MemoryTokenStore, ReqwestTransport, TokenStoreConfig,
};

pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Mock backend plus helpers for the auth endpoints
pub struct TestBackend {
    pub server: ServerGuard,
}

impl TestBackend {
    pub async fn start() -> Self {
        Self {
            server: Server::new_async().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Client configuration pointed at this backend
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::with_base_url(self.url());
        config.refresh_path = REFRESH_PATH.to_string();
        config.login_path = LOGIN_PATH.to_string();
        config.login_redirect = "/admin/login".to_string();
        config.refresh_timeout_seconds = 5;
        config.request_timeout_seconds = 5;
        config.token_store = TokenStoreConfig::Memory;
        config
    }

    /// Client over the real reqwest transport and an in-memory store
    pub fn client(&self, store: Arc<MemoryTokenStore>) -> Result<ApiClient> {
        let transport = ReqwestTransport::new(Duration::from_secs(5))?;
        Ok(ApiClient::new(self.config(), Arc::new(transport), store))
    }

    /// `GET path` answers `status` when sent with `Bearer token`
    pub async fn resource(
        &mut self,
        path: &str,
        token: &str,
        status: usize,
        body: &str,
        hits: usize,
    ) -> Mock {
        self.server
            .mock("GET", path)
            .match_header("authorization", format!("Bearer {}", token).as_str())
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    /// Refresh endpoint expecting `refresh_token` in the body
    pub async fn refresh(
        &mut self,
        refresh_token: &str,
        status: usize,
        body: serde_json::Value,
        hits: usize,
    ) -> Mock {
        self.server
            .mock("POST", REFRESH_PATH)
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(json!({ "refreshToken": refresh_token })))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(hits)
            .create_async()
            .await
    }
}

/// Store holding `access` / `refresh`
pub fn store_with(access: &str, refresh: &str) -> Arc<MemoryTokenStore> {
    Arc::new(MemoryTokenStore::with_credentials(&CredentialPair::new(
        access, refresh,
    )))
}
