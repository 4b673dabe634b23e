pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod http_client;

// Re-export core components
pub use crate::auth::{
    CredentialPair, FileTokenStore, MemoryTokenStore, RefreshCoordinator, RefreshStats,
    TokenStore,
};
pub use crate::client::ApiClient;
pub use crate::config::{ClientConfig, TokenStoreConfig};
pub use crate::error::{ApiError, ApiResult, ErrorCategory, RefreshError};
pub use crate::events::{SessionEvent, Subscriber};
pub use crate::http_client::{
    Headers, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
