pub mod refresh;
pub mod storage;
pub mod token;

pub use refresh::{RefreshCoordinator, RefreshGuard, RefreshOutcome, RefreshStats, Ticket, Waiter};
pub use storage::{
    FileTokenStore, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
pub use token::{CredentialPair, LoginRequest, RefreshRequest, TokenResponse};
