// Authentication module
// Token lifecycle: persistence, provider calls, refresh scheduling

mod manager;
mod provider;
mod scheduler;
mod store;
mod types;

pub use manager::AuthManager;
pub use provider::{generate_state, ProviderClient, SCOPES};
pub use scheduler::spawn_refresh_task;
pub use store::TokenStore;
pub use types::{
    now_millis, SetupTokenRequest, TokenError, TokenResponse, TokenSet, TokenState, TokenStatus,
};
