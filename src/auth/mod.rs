//! Sign-in state: token inspection, refresh and route gating.
//!
//! - [`token`]: JWT expiry and subject extraction
//! - [`refresher`]: refresh decision, token storage and the polling refresher
//! - [`gate`]: Axum middleware protecting pages and API routes

pub mod gate;
pub mod refresher;
pub mod token;

pub use gate::{Session, require_session};
pub use refresher::{
    FileTokenStore, MemoryTokenStore, RefreshHandle, RefreshOutcome, StoredTokens, TokenRefresher,
    TokenStore,
};
