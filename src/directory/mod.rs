//! User directory abstraction: does a partner or vendor id still resolve to a user?
//!
//! Users live in the surrounding marketplace and can be deleted independently of
//! their referral history; the reconciliation sweep asks the directory before
//! removing rows that point at them.

use crate::domain::UserId;
use async_trait::async_trait;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::HttpUserDirectory;
pub use mock::MockUserDirectory;

#[async_trait]
pub trait UserDirectory: Send + Sync + fmt::Debug {
    /// Whether the user still exists.
    ///
    /// Implementations must only answer `false` when the user is known to be gone;
    /// transport failures are errors.
    async fn user_exists(&self, user_id: &UserId) -> Result<bool, DirectoryError>;
}

/// Error type for directory lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Rate limited")]
    RateLimited,
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid directory URL: {0}")]
    InvalidUrl(String),
}
