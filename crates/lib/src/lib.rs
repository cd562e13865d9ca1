//!
//! Banter: the account-management core of the Banter chat server.
//! This library provides the components for registering, verifying, and
//! authenticating user accounts and for tracking which live sessions are
//! logged in to which account.
//!
//! ## Core Concepts
//!
//! * **Folded names (`names`)**: Every account and nick is canonicalized to a
//!   folded comparison form; lookups and uniqueness checks always use the
//!   folded form, display always uses the original.
//! * **Store (`store`)**: A transactional, ordered key-value store with
//!   optional per-key TTL. The database is the authoritative source of truth
//!   for all account information; everything on the heap is just a cache.
//! * **Account manager (`accounts`)**: Orchestrates the account lifecycle
//!   (register → verify → reserve nicks → authenticate → logout →
//!   unregister) and keeps the in-memory nick and session indexes coherent
//!   with the store.
//! * **Callbacks (`accounts::callbacks`)**: Verification-code delivery over
//!   an external channel (`mailto`, or `none` for no-callback registration).
//! * **Sessions (`session`)**: The collaborator trait implemented by the
//!   server's live connections.

pub mod accounts;
pub mod config;
pub mod names;
pub mod passwd;
pub mod session;
pub mod store;

pub use accounts::AccountManager;

/// Result type used throughout the Banter library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Banter library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structured account-lifecycle errors from the accounts module
    #[error(transparent)]
    Account(#[from] accounts::AccountError),

    /// Structured storage errors from the store module
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// Name folding rejected the input
    #[error(transparent)]
    Name(#[from] names::NameError),

    /// Passphrase hashing or verification failed
    #[error(transparent)]
    Passwd(#[from] passwd::PasswdError),

    /// Verification-callback dispatch failed
    #[error(transparent)]
    Callback(#[from] accounts::callbacks::CallbackError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Account(_) => "accounts",
            Error::Store(_) => "store",
            Error::Name(_) => "names",
            Error::Passwd(_) => "passwd",
            Error::Callback(_) => "callbacks",
            Error::Serialize(_) => "serialize",
            Error::Io(_) => "io",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Account(err) => err.is_not_found(),
            Error::Store(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict with existing state.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Account(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error is credential-related.
    pub fn is_credential_error(&self) -> bool {
        match self {
            Error::Account(err) => err.is_credential_error(),
            Error::Passwd(_) => true,
            _ => false,
        }
    }
}
