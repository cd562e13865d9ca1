//! Error types for the account lifecycle
use thiserror::Error;

use crate::store::StoreError;

/// Error kinds raised by account-lifecycle operations. Each user-visible
/// failure mode is a distinct kind; storage failures that are not part of
/// an operation's contract surface through [`AccountError::Store`].
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account could not be created")]
    CreationFailed,

    #[error("Account name is already registered")]
    AlreadyRegistered,

    #[error("Certificate fingerprint is already bound to an account")]
    CertfpAlreadyExists,

    #[error("Verification callback could not be dispatched")]
    CallbackFailed,

    #[error("Account does not exist")]
    DoesNotExist,

    #[error("Account is already verified")]
    AlreadyVerified,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Account has not been verified")]
    Unverified,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Session is not logged in to an account")]
    NotLoggedIn,

    #[error("Nickname is reserved by another account")]
    NicknameReserved,

    #[error("Nickname reservation limit reached")]
    TooManyNicks,

    #[error("An account's own name cannot be unreserved")]
    CantDropPrimaryNick,

    #[error("Nick reservation failed")]
    NickReservationFailed,

    /// Unexpected storage failure surfaced to the caller. The transaction
    /// that produced it was rolled back; caches were not touched.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccountError {
    /// Check if this error indicates the account was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AccountError::DoesNotExist)
    }

    /// Check if this error indicates a conflict with existing state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AccountError::AlreadyRegistered
                | AccountError::CertfpAlreadyExists
                | AccountError::NicknameReserved
                | AccountError::AlreadyVerified
        )
    }

    /// Check if this error means the presented credentials were rejected.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            AccountError::InvalidCredentials
                | AccountError::InvalidCode
                | AccountError::Unverified
        )
    }
}
