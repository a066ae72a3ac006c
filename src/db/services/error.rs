use sea_orm::DbErr;
use thiserror::Error;

use crate::credentials::CredentialError;

/// Error taxonomy shared by all service functions.
///
/// `Conflict` is only surfaced once the bounded local retries are exhausted;
/// callers should treat it as transient and re-submit. Capacity errors
/// (`UsersLimitReached`, `AdminDataLimitExceeded`) mean the operation was
/// rejected whole, with no partial effect.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("row version conflict on user {user_id} after {retries} retries")]
    Conflict { user_id: i32, retries: usize },

    #[error("admin users limit reached ({limit})")]
    UsersLimitReached { limit: i64 },

    #[error("admin aggregate data limit exceeded")]
    AdminDataLimitExceeded,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema not ready: {0}")]
    Consistency(String),

    #[error("credential backend error: {0}")]
    Credential(#[from] CredentialError),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}
