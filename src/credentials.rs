//! Credential-material collaborator. The core never generates key material
//! itself; it asks this service when a user is created or a proxy flow is
//! revoked, and stores whatever opaque string comes back.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::db::entities::user;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential backend unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CredentialService: Send + Sync {
    /// Issues fresh key material for a user being created.
    async fn issue_credential(&self, username: &str) -> Result<String, CredentialError>;

    /// Replaces the key material for a user whose proxy flow was revoked.
    async fn rotate_credential(&self, user: &user::Model) -> Result<String, CredentialError>;
}

/// Default implementation backed by UUIDv4. Callers must not assume any
/// particular format; the key is opaque.
#[derive(Debug, Default, Clone)]
pub struct UuidCredentialService;

#[async_trait]
impl CredentialService for UuidCredentialService {
    async fn issue_credential(&self, _username: &str) -> Result<String, CredentialError> {
        Ok(Uuid::new_v4().simple().to_string())
    }

    async fn rotate_credential(&self, _user: &user::Model) -> Result<String, CredentialError> {
        Ok(Uuid::new_v4().simple().to_string())
    }
}
