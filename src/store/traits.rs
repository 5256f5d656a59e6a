use super::error::Result;
use async_trait::async_trait;
use watacore::session::Session;
use watacore::types::UserId;

/// Durable storage for session credentials, keyed by user.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn store(&self, user_id: &UserId, session: &Session) -> Result<()>;

    async fn retrieve(&self, user_id: &UserId) -> Result<Option<Session>>;

    /// Removing a missing entry is not an error.
    async fn clear(&self, user_id: &UserId) -> Result<()>;
}
