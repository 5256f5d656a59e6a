use super::error::Result;
use super::traits::CredentialStore;
use async_trait::async_trait;
use dashmap::DashMap;
use watacore::session::Session;
use watacore::types::UserId;

/// Keeps credentials for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    sessions: DashMap<UserId, Session>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn store(&self, user_id: &UserId, session: &Session) -> Result<()> {
        self.sessions.insert(user_id.clone(), session.clone());
        Ok(())
    }

    async fn retrieve(&self, user_id: &UserId) -> Result<Option<Session>> {
        Ok(self.sessions.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        self.sessions.remove(user_id);
        Ok(())
    }
}
