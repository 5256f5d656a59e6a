use super::error::{Result, StoreError};
use super::traits::CredentialStore;
use async_trait::async_trait;
use log::debug;
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use watacore::session::Session;
use watacore::types::UserId;

/// One JSON file per user under `base_path/sessions`.
pub struct FileCredentialStore {
    base_path: PathBuf,
}

impl FileCredentialStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let store = Self {
            base_path: path.into(),
        };
        fs::create_dir_all(store.sessions_dir()).await?;
        Ok(store)
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_path.join("sessions")
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn session_path(&self, user_id: &UserId) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}.json", Self::sanitize_filename(user_id.as_str())))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        // Write then rename so a crash never leaves a truncated file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn store(&self, user_id: &UserId, session: &Session) -> Result<()> {
        debug!(target: "Client/Store", "Persisting session for {user_id}");
        self.write_json(&self.session_path(user_id), session).await
    }

    async fn retrieve(&self, user_id: &UserId) -> Result<Option<Session>> {
        self.read_json(&self.session_path(user_id)).await
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        match fs::remove_file(self.session_path(user_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user: &str, token: &str) -> Session {
        Session {
            user_id: UserId::parse(user).unwrap(),
            device_id: "DEVICE".into(),
            access_token: token.into(),
            homeserver_url: "http://localhost:8008".into(),
            refresh_token: Some("refresh".into()),
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let alice = session("@alice:localhost", "t1");
        {
            let store = FileCredentialStore::new(dir.path()).await.unwrap();
            store.store(&alice.user_id, &alice).await.unwrap();
        }
        let store = FileCredentialStore::new(dir.path()).await.unwrap();
        assert_eq!(store.retrieve(&alice.user_id).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn overwrite_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).await.unwrap();
        let first = session("@bob:localhost", "t1");
        let second = session("@bob:localhost", "t2");
        store.store(&first.user_id, &first).await.unwrap();
        store.store(&second.user_id, &second).await.unwrap();
        let loaded = store.retrieve(&first.user_id).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "t2");

        store.clear(&first.user_id).await.unwrap();
        store.clear(&first.user_id).await.unwrap();
        assert!(store.retrieve(&first.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).await.unwrap();
        let user = UserId::parse("@carol:localhost").unwrap();
        fs::write(store.session_path(&user), b"{not json").await.unwrap();
        assert!(matches!(
            store.retrieve(&user).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(
            FileCredentialStore::sanitize_filename("@alice:localhost"),
            "_alice_localhost"
        );
    }
}
