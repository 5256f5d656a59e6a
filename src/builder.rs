use crate::client::Client;
use crate::config::ClientConfig;
use crate::store::{CredentialStore, MemoryCredentialStore};
use crate::transport::CompatHttpClient;
use std::sync::Arc;
use wata_rust_ureq_http_client::UreqHttpClient;
use watacore::codec::{MuLawCodec, VoiceCodec};
use watacore::net::HttpClient;
use watacore::resolver::{LexicographicPolicy, PrimaryRoomPolicy};

/// Assembles a [`Client`]. Every collaborator has a default: the `ureq`
/// HTTP client, in-memory credentials, the mu-law codec and lexicographic
/// primary-room selection.
#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    codec: Option<Arc<dyn VoiceCodec>>,
    primary_policy: Option<Arc<dyn PrimaryRoomPolicy>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_homeserver(mut self, homeserver_url: impl Into<String>) -> Self {
        self.config
            .get_or_insert_with(ClientConfig::default)
            .homeserver_url = homeserver_url.into();
        self
    }

    pub fn with_http_client(self, client: impl HttpClient + 'static) -> Self {
        self.with_shared_http_client(Arc::new(client))
    }

    pub fn with_shared_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_credential_store(mut self, store: impl CredentialStore + 'static) -> Self {
        self.credential_store = Some(Arc::new(store));
        self
    }

    pub fn with_codec(mut self, codec: impl VoiceCodec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    pub fn with_primary_room_policy(mut self, policy: impl PrimaryRoomPolicy + 'static) -> Self {
        self.primary_policy = Some(Arc::new(policy));
        self
    }

    pub fn build(self) -> Arc<Client> {
        let config = self.config.unwrap_or_default();
        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(UreqHttpClient::new()));
        let http_client: Arc<dyn HttpClient> =
            Arc::new(CompatHttpClient::new(http_client, config.shim));
        Arc::new(Client::new(
            config,
            http_client,
            self.credential_store
                .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new())),
            self.codec.unwrap_or_else(|| Arc::new(MuLawCodec::new())),
            self.primary_policy
                .unwrap_or_else(|| Arc::new(LexicographicPolicy)),
        ))
    }
}
