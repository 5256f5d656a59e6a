use crate::client::{Client, ClientError};
use log::{debug, warn};
use watacore::net::HttpRequest;
use watacore::types::MediaRef;

impl Client {
    /// Plain download URL for players that can't send headers. Only works on
    /// deployments that still serve unauthenticated media.
    pub async fn media_url(&self, media: &MediaRef) -> String {
        media.direct_url(&self.homeserver_url().await)
    }

    /// Fetches media with the session token. Falls back to the legacy media
    /// endpoint when the server lacks authenticated media.
    pub async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, ClientError> {
        let homeserver = self.homeserver_url().await;
        let request = HttpRequest::get(media.authenticated_url(&homeserver))
            .with_timeout(self.config.upload_timeout);
        match self.send_request(request).await {
            Ok(response) => {
                debug!(target: "Client/Voice", "Downloaded {media} ({} bytes)", response.body.len());
                Ok(response.body)
            }
            Err(ClientError::Api(e)) if e.is_not_found() => {
                warn!(target: "Client/Voice", "Authenticated media unavailable for {media}, using legacy endpoint");
                let request = HttpRequest::get(media.direct_url(&homeserver))
                    .with_timeout(self.config.upload_timeout);
                Ok(self.send_request(request).await?.body)
            }
            Err(e) => Err(e),
        }
    }
}
