use crate::client::{Client, ClientError};
use crate::request::{ApiError, parse_json};
use bytes::Bytes;
use log::debug;
use watacore::api::{self, UploadResponse};
use watacore::net::HttpRequest;
use watacore::types::MediaRef;

impl Client {
    /// Uploads opaque bytes to the media repository.
    pub async fn upload(
        &self,
        data: Bytes,
        content_type: &str,
        file_name: &str,
    ) -> Result<MediaRef, ClientError> {
        let url = api::upload_url(&self.homeserver_url().await, file_name);
        let size = data.len();
        let request = HttpRequest::post(url)
            .with_header("Content-Type", content_type)
            .with_body(data.to_vec())
            .with_timeout(self.config.upload_timeout);

        let response = self.send_request(request).await?;
        let raw: UploadResponse = parse_json(&response)?;
        let media_ref = MediaRef::parse(&raw.content_uri)
            .map_err(|e| ApiError::MalformedResponse(e.to_string()))?;
        debug!(target: "Client/Voice", "Uploaded {size} bytes as {media_ref}");
        Ok(media_ref)
    }
}
