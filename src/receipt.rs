use crate::client::{Client, ClientError};
use crate::request::json_body;
use log::{debug, info};
use watacore::api;
use watacore::net::HttpRequest;
use watacore::types::ids::{validate_event_id, validate_room_id};
use watacore::types::message::RECEIPT_READ;

impl Client {
    /// Marks a voice message as played by sending a read receipt. The
    /// message's `played_by` set grows once the receipt is folded back.
    ///
    /// Safe to repeat: nothing is sent if the folded state already lists us.
    pub async fn mark_played(&self, room_id: &str, event_id: &str) -> Result<(), ClientError> {
        validate_room_id(room_id)?;
        validate_event_id(event_id)?;
        let own = self.own_user_id().await?;
        let already = self
            .with_state(|state| {
                state
                    .message(event_id)
                    .is_some_and(|message| message.is_played_by(&own))
            })
            .await?;
        if already {
            debug!(target: "Client/Voice", "{event_id} already marked played");
            return Ok(());
        }

        let url = api::receipt_url(&self.homeserver_url().await, room_id, RECEIPT_READ, event_id);
        self.send_request(json_body(HttpRequest::post(url), &serde_json::json!({}))?)
            .await?;
        info!(target: "Client/Voice", "Marked {event_id} in {room_id} as played");
        Ok(())
    }
}
