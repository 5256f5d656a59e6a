pub use watacore::{api, backoff, codec, net, resolver, session, sync};

pub mod types {
    pub use watacore::types::*;
    pub mod events;
}

pub mod auth;
pub mod builder;
pub mod client;
pub mod config;
pub mod conversations;
pub mod download;
pub mod receipt;
pub mod request;
pub mod rooms;
pub mod send;
pub mod store;
pub mod sync_task;
pub mod transport;
pub mod upload;

pub use auth::AuthError;
pub use builder::ClientBuilder;
pub use client::{Client, ClientError};
pub use config::ClientConfig;
pub use request::ApiError;
pub use send::VoiceError;
pub use watacore::session::{ConnectionState, Session};

#[cfg(test)]
pub mod test_utils;
