use crate::types::ids::ValidationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Opaque content locator returned by a media upload (`mxc://server/id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaRef {
    server_name: String,
    media_id: String,
}

impl MediaRef {
    pub fn parse(uri: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidMediaRef(uri.to_string());
        let rest = uri.strip_prefix("mxc://").ok_or_else(invalid)?;
        let (server_name, media_id) = rest.split_once('/').ok_or_else(invalid)?;
        if server_name.is_empty() || media_id.is_empty() || media_id.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            server_name: server_name.to_string(),
            media_id: media_id.to_string(),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    /// Unauthenticated download URL. Deprecated on newer servers but still
    /// the only option on some deployments.
    pub fn direct_url(&self, homeserver_url: &str) -> String {
        format!(
            "{}/_matrix/media/v3/download/{}/{}",
            homeserver_url.trim_end_matches('/'),
            urlencoding::encode(&self.server_name),
            urlencoding::encode(&self.media_id)
        )
    }

    /// Download URL that requires a bearer token.
    pub fn authenticated_url(&self, homeserver_url: &str) -> String {
        format!(
            "{}/_matrix/client/v1/media/download/{}/{}",
            homeserver_url.trim_end_matches('/'),
            urlencoding::encode(&self.server_name),
            urlencoding::encode(&self.media_id)
        )
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mxc://{}/{}", self.server_name, self.media_id)
    }
}

impl FromStr for MediaRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MediaRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MediaRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
