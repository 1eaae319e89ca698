//! Session models.
//!
//! Request and response shapes for the per-user connection and selection
//! lifecycle.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Longest accepted user id, in bytes.
pub const MAX_USER_ID_LEN: usize = 256;

/// Opaque caller-supplied session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parses a raw header value. Surrounding whitespace is ignored; blank or
    /// oversized values are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_USER_ID_LEN {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request body for opening a cluster connection.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConnectRequest {
    /// Connection string (`mongodb://`, `mongodb+srv://` or `memory://`).
    #[validate(length(min = 1, message = "Connection string is required"))]
    pub uri: String,
}

/// Request body naming a database or collection.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct NameRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
}

/// Position of a session in the selection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Disconnected,
    Connected,
    DatabaseSelected,
    CollectionSelected,
}

/// Snapshot of a user's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionStatus {
    pub stage: SessionStage,
    /// Engine behind the connection ("mongodb" or "memory").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl SessionStatus {
    pub fn disconnected() -> Self {
        Self {
            stage: SessionStage::Disconnected,
            engine: None,
            database: None,
            collection: None,
        }
    }
}

/// Result of a connect request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectResponse {
    /// Engine behind the connection.
    pub engine: String,
    /// True when the session already had a connection and nothing was opened.
    pub already_connected: bool,
}

/// Result of a disconnect request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisconnectResponse {
    /// False when there was no connection to close.
    pub disconnected: bool,
}
