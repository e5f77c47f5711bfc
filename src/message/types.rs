use serde::{Deserialize, Serialize};

/// Keyed payload carried by server pushed envelopes
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Registration payload, client -> server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// user identity
    pub user_id: String,
    /// user credential
    pub user_token: String,
}
