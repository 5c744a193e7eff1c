use serde::{Deserialize, Serialize};

/// Adventurer registration payload, as posted to the guild backend.
///
/// Field names on the wire are the backend's camelCase Portuguese keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationForm {
    #[serde(rename = "nomeAventureiro")]
    pub adventurer_name: String,
    #[serde(rename = "nomeJogador")]
    pub player_name: String,
    #[serde(rename = "classeOrigem")]
    pub origin_class: String,
    #[serde(rename = "motivacao")]
    pub motivation: String,
}
