use serde::{Deserialize, Serialize};

/// A single install rule for a target. Destination is relative to the
/// install prefix and comes through with generator expressions already
/// resolved by the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRule {
    pub destination: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}
