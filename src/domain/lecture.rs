//! Lecture records.
//!
//! Lectures created while offline get a locally generated `offline_*` id;
//! the reconciler swaps it for the remote-generated id on first sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking a locally generated lecture id
pub const OFFLINE_ID_PREFIX: &str = "offline_";

/// A lecture entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lecture {
    /// Lecture id: remote-generated, or `offline_*` until first sync
    pub id: String,

    /// Display name
    pub name: String,

    /// Topic / subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// User who created the lecture
    pub created_by: String,

    /// Whether the lecture is publicly visible
    #[serde(default)]
    pub is_public: bool,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Lecture {
    /// Create a lecture with a locally generated offline id
    pub fn new_offline(name: impl Into<String>, topic: Option<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: generate_offline_id(),
            name: name.into(),
            topic,
            created_by: created_by.into(),
            is_public: false,
            created_at: Utc::now(),
        }
    }

    /// Whether this lecture still carries an offline-generated id
    pub fn is_offline(&self) -> bool {
        self.id.starts_with(OFFLINE_ID_PREFIX)
    }
}

/// Generate an offline lecture id: `offline_{millis}_{suffix}`
pub fn generate_offline_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}_{}",
        OFFLINE_ID_PREFIX,
        Utc::now().timestamp_millis(),
        &suffix[..9]
    )
}
