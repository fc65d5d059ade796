//! User identity passed to evaluation and telemetry calls.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identity a payload of evaluations is resolved for.
///
/// All fields are optional. `user_id` and `custom_ids` identify the user for caching and
/// deduplication; `custom` carries arbitrary attributes echoed back in telemetry;
/// `private_attributes` are used server-side only and are stripped from every event before it is
/// enqueued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(rename = "customIDs", default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_ids: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_attributes: Option<HashMap<String, serde_json::Value>>,
}

impl User {
    /// Create a user with the given user ID and no other identity.
    pub fn with_user_id(user_id: impl Into<String>) -> User {
        User {
            user_id: Some(user_id.into()),
            ..User::default()
        }
    }

    /// Derive the storage-scoped identity of this user under the given SDK key.
    ///
    /// The key is stable across processes: same user + same SDK key always map to the same
    /// cache entry. Custom IDs participate in sorted order so map iteration order cannot
    /// change the result.
    pub fn storage_key(&self, sdk_key: &str) -> String {
        let mut custom_ids: Vec<_> = self.custom_ids.iter().collect();
        custom_ids.sort_by(|(a, _), (b, _)| a.cmp(b));
        let cids = custom_ids
            .iter()
            .map(|(key, value)| format!("{key}-{value}"))
            .collect::<Vec<_>>()
            .join(",");

        let normalized = format!(
            "uid:{}|cids:{}|k:{}",
            self.user_id.as_deref().unwrap_or(""),
            cids,
            sdk_key
        );

        format!("{:x}", md5::compute(normalized.as_bytes()))
    }

    /// Copy of this user with `private_attributes` removed. Applied to every event before it
    /// enters the outgoing queue.
    pub(crate) fn without_private_attributes(&self) -> User {
        User {
            private_attributes: None,
            ..self.clone()
        }
    }
}
