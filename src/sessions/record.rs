//! Session record
//!
//! The unit of persisted per-identity state. A record carries the identity
//! attributes of its owner, a free-form data bag used to stash flash entries,
//! and a dirty flag that finalization consults to decide whether the record
//! has to be written back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::generate_session_id;

/// Persisted per-identity request state.
///
/// The identifier is assigned at construction and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    id: String,
    /// Owner user identifier (`None` for anonymous sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Display name of the owner
    #[serde(default)]
    pub username: String,
    /// Menu set the owner should see (e.g. "admin", "staff")
    #[serde(default)]
    pub menu_type: String,
    /// Originating network address
    #[serde(default)]
    pub ip: String,
    /// Originating user-agent string
    #[serde(default)]
    pub user_agent: String,
    /// Device fingerprint used for fingerprint grouping
    #[serde(default)]
    pub fingerprint: String,
    /// Timestamp when the record was created (Unix ms)
    pub created_at: i64,
    /// Timestamp of the last persisted change (Unix ms)
    pub updated_at: i64,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(skip)]
    should_save: bool,
}

impl SessionRecord {
    /// Create a fresh, empty record with a newly generated identifier.
    pub fn new() -> Self {
        Self::with_id(generate_session_id())
    }

    /// Create an empty record with a caller-supplied identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            user_id: None,
            username: String::new(),
            menu_type: String::new(),
            ip: String::new(),
            user_agent: String::new(),
            fingerprint: String::new(),
            created_at: now,
            updated_at: now,
            data: Map::new(),
            should_save: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the record has an owner.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Bind the record to an owner.
    pub fn set_owner(&mut self, user_id: impl Into<String>, username: impl Into<String>) {
        self.user_id = Some(user_id.into());
        self.username = username.into();
        self.should_save = true;
    }

    /// Set the menu set shown to the owner.
    pub fn set_menu_type(&mut self, menu_type: impl Into<String>) {
        self.menu_type = menu_type.into();
        self.should_save = true;
    }

    /// Whether any mutation happened since the record was loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.should_save
    }

    /// Force the record to be persisted at finalization.
    pub fn mark_dirty(&mut self) {
        self.should_save = true;
    }

    pub(crate) fn mark_saved(&mut self) {
        self.should_save = false;
    }

    /// Read a value from the data bag without consuming it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Store a value in the data bag.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
        self.should_save = true;
    }

    /// Remove a value from the data bag. The record only becomes dirty when
    /// something was actually removed.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        let value = self.data.remove(key)?;
        self.should_save = true;
        Some(value)
    }

    /// Number of entries in the data bag.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn touch(&mut self) {
        let now = now_millis();
        self.updated_at = now.max(self.updated_at.saturating_add(1));
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Get current time in milliseconds since Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
