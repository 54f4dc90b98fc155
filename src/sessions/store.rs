//! Session storage backends
//!
//! The pipeline reaches storage through the narrow [`SessionBackend`] trait:
//! one `find_matching` read at resolution time, and `upsert`/`delete` writes
//! at finalization. Two implementations are provided:
//!
//! - [`MemorySessionStore`] keeps records in a process-local map (tests,
//!   single-node development).
//! - [`FileSessionStore`] stores each record as a JSON file, written via a
//!   temp file and an atomic rename, with an in-memory grouping index.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::logging::targets;

use super::id::is_valid_session_id;
use super::record::SessionRecord;

/// Error types for session store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Which records surrounding the requested one should be returned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionGroup {
    /// Only the requested record
    #[default]
    None,
    /// Every record owned by the owner of the requested record
    SameOwner,
    /// Every record carrying this device fingerprint
    Fingerprint(String),
}

/// Storage query built from request attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionQuery {
    /// Explicit identifier supplied by the client
    pub session_id: Option<String>,
    /// Surrounding group to fetch alongside the identifier
    pub group: SessionGroup,
}

impl SessionQuery {
    /// Query a single record by identifier
    pub fn by_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            group: SessionGroup::None,
        }
    }

    /// Also fetch the surrounding group
    pub fn with_group(mut self, group: SessionGroup) -> Self {
        self.group = group;
        self
    }
}

/// Narrow storage contract consumed by the session pipeline.
///
/// Implementations are shared across concurrent requests and must be
/// internally synchronised. Calls block the calling request.
pub trait SessionBackend: Send + Sync {
    /// Fetch every record matching the query, most recently updated first.
    fn find_matching(&self, query: &SessionQuery) -> Result<Vec<SessionRecord>, StoreError>;

    /// Insert or replace a record.
    fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Remove a record. Removing a record that does not exist is not an error.
    fn delete(&self, session_id: &str) -> Result<(), StoreError>;
}

/// Apply a query to a candidate set of records.
///
/// Shared by the bundled backends so that they agree on grouping semantics.
pub fn select_matching<I>(records: I, query: &SessionQuery) -> Vec<SessionRecord>
where
    I: IntoIterator<Item = SessionRecord>,
{
    let Some(requested) = query.session_id.as_deref() else {
        return Vec::new();
    };

    let records: Vec<SessionRecord> = records.into_iter().collect();
    let anchor_owner = records
        .iter()
        .find(|r| r.id() == requested)
        .map(|r| r.user_id.clone());

    let mut matched: Vec<SessionRecord> = match &query.group {
        SessionGroup::None => records.into_iter().filter(|r| r.id() == requested).collect(),
        SessionGroup::SameOwner => match anchor_owner {
            Some(Some(owner)) => records
                .into_iter()
                .filter(|r| r.user_id.as_deref() == Some(owner.as_str()))
                .collect(),
            // anonymous sessions group only with themselves
            Some(None) => records.into_iter().filter(|r| r.id() == requested).collect(),
            None => Vec::new(),
        },
        SessionGroup::Fingerprint(fp) => records
            .into_iter()
            .filter(|r| r.id() == requested || (!fp.is_empty() && r.fingerprint == *fp))
            .collect(),
    };

    matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id().cmp(b.id())));
    matched
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local session storage
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored record by identifier
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl SessionBackend for MemorySessionStore {
    fn find_matching(&self, query: &SessionQuery) -> Result<Vec<SessionRecord>, StoreError> {
        let sessions = self.sessions.read();
        if query.group == SessionGroup::None {
            let found = query
                .session_id
                .as_deref()
                .and_then(|id| sessions.get(id))
                .cloned();
            return Ok(found.into_iter().collect());
        }
        Ok(select_matching(sessions.values().cloned(), query))
    }

    fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let mut stored = record.clone();
        stored.mark_saved();
        sessions.insert(stored.id().to_string(), stored);
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().remove(session_id);
        Ok(())
    }
}

// ============================================================================
// File backend
// ============================================================================

/// Grouping attributes of a stored record
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    user_id: Option<String>,
    fingerprint: String,
}

impl IndexEntry {
    fn of(record: &SessionRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            fingerprint: record.fingerprint.clone(),
        }
    }

    fn matches(&self, group: &SessionGroup, owner: Option<&str>) -> bool {
        match group {
            SessionGroup::None => false,
            SessionGroup::SameOwner => owner.is_some() && self.user_id.as_deref() == owner,
            SessionGroup::Fingerprint(fp) => !fp.is_empty() && self.fingerprint == *fp,
        }
    }
}

/// File-based session storage: one `<id>.json` file per record.
///
/// Group queries go through an in-memory index of owner and fingerprint
/// per record, so a resolution reads only the files of the requested group.
/// The index is built by scanning the directory on the first group query and
/// is kept current by this store's own writes. Records written to the
/// directory by another process after that scan are only seen when they are
/// the requested record itself; run one store per directory.
#[derive(Debug)]
pub struct FileSessionStore {
    base_path: PathBuf,
    index: RwLock<Option<HashMap<String, IndexEntry>>>,
}

impl FileSessionStore {
    /// Create a store rooted at `base_path` (created lazily on first write)
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            index: RwLock::new(None),
        }
    }

    /// Get the base path for session storage
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Ensure the base directory exists
    fn ensure_base_dir(&self) -> Result<(), StoreError> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path)?;
        }
        Ok(())
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_session_id(session_id) {
            return Err(StoreError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.base_path.join(format!("{}.json", session_id)))
    }

    /// Load a single record from disk
    fn load(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let path = self.session_path(session_id)?;
        if !path.exists() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load every readable record. Unreadable files are skipped.
    fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(stem) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(target: targets::SESSION, path = %path.display(), error = %e, "skipping unreadable session file");
                }
            }
        }
        Ok(records)
    }

    /// Build the grouping index from a full scan, once.
    fn ensure_index(&self) -> Result<(), StoreError> {
        if self.index.read().is_some() {
            return Ok(());
        }
        let mut index = self.index.write();
        if index.is_none() {
            let entries = self
                .load_all()?
                .iter()
                .map(|record| (record.id().to_string(), IndexEntry::of(record)))
                .collect();
            *index = Some(entries);
        }
        Ok(())
    }

    fn index_insert(&self, record: &SessionRecord) {
        if let Some(entries) = self.index.write().as_mut() {
            entries.insert(record.id().to_string(), IndexEntry::of(record));
        }
    }

    fn index_remove(&self, session_id: &str) {
        if let Some(entries) = self.index.write().as_mut() {
            entries.remove(session_id);
        }
    }

    /// Load the requested record and the indexed members of its group.
    fn load_group(&self, requested: &str, group: &SessionGroup) -> Result<Vec<SessionRecord>, StoreError> {
        let anchor = match self.load(requested) {
            Ok(record) => Some(record),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        self.ensure_index()?;
        if let Some(record) = &anchor {
            self.index_insert(record);
        }

        let owner = anchor.as_ref().and_then(|r| r.user_id.clone());
        let members: Vec<String> = self
            .index
            .read()
            .as_ref()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(id, entry)| id.as_str() != requested && entry.matches(group, owner.as_deref()))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut records: Vec<SessionRecord> = anchor.into_iter().collect();
        for id in members {
            match self.load(&id) {
                Ok(record) => records.push(record),
                Err(StoreError::NotFound(_)) => self.index_remove(&id),
                Err(e) => {
                    warn!(target: targets::SESSION, session_id = %id, error = %e, "skipping unreadable session file");
                }
            }
        }
        Ok(records)
    }
}

impl SessionBackend for FileSessionStore {
    fn find_matching(&self, query: &SessionQuery) -> Result<Vec<SessionRecord>, StoreError> {
        let Some(requested) = query.session_id.as_deref() else {
            return Ok(Vec::new());
        };

        if query.group == SessionGroup::None {
            return match self.load(requested) {
                Ok(record) => Ok(vec![record]),
                Err(StoreError::NotFound(_)) => Ok(Vec::new()),
                Err(e) => Err(e),
            };
        }

        let records = self.load_group(requested, &query.group)?;
        Ok(select_matching(records, query))
    }

    fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.session_path(record.id())?;
        self.ensure_base_dir()?;

        let temp_path = path.with_extension("json.tmp");
        {
            let file = File::create(&temp_path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer(writer, record)?;
        }
        fs::rename(&temp_path, &path)?;
        self.index_insert(record);
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.session_path(session_id)?;
        let result = match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        if result.is_ok() {
            self.index_remove(session_id);
        }
        result
    }
}
