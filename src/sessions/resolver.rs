//! Session resolution
//!
//! Binds each request to exactly one [`SessionRecord`]. When a cap on
//! concurrent sessions is configured, the records surrounding the requested
//! one are fetched in the same storage read and every record other than the
//! active one becomes an eviction candidate once the group exceeds the cap.
//!
//! Resolution never fails: storage errors and unknown identifiers degrade to
//! a fresh, empty record.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::logging::targets;

use super::id::fingerprint;
use super::record::SessionRecord;
use super::store::{SessionBackend, SessionGroup, SessionQuery};

/// Upper bound on concurrent stored sessions per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionCap {
    #[default]
    Unlimited,
    Limited(usize),
}

impl SessionCap {
    /// Build a cap from its configured integer form (`-1` = unlimited).
    ///
    /// Any negative value is treated as unlimited.
    pub fn from_config(value: i64) -> Self {
        if value < 0 {
            SessionCap::Unlimited
        } else {
            SessionCap::Limited(value as usize)
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, SessionCap::Unlimited)
    }

    /// Maximum count, `None` when unlimited
    pub fn max(&self) -> Option<usize> {
        match self {
            SessionCap::Unlimited => None,
            SessionCap::Limited(max) => Some(*max),
        }
    }

    /// Whether `count` stored sessions fit within the cap.
    pub fn allows(&self, count: usize) -> bool {
        match self {
            SessionCap::Unlimited => true,
            SessionCap::Limited(max) => count <= *max,
        }
    }
}

/// How the sessions surrounding a requested session are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionGrouping {
    /// Sessions owned by the same user
    #[default]
    Identity,
    /// Sessions opened from the same device (user agent + client address)
    Fingerprint,
}

/// Request attributes consulted during resolution.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Identifier presented by the client, if any
    pub session_id: Option<String>,
    /// Request path
    pub path: String,
    /// Client address
    pub ip: Option<IpAddr>,
    /// User-agent header value
    pub user_agent: String,
}

impl RequestInfo {
    fn ip_string(&self) -> String {
        self.ip.map(|ip| ip.to_string()).unwrap_or_default()
    }

    fn fingerprint(&self) -> String {
        fingerprint(&self.user_agent, &self.ip_string())
    }
}

/// A stored session slated for removal at finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: String,
    pub user_id: Option<String>,
    pub updated_at: i64,
}

impl From<&SessionRecord> for EvictionCandidate {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id().to_string(),
            user_id: record.user_id.clone(),
            updated_at: record.updated_at,
        }
    }
}

/// Outcome of resolving a request.
#[derive(Debug)]
pub struct Resolution {
    /// The record bound to the request
    pub record: SessionRecord,
    /// Whether `record` was loaded from storage (false for fresh records)
    pub loaded: bool,
    /// Stored sessions to remove at finalization
    pub candidates: Vec<EvictionCandidate>,
}

impl Resolution {
    fn fresh(info: &RequestInfo) -> Self {
        let mut record = SessionRecord::new();
        record.ip = info.ip_string();
        record.user_agent = info.user_agent.clone();
        record.fingerprint = info.fingerprint();
        Self {
            record,
            loaded: false,
            candidates: Vec::new(),
        }
    }
}

/// Resolves requests to session records against a storage backend.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn SessionBackend>,
    cap: SessionCap,
    grouping: SessionGrouping,
    delete_path: String,
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResolver")
            .field("cap", &self.cap)
            .field("grouping", &self.grouping)
            .field("delete_path", &self.delete_path)
            .finish_non_exhaustive()
    }
}

impl SessionResolver {
    pub fn new(store: Arc<dyn SessionBackend>) -> Self {
        Self {
            store,
            cap: SessionCap::Unlimited,
            grouping: SessionGrouping::Identity,
            delete_path: "/sessions/delete".to_string(),
        }
    }

    pub fn with_cap(mut self, cap: SessionCap) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_grouping(mut self, grouping: SessionGrouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn with_delete_path(mut self, path: impl Into<String>) -> Self {
        self.delete_path = path.into();
        self
    }

    pub fn cap(&self) -> SessionCap {
        self.cap
    }

    pub fn store(&self) -> &Arc<dyn SessionBackend> {
        &self.store
    }

    /// Build the storage query for a requested identifier.
    pub fn query_for(&self, session_id: &str, info: &RequestInfo) -> SessionQuery {
        let query = SessionQuery::by_id(session_id);
        if self.cap.is_unlimited() {
            return query;
        }
        let group = match self.grouping {
            SessionGrouping::Identity => SessionGroup::SameOwner,
            SessionGrouping::Fingerprint => SessionGroup::Fingerprint(info.fingerprint()),
        };
        query.with_group(group)
    }

    /// Resolve the session for a request.
    pub fn resolve(&self, info: &RequestInfo) -> Resolution {
        let Some(requested) = info.session_id.as_deref().filter(|id| !id.is_empty()) else {
            return Resolution::fresh(info);
        };

        let query = self.query_for(requested, info);
        let mut records = match self.store.find_matching(&query) {
            Ok(records) => records,
            Err(e) => {
                warn!(target: targets::SESSION, error = %e, "session lookup failed, using fresh session");
                return Resolution::fresh(info);
            }
        };

        if records.is_empty() {
            debug!(target: targets::SESSION, "no stored session matched, using fresh session");
            return Resolution::fresh(info);
        }

        let total = records.len();
        let active = records
            .iter()
            .position(|r| r.id() == requested)
            .map(|index| records.remove(index));

        let mut resolution = match active {
            Some(record) => Resolution {
                record,
                loaded: true,
                candidates: Vec::new(),
            },
            None => Resolution::fresh(info),
        };

        if self.cap.allows(total) {
            return resolution;
        }

        // the delete path handles removal itself
        if info.path == self.delete_path {
            return resolution;
        }

        resolution.candidates = records.iter().map(EvictionCandidate::from).collect();
        debug!(
            target: targets::SESSION,
            stored = total,
            evicting = resolution.candidates.len(),
            "session cap exceeded"
        );
        resolution
    }
}
