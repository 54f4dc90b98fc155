//! Session finalization
//!
//! [`SessionFinalizer`] is created by the session stage as soon as a record
//! is bound to the request. It is the only code that writes session storage:
//! it removes eviction candidates and scheduled deletions, then upserts the
//! active record if it is dirty.
//!
//! Finalization runs exactly once. The session stage calls
//! [`SessionFinalizer::finalize`] after the inner stages return; if they
//! unwind or the request future is dropped first, `Drop` runs it instead.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::logging::targets;
use crate::server::context::RequestContext;
use crate::sessions::SessionBackend;

/// What finalization did to storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// Active record was written
    pub persisted: bool,
    /// Active record was discarded (and removed if it was stored)
    pub discarded: bool,
    /// Eviction candidates removed
    pub evicted: usize,
    /// Explicitly scheduled deletions performed
    pub deleted: usize,
}

/// Guaranteed end-of-request persistence for one request's session.
pub struct SessionFinalizer {
    ctx: RequestContext,
    store: Arc<dyn SessionBackend>,
    done: bool,
}

impl SessionFinalizer {
    pub fn new(ctx: RequestContext, store: Arc<dyn SessionBackend>) -> Self {
        Self {
            ctx,
            store,
            done: false,
        }
    }

    /// Finalize now and report what happened.
    pub fn finalize(mut self) -> FinalizeOutcome {
        self.done = true;
        finalize_session(&self.ctx, self.store.as_ref())
    }
}

impl Drop for SessionFinalizer {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        let outcome = finalize_session(&self.ctx, self.store.as_ref());
        let _enter = self.ctx.span().enter();
        if std::thread::panicking() {
            warn!(target: targets::SESSION, persisted = outcome.persisted, "session finalized during panic");
        } else {
            debug!(target: targets::SESSION, persisted = outcome.persisted, "session finalized after cancellation");
        }
    }
}

fn finalize_session(ctx: &RequestContext, store: &dyn SessionBackend) -> FinalizeOutcome {
    let _enter = ctx.span().enter();
    let mut outcome = FinalizeOutcome::default();
    let mut scope = ctx.lock();

    for candidate in std::mem::take(&mut scope.candidates) {
        match store.delete(&candidate.id) {
            Ok(()) => {
                outcome.evicted += 1;
                info!(
                    target: targets::SESSION,
                    evicted_session = %candidate.id,
                    evicted_updated_at = candidate.updated_at,
                    "evicted session over cap"
                );
            }
            Err(e) => {
                warn!(target: targets::SESSION, evicted_session = %candidate.id, error = %e, "failed to evict session");
            }
        }
    }

    for session_id in std::mem::take(&mut scope.pending_deletions) {
        match store.delete(&session_id) {
            Ok(()) => {
                outcome.deleted += 1;
                info!(target: targets::SESSION, deleted_session = %session_id, "deleted session");
            }
            Err(e) => {
                warn!(target: targets::SESSION, deleted_session = %session_id, error = %e, "failed to delete session");
            }
        }
    }

    if scope.discard_active {
        outcome.discarded = true;
        if scope.loaded {
            if let Err(e) = store.delete(scope.session.id()) {
                warn!(target: targets::SESSION, error = %e, "failed to delete current session");
            }
            scope.loaded = false;
        }
        return outcome;
    }

    if !scope.session.is_dirty() {
        return outcome;
    }

    scope.session.touch();
    match store.upsert(&scope.session) {
        Ok(()) => {
            scope.session.mark_saved();
            scope.loaded = true;
            outcome.persisted = true;
        }
        Err(e) => {
            error!(target: targets::SESSION, error = %e, "failed to persist session");
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash;
    use crate::server::context::RequestMeta;
    use crate::sessions::{
        EvictionCandidate, MemorySessionStore, Resolution, SessionQuery, SessionRecord, StoreError,
    };
    use parking_lot::Mutex;

    /// Store wrapper counting upserts
    #[derive(Default)]
    struct CountingStore {
        inner: MemorySessionStore,
        upserts: Mutex<usize>,
    }

    impl SessionBackend for CountingStore {
        fn find_matching(&self, query: &SessionQuery) -> Result<Vec<SessionRecord>, StoreError> {
            self.inner.find_matching(query)
        }

        fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
            *self.upserts.lock() += 1;
            self.inner.upsert(record)
        }

        fn delete(&self, session_id: &str) -> Result<(), StoreError> {
            self.inner.delete(session_id)
        }
    }

    fn context(record: SessionRecord, loaded: bool, candidates: Vec<EvictionCandidate>) -> RequestContext {
        let resolution = Resolution {
            record,
            loaded,
            candidates,
        };
        RequestContext::new(resolution, "/", RequestMeta::detached())
    }

    #[test]
    fn test_clean_session_is_not_written() {
        let store = Arc::new(CountingStore::default());
        let ctx = context(SessionRecord::with_id("s1"), false, Vec::new());
        let outcome = SessionFinalizer::new(ctx, store.clone()).finalize();
        assert!(!outcome.persisted);
        assert_eq!(*store.upserts.lock(), 0);
    }

    #[test]
    fn test_dirty_session_is_written_once() {
        let store = Arc::new(CountingStore::default());
        let ctx = context(SessionRecord::with_id("s1"), false, Vec::new());
        ctx.with_session(|s| flash::set_info_message(s, "hello"));

        let outcome = SessionFinalizer::new(ctx.clone(), store.clone()).finalize();
        assert!(outcome.persisted);
        assert_eq!(*store.upserts.lock(), 1);
        assert!(!ctx.session().is_dirty());
        assert!(store.inner.get("s1").unwrap().contains_key(flash::INFO_MESSAGE));
    }

    #[test]
    fn test_drop_finalizes_once() {
        let store = Arc::new(CountingStore::default());
        let ctx = context(SessionRecord::with_id("s1"), false, Vec::new());
        ctx.with_session(|s| s.mark_dirty());

        drop(SessionFinalizer::new(ctx, store.clone()));
        assert_eq!(*store.upserts.lock(), 1);
    }

    #[test]
    fn test_finalize_runs_on_unwind() {
        let store = Arc::new(CountingStore::default());
        let ctx = context(SessionRecord::with_id("s1"), false, Vec::new());
        let finalizer = SessionFinalizer::new(ctx.clone(), store.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _finalizer = finalizer;
            ctx.with_session(|s| s.insert("k", serde_json::json!(1)));
            panic!("handler failed");
        }));

        assert!(result.is_err());
        assert_eq!(*store.upserts.lock(), 1);
        assert!(store.inner.contains("s1"));
    }

    #[test]
    fn test_candidates_are_evicted() {
        let store = Arc::new(CountingStore::default());
        for id in ["a", "b", "c"] {
            store.inner.upsert(&SessionRecord::with_id(id)).unwrap();
        }
        let candidates = ["a", "c"]
            .iter()
            .map(|id| EvictionCandidate {
                id: id.to_string(),
                user_id: None,
                updated_at: 0,
            })
            .collect();
        let ctx = context(SessionRecord::with_id("b"), true, candidates);
        ctx.with_session(|s| s.mark_dirty());

        let outcome = SessionFinalizer::new(ctx.clone(), store.clone()).finalize();
        assert_eq!(outcome.evicted, 2);
        assert!(outcome.persisted);
        assert_eq!(store.inner.len(), 1);
        assert!(store.inner.contains("b"));
        assert!(ctx.eviction_candidates().is_empty());
    }

    #[test]
    fn test_discarded_session_is_removed_not_written() {
        let store = Arc::new(CountingStore::default());
        store.inner.upsert(&SessionRecord::with_id("s1")).unwrap();
        store.inner.upsert(&SessionRecord::with_id("s2")).unwrap();

        let ctx = context(SessionRecord::with_id("s1"), true, Vec::new());
        ctx.with_session(|s| s.mark_dirty());
        ctx.delete_session("s2");
        ctx.delete_current_session();

        let outcome = SessionFinalizer::new(ctx, store.clone()).finalize();
        assert!(outcome.discarded);
        assert!(!outcome.persisted);
        assert_eq!(outcome.deleted, 1);
        assert_eq!(*store.upserts.lock(), 0);
        assert!(store.inner.is_empty());
    }
}
