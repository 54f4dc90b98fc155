//! Session layer
//!
//! Session records, their storage backends, and per-request resolution with
//! the concurrent-session cap.

pub mod id;
mod record;
pub mod resolver;
pub mod store;

pub use record::SessionRecord;
pub use resolver::{
    EvictionCandidate, RequestInfo, Resolution, SessionCap, SessionGrouping, SessionResolver,
};
pub use store::{
    FileSessionStore, MemorySessionStore, SessionBackend, SessionGroup, SessionQuery, StoreError,
};
