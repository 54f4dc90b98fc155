//! pageflow library
//!
//! Session-aware request pipeline for server-rendered pages: multi-session
//! resolution with eviction, read-once flash data, per-request page views
//! and guaranteed end-of-request persistence.

pub mod cli;
pub mod config;
pub mod flash;
pub mod logging;
pub mod page;
pub mod server;
pub mod sessions;
