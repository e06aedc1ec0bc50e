//! File-backed persistence for ratchet loop snapshots.
//!
//! [`JsonFileSink`] implements [`ratchet_core::StateSink`] by writing each
//! snapshot as pretty-printed JSON, replacing the previous one atomically.
//! [`load_snapshot`] reads it back for `ratchet status`.

pub mod config;
pub mod json_file;

pub use config::StoreConfig;
pub use json_file::{JsonFileSink, StoreError, load_snapshot};
