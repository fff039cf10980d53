//! rollcall-shell — offline shell cache for the kiosk.
//!
//! Snapshots a fixed set of shell assets into a versioned cache generation,
//! activates it by dropping every other generation, and serves requests
//! cache-first, except model files which always go to the network.

pub mod manifest;
pub mod network;
pub mod store;
pub mod worker;

pub use manifest::{cache_key, RouteClass, RouteClassifier, ShellManifest};
pub use network::{FetchError, HttpNetwork, Network};
pub use store::{CacheError, CacheStorage, DirStorage, MemoryStorage, ShellResponse};
pub use worker::{ActivationReport, Served, ServedFrom, ShellCache, ShellError};
