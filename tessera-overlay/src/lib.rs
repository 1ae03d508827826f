//! Tessera Overlay
//!
//! Reputation-aware registry of storage nodes:
//! - `ReputationStore`: node records on a pluggable key-value engine
//! - `Discovery`: source of freshly observed nodes
//! - `OverlayCache`: node selection, lookup and refresh from discovery
//! - `RefreshHandle`: the periodic refresh task

pub mod cache;
pub mod discovery;
pub mod refresh;
pub mod store;

pub use cache::{OverlayCache, RefreshStats, Selection};
pub use discovery::{Discovery, StaticDiscovery};
pub use refresh::RefreshHandle;
pub use store::ReputationStore;
