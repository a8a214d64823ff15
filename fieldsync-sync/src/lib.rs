//! # fieldsync-sync
//!
//! Bidirectional reconciliation between the Provider and the Store.
//!
//! - [`poll::run_tick`] pulls Provider changes since the cursor and runs the
//!   [`ForwardReconciler`] over the first grower's farms and fields.
//! - [`ReverseReconciler::handle`] pushes one Store change event back to the
//!   Provider.
//!
//! Both directions share one [`Session`] whose [`AliasRegistry`] is the
//! single source of identity.

pub mod alias;
pub mod cursor;
pub mod diff;
pub mod error;
pub mod forward;
pub mod geometry;
pub mod memory;
pub mod poll;
pub mod provider;
pub mod reverse;
pub mod state;
pub mod store;

pub use alias::{AliasJournal, AliasRegistry};
pub use cursor::SyncCursor;
pub use error::{SyncError, SyncResult};
pub use forward::{EntityKind, ForwardReconciler, ReconcileOutcome, RecordReport};
pub use geometry::{geojson_to_wkt, wkt_to_geojson, Geometry, GeometryError};
pub use memory::{MemoryProvider, MemoryStore};
pub use poll::{run_tick, FetchStatus, TickReport};
pub use provider::{Entity, Fetched, HttpProvider, Provider, WriteMode};
pub use reverse::{EventReport, ProviderWrite, ReverseReconciler};
pub use state::{Session, SyncState};
pub use store::{HttpStore, PathLookup, Store};
