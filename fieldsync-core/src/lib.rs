//! fieldsync core library: domain records, Store tree layout, configuration.
//!
//! - [`types`]: Provider records, Store resource view, notifications
//! - [`tree`]: tree templates and deterministic Store paths
//! - [`config`]: `~/.fieldsync/config.yaml` load / save / init
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod tree;
pub mod types;

pub use config::{Config, LoggingConfig, ProviderConfig, StoreConfig, SyncSettings};
pub use error::ConfigError;
pub use tree::{paths, TreeTemplate};
pub use types::{
    BoundaryRecord, ChangeEvent, DatasiloMeta, FarmRecord, FieldRecord, GrowerRecord,
    index_entries, ProviderId, RecordStatus, StoreResource, WriteNotification,
};
