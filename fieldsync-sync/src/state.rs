//! Process-wide sync state, passed explicitly to both directions.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use fieldsync_core::Config;

use crate::alias::AliasRegistry;
use crate::cursor::SyncCursor;
use crate::error::SyncResult;
use crate::provider::{HttpProvider, Provider};
use crate::store::{HttpStore, Store};

/// The collaborators and identity shared by the poll loop and the change queue.
#[derive(Clone)]
pub struct Session {
    pub provider: Arc<dyn Provider>,
    pub store: Arc<dyn Store>,
    pub aliases: Arc<AliasRegistry>,
    /// Acting user for Store path lookups.
    pub user_id: String,
    pub lookback_days: i64,
}

impl Session {
    /// HTTP collaborators built from `config`, alias journal under `home`.
    pub fn connect_at(home: &Path, config: &Config) -> SyncResult<Self> {
        let provider: Arc<dyn Provider> = Arc::new(HttpProvider::new(&config.provider)?);
        let store: Arc<dyn Store> = Arc::new(HttpStore::new(&config.store)?);
        let aliases = Arc::new(AliasRegistry::open_at(home, provider.clone())?);
        Ok(Self {
            provider,
            store,
            aliases,
            user_id: config.store.user_id.clone(),
            lookback_days: config.sync.bootstrap_lookback_days,
        })
    }

    /// The cursor used for a first fetch or a grower bootstrap.
    pub fn bootstrap_cursor(&self, now: DateTime<Utc>) -> SyncCursor {
        SyncCursor::bootstrap(now, self.lookback_days)
    }
}

/// Cursor plus session. Owned by whichever task drives the poll loop.
pub struct SyncState {
    pub cursor: SyncCursor,
    pub session: Session,
}

impl SyncState {
    pub fn new(session: Session, now: DateTime<Utc>) -> Self {
        Self {
            cursor: session.bootstrap_cursor(now),
            session,
        }
    }
}
