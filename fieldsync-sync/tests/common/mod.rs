#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use fieldsync_core::GrowerRecord;
use fieldsync_sync::{AliasRegistry, MemoryProvider, MemoryStore, Session, SyncState};

pub const USER: &str = "users/default:users_sam_321";

pub struct Harness {
    pub provider: Arc<MemoryProvider>,
    pub store: Arc<MemoryStore>,
    pub session: Session,
}

pub fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let provider = Arc::new(MemoryProvider::new());
    let store = Arc::new(MemoryStore::new());
    let session = Session {
        provider: provider.clone(),
        store: store.clone(),
        aliases: Arc::new(AliasRegistry::in_memory(provider.clone())),
        user_id: USER.to_string(),
        lookback_days: 1461,
    };
    Harness {
        provider,
        store,
        session,
    }
}

impl Harness {
    pub fn state(&self) -> SyncState {
        SyncState::new(self.session.clone(), at(0))
    }
}

/// 2024-06-01 12:00:00 UTC plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn grower(value: Value) -> GrowerRecord {
    serde_json::from_value(value).expect("grower record")
}
