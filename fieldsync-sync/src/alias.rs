//! Alias registry: Provider-native ID → Store resource ID.
//!
//! Mappings live in the Provider's alias store. A local journal at
//! `<home>/.fieldsync/aliases.json` sits in front of it so a mapping written
//! in one tick is visible to the next without a round trip, and so
//! `fieldsync aliases` can list what this process has minted.
//!
//! A mapping is created once and never reassigned while its target lives.
//! Deleting a record retires its Store identifier: a retired identifier is
//! never handed out again, and the alias that pointed at it may be replaced
//! by a freshly minted one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use fieldsync_core::config::alias_journal_path_at;
use fieldsync_core::paths;

use crate::error::{io_err, SyncResult};
use crate::provider::Provider;

/// On-disk journal payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AliasJournal {
    pub synced_at: DateTime<Utc>,
    pub aliases: BTreeMap<String, String>,
    /// Store identifiers of deleted records.
    #[serde(default)]
    pub retired: BTreeSet<String>,
}

impl Default for AliasJournal {
    fn default() -> Self {
        Self {
            synced_at: Utc::now(),
            aliases: BTreeMap::new(),
            retired: BTreeSet::new(),
        }
    }
}

/// Load the journal. Returns an empty journal if the file does not exist.
pub fn load_journal_at(home: &Path) -> SyncResult<AliasJournal> {
    let path = alias_journal_path_at(home);
    if !path.exists() {
        return Ok(AliasJournal::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the journal atomically (`aliases.json.tmp` + rename).
pub fn save_journal_at(home: &Path, journal: &AliasJournal) -> SyncResult<()> {
    let path = alias_journal_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(journal)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// A Store identifier resolved for a Provider object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// `resources/K`
    pub id: String,
    /// `K`
    pub key: String,
    /// True when this call minted the identifier.
    pub minted: bool,
}

impl Resolved {
    /// An identifier that already exists; nothing is minted.
    pub fn existing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            key: paths::key_from_id(id).to_string(),
            minted: false,
        }
    }
}

pub struct AliasRegistry {
    provider: Arc<dyn Provider>,
    journal: Mutex<AliasJournal>,
    home: Option<PathBuf>,
}

impl AliasRegistry {
    /// Registry backed by the journal under `home`.
    pub fn open_at(home: &Path, provider: Arc<dyn Provider>) -> SyncResult<Self> {
        Ok(Self {
            provider,
            journal: Mutex::new(load_journal_at(home)?),
            home: Some(home.to_path_buf()),
        })
    }

    /// Registry whose journal is never persisted.
    pub fn in_memory(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            journal: Mutex::new(AliasJournal::default()),
            home: None,
        }
    }

    /// Store identifier for `external_id`: journal first, then the Provider.
    pub async fn lookup(&self, external_id: &str) -> SyncResult<Option<String>> {
        let mut journal = self.journal.lock().await;
        self.lookup_locked(&mut journal, external_id).await
    }

    /// Create `external_id → store_id` unless a live mapping exists.
    ///
    /// Returns the identifier now in effect, which is the existing one when
    /// the external ID was already mapped to an identifier that is not retired.
    pub async fn register(&self, external_id: &str, store_id: &str) -> SyncResult<String> {
        let mut journal = self.journal.lock().await;
        if let Some(existing) = self.lookup_locked(&mut journal, external_id).await? {
            if !journal.retired.contains(&existing) {
                if existing != store_id {
                    tracing::debug!(
                        "alias for {} already maps to {}; keeping it over {}",
                        external_id,
                        existing,
                        store_id
                    );
                }
                return Ok(existing);
            }
            tracing::info!(
                "alias for {} maps to retired {}; replacing it",
                external_id,
                existing
            );
        }
        self.provider.put_alias(external_id, store_id).await?;
        journal
            .aliases
            .insert(external_id.to_string(), store_id.to_string());
        self.persist(&mut journal)?;
        tracing::info!("registered alias {} -> {}", external_id, store_id);
        Ok(store_id.to_string())
    }

    /// Resolve a Provider object's Store identifier, minting one if needed.
    ///
    /// `tagged` is the identifier the Provider echoed back on the record.
    /// Without it, or when it is retired, an existing live alias is reused;
    /// only then is a fresh `resources/<uuid>` minted and registered.
    pub async fn resolve_or_mint(
        &self,
        external_id: &str,
        tagged: Option<&str>,
    ) -> SyncResult<Resolved> {
        if let Some(id) = tagged {
            if !self.is_retired(id).await {
                return Ok(Resolved::existing(id));
            }
        }
        if let Some(id) = self.lookup(external_id).await? {
            if !self.is_retired(&id).await {
                return Ok(Resolved::existing(&id));
            }
        }
        let key = uuid::Uuid::new_v4().to_string();
        let candidate = paths::resource_id(&key);
        let id = self.register(external_id, &candidate).await?;
        let minted = id == candidate;
        Ok(Resolved {
            key: paths::key_from_id(&id).to_string(),
            id,
            minted,
        })
    }

    /// Mark `store_id` as belonging to a deleted record.
    pub async fn retire(&self, store_id: &str) -> SyncResult<()> {
        let mut journal = self.journal.lock().await;
        if journal.retired.insert(store_id.to_string()) {
            self.persist(&mut journal)?;
            tracing::info!("retired {}", store_id);
        }
        Ok(())
    }

    pub async fn is_retired(&self, store_id: &str) -> bool {
        self.journal.lock().await.retired.contains(store_id)
    }

    /// Snapshot of every journaled mapping.
    pub async fn entries(&self) -> BTreeMap<String, String> {
        self.journal.lock().await.aliases.clone()
    }

    async fn lookup_locked(
        &self,
        journal: &mut AliasJournal,
        external_id: &str,
    ) -> SyncResult<Option<String>> {
        if let Some(id) = journal.aliases.get(external_id) {
            return Ok(Some(id.clone()));
        }
        let Some(id) = self.provider.get_alias(external_id).await? else {
            return Ok(None);
        };
        journal.aliases.insert(external_id.to_string(), id.clone());
        self.persist(journal)?;
        Ok(Some(id))
    }

    fn persist(&self, journal: &mut AliasJournal) -> SyncResult<()> {
        journal.synced_at = Utc::now();
        match &self.home {
            Some(home) => save_journal_at(home, journal),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use tempfile::TempDir;

    #[tokio::test]
    async fn minting_twice_reuses_the_first_identifier() {
        let provider = Arc::new(MemoryProvider::new());
        let registry = AliasRegistry::in_memory(provider.clone());

        let first = registry.resolve_or_mint("f1", None).await.unwrap();
        let second = registry.resolve_or_mint("f1", None).await.unwrap();

        assert!(first.minted);
        assert!(!second.minted);
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, format!("resources/{}", first.key));
        assert_eq!(provider.aliases().await.len(), 1);
    }

    #[tokio::test]
    async fn register_never_overwrites() {
        let provider = Arc::new(MemoryProvider::new());
        let registry = AliasRegistry::in_memory(provider.clone());

        registry.register("f1", "resources/a").await.unwrap();
        let effective = registry.register("f1", "resources/b").await.unwrap();

        assert_eq!(effective, "resources/a");
        assert_eq!(
            provider.aliases().await.get("f1").map(String::as_str),
            Some("resources/a")
        );
    }

    #[tokio::test]
    async fn provider_side_alias_is_found_and_journaled() {
        let home = TempDir::new().unwrap();
        let provider = Arc::new(MemoryProvider::new());
        provider.seed_alias("f9", "resources/old").await;

        let registry = AliasRegistry::open_at(home.path(), provider.clone()).unwrap();
        let resolved = registry.resolve_or_mint("f9", None).await.unwrap();
        assert_eq!(resolved.key, "old");
        assert!(!resolved.minted);

        let journal = load_journal_at(home.path()).unwrap();
        assert_eq!(journal.aliases.get("f9").map(String::as_str), Some("resources/old"));
    }

    #[tokio::test]
    async fn tagged_identifier_skips_the_registry() {
        let provider = Arc::new(MemoryProvider::new());
        let registry = AliasRegistry::in_memory(provider.clone());
        let resolved = registry
            .resolve_or_mint("f1", Some("resources/K"))
            .await
            .unwrap();
        assert_eq!(resolved.key, "K");
        assert!(provider.aliases().await.is_empty());
    }

    #[tokio::test]
    async fn retired_identifier_is_replaced_by_a_fresh_one() {
        let home = TempDir::new().unwrap();
        let provider = Arc::new(MemoryProvider::new());
        let registry = AliasRegistry::open_at(home.path(), provider.clone()).unwrap();

        let first = registry.resolve_or_mint("f1", None).await.unwrap();
        registry.retire(&first.id).await.unwrap();

        let tagged = registry
            .resolve_or_mint("f1", Some(first.id.as_str()))
            .await
            .unwrap();
        assert!(tagged.minted);
        assert_ne!(tagged.id, first.id);
        assert_eq!(provider.aliases().await["f1"], tagged.id);

        let again = registry.resolve_or_mint("f1", None).await.unwrap();
        assert_eq!(again.id, tagged.id);
        assert!(!again.minted);

        let journal = load_journal_at(home.path()).unwrap();
        assert!(journal.retired.contains(&first.id));
        assert_eq!(journal.aliases["f1"], tagged.id);
    }

    #[tokio::test]
    async fn retired_identifiers_survive_reopen() {
        let home = TempDir::new().unwrap();
        let provider = Arc::new(MemoryProvider::new());
        let registry = AliasRegistry::open_at(home.path(), provider.clone()).unwrap();
        registry.register("f1", "resources/K").await.unwrap();
        registry.retire("resources/K").await.unwrap();
        drop(registry);

        let reopened = AliasRegistry::open_at(home.path(), provider).unwrap();
        assert!(reopened.is_retired("resources/K").await);
        let resolved = reopened.resolve_or_mint("f1", None).await.unwrap();
        assert_ne!(resolved.id, "resources/K");
    }

    #[test]
    fn journal_without_retired_set_still_loads() {
        let home = TempDir::new().unwrap();
        let path = alias_journal_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{ "synced_at": "2024-06-01T12:00:00Z", "aliases": { "f1": "resources/K" } }"#,
        )
        .unwrap();

        let journal = load_journal_at(home.path()).unwrap();
        assert_eq!(journal.aliases.len(), 1);
        assert!(journal.retired.is_empty());
    }

    #[test]
    fn journal_save_cleans_up_tmp() {
        let home = TempDir::new().unwrap();
        save_journal_at(home.path(), &AliasJournal::default()).unwrap();
        let tmp = alias_journal_path_at(home.path()).with_extension("json.tmp");
        assert!(!tmp.exists(), "tmp file should be removed after atomic rename");
        assert!(load_journal_at(home.path()).unwrap().aliases.is_empty());
    }
}
