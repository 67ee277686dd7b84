//! Collection Registry
//!
//! Idempotent provisioning of one NFT collection per zone.
//!
//! # Protocol
//!
//! ```text
//! lock ─▶ load ─▶ entry for zone? ─yes─▶ well-formed id? ─yes─▶ return it
//!                     │                        │
//!                     no                       no (drop stale entry)
//!                     ▼                        ▼
//!               discovery finds one? ─yes─▶ record it ─▶ save ─▶ return
//!                     │
//!                     no
//!                     ▼
//!               create on ledger ─▶ record it ─▶ save ─▶ return
//! ```
//!
//! The whole cycle runs under the store lock, so concurrent runs sharing a
//! registry never create two collections for one zone.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::store::{CollectionRegistryDoc, RegistryStore};
use crate::domain::ports::{CollectionHandle, CollectionSpec, LedgerWriter};
use crate::error::Result;

/// Default registry prefix used in collection names and symbols.
pub const DEFAULT_REGISTRY_PREFIX: &str = "APEX";

/// Default zone marker used in collection symbols.
pub const DEFAULT_ZONE_MARKER: &str = "ZONE";

// =============================================================================
// Naming
// =============================================================================

/// Deterministic collection naming for a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNaming {
    pub registry_prefix: String,
    pub zone_marker: String,
}

impl Default for CollectionNaming {
    fn default() -> Self {
        Self {
            registry_prefix: DEFAULT_REGISTRY_PREFIX.to_string(),
            zone_marker: DEFAULT_ZONE_MARKER.to_string(),
        }
    }
}

impl CollectionNaming {
    pub fn new(registry_prefix: impl Into<String>) -> Self {
        Self {
            registry_prefix: registry_prefix.into(),
            ..Self::default()
        }
    }

    /// e.g. `APEX Domain Ledger Zone - .BUILD`
    pub fn name(&self, zone: &str) -> String {
        format!(
            "{} Domain Ledger Zone - .{}",
            self.registry_prefix.to_uppercase(),
            zone.to_uppercase()
        )
    }

    /// e.g. `APEX-ZONE.BUILD`
    pub fn symbol(&self, zone: &str) -> String {
        format!(
            "{}-{}.{}",
            self.registry_prefix.to_uppercase(),
            self.zone_marker.to_uppercase(),
            zone.to_uppercase()
        )
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Finds a collection created for a zone by an earlier run whose registry
/// entry was lost.
#[async_trait]
pub trait CollectionDiscovery: Send + Sync {
    async fn discover(&self, zone: &str, naming: &CollectionNaming)
        -> Result<Option<CollectionHandle>>;
}

/// Discovery that never finds anything.
///
/// Searching the ledger for collections by name is not implemented; a lost
/// registry entry therefore leads to a new collection for the zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiscovery;

#[async_trait]
impl CollectionDiscovery for NoDiscovery {
    async fn discover(
        &self,
        _zone: &str,
        _naming: &CollectionNaming,
    ) -> Result<Option<CollectionHandle>> {
        Ok(None)
    }
}

// =============================================================================
// Collection Ids
// =============================================================================

/// Whether `id` looks like `shard.realm.num`, optionally followed by a
/// `-checksum` suffix.
pub fn is_well_formed_id(id: &str) -> bool {
    let base = id.trim();
    let base = base.split_once('-').map(|(b, _)| b).unwrap_or(base);
    let parts: Vec<&str> = base.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| p.parse::<u64>().is_ok())
}

// =============================================================================
// Registry
// =============================================================================

/// Where a provisioned collection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionSource {
    /// Existing registry entry
    Registry,
    /// Found by discovery and recorded
    Discovered,
    /// Created on the ledger during this call
    Created,
}

/// Result of provisioning a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub handle: CollectionHandle,
    pub source: ProvisionSource,
    /// Id of an entry dropped because it failed the validity check
    pub stale_removed: Option<String>,
}

/// Idempotent zone → collection provisioning.
pub struct CollectionRegistry {
    store: Arc<dyn RegistryStore<CollectionRegistryDoc>>,
    writer: Arc<dyn LedgerWriter>,
    discovery: Arc<dyn CollectionDiscovery>,
    naming: CollectionNaming,
}

impl CollectionRegistry {
    pub fn new(
        store: Arc<dyn RegistryStore<CollectionRegistryDoc>>,
        writer: Arc<dyn LedgerWriter>,
        naming: CollectionNaming,
    ) -> Self {
        Self {
            store,
            writer,
            discovery: Arc::new(NoDiscovery),
            naming,
        }
    }

    /// Replace the discovery strategy.
    pub fn with_discovery(mut self, discovery: Arc<dyn CollectionDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn naming(&self) -> &CollectionNaming {
        &self.naming
    }

    /// Collection for `zone`, creating it if the registry has none.
    pub async fn lookup_or_create(&self, zone: &str) -> Result<CollectionHandle> {
        Ok(self.provision(zone).await?.handle)
    }

    /// Like `lookup_or_create`, also reporting how the handle was obtained.
    #[instrument(skip(self), fields(zone = %zone))]
    pub async fn provision(&self, zone: &str) -> Result<Provisioned> {
        let lock = self.store.lock().await?;
        let result = self.provision_locked(zone).await;
        lock.release_with(result).await
    }

    /// Collection `provision` would return for `zone`, without creating or
    /// recording anything. `None` means one would be created.
    ///
    /// Reads without the store lock; saves replace the document atomically.
    #[instrument(skip(self), fields(zone = %zone))]
    pub async fn lookup(&self, zone: &str) -> Result<Option<Provisioned>> {
        let registry = self.store.load().await?;

        if let Some(existing) = registry.collections.get(zone) {
            if is_well_formed_id(&existing.collection_id) {
                debug!(collection_id = %existing.collection_id, "Found collection in registry");
                return Ok(Some(Provisioned {
                    handle: existing.clone(),
                    source: ProvisionSource::Registry,
                    stale_removed: None,
                }));
            }
            warn!(
                collection_id = %existing.collection_id,
                "Registry entry is not a valid collection id, would replace it"
            );
        }

        Ok(self
            .discovery
            .discover(zone, &self.naming)
            .await?
            .map(|handle| Provisioned {
                handle,
                source: ProvisionSource::Discovered,
                stale_removed: None,
            }))
    }

    async fn provision_locked(&self, zone: &str) -> Result<Provisioned> {
        let mut registry = self.store.load().await?;
        let mut stale_removed = None;

        if let Some(existing) = registry.collections.get(zone) {
            if is_well_formed_id(&existing.collection_id) {
                info!(collection_id = %existing.collection_id, "Found collection in registry");
                return Ok(Provisioned {
                    handle: existing.clone(),
                    source: ProvisionSource::Registry,
                    stale_removed: None,
                });
            }
            warn!(
                collection_id = %existing.collection_id,
                "Registry entry is not a valid collection id, removing"
            );
            stale_removed = Some(existing.collection_id.clone());
            registry.collections.remove(zone);
        }

        let (handle, source) = match self.discovery.discover(zone, &self.naming).await? {
            Some(found) => {
                info!(collection_id = %found.collection_id, "Discovered existing collection");
                (found, ProvisionSource::Discovered)
            }
            None => {
                info!("No existing collection, creating one");
                (self.create(zone).await?, ProvisionSource::Created)
            }
        };

        registry.collections.insert(zone.to_string(), handle.clone());
        registry.last_updated = Utc::now();
        self.store.save(&registry).await?;

        Ok(Provisioned {
            handle,
            source,
            stale_removed,
        })
    }

    async fn create(&self, zone: &str) -> Result<CollectionHandle> {
        let operator = self.writer.operator_account().to_string();
        let spec = CollectionSpec {
            name: self.naming.name(zone),
            symbol: self.naming.symbol(zone),
            treasury_account: operator.clone(),
            supply_authority: operator.clone(),
        };

        let collection_id = self.writer.create_collection(&spec).await?;
        info!(collection_id = %collection_id, symbol = %spec.symbol, "Created zone collection");

        Ok(CollectionHandle {
            zone: zone.to_string(),
            collection_id,
            name: spec.name,
            symbol: spec.symbol,
            created_at: Utc::now(),
            created_by: operator,
        })
    }
}

impl std::fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("naming", &self.naming)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::error::Error;
    use crate::registry::store::MemoryStore;
    use assert_matches::assert_matches;

    fn registry_with(
        store: Arc<MemoryStore<CollectionRegistryDoc>>,
        ledger: Arc<InMemoryLedger>,
    ) -> CollectionRegistry {
        CollectionRegistry::new(store, ledger, CollectionNaming::default())
    }

    #[test]
    fn test_naming() {
        let naming = CollectionNaming::default();
        assert_eq!(naming.name("build"), "APEX Domain Ledger Zone - .BUILD");
        assert_eq!(naming.symbol("build"), "APEX-ZONE.BUILD");

        let custom = CollectionNaming::new("acme");
        assert_eq!(custom.symbol("app"), "ACME-ZONE.APP");
    }

    #[test]
    fn test_well_formed_ids() {
        assert!(is_well_formed_id("0.0.1234"));
        assert!(is_well_formed_id(" 0.0.1234 "));
        assert!(is_well_formed_id("0.0.1234-abcde"));
        assert!(!is_well_formed_id(""));
        assert!(!is_well_formed_id("0.0"));
        assert!(!is_well_formed_id("0.0.x"));
        assert!(!is_well_formed_id("0.0.1.2"));
    }

    #[tokio::test]
    async fn test_cold_start_creates_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let registry = registry_with(store.clone(), ledger.clone());

        let provisioned = registry.provision("build").await.unwrap();

        assert_eq!(provisioned.source, ProvisionSource::Created);
        assert_eq!(provisioned.handle.zone, "build");
        assert_eq!(provisioned.handle.symbol, "APEX-ZONE.BUILD");
        assert_eq!(provisioned.handle.created_by, "0.0.42");
        assert_eq!(ledger.collection_count(), 1);

        let doc = store.snapshot().unwrap();
        assert_eq!(doc.collections["build"], provisioned.handle);
    }

    #[tokio::test]
    async fn test_second_lookup_reuses_collection() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let registry = registry_with(store.clone(), ledger.clone());

        let first = registry.lookup_or_create("app").await.unwrap();
        let second = registry.provision("app").await.unwrap();

        assert_eq!(second.source, ProvisionSource::Registry);
        assert_eq!(second.handle.collection_id, first.collection_id);
        assert_eq!(ledger.collection_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_replaced() {
        let mut doc = CollectionRegistryDoc::default();
        doc.collections.insert(
            "app".into(),
            CollectionHandle {
                zone: "app".into(),
                collection_id: "not-an-id".into(),
                name: String::new(),
                symbol: String::new(),
                created_at: Utc::now(),
                created_by: String::new(),
            },
        );
        let store = Arc::new(MemoryStore::with_document(doc));
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let registry = registry_with(store.clone(), ledger.clone());

        let provisioned = registry.provision("app").await.unwrap();

        assert_eq!(provisioned.source, ProvisionSource::Created);
        assert_eq!(provisioned.stale_removed.as_deref(), Some("not-an-id"));
        assert!(is_well_formed_id(&provisioned.handle.collection_id));
        assert_eq!(
            store.snapshot().unwrap().collections["app"].collection_id,
            provisioned.handle.collection_id
        );
    }

    struct Fixed;

    #[async_trait]
    impl CollectionDiscovery for Fixed {
        async fn discover(
            &self,
            zone: &str,
            naming: &CollectionNaming,
        ) -> Result<Option<CollectionHandle>> {
            Ok(Some(CollectionHandle {
                zone: zone.to_string(),
                collection_id: "0.0.777".into(),
                name: naming.name(zone),
                symbol: naming.symbol(zone),
                created_at: Utc::now(),
                created_by: "0.0.1".into(),
            }))
        }
    }

    #[tokio::test]
    async fn test_discovery_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let registry = registry_with(store.clone(), ledger.clone()).with_discovery(Arc::new(Fixed));

        let provisioned = registry.provision("com").await.unwrap();
        assert_eq!(provisioned.source, ProvisionSource::Discovered);
        assert_eq!(ledger.collection_count(), 0);
        assert_eq!(store.snapshot().unwrap().collections["com"].collection_id, "0.0.777");
    }

    #[tokio::test]
    async fn test_create_failure_leaves_registry_untouched() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        ledger.fail_next_creates(1);
        let registry = registry_with(store.clone(), ledger.clone());

        let result = registry.lookup_or_create("build").await;
        assert_matches!(result, Err(Error::LedgerMutation { .. }));
        assert!(store.snapshot().is_none());

        // lock was released; a retry succeeds
        registry.lookup_or_create("build").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_provisioning_creates_one_collection() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let registry = Arc::new(registry_with(store.clone(), ledger.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.lookup_or_create("build").await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().collection_id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(ledger.collection_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_never_creates_or_records() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let registry = registry_with(store.clone(), ledger.clone());

        assert!(registry.lookup("build").await.unwrap().is_none());
        assert_eq!(ledger.collection_count(), 0);
        assert!(store.snapshot().is_none());

        let created = registry.provision("build").await.unwrap();
        let found = registry.lookup("build").await.unwrap().unwrap();
        assert_eq!(found.source, ProvisionSource::Registry);
        assert_eq!(found.handle, created.handle);
    }

    #[tokio::test]
    async fn test_lookup_reports_discovery_without_saving() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let registry = registry_with(store.clone(), ledger.clone()).with_discovery(Arc::new(Fixed));

        let found = registry.lookup("com").await.unwrap().unwrap();
        assert_eq!(found.source, ProvisionSource::Discovered);
        assert_eq!(found.handle.collection_id, "0.0.777");
        assert!(store.snapshot().is_none());
    }
}
