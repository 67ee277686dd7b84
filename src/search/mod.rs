//! Duplicate Search
//!
//! Bounded scan of a collection's minted items for one whose metadata is a
//! domain's canonical label. The mirror lists items newest first, so recent
//! mints from a retried run are found on the first page.
//!
//! The scan is best effort: it stops after `max_pages` pages, and a listing
//! that still had pages left is reported as `BoundExhausted` rather than
//! `NotFound`.
//!
//! `list_items` walks the whole collection instead, for operators checking
//! what a zone holds.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::name::DomainName;
use crate::domain::ports::{CollectionHandle, LedgerItem, LedgerQuery};
use crate::error::Result;
use crate::ingest::MintRecord;

/// Scan limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Items requested per page
    pub page_size: usize,
    /// Pages scanned before giving up
    pub max_pages: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 50,
        }
    }
}

/// Result of a duplicate scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// An item carrying the label exists
    Found { item: LedgerItem, page: usize },
    /// The listing ended without a match
    NotFound {
        pages_scanned: usize,
        items_scanned: usize,
    },
    /// The page cap was hit while more pages remained
    BoundExhausted {
        pages_scanned: usize,
        items_scanned: usize,
    },
}

impl SearchOutcome {
    /// Serial of the matching item, if any.
    pub fn serial(&self) -> Option<u64> {
        match self {
            SearchOutcome::Found { item, .. } => Some(item.serial),
            _ => None,
        }
    }
}

/// Whether item metadata encodes `label`, either raw or standard base64.
pub fn metadata_matches(metadata: &str, label: &str) -> bool {
    let metadata = metadata.trim();
    if metadata == label {
        return true;
    }
    STANDARD
        .decode(metadata)
        .map(|decoded| decoded == label.as_bytes())
        .unwrap_or(false)
}

/// Decoded label of item metadata: base64 text when it decodes to UTF-8,
/// otherwise the raw value.
pub fn metadata_label(metadata: &str) -> String {
    let metadata = metadata.trim();
    STANDARD
        .decode(metadata)
        .ok()
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .unwrap_or_else(|| metadata.to_string())
}

/// One item of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedItem {
    pub serial: u64,
    pub label: String,
    /// Metadata as reported by the mirror
    pub metadata: String,
    pub created_at: String,
}

/// Every item minted into a zone's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionListing {
    pub zone: String,
    pub collection_id: String,
    pub item_count: usize,
    pub pages: usize,
    pub items: Vec<ListedItem>,
}

/// Duplicate scanner over a ledger query port.
pub struct DuplicateSearch {
    query: Arc<dyn LedgerQuery>,
    config: SearchConfig,
}

impl DuplicateSearch {
    pub fn new(query: Arc<dyn LedgerQuery>, config: SearchConfig) -> Self {
        Self { query, config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Look for an existing mint of `record`'s domain in `collection`.
    ///
    /// An invalid domain name is an error; the caller decides how to treat it.
    #[instrument(skip(self, record, collection), fields(domain = %record.domain_name, collection_id = %collection.collection_id))]
    pub async fn find(&self, record: &MintRecord, collection: &CollectionHandle) -> Result<SearchOutcome> {
        let domain = DomainName::new(&record.domain_name)?;
        let label = domain.label();

        let mut cursor: Option<String> = None;
        let mut pages_scanned = 0;
        let mut items_scanned = 0;

        loop {
            if pages_scanned >= self.config.max_pages {
                warn!(
                    pages_scanned,
                    items_scanned, "Duplicate search hit page cap, treating as not found"
                );
                return Ok(SearchOutcome::BoundExhausted {
                    pages_scanned,
                    items_scanned,
                });
            }

            let page = self
                .query
                .items_page(&collection.collection_id, cursor.as_deref(), self.config.page_size)
                .await?;
            pages_scanned += 1;
            items_scanned += page.items.len();

            if let Some(item) = page
                .items
                .into_iter()
                .find(|item| metadata_matches(&item.metadata, label))
            {
                debug!(serial = item.serial, page = pages_scanned, "Existing mint found");
                return Ok(SearchOutcome::Found {
                    item,
                    page: pages_scanned,
                });
            }

            match page.next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    debug!(pages_scanned, items_scanned, "No existing mint");
                    return Ok(SearchOutcome::NotFound {
                        pages_scanned,
                        items_scanned,
                    });
                }
            }
        }
    }
}

impl DuplicateSearch {
    /// List every item in `collection`, following `next` links to the end.
    ///
    /// Not bounded by `max_pages`. A link that repeats the previous cursor
    /// ends the listing.
    #[instrument(skip(self, collection), fields(zone = %collection.zone, collection_id = %collection.collection_id))]
    pub async fn list_items(&self, collection: &CollectionHandle) -> Result<CollectionListing> {
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        let mut items = Vec::new();

        loop {
            let page = self
                .query
                .items_page(&collection.collection_id, cursor.as_deref(), self.config.page_size)
                .await?;
            pages += 1;
            items.extend(page.items.into_iter().map(|item| ListedItem {
                serial: item.serial,
                label: metadata_label(&item.metadata),
                metadata: item.metadata,
                created_at: item.created_at,
            }));

            match page.next {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                Some(next) if !next.is_empty() => {
                    warn!(next = %next, "Listing repeated its cursor, stopping");
                    break;
                }
                _ => break,
            }
        }

        info!(pages, items = items.len(), "Collection listed");
        Ok(CollectionListing {
            zone: collection.zone.clone(),
            collection_id: collection.collection_id.clone(),
            item_count: items.len(),
            pages,
            items,
        })
    }
}

impl std::fmt::Debug for DuplicateSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateSearch")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::domain::ports::{ItemPage, LedgerWriter};
    use crate::error::Error;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;

    fn record(domain: &str) -> MintRecord {
        MintRecord {
            domain_name: domain.to_string(),
            registration_time: Utc::now(),
            registrar_id: "REG1".into(),
            zone: "app".into(),
            full_event_json: "{}".into(),
        }
    }

    fn collection(id: &str) -> CollectionHandle {
        CollectionHandle {
            zone: "app".into(),
            collection_id: id.into(),
            name: String::new(),
            symbol: String::new(),
            created_at: Utc::now(),
            created_by: "0.0.42".into(),
        }
    }

    /// Endless listing of non-matching items.
    struct Endless;

    #[async_trait]
    impl LedgerQuery for Endless {
        async fn items_page(&self, id: &str, cursor: Option<&str>, limit: usize) -> Result<ItemPage> {
            let page: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
            let items = (0..limit as u64)
                .map(|i| LedgerItem {
                    collection_id: id.to_string(),
                    serial: page * 1000 + i,
                    metadata: STANDARD.encode("other"),
                    created_at: String::new(),
                })
                .collect();
            Ok(ItemPage {
                items,
                next: Some((page + 1).to_string()),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl LedgerQuery for Failing {
        async fn items_page(&self, _: &str, _: Option<&str>, _: usize) -> Result<ItemPage> {
            Err(Error::LedgerQuery("status 500".into()))
        }
    }

    #[test]
    fn test_metadata_matching() {
        assert!(metadata_matches("example", "example"));
        assert!(metadata_matches(" example\n", "example"));
        assert!(metadata_matches("ZXhhbXBsZQ==", "example"));
        assert!(!metadata_matches("ZXhhbXBsZQ==", "examples"));
        assert!(!metadata_matches("", "example"));
    }

    #[tokio::test]
    async fn test_finds_existing_mint_across_pages() {
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let id = ledger.create_collection(&crate::domain::ports::CollectionSpec {
            name: "n".into(),
            symbol: "s".into(),
            treasury_account: "0.0.42".into(),
            supply_authority: "0.0.42".into(),
        })
        .await
        .unwrap();

        let serial = ledger.mint_item(&id, b"example").await.unwrap();
        for i in 0..5 {
            ledger.mint_item(&id, format!("filler{i}").as_bytes()).await.unwrap();
        }

        let search = DuplicateSearch::new(ledger, SearchConfig { page_size: 2, max_pages: 50 });
        let outcome = search.find(&record("Example.App."), &collection(&id)).await.unwrap();

        assert_matches!(outcome, SearchOutcome::Found { ref item, page: 3 } if item.serial == serial);
        assert_eq!(outcome.serial(), Some(serial));
    }

    #[tokio::test]
    async fn test_unknown_collection_is_not_found() {
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let search = DuplicateSearch::new(ledger, SearchConfig::default());

        let outcome = search.find(&record("example.app"), &collection("0.0.999")).await.unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::NotFound {
                pages_scanned: 1,
                items_scanned: 0
            }
        );
    }

    #[tokio::test]
    async fn test_page_cap_is_bound_exhausted() {
        let search = DuplicateSearch::new(Arc::new(Endless), SearchConfig { page_size: 10, max_pages: 4 });

        let outcome = search.find(&record("example.app"), &collection("0.0.1")).await.unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::BoundExhausted {
                pages_scanned: 4,
                items_scanned: 40
            }
        );
    }

    #[tokio::test]
    async fn test_query_failure_is_error() {
        let search = DuplicateSearch::new(Arc::new(Failing), SearchConfig::default());
        let result = search.find(&record("example.app"), &collection("0.0.1")).await;
        assert_matches!(result, Err(Error::LedgerQuery(_)));
    }

    #[tokio::test]
    async fn test_invalid_domain_is_validation_error() {
        let search = DuplicateSearch::new(Arc::new(Failing), SearchConfig::default());
        let result = search.find(&record("-bad.app"), &collection("0.0.1")).await;
        assert_matches!(result, Err(Error::Validation(_)));
    }

    #[test]
    fn test_metadata_label() {
        assert_eq!(metadata_label("ZXhhbXBsZQ=="), "example");
        assert_eq!(metadata_label("plain label"), "plain label");
        assert_eq!(metadata_label("/w=="), "/w==");
    }

    #[tokio::test]
    async fn test_list_items_walks_past_page_cap() {
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let id = ledger
            .create_collection(&crate::domain::ports::CollectionSpec {
                name: "n".into(),
                symbol: "s".into(),
                treasury_account: "0.0.42".into(),
                supply_authority: "0.0.42".into(),
            })
            .await
            .unwrap();
        for label in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            ledger.mint_item(&id, label.as_bytes()).await.unwrap();
        }

        let search = DuplicateSearch::new(ledger, SearchConfig { page_size: 2, max_pages: 1 });
        let listing = search.list_items(&collection(&id)).await.unwrap();

        assert_eq!(listing.item_count, 5);
        assert_eq!(listing.pages, 3);
        let labels: Vec<_> = listing.items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["epsilon", "delta", "gamma", "beta", "alpha"]);
        assert_eq!(listing.items[0].serial, 5);
    }

    #[tokio::test]
    async fn test_list_items_of_unknown_collection_is_empty() {
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let search = DuplicateSearch::new(ledger, SearchConfig::default());

        let listing = search.list_items(&collection("0.0.999")).await.unwrap();
        assert_eq!(listing.item_count, 0);
        assert!(listing.items.is_empty());
    }

    #[tokio::test]
    async fn test_list_items_query_failure_is_error() {
        let search = DuplicateSearch::new(Arc::new(Failing), SearchConfig::default());
        let result = search.list_items(&collection("0.0.1")).await;
        assert_matches!(result, Err(Error::LedgerQuery(_)));
    }
}
