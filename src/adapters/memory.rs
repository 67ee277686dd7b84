//! In-Memory Ledger Adapter
//!
//! Implements every ledger port against process memory. Used by `--local`
//! runs and throughout the tests. Failures can be injected per operation.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::ports::{
    ChannelFeed, ChannelMessage, ChannelSpec, ChannelWriter, CollectionSpec, ItemPage,
    LedgerItem, LedgerQuery, LedgerWriter, MessageWindow, PublishReceipt,
};
use crate::error::{Error, Result};

const FIRST_ENTITY_NUM: u64 = 1000;

#[derive(Debug, Default)]
struct Injected {
    creates: AtomicU32,
    mints: AtomicU32,
    queries: AtomicU32,
}

impl Injected {
    /// Consume one injected failure if any are pending.
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Ledger kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryLedger {
    operator_account: String,
    next_entity: AtomicU64,
    collections: DashMap<String, Vec<LedgerItem>>,
    channels: DashMap<String, Vec<ChannelMessage>>,
    injected: Injected,
    /// Collection symbols whose creation always fails
    failing_symbols: RwLock<Vec<String>>,
    /// Metadata values whose mint always fails
    failing_metadata: RwLock<Vec<Vec<u8>>>,
    mint_calls: AtomicU64,
    query_calls: AtomicU64,
}

impl InMemoryLedger {
    pub fn new(operator_account: impl Into<String>) -> Self {
        Self {
            operator_account: operator_account.into(),
            next_entity: AtomicU64::new(FIRST_ENTITY_NUM),
            collections: DashMap::new(),
            channels: DashMap::new(),
            injected: Injected::default(),
            failing_symbols: RwLock::new(Vec::new()),
            failing_metadata: RwLock::new(Vec::new()),
            mint_calls: AtomicU64::new(0),
            query_calls: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        format!("0.0.{}", self.next_entity.fetch_add(1, Ordering::SeqCst))
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    /// Fail the next `n` collection creations.
    pub fn fail_next_creates(&self, n: u32) {
        self.injected.creates.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` mints.
    pub fn fail_next_mints(&self, n: u32) {
        self.injected.mints.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` item page queries.
    pub fn fail_next_queries(&self, n: u32) {
        self.injected.queries.store(n, Ordering::SeqCst);
    }

    /// Always fail creating a collection with this symbol.
    pub fn fail_collection_symbol(&self, symbol: impl Into<String>) {
        self.failing_symbols.write().push(symbol.into());
    }

    /// Always fail minting this metadata.
    pub fn fail_mint_of(&self, metadata: impl AsRef<[u8]>) {
        self.failing_metadata.write().push(metadata.as_ref().to_vec());
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Items minted into a collection, oldest first.
    pub fn items(&self, collection_id: &str) -> Vec<LedgerItem> {
        self.collections
            .get(collection_id)
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// Total `mint_item` calls, including failed ones.
    pub fn mint_calls(&self) -> u64 {
        self.mint_calls.load(Ordering::SeqCst)
    }

    /// Total `items_page` calls, including failed ones.
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerQuery for InMemoryLedger {
    async fn items_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ItemPage> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if Injected::take(&self.injected.queries) {
            return Err(Error::LedgerQuery("injected query failure".into()));
        }

        let Some(items) = self.collections.get(collection_id) else {
            return Ok(ItemPage::empty());
        };

        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| Error::LedgerQuery(format!("invalid cursor '{c}'")))?,
            None => 0,
        };

        let page: Vec<LedgerItem> = items.iter().rev().skip(offset).take(limit).cloned().collect();
        let consumed = offset + page.len();
        let next = (consumed < items.len() && !page.is_empty()).then(|| consumed.to_string());

        Ok(ItemPage { items: page, next })
    }
}

#[async_trait]
impl LedgerWriter for InMemoryLedger {
    fn operator_account(&self) -> &str {
        &self.operator_account
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<String> {
        if Injected::take(&self.injected.creates)
            || self.failing_symbols.read().contains(&spec.symbol)
        {
            return Err(Error::mutation("create_collection", "injected failure"));
        }

        let id = self.next_id();
        self.collections.insert(id.clone(), Vec::new());
        debug!(collection_id = %id, symbol = %spec.symbol, "In-memory collection created");
        Ok(id)
    }

    async fn mint_item(&self, collection_id: &str, metadata: &[u8]) -> Result<u64> {
        self.mint_calls.fetch_add(1, Ordering::SeqCst);
        if Injected::take(&self.injected.mints)
            || self.failing_metadata.read().iter().any(|m| m == metadata)
        {
            return Err(Error::mutation("mint_item", "injected failure"));
        }

        let mut items = self
            .collections
            .get_mut(collection_id)
            .ok_or_else(|| Error::mutation("mint_item", format!("unknown collection {collection_id}")))?;

        let serial = items.len() as u64 + 1;
        let now = Utc::now();
        items.push(LedgerItem {
            collection_id: collection_id.to_string(),
            serial,
            metadata: STANDARD.encode(metadata),
            created_at: format!("{}.{:09}", now.timestamp(), now.timestamp_subsec_nanos()),
        });
        Ok(serial)
    }
}

#[async_trait]
impl ChannelWriter for InMemoryLedger {
    fn operator_account(&self) -> &str {
        &self.operator_account
    }

    fn operator_public_key(&self) -> Option<String> {
        Some(format!("in-memory-key-{}", self.operator_account))
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<String> {
        let id = self.next_id();
        self.channels.insert(id.clone(), Vec::new());
        debug!(channel_id = %id, memo = %spec.memo, "In-memory channel created");
        Ok(id)
    }

    async fn publish(&self, channel_id: &str, payload: &[u8]) -> Result<PublishReceipt> {
        let mut messages = self
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| Error::mutation("publish", format!("unknown channel {channel_id}")))?;

        let message = ChannelMessage {
            channel_id: channel_id.to_string(),
            sequence_number: messages.len() as u64 + 1,
            consensus_time: Utc::now(),
            payload: payload.to_vec(),
        };
        let receipt = PublishReceipt {
            channel_id: channel_id.to_string(),
            sequence_number: message.sequence_number,
            consensus_time: message.consensus_time,
        };
        messages.push(message);
        Ok(receipt)
    }
}

#[async_trait]
impl ChannelFeed for InMemoryLedger {
    async fn messages(
        &self,
        channel_id: &str,
        window: &MessageWindow,
    ) -> Result<BoxStream<'static, Result<ChannelMessage>>> {
        let messages: Vec<ChannelMessage> = self
            .channels
            .get(channel_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| window.start_time.map_or(true, |start| m.consensus_time >= start))
                    .filter(|m| window.end_time.map_or(true, |end| m.consensus_time < end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(stream::iter(messages.into_iter().map(Ok)).boxed())
    }
}
