//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the abstractions the minting pipeline depends on.
//! Infrastructure adapters implement these traits: the mirror node REST
//! client for reads, the ledger gateway for signed transactions, and an
//! in-memory ledger for local runs and tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  LedgerQuery │ LedgerWriter │ ChannelWriter │ Feed  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  MirrorNodeClient │ LedgerGatewayClient │ InMemory   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// A per-zone NFT collection, created once and reused on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHandle {
    /// The zone this collection mints for (e.g. "build", "com")
    pub zone: String,
    /// Ledger token id of the collection
    #[serde(rename = "token_id")]
    pub collection_id: String,
    /// Human readable collection name
    #[serde(rename = "token_name")]
    pub name: String,
    /// Collection symbol
    #[serde(rename = "token_symbol")]
    pub symbol: String,
    /// When the collection was created
    pub created_at: DateTime<Utc>,
    /// Account that created the collection
    pub created_by: String,
}

/// A named message channel, created once and reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandle {
    pub name: String,
    #[serde(rename = "topic_id")]
    pub channel_id: String,
    #[serde(rename = "memo")]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_key: Option<String>,
}

/// An item previously minted into a collection, as reported by the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerItem {
    /// Collection the item belongs to
    #[serde(rename = "token_id")]
    pub collection_id: String,
    /// Serial number within the collection
    #[serde(rename = "serial_number")]
    pub serial: u64,
    /// Metadata, base64 encoded by the mirror or raw
    #[serde(default)]
    pub metadata: String,
    /// Consensus timestamp of the mint
    #[serde(rename = "created_timestamp", default)]
    pub created_at: String,
}

/// One page of collection items plus the link to the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPage {
    pub items: Vec<LedgerItem>,
    /// Relative link (path and query) to the following page
    pub next: Option<String>,
}

impl ItemPage {
    /// An empty, final page.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Parameters for creating a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub symbol: String,
    pub treasury_account: String,
    pub supply_authority: String,
}

/// Parameters for creating a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSpec {
    pub memo: String,
    pub admin_key: Option<String>,
    pub submit_key: Option<String>,
}

/// Receipt for a message published to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub channel_id: String,
    pub sequence_number: u64,
    pub consensus_time: DateTime<Utc>,
}

/// A message read back from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel_id: String,
    pub sequence_number: u64,
    pub consensus_time: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl ChannelMessage {
    /// Payload as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Time window for reading channel messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageWindow {
    /// Inclusive lower bound
    pub start_time: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub end_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Ledger Query Port
// =============================================================================

/// Read path over previously committed ledger items (the mirror API).
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Fetch one page of a collection's items, newest first.
    ///
    /// `cursor` is the `next` link of the previous page, `None` for the first
    /// page. A collection unknown to the mirror yields an empty page.
    async fn items_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ItemPage>;
}

// =============================================================================
// Ledger Mutation Ports
// =============================================================================

/// Write path for collections and mints.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Account id that signs transactions (treasury and supply authority).
    fn operator_account(&self) -> &str;

    /// Create a new NFT collection, returning its id.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<String>;

    /// Mint one item into a collection, returning the new serial.
    async fn mint_item(&self, collection_id: &str, metadata: &[u8]) -> Result<u64>;
}

/// Write path for channels.
#[async_trait]
pub trait ChannelWriter: Send + Sync {
    /// Account id that signs transactions.
    fn operator_account(&self) -> &str;

    /// Public key attached to channels that ask for admin or submit control.
    fn operator_public_key(&self) -> Option<String>;

    /// Create a channel, returning its id.
    async fn create_channel(&self, spec: &ChannelSpec) -> Result<String>;

    /// Publish a message to a channel.
    async fn publish(&self, channel_id: &str, payload: &[u8]) -> Result<PublishReceipt>;
}

/// Read path for channel messages.
#[async_trait]
pub trait ChannelFeed: Send + Sync {
    /// Messages in consensus order within the window.
    ///
    /// The stream may be unbounded; callers decide when to stop reading.
    async fn messages(
        &self,
        channel_id: &str,
        window: &MessageWindow,
    ) -> Result<BoxStream<'static, Result<ChannelMessage>>>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}
