//! Channel Registry
//!
//! Named message channels follow the same lock, load, lookup, create, save
//! cycle as zone collections, keyed by channel name. The service also wraps
//! publishing and bounded subscription.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::store::{ChannelRegistryDoc, RegistryStore};
use crate::domain::ports::{
    ChannelFeed, ChannelHandle, ChannelMessage, ChannelSpec, ChannelWriter, MessageWindow,
    PublishReceipt,
};
use crate::error::Result;

/// Default number of messages a subscription returns.
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Bounds for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Only messages at or after this time
    pub start_time: Option<DateTime<Utc>>,
    /// Stop at the first message at or after this time
    pub end_time: Option<DateTime<Utc>>,
    /// Stop after this many messages
    pub max_items: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

/// Snapshot of the channel registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub channel_count: usize,
    pub channels: Vec<ChannelHandle>,
    pub last_updated: DateTime<Utc>,
}

/// Channel provisioning plus publish/subscribe.
pub struct ChannelService {
    store: Arc<dyn RegistryStore<ChannelRegistryDoc>>,
    writer: Arc<dyn ChannelWriter>,
    feed: Arc<dyn ChannelFeed>,
}

impl ChannelService {
    pub fn new(
        store: Arc<dyn RegistryStore<ChannelRegistryDoc>>,
        writer: Arc<dyn ChannelWriter>,
        feed: Arc<dyn ChannelFeed>,
    ) -> Self {
        Self {
            store,
            writer,
            feed,
        }
    }

    /// Channel registered under `name`, creating it if absent.
    ///
    /// `admin` attaches the operator key as admin key; `restricted` attaches
    /// it as submit key so only the operator may publish.
    #[instrument(skip(self, description), fields(channel = %name))]
    pub async fn lookup_or_create(
        &self,
        name: &str,
        description: &str,
        admin: bool,
        restricted: bool,
    ) -> Result<ChannelHandle> {
        let lock = self.store.lock().await?;
        let result = self
            .lookup_or_create_locked(name, description, admin, restricted)
            .await;
        lock.release_with(result).await
    }

    async fn lookup_or_create_locked(
        &self,
        name: &str,
        description: &str,
        admin: bool,
        restricted: bool,
    ) -> Result<ChannelHandle> {
        let mut registry = self.store.load().await?;

        if let Some(existing) = registry.topics.get(name) {
            info!(channel_id = %existing.channel_id, "Found channel in registry");
            return Ok(existing.clone());
        }

        let operator_key = self.writer.operator_public_key();
        let spec = ChannelSpec {
            memo: description.to_string(),
            admin_key: if admin { operator_key.clone() } else { None },
            submit_key: if restricted { operator_key } else { None },
        };

        let channel_id = self.writer.create_channel(&spec).await?;
        info!(channel_id = %channel_id, "Created channel");

        let handle = ChannelHandle {
            name: name.to_string(),
            channel_id,
            description: spec.memo,
            created_at: Utc::now(),
            created_by: self.writer.operator_account().to_string(),
            admin_key: spec.admin_key,
            submit_key: spec.submit_key,
        };

        registry.topics.insert(name.to_string(), handle.clone());
        registry.last_updated = Utc::now();
        self.store.save(&registry).await?;

        Ok(handle)
    }

    /// Publish one message.
    #[instrument(skip(self, payload), fields(channel_id = %channel_id, bytes = payload.len()))]
    pub async fn publish(&self, channel_id: &str, payload: &[u8]) -> Result<PublishReceipt> {
        let receipt = self.writer.publish(channel_id, payload).await?;
        debug!(sequence_number = receipt.sequence_number, "Message published");
        Ok(receipt)
    }

    /// Read messages within the bounds of `options`.
    #[instrument(skip(self, options), fields(channel_id = %channel_id))]
    pub async fn subscribe(
        &self,
        channel_id: &str,
        options: SubscribeOptions,
    ) -> Result<Vec<ChannelMessage>> {
        let window = MessageWindow {
            start_time: options.start_time,
            end_time: options.end_time,
        };
        let mut stream = self.feed.messages(channel_id, &window).await?;
        let mut messages = Vec::new();

        while messages.len() < options.max_items {
            let Some(next) = stream.next().await else {
                break;
            };
            let message = next?;
            if options
                .end_time
                .is_some_and(|end| message.consensus_time >= end)
            {
                break;
            }
            messages.push(message);
        }

        debug!(received = messages.len(), "Subscription finished");
        Ok(messages)
    }

    /// Current contents of the channel registry.
    pub async fn registry_status(&self) -> Result<RegistryStatus> {
        let registry = self.store.load().await?;
        Ok(RegistryStatus {
            channel_count: registry.topics.len(),
            channels: registry.topics.into_values().collect(),
            last_updated: registry.last_updated,
        })
    }
}

impl std::fmt::Debug for ChannelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelService").finish_non_exhaustive()
    }
}
