//! Channel demo run
//!
//! Exercises the channel subsystem end to end: provision a channel with an
//! admin key and open submission, publish a handful of messages, read them
//! back, then report the registry. Only provisioning is fatal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::retry::RetryPolicy;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{ChannelHandle, ChannelMessage, EventPublisher, PublishReceipt};
use crate::error::Result;
use crate::metrics::RunMetrics;
use crate::registry::{ChannelService, RegistryStatus, SubscribeOptions};

/// Configuration for the channel demo
#[derive(Debug, Clone)]
pub struct ChannelDemoConfig {
    pub retry: RetryPolicy,

    /// Pause after each published message
    pub message_interval: Duration,

    /// How far back the read-back starts
    pub lookback: Duration,

    /// Messages read back at most
    pub read_limit: usize,
}

impl Default for ChannelDemoConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            message_interval: Duration::from_secs(2),
            lookback: Duration::from_secs(5 * 60), // 5 minutes
            read_limit: 10,
        }
    }
}

/// Result of a channel demo run
#[derive(Debug, Clone, Serialize)]
pub struct ChannelDemoReport {
    pub channel: ChannelHandle,
    pub sent: Vec<PublishReceipt>,
    pub send_failures: usize,
    pub received: Vec<ChannelMessage>,
    pub subscribe_error: Option<String>,
    pub registry: Option<RegistryStatus>,
}

/// Channel demo runner
pub struct ChannelDemo {
    config: ChannelDemoConfig,
    service: Arc<ChannelService>,
    events: Arc<dyn EventPublisher>,
    metrics: Option<RunMetrics>,
}

impl ChannelDemo {
    pub fn new(
        config: ChannelDemoConfig,
        service: Arc<ChannelService>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            service,
            events,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn demo_messages(name: &str, channel_id: &str) -> Vec<String> {
        vec![
            format!("Channel demo started for: {}", name),
            format!("Channel ID: {}", channel_id),
            "This is a test message for domain event streaming".to_string(),
            format!("Demo completed at: {}", Utc::now().to_rfc3339()),
        ]
    }

    #[instrument(skip(self), fields(channel = %name))]
    pub async fn run(&self, name: &str) -> Result<ChannelDemoReport> {
        let retry = &self.config.retry;
        let service = &self.service;
        let description = format!("Demo channel for {} domain events", name);
        let description = description.as_str();

        let channel = retry
            .run("lookup_or_create_channel", move || {
                service.lookup_or_create(name, description, true, false)
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to provision channel");
                e
            })?;
        info!(channel_id = %channel.channel_id, "Channel ready");
        self.emit(DomainEvent::channel_provisioned(name, &channel.channel_id, true))
            .await;

        let mut sent = Vec::new();
        let mut send_failures = 0;
        let channel_id = channel.channel_id.as_str();
        for (index, message) in Self::demo_messages(name, channel_id).iter().enumerate() {
            let payload = message.as_bytes();
            match retry
                .run("publish", move || service.publish(channel_id, payload))
                .await
            {
                Ok(receipt) => {
                    info!(message = index + 1, sequence_number = receipt.sequence_number, "Sent message");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_message_published();
                    }
                    self.emit(DomainEvent::message_published(channel_id, receipt.sequence_number))
                        .await;
                    sent.push(receipt);
                }
                Err(e) => {
                    warn!(message = index + 1, error = %e, "Failed to send message");
                    send_failures += 1;
                    continue;
                }
            }
            if !self.config.message_interval.is_zero() {
                tokio::time::sleep(self.config.message_interval).await;
            }
        }

        let lookback = chrono::Duration::from_std(self.config.lookback)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let options = SubscribeOptions {
            start_time: Some(Utc::now() - lookback),
            end_time: None,
            max_items: self.config.read_limit,
        };
        let (received, subscribe_error) = match retry
            .run("subscribe", move || service.subscribe(channel_id, options.clone()))
            .await
        {
            Ok(messages) => {
                info!(received = messages.len(), "Subscription completed");
                (messages, None)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read channel, continuing");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let registry = match service.registry_status().await {
            Ok(status) => {
                info!(channels = status.channel_count, "Channel registry status");
                Some(status)
            }
            Err(e) => {
                error!(error = %e, "Failed to read channel registry");
                None
            }
        };

        info!(
            sent = sent.len(),
            received = received.len(),
            "Channel demo completed"
        );

        Ok(ChannelDemoReport {
            channel,
            sent,
            send_failures,
            received,
            subscribe_error,
            registry,
        })
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish domain event");
        }
    }
}

impl std::fmt::Debug for ChannelDemo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDemo")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
