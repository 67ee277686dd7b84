//! Audit event sinks
//!
//! `EventPublisher` implementations for the minting and channel runs: a
//! tracing sink for the CLI, a collector for tests, and a fan-out wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Whether an event records something an operator should look at.
fn needs_attention(event: &DomainEvent) -> bool {
    matches!(
        event,
        DomainEvent::ZoneFailed { .. }
            | DomainEvent::MintFailed { .. }
            | DomainEvent::DuplicateCheckFailed { .. }
            | DomainEvent::SearchBoundExhausted { .. }
            | DomainEvent::StaleCollectionRemoved { .. }
    )
}

// =============================================================================
// Tracing Sink
// =============================================================================

/// Writes events to the tracing output.
///
/// Failures and near-misses always go out at warn. Routine events go out at
/// info when `verbose`, otherwise at debug.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    verbose: bool,
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routine events at info level.
    pub fn info_level() -> Self {
        Self { verbose: true }
    }

    /// Routine events at debug level.
    pub fn debug_level() -> Self {
        Self { verbose: false }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let zone = event.zone().unwrap_or("-");
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if needs_attention(&event) {
            warn!(event_type, zone, event = %payload, "Ledger event");
        } else if self.verbose {
            info!(event_type, zone, event = %payload, "Ledger event");
        } else {
            debug!(event_type, zone, event = %payload, "Ledger event");
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Collector
// =============================================================================

/// Keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything collected so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Events tagged with `zone`.
    pub fn events_for_zone(&self, zone: &str) -> Vec<DomainEvent> {
        self.filtered(|e| e.zone() == Some(zone))
    }

    /// Events whose type tag is `event_type` (e.g. `"DomainMinted"`).
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.filtered(|e| e.event_type() == event_type)
    }

    /// Domains minted so far, in mint order.
    pub fn minted_domains(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DomainEvent::DomainMinted { domain, .. } => Some(domain.clone()),
                _ => None,
            })
            .collect()
    }

    fn filtered(&self, keep: impl Fn(&DomainEvent) -> bool) -> Vec<DomainEvent> {
        self.events.lock().iter().filter(|e| keep(e)).cloned().collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.lock().extend(events);
        Ok(())
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Delivers every event to each registered sink.
///
/// A failing sink does not stop delivery to the others; the first error is
/// returned once all sinks have been tried.
#[derive(Default)]
pub struct CompositeEventPublisher {
    sinks: Vec<Arc<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher<P: EventPublisher + 'static>(self, publisher: P) -> Self {
        self.with_shared(Arc::new(publisher))
    }

    /// Add a sink the caller keeps a handle to, e.g. a collector.
    pub fn with_shared(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.sinks.push(publisher);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish_all(events.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    struct Rejecting;

    #[async_trait]
    impl EventPublisher for Rejecting {
        async fn publish(&self, _: DomainEvent) -> Result<()> {
            Err(Error::Internal("sink closed".into()))
        }

        async fn publish_all(&self, _: Vec<DomainEvent>) -> Result<()> {
            Err(Error::Internal("sink closed".into()))
        }
    }

    #[test]
    fn test_attention_classification() {
        assert!(needs_attention(&DomainEvent::zone_failed("app", 2, "down")));
        assert!(needs_attention(&DomainEvent::search_bound_exhausted("a.app", "app", 50)));
        assert!(!needs_attention(&DomainEvent::domain_minted("a.app", "app", "0.0.5", 1)));
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_every_kind() {
        let sink = LoggingEventPublisher::new();
        sink.publish_all(vec![
            DomainEvent::domain_minted("example.app", "app", "0.0.5", 1),
            DomainEvent::mint_failed("bad.app", "app", "rejected"),
        ])
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_collector_queries() {
        let collector = InMemoryEventCollector::new();
        assert!(collector.is_empty());

        collector
            .publish(DomainEvent::domain_minted("one.app", "app", "0.0.5", 1))
            .await
            .unwrap();
        collector
            .publish_all(vec![
                DomainEvent::domain_skipped("two.app", "app", 2),
                DomainEvent::domain_minted("x.build", "build", "0.0.6", 1),
                DomainEvent::message_published("0.0.9", 1),
            ])
            .await
            .unwrap();

        assert_eq!(collector.len(), 4);
        assert_eq!(collector.events_of_type("DomainMinted").len(), 2);
        assert_eq!(collector.events_for_zone("app").len(), 2);
        assert_eq!(collector.minted_domains(), vec!["one.app", "x.build"]);
    }

    #[tokio::test]
    async fn test_fan_out_survives_failing_sink() {
        let collector = Arc::new(InMemoryEventCollector::new());
        let composite = CompositeEventPublisher::new()
            .with_publisher(Rejecting)
            .with_shared(collector.clone());
        assert_eq!(composite.sink_count(), 2);

        let result = composite
            .publish(DomainEvent::zone_failed("app", 3, "gateway down"))
            .await;

        assert_matches!(result, Err(Error::Internal(_)));
        assert_eq!(collector.events_of_type("ZoneFailed").len(), 1);
    }
}
