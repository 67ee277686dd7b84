//! Run metrics
//!
//! Prometheus counters for a minting or channel run, kept in a private
//! registry and rendered in the text exposition format on demand.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Counters for one process.
#[derive(Clone)]
pub struct RunMetrics {
    registry: Registry,
    zones: IntCounterVec,
    domains: IntCounterVec,
    search_bound_exhausted: IntCounter,
    duplicate_check_failures: IntCounter,
    messages_published: IntCounter,
}

fn register_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to register metric: {}", e))
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let zones = IntCounterVec::new(
            Opts::new("domain_ledger_zones_total", "Zones processed by outcome"),
            &["status"],
        )
        .map_err(register_err)?;
        let domains = IntCounterVec::new(
            Opts::new("domain_ledger_domains_total", "Domains processed by outcome"),
            &["status"],
        )
        .map_err(register_err)?;
        let search_bound_exhausted = IntCounter::new(
            "domain_ledger_search_bound_exhausted_total",
            "Duplicate searches that hit the page cap",
        )
        .map_err(register_err)?;
        let duplicate_check_failures = IntCounter::new(
            "domain_ledger_duplicate_check_failures_total",
            "Duplicate searches that failed and were bypassed",
        )
        .map_err(register_err)?;
        let messages_published = IntCounter::new(
            "domain_ledger_channel_messages_published_total",
            "Messages published to channels",
        )
        .map_err(register_err)?;

        registry.register(Box::new(zones.clone())).map_err(register_err)?;
        registry.register(Box::new(domains.clone())).map_err(register_err)?;
        registry
            .register(Box::new(search_bound_exhausted.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(duplicate_check_failures.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(messages_published.clone()))
            .map_err(register_err)?;

        Ok(Self {
            registry,
            zones,
            domains,
            search_bound_exhausted,
            duplicate_check_failures,
            messages_published,
        })
    }

    /// Count a zone; `status` is `provisioned` or `failed`.
    pub fn record_zone(&self, status: &str) {
        self.zones.with_label_values(&[status]).inc();
    }

    /// Count a domain outcome (`minted`, `skipped`, `failed`, ...).
    pub fn record_domain(&self, status: &str) {
        self.domains.with_label_values(&[status]).inc();
    }

    /// Count domains that share one outcome.
    pub fn record_domains(&self, status: &str, count: usize) {
        self.domains.with_label_values(&[status]).inc_by(count as u64);
    }

    pub fn record_search_bound_exhausted(&self) {
        self.search_bound_exhausted.inc();
    }

    pub fn record_duplicate_check_failure(&self) {
        self.duplicate_check_failures.inc();
    }

    pub fn record_message_published(&self) {
        self.messages_published.inc();
    }

    /// Current value of a domain outcome counter.
    pub fn domain_count(&self, status: &str) -> u64 {
        self.domains.with_label_values(&[status]).get()
    }

    /// Render all counters in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics are not UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunMetrics").finish_non_exhaustive()
    }
}
