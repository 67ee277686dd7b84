//! Minter Engine
//!
//! Runs one event log through the minting pipeline:
//!
//! ```text
//! Start ─▶ ReadLog ─▶ ParseFilter ─▶ GroupByZone ─▶ for each zone:
//!     ProvisionCollection ─▶ for each domain:
//!         CheckDuplicate ─▶ Mint | Skip
//! ─▶ Done
//! ```
//!
//! # Failure Semantics
//!
//! 1. Reading the log is the only fatal step
//! 2. A zone whose collection cannot be provisioned marks all its domains
//!    `ZoneFailed`; later zones still run
//! 3. A failed duplicate check is logged and the mint goes ahead
//! 4. A failed mint marks that domain `Failed`; later domains still run
//! 5. A mint attempt that failed may still have been committed, so every
//!    retry of a mint searches the collection again first
//!
//! A dry run only looks collections up. A zone without one is reported as
//! `would_create` and its domains as `DryRun`; nothing is written.
//!
//! Zones and domains are processed strictly in order. Each external call
//! goes through the shared `RetryPolicy`.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::retry::RetryPolicy;
use crate::domain::events::DomainEvent;
use crate::domain::name::DomainName;
use crate::domain::ports::{CollectionHandle, EventPublisher, LedgerWriter};
use crate::error::Result;
use crate::ingest::{group_by_zone, parse_lines, read_lines, MintRecord, ParseSummary};
use crate::metrics::RunMetrics;
use crate::registry::{CollectionRegistry, ProvisionSource, Provisioned};
use crate::search::{DuplicateSearch, SearchOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the minter
#[derive(Debug, Clone, Default)]
pub struct MinterConfig {
    /// Retry envelope for provisioning, search and mint
    pub retry: RetryPolicy,

    /// Dry-run mode (look up and search, never create or mint)
    pub dry_run: bool,
}

// =============================================================================
// Run State Machine
// =============================================================================

/// States in a minting run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Initial state
    Start,
    /// Reading the event log
    ReadLog,
    /// Decoding and filtering lines
    ParseFilter,
    /// Partitioning records by zone
    GroupByZone,
    /// Looking up or creating a zone's collection
    ProvisionCollection,
    /// Searching for duplicates and minting a zone's domains
    MintDomains,
    /// Run finished (individual items may still have failed)
    Done,
    /// Run aborted
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Start => write!(f, "Start"),
            RunState::ReadLog => write!(f, "ReadLog"),
            RunState::ParseFilter => write!(f, "ParseFilter"),
            RunState::GroupByZone => write!(f, "GroupByZone"),
            RunState::ProvisionCollection => write!(f, "ProvisionCollection"),
            RunState::MintDomains => write!(f, "MintDomains"),
            RunState::Done => write!(f, "Done"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

/// A step in the run
#[derive(Debug, Clone, Serialize)]
pub struct RunStep {
    pub state: RunState,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub duration_ms: Option<u64>,
}

/// What happened to one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DomainStatus {
    /// Minted during this run
    Minted { serial: u64 },
    /// Already present in the collection
    Skipped { serial: u64 },
    /// Would have been minted (dry run)
    DryRun,
    /// Mint failed
    Failed { reason: String },
    /// The zone's collection could not be provisioned
    ZoneFailed { reason: String },
}

impl DomainStatus {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Minted { .. } => "minted",
            DomainStatus::Skipped { .. } => "skipped",
            DomainStatus::DryRun => "dry_run",
            DomainStatus::Failed { .. } => "failed",
            DomainStatus::ZoneFailed { .. } => "zone_failed",
        }
    }
}

/// Outcome for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainOutcome {
    pub domain: String,
    pub zone: String,
    #[serde(flatten)]
    pub status: DomainStatus,
}

/// Outcome for one zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneOutcome {
    pub zone: String,
    pub domain_count: usize,
    pub collection_id: Option<String>,
    /// Collection was created during this run
    pub created: bool,
    /// Dry run found no collection; a real run would create one
    pub would_create: bool,
    pub error: Option<String>,
}

/// Result of a minting run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Log file (or other source) that was processed
    pub source: String,

    /// Final state
    pub state: RunState,

    /// Dry-run mode
    pub dry_run: bool,

    /// When the run started
    pub start_time: DateTime<Utc>,

    /// When the run ended
    pub end_time: DateTime<Utc>,

    /// Total duration
    pub duration: Duration,

    /// Line counts from parsing
    pub parse: ParseSummary,

    /// Per-zone outcomes, in processing order
    pub zones: Vec<ZoneOutcome>,

    /// Per-domain outcomes, in processing order
    pub domains: Vec<DomainOutcome>,

    pub zones_processed: usize,
    pub zones_failed: usize,
    pub minted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub search_bound_exhausted: usize,
    pub duplicate_check_failures: usize,

    /// Error if the run aborted
    pub error: Option<String>,

    /// Step-by-step log
    pub steps: Vec<RunStep>,
}

impl RunReport {
    fn new(source: &str, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            source: source.to_string(),
            state: RunState::Start,
            dry_run,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            parse: ParseSummary::default(),
            zones: Vec::new(),
            domains: Vec::new(),
            zones_processed: 0,
            zones_failed: 0,
            minted: 0,
            skipped: 0,
            failed: 0,
            search_bound_exhausted: 0,
            duplicate_check_failures: 0,
            error: None,
            steps: vec![],
        }
    }

    /// Whether every domain was minted, skipped or dry-run.
    pub fn is_clean(&self) -> bool {
        self.state == RunState::Done && self.failed == 0
    }

    /// Outcome recorded for a domain.
    pub fn outcome(&self, domain: &str) -> Option<&DomainOutcome> {
        self.domains.iter().find(|o| o.domain == domain)
    }

    /// Record a state transition
    fn transition(&mut self, state: RunState, message: &str) {
        let now = Utc::now();
        let last_step_time = self
            .steps
            .last()
            .map(|s| s.timestamp)
            .unwrap_or(self.start_time);
        let duration_ms = (now - last_step_time).num_milliseconds().max(0) as u64;

        self.state = state;
        self.steps.push(RunStep {
            state,
            timestamp: now,
            message: message.to_string(),
            duration_ms: Some(duration_ms),
        });

        self.end_time = now;
        self.duration = (now - self.start_time).to_std().unwrap_or(Duration::ZERO);
    }

    /// Mark as aborted
    fn fail(&mut self, error: &str) {
        self.transition(RunState::Failed, error);
        self.error = Some(error.to_string());
    }

    fn record(&mut self, record: &MintRecord, status: DomainStatus) {
        match &status {
            DomainStatus::Minted { .. } => self.minted += 1,
            DomainStatus::Skipped { .. } => self.skipped += 1,
            DomainStatus::DryRun => {}
            DomainStatus::Failed { .. } | DomainStatus::ZoneFailed { .. } => self.failed += 1,
        }
        self.domains.push(DomainOutcome {
            domain: record.domain_name.clone(),
            zone: record.zone.clone(),
            status,
        });
    }
}

// =============================================================================
// Minter
// =============================================================================

/// Mints one item per domain into per-zone collections
pub struct Minter {
    config: MinterConfig,
    collections: Arc<CollectionRegistry>,
    search: DuplicateSearch,
    writer: Arc<dyn LedgerWriter>,
    events: Arc<dyn EventPublisher>,
    metrics: Option<RunMetrics>,
}

impl Minter {
    /// Create a new minter
    pub fn new(
        config: MinterConfig,
        collections: Arc<CollectionRegistry>,
        search: DuplicateSearch,
        writer: Arc<dyn LedgerWriter>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            collections,
            search,
            writer,
            events,
            metrics: None,
        }
    }

    /// Count outcomes into `metrics`.
    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &MinterConfig {
        &self.config
    }

    /// Process an event log file.
    ///
    /// Only a failure to read the file is returned as an error; everything
    /// after that is reported per zone and per domain.
    #[instrument(skip_all, fields(path = %path.display(), dry_run = self.config.dry_run))]
    pub async fn run(&self, path: &Path) -> Result<RunReport> {
        let mut report = RunReport::new(&path.display().to_string(), self.config.dry_run);

        report.transition(RunState::ReadLog, "Reading event log");
        let lines = match read_lines(path).await {
            Ok(lines) => lines,
            Err(e) => {
                error!(error = %e, "Failed to read event log");
                report.fail(&format!("Failed to read event log: {}", e));
                return Err(e);
            }
        };

        Ok(self.process(report, lines).await)
    }

    /// Process already-read log lines.
    pub async fn run_lines<I, S>(&self, source: &str, lines: I) -> RunReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let report = RunReport::new(source, self.config.dry_run);
        self.process(report, lines).await
    }

    async fn process<I, S>(&self, mut report: RunReport, lines: I) -> RunReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        report.transition(RunState::ParseFilter, "Parsing registry events");
        let parsed = parse_lines(lines);
        report.parse = parsed.summary;

        report.transition(RunState::GroupByZone, "Grouping records by zone");
        let groups = group_by_zone(parsed.records);
        info!(
            records = report.parse.accepted,
            zones = groups.len(),
            "Starting minting run"
        );

        for (zone, records) in groups {
            self.process_zone(&mut report, &zone, &records).await;
        }

        let summary = format!(
            "Processed {} zones: {} minted, {} skipped, {} failed",
            report.zones_processed, report.minted, report.skipped, report.failed
        );
        info!(
            zones = report.zones_processed,
            minted = report.minted,
            skipped = report.skipped,
            failed = report.failed,
            "Minting run complete"
        );
        report.transition(RunState::Done, &summary);
        report
    }

    #[instrument(skip_all, fields(zone = %zone, domains = records.len()))]
    async fn process_zone(&self, report: &mut RunReport, zone: &str, records: &[MintRecord]) {
        report.zones_processed += 1;
        report.transition(
            RunState::ProvisionCollection,
            &format!("Provisioning collection for zone '{}'", zone),
        );

        let provisioned = match self.acquire_collection(zone).await {
            Ok(Some(provisioned)) => provisioned,
            Ok(None) => {
                info!("[DRY-RUN] Would create collection for zone");
                if let Some(metrics) = &self.metrics {
                    metrics.record_zone("dry_run");
                }
                report.zones.push(ZoneOutcome {
                    zone: zone.to_string(),
                    domain_count: records.len(),
                    collection_id: None,
                    created: false,
                    would_create: true,
                    error: None,
                });
                for record in records {
                    let status = self.dry_run_status(record).await;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_domain(status.as_str());
                    }
                    report.record(record, status);
                }
                return;
            }
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, "Zone provisioning failed, skipping its domains");
                report.zones_failed += 1;
                report.zones.push(ZoneOutcome {
                    zone: zone.to_string(),
                    domain_count: records.len(),
                    collection_id: None,
                    created: false,
                    would_create: false,
                    error: Some(reason.clone()),
                });
                for record in records {
                    report.record(record, DomainStatus::ZoneFailed { reason: reason.clone() });
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_zone("failed");
                    metrics.record_domains("zone_failed", records.len());
                }
                self.emit(DomainEvent::zone_failed(zone, records.len(), &reason))
                    .await;
                return;
            }
        };

        if let Some(stale) = &provisioned.stale_removed {
            self.emit(DomainEvent::stale_collection_removed(zone, stale)).await;
        }
        let created = provisioned.source == ProvisionSource::Created;
        let handle = provisioned.handle;
        self.emit(DomainEvent::collection_provisioned(
            zone,
            &handle.collection_id,
            created,
        ))
        .await;
        if let Some(metrics) = &self.metrics {
            metrics.record_zone("provisioned");
        }
        report.zones.push(ZoneOutcome {
            zone: zone.to_string(),
            domain_count: records.len(),
            collection_id: Some(handle.collection_id.clone()),
            created,
            would_create: false,
            error: None,
        });

        report.transition(
            RunState::MintDomains,
            &format!("Minting {} domains into {}", records.len(), handle.collection_id),
        );
        for record in records {
            let status = self.process_domain(report, record, &handle).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_domain(status.as_str());
            }
            report.record(record, status);
        }
    }

    /// Provision the zone's collection; in a dry run only look it up.
    async fn acquire_collection(&self, zone: &str) -> Result<Option<Provisioned>> {
        let collections = &self.collections;
        let retry = &self.config.retry;
        if self.config.dry_run {
            retry
                .run("lookup_collection", move || collections.lookup(zone))
                .await
        } else {
            retry
                .run("provision_collection", move || collections.provision(zone))
                .await
                .map(Some)
        }
    }

    /// Dry-run status of a domain whose collection does not exist yet.
    async fn dry_run_status(&self, record: &MintRecord) -> DomainStatus {
        match DomainName::new(&record.domain_name) {
            Ok(domain) => {
                info!(domain = %record.domain_name, label = %domain.label(), "[DRY-RUN] Would mint domain");
                DomainStatus::DryRun
            }
            Err(e) => {
                let reason = format!("Invalid domain name: {}", e);
                warn!(domain = %record.domain_name, reason = %reason, "Cannot mint domain");
                self.emit(DomainEvent::mint_failed(&record.domain_name, &record.zone, &reason))
                    .await;
                DomainStatus::Failed { reason }
            }
        }
    }

    #[instrument(skip_all, fields(domain = %record.domain_name))]
    async fn process_domain(
        &self,
        report: &mut RunReport,
        record: &MintRecord,
        handle: &CollectionHandle,
    ) -> DomainStatus {
        let zone = record.zone.as_str();
        let search = &self.search;

        match self
            .config
            .retry
            .run("duplicate_search", move || search.find(record, handle))
            .await
        {
            Ok(SearchOutcome::Found { item, .. }) => {
                info!(serial = item.serial, "Domain already minted, skipping");
                self.emit(DomainEvent::domain_skipped(&record.domain_name, zone, item.serial))
                    .await;
                return DomainStatus::Skipped { serial: item.serial };
            }
            Ok(SearchOutcome::NotFound { .. }) => {}
            Ok(SearchOutcome::BoundExhausted { pages_scanned, .. }) => {
                report.search_bound_exhausted += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_search_bound_exhausted();
                }
                self.emit(DomainEvent::search_bound_exhausted(
                    &record.domain_name,
                    zone,
                    pages_scanned,
                ))
                .await;
            }
            Err(e) => {
                warn!(error = %e, "Duplicate check failed, proceeding with mint");
                report.duplicate_check_failures += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_duplicate_check_failure();
                }
                self.emit(DomainEvent::duplicate_check_failed(
                    &record.domain_name,
                    zone,
                    &e.to_string(),
                ))
                .await;
            }
        }

        let domain = match DomainName::new(&record.domain_name) {
            Ok(domain) => domain,
            Err(e) => {
                let reason = format!("Invalid domain name: {}", e);
                warn!(reason = %reason, "Cannot mint domain");
                self.emit(DomainEvent::mint_failed(&record.domain_name, zone, &reason))
                    .await;
                return DomainStatus::Failed { reason };
            }
        };

        if self.config.dry_run {
            info!(label = %domain.label(), "[DRY-RUN] Would mint domain");
            return DomainStatus::DryRun;
        }

        let writer = &self.writer;
        let collection_id = handle.collection_id.as_str();
        let metadata = domain.label().as_bytes();
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        match self
            .config
            .retry
            .run("mint", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    if let Ok(SearchOutcome::Found { item, .. }) = search.find(record, handle).await {
                        warn!(serial = item.serial, "Earlier mint attempt was committed");
                        return Ok(item.serial);
                    }
                }
                writer.mint_item(collection_id, metadata).await
            })
            .await
        {
            Ok(serial) => {
                info!(serial, collection_id, "Domain minted");
                self.emit(DomainEvent::domain_minted(
                    &record.domain_name,
                    zone,
                    collection_id,
                    serial,
                ))
                .await;
                DomainStatus::Minted { serial }
            }
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, "Mint failed");
                self.emit(DomainEvent::mint_failed(&record.domain_name, zone, &reason))
                    .await;
                DomainStatus::Failed { reason }
            }
        }
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish domain event");
        }
    }
}

impl std::fmt::Debug for Minter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Minter")
            .field("config", &self.config)
            .field("search", &self.search)
            .finish_non_exhaustive()
    }
}
