//! Domain Ledger CLI
//!
//! Mints registered domains into per-zone ledger collections, lists what a
//! zone's collection holds, and runs the channel demo.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Domain Ledger                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Ingest    │───▶│  Registries  │───▶│    Minter    │       │
//! │  │ (parse/group)│    │ (lock/store) │    │ (search/mint)│       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Logs go to stderr; the run result is printed to stdout as JSON.
//!
//! With `--local` both the ledger and the registries live in memory, so a
//! local run never reads or writes registry files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use domain_ledger::adapters::{
    CompositeEventPublisher, GatewayConfig, InMemoryLedger, LedgerGatewayClient,
    LoggingEventPublisher, MirrorConfig, MirrorNodeClient,
};
use domain_ledger::domain::ports::{ChannelFeed, ChannelWriter, LedgerQuery, LedgerWriter};
use domain_ledger::error::{Error, Result};
use domain_ledger::metrics::RunMetrics;
use domain_ledger::orchestrator::{ChannelDemo, ChannelDemoConfig, Minter, MinterConfig};
use domain_ledger::registry::{
    ChannelService, CollectionNaming, CollectionRegistry, JsonFileStore, MemoryStore,
    RegistryDocument, RegistryStore, DEFAULT_REGISTRY_PREFIX, TOPIC_REGISTRY_FILE,
    ZONE_REGISTRY_FILE,
};
use domain_ledger::search::{DuplicateSearch, SearchConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Domain Ledger - mint registered domains into per-zone ledger collections
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Mirror node REST base URL
    #[arg(
        long,
        env = "MIRROR_URL",
        global = true,
        default_value = "https://testnet.mirrornode.hedera.com/api/v1"
    )]
    mirror_url: String,

    /// Ledger signing gateway base URL
    #[arg(
        long,
        env = "GATEWAY_URL",
        global = true,
        default_value = "http://localhost:8080/api/v1"
    )]
    gateway_url: String,

    /// Operator account id
    #[arg(long, env = "OPERATOR_ACCOUNT_ID", global = true)]
    operator_account: Option<String>,

    /// Operator private key
    #[arg(long, env = "OPERATOR_KEY", global = true, hide_env_values = true)]
    operator_key: Option<String>,

    /// Operator public key, attached to channels as admin key
    #[arg(long, env = "OPERATOR_PUBLIC_KEY", global = true)]
    operator_public_key: Option<String>,

    /// Prefix used in collection names and symbols
    #[arg(long, env = "REGISTRY_PREFIX", global = true, default_value = DEFAULT_REGISTRY_PREFIX)]
    registry_prefix: String,

    /// Zone collection registry file
    #[arg(long, env = "ZONE_REGISTRY", global = true, default_value = ZONE_REGISTRY_FILE)]
    zone_registry: PathBuf,

    /// Channel registry file
    #[arg(long, env = "TOPIC_REGISTRY", global = true, default_value = TOPIC_REGISTRY_FILE)]
    topic_registry: PathBuf,

    /// Pages scanned per duplicate search
    #[arg(
        long,
        env = "MAX_SEARCH_PAGES",
        global = true,
        default_value = "50",
        value_parser = parse_positive
    )]
    max_search_pages: usize,

    /// Items per mirror page
    #[arg(
        long,
        env = "SEARCH_PAGE_SIZE",
        global = true,
        default_value = "100",
        value_parser = parse_positive
    )]
    search_page_size: usize,

    /// Enable dry-run mode (look up and search, never create or mint)
    #[arg(long, env = "DRY_RUN", global = true)]
    dry_run: bool,

    /// Use an in-memory ledger and registries instead of the mirror, gateway
    /// and registry files
    #[arg(long, env = "LOCAL_LEDGER", global = true)]
    local: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Print run counters in Prometheus text format after the run
    #[arg(long, env = "PRINT_METRICS", global = true)]
    print_metrics: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mint every domain in an event log
    MintDomains {
        /// Event log file
        file: PathBuf,
    },
    /// List every item minted into a zone's collection
    ListItems {
        /// Zone whose collection to list
        zone: String,
    },
    /// Create or reuse a channel, publish demo messages and read them back
    ChannelDemo {
        /// Channel name
        name: String,
    },
}

// =============================================================================
// Ledger Wiring
// =============================================================================

struct Ledger {
    query: Arc<dyn LedgerQuery>,
    writer: Arc<dyn LedgerWriter>,
    channel_writer: Arc<dyn ChannelWriter>,
    feed: Arc<dyn ChannelFeed>,
}

impl Ledger {
    fn from_args(args: &Args) -> Result<Self> {
        if args.local {
            info!("Using in-memory ledger");
            let ledger = Arc::new(InMemoryLedger::new(
                args.operator_account.clone().unwrap_or_else(|| "0.0.2".to_string()),
            ));
            return Ok(Self {
                query: ledger.clone(),
                writer: ledger.clone(),
                channel_writer: ledger.clone(),
                feed: ledger,
            });
        }

        let mirror = Arc::new(MirrorNodeClient::new(MirrorConfig {
            base_url: args.mirror_url.clone(),
            ..Default::default()
        })?);

        let (Some(operator_account), Some(operator_key)) =
            (args.operator_account.clone(), args.operator_key.clone())
        else {
            return Err(Error::Config(
                "OPERATOR_ACCOUNT_ID and OPERATOR_KEY must be set (or use --local)".into(),
            ));
        };
        let gateway = Arc::new(LedgerGatewayClient::new(GatewayConfig {
            base_url: args.gateway_url.clone(),
            operator_account,
            operator_key,
            operator_public_key: args.operator_public_key.clone(),
            ..Default::default()
        })?);

        Ok(Self {
            query: mirror.clone(),
            writer: gateway.clone(),
            channel_writer: gateway,
            feed: mirror,
        })
    }
}

fn parse_positive(value: &str) -> std::result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Registry store for `path`; in memory for local runs.
fn registry_store<D: RegistryDocument>(local: bool, path: &Path) -> Arc<dyn RegistryStore<D>> {
    if local {
        Arc::new(MemoryStore::<D>::new())
    } else {
        Arc::new(JsonFileStore::<D>::new(path))
    }
}

fn collection_registry(args: &Args, ledger: &Ledger) -> Arc<CollectionRegistry> {
    Arc::new(CollectionRegistry::new(
        registry_store(args.local, &args.zone_registry),
        ledger.writer.clone(),
        CollectionNaming::new(args.registry_prefix.clone()),
    ))
}

fn duplicate_search(args: &Args, ledger: &Ledger) -> DuplicateSearch {
    DuplicateSearch::new(
        ledger.query.clone(),
        SearchConfig {
            page_size: args.search_page_size,
            max_pages: args.max_search_pages,
        },
    )
}

fn minter(args: &Args, ledger: &Ledger, events: Arc<CompositeEventPublisher>) -> Minter {
    Minter::new(
        MinterConfig {
            dry_run: args.dry_run,
            ..Default::default()
        },
        collection_registry(args, ledger),
        duplicate_search(args, ledger),
        ledger.writer.clone(),
        events,
    )
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Domain Ledger");
    info!("  Mirror URL: {}", args.mirror_url);
    info!("  Local ledger: {}", args.local);
    info!("  Dry-run mode: {}", args.dry_run);

    let metrics = RunMetrics::new()?;
    let events = Arc::new(
        CompositeEventPublisher::new().with_publisher(LoggingEventPublisher::info_level()),
    );

    match &args.command {
        Command::MintDomains { file } => {
            if !file.is_file() {
                error!(path = %file.display(), "Input file not found");
                return Err(Error::Config(format!(
                    "input file not found: {}",
                    file.display()
                )));
            }

            let ledger = Ledger::from_args(&args)?;
            let minter = minter(&args, &ledger, events).with_metrics(metrics.clone());

            let report = minter.run(file).await?;
            print_json(&report)?;
        }
        Command::ListItems { zone } => {
            let ledger = Ledger::from_args(&args)?;
            let Some(provisioned) = collection_registry(&args, &ledger).lookup(zone).await? else {
                error!(zone = %zone, "No collection registered for zone");
                return Err(Error::Config(format!(
                    "no collection registered for zone '{}'",
                    zone
                )));
            };

            let listing = duplicate_search(&args, &ledger)
                .list_items(&provisioned.handle)
                .await?;
            print_json(&listing)?;
        }
        Command::ChannelDemo { name } => {
            let ledger = Ledger::from_args(&args)?;
            let service = Arc::new(ChannelService::new(
                registry_store(args.local, &args.topic_registry),
                ledger.channel_writer.clone(),
                ledger.feed.clone(),
            ));
            let demo = ChannelDemo::new(ChannelDemoConfig::default(), service, events)
                .with_metrics(metrics.clone());

            let report = demo.run(name).await?;
            print_json(&report)?;
        }
    }

    if args.print_metrics {
        print!("{}", metrics.render()?);
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize result: {}", e)))?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "h2=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_ledger::orchestrator::DomainStatus;

    const EVENT: &str = r#""registry-event":{"i":"init","r":"REG1","t":"domain","o":"one.app","e":"create","s":"2024-01-01T00:00:00Z","z":"app"}"#;

    #[test]
    fn test_search_limits_must_be_positive() {
        for flag in ["--max-search-pages", "--search-page-size"] {
            let result = Args::try_parse_from(["domain-ledger", flag, "0", "mint-domains", "x.log"]);
            assert!(result.is_err(), "{flag} 0 accepted");
        }

        let args = Args::try_parse_from([
            "domain-ledger",
            "--max-search-pages",
            "3",
            "list-items",
            "app",
        ])
        .unwrap();
        assert_eq!(args.max_search_pages, 3);
        assert!(matches!(args.command, Command::ListItems { ref zone } if zone == "app"));
    }

    #[tokio::test]
    async fn test_local_runs_keep_registry_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("events.log");
        let registry = dir.path().join("zones.json");
        std::fs::write(&log, format!("{}\n", EVENT)).unwrap();

        let args = Args::try_parse_from([
            "domain-ledger",
            "--local",
            "--zone-registry",
            registry.to_str().unwrap(),
            "mint-domains",
            log.to_str().unwrap(),
        ])
        .unwrap();

        // each local run starts from a fresh ledger
        for _ in 0..2 {
            let ledger = Ledger::from_args(&args).unwrap();
            let events = Arc::new(CompositeEventPublisher::new());
            let report = minter(&args, &ledger, events).run(&log).await.unwrap();

            assert_eq!(report.minted, 1);
            assert!(matches!(
                report.outcome("one.app").unwrap().status,
                DomainStatus::Minted { .. }
            ));
        }
        assert!(!registry.exists());
        assert!(!dir.path().join("zones.json.lock").exists());
    }
}
