//! Domain Ledger Integration Tests
//!
//! End-to-end runs over a file-backed registry and an in-memory ledger,
//! duplicate search against a mocked mirror node, and the channel demo.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use domain_ledger::adapters::{InMemoryEventCollector, InMemoryLedger};
use domain_ledger::orchestrator::{Minter, MinterConfig, RetryPolicy};
use domain_ledger::registry::{
    CollectionNaming, CollectionRegistry, CollectionRegistryDoc, JsonFileStore,
};
use domain_ledger::search::{DuplicateSearch, SearchConfig};

fn line(domain: &str, zone: &str) -> String {
    format!(
        r#""registry-event":{{"i":"admin","r":"REG7","t":"domain","o":"{domain}","e":"create","s":"2024-05-01T10:00:00Z","z":"{zone}"}}"#
    )
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(2),
        ..Default::default()
    }
}

fn minter_over(dir: &TempDir, ledger: Arc<InMemoryLedger>, dry_run: bool) -> Minter {
    let registry = Arc::new(CollectionRegistry::new(
        Arc::new(JsonFileStore::<CollectionRegistryDoc>::new(
            dir.path().join("zone_collections.json"),
        )),
        ledger.clone(),
        CollectionNaming::default(),
    ));
    Minter::new(
        MinterConfig {
            retry: fast_retry(),
            dry_run,
        },
        registry,
        DuplicateSearch::new(ledger.clone(), SearchConfig::default()),
        ledger,
        Arc::new(InMemoryEventCollector::new()),
    )
}

// =============================================================================
// Minting Runs
// =============================================================================

mod minting_tests {
    use super::*;
    use domain_ledger::orchestrator::{DomainStatus, RunState};

    fn write_log(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("events.log");
        let contents = [
            line("alpha.build", "build"),
            "2024-05-01 10:00:01 INFO heartbeat".to_string(),
            line("beta.build", "build"),
            line("gamma.com", "com"),
            r#""registry-event":{broken"#.to_string(),
        ]
        .join("\n");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_end_to_end_run() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir);
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));
        let minter = minter_over(&dir, ledger.clone(), false);

        let report = minter.run(&log).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert!(report.is_clean());
        assert_eq!(report.parse.accepted, 3);
        assert_eq!(report.parse.skipped_prefix, 1);
        assert_eq!(report.parse.skipped_malformed, 1);
        assert_eq!(report.zones.len(), 2);
        assert_eq!(report.minted, 3);
        assert_eq!(ledger.collection_count(), 2);

        // The registry file now names both collections
        let raw = std::fs::read_to_string(dir.path().join("zone_collections.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(doc["collections"]["build"]["token_id"].is_string());
        assert!(doc["collections"]["com"]["token_id"].is_string());
        assert_eq!(
            doc["collections"]["build"]["token_symbol"],
            "APEX-ZONE.BUILD"
        );
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir);
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));

        let first = minter_over(&dir, ledger.clone(), false).run(&log).await.unwrap();
        assert_eq!(first.minted, 3);

        let second = minter_over(&dir, ledger.clone(), false).run(&log).await.unwrap();
        assert_eq!(second.minted, 0);
        assert_eq!(second.skipped, 3);
        assert!(second.zones.iter().all(|z| !z.created));
        assert_eq!(ledger.collection_count(), 2);

        let first_serial = match &first.outcome("beta.build").unwrap().status {
            DomainStatus::Minted { serial } => *serial,
            other => panic!("unexpected status: {:?}", other),
        };
        assert_eq!(
            second.outcome("beta.build").unwrap().status,
            DomainStatus::Skipped {
                serial: first_serial
            }
        );
    }

    #[tokio::test]
    async fn test_dry_run_leaves_ledger_untouched() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir);
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));

        let report = minter_over(&dir, ledger.clone(), true).run(&log).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.minted, 0);
        assert!(report
            .domains
            .iter()
            .all(|d| d.status == DomainStatus::DryRun));
        assert!(report.zones.iter().all(|z| z.would_create && !z.created));
        assert_eq!(ledger.mint_calls(), 0);
        assert_eq!(ledger.collection_count(), 0);
        assert!(!dir.path().join("zone_collections.json").exists());
        assert!(!dir.path().join("zone_collections.json.lock").exists());
    }

    #[tokio::test]
    async fn test_missing_log_is_fatal() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));

        let result = minter_over(&dir, ledger.clone(), false)
            .run(&dir.path().join("absent.log"))
            .await;

        assert!(result.is_err());
        assert_eq!(ledger.collection_count(), 0);
    }

    #[tokio::test]
    async fn test_report_serializes_for_output() {
        let dir = TempDir::new().unwrap();
        let log = write_log(&dir);
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));

        let report = minter_over(&dir, ledger, false).run(&log).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["state"], "Done");
        assert_eq!(json["minted"], 3);
        assert_eq!(json["domains"][0]["status"], "minted");
        assert_eq!(json["domains"][0]["domain"], "alpha.build");
    }
}

// =============================================================================
// Duplicate Search Against the Mirror
// =============================================================================

mod mirror_search_tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use domain_ledger::adapters::{MirrorConfig, MirrorNodeClient};
    use domain_ledger::domain::ports::CollectionHandle;
    use domain_ledger::ingest::MintRecord;
    use domain_ledger::search::SearchOutcome;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NFTS_PATH: &str = "/api/v1/tokens/0.0.7001/nfts";

    fn record(domain: &str) -> MintRecord {
        MintRecord {
            domain_name: domain.to_string(),
            registration_time: Utc::now(),
            registrar_id: "REG7".into(),
            zone: "build".into(),
            full_event_json: "{}".into(),
        }
    }

    fn collection() -> CollectionHandle {
        CollectionHandle {
            zone: "build".into(),
            collection_id: "0.0.7001".into(),
            name: "APEX Domain Ledger Zone - .BUILD".into(),
            symbol: "APEX-ZONE.BUILD".into(),
            created_at: Utc::now(),
            created_by: "0.0.42".into(),
        }
    }

    fn nft(serial: u64, label: &str) -> serde_json::Value {
        serde_json::json!({
            "token_id": "0.0.7001",
            "serial_number": serial,
            "metadata": STANDARD.encode(label),
            "created_timestamp": "1700000000.000000001"
        })
    }

    /// Two pages: serials 4..3 then 2..1, linked by a mirror-style next link.
    async fn two_page_mirror() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NFTS_PATH))
            .and(query_param("serialnumber", "lt:3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nfts": [nft(2, "beta"), nft(1, "alpha")],
                "links": {"next": null}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(NFTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nfts": [nft(4, "delta"), nft(3, "gamma")],
                "links": {"next": format!("{}?limit=2&order=desc&serialnumber=lt:3", NFTS_PATH)}
            })))
            .mount(&server)
            .await;
        server
    }

    fn search_over(server: &MockServer, max_pages: usize) -> DuplicateSearch {
        let client = MirrorNodeClient::new(MirrorConfig {
            base_url: format!("{}/api/v1", server.uri()),
            ..Default::default()
        })
        .unwrap();
        DuplicateSearch::new(
            Arc::new(client),
            SearchConfig {
                page_size: 2,
                max_pages,
            },
        )
    }

    #[tokio::test]
    async fn test_found_on_second_page() {
        let server = two_page_mirror().await;
        let outcome = search_over(&server, 50)
            .find(&record("alpha.build"), &collection())
            .await
            .unwrap();

        assert_eq!(outcome.serial(), Some(1));
        assert!(matches!(outcome, SearchOutcome::Found { page: 2, .. }));
    }

    #[tokio::test]
    async fn test_not_found_after_last_page() {
        let server = two_page_mirror().await;
        let outcome = search_over(&server, 50)
            .find(&record("omega.build"), &collection())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SearchOutcome::NotFound {
                pages_scanned: 2,
                items_scanned: 4
            }
        );
    }

    #[tokio::test]
    async fn test_page_cap_reports_bound_exhausted() {
        let server = two_page_mirror().await;
        let outcome = search_over(&server, 1)
            .find(&record("alpha.build"), &collection())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SearchOutcome::BoundExhausted {
                pages_scanned: 1,
                items_scanned: 2
            }
        );
    }

    #[tokio::test]
    async fn test_first_page_match_stops_paging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NFTS_PATH))
            .and(query_param("serialnumber", "lt:3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nfts": [nft(2, "beta"), nft(1, "alpha")],
                "links": {"next": null}
            })))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(NFTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nfts": [nft(4, "delta"), nft(3, "gamma")],
                "links": {"next": format!("{}?limit=2&order=desc&serialnumber=lt:3", NFTS_PATH)}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = search_over(&server, 50)
            .find(&record("gamma.build"), &collection())
            .await
            .unwrap();

        assert_eq!(outcome.serial(), Some(3));
        assert!(matches!(outcome, SearchOutcome::Found { page: 1, .. }));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_listing_follows_every_page() {
        let server = two_page_mirror().await;
        let listing = search_over(&server, 1)
            .list_items(&collection())
            .await
            .unwrap();

        assert_eq!(listing.zone, "build");
        assert_eq!(listing.collection_id, "0.0.7001");
        assert_eq!(listing.pages, 2);
        assert_eq!(listing.item_count, 4);
        let labels: Vec<_> = listing.items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["delta", "gamma", "beta", "alpha"]);
        assert_eq!(listing.items[3].serial, 1);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = search_over(&server, 50)
            .find(&record("alpha.build"), &collection())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SearchOutcome::NotFound {
                pages_scanned: 1,
                items_scanned: 0
            }
        );
    }
}

// =============================================================================
// Channel Demo
// =============================================================================

mod channel_tests {
    use super::*;
    use domain_ledger::orchestrator::{ChannelDemo, ChannelDemoConfig};
    use domain_ledger::registry::{ChannelRegistryDoc, ChannelService};

    fn demo_over(dir: &TempDir, ledger: Arc<InMemoryLedger>) -> ChannelDemo {
        let service = Arc::new(ChannelService::new(
            Arc::new(JsonFileStore::<ChannelRegistryDoc>::new(
                dir.path().join("topic_registry.json"),
            )),
            ledger.clone(),
            ledger,
        ));
        let config = ChannelDemoConfig {
            retry: fast_retry(),
            message_interval: Duration::ZERO,
            ..Default::default()
        };
        ChannelDemo::new(config, service, Arc::new(InMemoryEventCollector::new()))
    }

    #[tokio::test]
    async fn test_channel_demo_persists_and_reuses() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(InMemoryLedger::new("0.0.42"));

        let first = demo_over(&dir, ledger.clone()).run("registrations").await.unwrap();
        assert_eq!(first.sent.len(), 4);
        assert_eq!(first.received.len(), 4);

        let second = demo_over(&dir, ledger.clone()).run("registrations").await.unwrap();
        assert_eq!(second.channel.channel_id, first.channel.channel_id);
        assert_eq!(ledger.channel_count(), 1);
        assert_eq!(second.registry.unwrap().channel_count, 1);

        let raw = std::fs::read_to_string(dir.path().join("topic_registry.json")).unwrap();
        assert!(raw.contains(&first.channel.channel_id));
    }
}
