//! Domain Ledger - Per-Zone Domain Minting
//!
//! Ingests domain-registration event logs and mints one NFT per domain into
//! a per-zone collection on a distributed ledger, skipping domains that an
//! earlier run already minted.
//!
//! # Architecture
//!
//! ```text
//! Event Log → Parser → Zone Grouper → Collection Registry → Duplicate Search → Mint
//! ```
//!
//! Collections and message channels are provisioned through idempotent
//! registries persisted as JSON documents, so repeated runs reuse what
//! earlier runs created.
//!
//! # Modules
//!
//! - [`adapters`] - Mirror REST client, ledger gateway client, in-memory ledger, event publishers
//! - [`domain`] - Domain names, ports and events
//! - [`error`] - Error types
//! - [`ingest`] - Event log parsing and zone grouping
//! - [`metrics`] - Prometheus run counters
//! - [`orchestrator`] - Minting runs, channel demo and the retry envelope
//! - [`registry`] - Collection and channel registries with file locking
//! - [`search`] - Bounded duplicate search

pub mod adapters;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod search;

// Re-export commonly used types
pub use domain::{DomainName, Label, ValidationError};
pub use error::{Error, Result};
pub use orchestrator::{ChannelDemo, Minter, RunReport};
pub use registry::{ChannelService, CollectionRegistry};
pub use search::DuplicateSearch;
