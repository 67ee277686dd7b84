//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  LedgerQuery │ LedgerWriter │ ChannelWriter │ ChannelFeed │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ MirrorNodeClient │ LedgerGatewayClient │ InMemoryLedger    │ │
//! │  │ LoggingEventPublisher │ InMemoryEventCollector             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use domain_ledger::adapters::{MirrorConfig, MirrorNodeClient};
//! use domain_ledger::domain::ports::LedgerQuery;
//!
//! let mirror = MirrorNodeClient::new(MirrorConfig::default())?;
//! let page = mirror.items_page("0.0.5120", None, 100).await?;
//! ```

mod event_publisher;
mod gateway;
mod memory;
mod mirror;

pub use event_publisher::{CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher};
pub use gateway::{GatewayConfig, LedgerGatewayClient, OPERATOR_ACCOUNT_HEADER, OPERATOR_KEY_HEADER};
pub use memory::InMemoryLedger;
pub use mirror::{format_consensus_timestamp, parse_consensus_timestamp, MirrorConfig, MirrorNodeClient};
