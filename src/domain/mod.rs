//! Domain Layer
//!
//! Core value types, events and the ports the pipeline depends on.
//!
//! - **Name** (`name.rs`) - `DomainName` / `Label` normalization and validation
//! - **Ports** (`ports.rs`) - Trait abstractions for the ledger and event sinks
//! - **Events** (`events.rs`) - Domain events for audit and decoupling

pub mod events;
pub mod name;
pub mod ports;

pub use events::DomainEvent;
pub use name::{normalize, DomainName, Label, ValidationError};
pub use ports::{
    ChannelFeed, ChannelHandle, ChannelMessage, ChannelSpec, ChannelWriter, CollectionHandle,
    CollectionSpec, EventPublisher, ItemPage, LedgerItem, LedgerQuery, LedgerWriter,
    MessageWindow, PublishReceipt,
};
