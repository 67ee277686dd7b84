//! Domain Events
//!
//! Immutable records of things that happened during a run. The minter and the
//! channel demo publish them through the `EventPublisher` port.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::domain_minted("example.build", "build", "0.0.1234", 7);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One auditable outcome of a minting or channel run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Collection Events
    // =========================================================================
    /// A zone collection is ready for minting.
    CollectionProvisioned {
        zone: String,
        collection_id: String,
        /// True when the collection was created during this call
        created: bool,
        timestamp: DateTime<Utc>,
    },

    /// A registry entry failed the validity check and was dropped.
    StaleCollectionRemoved {
        zone: String,
        collection_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Provisioning failed; every domain of the zone was skipped.
    ZoneFailed {
        zone: String,
        domain_count: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Mint Events
    // =========================================================================
    /// A domain was minted.
    DomainMinted {
        domain: String,
        zone: String,
        collection_id: String,
        serial: u64,
        timestamp: DateTime<Utc>,
    },

    /// A domain was already present in its collection.
    DomainSkipped {
        domain: String,
        zone: String,
        serial: u64,
        timestamp: DateTime<Utc>,
    },

    /// Minting a domain failed.
    MintFailed {
        domain: String,
        zone: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The duplicate check could not complete; the mint went ahead.
    DuplicateCheckFailed {
        domain: String,
        zone: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The duplicate search hit its page cap without a match.
    SearchBoundExhausted {
        domain: String,
        zone: String,
        pages_scanned: usize,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Channel Events
    // =========================================================================
    /// A channel is ready for publishing.
    ChannelProvisioned {
        name: String,
        channel_id: String,
        created: bool,
        timestamp: DateTime<Utc>,
    },

    /// A message was published to a channel.
    MessagePublished {
        channel_id: String,
        sequence_number: u64,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// When the event occurred.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::CollectionProvisioned { timestamp, .. }
            | DomainEvent::StaleCollectionRemoved { timestamp, .. }
            | DomainEvent::ZoneFailed { timestamp, .. }
            | DomainEvent::DomainMinted { timestamp, .. }
            | DomainEvent::DomainSkipped { timestamp, .. }
            | DomainEvent::MintFailed { timestamp, .. }
            | DomainEvent::DuplicateCheckFailed { timestamp, .. }
            | DomainEvent::SearchBoundExhausted { timestamp, .. }
            | DomainEvent::ChannelProvisioned { timestamp, .. }
            | DomainEvent::MessagePublished { timestamp, .. } => *timestamp,
        }
    }

    /// Event type name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::CollectionProvisioned { .. } => "CollectionProvisioned",
            DomainEvent::StaleCollectionRemoved { .. } => "StaleCollectionRemoved",
            DomainEvent::ZoneFailed { .. } => "ZoneFailed",
            DomainEvent::DomainMinted { .. } => "DomainMinted",
            DomainEvent::DomainSkipped { .. } => "DomainSkipped",
            DomainEvent::MintFailed { .. } => "MintFailed",
            DomainEvent::DuplicateCheckFailed { .. } => "DuplicateCheckFailed",
            DomainEvent::SearchBoundExhausted { .. } => "SearchBoundExhausted",
            DomainEvent::ChannelProvisioned { .. } => "ChannelProvisioned",
            DomainEvent::MessagePublished { .. } => "MessagePublished",
        }
    }

    /// Zone the event concerns, if any.
    pub fn zone(&self) -> Option<&str> {
        match self {
            DomainEvent::CollectionProvisioned { zone, .. }
            | DomainEvent::StaleCollectionRemoved { zone, .. }
            | DomainEvent::ZoneFailed { zone, .. }
            | DomainEvent::DomainMinted { zone, .. }
            | DomainEvent::DomainSkipped { zone, .. }
            | DomainEvent::MintFailed { zone, .. }
            | DomainEvent::DuplicateCheckFailed { zone, .. }
            | DomainEvent::SearchBoundExhausted { zone, .. } => Some(zone),
            DomainEvent::ChannelProvisioned { .. } | DomainEvent::MessagePublished { .. } => None,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn collection_provisioned(zone: &str, collection_id: &str, created: bool) -> Self {
        DomainEvent::CollectionProvisioned {
            zone: zone.to_string(),
            collection_id: collection_id.to_string(),
            created,
            timestamp: Utc::now(),
        }
    }

    pub fn stale_collection_removed(zone: &str, collection_id: &str) -> Self {
        DomainEvent::StaleCollectionRemoved {
            zone: zone.to_string(),
            collection_id: collection_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn zone_failed(zone: &str, domain_count: usize, reason: &str) -> Self {
        DomainEvent::ZoneFailed {
            zone: zone.to_string(),
            domain_count,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn domain_minted(domain: &str, zone: &str, collection_id: &str, serial: u64) -> Self {
        DomainEvent::DomainMinted {
            domain: domain.to_string(),
            zone: zone.to_string(),
            collection_id: collection_id.to_string(),
            serial,
            timestamp: Utc::now(),
        }
    }

    pub fn domain_skipped(domain: &str, zone: &str, serial: u64) -> Self {
        DomainEvent::DomainSkipped {
            domain: domain.to_string(),
            zone: zone.to_string(),
            serial,
            timestamp: Utc::now(),
        }
    }

    pub fn mint_failed(domain: &str, zone: &str, reason: &str) -> Self {
        DomainEvent::MintFailed {
            domain: domain.to_string(),
            zone: zone.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn duplicate_check_failed(domain: &str, zone: &str, reason: &str) -> Self {
        DomainEvent::DuplicateCheckFailed {
            domain: domain.to_string(),
            zone: zone.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn search_bound_exhausted(domain: &str, zone: &str, pages_scanned: usize) -> Self {
        DomainEvent::SearchBoundExhausted {
            domain: domain.to_string(),
            zone: zone.to_string(),
            pages_scanned,
            timestamp: Utc::now(),
        }
    }

    pub fn channel_provisioned(name: &str, channel_id: &str, created: bool) -> Self {
        DomainEvent::ChannelProvisioned {
            name: name.to_string(),
            channel_id: channel_id.to_string(),
            created,
            timestamp: Utc::now(),
        }
    }

    pub fn message_published(channel_id: &str, sequence_number: u64) -> Self {
        DomainEvent::MessagePublished {
            channel_id: channel_id.to_string(),
            sequence_number,
            timestamp: Utc::now(),
        }
    }
}
