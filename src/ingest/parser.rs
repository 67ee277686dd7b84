//! Event Parser
//!
//! Turns raw registry log lines into `MintRecord`s.
//!
//! The upstream log writes each event as `"registry-event":{...}` without the
//! enclosing object braces, so candidate lines are wrapped in `{ }` before
//! decoding. Lines with any other prefix are dropped, and lines that fail to
//! decode are logged and skipped; neither stops the run.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Key literal every event line starts with.
pub const EVENT_KEY: &str = "\"registry-event\"";

// =============================================================================
// Wire Types
// =============================================================================

/// A registry event as written to the log, with the log's short keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    #[serde(rename = "i")]
    pub initiator: String,
    #[serde(rename = "r")]
    pub registrar_id: String,
    #[serde(rename = "t")]
    pub object_type: String,
    /// Domain name, not yet validated
    #[serde(rename = "o")]
    pub domain_name: String,
    #[serde(rename = "e")]
    pub event: String,
    /// Log timestamp, kept verbatim
    #[serde(rename = "s")]
    pub timestamp: String,
    #[serde(rename = "z")]
    pub zone: String,
}

#[derive(Debug, Deserialize)]
struct RegistryEventLine {
    #[serde(rename = "registry-event")]
    event: RawEvent,
}

// =============================================================================
// Mint Records
// =============================================================================

/// Everything the minter needs to know about one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRecord {
    pub domain_name: String,
    /// When the record was ingested (not the log timestamp)
    pub registration_time: DateTime<Utc>,
    pub registrar_id: String,
    /// Zone the domain belongs to (e.g. "build", "com")
    pub zone: String,
    /// The brace-wrapped event JSON, for audit
    pub full_event_json: String,
}

impl MintRecord {
    fn from_event(event: RawEvent, full_event_json: String) -> Self {
        Self {
            domain_name: event.domain_name,
            registration_time: Utc::now(),
            registrar_id: event.registrar_id,
            zone: event.zone,
            full_event_json,
        }
    }
}

/// Counters describing what the parser accepted and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub accepted: usize,
    pub skipped_prefix: usize,
    pub skipped_malformed: usize,
}

/// Parser output: records in input order plus the summary.
#[derive(Debug, Clone, Default)]
pub struct ParsedEvents {
    pub records: Vec<MintRecord>,
    pub summary: ParseSummary,
}

// =============================================================================
// Parsing
// =============================================================================

/// Read a log file into lines.
///
/// Invalid UTF-8 is replaced rather than rejected, so one bad byte only
/// affects the line it is on.
pub async fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::to_string)
        .collect())
}

/// Parse one line.
///
/// Returns `Ok(None)` for lines that are not event lines and
/// `Err(Error::Parse)` for event lines that do not decode.
pub fn parse_line(line: &str) -> Result<Option<MintRecord>> {
    if !line.starts_with(EVENT_KEY) {
        return Ok(None);
    }

    let json = format!("{{{}}}", line);
    let decoded: RegistryEventLine =
        serde_json::from_str(&json).map_err(|e| Error::Parse(e.to_string()))?;

    Ok(Some(MintRecord::from_event(decoded.event, json)))
}

/// Parse a sequence of lines, keeping input order.
///
/// No filtering by event kind is applied: every decodable event line yields
/// a record.
pub fn parse_lines<I, S>(lines: I) -> ParsedEvents
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = ParsedEvents::default();

    for (index, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        match parse_line(line) {
            Ok(Some(record)) => {
                parsed.summary.accepted += 1;
                parsed.records.push(record);
            }
            Ok(None) => {
                debug!(line_number = index + 1, "Skipping non-event line");
                parsed.summary.skipped_prefix += 1;
            }
            Err(e) => {
                warn!(line_number = index + 1, error = %e, "Could not decode event line, skipping");
                parsed.summary.skipped_malformed += 1;
            }
        }
    }

    parsed
}
