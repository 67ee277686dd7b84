//! Log ingestion: raw lines to mint records, grouped by zone.

pub mod grouper;
pub mod parser;

pub use grouper::{group_by_zone, ZoneGroups};
pub use parser::{parse_line, parse_lines, read_lines, MintRecord, ParseSummary, ParsedEvents, RawEvent};
