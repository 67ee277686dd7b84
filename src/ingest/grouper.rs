//! Zone Grouper
//!
//! Partitions mint records by their zone string. Zones come out in the order
//! they were first seen and records keep their input order within a zone.
//! Zone values are used verbatim; an empty zone is just another group.

use std::collections::HashMap;

use super::parser::MintRecord;

/// Records grouped by zone, in first-seen zone order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneGroups {
    groups: Vec<(String, Vec<MintRecord>)>,
}

impl ZoneGroups {
    /// Number of distinct zones.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Records for a zone.
    pub fn get(&self, zone: &str) -> Option<&[MintRecord]> {
        self.groups
            .iter()
            .find(|(z, _)| z == zone)
            .map(|(_, records)| records.as_slice())
    }

    /// Zones in first-seen order.
    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(zone, _)| zone.as_str())
    }

    /// Iterate `(zone, records)` pairs in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MintRecord])> {
        self.groups
            .iter()
            .map(|(zone, records)| (zone.as_str(), records.as_slice()))
    }
}

impl IntoIterator for ZoneGroups {
    type Item = (String, Vec<MintRecord>);
    type IntoIter = std::vec::IntoIter<(String, Vec<MintRecord>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Group records by zone.
pub fn group_by_zone<I>(records: I) -> ZoneGroups
where
    I: IntoIterator<Item = MintRecord>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<MintRecord>)> = Vec::new();

    for record in records {
        match index.get(&record.zone) {
            Some(&slot) => groups[slot].1.push(record),
            None => {
                index.insert(record.zone.clone(), groups.len());
                groups.push((record.zone.clone(), vec![record]));
            }
        }
    }

    ZoneGroups { groups }
}
