//! Partitioning of fetched records into publishable groups.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use distribution_common::{day_floor, DataType, DistributionError, DistributionResult, Element, Record};

/// Records grouped per element, and per UTC day for observations.
///
/// Groups keep the order in which their element (or day) first appears in the
/// store output, and records keep store order within a group.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordGroups {
    /// FORECAST: element id -> records
    ByElement(IndexMap<i64, Vec<Record>>),
    /// OBSERVATION: element id -> day start -> records
    ByElementDay(IndexMap<i64, IndexMap<i64, Vec<Record>>>),
}

impl RecordGroups {
    pub fn is_empty(&self) -> bool {
        match self {
            RecordGroups::ByElement(groups) => groups.is_empty(),
            RecordGroups::ByElementDay(groups) => groups.is_empty(),
        }
    }

    /// Total number of grouped records.
    pub fn record_count(&self) -> usize {
        match self {
            RecordGroups::ByElement(groups) => groups.values().map(Vec::len).sum(),
            RecordGroups::ByElementDay(groups) => groups
                .values()
                .flat_map(|days| days.values())
                .map(Vec::len)
                .sum(),
        }
    }

    /// Number of messages the groups produce in per-group mode.
    pub fn group_count(&self) -> usize {
        match self {
            RecordGroups::ByElement(groups) => groups.len(),
            RecordGroups::ByElementDay(groups) => groups.values().map(IndexMap::len).sum(),
        }
    }
}

/// Keep only the elements whose code passes `allows`.
pub fn filter_elements(
    elements: BTreeMap<i64, Element>,
    allows: impl Fn(&str) -> bool,
) -> BTreeMap<i64, Element> {
    elements
        .into_iter()
        .filter(|(_, element)| allows(&element.code))
        .collect()
}

/// Group records of a product by element (and day for observations).
///
/// Records of elements missing from `eligible` are dropped.
pub fn group_records(
    data_type: DataType,
    records: Vec<Record>,
    eligible: &BTreeMap<i64, Element>,
) -> DistributionResult<RecordGroups> {
    let eligible_records = records
        .into_iter()
        .filter(|record| eligible.contains_key(&record.element_id));

    match data_type {
        DataType::Forecast => {
            let mut groups: IndexMap<i64, Vec<Record>> = IndexMap::new();
            for record in eligible_records {
                groups.entry(record.element_id).or_default().push(record);
            }
            Ok(RecordGroups::ByElement(groups))
        }
        DataType::Observation => {
            let mut groups: IndexMap<i64, IndexMap<i64, Vec<Record>>> = IndexMap::new();
            for record in eligible_records {
                groups
                    .entry(record.element_id)
                    .or_default()
                    .entry(day_floor(record.date))
                    .or_default()
                    .push(record);
            }
            Ok(RecordGroups::ByElementDay(groups))
        }
        DataType::ObservationAndForecast => Err(DistributionError::UnimplementedDataKind(
            "grouping OBSERVATION_AND_FORECAST records".to_string(),
        )),
    }
}
