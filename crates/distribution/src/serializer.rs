//! JSON envelopes published to the bus.
//!
//! Two envelope shapes share the same `values` mapping (ISO 8601 instant to
//! reading):
//! - location envelopes carry coordinates and rounded values
//! - warning envelopes carry no geometry and the raw values

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Number;
use tracing::warn;

use distribution_common::{iso_instant, DataType, Element, Product, Record};

/// Unit label rewritten to ASCII for consumers.
const LEGACY_DEGREE_UNIT: &str = "º";

/// A published message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<M> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<M>,
    pub values: IndexMap<String, f64>,
}

/// Metadata of a location envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationMetadata {
    pub location_name: String,
    pub location_code: String,
    pub location_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub unit: String,
    pub time_step_minutes: Number,
    pub update_frequency_minutes: Number,
    pub description: String,
    /// Only present for FORECAST products
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation_timestamp: Option<i64>,
}

/// Metadata of a warning envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarningMetadata {
    pub name: String,
    pub code: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub unit: String,
    pub time_step_minutes: Number,
    pub update_frequency_minutes: Number,
    pub description: String,
}

/// Serialize a record group of one element into a location envelope.
///
/// Values are rounded to `precision` decimal digits. The simulation timestamp
/// is attached for FORECAST products only (0 when unknown).
pub fn serialize(
    records: &[Record],
    element: &Element,
    product: &Product,
    simulation: Option<i64>,
    description: &str,
    include_metadata: bool,
    precision: u32,
) -> Envelope<LocationMetadata> {
    let values = values_map(records, |value| round_to(value, precision));

    let metadata = include_metadata.then(|| LocationMetadata {
        location_name: element.name.clone(),
        location_code: element.code.clone(),
        location_type: element.element_type.clone(),
        latitude: element.location.map(|c| c.y),
        longitude: element.location.map(|c| c.x),
        unit: map_unit(&product.unit),
        time_step_minutes: minutes(product.time_step),
        update_frequency_minutes: minutes(product.update_frequency),
        description: description.to_string(),
        simulation_timestamp: (product.data_type == DataType::Forecast)
            .then(|| simulation.unwrap_or_default()),
    });

    Envelope { metadata, values }
}

/// Serialize a record group of one element into a warning envelope.
///
/// Values are published unrounded and the element geometry is left out.
pub fn serialize_warnings(
    records: &[Record],
    element: &Element,
    product: &Product,
    description: &str,
    include_metadata: bool,
) -> Envelope<WarningMetadata> {
    let values = values_map(records, |value| value);

    let metadata = include_metadata.then(|| WarningMetadata {
        name: element.name.clone(),
        code: element.code.clone(),
        element_type: element.element_type.clone(),
        unit: map_unit(&product.unit),
        time_step_minutes: minutes(product.time_step),
        update_frequency_minutes: minutes(product.update_frequency),
        description: description.to_string(),
    });

    Envelope { metadata, values }
}

/// Build the instant -> value mapping.
///
/// Records sharing an instant collapse into one entry (last value wins), which
/// is the lossy case flagged for products with a short max age.
fn values_map(records: &[Record], convert: impl Fn(f64) -> f64) -> IndexMap<String, f64> {
    let mut values = IndexMap::with_capacity(records.len());
    for record in records {
        match iso_instant(record.date) {
            Some(instant) => {
                values.insert(instant, convert(record.value));
            }
            None => {
                warn!(
                    element_id = record.element_id,
                    date = record.date,
                    "Record timestamp out of range, skipping"
                );
            }
        }
    }
    values
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

fn map_unit(unit: &str) -> String {
    match unit {
        LEGACY_DEGREE_UNIT => "degrees".to_string(),
        other => other.to_string(),
    }
}

/// Seconds to minutes; whole minutes serialize as integers.
fn minutes(seconds: i64) -> Number {
    if seconds % 60 == 0 {
        Number::from(seconds / 60)
    } else {
        Number::from_f64(seconds as f64 / 60.0).unwrap_or_else(|| Number::from(seconds / 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distribution_common::Coordinates;
    use serde_json::json;

    fn product(data_type: DataType, unit: &str) -> Product {
        Product {
            id: 1,
            variable: "temperature".to_string(),
            kind: "forecast".to_string(),
            supplier: "aemet".to_string(),
            data_type,
            is_raster: false,
            max_age: 172_800,
            time_step: 3600,
            update_frequency: 90,
            unit: unit.to_string(),
            last_simulation: None,
            last_observation: None,
        }
    }

    fn element() -> Element {
        Element {
            id: 5,
            code: "0076".to_string(),
            name: "Barcelona".to_string(),
            element_type: "municipality".to_string(),
            location: Some(Coordinates { x: 2.17, y: 41.38 }),
        }
    }

    fn records() -> Vec<Record> {
        vec![
            Record::new(5, 1_705_320_000, 12.3456),
            Record::new(5, 1_705_323_600, 13.0049),
        ]
    }

    #[test]
    fn test_serialize_shape() {
        let envelope = serialize(
            &records(),
            &element(),
            &product(DataType::Forecast, "ºC"),
            Some(1_705_276_800),
            "2m air temperature",
            true,
            2,
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "metadata": {
                    "location_name": "Barcelona",
                    "location_code": "0076",
                    "location_type": "municipality",
                    "latitude": 41.38,
                    "longitude": 2.17,
                    "unit": "ºC",
                    "time_step_minutes": 60,
                    "update_frequency_minutes": 1.5,
                    "description": "2m air temperature",
                    "simulation_timestamp": 1_705_276_800
                },
                "values": {
                    "2024-01-15T12:00:00+00:00": 12.35,
                    "2024-01-15T13:00:00+00:00": 13.0
                }
            })
        );
    }

    #[test]
    fn test_observation_has_no_simulation_timestamp() {
        let envelope = serialize(
            &records(),
            &element(),
            &product(DataType::Observation, "º"),
            None,
            "",
            true,
            2,
        );
        let metadata = envelope.metadata.unwrap();
        assert_eq!(metadata.simulation_timestamp, None);
        assert_eq!(metadata.unit, "degrees");

        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("simulation_timestamp").is_none());
    }

    #[test]
    fn test_values_only() {
        let envelope = serialize(
            &records(),
            &element(),
            &product(DataType::Forecast, "m/s"),
            Some(0),
            "",
            false,
            1,
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"values": {"2024-01-15T12:00:00+00:00": 12.3, "2024-01-15T13:00:00+00:00": 13.0}})
        );
    }

    #[test]
    fn test_serialize_warnings_shape() {
        let envelope = serialize_warnings(
            &records(),
            &element(),
            &product(DataType::Forecast, "level"),
            "storm warning",
            true,
        );

        let value = serde_json::to_value(&envelope).unwrap();
        let metadata = value["metadata"].as_object().unwrap();
        let mut keys: Vec<_> = metadata.keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "code",
                "description",
                "name",
                "time_step_minutes",
                "type",
                "unit",
                "update_frequency_minutes"
            ]
        );
        assert_eq!(value["values"]["2024-01-15T12:00:00+00:00"], json!(12.3456));
        assert_eq!(value["values"]["2024-01-15T13:00:00+00:00"], json!(13.0049));
    }

    #[test]
    fn test_duplicate_instants_collapse() {
        let records = vec![
            Record::new(5, 1_705_320_000, 1.0),
            Record::new(5, 1_705_320_000, 2.0),
        ];
        let envelope = serialize(
            &records,
            &element(),
            &product(DataType::Observation, "mm"),
            None,
            "",
            false,
            2,
        );
        assert_eq!(envelope.values.len(), 1);
        assert_eq!(envelope.values["2024-01-15T12:00:00+00:00"], 2.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(2.345, 0), 2.0);
        assert_eq!(round_to(-1.005, 1), -1.0);
        assert_eq!(round_to(7.777, 2), 7.78);
    }
}
