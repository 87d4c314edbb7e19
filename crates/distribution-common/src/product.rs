//! Products, elements and records as read from the record store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DistributionError;

/// Kind of data a product carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Forecast,
    Observation,
    ObservationAndForecast,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forecast => "FORECAST",
            Self::Observation => "OBSERVATION",
            Self::ObservationAndForecast => "OBSERVATION_AND_FORECAST",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FORECAST" => Ok(Self::Forecast),
            "OBSERVATION" => Ok(Self::Observation),
            "OBSERVATION_AND_FORECAST" => Ok(Self::ObservationAndForecast),
            other => Err(DistributionError::InvalidRow(format!(
                "unknown product data type '{}'",
                other
            ))),
        }
    }
}

/// Product metadata.
///
/// Timestamps are UNIX epoch seconds. `last_simulation` and `last_observation`
/// are maintained by the ingestion pipeline that populates the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub variable: String,
    pub kind: String,
    pub supplier: String,
    pub data_type: DataType,
    pub is_raster: bool,
    /// Seconds the data remains valid
    pub max_age: i64,
    /// Seconds between consecutive data points
    pub time_step: i64,
    /// Seconds between product updates
    pub update_frequency: i64,
    pub unit: String,
    pub last_simulation: Option<i64>,
    pub last_observation: Option<i64>,
}

/// A named location the product publishes values for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: i64,
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub element_type: String,
    /// Only populated for non-warning distribution
    #[serde(default)]
    pub location: Option<Coordinates>,
}

impl Element {
    /// Attach coordinates fetched separately from the store.
    pub fn with_location(mut self, location: Option<Coordinates>) -> Self {
        self.location = location;
        self
    }
}

/// Point geometry of an element (x = longitude, y = latitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// A single reading of a product at one element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub element_id: i64,
    /// UNIX epoch seconds
    pub date: i64,
    pub value: f64,
}

impl Record {
    pub fn new(element_id: i64, date: i64, value: f64) -> Self {
        Self {
            element_id,
            date,
            value,
        }
    }
}
