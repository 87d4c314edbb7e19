//! Common test fixtures for distribution tests.

use distribution_common::{Coordinates, DataType, Element, Product};

/// Noon UTC, 15 January 2024.
pub const SIMULATION_TS: i64 = 1_705_320_000;

/// Start of the UTC day containing [`SIMULATION_TS`].
pub const DAY_START: i64 = 1_705_276_800;

/// A forecast product with two-day validity and six-hourly simulations.
pub fn forecast_product(id: i64, variable: &str) -> Product {
    Product {
        id,
        variable: variable.to_string(),
        kind: "forecast".to_string(),
        supplier: "aemet".to_string(),
        data_type: DataType::Forecast,
        is_raster: false,
        max_age: 172_800,
        time_step: 3600,
        update_frequency: 21_600,
        unit: "ºC".to_string(),
        last_simulation: Some(SIMULATION_TS),
        last_observation: None,
    }
}

/// An observation product updated every ten minutes.
pub fn observation_product(id: i64, variable: &str) -> Product {
    Product {
        id,
        variable: variable.to_string(),
        kind: "observation".to_string(),
        supplier: "meteocat".to_string(),
        data_type: DataType::Observation,
        is_raster: false,
        max_age: 604_800,
        time_step: 600,
        update_frequency: 600,
        unit: "mm".to_string(),
        last_simulation: None,
        last_observation: Some(SIMULATION_TS),
    }
}

/// A station element without geometry, code `E<id>`.
pub fn element(id: i64) -> Element {
    Element {
        id,
        code: format!("E{}", id),
        name: format!("Station {}", id),
        element_type: "station".to_string(),
        location: None,
    }
}

/// Deterministic coordinates for an element id.
pub fn location(id: i64) -> Coordinates {
    Coordinates {
        x: 2.0 + id as f64 / 10.0,
        y: 41.0 + id as f64 / 10.0,
    }
}
