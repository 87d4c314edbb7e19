//! Error types for weather distribution runs.

use thiserror::Error;

/// Result type alias using DistributionError.
pub type DistributionResult<T> = Result<T, DistributionError>;

/// Primary error type for distribution operations.
#[derive(Debug, Error)]
pub enum DistributionError {
    // === Run-aborting errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not implemented for {0}")]
    UnimplementedDataKind(String),

    // === Per-product conditions (logged, product skipped) ===
    #[error("Product ({variable}, {kind}, {supplier}) not found in the record store")]
    ProductNotFound {
        variable: String,
        kind: String,
        supplier: String,
    },

    #[error("Product {0} is raster")]
    RasterProduct(i64),

    #[error("No data available for product {0}")]
    NoDataAvailable(i64),

    #[error("No eligible records for product {0}")]
    EmptyGroup(i64),

    // === Bus / persistence errors ===
    #[error("Publish failed: {0}")]
    PublishFailure(String),

    #[error("Failed to persist watermarks: {0}")]
    PersistenceFailure(String),

    // === Store errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid row from record store: {0}")]
    InvalidRow(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DistributionError {
    /// Whether the condition only skips the current product or message.
    ///
    /// Configuration, unimplemented data kinds and store failures abort the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DistributionError::ProductNotFound { .. }
                | DistributionError::RasterProduct(_)
                | DistributionError::NoDataAvailable(_)
                | DistributionError::EmptyGroup(_)
                | DistributionError::PublishFailure(_)
                | DistributionError::PersistenceFailure(_)
        )
    }
}

impl From<std::io::Error> for DistributionError {
    fn from(err: std::io::Error) -> Self {
        DistributionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DistributionError {
    fn from(err: serde_json::Error) -> Self {
        DistributionError::Serialization(format!("JSON error: {}", err))
    }
}
