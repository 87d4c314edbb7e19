//! Incremental weather record distribution.
//!
//! Reads newly available records from the record store, groups them per
//! location (and per day for observations), serializes each group into a JSON
//! envelope and publishes it to Kafka.
//!
//! # Architecture
//!
//! - [`grouper`] partitions records per element / day
//! - [`serializer`] builds the published envelopes
//! - [`publisher`] wraps a [`MessageBus`] with the poll and shutdown-flush policy
//! - [`kafka`] provides the rdkafka-backed bus
//! - [`orchestrator`] runs the per-group and packed distribution modes

pub mod config;
pub mod grouper;
pub mod kafka;
pub mod orchestrator;
pub mod publisher;
pub mod serializer;

// Re-exports
pub use config::{DistributionConfig, GeneralConfig, InputProduct};
pub use distribution_common::{DistributionError, DistributionResult, MessageBus};
pub use grouper::{filter_elements, group_records, RecordGroups};
pub use kafka::{KafkaBus, KafkaConnectionParams};
pub use orchestrator::{Distributor, PackedReport, RunReport};
pub use publisher::{FlushOutcome, Publisher, FLUSH_ATTEMPTS, FLUSH_TIMEOUT, POLL_GRACE};
pub use serializer::{serialize, serialize_warnings, Envelope, LocationMetadata, WarningMetadata};
