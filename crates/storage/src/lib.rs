//! Storage abstractions for the weather distribution services.
//!
//! Provides:
//! - The record store gateway (PostgreSQL) for products, elements and records
//! - The JSON watermark store tracking what has already been distributed

pub mod record_store;
pub mod watermark;

pub use record_store::{PgRecordStore, RecordStore, WGS84_SRID};
pub use watermark::{WatermarkEntry, WatermarkStore};
