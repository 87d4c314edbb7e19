//! Common types and utilities shared across the weather distribution crates.

pub mod bus;
pub mod error;
pub mod product;
pub mod time;

pub use bus::MessageBus;
pub use error::{DistributionError, DistributionResult};
pub use product::{Coordinates, DataType, Element, Product, Record};
pub use time::{day_floor, iso_instant, SECONDS_PER_DAY};
