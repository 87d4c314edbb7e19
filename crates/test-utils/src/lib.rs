//! Shared test utilities for the weather distribution workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Product, element and record fixtures
//! - Record series generators
//! - In-memory fakes of the record store and the message bus
//! - Capture of tracing output
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, InMemoryRecordStore, RecordingBus};
//! ```

pub mod fakes;
pub mod fixtures;
pub mod generators;
pub mod logs;

// Re-export commonly used items at the crate root
pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
pub use logs::LogCapture;

/// Create a temporary directory that is removed when dropped.
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temporary directory")
}

/// Macro for approximate floating-point equality assertions.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(12.3501, 12.35, 0.001);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
