//! Message bus client abstraction.

use std::time::Duration;

use crate::error::DistributionResult;

/// Buffered, topic-addressed message bus client.
///
/// `produce` only enqueues the payload; delivery happens asynchronously and is
/// driven by `poll`. `flush` blocks until the buffer drains or the timeout expires.
pub trait MessageBus: Send + Sync {
    fn produce(&self, topic: &str, payload: &[u8]) -> DistributionResult<()>;

    /// Serve delivery callbacks for at most `timeout`.
    fn poll(&self, timeout: Duration);

    fn flush(&self, timeout: Duration) -> DistributionResult<()>;
}
