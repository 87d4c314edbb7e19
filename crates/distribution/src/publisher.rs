//! Fire-and-forget publishing with a best-effort shutdown flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use distribution_common::{DistributionError, DistributionResult, MessageBus};

/// Time given to the bus client to serve delivery callbacks after each publish.
pub const POLL_GRACE: Duration = Duration::from_millis(100);

/// Flush attempts made when the publisher is finalized.
pub const FLUSH_ATTEMPTS: u32 = 3;

/// Wait of each flush attempt.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of finalizing a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was ever published, no flush needed
    Idle,
    /// Buffer drained on the given attempt
    Flushed { attempts: u32 },
    /// Every attempt timed out; queued messages may be lost
    Incomplete,
}

/// Publishes documents to a default topic (or a per-call override).
///
/// Publishing only enqueues into the bus client buffer and polls briefly; it
/// never waits for the delivery acknowledgment of a specific message. The
/// buffer is flushed exactly once, by [`Publisher::close`] or on drop.
pub struct Publisher {
    bus: Box<dyn MessageBus>,
    default_topic: String,
    used: AtomicBool,
    finalized: bool,
}

impl Publisher {
    pub fn new(bus: Box<dyn MessageBus>, default_topic: impl Into<String>) -> Self {
        let default_topic = default_topic.into();
        if default_topic.is_empty() {
            warn!("Kafka topic environment value is empty.");
        }
        Self {
            bus,
            default_topic,
            used: AtomicBool::new(false),
            finalized: false,
        }
    }

    /// Publish raw bytes to `topic`, or to the default topic when `None`.
    pub fn publish(&self, payload: &[u8], topic: Option<&str>) -> DistributionResult<()> {
        let target = match topic {
            Some(topic) => {
                info!(topic = %topic, "Writing to topic '{}'.", topic);
                topic
            }
            None => self.default_topic.as_str(),
        };

        self.used.store(true, Ordering::Relaxed);
        self.bus.produce(target, payload)?;
        self.bus.poll(POLL_GRACE);

        debug!(topic = %target, bytes = payload.len(), "Queued message");
        Ok(())
    }

    /// Serialize `document` as JSON and publish it.
    pub fn publish_json<T: Serialize>(
        &self,
        document: &T,
        topic: Option<&str>,
    ) -> DistributionResult<()> {
        let payload = serde_json::to_vec(document)
            .map_err(|e| DistributionError::PublishFailure(format!("Serialization failed: {}", e)))?;
        self.publish(&payload, topic)
    }

    /// Flush buffered messages and release the publisher.
    pub fn close(mut self) -> FlushOutcome {
        self.finalize()
    }

    fn finalize(&mut self) -> FlushOutcome {
        if self.finalized {
            return FlushOutcome::Idle;
        }
        self.finalized = true;

        if !self.used.load(Ordering::Relaxed) {
            return FlushOutcome::Idle;
        }

        for attempt in 1..=FLUSH_ATTEMPTS {
            match self.bus.flush(FLUSH_TIMEOUT) {
                Ok(()) => {
                    debug!(attempt, "Flushed buffered messages");
                    return FlushOutcome::Flushed { attempts: attempt };
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Kafka producer flush attempt failed");
                }
            }
        }

        error!("Kafka producer flush failed - messages might be lost.");
        FlushOutcome::Incomplete
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.finalize();
    }
}
