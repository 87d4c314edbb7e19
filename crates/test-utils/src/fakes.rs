//! In-memory fakes of the distribution collaborators.
//!
//! Both fakes record how they were called so tests can assert on fetches,
//! publishes and flushes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use distribution_common::{
    Coordinates, DistributionError, DistributionResult, Element, MessageBus, Product, Record,
};
use storage::RecordStore;

/// A call made against [`InMemoryRecordStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    ProductDetails { variable: String },
    Elements { product_id: i64 },
    Locations { product_id: i64, srid: i32 },
    Records { product_id: i64, as_of: i64 },
    RecordsByDate { product_id: i64, from: i64, to: i64 },
}

/// Record store backed by in-memory maps.
#[derive(Default)]
pub struct InMemoryRecordStore {
    products: Vec<Product>,
    elements: HashMap<i64, BTreeMap<i64, Element>>,
    locations: HashMap<i64, BTreeMap<i64, Coordinates>>,
    simulations: HashMap<(i64, i64), Vec<Record>>,
    observations: HashMap<i64, Vec<Record>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product: Product) -> Self {
        self.products.push(product);
        self
    }

    /// Register elements of a product; located ones also get coordinates.
    pub fn with_element(mut self, product_id: i64, element: Element, location: Option<Coordinates>) -> Self {
        if let Some(location) = location {
            self.locations
                .entry(product_id)
                .or_default()
                .insert(element.id, location);
        }
        self.elements
            .entry(product_id)
            .or_default()
            .insert(element.id, element);
        self
    }

    /// Records of the simulation `as_of`, returned by `records`.
    pub fn with_simulation(mut self, product_id: i64, as_of: i64, records: Vec<Record>) -> Self {
        self.simulations
            .entry((product_id, as_of))
            .or_default()
            .extend(records);
        self
    }

    /// Dated records, filtered by `records_by_date`.
    pub fn with_observations(mut self, product_id: i64, records: Vec<Record>) -> Self {
        self.observations.entry(product_id).or_default().extend(records);
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of record fetches (either kind).
    pub fn record_fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Records { .. } | StoreCall::RecordsByDate { .. }))
            .count()
    }

    fn log(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn product_details(
        &self,
        variable: &str,
        kind: &str,
        supplier: &str,
    ) -> DistributionResult<Option<Product>> {
        self.log(StoreCall::ProductDetails {
            variable: variable.to_string(),
        });
        Ok(self
            .products
            .iter()
            .find(|p| p.variable == variable && p.kind == kind && p.supplier == supplier)
            .cloned())
    }

    async fn elements_without_geometry(
        &self,
        product_id: i64,
    ) -> DistributionResult<BTreeMap<i64, Element>> {
        self.log(StoreCall::Elements { product_id });
        Ok(self.elements.get(&product_id).cloned().unwrap_or_default())
    }

    async fn element_locations(
        &self,
        product_id: i64,
        srid: i32,
    ) -> DistributionResult<BTreeMap<i64, Coordinates>> {
        self.log(StoreCall::Locations { product_id, srid });
        Ok(self.locations.get(&product_id).cloned().unwrap_or_default())
    }

    async fn records(&self, product_id: i64, as_of: i64) -> DistributionResult<Vec<Record>> {
        self.log(StoreCall::Records { product_id, as_of });
        Ok(self
            .simulations
            .get(&(product_id, as_of))
            .cloned()
            .unwrap_or_default())
    }

    async fn records_by_date(
        &self,
        product_id: i64,
        from: i64,
        to: i64,
    ) -> DistributionResult<Vec<Record>> {
        self.log(StoreCall::RecordsByDate {
            product_id,
            from,
            to,
        });
        Ok(self
            .observations
            .get(&product_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.date >= from && r.date <= to)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// A message accepted by [`RecordingBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl SentMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("payload is not JSON")
    }
}

#[derive(Default)]
struct BusState {
    messages: Vec<SentMessage>,
    produce_attempts: usize,
    failing_produces: HashSet<usize>,
    poll_count: usize,
    flush_count: usize,
    failing_flushes: usize,
}

/// Message bus that keeps every produced message in memory.
///
/// Clones share state, so a clone can be handed to a publisher while the test
/// keeps another for assertions.
#[derive(Clone, Default)]
pub struct RecordingBus {
    state: Arc<Mutex<BusState>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the produce attempt with the given zero-based index.
    pub fn fail_produce_at(&self, attempt: usize) {
        self.state.lock().unwrap().failing_produces.insert(attempt);
    }

    /// Make the next `count` flushes time out.
    pub fn fail_flushes(&self, count: usize) {
        self.state.lock().unwrap().failing_flushes = count;
    }

    /// Messages accepted so far.
    pub fn messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn produce_attempts(&self) -> usize {
        self.state.lock().unwrap().produce_attempts
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().unwrap().poll_count
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().unwrap().flush_count
    }
}

impl MessageBus for RecordingBus {
    fn produce(&self, topic: &str, payload: &[u8]) -> DistributionResult<()> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.produce_attempts;
        state.produce_attempts += 1;

        if state.failing_produces.contains(&attempt) {
            return Err(DistributionError::PublishFailure(format!(
                "Local: Queue full (attempt {})",
                attempt
            )));
        }

        state.messages.push(SentMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn poll(&self, _timeout: Duration) {
        self.state.lock().unwrap().poll_count += 1;
    }

    fn flush(&self, _timeout: Duration) -> DistributionResult<()> {
        let mut state = self.state.lock().unwrap();
        state.flush_count += 1;
        if state.failing_flushes > 0 {
            state.failing_flushes -= 1;
            return Err(DistributionError::PublishFailure(
                "Flush failed: Local: Timed out".to_string(),
            ));
        }
        Ok(())
    }
}
