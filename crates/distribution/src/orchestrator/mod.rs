//! Distribution runs.
//!
//! Two modes are built from the same grouper, serializer and publisher:
//! - per-group: one message per element (or element-day), watermarks advanced per product
//! - packed: a single message aggregating the latest forecast of every product, stateless

mod packed;
mod per_group;

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use distribution_common::{
    DataType, DistributionError, DistributionResult, Element, Product, SECONDS_PER_DAY,
};
use storage::RecordStore;

use crate::config::{DistributionConfig, InputProduct};
use crate::grouper::filter_elements;
use crate::publisher::Publisher;

/// Summary of a per-group run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub products_distributed: usize,
    pub products_skipped: usize,
    /// Products whose watermark already matched the latest data
    pub products_up_to_date: usize,
    pub messages_published: usize,
    pub messages_failed: usize,
    pub watermarks_persisted: bool,
}

/// Summary of a packed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedReport {
    /// Variables carried by the published message, in config order
    pub variables: Vec<String>,
    pub products_skipped: usize,
    pub published: bool,
}

/// A product resolved against the record store, ready to fetch.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedProduct {
    pub product: Product,
    pub last_available: i64,
    pub elements: BTreeMap<i64, Element>,
}

/// Runs distribution for a configuration against injected collaborators.
pub struct Distributor<'a> {
    config: &'a DistributionConfig,
    store: &'a dyn RecordStore,
    publisher: &'a Publisher,
}

impl<'a> Distributor<'a> {
    pub fn new(
        config: &'a DistributionConfig,
        store: &'a dyn RecordStore,
        publisher: &'a Publisher,
    ) -> Self {
        Self {
            config,
            store,
            publisher,
        }
    }

    /// Resolve product metadata, eligible elements and the last available timestamp.
    ///
    /// Raster products are rejected before any element or record is fetched.
    pub(crate) async fn resolve(&self, input: &InputProduct) -> DistributionResult<ResolvedProduct> {
        let product = self.lookup(input).await?;
        self.resolve_product(product).await
    }

    /// Fetch the product row of an input; missing and raster products are errors.
    pub(crate) async fn lookup(&self, input: &InputProduct) -> DistributionResult<Product> {
        let product = self
            .store
            .product_details(&input.variable, &input.kind, &input.supplier)
            .await?
            .ok_or_else(|| DistributionError::ProductNotFound {
                variable: input.variable.clone(),
                kind: input.kind.clone(),
                supplier: input.supplier.clone(),
            })?;

        if product.is_raster {
            return Err(DistributionError::RasterProduct(product.id));
        }
        Ok(product)
    }

    /// Eligible elements and last available timestamp of a looked up product.
    pub(crate) async fn resolve_product(&self, product: Product) -> DistributionResult<ResolvedProduct> {
        if product.max_age < SECONDS_PER_DAY {
            error!(
                product_id = product.id,
                max_age = product.max_age,
                "Max age is smaller than 1 day, some data will be lost in the serialization process!"
            );
        }

        let elements = self.store.elements_without_geometry(product.id).await?;
        let elements = filter_elements(elements, |code| self.config.allows_element(code));
        if elements.is_empty() {
            error!(product_id = product.id, "Product has no elements.");
        }

        let last_available = match product.data_type {
            DataType::Forecast => product.last_simulation,
            DataType::Observation => product.last_observation,
            DataType::ObservationAndForecast => {
                return Err(DistributionError::UnimplementedDataKind(
                    "distribution of OBSERVATION_AND_FORECAST products".to_string(),
                ))
            }
        }
        .ok_or(DistributionError::NoDataAvailable(product.id))?;

        Ok(ResolvedProduct {
            product,
            last_available,
            elements,
        })
    }

    /// Log a recoverable per-product condition at the level it deserves.
    pub(crate) fn log_skip(input: &InputProduct, err: &DistributionError) {
        match err {
            DistributionError::ProductNotFound { .. } | DistributionError::RasterProduct(_) => {
                error!(variable = %input.variable, error = %err, "Skipping product");
            }
            _ => warn!(variable = %input.variable, error = %err, "Skipping product"),
        }
    }
}

/// Check that no simulation was missed since the last distributed one.
///
/// Forecast distribution only ships the latest simulation, so a gap larger
/// than the update frequency means intermediate simulations were never sent.
/// Returns `false` (after logging) when the gap looks too large.
pub fn check_simulation_cadence(product: &Product, last_shared: Option<i64>, last_available: i64) -> bool {
    let Some(last_shared) = last_shared else {
        return true;
    };
    if product.data_type != DataType::Forecast || product.update_frequency <= 0 {
        return true;
    }

    let gap = last_available - last_shared;
    if gap > product.update_frequency {
        warn!(
            product_id = product.id,
            last_shared,
            last_available,
            update_frequency = product.update_frequency,
            missed = gap / product.update_frequency - 1,
            "Simulations may have been missed since the last distribution"
        );
        return false;
    }

    info!(product_id = product.id, gap, "Simulation cadence consistent");
    true
}
