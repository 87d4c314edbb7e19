//! Per-group distribution: one message per element (forecasts) or element-day
//! (observations), with per-product watermarks.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info, warn};

use distribution_common::{day_floor, DataType, DistributionError, DistributionResult, Element, Record};
use storage::{WatermarkStore, WGS84_SRID};

use super::{check_simulation_cadence, Distributor, ResolvedProduct, RunReport};
use crate::config::InputProduct;
use crate::grouper::{group_records, RecordGroups};
use crate::serializer::{serialize, serialize_warnings};

impl<'a> Distributor<'a> {
    /// Distribute every configured product, then persist the watermarks once.
    ///
    /// Per-product conditions (missing product, raster, no data, no records)
    /// and individual publish failures are logged and skipped. Unimplemented
    /// data kinds and store failures abort the run without persisting.
    pub async fn run_per_group(&self, watermarks: &mut WatermarkStore) -> DistributionResult<RunReport> {
        let mut report = RunReport::default();

        for input in &self.config.input_products {
            info!(
                variable = %input.variable,
                kind = %input.kind,
                supplier = %input.supplier,
                "Distributing product ({}, {}, {})",
                input.variable,
                input.kind,
                input.supplier
            );

            match self.distribute_product(input, watermarks, &mut report).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    Self::log_skip(input, &e);
                    report.products_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        match watermarks.persist() {
            Ok(()) => report.watermarks_persisted = true,
            Err(e) => {
                error!(
                    path = %watermarks.path().display(),
                    error = %e,
                    "Failed storing last processed date"
                );
            }
        }

        info!(
            distributed = report.products_distributed,
            skipped = report.products_skipped,
            up_to_date = report.products_up_to_date,
            published = report.messages_published,
            failed = report.messages_failed,
            "Per-group distribution complete"
        );
        Ok(report)
    }

    async fn distribute_product(
        &self,
        input: &InputProduct,
        watermarks: &mut WatermarkStore,
        report: &mut RunReport,
    ) -> DistributionResult<()> {
        let ResolvedProduct {
            product,
            last_available,
            elements,
        } = self.resolve(input).await?;

        let topic = input.topic();
        let last_shared = watermarks.get(product.id, topic);
        if last_shared == Some(last_available) {
            info!(product_id = product.id, "Already distributed. Nothing to be done.");
            report.products_up_to_date += 1;
            return Ok(());
        }

        let records = match product.data_type {
            DataType::Forecast => {
                // Only the latest simulation is fetched; see check_simulation_cadence
                if self.config.general.check_simulation_cadence {
                    check_simulation_cadence(&product, last_shared, last_available);
                }
                self.store.records(product.id, last_available).await?
            }
            _ => {
                let from = day_floor(last_shared.unwrap_or(last_available));
                self.store
                    .records_by_date(product.id, from, last_available)
                    .await?
            }
        };

        if records.is_empty() {
            return Err(DistributionError::EmptyGroup(product.id));
        }

        let groups = group_records(product.data_type, records, &elements)?;
        if groups.is_empty() {
            return Err(DistributionError::EmptyGroup(product.id));
        }

        info!(
            product_id = product.id,
            records = groups.record_count(),
            messages = groups.group_count(),
            "Serializing records..."
        );

        let general = &self.config.general;
        let description = input.description();

        if self.config.is_warning(input) {
            // Element geometry is not included in warnings
            for (element, records) in group_slices(&groups, &elements) {
                let envelope = serialize_warnings(
                    records,
                    element,
                    &product,
                    description,
                    general.include_metadata,
                );
                self.publish_group(&envelope, topic, report);
            }
        } else {
            let locations = self.store.element_locations(product.id, WGS84_SRID).await?;
            let simulation = (product.data_type == DataType::Forecast).then_some(last_available);

            for (element, records) in group_slices(&groups, &elements) {
                let location = locations.get(&element.id).copied();
                if location.is_none() {
                    warn!(element_id = element.id, code = %element.code, "Element has no location");
                }
                let element = element.clone().with_location(location);

                let envelope = serialize(
                    records,
                    &element,
                    &product,
                    simulation,
                    description,
                    general.include_metadata,
                    general.precision,
                );
                self.publish_group(&envelope, topic, report);
            }
        }

        watermarks.set(product.id, topic, last_available);
        report.products_distributed += 1;
        Ok(())
    }

    /// Publish one group; a failure only drops this message.
    fn publish_group<T: Serialize>(&self, envelope: &T, topic: Option<&str>, report: &mut RunReport) {
        match self.publisher.publish_json(envelope, topic) {
            Ok(()) => report.messages_published += 1,
            Err(e) => {
                error!(error = %e, "Failed to upload records to kafka.");
                report.messages_failed += 1;
            }
        }
    }
}

/// Flatten groups into (element, records) pairs, one per message.
///
/// Observation groups yield one pair per element-day.
fn group_slices<'g>(
    groups: &'g RecordGroups,
    elements: &'g BTreeMap<i64, Element>,
) -> Vec<(&'g Element, &'g [Record])> {
    match groups {
        RecordGroups::ByElement(groups) => groups
            .iter()
            .filter_map(|(id, records)| elements.get(id).map(|e| (e, records.as_slice())))
            .collect(),
        RecordGroups::ByElementDay(groups) => groups
            .iter()
            .filter_map(|(id, days)| elements.get(id).map(|e| (e, days)))
            .flat_map(|(element, days)| days.values().map(move |records| (element, records.as_slice())))
            .collect(),
    }
}
