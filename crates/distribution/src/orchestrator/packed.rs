//! Packed distribution: the latest forecast of every product in one message.
//!
//! Packed runs are stateless. No watermark is read or written, so every run
//! re-sends the latest snapshot of each product.

use indexmap::IndexMap;
use tracing::{error, info, warn};

use distribution_common::{DataType, DistributionError, DistributionResult};
use storage::WGS84_SRID;

use super::{Distributor, PackedReport, ResolvedProduct};
use crate::config::InputProduct;
use crate::grouper::{group_records, RecordGroups};
use crate::serializer::{serialize, Envelope, LocationMetadata};

impl<'a> Distributor<'a> {
    /// Build one `{ "<variable>": <envelope> }` document and publish it once.
    ///
    /// Only FORECAST products with the location envelope are supported; any
    /// other kind, or a warning configuration, aborts the run. A failed publish
    /// fails the whole run.
    pub async fn run_packed(&self) -> DistributionResult<PackedReport> {
        if self.config.any_warning() {
            return Err(DistributionError::UnimplementedDataKind(
                "packed distribution with warning metadata".to_string(),
            ));
        }

        let mut report = PackedReport::default();
        let mut message: IndexMap<String, Envelope<LocationMetadata>> = IndexMap::new();

        for input in &self.config.input_products {
            info!(
                variable = %input.variable,
                kind = %input.kind,
                supplier = %input.supplier,
                "Serializing product ({}, {}, {})",
                input.variable,
                input.kind,
                input.supplier
            );

            match self.pack_product(input).await {
                Ok((variable, envelope)) => {
                    if message.insert(variable.clone(), envelope).is_some() {
                        warn!(variable = %variable, "Variable packed twice, keeping the last product");
                    } else {
                        report.variables.push(variable);
                    }
                }
                Err(e) if e.is_recoverable() => {
                    Self::log_skip(input, &e);
                    report.products_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if message.is_empty() {
            warn!("No product could be packed, nothing to publish.");
            return Ok(report);
        }

        let topic = self.packed_topic();
        if let Err(e) = self.publisher.publish_json(&message, topic) {
            error!(error = %e, "Failed to upload message to Kafka.");
            return Err(e);
        }

        info!(variables = report.variables.len(), "Successfully uploaded message to Kafka.");
        report.published = true;
        Ok(report)
    }

    async fn pack_product(
        &self,
        input: &InputProduct,
    ) -> DistributionResult<(String, Envelope<LocationMetadata>)> {
        let product = self.lookup(input).await?;

        // Checked before the last available timestamp so a missing one cannot hide it
        if product.data_type != DataType::Forecast {
            return Err(DistributionError::UnimplementedDataKind(format!(
                "packed distribution of {} products",
                product.data_type
            )));
        }

        let ResolvedProduct {
            product,
            last_available,
            elements,
        } = self.resolve_product(product).await?;

        let records = self.store.records(product.id, last_available).await?;
        let RecordGroups::ByElement(groups) = group_records(product.data_type, records, &elements)? else {
            return Err(DistributionError::UnimplementedDataKind(
                "packed distribution of per-day groups".to_string(),
            ));
        };

        if groups.is_empty() {
            return Err(DistributionError::EmptyGroup(product.id));
        }
        info!(
            product_id = product.id,
            records = groups.values().map(Vec::len).sum::<usize>(),
            "Found records to distribute."
        );

        if groups.len() > 1 {
            warn!(
                product_id = product.id,
                elements = groups.len(),
                "Packed message carries one location per product, keeping the last one"
            );
        }

        let locations = self.store.element_locations(product.id, WGS84_SRID).await?;
        let general = &self.config.general;

        let mut packed = None;
        for (element_id, records) in &groups {
            let Some(element) = elements.get(element_id) else {
                continue;
            };
            let element = element
                .clone()
                .with_location(locations.get(element_id).copied());

            packed = Some(serialize(
                records,
                &element,
                &product,
                Some(last_available),
                input.description(),
                general.include_metadata,
                general.precision,
            ));
        }

        packed
            .map(|envelope| (product.variable.clone(), envelope))
            .ok_or(DistributionError::EmptyGroup(product.id))
    }

    /// Topic of the packed message.
    ///
    /// The override of the last configured product, the run-level topic when
    /// that product has none. Overrides set on earlier products are ignored
    /// with a warning.
    fn packed_topic(&self) -> Option<&'a str> {
        let products = &self.config.input_products;
        let topic = products.last().and_then(|p| p.topic());

        let ignored: Vec<&str> = products
            .iter()
            .filter_map(|p| p.topic())
            .filter(|t| Some(*t) != topic)
            .collect();
        if !ignored.is_empty() {
            warn!(topics = ?ignored, used = ?topic, "Topic overrides of earlier products are ignored in packed mode");
        }
        topic
    }
}
