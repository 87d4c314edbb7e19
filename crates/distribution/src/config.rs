//! Distribution run configuration.
//!
//! Loaded from a YAML (or JSON) file listing the products to distribute.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use distribution_common::{DistributionError, DistributionResult};

/// Root configuration of a distribution run.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    pub general: GeneralConfig,
    /// Only elements whose code is listed here are distributed
    #[serde(default)]
    pub element_codes: Option<Vec<String>>,
    #[serde(default)]
    pub input_products: Vec<InputProduct>,
}

/// Run-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Log identity of the run; its file stem names the watermark file
    pub log_file: PathBuf,
    /// Folder holding the watermark file
    pub distribution_info_folder: PathBuf,
    /// Publish the warning envelope shape (no coordinates, raw values)
    #[serde(default)]
    pub is_warning: bool,
    /// Decimal digits kept in published values
    #[serde(default = "default_precision")]
    pub precision: u32,
    /// Publish metadata alongside the values
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    /// Warn when the gap since the last shared simulation exceeds the update frequency
    #[serde(default = "default_true")]
    pub check_simulation_cadence: bool,
}

fn default_precision() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

/// A product to distribute, identified by (variable, type, supplier).
#[derive(Debug, Clone, Deserialize)]
pub struct InputProduct {
    pub variable: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub supplier: String,
    /// Overrides the run-level Kafka topic
    #[serde(default)]
    pub kafka_topic: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Overrides `general.is_warning` for this product
    #[serde(default)]
    pub is_warning: Option<bool>,
}

impl InputProduct {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    pub fn topic(&self) -> Option<&str> {
        self.kafka_topic.as_deref()
    }
}

impl DistributionConfig {
    /// Load a run configuration from a YAML or JSON file.
    pub fn load(path: &Path) -> DistributionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DistributionError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_yaml_str(&content).map_err(|e| match e {
            DistributionError::Configuration(msg) => {
                DistributionError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        info!(
            path = %path.display(),
            products = config.input_products.len(),
            "Loaded distribution config"
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> DistributionResult<Self> {
        let config: DistributionConfig = serde_yaml::from_str(content).map_err(|e| {
            DistributionError::Configuration(format!("Failed to parse config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> DistributionResult<()> {
        if self.watermark_file_name().is_none() {
            return Err(DistributionError::Configuration(format!(
                "general.log_file '{}' has no file name",
                self.general.log_file.display()
            )));
        }
        for product in &self.input_products {
            if product.topic() == Some("") {
                return Err(DistributionError::Configuration(format!(
                    "Empty kafka_topic override for product ({}, {}, {})",
                    product.variable, product.kind, product.supplier
                )));
            }
        }
        debug!(products = self.input_products.len(), "Validated distribution config");
        Ok(())
    }

    fn watermark_file_name(&self) -> Option<String> {
        self.general
            .log_file
            .file_stem()
            .map(|stem| format!("{}.json", stem.to_string_lossy()))
    }

    /// Path of the watermark file: `<distribution_info_folder>/<log file stem>.json`.
    pub fn watermark_path(&self) -> PathBuf {
        let name = self
            .watermark_file_name()
            .unwrap_or_else(|| "distribution.json".to_string());
        self.general.distribution_info_folder.join(name)
    }

    /// Whether a product is published with the warning envelope.
    pub fn is_warning(&self, product: &InputProduct) -> bool {
        product.is_warning.unwrap_or(self.general.is_warning)
    }

    /// Whether any configured product uses the warning envelope.
    pub fn any_warning(&self) -> bool {
        self.input_products.iter().any(|p| self.is_warning(p))
    }

    /// Whether an element code passes the allow-list.
    pub fn allows_element(&self, code: &str) -> bool {
        match &self.element_codes {
            Some(codes) => codes.iter().any(|c| c == code),
            None => true,
        }
    }
}
