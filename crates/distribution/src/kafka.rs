//! Kafka message bus backed by rdkafka's `BaseProducer`.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::error::KafkaError;
use rdkafka::message::{DeliveryResult, Message};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer, ProducerContext};
use rdkafka::ClientContext;
use tracing::{debug, error, info, trace, warn};

use distribution_common::{DistributionError, DistributionResult, MessageBus};

/// Environment variables holding the PEM contents used for SASL_SSL.
const CERTIFICATE_ENV_VARS: [&str; 3] = ["KAFKA_CA", "KAFKA_CLIENT_CERTIFICATE", "KAFKA_CLIENT_KEY"];

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct KafkaConnectionParams {
    pub brokers: String,
    pub username: String,
    pub password: String,
    pub topic: String,
}

impl KafkaConnectionParams {
    /// Read connection parameters from the environment.
    ///
    /// `KAFKA_BROKER_LIST_NO_AUTH` and `KAFKA_TOPIC` are always required; the
    /// SASL credentials only when `use_sasl_auth` is set.
    pub fn from_env(use_sasl_auth: bool) -> DistributionResult<Self> {
        let brokers = env::var("KAFKA_BROKER_LIST_NO_AUTH").ok();
        let topic = env::var("KAFKA_TOPIC").ok();
        let (username, password) = if use_sasl_auth {
            (
                env::var("KAFKA_AUTH_USERNAME").ok(),
                env::var("KAFKA_AUTH_PASSWORD").ok(),
            )
        } else {
            (Some("not_used".to_string()), Some("not_used".to_string()))
        };

        match (brokers, username, password, topic) {
            (Some(brokers), Some(username), Some(password), Some(topic)) => Ok(Self {
                brokers,
                username,
                password,
                topic,
            }),
            _ => Err(DistributionError::Configuration(
                "Environment variables for Kafka connection not set.".to_string(),
            )),
        }
    }
}

/// Client context routing librdkafka logs and delivery reports to tracing.
#[derive(Debug, Default)]
pub struct DeliveryLogger;

impl ClientContext for DeliveryLogger {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!(facility = fac, "{}", log_message),
            RDKafkaLogLevel::Warning => warn!(facility = fac, "{}", log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => info!(facility = fac, "{}", log_message),
            RDKafkaLogLevel::Debug => trace!(facility = fac, "{}", log_message),
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!(error = %error, reason, "Kafka client error");
    }
}

impl ProducerContext for DeliveryLogger {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: Self::DeliveryOpaque) {
        match delivery_result {
            Ok(message) => debug!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "Delivered message"
            ),
            Err((err, message)) => error!(
                topic = message.topic(),
                error = %err,
                "Delivery failed"
            ),
        }
    }
}

/// Kafka producer implementing [`MessageBus`].
pub struct KafkaBus {
    producer: BaseProducer<DeliveryLogger>,
}

impl KafkaBus {
    /// Configure a producer for the given connection parameters.
    ///
    /// `brokers` overrides the broker list of `params`. With `use_sasl_auth`,
    /// SASL_SSL/PLAIN is enabled and the certificate contents found in the
    /// environment are written into `cert_dir`.
    pub fn new(
        params: &KafkaConnectionParams,
        brokers: Option<&str>,
        use_sasl_auth: bool,
        cert_dir: &Path,
    ) -> DistributionResult<Self> {
        let brokers = brokers.unwrap_or(&params.brokers);

        let mut config = ClientConfig::new();
        config.set("metadata.broker.list", brokers);

        if use_sasl_auth {
            let files = write_certificate_files(cert_dir)?;
            config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", &params.username)
                .set("sasl.password", &params.password)
                .set("ssl.ca.location", path_str(&files[0]))
                .set("ssl.certificate.location", path_str(&files[1]))
                .set("ssl.key.location", path_str(&files[2]));
        }

        let producer: BaseProducer<DeliveryLogger> = config
            .create_with_context(DeliveryLogger)
            .map_err(|e| DistributionError::Configuration(format!("Kafka producer: {}", e)))?;

        info!(
            topic = %params.topic,
            brokers = %brokers,
            "Kafka helper configured to write to topic '{}' for brokers [{}]",
            params.topic,
            brokers
        );

        Ok(Self { producer })
    }
}

impl MessageBus for KafkaBus {
    fn produce(&self, topic: &str, payload: &[u8]) -> DistributionResult<()> {
        self.producer
            .send(BaseRecord::<(), [u8]>::to(topic).payload(payload))
            .map_err(|(err, _)| DistributionError::PublishFailure(err.to_string()))
    }

    fn poll(&self, timeout: Duration) {
        self.producer.poll(timeout);
    }

    fn flush(&self, timeout: Duration) -> DistributionResult<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| DistributionError::PublishFailure(format!("Flush failed: {}", e)))
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Store each certificate environment variable into its own file.
///
/// Returns the file paths in [`CERTIFICATE_ENV_VARS`] order.
fn write_certificate_files(output_dir: &Path) -> DistributionResult<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;

    CERTIFICATE_ENV_VARS
        .iter()
        .map(|var| {
            let content = env::var(var).map_err(|_| {
                DistributionError::Configuration(format!("Failed to read env variable '{}'", var))
            })?;
            write_secret_file(output_dir, var, &content)
        })
        .collect()
}

fn write_secret_file(output_dir: &Path, prefix: &str, content: &str) -> DistributionResult<PathBuf> {
    let store_err = |e: std::io::Error| {
        DistributionError::Configuration(format!(
            "Failed to store contents of env variable '{}' into a file: {}",
            prefix, e
        ))
    };

    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile_in(output_dir)
        .map_err(store_err)?;
    file.write_all(content.as_bytes()).map_err(store_err)?;

    let (_, path) = file.keep().map_err(|e| store_err(e.error))?;
    Ok(path)
}
