//! Per-group distribution runs against in-memory collaborators.

use std::path::Path;

use distribution::{DistributionConfig, DistributionError, Distributor, InputProduct, Publisher};
use distribution_common::DataType;
use storage::WatermarkStore;
use test_utils::{
    assert_approx_eq, element, forecast_product, hourly_days, location, observation_product,
    record_series, temp_dir, temperature_series, InMemoryRecordStore, LogCapture, RecordingBus,
    StoreCall, DAY_START, SIMULATION_TS,
};

const DATA_LOSS_LOG: &str = "some data will be lost";

fn config(info_dir: &Path, products: Vec<InputProduct>) -> DistributionConfig {
    let yaml = format!(
        "general:\n  log_file: /var/log/distribution/test-run.log\n  distribution_info_folder: {}\n",
        info_dir.display()
    );
    let mut config = DistributionConfig::from_yaml_str(&yaml).unwrap();
    config.input_products = products;
    config
}

fn input(variable: &str, kind: &str, supplier: &str) -> InputProduct {
    InputProduct {
        variable: variable.to_string(),
        kind: kind.to_string(),
        supplier: supplier.to_string(),
        kafka_topic: None,
        description: Some(format!("{} test feed", variable)),
        is_warning: None,
    }
}

fn forecast_store() -> InMemoryRecordStore {
    InMemoryRecordStore::new()
        .with_product(forecast_product(1, "temperature"))
        .with_element(1, element(1), Some(location(1)))
        .with_element(1, element(2), Some(location(2)))
        .with_simulation(1, SIMULATION_TS, record_series(1, SIMULATION_TS, 3600, 3, 10.0))
        .with_simulation(1, SIMULATION_TS, record_series(2, SIMULATION_TS, 3600, 3, 20.0))
}

#[tokio::test]
async fn test_forecast_one_message_per_element() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    let store = forecast_store();
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(report.products_distributed, 1);
    assert_eq!(report.messages_published, 2);
    assert!(report.watermarks_persisted);

    let messages = bus.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.topic == "weather"));

    let first = messages[0].json();
    assert_eq!(first["metadata"]["location_code"], "E1");
    assert_eq!(first["metadata"]["latitude"], location(1).y);
    assert_eq!(first["metadata"]["longitude"], location(1).x);
    assert_eq!(first["metadata"]["simulation_timestamp"], SIMULATION_TS);
    assert_eq!(first["metadata"]["description"], "temperature test feed");
    assert_eq!(first["metadata"]["time_step_minutes"], 60);
    assert_eq!(first["values"].as_object().unwrap().len(), 3);
    assert_eq!(first["values"]["2024-01-15T12:00:00+00:00"], 10.0);

    let reloaded = WatermarkStore::load(config.watermark_path()).unwrap();
    assert_eq!(reloaded.get(1, None), Some(SIMULATION_TS));
    assert!(dir.path().join("test-run.json").is_file());
}

#[tokio::test]
async fn test_matching_watermark_is_a_no_op() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    let store = forecast_store();
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");

    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();
    watermarks.set(1, None, SIMULATION_TS);

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(report.products_up_to_date, 1);
    assert_eq!(report.products_distributed, 0);
    assert_eq!(store.record_fetches(), 0);
    assert!(bus.messages().is_empty());
    assert_eq!(watermarks.get(1, None), Some(SIMULATION_TS));
}

#[tokio::test]
async fn test_watermark_advances_monotonically() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    let store = forecast_store();
    let publisher = Publisher::new(Box::new(RecordingBus::new()), "weather");

    let prior = SIMULATION_TS - 21_600;
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();
    watermarks.set(1, None, prior);

    Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    let advanced = watermarks.get(1, None).unwrap();
    assert!(advanced >= prior);
    assert_eq!(advanced, SIMULATION_TS);
}

#[tokio::test]
async fn test_observations_one_message_per_day() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("precipitation", "observation", "meteocat")]);
    let yesterday = DAY_START - 86_400;
    let store = InMemoryRecordStore::new()
        .with_product(observation_product(2, "precipitation"))
        .with_element(2, element(5), Some(location(5)))
        .with_observations(2, hourly_days(5, yesterday, 2));
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");

    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();
    watermarks.set(2, None, DAY_START - 3600);

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert!(store.calls().contains(&StoreCall::RecordsByDate {
        product_id: 2,
        from: yesterday,
        to: SIMULATION_TS,
    }));
    assert_eq!(report.messages_published, 2);

    let messages = bus.messages();
    let first = messages[0].json();
    let second = messages[1].json();
    assert_eq!(first["values"].as_object().unwrap().len(), 24);
    // Today's hours up to and including noon
    assert_eq!(second["values"].as_object().unwrap().len(), 13);
    assert!(first["metadata"].get("simulation_timestamp").is_none());
    assert_eq!(second["metadata"]["update_frequency_minutes"], 10);

    assert_eq!(watermarks.get(2, None), Some(SIMULATION_TS));
}

#[tokio::test]
async fn test_first_observation_run_starts_at_day_of_last_observation() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("precipitation", "observation", "meteocat")]);
    let store = InMemoryRecordStore::new()
        .with_product(observation_product(2, "precipitation"))
        .with_element(2, element(5), Some(location(5)))
        .with_observations(2, hourly_days(5, DAY_START - 86_400, 2));
    let publisher = Publisher::new(Box::new(RecordingBus::new()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert!(store.calls().contains(&StoreCall::RecordsByDate {
        product_id: 2,
        from: DAY_START,
        to: SIMULATION_TS,
    }));
    assert_eq!(report.messages_published, 1);
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_siblings() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    let store = forecast_store();
    let bus = RecordingBus::new();
    bus.fail_produce_at(0);
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(bus.produce_attempts(), 2);
    assert_eq!(report.messages_failed, 1);
    assert_eq!(report.messages_published, 1);
    assert_eq!(bus.messages()[0].json()["metadata"]["location_code"], "E2");
    assert_eq!(watermarks.get(1, None), Some(SIMULATION_TS));
}

#[tokio::test]
async fn test_raster_product_skipped_without_fetch() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("radar", "forecast", "aemet")]);
    let mut radar = forecast_product(3, "radar");
    radar.is_raster = true;
    let store = InMemoryRecordStore::new()
        .with_product(radar)
        .with_element(3, element(1), Some(location(1)))
        .with_simulation(3, SIMULATION_TS, record_series(1, SIMULATION_TS, 3600, 3, 1.0));
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(report.products_skipped, 1);
    assert_eq!(store.record_fetches(), 0);
    assert!(!store
        .calls()
        .iter()
        .any(|c| matches!(c, StoreCall::Elements { .. })));
    assert!(bus.messages().is_empty());
    assert_eq!(watermarks.get(3, None), None);
}

#[tokio::test]
async fn test_short_max_age_still_distributes() {
    let logs = LogCapture::new();
    let _guard = logs.install();
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("gusts", "forecast", "aemet")]);
    let mut gusts = forecast_product(4, "gusts");
    gusts.max_age = 43_200;
    let store = InMemoryRecordStore::new()
        .with_product(gusts)
        .with_element(4, element(1), Some(location(1)))
        .with_simulation(4, SIMULATION_TS, record_series(1, SIMULATION_TS, 3600, 2, 1.0));
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(report.products_distributed, 1);
    assert_eq!(bus.messages().len(), 1);
    assert_eq!(logs.count(DATA_LOSS_LOG), 1);
}

#[tokio::test]
async fn test_day_long_max_age_has_no_data_loss_warning() {
    let logs = LogCapture::new();
    let _guard = logs.install();
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    let store = forecast_store();
    let publisher = Publisher::new(Box::new(RecordingBus::new()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(logs.count(DATA_LOSS_LOG), 0);
}

#[tokio::test]
async fn test_values_rounded_to_configured_precision() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    let records = temperature_series(1, SIMULATION_TS, 24);
    let store = InMemoryRecordStore::new()
        .with_product(forecast_product(1, "temperature"))
        .with_element(1, element(1), Some(location(1)))
        .with_simulation(1, SIMULATION_TS, records.clone());
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    let message = bus.messages()[0].json();
    let values = message["values"].as_object().unwrap();
    assert_eq!(values.len(), records.len());
    for (published, record) in values.values().zip(&records) {
        let published = published.as_f64().unwrap();
        assert_approx_eq!(published, record.value, 0.005);
        assert_eq!(published, (published * 100.0).round() / 100.0);
    }
}

#[tokio::test]
async fn test_missing_and_empty_products_are_skipped() {
    let dir = temp_dir();
    let mut stale = forecast_product(6, "humidity");
    stale.last_simulation = None;
    let config = config(
        dir.path(),
        vec![
            input("unknown", "forecast", "aemet"),
            input("humidity", "forecast", "aemet"),
            input("temperature", "forecast", "aemet"),
        ],
    );
    let store = forecast_store().with_product(stale);
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(report.products_skipped, 2);
    assert_eq!(report.products_distributed, 1);
    assert_eq!(bus.messages().len(), 2);
    assert_eq!(watermarks.get(6, None), None);
}

#[tokio::test]
async fn test_no_records_leaves_watermark_untouched() {
    let dir = temp_dir();
    let config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    let store = InMemoryRecordStore::new()
        .with_product(forecast_product(1, "temperature"))
        .with_element(1, element(1), Some(location(1)));
    let publisher = Publisher::new(Box::new(RecordingBus::new()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert_eq!(report.products_skipped, 1);
    assert_eq!(watermarks.get(1, None), None);
}

#[tokio::test]
async fn test_element_allow_list() {
    let dir = temp_dir();
    let mut config = config(dir.path(), vec![input("temperature", "forecast", "aemet")]);
    config.element_codes = Some(vec!["E2".to_string()]);
    let store = forecast_store();
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    let messages = bus.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].json()["metadata"]["location_code"], "E2");
}

#[tokio::test]
async fn test_warning_products_skip_geometry() {
    let dir = temp_dir();
    let mut warning = input("alerts", "forecast", "aemet");
    warning.is_warning = Some(true);
    let config = config(dir.path(), vec![warning]);
    let store = InMemoryRecordStore::new()
        .with_product(forecast_product(7, "alerts"))
        .with_element(7, element(1), Some(location(1)))
        .with_simulation(7, SIMULATION_TS, vec![distribution_common::Record::new(1, SIMULATION_TS, 2.345678)]);
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert!(!store
        .calls()
        .iter()
        .any(|c| matches!(c, StoreCall::Locations { .. })));

    let message = bus.messages()[0].json();
    assert_eq!(message["metadata"]["code"], "E1");
    assert_eq!(message["metadata"]["type"], "station");
    assert!(message["metadata"].get("latitude").is_none());
    assert_eq!(message["values"]["2024-01-15T12:00:00+00:00"], 2.345678);
}

#[tokio::test]
async fn test_topic_override_routes_and_keys_watermark() {
    let dir = temp_dir();
    let mut routed = input("temperature", "forecast", "aemet");
    routed.kafka_topic = Some("weather.temperature".to_string());
    let config = config(dir.path(), vec![routed]);
    let store = forecast_store();
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert!(bus.messages().iter().all(|m| m.topic == "weather.temperature"));
    assert_eq!(watermarks.get(1, Some("weather.temperature")), Some(SIMULATION_TS));
    assert_eq!(watermarks.get(1, None), None);
}

#[tokio::test]
async fn test_mixed_data_kind_aborts_run() {
    let dir = temp_dir();
    let config = config(
        dir.path(),
        vec![
            input("temperature", "forecast", "aemet"),
            input("hybrid", "forecast", "aemet"),
        ],
    );
    let mut hybrid = forecast_product(8, "hybrid");
    hybrid.data_type = DataType::ObservationAndForecast;
    let store = forecast_store().with_product(hybrid);
    let publisher = Publisher::new(Box::new(RecordingBus::new()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let result = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await;

    assert!(matches!(result, Err(DistributionError::UnimplementedDataKind(_))));
    assert!(!config.watermark_path().exists());
}

#[tokio::test]
async fn test_persist_failure_is_not_fatal() {
    let dir = temp_dir();
    let config = config(
        &dir.path().join("not-created"),
        vec![input("temperature", "forecast", "aemet")],
    );
    let store = forecast_store();
    let bus = RecordingBus::new();
    let publisher = Publisher::new(Box::new(bus.clone()), "weather");
    let mut watermarks = WatermarkStore::load(config.watermark_path()).unwrap();

    let report = Distributor::new(&config, &store, &publisher)
        .run_per_group(&mut watermarks)
        .await
        .unwrap();

    assert!(!report.watermarks_persisted);
    assert_eq!(report.messages_published, 2);
}
