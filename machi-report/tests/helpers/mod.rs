//! Shared test helpers: a scripted upstream transport and pipeline wiring
#![allow(dead_code)]

use async_trait::async_trait;
use machi_common::config::{EstatConfig, PipelineConfig, RealEstateConfig};
use machi_common::events::EventBus;
use machi_report::services::{
    CacheTtls, DatasetCatalog, HttpTransport, LocationIndex, ReadingRegistry, RealEstateClient,
    ReportPipeline, ResponseCache, StatsClient, TransportError, UpstreamRequest,
};
use machi_report::utils::RetryPolicy;
use machi_report::AppState;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PRICE_KEY: &str = "XIT001";

/// Upstream fake keyed by (statsDataId or XIT001, area code)
#[derive(Default)]
pub struct FakeTransport {
    stats: HashMap<(String, String), Vec<(String, String)>>,
    prices: HashMap<String, Vec<(String, String)>>,
    failing: HashMap<(String, String), u16>,
    fail_everything: Option<u16>,
    delay: Duration,
    calls: AtomicUsize,
    calls_by_key: Mutex<HashMap<(String, String), usize>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector values for one catalog dataset, by selector key
    pub fn with_dataset(mut self, dataset: &str, area: &str, values: &[(&str, &str)]) -> Self {
        let catalog = DatasetCatalog::builtin().unwrap();
        let definition = catalog.get(dataset).unwrap();
        let cells = values
            .iter()
            .map(|(key, value)| (definition.selectors[*key].clone(), value.to_string()))
            .collect();
        self.stats
            .insert((definition.stats_source_id.clone(), area.to_string()), cells);
        self
    }

    /// (TradePrice, Area) rows for one city
    pub fn with_prices(mut self, city: &str, rows: &[(&str, &str)]) -> Self {
        self.prices.insert(
            city.to_string(),
            rows.iter()
                .map(|(p, a)| (p.to_string(), a.to_string()))
                .collect(),
        );
        self
    }

    pub fn failing_dataset(mut self, dataset: &str, area: &str, status: u16) -> Self {
        let catalog = DatasetCatalog::builtin().unwrap();
        let stats_id = catalog.get(dataset).unwrap().stats_source_id.clone();
        self.failing.insert((stats_id, area.to_string()), status);
        self
    }

    pub fn failing_everything(mut self, status: u16) -> Self {
        self.fail_everything = Some(status);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for_dataset(&self, dataset: &str, area: &str) -> usize {
        let catalog = DatasetCatalog::builtin().unwrap();
        let stats_id = catalog.get(dataset).unwrap().stats_source_id.clone();
        self.calls_for((stats_id, area.to_string()))
    }

    pub fn calls_for_prices(&self, city: &str) -> usize {
        self.calls_for((PRICE_KEY.to_string(), city.to_string()))
    }

    fn calls_for(&self, key: (String, String)) -> usize {
        self.calls_by_key
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    fn stats_body(&self, stats_id: &str, area: &str) -> Value {
        match self.stats.get(&(stats_id.to_string(), area.to_string())) {
            Some(cells) => {
                let values: Vec<Value> = cells
                    .iter()
                    .map(|(cat, value)| {
                        json!({ "@cat01": cat, "@area": area, "@time": "2020100000", "$": value })
                    })
                    .collect();
                json!({
                    "GET_STATS_DATA": {
                        "RESULT": { "STATUS": 0, "ERROR_MSG": "正常に終了しました。" },
                        "STATISTICAL_DATA": { "DATA_INF": { "VALUE": values } }
                    }
                })
            }
            None => json!({
                "GET_STATS_DATA": {
                    "RESULT": { "STATUS": 1, "ERROR_MSG": "該当データはありませんでした。" }
                }
            }),
        }
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get_json(&self, request: &UpstreamRequest) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let is_price = request.url.ends_with(PRICE_KEY);
        let key = if is_price {
            (
                PRICE_KEY.to_string(),
                request.query_value("city").unwrap_or_default().to_string(),
            )
        } else {
            (
                request.query_value("statsDataId").unwrap_or_default().to_string(),
                request.query_value("cdArea").unwrap_or_default().to_string(),
            )
        };
        *self
            .calls_by_key
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(status) = self.fail_everything.or_else(|| self.failing.get(&key).copied()) {
            return Err(TransportError::Status {
                status,
                body: "scripted failure".to_string(),
            });
        }

        if is_price {
            return match self.prices.get(&key.1) {
                Some(rows) => Ok(json!({
                    "status": "OK",
                    "data": rows
                        .iter()
                        .map(|(price, area)| json!({ "TradePrice": price, "Area": area }))
                        .collect::<Vec<_>>()
                })),
                None => Err(TransportError::Status {
                    status: 404,
                    body: String::new(),
                }),
            };
        }

        Ok(self.stats_body(&key.0, &key.1))
    }
}

/// Data for 新宿区 (13104) and 横浜市鶴見区 (14101); 14101's education
/// table answers 503 on every attempt.
pub fn scenario_transport() -> FakeTransport {
    FakeTransport::new()
        .with_dataset("population", "13104", &[("total", "349385"), ("children", "35000")])
        .with_dataset("population", "14101", &[("total", "297000"), ("children", "36000")])
        .with_dataset("welfare", "13104", &[("nurseries", "60"), ("children", "35000")])
        .with_dataset("welfare", "14101", &[("nurseries", "80"), ("children", "36000")])
        .with_dataset(
            "safety",
            "13104",
            &[("offenses", "4000"), ("traffic_accidents", "600"), ("population", "349385")],
        )
        .with_dataset(
            "safety",
            "14101",
            &[("offenses", "2500"), ("traffic_accidents", "900"), ("population", "297000")],
        )
        .with_dataset(
            "education",
            "13104",
            &[("elementary_schools", "29"), ("junior_high_schools", "10"), ("children", "35000")],
        )
        .failing_dataset("education", "14101", 503)
        .with_dataset(
            "healthcare",
            "13104",
            &[("hospitals", "30"), ("physicians", "2500"), ("population", "349385")],
        )
        .with_dataset(
            "healthcare",
            "14101",
            &[("hospitals", "12"), ("physicians", "700"), ("population", "297000")],
        )
        .with_dataset("transport", "13104", &[("rail_commuters", "80000"), ("workers", "150000")])
        .with_dataset("transport", "14101", &[("rail_commuters", "60000"), ("workers", "140000")])
        .with_prices("13104", &[("60000000", "50"), ("45000000", "40"), ("90000000", "70")])
        .with_prices("14101", &[("35000000", "60"), ("28000000", "55")])
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        deadline: Duration::from_secs(10),
    }
}

pub fn build_pipeline(transport: Arc<FakeTransport>, event_bus: EventBus) -> Arc<ReportPipeline> {
    let catalog = Arc::new(DatasetCatalog::builtin().unwrap());
    let registry = Arc::new(ReadingRegistry::builtin().clone());
    let ttls = CacheTtls::default();

    let estat = EstatConfig {
        app_id: Some("test-app-id".to_string()),
        base_url: "http://estat.test/rest/3.0/app/json".to_string(),
        requests_per_second: 10_000,
    };
    let real_estate = RealEstateConfig {
        subscription_key: Some("test-key".to_string()),
        base_url: "http://reinfolib.test/ex-api/external".to_string(),
        requests_per_second: 10_000,
        year: 2024,
    };

    let stats_client = StatsClient::new(
        &estat,
        fast_retry(),
        ttls,
        transport.clone(),
        Arc::clone(&catalog),
        Arc::new(ResponseCache::new("estat")),
    )
    .unwrap();
    let real_estate_client = RealEstateClient::new(
        &real_estate,
        fast_retry(),
        ttls,
        transport,
        Arc::clone(&catalog),
        Arc::new(ResponseCache::new("real_estate")),
    )
    .unwrap();

    Arc::new(ReportPipeline::new(
        registry,
        catalog,
        stats_client,
        real_estate_client,
        event_bus,
        &PipelineConfig::default(),
    ))
}

pub fn build_state(transport: Arc<FakeTransport>) -> AppState {
    let event_bus = EventBus::new(100);
    let pipeline = build_pipeline(transport, event_bus.clone());
    AppState::new(pipeline, Arc::new(LocationIndex::builtin().clone()), event_bus)
}
