//! e-Stat statistics client
//!
//! Fetches one catalog dataset for one municipality through `getStatsData`,
//! extracts the configured selector values, and derives indicator
//! observations from them. Calls are cached and single-flighted per
//! `(dataset, geography)`, rate limited per credential, and retried with
//! backoff on transient failures.
//!
//! # Response walk
//! `GET_STATS_DATA.RESULT.STATUS`:
//! - `0`: success
//! - `1`: no data for the query; reported as a selector miss
//! - `2..=99`: partial success; records present are used
//! - `>= 100`: request rejected; permanent upstream error
//!
//! `GET_STATS_DATA.STATISTICAL_DATA.DATA_INF.VALUE` is an array of records,
//! or a single object when exactly one record matches.

use crate::error::{ConfigurationError, FetchError, SelectorError, UpstreamError};
use crate::models::{MunicipalityCode, RawObservation};
use crate::services::dataset_catalog::{DatasetCatalog, DatasetDefinition, IndicatorSource};
use crate::services::http_transport::{HttpTransport, UpstreamRequest};
use crate::services::response_cache::{CacheKey, CacheTtls, ResponseCache};
use crate::utils::{retry_after_turn, RetryPolicy};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use machi_common::config::EstatConfig;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;

const GET_STATS_DATA_PATH: &str = "getStatsData";

/// Values e-Stat uses for suppressed or unavailable cells
const SUPPRESSION_MARKERS: &[&str] = &["-", "…", "***", "X", "x", ""];

/// Cache shared by every statistics client in the process
pub type StatsCache = ResponseCache<Vec<RawObservation>>;

/// e-Stat client
#[derive(Clone)]
pub struct StatsClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    catalog: Arc<DatasetCatalog>,
    cache: Arc<StatsCache>,
    rate_limiter: DefaultDirectRateLimiter,
    app_id: Option<String>,
    base_url: String,
    retry: RetryPolicy,
    ttls: CacheTtls,
}

impl StatsClient {
    pub fn new(
        config: &EstatConfig,
        retry: RetryPolicy,
        ttls: CacheTtls,
        transport: Arc<dyn HttpTransport>,
        catalog: Arc<DatasetCatalog>,
        cache: Arc<StatsCache>,
    ) -> Result<Self, ConfigurationError> {
        let rps = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            ConfigurationError("estat.requests_per_second must be > 0".to_string())
        })?;

        if config.app_id.is_none() {
            tracing::warn!("e-Stat appId not configured; statistics fetches will fail");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                catalog,
                cache,
                rate_limiter: RateLimiter::direct(Quota::per_second(rps)),
                app_id: config.app_id.clone(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                retry,
                ttls,
            }),
        })
    }

    pub fn catalog(&self) -> &Arc<DatasetCatalog> {
        &self.inner.catalog
    }

    /// Indicator observations derived from one dataset for one municipality
    ///
    /// Every indicator sourced from the dataset appears exactly once, with
    /// `value: None` when the cell is suppressed or the denominator is zero.
    pub async fn fetch(
        &self,
        dataset_name: &str,
        geography: &MunicipalityCode,
    ) -> Result<Vec<RawObservation>, FetchError> {
        let dataset = self.inner.catalog.get(dataset_name)?.clone();
        let ttl = self.inner.ttls.for_class(dataset.refresh);
        let key = CacheKey::new(dataset.id.as_str(), geography.as_str());

        let inner = Arc::clone(&self.inner);
        let code = geography.clone();
        self.inner
            .cache
            .get_or_fetch(key, ttl, move || async move {
                inner.fetch_uncached(&dataset, &code).await
            })
            .await
    }
}

impl Inner {
    async fn fetch_uncached(
        &self,
        dataset: &DatasetDefinition,
        geography: &MunicipalityCode,
    ) -> Result<Vec<RawObservation>, FetchError> {
        let app_id = self
            .app_id
            .as_deref()
            .ok_or_else(|| UpstreamError::permanent("e-Stat appId not configured"))?;

        let selector_codes: Vec<&str> = dataset.selectors.values().map(String::as_str).collect();
        let request = UpstreamRequest::get(format!("{}/{}", self.base_url, GET_STATS_DATA_PATH))
            .query("appId", app_id)
            .query("statsDataId", dataset.stats_source_id.as_str())
            .query("cdArea", geography.as_str())
            .query("cdCat01", selector_codes.join(","));

        let operation = format!("estat {} {}", dataset.id, geography);
        let body = retry_after_turn(
            &operation,
            &self.retry,
            || async {
                if self.rate_limiter.check().is_err() {
                    tracing::debug!(dataset = %dataset.id, "e-Stat rate limit reached, waiting");
                    self.rate_limiter.until_ready().await;
                }
            },
            || async {
                self.transport
                    .get_json(&request)
                    .await
                    .map_err(|e| FetchError::Upstream(e.into()))
            },
        )
        .await?;

        let values = extract_selector_values(&body, dataset, geography)?;
        Ok(derive_observations(&self.catalog, dataset, geography, &values))
    }
}

/// Selector key → value (`None` when suppressed) for one municipality
pub fn extract_selector_values(
    body: &Value,
    dataset: &DatasetDefinition,
    geography: &MunicipalityCode,
) -> Result<BTreeMap<String, Option<f64>>, FetchError> {
    let root = body
        .get("GET_STATS_DATA")
        .ok_or_else(|| UpstreamError::permanent("missing GET_STATS_DATA"))?;

    let status = root
        .pointer("/RESULT/STATUS")
        .and_then(as_status)
        .ok_or_else(|| UpstreamError::permanent("missing RESULT.STATUS"))?;
    let error_msg = root
        .pointer("/RESULT/ERROR_MSG")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match status {
        0 => {}
        1 => return Err(selector_miss(dataset, geography, None)),
        2..=99 => {
            tracing::warn!(dataset = %dataset.id, status, message = error_msg, "e-Stat partial result");
        }
        _ => {
            return Err(UpstreamError::permanent(format!(
                "e-Stat status {}: {}",
                status, error_msg
            ))
            .into())
        }
    }

    let records: Vec<&Value> = match root.pointer("/STATISTICAL_DATA/DATA_INF/VALUE") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    };

    let mut values = BTreeMap::new();
    for (key, code) in &dataset.selectors {
        let latest = records
            .iter()
            .filter(|r| r.get("@cat01").and_then(Value::as_str) == Some(code.as_str()))
            .filter(|r| r.get("@area").and_then(Value::as_str) == Some(geography.as_str()))
            .max_by(|a, b| record_time(a).cmp(record_time(b)))
            .ok_or_else(|| selector_miss(dataset, geography, Some((key, code))))?;

        values.insert(key.clone(), parse_cell(latest.get("$")));
    }
    Ok(values)
}

/// Apply each dataset-sourced indicator's formula to the selector values
pub fn derive_observations(
    catalog: &DatasetCatalog,
    dataset: &DatasetDefinition,
    geography: &MunicipalityCode,
    values: &BTreeMap<String, Option<f64>>,
) -> Vec<RawObservation> {
    catalog
        .indicators_for_dataset(&dataset.id)
        .into_iter()
        .filter_map(|indicator| match &indicator.source {
            IndicatorSource::Statistics { formula, .. } => Some(RawObservation {
                municipality_code: geography.clone(),
                indicator_id: indicator.id.clone(),
                value: formula.evaluate(values),
            }),
            IndicatorSource::RealEstate { .. } => None,
        })
        .collect()
}

fn selector_miss(
    dataset: &DatasetDefinition,
    geography: &MunicipalityCode,
    selector: Option<(&String, &String)>,
) -> FetchError {
    let (selector, code) = match selector {
        Some((key, code)) => (key.clone(), code.clone()),
        None => (
            dataset.selectors.keys().cloned().collect::<Vec<_>>().join(","),
            dataset.selectors.values().cloned().collect::<Vec<_>>().join(","),
        ),
    };
    FetchError::Selector(SelectorError {
        dataset: dataset.id.clone(),
        selector,
        code,
        geography: geography.to_string(),
    })
}

fn as_status(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn record_time(record: &Value) -> &str {
    record.get("@time").and_then(Value::as_str).unwrap_or_default()
}

/// Parse a cell value; suppression markers and unparsable text are absent
fn parse_cell(cell: Option<&Value>) -> Option<f64> {
    match cell? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if SUPPRESSION_MARKERS.contains(&trimmed) {
                return None;
            }
            trimmed.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}
