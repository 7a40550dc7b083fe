//! Real Estate Information Library (不動産情報ライブラリ) client
//!
//! Queries the `XIT001` transaction price API for one municipality and year
//! and reduces the transactions to median price figures. A municipality with
//! no usable transactions yields `Ok(None)` rather than an error.

use crate::error::{ConfigurationError, FetchError, UpstreamError};
use crate::models::{MunicipalityCode, RawObservation};
use crate::services::dataset_catalog::{DatasetCatalog, IndicatorSource, PriceMetric, RefreshClass};
use crate::services::http_transport::{HttpTransport, TransportError, UpstreamRequest};
use crate::services::response_cache::{CacheKey, CacheTtls, ResponseCache};
use crate::utils::{retry_after_turn, RetryPolicy};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use machi_common::config::RealEstateConfig;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;

const XIT001_PATH: &str = "XIT001";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
/// 01: transaction prices (as opposed to 02: contract prices)
const PRICE_CLASSIFICATION: &str = "01";

/// Cache key dataset name for price lookups
pub const REAL_ESTATE_CACHE_DATASET: &str = "real_estate";

pub type PriceCache = ResponseCache<Option<Vec<RawObservation>>>;

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    data: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    #[serde(rename = "TradePrice", default)]
    trade_price: Option<String>,
    #[serde(rename = "Area", default)]
    area: Option<String>,
}

/// Median figures over one municipality's transactions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSummary {
    pub transactions: usize,
    pub median_unit_price: Option<f64>,
    pub median_trade_price: Option<f64>,
}

impl PriceSummary {
    pub fn metric(&self, metric: PriceMetric) -> Option<f64> {
        match metric {
            PriceMetric::MedianUnitPrice => self.median_unit_price,
            PriceMetric::MedianTradePrice => self.median_trade_price,
        }
    }
}

/// Real-estate price client
#[derive(Clone)]
pub struct RealEstateClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    catalog: Arc<DatasetCatalog>,
    cache: Arc<PriceCache>,
    rate_limiter: DefaultDirectRateLimiter,
    subscription_key: Option<String>,
    base_url: String,
    year: u16,
    retry: RetryPolicy,
    ttl: std::time::Duration,
}

impl RealEstateClient {
    pub fn new(
        config: &RealEstateConfig,
        retry: RetryPolicy,
        ttls: CacheTtls,
        transport: Arc<dyn HttpTransport>,
        catalog: Arc<DatasetCatalog>,
        cache: Arc<PriceCache>,
    ) -> Result<Self, ConfigurationError> {
        let rps = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            ConfigurationError("real_estate.requests_per_second must be > 0".to_string())
        })?;

        if config.subscription_key.is_none() {
            tracing::warn!("Real-estate subscription key not configured; price fetches will fail");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                catalog,
                cache,
                rate_limiter: RateLimiter::direct(Quota::per_second(rps)),
                subscription_key: config.subscription_key.clone(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                year: config.year,
                retry,
                ttl: ttls.for_class(RefreshClass::Annual),
            }),
        })
    }

    /// Price observations for every real-estate indicator in the catalog
    pub async fn fetch_price(
        &self,
        code: &MunicipalityCode,
    ) -> Result<Option<Vec<RawObservation>>, FetchError> {
        let key = CacheKey::new(REAL_ESTATE_CACHE_DATASET, code.as_str());
        let inner = Arc::clone(&self.inner);
        let code = code.clone();
        self.inner
            .cache
            .get_or_fetch(key, self.inner.ttl, move || async move {
                inner.fetch_uncached(&code).await
            })
            .await
    }
}

impl Inner {
    async fn fetch_uncached(
        &self,
        code: &MunicipalityCode,
    ) -> Result<Option<Vec<RawObservation>>, FetchError> {
        let key = self
            .subscription_key
            .as_deref()
            .ok_or_else(|| UpstreamError::permanent("real-estate subscription key not configured"))?;

        let request = UpstreamRequest::get(format!("{}/{}", self.base_url, XIT001_PATH))
            .query("year", self.year.to_string())
            .query("city", code.as_str())
            .query("priceClassification", PRICE_CLASSIFICATION)
            .header(SUBSCRIPTION_KEY_HEADER, key);

        let operation = format!("reinfolib {}", code);
        let body = retry_after_turn(
            &operation,
            &self.retry,
            || self.rate_limiter.until_ready(),
            || async {
                match self.transport.get_json(&request).await {
                    Ok(body) => Ok(Some(body)),
                    Err(TransportError::Status { status: 404, .. }) => Ok(None),
                    Err(e) => Err(FetchError::Upstream(e.into())),
                }
            },
        )
        .await?;

        let Some(body) = body else {
            tracing::debug!(code = %code, "No transactions published");
            return Ok(None);
        };

        let summary = summarize(&body)?;
        if summary.transactions == 0 {
            tracing::debug!(code = %code, "No usable transactions");
            return Ok(None);
        }

        tracing::debug!(
            code = %code,
            transactions = summary.transactions,
            median_unit_price = ?summary.median_unit_price,
            "Summarized transaction prices"
        );
        Ok(Some(price_observations(&self.catalog, code, &summary)))
    }
}

/// Reduce an `XIT001` payload to median figures
pub fn summarize(body: &Value) -> Result<PriceSummary, FetchError> {
    let response = PriceResponse::deserialize(body)
        .map_err(|e| UpstreamError::permanent(format!("unexpected XIT001 payload: {}", e)))?;

    let mut trade_prices = Vec::new();
    let mut unit_prices = Vec::new();

    for tx in &response.data {
        let Some(price) = tx.trade_price.as_deref().and_then(parse_amount) else {
            continue;
        };
        trade_prices.push(price);

        if let Some(area) = tx.area.as_deref().and_then(parse_amount) {
            if area > 0.0 {
                unit_prices.push(price / area);
            }
        }
    }

    Ok(PriceSummary {
        transactions: trade_prices.len(),
        median_unit_price: median(&mut unit_prices),
        median_trade_price: median(&mut trade_prices),
    })
}

fn price_observations(
    catalog: &DatasetCatalog,
    code: &MunicipalityCode,
    summary: &PriceSummary,
) -> Vec<RawObservation> {
    catalog
        .indicators()
        .iter()
        .filter_map(|indicator| match indicator.source {
            IndicatorSource::RealEstate { metric } => Some(RawObservation {
                municipality_code: code.clone(),
                indicator_id: indicator.id.clone(),
                value: summary.metric(metric),
            }),
            IndicatorSource::Statistics { .. } => None,
        })
        .collect()
}

// Areas such as "2,000㎡以上" are capped bands, not measurements
fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Median of the values; `None` when empty
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
