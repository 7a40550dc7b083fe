//! Business logic services

pub mod dataset_catalog;
pub mod http_transport;
pub mod location_index;
pub mod pipeline;
pub mod reading_registry;
pub mod real_estate_client;
pub mod response_cache;
pub mod stats_client;

pub use dataset_catalog::{
    DatasetCatalog, DatasetDefinition, Formula, IndicatorDefinition, IndicatorSource,
    Normalization, PriceMetric, RefreshClass,
};
pub use http_transport::{HttpTransport, ReqwestTransport, TransportError, UpstreamRequest};
pub use location_index::{GeoPoint, LocationIndex, NearbyCity};
pub use pipeline::ReportPipeline;
pub use reading_registry::ReadingRegistry;
pub use real_estate_client::{PriceCache, RealEstateClient};
pub use response_cache::{CacheKey, CacheTtls, ResponseCache};
pub use stats_client::{StatsCache, StatsClient};
