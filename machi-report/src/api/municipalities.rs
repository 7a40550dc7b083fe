//! Municipality lookup handlers
//!
//! GET /municipalities/:code/nearby, GET /readings/:reading

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::MunicipalityCode;
use crate::AppState;

const DEFAULT_RADIUS_KM: f64 = 20.0;
const DEFAULT_NEARBY_LIMIT: usize = 10;
const MAX_NEARBY_LIMIT: usize = 100;

/// Query parameters for GET /municipalities/:code/nearby
#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NearbyCityResponse {
    pub municipality_code: MunicipalityCode,
    pub city_name: String,
    pub distance_km: f64,
}

/// GET /municipalities/:code/nearby response
#[derive(Debug, Serialize)]
pub struct NearbyResponse {
    pub municipality_code: MunicipalityCode,
    pub city_name: String,
    pub radius_km: f64,
    pub cities: Vec<NearbyCityResponse>,
}

/// GET /readings/:reading response
#[derive(Debug, Serialize)]
pub struct ReadingResponse {
    pub reading: String,
    pub names: Vec<String>,
}

/// GET /municipalities/:code/nearby
pub async fn nearby_cities(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<NearbyQuery>,
) -> ApiResult<Json<NearbyResponse>> {
    let code = MunicipalityCode::parse(&code)?;
    let city_name = state
        .registry
        .name_of(&code)
        .ok_or_else(|| ApiError::NotFound(format!("municipality {}", code)))?
        .to_string();

    let radius_km = query.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(ApiError::BadRequest(format!(
            "radius_km must be a positive number, got {}",
            radius_km
        )));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_NEARBY_LIMIT)
        .min(MAX_NEARBY_LIMIT);

    let cities = state
        .locations
        .nearby_cities(&code, radius_km, limit)
        .into_iter()
        .map(|city| NearbyCityResponse {
            city_name: state
                .registry
                .name_of(&city.municipality_code)
                .unwrap_or_default()
                .to_string(),
            municipality_code: city.municipality_code,
            distance_km: city.distance_km,
        })
        .collect();

    Ok(Json(NearbyResponse {
        municipality_code: code,
        city_name,
        radius_km,
        cities,
    }))
}

/// GET /readings/:reading
///
/// Exact-match reverse lookup; an unknown reading yields an empty list.
pub async fn find_by_reading(
    State(state): State<AppState>,
    Path(reading): Path<String>,
) -> Json<ReadingResponse> {
    let names = state
        .registry
        .find_by_reading(&reading)
        .into_iter()
        .map(str::to_string)
        .collect();

    Json(ReadingResponse { reading, names })
}

/// Build municipality lookup routes
pub fn municipality_routes() -> Router<AppState> {
    Router::new()
        .route("/municipalities/:code/nearby", get(nearby_cities))
        .route("/readings/:reading", get(find_by_reading))
}
