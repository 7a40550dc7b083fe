//! Report API handlers
//!
//! POST /reports, GET /rankings/:preset

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{ApiResult, PartialDataError, PipelineError, ValidationError};
use crate::models::{Category, CategoryOptions, PipelineRequest, PipelineResult, Preset, RankingEntry};
use crate::AppState;

/// POST /reports request
#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub municipality_codes: Vec<String>,
    pub preset: String,
    /// Category name → include flag; unlisted categories are included
    #[serde(default)]
    pub include: BTreeMap<String, bool>,
}

impl CreateReportRequest {
    fn into_pipeline_request(self) -> Result<PipelineRequest, ValidationError> {
        let preset: Preset = self.preset.parse()?;
        let include = self
            .include
            .iter()
            .map(|(name, flag)| Ok((name.parse::<Category>()?, *flag)))
            .collect::<Result<BTreeMap<_, _>, ValidationError>>()?;

        Ok(PipelineRequest {
            municipality_codes: self.municipality_codes,
            preset,
            options: CategoryOptions { include },
        })
    }
}

/// GET /rankings/:preset response
#[derive(Debug, Serialize)]
pub struct RankingResponse {
    pub run_id: Uuid,
    pub preset: Preset,
    pub ranking: Vec<RankingEntry>,
    pub requested: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_data: Option<PartialDataError>,
    pub finished_at: Option<DateTime<Utc>>,
}

async fn record_failure(state: &AppState, err: &PipelineError) {
    if let PipelineError::Upstream(_) = err {
        *state.last_error.write().await = Some(err.to_string());
    }
}

/// POST /reports
///
/// Run an interactive comparison and return the full result.
pub async fn create_report(
    State(state): State<AppState>,
    Json(request): Json<CreateReportRequest>,
) -> ApiResult<Json<PipelineResult>> {
    let request = request.into_pipeline_request()?;

    match state
        .pipeline
        .run_pipeline(request, state.shutdown.child_token())
        .await
    {
        Ok(result) => Ok(Json(result)),
        Err(err) => {
            record_failure(&state, &err).await;
            Err(err.into())
        }
    }
}

/// GET /rankings/:preset
///
/// Rank every registered municipality under one preset.
pub async fn get_ranking(
    State(state): State<AppState>,
    Path(preset): Path<String>,
) -> ApiResult<Json<RankingResponse>> {
    let preset: Preset = preset.parse()?;
    let codes = state.pipeline.ranking_codes();

    match state
        .pipeline
        .run_ranking(&codes, preset, state.shutdown.child_token())
        .await
    {
        Ok(result) => Ok(Json(RankingResponse {
            run_id: result.run_id,
            preset: result.preset,
            ranking: result.ranking,
            requested: result.results.len(),
            partial_data: result.partial_data,
            finished_at: result.finished_at,
        })),
        Err(err) => {
            record_failure(&state, &err).await;
            Err(err.into())
        }
    }
}

/// Build report routes
pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/reports", post(create_report))
        .route("/rankings/:preset", get(get_ranking))
}
