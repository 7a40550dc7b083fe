//! Report pipeline run state machine and result types
//!
//! A run progresses through Pending → Fetching → Scoring → Ranking →
//! Rendering → Completed. Failed and Cancelled are absorbing.

use super::{Category, CityScoreResult, MunicipalityCode, Preset, RankingEntry};
use crate::charts::{BarItem, GaugeOptions};
use crate::error::PartialDataError;
use chrono::{DateTime, Utc};
use machi_common::events::PipelineState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-category include flags supplied by the caller
///
/// Categories not mentioned are included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryOptions {
    #[serde(default)]
    pub include: BTreeMap<Category, bool>,
}

impl CategoryOptions {
    pub fn includes(&self, category: Category) -> bool {
        self.include.get(&category).copied().unwrap_or(true)
    }

    pub fn excluding(categories: impl IntoIterator<Item = Category>) -> Self {
        Self {
            include: categories.into_iter().map(|c| (c, false)).collect(),
        }
    }
}

/// Interactive comparison request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub municipality_codes: Vec<String>,
    pub preset: Preset,
    #[serde(default)]
    pub options: CategoryOptions,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: PipelineState,
    pub new_state: PipelineState,
    pub transitioned_at: DateTime<Utc>,
}

/// Where a failed fetch was headed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum FetchSource {
    Statistics(String),
    RealEstate,
}

impl FetchSource {
    pub fn name(&self) -> &str {
        match self {
            FetchSource::Statistics(dataset) => dataset,
            FetchSource::RealEstate => "real_estate",
        }
    }
}

/// An upstream failure absorbed into a data gap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFailure {
    pub municipality_code: MunicipalityCode,
    pub source: FetchSource,
    pub retryable: bool,
    pub message: String,
}

/// Numeric inputs handed to the chart renderers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartInputs {
    /// One comparison chart per scored category, plus the overall chart
    pub bar_charts: Vec<BarChartInput>,
    /// One gauge per municipality with an overall score
    pub gauges: Vec<GaugeInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarChartInput {
    pub title: String,
    pub category: Option<Category>,
    pub items: Vec<BarItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaugeInput {
    pub municipality_code: MunicipalityCode,
    pub options: GaugeOptions,
}

/// SVG markup produced in the Rendering step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderedCharts {
    pub bar_charts: Vec<RenderedChart>,
    pub gauges: Vec<RenderedChart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedChart {
    pub key: String,
    pub svg: String,
}

/// In-memory state of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub preset: Preset,
    pub state: PipelineState,
    pub municipality_codes: Vec<MunicipalityCode>,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(preset: Preset, municipality_codes: Vec<MunicipalityCode>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            preset,
            state: PipelineState::Pending,
            municipality_codes,
            transitions: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    ///
    /// Returns `None` (and leaves the state untouched) when the transition is
    /// not allowed from the current state.
    pub fn transition_to(&mut self, new_state: PipelineState) -> Option<StateTransition> {
        if !self.state.can_transition_to(new_state) {
            tracing::warn!(
                run_id = %self.run_id,
                from = ?self.state,
                to = ?new_state,
                "Rejected pipeline state transition"
            );
            return None;
        }

        let transition = StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        self.transitions.push(transition.clone());
        Some(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Output of a completed pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub preset: Preset,
    pub state: PipelineState,
    /// One entry per requested municipality, in request order
    pub results: Vec<CityScoreResult>,
    pub ranking: Vec<RankingEntry>,
    pub chart_inputs: ChartInputs,
    pub charts: RenderedCharts,
    /// Narrative paragraph per municipality code
    pub narratives: BTreeMap<MunicipalityCode, String>,
    pub fetch_failures: Vec<FetchFailure>,
    /// Set when a category had no data for any municipality
    pub partial_data: Option<PartialDataError>,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineResult {
    pub fn result_for(&self, code: &str) -> Option<&CityScoreResult> {
        self.results
            .iter()
            .find(|r| r.municipality_code.as_str() == code)
    }
}
