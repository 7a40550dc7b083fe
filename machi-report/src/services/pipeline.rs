//! Report pipeline orchestrator
//!
//! Coordinates one report run through all states:
//! PENDING → FETCHING → SCORING → RANKING → RENDERING → COMPLETED
//!
//! Fetching fans out one job per (municipality × dataset), plus one price job
//! per municipality when price indicators are in play, bounded by
//! `worker_limit`. Every job settles before scoring starts. Failed jobs
//! become data gaps; the run only fails when nothing resolved at all.
//!
//! Cancellation drops the outstanding fetches of this run (in-flight cache
//! fetches shared with other runs keep going) and ends the run as CANCELLED.

use crate::charts::{
    render_horizontal_bar_chart, render_score_gauge, BarChartOptions, BarItem, GaugeOptions,
};
use crate::error::{FetchError, PartialDataError, PipelineError, UpstreamError, ValidationError};
use crate::models::{
    BarChartInput, Category, ChartInputs, CityScoreResult, FetchFailure, FetchSource, GaugeInput,
    MunicipalityCode, MunicipalityIdentity, PipelineRequest, PipelineResult, PipelineRun,
    PipelineState, Preset, PresetWeights, RankingEntry, RawObservation, RenderedChart,
    RenderedCharts,
};
use crate::report::compose_narrative;
use crate::scoring::{rank, ScoringEngine};
use crate::services::dataset_catalog::DatasetCatalog;
use crate::services::reading_registry::ReadingRegistry;
use crate::services::real_estate_client::RealEstateClient;
use crate::services::stats_client::StatsClient;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use machi_common::config::PipelineConfig;
use machi_common::events::{EventBus, MachiEvent};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Municipalities accepted by an interactive comparison
pub const MIN_COMPARISON_CITIES: usize = 2;
pub const MAX_COMPARISON_CITIES: usize = 5;

const OVERALL_CHART_KEY: &str = "overall";
const OVERALL_CHART_TITLE: &str = "総合スコア";

/// One unit of fetch work
#[derive(Debug, Clone)]
enum FetchJob {
    Statistics {
        code: MunicipalityCode,
        dataset: String,
    },
    RealEstate {
        code: MunicipalityCode,
    },
}

struct JobOutcome {
    code: MunicipalityCode,
    source: FetchSource,
    result: Result<Vec<RawObservation>, FetchError>,
}

/// Report pipeline service
pub struct ReportPipeline {
    registry: Arc<ReadingRegistry>,
    catalog: Arc<DatasetCatalog>,
    stats_client: StatsClient,
    real_estate_client: RealEstateClient,
    event_bus: EventBus,
    worker_limit: usize,
    max_ranking_cities: usize,
}

impl ReportPipeline {
    pub fn new(
        registry: Arc<ReadingRegistry>,
        catalog: Arc<DatasetCatalog>,
        stats_client: StatsClient,
        real_estate_client: RealEstateClient,
        event_bus: EventBus,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            stats_client,
            real_estate_client,
            event_bus,
            worker_limit: config.worker_limit.max(1),
            max_ranking_cities: config.max_ranking_cities,
        }
    }

    pub fn registry(&self) -> &Arc<ReadingRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<DatasetCatalog> {
        &self.catalog
    }

    /// Every registered municipality, in registry order
    pub fn ranking_codes(&self) -> Vec<MunicipalityCode> {
        self.registry.iter().map(|i| i.code.clone()).collect()
    }

    /// Interactive comparison of 2-5 municipalities
    ///
    /// The request is fully validated before any upstream call.
    pub async fn run_pipeline(
        &self,
        request: PipelineRequest,
        cancel_token: CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let identities = self.validate_codes(
            &request.municipality_codes,
            MIN_COMPARISON_CITIES,
            MAX_COMPARISON_CITIES,
        )?;

        let weights = self
            .catalog
            .weights(request.preset)
            .restricted_to(|c| request.options.includes(c));
        if weights.weighted_categories().is_empty() {
            return Err(ValidationError::NoCategories.into());
        }

        self.execute(request.preset, identities, weights, cancel_token)
            .await
    }

    /// Ranking-page run over many municipalities with every category included
    pub async fn run_ranking(
        &self,
        codes: &[MunicipalityCode],
        preset: Preset,
        cancel_token: CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let raw: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        let identities = self.validate_codes(&raw, MIN_COMPARISON_CITIES, self.max_ranking_cities)?;
        let weights = self.catalog.weights(preset).clone();

        self.execute(preset, identities, weights, cancel_token).await
    }

    fn validate_codes(
        &self,
        raw_codes: &[String],
        min: usize,
        max: usize,
    ) -> Result<Vec<MunicipalityIdentity>, ValidationError> {
        if raw_codes.len() < min || raw_codes.len() > max {
            return Err(ValidationError::MunicipalityCount {
                got: raw_codes.len(),
                min,
                max,
            });
        }

        let mut seen = HashSet::new();
        let mut identities = Vec::with_capacity(raw_codes.len());
        for raw in raw_codes {
            let code = MunicipalityCode::parse(raw)?;
            let identity = self
                .registry
                .identity(&code)
                .ok_or_else(|| ValidationError::UnknownMunicipality(code.to_string()))?;
            if !seen.insert(code.clone()) {
                return Err(ValidationError::DuplicateMunicipality(code.to_string()));
            }
            identities.push(identity.clone());
        }
        Ok(identities)
    }

    async fn execute(
        &self,
        preset: Preset,
        identities: Vec<MunicipalityIdentity>,
        weights: PresetWeights,
        cancel_token: CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let codes: Vec<MunicipalityCode> = identities.iter().map(|i| i.code.clone()).collect();
        let mut run = PipelineRun::new(preset, codes);

        tracing::info!(
            run_id = %run.run_id,
            preset = %preset,
            municipalities = identities.len(),
            "Starting report pipeline"
        );

        if cancel_token.is_cancelled() {
            return Err(self.cancel(&mut run));
        }

        // FETCHING
        self.transition(&mut run, PipelineState::Fetching);
        let categories = weights.weighted_categories();
        let jobs = self.plan_jobs(&identities, &categories);
        tracing::debug!(run_id = %run.run_id, jobs = jobs.len(), "Fetch jobs planned");

        let outcomes = tokio::select! {
            _ = cancel_token.cancelled() => None,
            outcomes = stream::iter(jobs)
                .map(|job| self.run_job(job))
                .buffer_unordered(self.worker_limit)
                .collect::<Vec<_>>() => Some(outcomes),
        };
        let Some(outcomes) = outcomes else {
            return Err(self.cancel(&mut run));
        };

        let (observations, fetch_failures) = self.settle(&run, outcomes);

        if !observations.iter().any(|o| o.value.is_some()) {
            let err = UpstreamError {
                retryable: fetch_failures.iter().any(|f| f.retryable),
                status: None,
                message: format!(
                    "no data resolved for any municipality ({} fetch failures)",
                    fetch_failures.len()
                ),
            };
            tracing::error!(run_id = %run.run_id, error = %err, "Report pipeline failed");
            self.transition(&mut run, PipelineState::Failed);
            return Err(PipelineError::Upstream(err));
        }

        if cancel_token.is_cancelled() {
            return Err(self.cancel(&mut run));
        }

        // SCORING
        self.transition(&mut run, PipelineState::Scoring);
        let engine = ScoringEngine::new(self.catalog.indicators_for_categories(&categories), weights);
        let results = engine.score_all(&identities, &observations);

        // RANKING
        self.transition(&mut run, PipelineState::Ranking);
        let ranking = rank(&results);

        // RENDERING
        self.transition(&mut run, PipelineState::Rendering);
        let chart_inputs = build_chart_inputs(&categories, &results, &ranking);
        let charts = render_charts(&chart_inputs);
        let narratives: BTreeMap<MunicipalityCode, String> = results
            .iter()
            .map(|result| {
                let entry = ranking
                    .iter()
                    .find(|e| e.municipality_code == result.municipality_code);
                (
                    result.municipality_code.clone(),
                    compose_narrative(result, entry, ranking.len()),
                )
            })
            .collect();

        let unavailable: Vec<Category> = categories
            .iter()
            .copied()
            .filter(|c| !results.iter().any(|r| r.data_availability.is_available(*c)))
            .collect();
        let partial_data = if unavailable.is_empty() {
            None
        } else {
            tracing::warn!(run_id = %run.run_id, categories = ?unavailable, "Categories without data");
            Some(PartialDataError {
                unavailable_categories: unavailable,
            })
        };

        self.transition(&mut run, PipelineState::Completed);

        self.event_bus.emit_lossy(MachiEvent::PipelineCompleted {
            run_id: run.run_id,
            ranked: ranking.len(),
            requested: results.len(),
            unavailable_categories: partial_data
                .iter()
                .flat_map(|p| p.unavailable_categories.iter().map(|c| c.as_str().to_string()))
                .collect(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            run_id = %run.run_id,
            ranked = ranking.len(),
            fetch_failures = fetch_failures.len(),
            "Report pipeline completed"
        );

        Ok(PipelineResult {
            run_id: run.run_id,
            preset,
            state: run.state,
            results,
            ranking,
            chart_inputs,
            charts,
            narratives,
            fetch_failures,
            partial_data,
            transitions: run.transitions,
            started_at: run.started_at,
            finished_at: run.ended_at,
        })
    }

    fn plan_jobs(&self, identities: &[MunicipalityIdentity], categories: &[Category]) -> Vec<FetchJob> {
        let datasets = self.catalog.datasets_for_categories(categories);
        let needs_price = self.catalog.needs_real_estate(categories);

        let mut jobs = Vec::new();
        for identity in identities {
            for dataset in &datasets {
                jobs.push(FetchJob::Statistics {
                    code: identity.code.clone(),
                    dataset: dataset.id.clone(),
                });
            }
            if needs_price {
                jobs.push(FetchJob::RealEstate {
                    code: identity.code.clone(),
                });
            }
        }
        jobs
    }

    async fn run_job(&self, job: FetchJob) -> JobOutcome {
        match job {
            FetchJob::Statistics { code, dataset } => {
                let result = self.stats_client.fetch(&dataset, &code).await;
                JobOutcome {
                    code,
                    source: FetchSource::Statistics(dataset),
                    result,
                }
            }
            FetchJob::RealEstate { code } => {
                let result = self
                    .real_estate_client
                    .fetch_price(&code)
                    .await
                    .map(Option::unwrap_or_default);
                JobOutcome {
                    code,
                    source: FetchSource::RealEstate,
                    result,
                }
            }
        }
    }

    /// Split job outcomes into observations and absorbed failures
    fn settle(
        &self,
        run: &PipelineRun,
        outcomes: Vec<JobOutcome>,
    ) -> (Vec<RawObservation>, Vec<FetchFailure>) {
        let mut observations = Vec::new();
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(found) => observations.extend(found),
                Err(err) => {
                    tracing::warn!(
                        run_id = %run.run_id,
                        code = %outcome.code,
                        source = outcome.source.name(),
                        error = %err,
                        "Fetch failed, continuing without this data"
                    );
                    self.event_bus.emit_lossy(MachiEvent::FetchFailed {
                        run_id: run.run_id,
                        municipality_code: outcome.code.to_string(),
                        source: outcome.source.name().to_string(),
                        retryable: err.is_retryable(),
                        message: err.to_string(),
                        timestamp: Utc::now(),
                    });
                    failures.push(FetchFailure {
                        municipality_code: outcome.code,
                        source: outcome.source,
                        retryable: err.is_retryable(),
                        message: err.to_string(),
                    });
                }
            }
        }

        // Completion order is nondeterministic; keep results reproducible
        failures.sort_by(|a, b| {
            a.municipality_code
                .cmp(&b.municipality_code)
                .then_with(|| a.source.name().cmp(b.source.name()))
        });
        (observations, failures)
    }

    fn transition(&self, run: &mut PipelineRun, new_state: PipelineState) {
        if let Some(transition) = run.transition_to(new_state) {
            tracing::debug!(
                run_id = %run.run_id,
                from = ?transition.old_state,
                to = ?transition.new_state,
                "Pipeline state changed"
            );
            self.event_bus.emit_lossy(MachiEvent::PipelineStateChanged {
                run_id: transition.run_id,
                old_state: transition.old_state,
                new_state: transition.new_state,
                timestamp: transition.transitioned_at,
            });
        }
    }

    fn cancel(&self, run: &mut PipelineRun) -> PipelineError {
        tracing::info!(run_id = %run.run_id, state = ?run.state, "Report pipeline cancelled");
        self.transition(run, PipelineState::Cancelled);
        PipelineError::Cancelled
    }
}

fn build_chart_inputs(
    categories: &[Category],
    results: &[CityScoreResult],
    ranking: &[RankingEntry],
) -> ChartInputs {
    let mut bar_charts: Vec<BarChartInput> = categories
        .iter()
        .filter_map(|category| {
            let items: Vec<BarItem> = results
                .iter()
                .filter_map(|r| {
                    r.category_average(*category)
                        .map(|avg| BarItem::new(r.city_name.clone(), avg))
                })
                .collect();
            (!items.is_empty()).then(|| BarChartInput {
                title: category.label_ja().to_string(),
                category: Some(*category),
                items,
            })
        })
        .collect();

    if !ranking.is_empty() {
        bar_charts.push(BarChartInput {
            title: OVERALL_CHART_TITLE.to_string(),
            category: None,
            items: ranking
                .iter()
                .map(|e| BarItem::new(e.city_name.clone(), e.overall_score))
                .collect(),
        });
    }

    let gauges = ranking
        .iter()
        .map(|entry| GaugeInput {
            municipality_code: entry.municipality_code.clone(),
            options: GaugeOptions {
                score: entry.overall_score,
                label: entry.city_name.clone(),
                rank: Some(entry.rank),
                total_cities: Some(ranking.len() as u32),
            },
        })
        .collect();

    ChartInputs { bar_charts, gauges }
}

fn render_charts(inputs: &ChartInputs) -> RenderedCharts {
    let bar_charts = inputs
        .bar_charts
        .iter()
        .map(|chart| RenderedChart {
            key: chart
                .category
                .map(|c| c.as_str().to_string())
                .unwrap_or_else(|| OVERALL_CHART_KEY.to_string()),
            svg: render_horizontal_bar_chart(&chart.items, BarChartOptions::default()),
        })
        .collect();

    let gauges = inputs
        .gauges
        .iter()
        .map(|gauge| RenderedChart {
            key: gauge.municipality_code.to_string(),
            svg: render_score_gauge(&gauge.options),
        })
        .collect();

    RenderedCharts { bar_charts, gauges }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_inputs_skip_empty_categories() {
        let result = CityScoreResult {
            municipality_code: MunicipalityCode::parse("13104").unwrap(),
            city_name: "新宿区".to_string(),
            choice: Vec::new(),
            category_averages: BTreeMap::from([(Category::Safety, 60.0)]),
            overall: Some(60.0),
            data_availability: Default::default(),
            coverage_percent: 50.0,
        };
        let ranking = rank(std::slice::from_ref(&result));

        let inputs = build_chart_inputs(&[Category::Safety, Category::Education], &[result], &ranking);
        let titles: Vec<&str> = inputs.bar_charts.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["治安", OVERALL_CHART_TITLE]);
        assert_eq!(inputs.gauges.len(), 1);
        assert_eq!(inputs.gauges[0].options.total_cities, Some(1));

        let rendered = render_charts(&inputs);
        assert_eq!(rendered.bar_charts[0].key, "safety");
        assert_eq!(rendered.bar_charts[1].key, OVERALL_CHART_KEY);
        assert_eq!(rendered.gauges[0].key, "13104");
        assert!(rendered.gauges[0].svg.contains("60.0"));
    }
}
