//! End-to-end pipeline tests against a scripted upstream

mod helpers;

use helpers::{build_pipeline, scenario_transport, FakeTransport};
use machi_common::events::{EventBus, MachiEvent, PipelineState};
use machi_report::error::{PipelineError, ValidationError};
use machi_report::models::{Category, CategoryOptions, MunicipalityCode, PipelineRequest, Preset};
use machi_report::services::ReportPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn code(raw: &str) -> MunicipalityCode {
    MunicipalityCode::parse(raw).unwrap()
}

fn request(codes: &[&str], preset: Preset) -> PipelineRequest {
    PipelineRequest {
        municipality_codes: codes.iter().map(|c| c.to_string()).collect(),
        preset,
        options: CategoryOptions::default(),
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<MachiEvent>) -> Vec<MachiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn reject(pipeline: &ReportPipeline, codes: &[&str]) -> ValidationError {
    match pipeline
        .run_pipeline(request(codes, Preset::Childcare), CancellationToken::new())
        .await
    {
        Err(PipelineError::Validation(e)) => e,
        other => panic!("expected validation error for {:?}, got {:?}", codes, other.map(|r| r.state)),
    }
}

#[tokio::test]
async fn test_childcare_comparison_with_failed_dataset() {
    let transport = Arc::new(scenario_transport());
    let event_bus = EventBus::new(100);
    let mut rx = event_bus.subscribe();
    let pipeline = build_pipeline(transport.clone(), event_bus);

    let result = pipeline
        .run_pipeline(request(&["13104", "14101"], Preset::Childcare), CancellationToken::new())
        .await
        .expect("pipeline should complete");

    assert_eq!(result.state, PipelineState::Completed);
    assert!(result.finished_at.is_some());

    // 14101's education table failed, 13104's did not
    let shinjuku = result.result_for("13104").unwrap();
    let tsurumi = result.result_for("14101").unwrap();
    assert!(shinjuku.data_availability.is_available(Category::Education));
    assert!(!tsurumi.data_availability.is_available(Category::Education));
    assert!(tsurumi.data_availability.is_available(Category::Childcare));
    assert!(tsurumi.overall.is_some());

    // Education resolved for at least one city, so the run is not partial
    assert!(result.partial_data.is_none());

    assert_eq!(result.fetch_failures.len(), 1);
    let failure = &result.fetch_failures[0];
    assert_eq!(failure.municipality_code, code("14101"));
    assert_eq!(failure.source.name(), "education");
    assert!(failure.retryable);
    assert_eq!(transport.calls_for_dataset("education", "14101"), 3);

    let ranks: Vec<u32> = result.ranking.iter().map(|e| e.rank).collect();
    assert_eq!(ranks, vec![1, 2]);
    assert!(result.ranking[0].overall_score >= result.ranking[1].overall_score);

    assert_eq!(result.charts.gauges.len(), 2);
    assert!(result.charts.bar_charts.iter().any(|c| c.key == "overall"));
    assert_eq!(result.narratives.len(), 2);
    assert!(result.narratives[&code("14101")].contains("教育はデータを取得できませんでした"));
    assert!(!result.narratives[&code("13104")].contains("データを取得できませんでした"));

    let events = drain(&mut rx);
    let failed: Vec<&MachiEvent> = events
        .iter()
        .filter(|e| matches!(e, MachiEvent::FetchFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, MachiEvent::PipelineCompleted { ranked: 2, requested: 2, .. })));
}

#[tokio::test]
async fn test_state_events_follow_happy_path() {
    let transport = Arc::new(scenario_transport());
    let event_bus = EventBus::new(100);
    let mut rx = event_bus.subscribe();
    let pipeline = build_pipeline(transport, event_bus);

    let result = pipeline
        .run_pipeline(request(&["13104", "14101"], Preset::Safety), CancellationToken::new())
        .await
        .unwrap();

    let states: Vec<PipelineState> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            MachiEvent::PipelineStateChanged { run_id, new_state, .. } if run_id == result.run_id => {
                Some(new_state)
            }
            _ => None,
        })
        .collect();

    assert_eq!(
        states,
        vec![
            PipelineState::Fetching,
            PipelineState::Scoring,
            PipelineState::Ranking,
            PipelineState::Rendering,
            PipelineState::Completed,
        ]
    );
    assert_eq!(result.transitions.len(), 5);
}

#[tokio::test]
async fn test_validation_happens_before_any_fetch() {
    let transport = Arc::new(scenario_transport());
    let pipeline = build_pipeline(transport.clone(), EventBus::new(10));

    assert!(matches!(
        reject(&pipeline, &["13104"]).await,
        ValidationError::MunicipalityCount { got: 1, .. }
    ));
    assert!(matches!(
        reject(&pipeline, &["13101", "13102", "13103", "13104", "13105", "13106"]).await,
        ValidationError::MunicipalityCount { got: 6, .. }
    ));
    assert!(matches!(
        reject(&pipeline, &["13104", "99999"]).await,
        ValidationError::UnknownMunicipality(_)
    ));
    assert!(matches!(
        reject(&pipeline, &["13104", "13104"]).await,
        ValidationError::DuplicateMunicipality(_)
    ));
    assert!(matches!(
        reject(&pipeline, &["13104", "abc"]).await,
        ValidationError::InvalidCode(_)
    ));

    let mut excluded = request(&["13104", "14101"], Preset::Childcare);
    excluded.options = CategoryOptions::excluding(Category::ALL);
    let err = pipeline
        .run_pipeline(excluded, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(ValidationError::NoCategories)));

    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_excluded_category_is_not_fetched() {
    let transport = Arc::new(scenario_transport());
    let pipeline = build_pipeline(transport.clone(), EventBus::new(100));

    let mut req = request(&["13104", "14101"], Preset::Childcare);
    req.options = CategoryOptions::excluding([Category::Education]);

    let result = pipeline.run_pipeline(req, CancellationToken::new()).await.unwrap();

    assert_eq!(transport.calls_for_dataset("education", "13104"), 0);
    assert_eq!(transport.calls_for_dataset("education", "14101"), 0);
    assert!(result.fetch_failures.is_empty());
    let shinjuku = result.result_for("13104").unwrap();
    assert_eq!(shinjuku.data_availability.get(Category::Education), None);
    assert!(shinjuku.category_average(Category::Education).is_none());
}

#[tokio::test]
async fn test_concurrent_runs_share_upstream_fetches() {
    let transport = Arc::new(scenario_transport().with_delay(Duration::from_millis(30)));
    let pipeline = build_pipeline(transport.clone(), EventBus::new(100));

    let (a, b) = tokio::join!(
        pipeline.run_pipeline(request(&["13104", "14101"], Preset::Childcare), CancellationToken::new()),
        pipeline.run_pipeline(request(&["14101", "13104"], Preset::Price), CancellationToken::new()),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());

    assert_eq!(transport.calls_for_dataset("population", "13104"), 1);
    assert_eq!(transport.calls_for_dataset("healthcare", "14101"), 1);
    assert_eq!(transport.calls_for_prices("13104"), 1);
}

#[tokio::test]
async fn test_cancellation_ends_run_as_cancelled() {
    let transport = Arc::new(scenario_transport().with_delay(Duration::from_millis(500)));
    let event_bus = EventBus::new(100);
    let mut rx = event_bus.subscribe();
    let pipeline = build_pipeline(transport, event_bus);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = pipeline
        .run_pipeline(request(&["13104", "14101"], Preset::Childcare), token)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        MachiEvent::PipelineStateChanged {
            new_state: PipelineState::Cancelled,
            ..
        }
    )));
}

#[tokio::test]
async fn test_nothing_resolved_fails_run() {
    let transport = Arc::new(FakeTransport::new().failing_everything(400));
    let event_bus = EventBus::new(100);
    let mut rx = event_bus.subscribe();
    let pipeline = build_pipeline(transport.clone(), event_bus);

    let err = pipeline
        .run_pipeline(request(&["13104", "14101"], Preset::Childcare), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::Upstream(e) => assert!(!e.retryable),
        other => panic!("expected upstream failure, got {:?}", other),
    }
    // 400 is permanent: one attempt per job
    assert_eq!(transport.calls_for_dataset("population", "13104"), 1);
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        MachiEvent::PipelineStateChanged {
            new_state: PipelineState::Failed,
            ..
        }
    )));
}

#[tokio::test]
async fn test_category_missing_everywhere_is_partial() {
    let transport = Arc::new(scenario_transport().failing_dataset("education", "13104", 500));
    let pipeline = build_pipeline(transport, EventBus::new(100));

    let result = pipeline
        .run_pipeline(request(&["13104", "14101"], Preset::Childcare), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.state, PipelineState::Completed);
    let partial = result.partial_data.expect("education missing for every city");
    assert_eq!(partial.unavailable_categories, vec![Category::Education]);
    assert!(result
        .chart_inputs
        .bar_charts
        .iter()
        .all(|c| c.category != Some(Category::Education)));
}

#[tokio::test]
async fn test_ranking_run_bounds_and_unresolved_cities() {
    let transport = Arc::new(scenario_transport());
    let pipeline = build_pipeline(transport, EventBus::new(1000));

    let err = pipeline
        .run_ranking(&[code("13104")], Preset::Childcare, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Validation(ValidationError::MunicipalityCount { got: 1, .. })
    ));

    let codes = pipeline.ranking_codes();
    let result = pipeline
        .run_ranking(&codes, Preset::Childcare, CancellationToken::new())
        .await
        .unwrap();

    // Only the two scripted cities have any data
    assert_eq!(result.results.len(), codes.len());
    assert_eq!(result.ranking.len(), 2);
    assert!(result
        .results
        .iter()
        .filter(|r| r.overall.is_none())
        .all(|r| !result.ranking.iter().any(|e| e.municipality_code == r.municipality_code)));
}
