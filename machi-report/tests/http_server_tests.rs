//! HTTP surface tests
//!
//! Drive the router in-process with `oneshot`; upstream calls go to a
//! scripted transport.

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use helpers::{build_state, scenario_transport, FakeTransport};
use http_body_util::BodyExt;
use machi_report::build_router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app(transport: FakeTransport) -> Router {
    build_router(build_state(Arc::new(transport)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(scenario_transport());

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "machi-report");
    assert_eq!(json["municipalities"], 38);
    assert!(json.get("last_error").is_none());
}

#[tokio::test]
async fn test_create_report() {
    let app = create_test_app(scenario_transport());

    let (status, json) = send(
        &app,
        post_json(
            "/reports",
            json!({ "municipality_codes": ["13104", "14101"], "preset": "childcare" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "COMPLETED");
    assert_eq!(json["preset"], "childcare");
    assert_eq!(json["ranking"].as_array().unwrap().len(), 2);
    assert_eq!(json["results"][0]["municipality_code"], "13104");
    assert_eq!(json["fetch_failures"][0]["source"]["name"], "education");
    assert!(json["charts"]["gauges"][0]["svg"]
        .as_str()
        .unwrap()
        .starts_with("<svg"));
    assert!(json["narratives"]["14101"].as_str().unwrap().contains("横浜市鶴見区"));
}

#[tokio::test]
async fn test_create_report_with_excluded_category() {
    let app = create_test_app(scenario_transport());

    let (status, json) = send(
        &app,
        post_json(
            "/reports",
            json!({
                "municipality_codes": ["13104", "14101"],
                "preset": "safety",
                "include": { "education": false }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["fetch_failures"].as_array().unwrap().is_empty());
    assert!(json["results"][0]["data_availability"].get("education").is_none());
}

#[tokio::test]
async fn test_create_report_rejects_bad_requests() {
    let app = create_test_app(scenario_transport());

    let bodies = [
        json!({ "municipality_codes": ["13104"], "preset": "childcare" }),
        json!({ "municipality_codes": ["13104", "14101"], "preset": "retirement" }),
        json!({ "municipality_codes": ["13104", "14101"], "preset": "childcare", "include": { "nightlife": true } }),
        json!({ "municipality_codes": ["13104", "1310x"], "preset": "childcare" }),
    ];

    for body in bodies {
        let (status, json) = send(&app, post_json("/reports", body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn test_upstream_outage_returns_bad_gateway_and_degrades_health() {
    let app = create_test_app(FakeTransport::new().failing_everything(400));

    let (status, json) = send(
        &app,
        post_json(
            "/reports",
            json!({ "municipality_codes": ["13104", "14101"], "preset": "price" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "UPSTREAM_ERROR");

    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert!(json["last_error"].as_str().is_some());
}

#[tokio::test]
async fn test_ranking_endpoint() {
    let app = create_test_app(scenario_transport());

    let (status, json) = send(&app, get("/rankings/childcare")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["preset"], "childcare");
    assert_eq!(json["requested"], 38);
    let ranking = json["ranking"].as_array().unwrap();
    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking[0]["rank"], 1);

    let (status, json) = send(&app, get("/rankings/bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_nearby_cities() {
    let app = create_test_app(scenario_transport());

    let (status, json) = send(&app, get("/municipalities/13104/nearby?radius_km=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["city_name"], "新宿区");
    let cities = json["cities"].as_array().unwrap();
    assert!(!cities.is_empty());
    let distances: Vec<f64> = cities
        .iter()
        .map(|c| c["distance_km"].as_f64().unwrap())
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    assert!(distances.iter().all(|d| *d <= 5.0));
    assert!(cities.iter().all(|c| c["municipality_code"] != "13104"));

    let (status, json) = send(&app, get("/municipalities/13104/nearby?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cities"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_nearby_cities_errors() {
    let app = create_test_app(scenario_transport());

    let (status, json) = send(&app, get("/municipalities/99999/nearby")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, get("/municipalities/abc/nearby")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/municipalities/13104/nearby?radius_km=-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reading_lookup() {
    let app = create_test_app(scenario_transport());

    // しんじゅくく
    let (status, json) = send(
        &app,
        get("/readings/%E3%81%97%E3%82%93%E3%81%98%E3%82%85%E3%81%8F%E3%81%8F"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reading"], "しんじゅくく");
    assert_eq!(json["names"], json!(["新宿区"]));

    // つるみく is shared by two wards
    let (status, json) = send(&app, get("/readings/%E3%81%A4%E3%82%8B%E3%81%BF%E3%81%8F")).await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<String> = serde_json::from_value(json["names"].clone()).unwrap();
    names.sort();
    assert_eq!(names, vec!["大阪市鶴見区", "横浜市鶴見区"]);

    let (status, json) = send(&app, get("/readings/unknown")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["names"], json!([]));
}
