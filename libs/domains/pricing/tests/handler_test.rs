//! Handler tests for the price read API
//!
//! These tests drive the router with in-memory stores:
//! - Response shapes and JSON field names
//! - 404 with an empty body on misses
//! - Lazy refresh requests raised by the instance type endpoint

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use domain_pricing::*;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt; // For oneshot()

const AWS_SEED: &str = r#"{
    "us-east-2": {
        "instanceTypePrices": {
            "t2.xlarge": {
                "arch": "amd64",
                "vcpu": 4,
                "memory": 16,
                "onDemandPricePerHour": 0.1856,
                "spotPricePerHour": {"us-east-2a": 0.07}
            }
        }
    }
}"#;

const ALIBABA_SEED: &str = r#"{
    "cn-hangzhou": {
        "instanceTypePrices": {
            "ecs.g8y.large": {"arch": "arm64", "vcpu": 2, "memory": 8, "onDemandPricePerHour": 0.45}
        }
    }
}"#;

fn app_with_triggers() -> (Router, TriggerReceiver) {
    let (queue, receiver) = trigger_queue(DEFAULT_TRIGGER_CAPACITY);
    let aws = PriceClient::new(CloudProvider::Aws, PriceStore::from_seed(AWS_SEED.as_bytes()).unwrap())
        .with_lazy_backfill(queue);
    let alibaba_cloud = PriceClient::new(
        CloudProvider::AlibabaCloud,
        PriceStore::from_seed(ALIBABA_SEED.as_bytes()).unwrap(),
    );
    (handlers::router(PriceApiState { aws, alibaba_cloud }), receiver)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_list_all_returns_seed() {
    let (app, _rx) = app_with_triggers();

    let (status, body) = get(app, "/api/v1/aws/ec2/price").await;

    assert_eq!(status, StatusCode::OK);
    let catalog: PriceCatalog = serde_json::from_slice(&body).unwrap();
    let seed: PriceCatalog = serde_json::from_str(AWS_SEED).unwrap();
    assert_eq!(catalog, seed);
}

#[tokio::test]
async fn test_region_endpoint_wraps_region_name() {
    let (app, _rx) = app_with_triggers();

    let (status, body) = get(app, "/api/v1/alibabacloud/ecs/regions/cn-hangzhou/price").await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json["cn-hangzhou"]["instanceTypePrices"]["ecs.g8y.large"]["arch"],
        "arm64"
    );
}

#[tokio::test]
async fn test_instance_type_endpoint_returns_record() {
    let (app, _rx) = app_with_triggers();

    let (status, body) = get(app, "/api/v1/aws/ec2/regions/us-east-2/types/t2.xlarge/price").await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["onDemandPricePerHour"], 0.1856);
    assert_eq!(json["spotPricePerHour"]["us-east-2a"], 0.07);
}

#[tokio::test]
async fn test_unknown_region_is_404_with_empty_body() {
    let (app, _rx) = app_with_triggers();

    let (status, body) = get(app, "/api/v1/aws/ec2/regions/eu-west-9/price").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_instance_miss_is_404_and_queues_refresh() {
    let (app, mut rx) = app_with_triggers();

    let (status, body) = get(app, "/api/v1/aws/ec2/regions/eu-west-9/types/x9.large/price").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    assert_eq!(rx.recv().await, Some(RegionTypeKey::new("eu-west-9", "x9.large")));
}

#[tokio::test]
async fn test_alibaba_miss_does_not_queue_refresh() {
    let (app, mut rx) = app_with_triggers();

    let (status, _) = get(app, "/api/v1/alibabacloud/ecs/regions/cn-hangzhou/types/ecs.g6.large/price").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    // the router (and with it the only sender) is gone, nothing was queued
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_healthz() {
    let (app, _rx) = app_with_triggers();

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, handlers::HEALTHY_MESSAGE.as_bytes());
}
