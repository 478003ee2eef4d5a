//! Serve mode: seeded stores, provider schedulers and the HTTP API

use axum::{middleware, routing::get, Json, Router};
use domain_pricing::handlers;
use domain_pricing::{
    trigger_queue, ApiDoc, CloudProvider, PriceApiState, PriceClient, PriceStore, RefreshScheduler,
};
use eyre::{Result, WrapErr};
use observability::{metrics_handler, metrics_middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use utoipa::OpenApi;

use crate::config::{Config, SeedConfig};
use crate::providers::{AlibabaCloudPriceClient, AwsPriceClient, RpcAlibabaCloudApi, SdkAwsApi};
use crate::seed::load_seed;
use crate::shutdown::ShutdownCoordinator;

/// Time the schedulers get to finish an in-flight refresh after shutdown
const SCHEDULER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Store seeded from the configured or embedded snapshot of `provider`
pub fn seeded_store(provider: CloudProvider, seeds: &SeedConfig) -> Result<PriceStore> {
    let bytes = load_seed(provider, seeds)?;
    PriceStore::from_seed(&bytes).wrap_err_with(|| format!("Failed to decode {provider} price seed"))
}

/// Read API plus metrics, OpenAPI document, CORS and compression
pub fn build_router(state: PriceApiState) -> Router {
    handlers::router(state)
        .route("/metrics", get(metrics_handler))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub async fn serve(config: Config) -> Result<()> {
    let aws_store = seeded_store(CloudProvider::Aws, &config.seeds)?;
    let alibaba_store = seeded_store(CloudProvider::AlibabaCloud, &config.seeds)?;

    let aws = AwsPriceClient::new(
        SdkAwsApi::new(config.aws.clone()),
        aws_store.clone(),
        config.refresh.region_concurrency,
    );
    let alibaba_api = RpcAlibabaCloudApi::new(config.alibaba_cloud.credentials.clone())
        .wrap_err("Invalid Alibaba Cloud credentials")?;
    let alibaba = AlibabaCloudPriceClient::connect(
        alibaba_api,
        alibaba_store.clone(),
        config.refresh.region_concurrency,
        config.refresh.instance_concurrency,
    )
    .await
    .wrap_err("Failed to initialize Alibaba Cloud price client")?;

    let (aws_triggers, aws_trigger_rx) = trigger_queue(config.refresh.trigger_capacity);
    let state = PriceApiState {
        aws: PriceClient::new(CloudProvider::Aws, aws_store).with_lazy_backfill(aws_triggers),
        alibaba_cloud: PriceClient::new(CloudProvider::AlibabaCloud, alibaba_store),
    };

    let shutdown = ShutdownCoordinator::new();
    let scheduler_config = config.refresh.scheduler_config();
    let mut schedulers = JoinSet::new();
    schedulers.spawn(
        RefreshScheduler::new(Arc::new(aws), scheduler_config.clone())
            .with_triggers(aws_trigger_rx)
            .run(shutdown.subscribe()),
    );
    schedulers.spawn(RefreshScheduler::new(Arc::new(alibaba), scheduler_config).run(shutdown.subscribe()));

    let signals = shutdown.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    let listener = TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;
    info!(address = %listener.local_addr()?, "Price server listening");

    let graceful = shutdown.clone();
    let served = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { graceful.notified().await })
        .await;

    // Stop the schedulers whether the server ended cleanly or not
    shutdown.shutdown();
    drain(schedulers).await;

    served.wrap_err("HTTP server failed")?;
    info!("Price server stopped");
    Ok(())
}

async fn drain(mut schedulers: JoinSet<()>) {
    let joined = tokio::time::timeout(SCHEDULER_DRAIN_TIMEOUT, async {
        while let Some(result) = schedulers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Refresh scheduler task failed");
            }
        }
    })
    .await;

    if joined.is_err() {
        warn!(
            timeout_secs = SCHEDULER_DRAIN_TIMEOUT.as_secs(),
            "Refresh schedulers did not stop in time, aborting"
        );
        schedulers.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> PriceApiState {
        let seeds = SeedConfig::default();
        PriceApiState {
            aws: PriceClient::new(CloudProvider::Aws, seeded_store(CloudProvider::Aws, &seeds).unwrap()),
            alibaba_cloud: PriceClient::new(
                CloudProvider::AlibabaCloud,
                seeded_store(CloudProvider::AlibabaCloud, &seeds).unwrap(),
            ),
        }
    }

    #[tokio::test]
    async fn test_openapi_document_lists_price_routes() {
        let response = build_router(state())
            .oneshot(Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(doc["paths"].get("/regions/{region}/types/{instance_type}/price").is_some());
    }

    #[tokio::test]
    async fn test_metrics_route_is_served() {
        let response = build_router(state())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let response = build_router(state())
            .oneshot(
                Request::get("/api/v1/aws/ec2/price")
                    .header(header::ORIGIN, "https://dashboard.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_responses_are_compressed_on_request() {
        let response = build_router(state())
            .oneshot(
                Request::get("/api/v1/aws/ec2/price")
                    .header(header::ACCEPT_ENCODING, "gzip")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn test_drain_returns_once_schedulers_stop() {
        let mut schedulers = JoinSet::new();
        schedulers.spawn(async {});
        drain(schedulers).await;
    }
}
