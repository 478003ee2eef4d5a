//! HTTP handlers for the price catalog read API

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::collections::BTreeMap;
use utoipa::OpenApi;

use crate::client::PriceClient;
use crate::error::{PricingError, PricingResult};
use crate::models::{Arch, CloudProvider, CommitmentRate, InstanceTypePrice, PriceCatalog, RegionalInstancePrice};

/// Message answered by the health endpoint
pub const HEALTHY_MESSAGE: &str = "Price Server is healthy";

/// OpenAPI documentation for the price API
#[derive(OpenApi)]
#[openapi(
    paths(list_regions_price, get_region_price, get_instance_type_price),
    components(schemas(InstanceTypePrice, RegionalInstancePrice, CommitmentRate, Arch)),
    tags((name = "price", description = "Cloud instance price catalog"))
)]
pub struct ApiDoc;

/// Typed handles to the provider clients served over HTTP
#[derive(Debug, Clone)]
pub struct PriceApiState {
    pub aws: PriceClient,
    pub alibaba_cloud: PriceClient,
}

/// Create the price router for both providers plus the health endpoint
pub fn router(state: PriceApiState) -> Router {
    Router::new()
        .nest(CloudProvider::Aws.api_prefix(), provider_router(state.aws))
        .nest(
            CloudProvider::AlibabaCloud.api_prefix(),
            provider_router(state.alibaba_cloud),
        )
        .route("/healthz", get(healthz))
}

/// Read routes of a single provider client
pub fn provider_router(client: PriceClient) -> Router {
    Router::new()
        .route("/price", get(list_regions_price))
        .route("/regions/{region}/price", get(get_region_price))
        .route(
            "/regions/{region}/types/{instance_type}/price",
            get(get_instance_type_price),
        )
        .with_state(client)
}

async fn healthz() -> &'static str {
    HEALTHY_MESSAGE
}

/// Prices of every region
#[utoipa::path(
    get,
    path = "/price",
    tag = "price",
    responses(
        (status = 200, description = "Whole price catalog keyed by region", body = BTreeMap<String, RegionalInstancePrice>)
    )
)]
async fn list_regions_price(State(client): State<PriceClient>) -> Json<PriceCatalog> {
    Json(client.list_regions_instances_price().await)
}

/// Prices of one region, keyed by the region name
#[utoipa::path(
    get,
    path = "/regions/{region}/price",
    tag = "price",
    params(("region" = String, Path, description = "Region name")),
    responses(
        (status = 200, description = "Region prices", body = BTreeMap<String, RegionalInstancePrice>),
        (status = 404, description = "Region not in the catalog")
    )
)]
async fn get_region_price(
    State(client): State<PriceClient>,
    Path(region): Path<String>,
) -> PricingResult<Json<BTreeMap<String, RegionalInstancePrice>>> {
    let prices = client
        .list_instances_price(&region)
        .await
        .ok_or_else(|| PricingError::NotFound(region.clone()))?;
    Ok(Json(BTreeMap::from([(region, prices)])))
}

/// Price record of one instance type.
///
/// A miss answers 404 and, for providers with lazy backfill, queues a
/// refresh so a later call may succeed.
#[utoipa::path(
    get,
    path = "/regions/{region}/types/{instance_type}/price",
    tag = "price",
    params(
        ("region" = String, Path, description = "Region name"),
        ("instance_type" = String, Path, description = "Instance type name")
    ),
    responses(
        (status = 200, description = "Instance type price", body = InstanceTypePrice),
        (status = 404, description = "Not fetched yet or unknown")
    )
)]
async fn get_instance_type_price(
    State(client): State<PriceClient>,
    Path((region, instance_type)): Path<(String, String)>,
) -> PricingResult<Json<InstanceTypePrice>> {
    client
        .get_instance_price(&region, &instance_type)
        .await
        .map(Json)
        .ok_or_else(|| PricingError::NotFound(format!("{region}/{instance_type}")))
}
