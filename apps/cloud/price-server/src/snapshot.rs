//! Snapshot mode: regenerate the builtin seed files.
//!
//! Each provider starts from its current seed, runs the slow-moving
//! refreshes once (on-demand, plus savings plans for AWS) and writes the
//! resulting catalog under the seed file name.

use domain_pricing::{CloudProvider, PriceRefresher, PriceStore, RegionTypeKey};
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::providers::{AlibabaCloudPriceClient, AwsPriceClient, RpcAlibabaCloudApi, SdkAwsApi};
use crate::seed::seed_file_name;
use crate::server::seeded_store;

pub async fn snapshot(config: Config, output_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .wrap_err_with(|| format!("Failed to create {}", output_dir.display()))?;

    let aws = AwsPriceClient::new(
        SdkAwsApi::new(config.aws.clone()),
        seeded_store(CloudProvider::Aws, &config.seeds)?,
        config.refresh.region_concurrency,
    );
    aws.refresh_on_demand(&RegionTypeKey::all()).await;
    aws.refresh_commitment_plans(&RegionTypeKey::all()).await;
    write_snapshot(CloudProvider::Aws, aws.store(), output_dir).await?;

    let alibaba_api = RpcAlibabaCloudApi::new(config.alibaba_cloud.credentials.clone())
        .wrap_err("Invalid Alibaba Cloud credentials")?;
    let alibaba = AlibabaCloudPriceClient::connect(
        alibaba_api,
        seeded_store(CloudProvider::AlibabaCloud, &config.seeds)?,
        config.refresh.region_concurrency,
        config.refresh.instance_concurrency,
    )
    .await
    .wrap_err("Failed to initialize Alibaba Cloud price client")?;
    alibaba.refresh_on_demand(&RegionTypeKey::all()).await;
    write_snapshot(CloudProvider::AlibabaCloud, alibaba.store(), output_dir).await?;

    Ok(())
}

/// Write the catalog of `store` as the seed file of `provider`
pub async fn write_snapshot(provider: CloudProvider, store: &PriceStore, output_dir: &Path) -> Result<PathBuf> {
    let bytes = store
        .snapshot_json()
        .await
        .wrap_err_with(|| format!("Failed to encode {provider} catalog"))?;
    let path = output_dir.join(seed_file_name(provider));
    tokio::fs::write(&path, &bytes)
        .await
        .wrap_err_with(|| format!("Failed to write {}", path.display()))?;

    let stats = store.stats().await;
    info!(
        provider = %provider,
        path = %path.display(),
        regions = stats.regions,
        instance_types = stats.instance_types,
        "Price snapshot written"
    );
    Ok(path)
}
