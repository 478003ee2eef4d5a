//! Price Server
//!
//! Serves an in-memory catalog of AWS and Alibaba Cloud instance prices,
//! kept fresh by per-provider refresh schedulers.

use clap::{Parser, Subcommand};
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use domain_pricing::{CloudProvider, MirrorClient, MirrorConfig};
use eyre::{bail, Result, WrapErr};
use std::path::PathBuf;
use tracing::info;

mod config;
mod providers;
mod seed;
mod server;
mod shutdown;
mod snapshot;

use config::Config;

#[derive(Parser)]
#[command(name = "price-server")]
#[command(about = "Cloud instance price catalog for AWS and Alibaba Cloud")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the price API (default)
    Serve,

    /// Refresh on-demand and commitment prices once and write seed files
    Snapshot {
        /// Directory receiving aws_price.json and alibabacloud_price.json
        #[arg(short, long, default_value = "builtin-data")]
        output_dir: PathBuf,
    },

    /// Mirror a remote price server and print one instance record
    Query {
        /// Base URL of the remote price server
        #[arg(short, long)]
        endpoint: String,

        #[arg(short, long, default_value = "aws")]
        provider: CloudProvider,

        /// Mirror a single region instead of the whole catalog
        #[arg(short, long)]
        region: Option<String>,

        #[arg(long)]
        lookup_region: String,

        #[arg(long)]
        instance_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let cli = Cli::parse();
    let environment = Environment::from_env();
    init_tracing(&environment);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            observability::init_metrics();
            let config = Config::from_env().wrap_err("Invalid configuration")?;
            info!(address = %config.server.address(), "Starting price server");
            server::serve(config).await
        }

        Commands::Snapshot { output_dir } => {
            let config = Config::from_env().wrap_err("Invalid configuration")?;
            snapshot::snapshot(config, &output_dir).await
        }

        Commands::Query {
            endpoint,
            provider,
            region,
            lookup_region,
            instance_type,
        } => {
            let mut mirror_config = MirrorConfig::new(endpoint, provider);
            if let Some(region) = region {
                mirror_config = mirror_config.with_region(region);
            }
            let (mirror, _refresh_loop) = MirrorClient::connect(mirror_config)
                .await
                .wrap_err("Failed to load the remote price catalog")?;

            match mirror.get_instance_price(&lookup_region, &instance_type).await {
                Some(price) => {
                    println!("{}", serde_json::to_string_pretty(&price)?);
                    Ok(())
                }
                None => bail!("No {provider} price for {instance_type} in {lookup_region}"),
            }
        }
    }
}
