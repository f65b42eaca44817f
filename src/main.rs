//! CLI entrypoint: resolve credentials, dispatch one workflow, publish the
//! products. Every failure surfaces as a readable message and a non-zero
//! exit status.
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hyp3_autorift::credentials::{self, ExplicitCredentials};
use hyp3_autorift::processing::{IsceProcessor, ProcessorConfig};
use hyp3_autorift::publish::{self, UploadTarget};
use hyp3_autorift::workflow::{self, RemoteStager, Workflow};

#[derive(Parser)]
#[command(
    name = "hyp3-autorift",
    version,
    about = "Dense feature tracking and geogridding with autoRIFT and ISCE2"
)]
struct CliArgs {
    /// AWS bucket to upload product files to
    #[arg(long)]
    bucket: Option<String>,

    /// AWS prefix (location in bucket) to add to product files
    #[arg(long, default_value = "")]
    bucket_prefix: String,

    /// Username for ESA's Copernicus Data Space Ecosystem
    #[arg(long)]
    esa_username: Option<String>,

    /// Password for ESA's Copernicus Data Space Ecosystem
    #[arg(long)]
    esa_password: Option<String>,

    /// Optional TOML file naming the external processing entry points
    #[arg(long)]
    processor_config: Option<PathBuf>,

    /// Workflow to run (hyp3_autorift or s1_correction)
    workflow: String,

    /// Arguments for the selected workflow
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = CliArgs::parse();
    let workflow: Workflow = cli.workflow.parse()?;

    let explicit = ExplicitCredentials {
        esa_username: cli.esa_username,
        esa_password: cli.esa_password,
        ..Default::default()
    };
    let bundle = credentials::resolve_from_process_env(&explicit)?;

    let config = ProcessorConfig::load_or_default(cli.processor_config.as_deref())?;
    let stager = RemoteStager::new();
    let processor = IsceProcessor::new(config);
    let workdir = std::env::current_dir()?;

    let outputs =
        workflow::dispatch(workflow, &cli.args, &bundle, &stager, &processor, &workdir).await?;
    for output in &outputs {
        info!(path = %output.display(), "produced");
    }

    let target = cli.bucket.map(|bucket| UploadTarget {
        bucket,
        prefix: cli.bucket_prefix,
    });
    publish::publish(&outputs, target.as_ref(), &workdir).await?;

    Ok(())
}
