use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use report_uploader::{
    cli::{parse_error_exit_code, Cli, Command},
    config::RunConfig,
    credentials,
    pipeline::{upload_local_file, Pipeline},
    source::{http_client, HttpFetcher, PhantomLauncher},
    storage::S3ObjectStore,
    types::Settings,
};

enum Job {
    Run(RunConfig),
    Upload { file: PathBuf, key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print()?;
            return Ok(parse_error_exit_code(&e));
        }
    };

    dotenvy::dotenv().ok();

    // Logging is not up yet; `main` prints the error and exits 1
    let settings = Settings::from_env()?;
    let environment = &settings.environment;

    // Use JSON format for staging/production, regular format for development
    if environment.json_logs() {
        fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        fmt().with_env_filter(EnvFilter::from_default_env()).init();
    }

    // Configuration problems are fatal before any network call
    let job = match cli.command() {
        Command::Run { mode } => {
            let mut config = RunConfig::from_env().inspect_err(|e| error!("{e}"))?;
            if let Some(mode) = mode {
                config.mode = mode;
            }
            Job::Run(config)
        }
        Command::Upload { file, key } => Job::Upload { file, key },
    };

    let provider = credentials::provider_from_env().inspect_err(|e| error!("{e}"))?;
    let credentials = provider.load().inspect_err(|e| error!("{e}"))?;
    info!(
        "Using bucket {} in {} ({:?})",
        credentials.bucket_name, credentials.region, environment
    );

    let s3_client = Arc::new(S3Client::from_conf(
        settings.s3_client_config(&credentials).await,
    ));
    let store = S3ObjectStore::new(s3_client, credentials.bucket_name.clone());

    match job {
        Job::Upload { file, key } => {
            upload_local_file(&store, &file, &key).await?;
            Ok(ExitCode::SUCCESS)
        }
        Job::Run(config) => {
            let http = http_client(settings.http_timeout)?;
            let fetcher = HttpFetcher::new(http.clone());
            let launcher = PhantomLauncher::new(http, config.launch.api_base_url.clone());

            let summary = Pipeline::new(&config, &credentials, &fetcher, &launcher, &store)
                .run(Utc::now())
                .await
                .inspect_err(|e| error!("{e}"))?;

            Ok(summary.exit_code())
        }
    }
}
