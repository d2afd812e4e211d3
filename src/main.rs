use analysis_uploader::handlers::ConsoleObserver;
use analysis_uploader::infrastructure::http::setup_orchestrator;
use analysis_uploader::{PipelineConfig, RunOutcome, UploadFile};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Upload a file for analysis and wait for the result",
    long_about = None
)]
struct Args {
    /// File to analyze
    file: PathBuf,

    /// Content type to declare (inferred from the file when omitted)
    #[arg(short = 't', long)]
    content_type: Option<String>,

    /// Polling deadline in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Pause between status requests in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Use the development preset (short timeouts, fast polling)
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analysis_uploader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let env_config = PipelineConfig::from_env();
    let mut config = if args.dev {
        PipelineConfig {
            api_base_url: env_config.api_base_url,
            status_url: env_config.status_url,
            ..PipelineConfig::development()
        }
    } else {
        env_config
    };
    if let Some(secs) = args.timeout_secs {
        config.poll_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = args.interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }

    let file = UploadFile::from_path(&args.file, args.content_type).await?;
    info!(
        "📄 Selected: {} ({} KB, {})",
        file.request.filename,
        file.request.size.div_ceil(1024),
        file.request.effective_content_type()
    );

    let orchestrator = setup_orchestrator(config)?;
    let handle = orchestrator.spawn(file, Arc::new(ConsoleObserver::new()));

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("⌨️  Ctrl+C received, cancelling run...");
            cancel.cancel();
        }
    });

    match handle.outcome().await {
        RunOutcome::Succeeded(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Failed(_) => Ok(ExitCode::FAILURE),
        RunOutcome::Cancelled => Ok(ExitCode::from(130)),
    }
}
