//! Face-swap worker binary.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use faceswap_media::{check_tools, default_sink};
use faceswap_models::{MediaKind, SwapForm};
use faceswap_worker::{StagingLayout, SwapPipeline, UploadSet, UploadedFile, WorkerConfig};

#[derive(Parser)]
#[command(name = "faceswap-worker", version, about = "Replace faces in a video or image")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one swap request and print the response as JSON
    Process(ProcessArgs),

    /// Delete staged requests and cached videos past the retention period
    Purge,

    /// Report which external tools are available
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Video,
    Image,
}

impl From<Kind> for MediaKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Video => MediaKind::Video,
            Kind::Image => MediaKind::Image,
        }
    }
}

#[derive(clap::Args)]
struct ProcessArgs {
    /// Target media kind
    #[arg(long, value_enum)]
    kind: Kind,

    /// Target URL, or the name of an uploaded file
    #[arg(long)]
    target: String,

    /// Comma separated source faces (URL, timestamp, or uploaded file name)
    #[arg(long)]
    sources: String,

    /// Comma separated target faces, paired with sources by position
    #[arg(long)]
    targets: Option<String>,

    /// Trim start, [H:][M:]S[.fff]
    #[arg(long)]
    start: Option<String>,

    /// Trim end, [H:][M:]S[.fff]
    #[arg(long)]
    end: Option<String>,

    #[arg(long)]
    super_resolution: bool,

    /// Local files made available as uploads, referenced by file name
    #[arg(long = "upload")]
    uploads: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required for HTTPS image fetches)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    match cli.command {
        Commands::Process(args) => process(config, args).await,
        Commands::Purge => {
            let report = StagingLayout::new(&config.root_path)
                .purge_older_than(config.retention)
                .await?;
            println!(
                "purged {} request(s), {} cached video(s)",
                report.requests, report.cached_videos
            );
            Ok(())
        }
        Commands::Check => check(&config),
    }
}

fn init_tracing() -> Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("faceswap=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn process(config: WorkerConfig, args: ProcessArgs) -> Result<()> {
    let pipeline = SwapPipeline::from_config(config, default_sink())?;

    // Start-up purge keeps the staging root bounded between runs.
    if let Err(e) = pipeline
        .layout()
        .purge_older_than(pipeline.config().retention)
        .await
    {
        warn!("Start-up purge failed: {}", e);
    }

    let mut files = Vec::with_capacity(args.uploads.len());
    for path in &args.uploads {
        let file = UploadedFile::from_path(path)
            .await
            .with_context(|| format!("reading upload {}", path.display()))?;
        files.push(file);
    }
    let uploads = UploadSet::new(files);

    let form = SwapForm {
        target_media: Some(args.target),
        source_faces: Some(args.sources),
        target_faces: args.targets,
        target_start_time: args.start,
        target_end_time: args.end,
        super_resolution: args.super_resolution,
    };
    let request = form.into_request(
        args.kind.into(),
        uploads.total_bytes(),
        pipeline.config().max_upload_bytes,
    )?;

    let result = pipeline.process(&request, &uploads).await?;
    let response = result.to_response(&request.id);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.success {
        std::process::exit(2);
    }
    Ok(())
}

fn check(config: &WorkerConfig) -> Result<()> {
    let mut missing = Vec::new();
    for tool in check_tools(["ffmpeg", "ffprobe", config.ytdlp_tool.as_str()]) {
        match &tool.path {
            Some(path) => println!("{}: {}", tool.name, path.display()),
            None => {
                println!("{}: not found", tool.name);
                missing.push(tool.name);
            }
        }
    }
    if !missing.is_empty() {
        anyhow::bail!("missing tools: {}", missing.join(", "));
    }
    println!("check: ok");
    Ok(())
}
