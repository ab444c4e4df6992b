use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fusion_contracts::fusion::{AspectRatio, FusionMode, FusionParameters, Resolution};
use fusion_contracts::relay::{RelayRequest, RelayResult, RelayTransportKind};
use fusion_engine::config::non_empty_env;
use fusion_engine::media::load_image;
use fusion_engine::{
    build_transport, relay_router, serve, FusionConfig, FusionWorkflow, HttpFusionProvider,
    RelayConfig, RelayState, RelayTransport, WorkflowState,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fusion-rs", version, about = "Image relay and multi-image fusion client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the image relay endpoint.
    Serve(ServeArgs),
    /// Relay one image to the host and print its URL.
    Upload(UploadArgs),
    /// Fuse 2 to 4 images.
    Fuse(FuseArgs),
}

/// Overrides for values otherwise read from `RELAY_*` variables.
#[derive(Debug, clap::Args)]
struct RelayArgs {
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    upload_base: Option<String>,
    #[arg(long)]
    transport: Option<RelayTransportKind>,
    #[arg(long)]
    timeout_secs: Option<f64>,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: SocketAddr,
    #[command(flatten)]
    relay: RelayArgs,
}

#[derive(Debug, Parser)]
struct UploadArgs {
    file: PathBuf,
    #[command(flatten)]
    relay: RelayArgs,
}

#[derive(Debug, Parser)]
struct FuseArgs {
    #[arg(required = true, num_args = 1..)]
    files: Vec<PathBuf>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long, default_value = "blend")]
    mode: FusionMode,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: AspectRatio,
    #[arg(long, default_value = "2k")]
    resolution: Resolution,
    /// Overrides `FUSION_ENDPOINT`.
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    save_dir: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fusion-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    init_tracing();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(async {
        match cli.command {
            Command::Serve(args) => run_serve(args).await,
            Command::Upload(args) => run_upload(args).await,
            Command::Fuse(args) => run_fuse(args).await,
        }
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn relay_config(args: RelayArgs) -> Result<RelayConfig> {
    let cli_key = args.api_key;
    let mut config = RelayConfig::from_lookup(|key| match (key, &cli_key) {
        ("RELAY_API_KEY", Some(api_key)) => Some(api_key.clone()),
        _ => non_empty_env(key),
    })?;
    if let Some(base) = args.upload_base {
        config.upload_base = base.trim().trim_end_matches('/').to_string();
    }
    if let Some(kind) = args.transport {
        config.transport = kind;
    }
    if let Some(secs) = args.timeout_secs {
        if !secs.is_finite() || secs <= 0.0 {
            bail!("--timeout-secs must be positive");
        }
        config.timeout = Duration::from_secs_f64(secs);
    }
    Ok(config)
}

async fn run_serve(args: ServeArgs) -> Result<i32> {
    let config = relay_config(args.relay)?;
    tracing::info!(
        transport = %config.transport,
        upload_base = %config.upload_base,
        timeout_s = config.timeout.as_secs_f64(),
        "relay configured"
    );
    let router = relay_router(RelayState::from_config(&config)?, config.max_body_bytes);
    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    serve(listener, router).await?;
    Ok(0)
}

async fn run_upload(args: UploadArgs) -> Result<i32> {
    let config = relay_config(args.relay)?;
    let image = load_image(args.file.clone()).await?;
    let transport = build_transport(&config)?;
    let request = RelayRequest::from_bytes(&image.bytes, config.api_key.as_str());
    match transport.upload(&request).await {
        RelayResult::Success { url } => {
            println!("{url}");
            Ok(0)
        }
        RelayResult::Failure {
            reason,
            provider_detail,
        } => {
            if let Some(detail) = provider_detail {
                tracing::debug!(%detail, "image host detail");
            }
            eprintln!("Upload failed: {reason}");
            Ok(1)
        }
    }
}

async fn run_fuse(args: FuseArgs) -> Result<i32> {
    let config = match args.endpoint {
        Some(endpoint) => {
            let mut config = FusionConfig::new(endpoint)?;
            config.api_key = non_empty_env("FUSION_API_KEY");
            config
        }
        None => FusionConfig::from_env()?,
    };
    let provider = HttpFusionProvider::new(&config)?;

    let mut workflow = FusionWorkflow::new();
    if let Some(path) = &args.events {
        workflow = workflow.with_session_log(path);
    }
    workflow.set_params(FusionParameters {
        prompt: args.prompt.filter(|prompt| !prompt.trim().is_empty()),
        mode: args.mode,
        aspect_ratio: args.aspect_ratio,
        resolution: args.resolution,
    });

    if let Err(err) = workflow.add_files(&args.files).await {
        eprintln!("{}", workflow.error().map(str::to_string).unwrap_or_else(|| err.to_string()));
        return Ok(1);
    }
    for image in workflow.images() {
        println!("{}  {} ({}, {} bytes)", image.id, image.name, image.mime, image.content.len());
    }

    let outcome = match workflow.submit(&provider).await {
        WorkflowState::Resulted(outcome) => outcome.clone(),
        WorkflowState::Failed(message) => {
            eprintln!("{message}");
            return Ok(1);
        }
        other => bail!("unexpected workflow state after submit: {other:?}"),
    };
    println!("{}", outcome.image_url);
    println!(
        "Mode: {} | Images: {} | {}",
        outcome.params.mode.label(),
        outcome.image_count,
        outcome.params.summary()
    );

    if let Some(dir) = args.save_dir {
        if let Some(action) = workflow.download() {
            let path = action.save_to(&dir, &reqwest::Client::new()).await?;
            println!("saved {}", path.display());
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn fuse_args_parse_generation_parameters() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "fusion-rs",
            "fuse",
            "a.png",
            "b.png",
            "--mode",
            "merge",
            "--aspect-ratio",
            "9:16",
            "--resolution",
            "4k",
            "--prompt",
            "night city",
        ])?;
        let Command::Fuse(args) = cli.command else {
            panic!("expected fuse");
        };
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.mode, FusionMode::Merge);
        assert_eq!(args.aspect_ratio, AspectRatio::Tall);
        assert_eq!(args.resolution, Resolution::FourK);
        assert_eq!(args.prompt.as_deref(), Some("night city"));
        Ok(())
    }

    #[test]
    fn fuse_args_reject_unknown_ratio() {
        let parsed = Cli::try_parse_from(["fusion-rs", "fuse", "a.png", "--aspect-ratio", "5:4"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn relay_flags_override_environment() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "fusion-rs",
            "serve",
            "--api-key",
            "flag-key",
            "--transport",
            "fetch",
            "--upload-base",
            "http://127.0.0.1:9/",
            "--timeout-secs",
            "5",
        ])?;
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = relay_config(args.relay)?;
        assert_eq!(config.api_key, "flag-key");
        assert_eq!(config.transport, RelayTransportKind::Fetch);
        assert_eq!(config.upload_endpoint(), "http://127.0.0.1:9/1/upload");
        assert_eq!(config.timeout, Duration::from_secs(5));
        Ok(())
    }
}
