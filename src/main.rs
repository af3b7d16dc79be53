//! echox command line: share recorded notes to X as narrated video threads.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use echox::config::{Config, ConfigError, save_access_token};
use echox::domain::{AccountTier, plan_for_tier};
use echox::logging;
use echox::media::{AudioError, PcmFormat, pcm_to_wav};
use echox::services::error::TransportError;
use echox::services::{
    ApiError, CancelFlag, ProgressEvent, PublishFailure, SharePart, StaticTokenProvider,
    StoredTokenProvider, ThreadPublisher, TokenProvider, XClient,
};
use echox::share::{ShareError, SharePipeline, ShareRequest};

#[derive(Debug, Parser)]
#[command(name = "echox", version, about = "Publish recorded audio notes to X as video threads")]
struct Cli {
    /// Config file, defaults to ~/.config/echox.json
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Access token, overrides the stored one
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print progress and results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split, render and publish one recording
    Share(ShareArgs),
    /// Publish already rendered videos as a thread
    Post(PostArgs),
    /// Show how a recording of the given length would be split
    Plan {
        duration_ms: u64,
        #[arg(long, value_enum, default_value_t = TierArg::Standard)]
        tier: TierArg,
    },
    /// Wrap raw 16-bit PCM capture data in a WAV file
    Wav {
        pcm: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,
        #[arg(long, default_value_t = 1)]
        channels: u16,
    },
    /// Show the signed-in account and its tier
    Whoami,
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Debug, Args)]
struct ShareArgs {
    /// Recording as WAV
    recording: PathBuf,
    #[arg(long)]
    image: PathBuf,
    /// Rendered video of the whole recording, reused when no split is needed
    #[arg(long)]
    preview: Option<PathBuf>,
    #[arg(long)]
    caption: Option<String>,
    /// Looked up from the account when omitted
    #[arg(long, value_enum)]
    tier: Option<TierArg>,
}

#[derive(Debug, Args)]
struct PostArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    #[arg(long)]
    text: Option<String>,
}

#[derive(Debug, Subcommand)]
enum TokenCommand {
    /// Store an access token in the config file
    Set {
        token: String,
        /// RFC 3339 expiry, e.g. 2026-11-01T00:00:00Z
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TierArg {
    Standard,
    Premium,
}

impl From<TierArg> for AccountTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Standard => AccountTier::Standard,
            TierArg::Premium => AccountTier::Premium,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Publish(#[from] PublishFailure),

    #[error("not signed in; run `echox token set <token>` or set ECHOX_ACCESS_TOKEN")]
    NotAuthenticated,

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    fn publish_failure(&self) -> Option<&PublishFailure> {
        match self {
            CliError::Publish(failure) | CliError::Share(ShareError::Publish(failure)) => {
                Some(failure)
            }
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cancel = CancelFlag::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            watcher.cancel();
        }
    });

    let json = cli.json;
    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            if let Some(failure) = err.publish_failure() {
                report_partial(failure, json);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: CancelFlag) -> Result<(), CliError> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match cli.command {
        Command::Plan { duration_ms, tier } => plan(duration_ms, tier.into(), cli.json),
        Command::Wav {
            pcm,
            output,
            sample_rate,
            channels,
        } => {
            let format = PcmFormat {
                sample_rate,
                channels,
            };
            let duration_ms =
                tokio::task::spawn_blocking(move || pcm_to_wav(&pcm, &output, format))
                    .await
                    .map_err(ShareError::from)??;
            print_value(cli.json, &serde_json::json!({ "duration_ms": duration_ms }), || {
                format!("wrote {duration_ms}ms of audio")
            })
        }
        Command::Token(TokenCommand::Set { token, expires_at }) => {
            save_access_token(&path, &token, expires_at)?;
            println!("token saved to {}", path.display());
            Ok(())
        }
        Command::Whoami => {
            let config = Config::load_at(&path)?;
            let token = access_token(&config, cli.token.as_deref())?;
            let user = XClient::open(&config)?.get_me(&token).await?;
            let tier = user.tier();
            print_value(cli.json, &user, || {
                format!("@{} ({}), {:?} tier", user.username, user.name, tier)
            })
        }
        Command::Share(args) => {
            let config = Config::load_at(&path)?;
            share(&config, args, cli.token.as_deref(), cancel, cli.json).await
        }
        Command::Post(args) => {
            let config = Config::load_at(&path)?;
            post(&config, args, cli.token.as_deref(), cancel, cli.json).await
        }
    }
}

fn token_provider(config: &Config, token: Option<&str>) -> Box<dyn TokenProvider> {
    match token {
        Some(token) => Box::new(StaticTokenProvider::new(token)),
        None => Box::new(StoredTokenProvider::from_config(config)),
    }
}

fn access_token(config: &Config, token: Option<&str>) -> Result<String, CliError> {
    token_provider(config, token)
        .access_token()
        .ok_or(CliError::NotAuthenticated)
}

fn plan(duration_ms: u64, tier: AccountTier, json: bool) -> Result<(), CliError> {
    let segments = plan_for_tier(duration_ms, tier);
    if json {
        println!("{}", serde_json::to_string(&segments)?);
        return Ok(());
    }
    for segment in &segments {
        println!(
            "{:>5}  {}ms..{}ms  ({}ms)",
            segment.label(),
            segment.start_offset_ms,
            segment.end_offset_ms(),
            segment.duration_ms
        );
    }
    Ok(())
}

async fn share(
    config: &Config,
    args: ShareArgs,
    token: Option<&str>,
    cancel: CancelFlag,
    json: bool,
) -> Result<(), CliError> {
    let tokens = token_provider(config, token);
    let access_token = tokens.access_token().ok_or(CliError::NotAuthenticated)?;

    let tier = match args.tier {
        Some(tier) => tier.into(),
        None => detect_tier(config, &access_token).await?,
    };

    let pipeline = SharePipeline::from_config(config, cancel)?;
    let request = ShareRequest {
        recording: args.recording,
        image: args.image,
        preview: args.preview,
        caption: args.caption,
        tier,
    };

    let report = pipeline
        .share_recording(&request, tokens.as_ref(), &progress_printer(json))
        .await?;

    print_value(json, &report, || {
        let first = report.thread.first_post_id().unwrap_or("-");
        format!(
            "{} part(s) {}, thread starts at {first}",
            report.thread.posts.len(),
            report.status.as_str()
        )
    })
}

/// Falls back to the standard ceiling when the account lookup fails.
async fn detect_tier(config: &Config, access_token: &str) -> Result<AccountTier, CliError> {
    match XClient::open(config)?.get_me(access_token).await {
        Ok(user) => {
            info!("[share] @{} is {:?}", user.username, user.tier());
            Ok(user.tier())
        }
        Err(err) => {
            warn!("[share] account lookup failed, using standard tier: {err}");
            Ok(AccountTier::Standard)
        }
    }
}

async fn post(
    config: &Config,
    args: PostArgs,
    token: Option<&str>,
    cancel: CancelFlag,
    json: bool,
) -> Result<(), CliError> {
    let access_token = access_token(config, token)?;
    let total = args.files.len();
    let parts: Vec<SharePart> = args
        .files
        .into_iter()
        .enumerate()
        .map(|(i, file)| {
            let suffix = (total > 1).then(|| format!(" ({}/{total})", i + 1));
            SharePart::new(file, suffix)
        })
        .collect();
    let text = args.text.unwrap_or_else(|| config.default_caption.clone());

    let publisher = ThreadPublisher::new(XClient::open(config)?)
        .with_retry(config.retry_policy())
        .with_strategy(config.status_strategy)
        .with_cancel(cancel);
    let thread = publisher
        .publish(&parts, &text, &access_token, &progress_printer(json))
        .await?;

    print_value(json, &thread, || {
        thread
            .posts
            .iter()
            .map(|p| p.post_id.as_str())
            .collect::<Vec<_>>()
            .join(" <- ")
    })
}

fn progress_printer(json: bool) -> impl Fn(ProgressEvent) + Send + Sync {
    move |event: ProgressEvent| {
        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
        } else if event.is_milestone() {
            eprintln!("{event}");
        }
    }
}

fn print_value<T, F>(json: bool, value: &T, human: F) -> Result<(), CliError>
where
    T: Serialize,
    F: FnOnce() -> String,
{
    if json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

fn report_partial(failure: &PublishFailure, json: bool) {
    if json {
        let value = serde_json::json!({
            "status": "partial_failed",
            "failed_part": failure.index + 1,
            "total": failure.total,
            "phase": failure.phase.to_string(),
            "error": failure.source.to_string(),
            "posts": failure.posts,
        });
        println!("{value}");
        return;
    }
    if failure.posts.is_empty() {
        eprintln!("nothing was posted");
        return;
    }
    eprintln!("posts left up on X:");
    for post in &failure.posts {
        eprintln!("  {}", post.post_id);
    }
}
