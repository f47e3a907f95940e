use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use placetrack::analytics::builders::{bookmark_request, click_request, like_request};
use placetrack::analytics::{
    PageContext, StdoutSink, TrackRequest, TrackerContext, TrackerOverrides,
};
use placetrack::config::{StaticConfig, get_config, init_config};
use placetrack::errors::TrackerError;
use placetrack::identity::{MemoryCredentialStore, StoredCredentialResolver};
use placetrack::runtime::lifetime::shutdown::{destroy_with_timeout, listen_for_shutdown};
use placetrack::system::init_logging;

#[derive(Parser, Debug)]
#[command(name = "placetrack", version, about = "Send place interactions to a collection endpoint")]
struct Cli {
    /// Configuration file (default: config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Explicit user id, overrides stored credentials
    #[arg(long, global = true)]
    user_id: Option<String>,

    /// Page URL recorded with each action
    #[arg(long, global = true, default_value = "")]
    page_url: String,

    /// Referrer recorded with each action
    #[arg(long, global = true, default_value = "")]
    referrer: String,

    /// Override tracker.collection_server_url
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Print batches to stdout instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Diagnostic logging of tracker lifecycle and send outcomes
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track an attraction view
    Click {
        place_id: String,
        /// Extra detail as a JSON object
        #[arg(long)]
        detail: Option<String>,
    },
    /// Track a like (or unlike with --unliked)
    Like {
        place_id: String,
        #[arg(long)]
        unliked: bool,
        #[arg(long)]
        detail: Option<String>,
    },
    /// Track a bookmark (or removal with --removed)
    Bookmark {
        place_id: String,
        #[arg(long)]
        removed: bool,
        #[arg(long)]
        detail: Option<String>,
    },
    /// Track JSON lines ({"kind":"click","place_id":"museum_1",...}) from a file or stdin
    Replay {
        #[arg(default_value = "-")]
        input: String,
    },
    /// Print or write a sample configuration file
    ConfigGen {
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<TrackerError>() {
            Some(err) => eprintln!("{}", err.format_colored()),
            None => eprintln!("[ERROR] {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::ConfigGen { output } = &cli.command {
        return config_gen(output.as_deref());
    }

    init_config(cli.config.as_deref());
    let config = get_config();
    let _log_guard = init_logging(&config.logging);

    let identity = Arc::new(StoredCredentialResolver::from_config(
        &config.identity,
        Arc::new(MemoryCredentialStore::new()),
    ));
    let context = if cli.dry_run {
        TrackerContext::with_sink_factory(identity, |_| StdoutSink::arc())
    } else {
        TrackerContext::new(identity)
    };

    let tracker = context.initialize(TrackerOverrides {
        collection_server_url: cli.endpoint.clone(),
        debug: cli.debug.then_some(true),
        ..TrackerOverrides::default()
    });
    tracker.set_page_context(PageContext {
        page_url: cli.page_url.clone(),
        user_agent: format!("placetrack/{}", env!("CARGO_PKG_VERSION")),
        referrer: cli.referrer.clone(),
    });
    if let Some(user_id) = &cli.user_id {
        tracker.set_current_user_id(Some(user_id.clone()));
    }
    debug!("Tracking session {}", tracker.session_id());

    let outcome = match cli.command {
        Command::Click { place_id, detail } => {
            parse_detail(detail.as_deref())
                .map(|extra| context.track(click_request(place_id, extra)))
        }
        Command::Like {
            place_id,
            unliked,
            detail,
        } => parse_detail(detail.as_deref())
            .map(|extra| context.track(like_request(place_id, !unliked, extra))),
        Command::Bookmark {
            place_id,
            removed,
            detail,
        } => parse_detail(detail.as_deref())
            .map(|extra| context.track(bookmark_request(place_id, !removed, extra))),
        Command::Replay { input } => tokio::select! {
            res = replay(&context, &input) => res,
            _ = listen_for_shutdown(&context) => Ok(()),
        },
        Command::ConfigGen { .. } => Ok(()),
    };

    destroy_with_timeout(&context).await;

    let undelivered = tracker.pending_len();
    outcome?;
    if undelivered > 0 {
        return Err(TrackerError::delivery(format!(
            "{} actions could not be delivered to {}",
            undelivered,
            tracker.options().collection_server_url
        ))
        .into());
    }
    Ok(())
}

fn parse_detail(detail: Option<&str>) -> Result<Option<Map<String, Value>>> {
    detail
        .map(|raw| {
            serde_json::from_str::<Map<String, Value>>(raw).map_err(|e| {
                anyhow::Error::from(TrackerError::validation(format!(
                    "--detail must be a JSON object: {}",
                    e
                )))
            })
        })
        .transpose()
}

/// 逐行读取并入队，无法解析的行跳过
async fn replay(context: &TrackerContext, input: &str) -> Result<()> {
    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(input)
                .await
                .map_err(TrackerError::from)
                .with_context(|| format!("Failed to open {}", input))?,
        )
    };

    let mut lines = BufReader::new(reader).lines();
    let (mut tracked, mut skipped) = (0usize, 0usize);
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TrackRequest>(line) {
            Ok(request) => {
                context.track(request);
                tracked += 1;
            }
            Err(e) => {
                warn!("Skipping invalid line: {}", e);
                skipped += 1;
            }
        }
    }

    info!("Replay finished: {} tracked, {} skipped", tracked, skipped);
    Ok(())
}

fn config_gen(output: Option<&str>) -> Result<()> {
    match output {
        Some(path) => {
            StaticConfig::default().save_to_file(path)?;
            println!("Sample configuration written to {}", path);
        }
        None => print!("{}", StaticConfig::generate_sample_config()),
    }
    Ok(())
}
