//! `council`: command-line and JSON-lines front end for the routing engine.
//!
//! stdout carries only JSON; logs go to stderr.

mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use council_engine::{
    CouncilEngine, EngineConfig, EngineReply, RouteRequest, RoutingStats, Specialist as _,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "council", version, about = "Route prompts to a council of specialists")]
struct Args {
    /// Engine configuration file
    #[arg(long, env = "COUNCIL_CONFIG", default_value = "council.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route one prompt and print the reply
    Ask {
        #[arg(long)]
        prompt: String,

        /// Specialists to dispatch (defaults to routing.default_top_k)
        #[arg(long)]
        top_k: Option<usize>,

        /// Bypass classification with these specialists, in order
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<String>,

        #[arg(long)]
        session: Option<String>,
    },

    /// Read one JSON request per line from stdin, write one JSON reply per line
    Serve,

    /// Validate the configuration and print the resulting council
    CheckConfig,

    /// Route every prompt in a file (or stdin), then print aggregate stats
    Stats {
        /// One prompt per line; `-` reads stdin
        #[arg(long, default_value = "-")]
        prompts: String,
    },
}

#[derive(Serialize)]
struct CouncilSummary<'a> {
    specialists: Vec<&'a str>,
    general: &'a str,
    cloud_tiers: Vec<&'a str>,
    default_top_k: usize,
    daily_cap_cents: f64,
    request_cap_cents: f64,
}

fn load_engine(path: &Path) -> Result<(EngineConfig, CouncilEngine)> {
    let config = EngineConfig::from_file(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    let engine = CouncilEngine::from_config(&config).context("building specialist council")?;
    Ok((config, engine))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn ask(
    engine: &CouncilEngine,
    prompt: String,
    top_k: Option<usize>,
    candidates: Vec<String>,
    session: Option<String>,
) -> Result<()> {
    let request = RouteRequest {
        prompt,
        session_id: session,
        candidate_specialists: (!candidates.is_empty()).then_some(candidates),
        top_k,
    };
    let reply = EngineReply::from(engine.handle(request).await);
    print_json(&reply)
}

async fn read_prompts(source: &str) -> Result<Vec<String>> {
    let raw = if source == "-" {
        let mut raw = String::new();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            raw.push_str(&line);
            raw.push('\n');
        }
        raw
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("reading prompts from {source}"))?
    };
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

async fn stats(engine: CouncilEngine, source: &str) -> Result<()> {
    let prompts = read_prompts(source).await?;
    let stats = Arc::new(RoutingStats::new());
    let collector = stats.spawn_collector(engine.events());

    for prompt in prompts {
        if let Err(e) = engine.handle(RouteRequest::new(prompt)).await {
            warn!(request_id = e.request_id(), status = e.status(), "Prompt failed");
        }
    }

    // Dropping the engine closes the bus; the collector drains and exits.
    drop(engine);
    collector.await.context("stats collector")?;
    print_json(&stats.snapshot())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, engine) = load_engine(&args.config)?;

    match args.command {
        Command::Ask {
            prompt,
            top_k,
            candidates,
            session,
        } => ask(&engine, prompt, top_k, candidates, session).await,
        Command::Serve => {
            let stdin = BufReader::new(tokio::io::stdin());
            serve::serve(engine, stdin, tokio::io::stdout()).await.map(drop)
        }
        Command::CheckConfig => {
            let registry = engine.registry();
            let cloud_tiers = config.cloud.iter().map(|c| c.name.as_str()).collect();
            print_json(&CouncilSummary {
                specialists: registry.names(),
                general: registry.general().name(),
                cloud_tiers,
                default_top_k: config.routing.default_top_k,
                daily_cap_cents: config.budget.daily_cap_cents,
                request_cap_cents: config.budget.request_cap_cents,
            })
        }
        Command::Stats { prompts } => stats(engine, &prompts).await,
    }
}
