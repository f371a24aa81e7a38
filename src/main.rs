//! agentnet — run and inspect multi-agent delegation networks
//!
//! Usage:
//!   agentnet validate bank.yaml                       → load + print diagnostics
//!   agentnet run bank.yaml --query "Why was my card blocked?"
//!   agentnet run bank.yaml --query "..." --stream     → one JSON event per line
//!   agentnet run bank.yaml --query "..." --eval audit.yaml
//!   agentnet config                                   → print default engine config

use agentnet::DemoCapability;
use agentnet_core::{HandleRequest, HandleResponse, Provenance, SlyData};
use agentnet_engine::{
    CapabilityRegistry, DelegationEngine, EngineConfig, EvaluationOverlay, LoggedInteraction,
};
use agentnet_network::NetworkGraph;
use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentnet",
    about = "Multi-agent delegation networks",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs to a daily file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a network and report structural problems
    Validate {
        /// Network definition (.json, .yaml, .yml)
        network: PathBuf,
    },
    /// Answer one query with the demo capability
    Run {
        network: PathBuf,
        #[arg(short, long)]
        query: String,
        /// Entry node (default: the network's front node)
        #[arg(short, long)]
        front: Option<String>,
        #[arg(short, long, default_value = "cli")]
        session: String,
        /// Engine config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print engine events as they happen
        #[arg(long, default_value_t = false)]
        stream: bool,
        /// Audit the answer with this evaluation network
        #[arg(long)]
        eval: Option<PathBuf>,
    },
    /// Print the engine config as TOML
    Config {
        /// Show this file's effective config instead of the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref(), cli.json)?;

    match cli.command {
        Commands::Validate { network } => validate(&network),
        Commands::Run {
            network,
            query,
            front,
            session,
            config,
            stream,
            eval,
        } => {
            let config = match config {
                Some(path) => EngineConfig::try_load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => EngineConfig::default(),
            };
            let graph = load_graph(&network)?;
            let front = match front {
                Some(f) => f,
                None => graph
                    .front()
                    .map(|n| n.name().to_string())
                    .context("network has no front node; pass --front")?,
            };
            tracing::info!(network = %network.display(), front = %front, "running query");
            let engine = DelegationEngine::with_config(graph, demo_capabilities(), config)?;
            let request = HandleRequest {
                front,
                query: query.clone(),
                session: session.clone(),
                sly: SlyData::new(),
            };

            let response = if stream {
                run_streaming(&engine, request).await?
            } else {
                let response = engine.handle_request(request).await?;
                print_response(&response);
                response
            };

            if let Some(eval) = eval {
                let overlay = EvaluationOverlay::new(DelegationEngine::with_config(
                    load_graph(&eval)?,
                    demo_capabilities(),
                    engine.config().clone(),
                )?);
                let interaction = LoggedInteraction::from_response(query, session.as_str(), &response);
                let report = overlay
                    .evaluate(None, &interaction, &format!("{}-eval", session))
                    .await?;
                println!("\n== evaluation ==\n{}", report.summary());
                print!("{}", report.result.provenance.render_tree());
            }
            Ok(())
        }
        Commands::Config { config } => {
            let config = match config {
                Some(path) => EngineConfig::load(&path),
                None => EngineConfig::default(),
            };
            print!("{}", config.to_toml());
            Ok(())
        }
    }
}

fn init_tracing(log_dir: Option<&Path>, json: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agentnet=info".into());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "agentnet.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn load_graph(path: &Path) -> anyhow::Result<Arc<NetworkGraph>> {
    let graph = NetworkGraph::load_file(path).with_context(|| format!("loading {}", path.display()))?;
    Ok(Arc::new(graph))
}

fn demo_capabilities() -> CapabilityRegistry {
    CapabilityRegistry::uniform(DemoCapability::new())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let graph = load_graph(path)?;
    let front = graph
        .front()
        .map(|n| n.name().to_string())
        .unwrap_or_else(|| "-".into());
    println!("{}: {} nodes, front {}", path.display(), graph.len(), front);
    if graph.diagnostics().is_empty() {
        println!("no problems found");
    }
    for d in graph.diagnostics() {
        println!("  warning: {}", d);
    }
    Ok(())
}

async fn run_streaming(
    engine: &DelegationEngine,
    request: HandleRequest,
) -> anyhow::Result<HandleResponse> {
    let events = engine.handle_stream(request);
    futures::pin_mut!(events);
    let mut response = None;
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        match event {
            agentnet_core::EngineEvent::Finished { response: r } => response = Some(*r),
            agentnet_core::EngineEvent::Failed { message } => anyhow::bail!(message),
            _ => {}
        }
    }
    response.context("stream ended without a response")
}

fn print_response(response: &HandleResponse) {
    println!("{}", response.answer);
    if response.unable_to_help {
        println!("(no specialist could answer)");
    }
    println!("\n== trail ({}ms) ==", response.elapsed_ms);
    let trail: Provenance = response.trail.iter().cloned().collect();
    print!("{}", trail.render_tree());
}
