//! ragway CLI: ask questions over local documents through the provider router.
//!
//! Usage:
//!   ragway ask "question" -i docs/   Index documents, answer once
//!   ragway chat -i docs/             Interactive question session
//!   ragway health                    Probe every configured provider
//!   ragway status                    Show configuration and routing policy
//!   ragway onboard                   Create a default configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragway_core::config::Config;
use ragway_core::ingest;
use ragway_core::provider::registry_from_config;
use ragway_core::rag::{Language, QueryRequest, RagPipeline};
use ragway_core::router::{Router, Strategy};
use ragway_core::store::{RouterEmbedder, VectorStore};

#[derive(Parser)]
#[command(
    name = "ragway",
    version,
    about = "Retrieval-augmented answers routed across LLM providers",
    long_about = "ragway indexes local documents in memory and answers questions from them,\nrouting each request across the configured LLM providers."
)]
struct Cli {
    /// Config file (default: ~/.ragway/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents, then answer one question
    Ask {
        question: String,

        /// Files or directories to index first (.jsonl or plain text)
        #[arg(short, long = "ingest")]
        ingest: Vec<PathBuf>,

        #[command(flatten)]
        query: QueryArgs,

        /// Print the full answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive question session
    Chat {
        /// Files or directories to index at startup
        #[arg(short, long = "ingest")]
        ingest: Vec<PathBuf>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Probe every configured provider
    Health,

    /// Show configuration status and routing policy
    Status,

    /// Create or reset the default configuration
    Onboard,
}

#[derive(clap::Args, Clone, Default)]
struct QueryArgs {
    /// Chunks to retrieve (overrides config)
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Answer language: auto, en or ar
    #[arg(short, long, default_value = "auto")]
    lang: Language,

    /// Narrow the question to one subject
    #[arg(short, long)]
    subject: Option<String>,

    /// Preferred provider (falls back when it fails)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model override passed to the provider
    #[arg(short, long)]
    model: Option<String>,

    /// Routing strategy: failover, roundRobin, weighted or smart
    #[arg(long)]
    strategy: Option<Strategy>,
}

impl QueryArgs {
    fn request(&self, question: &str) -> QueryRequest {
        QueryRequest {
            question: question.to_string(),
            top_k: self.top_k,
            language: self.lang,
            subject: self.subject.clone(),
            provider_id: self.provider.clone(),
            model: self.model.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Some(Commands::Ask {
            question,
            ingest,
            query,
            json,
        }) => cmd_ask(config_path, &question, &ingest, &query, json).await?,
        Some(Commands::Chat { ingest, query }) => cmd_chat(config_path, &ingest, &query).await?,
        Some(Commands::Health) => cmd_health(config_path).await?,
        Some(Commands::Status) => cmd_status(config_path)?,
        Some(Commands::Onboard) => cmd_onboard()?,
        None => cmd_chat(config_path, &[], &QueryArgs::default()).await?,
    }

    Ok(())
}

// ── Shared Setup ────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    }
}

fn validate_config(config: &Config) -> Result<()> {
    if let Err(errors) = config.validate() {
        eprintln!("\n  \x1b[31m❌ Configuration errors:\x1b[0m");
        for e in &errors {
            eprintln!("     • {}", e);
        }
        eprintln!();
        anyhow::bail!("Fix the above {} error(s) in config.json", errors.len());
    }
    Ok(())
}

fn build_router(config: &Config) -> Result<Arc<Router>> {
    let providers = registry_from_config(&config.providers, reqwest::Client::new());
    if providers.is_empty() {
        anyhow::bail!(
            "No LLM provider configured with a real API key. \
             Run `ragway onboard` first, then edit config.json"
        );
    }
    Ok(Arc::new(Router::new(
        providers,
        config.providers.policies(),
        config.router.settings(),
    )))
}

fn setup_pipeline(config: &Config, strategy: Option<Strategy>) -> Result<RagPipeline> {
    let router = build_router(config)?;
    if let Some(s) = strategy {
        router.set_strategy(s);
    }
    let embedder = RouterEmbedder::new(Arc::clone(&router), config.rag.embed_fallback.clone());
    let store = Arc::new(VectorStore::new(Arc::new(embedder)));
    Ok(RagPipeline::with_config(router, store, config.rag.clone()))
}

async fn ingest_paths(rag: &RagPipeline, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let docs = ingest::load_path(path)
            .with_context(|| format!("loading documents from {}", path.display()))?;
        let total = docs.len();
        let report = rag.ingest_all(docs).await;
        println!(
            "  📚 {}: {}/{} indexed{}",
            path.display(),
            report.indexed,
            total,
            if report.failed > 0 {
                format!(" ({} failed)", report.failed)
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

fn print_answer(answer: &ragway_core::rag::Answer) {
    println!("\n  \x1b[32m{}\x1b[0m\n", answer.response.output.trim());
    println!(
        "  via {} ({}){}",
        answer.response.provider_id,
        answer.response.model,
        answer
            .response
            .usage
            .as_ref()
            .and_then(|u| u.latency_ms)
            .map(|ms| format!(" in {}ms", ms))
            .unwrap_or_default()
    );
    for (i, r) in answer.references.iter().enumerate() {
        let score = r.meta.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
        println!("  [{}] {} (score {:.3})", i + 1, r.id, score);
    }
    println!();
}

// ── Ask Command ─────────────────────────────────────────────────────

async fn cmd_ask(
    config_path: Option<&Path>,
    question: &str,
    ingest: &[PathBuf],
    query: &QueryArgs,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    validate_config(&config)?;
    let rag = setup_pipeline(&config, query.strategy)?;

    ingest_paths(&rag, ingest).await?;
    let answer = rag.query(query.request(question)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }
    Ok(())
}

// ── Chat Command ────────────────────────────────────────────────────

async fn cmd_chat(config_path: Option<&Path>, ingest: &[PathBuf], query: &QueryArgs) -> Result<()> {
    let config = load_config(config_path)?;
    validate_config(&config)?;
    let rag = setup_pipeline(&config, query.strategy)?;

    // Print header
    println!();
    println!("  🔀 ragway v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Providers: {} | Strategy: {}",
        rag.router()
            .providers()
            .iter()
            .map(|p| p.id())
            .collect::<Vec<_>>()
            .join(", "),
        rag.router().strategy()
    );
    println!();

    ingest_paths(&rag, ingest).await?;

    println!("  Ask a question, or /help for commands.");
    println!("  ─────────────────────────────────────");
    println!();

    // Interactive loop
    let stdin = io::stdin();
    loop {
        print!("  \x1b[36m>\x1b[0m ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name {
                "quit" | "exit" | "q" => {
                    println!("  Goodbye! 👋");
                    break;
                }
                "ingest" if !arg.is_empty() => {
                    if let Err(e) = ingest_paths(&rag, &[PathBuf::from(arg)]).await {
                        eprintln!("  \x1b[31mError: {:#}\x1b[0m", e);
                    }
                }
                "stats" => {
                    let stats = rag.index_stats();
                    println!(
                        "  Index: {} chunk(s), dim {}, sample: {}",
                        stats.count,
                        stats.dim,
                        stats.sample_ids.join(", ")
                    );
                }
                "strategy" if arg.is_empty() => {
                    println!("  Strategy: {}", rag.router().strategy());
                }
                "strategy" => match arg.parse::<Strategy>() {
                    Ok(s) => {
                        rag.router().set_strategy(s);
                        println!("  Strategy set to {}", s);
                    }
                    Err(e) => eprintln!("  \x1b[31m{}\x1b[0m", e),
                },
                "health" => print_health(rag.router()).await,
                _ => {
                    println!("  /ingest <path>      index a file or directory");
                    println!("  /stats              show index statistics");
                    println!("  /strategy [name]    show or change the routing strategy");
                    println!("  /health             probe providers");
                    println!("  /quit               exit");
                }
            }
            continue;
        }

        match rag.query(query.request(input)).await {
            Ok(answer) => print_answer(&answer),
            Err(e) => eprintln!("\n  \x1b[31mError: {}\x1b[0m\n", e),
        }
    }

    Ok(())
}

// ── Health Command ──────────────────────────────────────────────────

async fn print_health(router: &Router) {
    for h in router.health().await {
        let caps = h
            .capabilities
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("+");
        let circuit = match h.breaker.retry_in_ms {
            Some(ms) => format!("open ({}ms)", ms),
            None => format!("closed ({} failures)", h.breaker.failures),
        };
        println!(
            "  {} {:<10} {:<18} {:<10} circuit {}{}",
            if h.healthy { "✅" } else { "❌" },
            h.id,
            h.label,
            caps,
            circuit,
            if h.enabled { "" } else { " [disabled]" }
        );
    }
}

async fn cmd_health(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let router = build_router(&config)?;

    println!();
    println!("  🩺 Provider health");
    println!("  ─────────────────────────────────────");
    print_health(&router).await;
    println!();
    Ok(())
}

// ── Status Command ──────────────────────────────────────────────────

fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    println!();
    println!("  🔀 ragway status");
    println!("  ─────────────────────────────────────");

    if path.exists() {
        println!("  Config:    {}", path.display());
    } else {
        println!("  Config:    ❌ Not found (run `ragway onboard`)");
        return Ok(());
    }
    let config = Config::load_from(&path)?;

    let policies = config.providers.policies();
    if policies.is_empty() {
        println!("  Providers: ❌ No provider configured");
    }
    for p in &policies {
        println!(
            "  Provider:  ✅ {:<10} weight {} | SLA {}ms{}",
            p.id,
            p.weight(),
            p.latency_sla_ms(),
            if p.enabled() { "" } else { " | disabled" }
        );
    }

    let r = &config.router;
    println!(
        "  Router:    {} | trip after {} | cooldown {}ms | timeout {}ms",
        r.strategy, r.failure_threshold, r.cooldown_ms, r.call_timeout_ms
    );
    println!(
        "  RAG:       top-k {} | max tokens {} | provider {}",
        config.rag.top_k,
        config.rag.max_tokens,
        config.rag.default_provider.as_deref().unwrap_or("(routed)")
    );

    match config.validate() {
        Ok(()) => println!("  Valid:     ✅"),
        Err(errors) => {
            for e in errors {
                println!("  Valid:     ⚠️  {}", e);
            }
        }
    }
    println!();
    Ok(())
}

// ── Onboard Command ─────────────────────────────────────────────────

fn cmd_onboard() -> Result<()> {
    let path = Config::write_default_template()?;
    println!();
    println!("  ✅ Configuration created at:");
    println!("     {}", path.display());
    println!();
    println!("  Next steps:");
    println!("  1. Edit the config file and add at least one API key");
    println!("  2. Run `ragway chat -i <docs>` to start asking questions");
    println!();
    Ok(())
}
