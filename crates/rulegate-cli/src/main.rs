mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rulegate_ai::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use rulegate_ai::{HashingEmbedder, OllamaClient, TextEmbedder};
use rulegate_core::{PipelineConfig, RawDocument};
use rulegate_engine::{CancelFlag, Engine};
use rulegate_events::{EventSink, FanoutSink, HttpPublisher, TracingSink};
use rulegate_store::{MemoryStore, RuleStore};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rulegate", version, about = "Extract compliance rules from regulatory text and check configurations against them")]
struct Cli {
    /// JSON snapshot holding the rule store.
    #[arg(long, global = true, env = "RULEGATE_STORE", default_value = "rulegate-rules.json")]
    store: PathBuf,

    /// LanceDB directory; replaces the JSON snapshot (needs the `lancedb` feature).
    #[arg(long, global = true, env = "RULEGATE_LANCE")]
    lance: Option<PathBuf>,

    /// Sentence-transformers ONNX model directory (needs the `onnx` feature).
    #[arg(long, global = true, env = "RULEGATE_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Pipeline configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "RULEGATE_LLM_URL", default_value = DEFAULT_BASE_URL)]
    llm_url: String,

    #[arg(long, global = true, env = "RULEGATE_LLM_MODEL", default_value = DEFAULT_MODEL)]
    llm_model: String,

    /// Webhook base URL; events are POSTed to `<url>/events`.
    #[arg(long, global = true, env = "RULEGATE_EVENTS_URL")]
    events_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract rules from a UTF-8 text document.
    Ingest {
        file: PathBuf,
        #[arg(long)]
        framework: String,
        /// Provenance id; defaults to a digest of the content.
        #[arg(long)]
        doc_id: Option<String>,
    },
    /// Check a resource configuration against a framework's rules.
    Validate {
        #[arg(value_name = "CONFIG_JSON")]
        resource: PathBuf,
        #[arg(long)]
        framework: String,
        #[arg(long)]
        resource_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Score remediation progress between two configuration snapshots.
    Delta {
        pre: PathBuf,
        post: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Audit an IAM export for missing MFA and over-privilege.
    IamAudit {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List stored rules.
    Rules {
        #[arg(long)]
        framework: Option<String>,
    },
    /// Load the built-in storage-account baseline under a framework tag.
    Seed {
        #[arg(long)]
        framework: String,
    },
    /// Delete every rule of a framework.
    Purge {
        #[arg(long)]
        framework: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("rulegate v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let embedder = load_embedder(cli.model_dir.as_deref())?;
    let store = open_store(&cli, embedder.dim()).await?;

    let publisher = cli.events_url.as_deref().map(|url| Arc::new(HttpPublisher::new(url)));
    let mut events = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(p) = &publisher {
        events = events.with(p.clone());
    }

    let engine = Engine::new(
        store,
        Arc::new(
            OllamaClient::new(&cli.llm_url, &cli.llm_model)
                .with_temperature(config.llm_temperature),
        ),
        embedder,
        Arc::new(events) as Arc<dyn EventSink>,
        config,
    );

    let outcome = run(&engine, cli.command).await;
    if let Some(p) = publisher {
        p.drain().await;
    }
    outcome
}

async fn run(engine: &Engine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ingest {
            file,
            framework,
            doc_id,
        } => {
            let content =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let mut doc = RawDocument::new(&framework, content);
            if let Some(id) = doc_id {
                doc = doc.with_doc_id(id);
            }

            let cancel = CancelFlag::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, finishing in-flight chunks");
                    on_interrupt.cancel();
                }
            });

            let summary = engine.ingest(&doc, &cancel).await?;
            display::print_ingest(&summary);
        }
        Command::Validate {
            resource,
            framework,
            resource_id,
            json,
        } => {
            let config = read_json(&resource)?;
            let report = engine
                .validate(&framework, &config, resource_id.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_validation(&report);
            }
        }
        Command::Delta { pre, post, json } => {
            let report = engine.delta(&read_json(&pre)?, &read_json(&post)?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_delta(&report);
            }
        }
        Command::IamAudit { file, json } => {
            let report = engine.iam_audit(&read_json(&file)?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_iam(&report);
            }
        }
        Command::Rules { framework } => {
            let store = engine.store();
            let frameworks = match framework {
                Some(f) => vec![f],
                None => store.frameworks().await?,
            };
            for f in frameworks {
                display::print_rules(&store.list(&f).await?);
            }
        }
        Command::Seed { framework } => {
            let summary = engine.seed_baseline(&framework).await?;
            display::print_seed(&summary);
        }
        Command::Purge { framework } => {
            let removed = engine.store().purge(&framework).await?;
            println!("purged {removed} rules from {framework}");
        }
    }
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn load_embedder(model_dir: Option<&Path>) -> anyhow::Result<Arc<dyn TextEmbedder>> {
    let Some(dir) = model_dir else {
        return Ok(Arc::new(HashingEmbedder::default()));
    };
    #[cfg(feature = "onnx")]
    {
        Ok(Arc::new(rulegate_ai::OnnxEmbedder::load(dir)?))
    }
    #[cfg(not(feature = "onnx"))]
    {
        anyhow::bail!(
            "--model-dir {} needs a build with the `onnx` feature",
            dir.display()
        )
    }
}

async fn open_store(cli: &Cli, dim: usize) -> anyhow::Result<Arc<dyn RuleStore>> {
    if let Some(dir) = &cli.lance {
        #[cfg(feature = "lancedb")]
        {
            let store = rulegate_store::LanceRuleStore::open(dir, dim)
                .await
                .with_context(|| format!("opening LanceDB at {}", dir.display()))?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "lancedb"))]
        {
            let _ = dim;
            anyhow::bail!("--lance {} needs a build with the `lancedb` feature", dir.display());
        }
    }
    let store = MemoryStore::open_persistent(&cli.store)
        .await
        .with_context(|| format!("opening rule store {}", cli.store.display()))?;
    Ok(Arc::new(store))
}
