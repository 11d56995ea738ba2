use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::{AppConfig, WorkerMode};
use weft_core::error::WeftError;
use weft_core::fragment::{Fragment, FragmentDelta};
use weft_core::traits::{GraphStore, StaticCatalog};
use weft_core::types::SessionId;
use weft_store::{Bundle, SqliteGraphStore};
use weft_workflow::{
    loader, synthesizer, SessionManager, TurnEvent, WorkerContext, WorkerLauncher, WorkflowTarget,
};

#[derive(Parser)]
#[command(name = "weft", version, about = "Run agent workflow graphs as chat sessions")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Id of a stored workflow graph
    #[arg(long)]
    graph: Option<String>,
    /// Id of a stored agent, run on its own
    #[arg(long)]
    agent: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> anyhow::Result<WorkflowTarget> {
        match (&self.graph, &self.agent) {
            (Some(id), None) => Ok(WorkflowTarget::Graph(id.clone())),
            (None, Some(id)) => Ok(WorkflowTarget::Agent(id.clone())),
            _ => anyhow::bail!("pass exactly one of --graph or --agent"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session with a graph or agent
    Chat {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Serve one session over stdin/stdout
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        session: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show how a graph resolves and the orchestrator prompt it produces
    Inspect {
        #[arg(long)]
        graph: String,
        /// Print the resolved graph as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import tools, agents, and graphs from a JSON bundle
    Import { file: PathBuf },
    /// List stored graphs
    List,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout is the frame channel in worker mode, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let (config, config_path) = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Import { file } => {
            let store = SqliteGraphStore::open(&config.store_path())?;
            let bundle = Bundle::load(&file)?;
            let summary = store.import(&bundle)?;
            println!("Imported {}", summary);
        }
        Commands::List => {
            let store = SqliteGraphStore::open(&config.store_path())?;
            let graphs = store.list_graphs()?;
            if graphs.is_empty() {
                println!("No graphs stored. Use `weft import <file>` to add some.");
            }
            for g in graphs {
                let edited = g
                    .last_edited
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!("{:<24} {:<32} {}", g.id, g.name, edited);
            }
        }
        Commands::Inspect { graph, json } => {
            let store = SqliteGraphStore::open(&config.store_path())?;
            let resolved = loader::load_graph(&store, &graph).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resolved)?);
            } else {
                let agents = resolved.agents().count();
                let tools = resolved.tools().count();
                println!(
                    "{} ({}): {} agent node(s), {} tool node(s), {} edge(s)\n",
                    resolved.name,
                    resolved.id,
                    agents,
                    tools,
                    resolved.edges.len()
                );
                if resolved.agent_node_count() == 1 && agents == 1 && resolved.edges.is_empty() {
                    println!("Single agent graph; the agent's own prompt is used.");
                } else {
                    println!("{}", synthesizer::build_prompt(&resolved));
                }
            }
        }
        Commands::Worker { session, target } => {
            let ctx = worker_context(&config)?;
            weft_workflow::worker::serve_stdio(SessionId::from(session.as_str()), target.target()?, ctx)
                .await;
        }
        Commands::Chat { target } => {
            let target = target.target()?;
            let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open(&config.store_path())?);
            let launcher = match config.session.worker_mode {
                WorkerMode::Process => WorkerLauncher::current_exe(config_path)?,
                WorkerMode::Task => WorkerLauncher::Task(worker_context(&config)?),
            };
            let manager = SessionManager::new(launcher, store, config.session.clone());
            run_chat(&manager, target).await?;
        }
    }

    Ok(())
}

/// Load the config file, falling back to `~/.weft/weft.toml` and then to
/// defaults. Also returns the path that was used, for worker processes.
fn load_config(path: &PathBuf) -> anyhow::Result<(AppConfig, Option<PathBuf>)> {
    if path.exists() {
        return Ok((AppConfig::load(path)?, Some(path.clone())));
    }

    let home_config = std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|h| h.join(".weft").join("weft.toml"));
    if let Some(home_config) = home_config.filter(|p| p.exists()) {
        info!(path = %home_config.display(), "Loading config from home directory");
        let config = AppConfig::load(&home_config)?;
        return Ok((config, Some(home_config)));
    }

    warn!(path = %path.display(), "No config file found; using defaults");
    Ok((AppConfig::default(), None))
}

fn worker_context(config: &AppConfig) -> anyhow::Result<WorkerContext> {
    let store = SqliteGraphStore::open(&config.store_path())?;
    Ok(WorkerContext {
        store: Arc::new(store),
        llm: weft_llm::create_client(&config.model),
        catalog: Arc::new(StaticCatalog::new(config.models.aliases.clone())),
        config: config.clone(),
    })
}

async fn run_chat(manager: &SessionManager, target: WorkflowTarget) -> anyhow::Result<()> {
    let mut activation = manager.activate(target.clone()).await?;
    println!("Weft v{}", env!("CARGO_PKG_VERSION"));
    println!("Session {} on {}", activation.session_id, activation.name);
    println!("Type /history to see the conversation, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => break,
            "/session" => {
                println!("Session: {}", activation.session_id);
                continue;
            }
            "/history" => {
                match manager.history(&activation.session_id).await {
                    Ok(entries) if entries.is_empty() => println!("(no messages yet)"),
                    Ok(entries) => {
                        for entry in entries {
                            println!(
                                "[{}] {:?}: {}",
                                entry.timestamp.format("%H:%M:%S"),
                                entry.role,
                                entry.content
                            );
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                }
                continue;
            }
            _ => {}
        }

        let mut turn = match manager.send_message(&activation.session_id, input).await {
            Ok(turn) => turn,
            Err(e) if e.is_restart_required() => {
                eprintln!("{}", e);
                manager.terminate(&activation.session_id).await;
                activation = manager.activate(target.clone()).await?;
                println!("Restarted as session {}. Please resend your message.", activation.session_id);
                continue;
            }
            Err(WeftError::EmptyMessage) => continue,
            Err(e) => return Err(e.into()),
        };

        while let Some(event) = turn.next().await {
            match event {
                TurnEvent::Delta(fragment) => print_fragment(&fragment),
                TurnEvent::Complete => println!(),
                TurnEvent::Failed(error) => eprintln!("\nError: {}", error),
                TurnEvent::SessionLost => {
                    eprintln!("\nThe session worker stopped. Restarting.");
                    activation = manager.activate(target.clone()).await?;
                }
            }
            stdout.flush()?;
        }
    }

    manager.terminate(&activation.session_id).await;
    println!("Goodbye!");
    Ok(())
}

fn print_fragment(fragment: &Fragment) {
    match (&fragment.delta, &fragment.current_tool_use) {
        (FragmentDelta::Text(text), _) => print!("{}", text),
        (FragmentDelta::ToolUse { input }, Some(tool)) if input.is_empty() => {
            print!("\n[{}]\n", tool.name)
        }
        (FragmentDelta::ToolUse { input }, _) => print!("{}", input),
    }
}
