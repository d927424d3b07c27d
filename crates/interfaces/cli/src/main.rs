//! Demo entrypoint wiring the driver's collaborator traits to concrete
//! implementations and running one root dialog to suspension.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dominds_config::{FileAgentLoader, LlmProvidersConfig};
use dominds_core::collab::event_bus::EventBus;
use dominds_core::collab::memory::InMemoryPersistence;
use dominds_core::collab::persistence::Persistence;
use dominds_core::collab::tools::ToolRegistry;
use dominds_core::dialog::Dialog;
use dominds_core::events::DialogEvent;
use dominds_core::ids::DialogId;
use dominds_core::message::{ChatMessage, Grammar};
use dominds_core::records::RunState;
use dominds_llm::problem::InMemoryProblemSink;
use dominds_llm::{EchoGenerator, HttpLlmGenerator};
use dominds_runtime::driver::DriverContext;
use dominds_runtime::{BroadcastEventBus, DriverRuntime};
use dominds_tools::{EchoTool, ReadFileTool, WriteFileTool};

/// Drives one root dialog for `agent` to its first suspension point, then
/// keeps the backend driver running so replies to Q4H / revived subdialogs
/// continue the conversation, until the dialog goes idle or the process is
/// interrupted.
#[derive(Debug, Parser)]
#[command(name = "dominds", version, about = "Dialog driver demo CLI")]
struct Cli {
    /// Directory holding `team.yaml`, `llm.yaml`, and `diligence*.md`.
    #[arg(long, default_value = ".minds")]
    minds_dir: PathBuf,

    /// Team member id that owns the root dialog.
    #[arg(long)]
    agent: String,

    /// Initial human prompt. If it starts with '@' it is parsed as a
    /// tellask grammar message; otherwise markdown.
    prompt: String,

    /// Maximum LLM retry attempts per generation.
    #[arg(long, default_value_t = 5)]
    max_retries: u32,
}

/// Logs every dialog event at info level, then forwards it to the
/// broadcast bus so a future UI transport can subscribe without the CLI
/// needing to know about it.
struct LoggingEventBus {
    inner: BroadcastEventBus,
}

impl LoggingEventBus {
    fn new() -> Self {
        Self { inner: BroadcastEventBus::default() }
    }
}

#[async_trait::async_trait]
impl EventBus for LoggingEventBus {
    async fn post_dialog_event(&self, dialog_id: DialogId, event: DialogEvent) {
        info!(dialog = %dialog_id, ?event, "dialog event");
        self.inner.post_dialog_event(dialog_id, event).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if !cli.minds_dir.exists() {
        bail!(
            "minds directory '{}' does not exist — expected team.yaml, llm.yaml there",
            cli.minds_dir.display()
        );
    }

    let models = Arc::new(LlmProvidersConfig::load_from(cli.minds_dir.join("llm.yaml")).await?);

    let generator: Arc<dyn dominds_core::collab::llm::LlmGenerator> =
        match std::env::var("DOMINDS_LLM_BASE_URL") {
            Ok(base_url) => {
                let api_key = std::env::var("DOMINDS_LLM_API_KEY").ok();
                Arc::new(HttpLlmGenerator::new(base_url, api_key))
            }
            Err(_) => {
                info!("DOMINDS_LLM_BASE_URL unset; running against a deterministic echo generator");
                Arc::new(EchoGenerator { text: "(no LLM configured — echoing) ".to_string() + &cli.prompt })
            }
        };

    let workspace_root = std::env::current_dir()?;
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(EchoTool));
    tools.register(Box::new(ReadFileTool { workspace_root: workspace_root.clone() }));
    tools.register(Box::new(WriteFileTool { workspace_root }));

    let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());

    let ctx = DriverContext {
        persistence: persistence.clone(),
        event_bus: Arc::new(LoggingEventBus::new()),
        locks: Arc::new(dominds_core::lock::DialogLockTable::new()),
        agent_loader: Arc::new(FileAgentLoader::new(cli.minds_dir.clone())),
        generator,
        tools: Arc::new(tools),
        models,
        problem_sink: Arc::new(InMemoryProblemSink::new()),
        minds_dir: cli.minds_dir.clone(),
        max_retries: cli.max_retries,
        health_fsms: tokio::sync::Mutex::new(std::collections::HashMap::new()),
    };
    let runtime = DriverRuntime::new(ctx);

    let dialog_id = DialogId::new_root();
    let diligence_push_max = 3;
    persistence
        .save_dialog(&Dialog::new_root(dialog_id, cli.agent.clone(), diligence_push_max))
        .await?;
    persistence.set_dialog_run_state(dialog_id, RunState::IdleWaitingUser).await?;

    let grammar = if cli.prompt.trim_start().starts_with('@') { Grammar::Tellask } else { Grammar::Markdown };
    let prompt = ChatMessage::Prompting {
        msg_id: uuid::Uuid::new_v4().to_string(),
        content: cli.prompt.clone(),
        grammar,
        genseq: 0,
    };

    info!(dialog = %dialog_id, agent = %cli.agent, "driving root dialog");
    runtime.drive_now(dialog_id, Some(prompt)).await?;

    // Keep the backend driver running so a revived subdialog response or a
    // Type B resume picks up where the initial drive suspended, until the
    // dialog goes idle with nothing outstanding or the user hits Ctrl-C.
    let cancel = CancellationToken::new();
    let driver = runtime.backend_driver();
    let driver_cancel = cancel.clone();
    let driver_task = tokio::spawn(async move { driver.run_forever(driver_cancel).await });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                let state = persistence.load_dialog_run_state(dialog_id).await?;
                let has_q4h = persistence.load_pending_question4human(dialog_id).await?.is_some();
                let pending = persistence.load_pending_subdialogs(dialog_id).await?;
                if matches!(state, Some(RunState::IdleWaitingUser) | Some(RunState::Dead)) && !has_q4h && pending.is_empty() {
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    let _ = driver_task.await;

    if let Some(dialog) = persistence.load_dialog_latest(dialog_id).await? {
        print_transcript(&dialog);
    }
    if let Some(question) = persistence.load_pending_question4human(dialog_id).await? {
        println!("\n--- awaiting human answer ---");
        println!("{}", question.tellask_head);
        if !question.body_content.is_empty() {
            println!("{}", question.body_content);
        }
    }

    Ok(())
}

fn print_transcript(dialog: &Dialog) {
    println!("--- transcript ({}) ---", dialog.id());
    for msg in &dialog.core().msgs {
        match msg {
            ChatMessage::Prompting { content, .. } => println!("[user] {content}"),
            ChatMessage::Saying { content, .. } => println!("[{}] {content}", dialog.core().agent_id),
            ChatMessage::FuncCall { name, arguments, .. } => println!("[tool-call] {name}({arguments})"),
            ChatMessage::FuncResult { name, content, .. } => println!("[tool-result:{name}] {content}"),
            ChatMessage::TellaskResult { responder_id, content, .. } => println!("[reply:{responder_id}] {content}"),
            _ => {}
        }
    }
}
