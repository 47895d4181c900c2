//! CLI - Command Line Interface
//!
//! Available Commands:
//! - instead revise  - Revise an assistant turn with feedback
//! - instead show    - Print turns with their active alternate and feedback
//! - instead swipe   - Switch the displayed alternate of a turn
//! - instead history - List every alternate of a turn

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use instead_core::llm::{OpenAiProvider, ProviderBackend};
use instead_core::{
    AlternateResponseManager, ConfigLoader, ConversationStore, FeedbackAnnotationIndex,
    InsteadConfig, Provenance, RevisionController, RevisionError, RevisionOutcome,
    RevisionPromptBuilder, Severity, Turn, TurnId,
};
use instead_persistence::JsonConversationStore;

use crate::provider_config::create_provider_config;

/// CLI Errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("{message} ({detail})")]
    Revision { message: String, detail: String },

    #[error("Output error: {0}")]
    Output(String),
}

impl From<RevisionError> for CliError {
    fn from(e: RevisionError) -> Self {
        let message = match e.severity() {
            Severity::Warning => format!("warning: {}", e.user_message()),
            Severity::Error => e.user_message().to_string(),
        };
        CliError::Revision {
            message,
            detail: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// Resolved settings shared by all commands
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: InsteadConfig,
    pub output_format: OutputFormat,
}

/// inSTead CLI
#[derive(Parser, Debug)]
#[command(name = "instead")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Revise an assistant turn with editorial feedback
    Revise(ReviseArgs),

    /// Show turns and the feedback behind their displayed alternate
    Show(ShowArgs),

    /// Switch the displayed alternate of a turn
    Swipe(SwipeArgs),

    /// List all alternates of a turn
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ReviseArgs {
    /// Conversation file (or name inside the chat directory)
    #[arg(long)]
    pub chat: PathBuf,

    /// Turn to revise
    #[arg(short, long)]
    pub turn: TurnId,

    /// What should change
    #[arg(short, long)]
    pub feedback: String,
}

#[derive(Args, Debug)]
pub(crate) struct ShowArgs {
    #[arg(long)]
    pub chat: PathBuf,

    /// Only this turn
    #[arg(short, long)]
    pub turn: Option<TurnId>,
}

#[derive(Args, Debug)]
pub(crate) struct SwipeArgs {
    #[arg(long)]
    pub chat: PathBuf,

    #[arg(short, long)]
    pub turn: TurnId,

    /// Alternate to display (0 is the original)
    #[arg(short, long)]
    pub index: usize,
}

#[derive(Args, Debug)]
pub(crate) struct HistoryArgs {
    #[arg(long)]
    pub chat: PathBuf,

    #[arg(short, long)]
    pub turn: TurnId,
}

/// Parse CLI arguments and execute commands
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    if cli.verbose {
        init_tracing();
    }

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().map_err(|e| CliError::Config(e.to_string()))?;
    let context = CliContext {
        config,
        output_format: cli.output.unwrap_or(OutputFormat::Pretty),
    };

    let output = run_command(cli.command, &context).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// fmt subscriber on stderr, `RUST_LOG` filter, default `info`
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) async fn run_command(command: Commands, context: &CliContext) -> Result<String, CliError> {
    match command {
        Commands::Revise(args) => cmd_revise(args, context).await,
        Commands::Show(args) => cmd_show(args, context).await,
        Commands::Swipe(args) => cmd_swipe(args, context).await,
        Commands::History(args) => cmd_history(args, context).await,
    }
}

async fn cmd_revise(args: ReviseArgs, context: &CliContext) -> Result<String, CliError> {
    let store = open_store(&args.chat, context).await?;
    let controller = build_controller(store, &context.config)?;

    info!("Revising turn {} in {}", args.turn, args.chat.display());
    let outcome = controller.request_revision(args.turn, &args.feedback).await?;
    render_outcome(&outcome, context.output_format)
}

async fn cmd_show(args: ShowArgs, context: &CliContext) -> Result<String, CliError> {
    let store = open_store(&args.chat, context).await?;
    let turns = match args.turn {
        Some(id) => vec![store.turn(id).await.ok_or_else(|| missing_turn(id))?],
        None => store.turns().await,
    };

    let mut index = FeedbackAnnotationIndex::new();
    index.rescan(&turns);

    let views: Vec<TurnView> = turns
        .iter()
        .map(|turn| TurnView::new(turn, index.get(turn.id).map(|a| a.feedback.clone())))
        .collect();

    match context.output_format {
        OutputFormat::Json => to_json(&views),
        OutputFormat::Pretty => Ok(views
            .iter()
            .map(TurnView::pretty)
            .collect::<Vec<_>>()
            .join("\n\n")),
    }
}

async fn cmd_swipe(args: SwipeArgs, context: &CliContext) -> Result<String, CliError> {
    let store = open_store(&args.chat, context).await?;
    let controller = build_controller(store, &context.config)?;

    let turn = controller.switch_alternate(args.turn, args.index).await?;
    let feedback = FeedbackAnnotationIndex::feedback_for(&turn).map(str::to_string);
    let view = TurnView::new(&turn, feedback);

    match context.output_format {
        OutputFormat::Json => to_json(&view),
        OutputFormat::Pretty => Ok(view.pretty()),
    }
}

async fn cmd_history(args: HistoryArgs, context: &CliContext) -> Result<String, CliError> {
    let store = open_store(&args.chat, context).await?;
    let mut turn = store
        .turn(args.turn)
        .await
        .ok_or_else(|| missing_turn(args.turn))?;
    AlternateResponseManager::ensure_initialized(&mut turn);

    let views: Vec<AlternateView> = turn
        .alternates
        .iter()
        .enumerate()
        .map(|(index, alternate)| AlternateView {
            index,
            active: index == turn.active_alternate,
            provenance: alternate.metadata.provenance,
            feedback: alternate.metadata.feedback.clone(),
            reasoning: alternate.metadata.reasoning.clone(),
            started_at: alternate.metadata.started_at.to_rfc3339(),
            finished_at: alternate.metadata.finished_at.map(|t| t.to_rfc3339()),
            text: alternate.text.clone(),
        })
        .collect();

    match context.output_format {
        OutputFormat::Json => to_json(&views),
        OutputFormat::Pretty => Ok(views
            .iter()
            .map(AlternateView::pretty)
            .collect::<Vec<_>>()
            .join("\n\n")),
    }
}

/// `--chat` as given if it exists, otherwise a file in the chat directory
pub(crate) fn resolve_chat_path(chat: &Path, chat_dir: &Path) -> PathBuf {
    if chat.exists() || chat.is_absolute() {
        return chat.to_path_buf();
    }
    let candidate = chat_dir.join(chat);
    if candidate.extension().is_none() {
        candidate.with_extension("json")
    } else {
        candidate
    }
}

async fn open_store(
    chat: &Path,
    context: &CliContext,
) -> Result<Arc<JsonConversationStore>, CliError> {
    let path = resolve_chat_path(chat, &context.config.storage.chat_dir);
    let store = JsonConversationStore::open(&path)
        .await
        .map_err(|e| CliError::Storage(format!("{}: {}", path.display(), e)))?;
    Ok(Arc::new(store))
}

fn build_controller(
    store: Arc<JsonConversationStore>,
    config: &InsteadConfig,
) -> Result<RevisionController, CliError> {
    let provider = OpenAiProvider::new(create_provider_config(&config.llm))
        .map_err(|e| CliError::Provider(e.to_string()))?;
    let backend = ProviderBackend::new(Arc::new(provider), config.llm.sampling_params())
        .with_system_prompt(config.llm.system_prompt.clone());
    let prompts = RevisionPromptBuilder::with_preamble(config.revision.instruction_preamble.clone());

    Ok(
        RevisionController::new(store, Arc::new(backend), Arc::new(config.llm.clone()))
            .with_prompt_builder(prompts),
    )
}

fn missing_turn(id: TurnId) -> CliError {
    CliError::Storage(format!("turn {} not found", id))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError::Output(e.to_string()))
}

fn render_outcome(outcome: &RevisionOutcome, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => to_json(&OutcomeView {
            attempt_id: &outcome.attempt_id,
            turn: outcome.turn_id,
            alternate: outcome.alternate,
            feedback: &outcome.feedback,
            reasoning: outcome.reasoning.as_deref(),
            text: &outcome.text,
        }),
        OutputFormat::Pretty => {
            let mut out = format!(
                "Turn {} revised (alternate {})\nFeedback: {}\n\n{}",
                outcome.turn_id, outcome.alternate, outcome.feedback, outcome.text
            );
            if let Some(reasoning) = &outcome.reasoning {
                out.push_str(&format!("\n\nReasoning: {}", reasoning));
            }
            Ok(out)
        }
    }
}

#[derive(Debug, Serialize)]
struct OutcomeView<'a> {
    attempt_id: &'a str,
    turn: TurnId,
    alternate: usize,
    feedback: &'a str,
    reasoning: Option<&'a str>,
    text: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct TurnView {
    pub id: TurnId,
    pub author: String,
    pub name: Option<String>,
    pub active_alternate: usize,
    pub alternates: usize,
    pub feedback: Option<String>,
    pub text: String,
}

impl TurnView {
    fn new(turn: &Turn, feedback: Option<String>) -> Self {
        Self {
            id: turn.id,
            author: if turn.is_assistant() { "assistant" } else { "user" }.to_string(),
            name: turn.name.clone(),
            active_alternate: turn.active_alternate,
            alternates: turn.alternate_count(),
            feedback,
            text: turn.text.clone(),
        }
    }

    fn pretty(&self) -> String {
        let speaker = self.name.as_deref().unwrap_or(&self.author);
        let mut out = format!("[{}] {}", self.id, speaker);
        if self.alternates > 1 {
            out.push_str(&format!(
                " (alternate {}/{})",
                self.active_alternate + 1,
                self.alternates
            ));
        }
        out.push('\n');
        out.push_str(&self.text);
        if let Some(feedback) = &self.feedback {
            out.push_str(&format!("\n  Feedback: {}", feedback));
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AlternateView {
    pub index: usize,
    pub active: bool,
    pub provenance: Provenance,
    pub feedback: Option<String>,
    pub reasoning: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub text: String,
}

impl AlternateView {
    fn pretty(&self) -> String {
        let marker = if self.active { "*" } else { " " };
        let mut out = format!("{} #{} [{:?}]", marker, self.index, self.provenance);
        if let Some(feedback) = &self.feedback {
            out.push_str(&format!(" feedback: {}", feedback));
        }
        if self.finished_at.is_none() {
            out.push_str(" (pending)");
        }
        out.push('\n');
        out.push_str(&self.text);
        if let Some(reasoning) = &self.reasoning {
            out.push_str(&format!("\n  Reasoning: {}", reasoning));
        }
        out
    }
}
