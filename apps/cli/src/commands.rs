//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};

use carebot_core::{
    Carebot, LiveDecision, ProgramOutcome, Requester, RoutingDecision, SourceRef,
};
use carebot_shared::{
    AppConfig, CarebotError, IntentLabel, SessionId, expand_home, init_config, load_config,
    load_config_from,
};
use carebot_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// carebot: pregnancy and postpartum assistant.
#[derive(Parser)]
#[command(
    name = "carebot",
    version,
    about = "Chat about pregnancy and postpartum health, and build personalised nutrition programs.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.carebot/carebot.toml).
    #[arg(long, global = true, env = "CAREBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Interactive chat session.
    Chat {
        /// User id; with --name, finished programs are saved to the archive.
        #[arg(long)]
        user: Option<String>,

        /// Display name printed on saved programs.
        #[arg(long)]
        name: Option<String>,
    },

    /// Route a single message and print the reply.
    Ask {
        /// The message to send.
        message: String,

        /// Print the full routing decision as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Saved nutrition programs.
    Programs {
        #[command(subcommand)]
        action: ProgramsAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Program archive subcommands.
#[derive(Subcommand)]
pub(crate) enum ProgramsAction {
    /// List a user's active programs, newest first.
    List {
        #[arg(long)]
        user: String,
    },
    /// Print a saved program document.
    Show { program_id: String },
    /// Delete one of a user's programs.
    Delete {
        program_id: String,

        #[arg(long)]
        user: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "carebot=warn",
        1 => "carebot=info",
        2 => "carebot=debug",
        _ => "carebot=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Chat { user, name } => {
            let requester = match (user, name) {
                (Some(user), Some(name)) => Some(Requester::new(user, name)),
                (Some(user), None) => Some(Requester::new(user.clone(), user)),
                _ => None,
            };
            cmd_chat(config_path, requester).await
        }
        Command::Ask { message, json } => cmd_ask(config_path, &message, json).await,
        Command::Programs { action } => match action {
            ProgramsAction::List { user } => cmd_programs_list(config_path, &user).await,
            ProgramsAction::Show { program_id } => {
                cmd_programs_show(config_path, &program_id).await
            }
            ProgramsAction::Delete { program_id, user } => {
                cmd_programs_delete(config_path, &program_id, &user).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

async fn cmd_chat(config_path: Option<&Path>, requester: Option<Requester>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let bot = Carebot::from_config(&config).await?;
    info!(persist = requester.is_some(), "starting chat");

    println!("carebot ready. Type 'help' for what I can do, 'quit' to leave.");
    if requester.is_none() {
        println!("(Programs are not saved; pass --user to keep them.)");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session: Option<SessionId> = None;

    loop {
        prompt("> ")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                print_help();
                continue;
            }
            "health" => {
                println!("{}", serde_json::to_string_pretty(&bot.health())?);
                continue;
            }
            "cancel" if session.is_some() => {
                session = None;
                println!("Questionnaire cancelled.");
                continue;
            }
            _ => {}
        }

        session = match session {
            Some(id) => questionnaire_turn(&bot, id, line, requester.as_ref()).await?,
            None => chat_turn(&bot, line).await?,
        };
    }

    println!("Take care!");
    Ok(())
}

/// Route a free-text message. Returns a session id when a questionnaire started.
async fn chat_turn(bot: &Carebot, message: &str) -> Result<Option<SessionId>> {
    match bot.route_live(message).await? {
        LiveDecision::Decided(decision) => {
            println!("{}", decision.reply_text());
            if let RoutingDecision::Responded { sources, .. } = &decision {
                print_sources(sources);
            }
            if let RoutingDecision::QuestionnaireStarted { session_id, .. } = decision {
                println!("(Type 'cancel' to stop the questionnaire.)");
                return Ok(Some(session_id));
            }
        }
        LiveDecision::Streaming {
            mut reply, sources, ..
        } => {
            while let Some(piece) = reply.next().await {
                print!("{piece}");
                std::io::stdout().flush()?;
            }
            println!();
            let outcome = reply.finish().await;
            if let Some(error) = outcome.error {
                println!("{}", outcome.text);
                warn!(error = %error, "reply ended early");
            }
            print_sources(&sources);
        }
    }
    Ok(None)
}

/// Feed one answer to the active questionnaire. Returns the session if it is
/// still in progress.
async fn questionnaire_turn(
    bot: &Carebot,
    id: SessionId,
    answer: &str,
    requester: Option<&Requester>,
) -> Result<Option<SessionId>> {
    let questionnaire = bot.questionnaire();

    match questionnaire.submit_answer(id, answer).await {
        Ok(progress) if !progress.is_complete() => {
            if let Some(question) = questionnaire.next_prompt(id).await {
                println!("[{}/{}] {}", question.number, question.total, question.prompt);
            }
            return Ok(Some(id));
        }
        Ok(_) | Err(CarebotError::AlreadyComplete { .. }) => {}
        Err(CarebotError::InvalidType { expected, .. }) => {
            let kind = if expected == "int" { "whole number" } else { "number" };
            println!("Please enter a valid {kind}.");
            if let Some(question) = questionnaire.next_prompt(id).await {
                println!("[{}/{}] {}", question.number, question.total, question.prompt);
            }
            return Ok(Some(id));
        }
        Err(CarebotError::SessionNotFound { .. }) => {
            println!("Your questionnaire expired. Ask for a nutrition plan to start again.");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    let spinner = spinner("Preparing your nutrition program...");
    let result = questionnaire.finalize(id, requester).await;
    spinner.finish_and_clear();

    match result {
        Ok(outcome) => {
            print_program(&outcome);
            Ok(None)
        }
        Err(e) => {
            println!("Program generation failed: {e}");
            println!("Send any message to retry, or 'cancel' to stop.");
            Ok(Some(id))
        }
    }
}

fn print_help() {
    println!("I can help with:");
    for label in IntentLabel::ALL {
        if label != IntentLabel::Unclear {
            println!("  {:<20} {}", label.display_name(), label.description());
        }
    }
    println!("Commands: help, health, cancel (during a questionnaire), quit");
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for source in sources {
        println!("  - {} (score {:.3})", source.source_id, source.similarity);
    }
}

fn print_program(outcome: &ProgramOutcome) {
    println!("\n{}\n", outcome.text);
    if let Some(record) = &outcome.artifact {
        println!("Saved as {} ({})", record.program_id, record.file_path.display());
    }
    if let Some(error) = &outcome.persistence_error {
        println!("Note: the program could not be saved ({error}).");
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

// ---------------------------------------------------------------------------
// One-shot ask
// ---------------------------------------------------------------------------

async fn cmd_ask(config_path: Option<&Path>, message: &str, json: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let bot = Carebot::from_config(&config).await?;

    let decision = bot.route(message).await?;
    info!(decision = decision.name(), "routed");

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    println!("{}", decision.reply_text());
    match &decision {
        RoutingDecision::Responded { sources, .. } => print_sources(sources),
        RoutingDecision::QuestionnaireStarted { .. } => {
            println!("(Run `carebot chat` to answer the questionnaire.)");
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Program archive
// ---------------------------------------------------------------------------

async fn open_storage(config_path: Option<&Path>) -> Result<Storage> {
    let config = resolve_config(config_path)?;
    let db_path = expand_home(&config.storage.db_path);
    let storage = Storage::open(&db_path)
        .await?
        .with_programs_dir(expand_home(&config.storage.programs_dir));
    Ok(storage)
}

async fn cmd_programs_list(config_path: Option<&Path>, user: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let db_path = expand_home(&config.storage.db_path);
    if !db_path.exists() {
        println!("No programs saved yet.");
        return Ok(());
    }

    let storage = Storage::open_readonly(&db_path).await?;
    let programs = storage.list_programs(user).await?;

    if programs.is_empty() {
        println!("No programs saved for '{user}'.");
        return Ok(());
    }

    println!();
    for record in &programs {
        println!("  ID:      {}", record.program_id);
        println!("  Created: {}", record.created_at.format("%d/%m/%Y %H:%M"));
        println!("  Type:    {}", record.program_type);
        println!("  File:    {}", record.file_path.display());
        println!();
    }
    println!("  {} program(s)", programs.len());
    Ok(())
}

async fn cmd_programs_show(config_path: Option<&Path>, program_id: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let db_path = expand_home(&config.storage.db_path);
    if !db_path.exists() {
        return Err(eyre!("no program '{program_id}'"));
    }

    let storage = Storage::open_readonly(&db_path).await?;
    match storage.read_program(program_id).await {
        Ok(Some(body)) => {
            println!("{body}");
            Ok(())
        }
        Ok(None) => Err(eyre!("no program '{program_id}'")),
        Err(CarebotError::Io { path, .. }) => Err(eyre!(
            "program '{program_id}' is archived but its document is missing: {}",
            path.display()
        )),
        Err(e) => Err(e.into()),
    }
}

async fn cmd_programs_delete(config_path: Option<&Path>, program_id: &str, user: &str) -> Result<()> {
    let storage = open_storage(config_path).await?;
    if !storage.delete_program(program_id, user).await? {
        return Err(eyre!("no active program '{program_id}' for user '{user}'"));
    }
    info!(program_id, user, "program deleted");
    println!("Program {program_id} deleted.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
