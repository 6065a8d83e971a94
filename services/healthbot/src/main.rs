//! HealthBot in the terminal.
//!
//! Reads one user message per line from stdin and prints the agent's replies.
//! `:clear` restarts the conversation with an empty transcript.

use anyhow::{Context, Result};
use async_openai::config::OpenAIConfig;
use clap::{Parser, ValueEnum};
use healthbot_core::{
    AgentOutput, InputMode,
    driver::{SessionDriver, TurnError},
    llm_client::{CannedLLMClient, LLMClient, LoggingLLMClient, OpenAICompatibleClient},
    prompts::Prompts,
    search::{CannedSearchService, SearchService, TavilySearchService},
    session_state::{Level, SessionSettings},
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const CLEAR_COMMAND: &str = ":clear";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderArg {
    Openai,
    Gemini,
}

#[derive(Debug, Parser)]
#[command(name = "healthbot")]
#[command(about = "Learn about a health topic, then check your understanding with a short quiz")]
#[command(version)]
struct Cli {
    /// Quiz difficulty: easy, medium or hard
    #[arg(long, default_value = "medium")]
    difficulty: Level,
    /// Summary depth: easy, medium or hard
    #[arg(long = "detail", default_value = "medium")]
    detail_level: Level,
    /// Default number of quiz questions (1-5)
    #[arg(long, default_value_t = 1)]
    questions: usize,
    /// Ask before moving on to each next quiz question
    #[arg(long)]
    pause_between_questions: bool,
    /// Completion provider
    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value = "openai")]
    provider: ProviderArg,
    /// Chat model name
    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4.1")]
    model: String,
    /// Directory of prompt template overrides
    #[arg(long, env = "PROMPTS_PATH")]
    prompts: Option<PathBuf>,
    /// Seconds to wait for each completion or search call (0 disables)
    #[arg(long, env = "PORT_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,
    /// Run with canned replies instead of calling any external service
    #[arg(long)]
    offline: bool,
}

impl Cli {
    fn settings(&self) -> SessionSettings {
        SessionSettings {
            difficulty: self.difficulty,
            detail_level: self.detail_level,
            question_count: self.questions,
            pause_between_questions: self.pause_between_questions,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

fn offline_ports() -> (Arc<dyn LLMClient>, Arc<dyn SearchService>) {
    let search = CannedSearchService::new(vec![
        "Offline mode: no live search results are available.".to_string(),
    ]);
    (
        Arc::new(CannedLLMClient::health_demo()),
        Arc::new(search),
    )
}

fn online_ports(cli: &Cli) -> Result<(Arc<dyn LLMClient>, Arc<dyn SearchService>)> {
    let openai_config = match cli.provider {
        ProviderArg::Openai => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set for the 'openai' provider")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/")
        }
        ProviderArg::Gemini => {
            let api_key = std::env::var("GEMINI_API_KEY")
                .context("GEMINI_API_KEY must be set for the 'gemini' provider")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai")
        }
    };
    let inner = Arc::new(OpenAICompatibleClient::new(openai_config, cli.model.clone()));
    let llm: Arc<dyn LLMClient> =
        Arc::new(LoggingLLMClient::new(inner, cli.model.clone()).with_timeout(cli.timeout()));

    let search: Arc<dyn SearchService> = match std::env::var("TAVILY_API_KEY") {
        Ok(api_key) if !api_key.trim().is_empty() => Arc::new(
            TavilySearchService::new(api_key, cli.timeout())
                .context("Failed to build search client")?,
        ),
        _ => {
            warn!("TAVILY_API_KEY is not set; summaries will be written without search results.");
            Arc::new(CannedSearchService::default())
        }
    };
    Ok((llm, search))
}

fn load_prompts(path: Option<&PathBuf>) -> Result<Prompts> {
    match path {
        Some(dir) => Prompts::load_dir(dir),
        None => Ok(Prompts::default()),
    }
}

fn print_output(out: &mut impl Write, output: &AgentOutput) -> Result<()> {
    writeln!(out, "\n{}\n", output.message)?;
    let marker = match output.input_mode {
        InputMode::YesNo => "[yes/no] > ",
        InputMode::FreeText => "> ",
    };
    write!(out, "{marker}")?;
    out.flush()?;
    Ok(())
}

/// Drives one conversation from `input` until it ends or the input runs out.
async fn run_session<R, W>(driver: &mut SessionDriver, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    print_output(out, &driver.initial_output())?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == CLEAR_COMMAND {
            let output = driver.clear();
            print_output(out, &output)?;
            continue;
        }

        match driver.handle_turn(&line).await {
            Ok(output) => {
                print_output(out, &output)?;
                if driver.is_finished() {
                    writeln!(out)?;
                    break;
                }
            }
            Err(e @ TurnError::Capability { .. }) => {
                warn!(error = %e, "Turn failed");
                writeln!(out, "\nSorry, something went wrong: {e}")?;
                write!(out, "Press enter to try again.\n> ")?;
                out.flush()?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let (llm, search) = if cli.offline {
        info!("Running offline with canned replies.");
        offline_ports()
    } else {
        online_ports(&cli)?
    };
    let prompts = Arc::new(load_prompts(cli.prompts.as_ref())?);

    let mut driver = SessionDriver::new(llm, search, prompts, cli.settings());
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    run_session(&mut driver, stdin, &mut stdout).await
}
