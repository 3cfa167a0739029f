use std::io::{self, IsTerminal};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::Level;

use docs_assistant::config::{self, ClientConfig, ConfigError};
use docs_assistant::net::{ChatClient, ChatError};
use docs_assistant::selection::{evaluate_text, RawSelection, SelectionSignal, SelectionSource, SelectionTracker};
use docs_assistant::terminal::TerminalSurface;
use docs_assistant::widget::{ChatWidget, KeyBus, KeySignal, SendRejected, WidgetEvent};

const HELP: &str = "\
commands:
  /open /close /toggle    show or hide the chat
  /select <text>          select a passage to ask about
  /clear-selection        forget the selected passage
  /dismiss                hide the error banner
  /clear                  start a new conversation
  /esc                    press Escape
  /health                 probe the answering service
  /quit                   exit
anything else is sent as a question";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("client setup failed: {0}")]
    Client(#[from] ChatError),
    #[error("send rejected: {0}")]
    Rejected(#[from] SendRejected),
    #[error("question failed: {0}")]
    AskFailed(String),
    #[error("answering service at {url} is not healthy")]
    Unhealthy { url: String },
    #[error("event loop stopped unexpectedly")]
    EventLoop,
    #[error("stdin read failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "docs-assistant", about = "Ask the documentation assistant from a terminal")]
struct Cli {
    #[arg(long, env = "CHATBOT_API_URL")]
    base_url: Option<String>,

    #[arg(long, env = "CHATBOT_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[arg(long, default_value_t = false, help = "Disable ANSI styling")]
    no_color: bool,

    #[arg(short, long, default_value_t = false, help = "Log request details to stderr")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask one question and print the reply.
    Ask {
        query: String,
        #[arg(long, help = "Passage the question is about")]
        selection: Option<String>,
    },
    /// Probe the answering service.
    Health,
    /// Interactive session.
    Chat,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    if let Some(url) = &cli.base_url {
        config::install_api_base_url(url)?;
    }
    let mut client_config = ClientConfig::from_env();
    if let Some(ms) = cli.timeout_ms {
        client_config = client_config.with_request_timeout_ms(ms);
    }
    let client = Arc::new(ChatClient::new(client_config)?);
    let color = !cli.no_color && io::stdout().is_terminal();

    match cli.command {
        Command::Ask { query, selection } => run_ask(client, color, &query, selection).await,
        Command::Health => run_health(&client).await,
        Command::Chat => run_chat(client, color).await,
    }
}

async fn run_ask(client: Arc<ChatClient>, color: bool, query: &str, selection: Option<String>) -> Result<(), CliError> {
    let keys = KeyBus::new();
    let surface = TerminalSurface::new(io::stdout()).with_color(color);
    let mut widget = ChatWidget::mount(client, surface, &keys);
    widget.open();
    widget.on_selection(selection.as_deref().and_then(evaluate_text));
    widget.send(query).await?;

    match widget.state().error.clone() {
        Some(error) => Err(CliError::AskFailed(error)),
        None => Ok(()),
    }
}

async fn run_health(client: &ChatClient) -> Result<(), CliError> {
    if client.check_health().await {
        println!("ok {}", client.base_url());
        Ok(())
    } else {
        Err(CliError::Unhealthy { url: client.base_url().to_owned() })
    }
}

// =============================================================================
// INTERACTIVE SESSION
// =============================================================================

/// Selection set from the REPL's `/select` command.
#[derive(Debug, Default)]
struct TypedSelection {
    current: Mutex<Option<RawSelection>>,
}

impl TypedSelection {
    fn set(&self, text: &str) {
        let raw = RawSelection { text: text.to_owned(), collapsed: text.is_empty() };
        if let Ok(mut current) = self.current.lock() {
            *current = Some(raw);
        }
    }
}

impl SelectionSource for TypedSelection {
    fn snapshot(&self) -> Option<RawSelection> {
        self.current.lock().ok().and_then(|current| current.clone())
    }
}

async fn run_chat(client: Arc<ChatClient>, color: bool) -> Result<(), CliError> {
    let keys = KeyBus::new();
    let surface = TerminalSurface::new(io::stdout()).with_color(color);
    let widget = ChatWidget::mount(Arc::clone(&client), surface, &keys);

    let typed = Arc::new(TypedSelection::default());
    let mut tracker = SelectionTracker::new(Arc::clone(&typed) as Arc<dyn SelectionSource>);

    let (tx, rx) = mpsc::channel(32);
    let handle = tokio::spawn(widget.run(rx, Some(tracker.subscribe())));

    println!("{HELP}");
    tx.send(WidgetEvent::Open).await.map_err(|_| CliError::EventLoop)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let event = match command {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{HELP}");
                continue;
            }
            "/health" => {
                let status = if client.check_health().await { "ok" } else { "unreachable" };
                println!("{} {status}", client.base_url());
                continue;
            }
            "/select" => {
                typed.set(arg.trim());
                tracker.signal(SelectionSignal::PointerUp);
                continue;
            }
            "/esc" => {
                keys.press(KeySignal::Escape);
                continue;
            }
            "/open" => WidgetEvent::Open,
            "/close" => WidgetEvent::Close,
            "/toggle" => WidgetEvent::Toggle,
            "/dismiss" => WidgetEvent::DismissError,
            "/clear" => WidgetEvent::ClearConversation,
            "/clear-selection" => WidgetEvent::ClearSelection,
            _ => WidgetEvent::Send(line.to_owned()),
        };
        tx.send(event).await.map_err(|_| CliError::EventLoop)?;
    }

    drop(tx);
    let widget = handle.await.map_err(|_| CliError::EventLoop)?;
    widget.unmount();
    Ok(())
}
