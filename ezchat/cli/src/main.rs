//! ezchat
//!
//! Line-oriented terminal chat over a streaming chat-completion endpoint.
//! Each line read from stdin is sent as a user turn; the reply is printed to
//! stdout as it streams in.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from ~/.config/ezchat/client.toml and EZCHAT_* variables
//! ezchat
//!
//! # Point at another server and model
//! ezchat --endpoint http://gpu-box:8000 --model llama3.2 --format ndjson
//!
//! # With verbose logging (logs go to stderr)
//! RUST_LOG=debug ezchat
//! ```
//!
//! # Commands
//!
//! - `/models`: list the server's models
//! - `/model NAME`: select a model
//! - `/clear`: forget the conversation
//! - `/retry`: re-send the conversation as it stands
//! - `/quit`: exit
//!
//! # Signals
//!
//! - SIGINT during a reply: cancel it, keeping what arrived
//! - SIGINT while idle: exit

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ezchat_core::{
    config, ChatClient, ChatError, ChatSession, ConfigOverrides, HttpModelCatalog, ModelSelector,
    Termination, TurnOutcome, TurnUpdate, WireFormat,
};

/// Streaming chat client
#[derive(Debug, Parser)]
#[command(name = "ezchat", version, about)]
struct Args {
    /// Configuration file (default: ~/.config/ezchat/client.toml)
    #[arg(long, env = "EZCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Model to chat with
    #[arg(long)]
    model: Option<String>,

    /// Response format: sse-text, sse-json, ndjson or raw
    #[arg(long)]
    format: Option<String>,

    /// System prompt sent with every request
    #[arg(long)]
    system: Option<String>,
}

impl Args {
    fn overrides(&self) -> anyhow::Result<ConfigOverrides> {
        let mut overrides = ConfigOverrides::new();
        if let Some(endpoint) = &self.endpoint {
            overrides = overrides.with_endpoint(endpoint.clone());
        }
        if let Some(format) = &self.format {
            overrides = overrides.with_wire_format(format.parse::<WireFormat>()?);
        }
        if let Some(model) = &self.model {
            overrides = overrides.with_default_model(model.clone());
        }
        if let Some(system) = &self.system {
            overrides = overrides.with_system_prompt(system.clone());
        }
        Ok(overrides)
    }
}

/// One line of input, interpreted
enum Command<'a> {
    Chat(&'a str),
    Models,
    Model(&'a str),
    Clear,
    Retry,
    Quit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Chat(line);
        };
        let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        match (name, arg.trim()) {
            ("models", _) => Self::Models,
            ("model", model) if !model.is_empty() => Self::Model(model),
            ("clear", _) => Self::Clear,
            ("retry", _) => Self::Retry,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(line),
        }
    }
}

/// Print streamed text as it arrives
async fn render(mut updates: mpsc::Receiver<TurnUpdate>) {
    let mut stdout = std::io::stdout();
    while let Some(update) = updates.recv().await {
        match update {
            TurnUpdate::Token { delta, .. } => {
                let _ = write!(stdout, "{delta}");
                let _ = stdout.flush();
            }
            TurnUpdate::Finalized { .. } => {
                let _ = writeln!(stdout);
            }
            TurnUpdate::Started { .. } | TurnUpdate::Discarded { .. } => {}
        }
    }
}

/// Run one turn, cancelling it on SIGINT
async fn run_turn(session: &mut ChatSession, text: Option<&str>) -> Result<TurnOutcome, ChatError> {
    let cancel = CancellationToken::new();
    let turn = async {
        match text {
            Some(text) => session.send(text, cancel.clone()).await,
            None => session.reissue(cancel.clone()).await,
        }
    };
    tokio::pin!(turn);

    loop {
        tokio::select! {
            result = &mut turn => return result,
            _ = signal::ctrl_c(), if !cancel.is_cancelled() => {
                info!("Cancelling reply");
                cancel.cancel();
            }
        }
    }
}

fn report(outcome: &TurnOutcome) {
    match &outcome.termination {
        Termination::Completed => {}
        Termination::Cancelled => eprintln!("[cancelled]"),
        Termination::Failed(e) => eprintln!("[error] {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ezchat=info".parse()?)
                .add_directive("ezchat_core=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = config::load_config_from_path(args.config.clone().or_else(config::default_config_path))?;
    args.overrides()?.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration ({}): {e}", config.source()))?;

    info!(
        endpoint = %config.endpoint,
        format = %config.wire_format,
        source = %config.source(),
        "Starting ezchat"
    );

    let client = ChatClient::from_config(&config)?;
    let catalog = Arc::new(
        HttpModelCatalog::new(Arc::clone(client.transport()), config.endpoint.clone())
            .with_selected(config.default_model.clone()),
    );
    if catalog.selected_model().is_none() {
        warn!("No model selected; use /models and /model NAME");
    }

    let (mut session, updates) =
        ChatSession::new(client, catalog.clone()).with_update_channel(config.update_buffer);
    let renderer = tokio::spawn(render(updates));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let result = match Command::parse(&line) {
            Command::Chat("") => continue,
            Command::Chat(text) => run_turn(&mut session, Some(text)).await.map(|o| report(&o)),
            Command::Retry => run_turn(&mut session, None).await.map(|o| report(&o)),
            Command::Models => catalog.list_models().await.map(|models| {
                let selected = catalog.selected_model();
                for model in models {
                    let marker = if selected.as_deref() == Some(model.as_str()) { "*" } else { " " };
                    println!("{marker} {model}");
                }
            }),
            Command::Model(name) => catalog.select_model(name).await,
            Command::Clear => session.clear(),
            Command::Quit => break,
            Command::Unknown(line) => {
                eprintln!("unknown command: {line}");
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("[error] {e}");
        }
    }

    drop(session);
    let _ = renderer.await;
    info!("Bye");
    Ok(())
}
