//! `niby chat`: a line-oriented REPL over one session.

use anyhow::{Context, Result};
use niby_client::{ChatSession, EventStream, Mode, SessionError, SessionHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::FileConfig;
use crate::render::{self, Transcript};

const HELP: &str = "\
/mode [basic|plan|act]  show or select the assistant mode
/reconnect              connect now if disconnected
/disconnect             drop the connection and stop retrying
/history                print the conversation so far
/quit                   leave (also Ctrl-C or Ctrl-D)
//text                  send a line that starts with '/'";

#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// WebSocket URL (overrides the [server] config section)
    #[arg(long)]
    pub url: Option<String>,

    /// Initial mode: basic, plan or act
    #[arg(long)]
    pub mode: Option<Mode>,

    /// Print the assistant's reasoning to stderr
    #[arg(long)]
    pub show_reasoning: bool,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Say(String),
    ShowMode,
    SetMode(Mode),
    Reconnect,
    Disconnect,
    History,
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };
    if command.starts_with('/') {
        return Input::Say(command.to_string());
    }

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();
    match (name, arg) {
        ("mode", None) => Input::ShowMode,
        ("mode", Some(arg)) => match arg.parse() {
            Ok(mode) => Input::SetMode(mode),
            Err(e) => Input::Invalid(format!("{e}")),
        },
        ("reconnect", None) => Input::Reconnect,
        ("disconnect", None) => Input::Disconnect,
        ("history", None) => Input::History,
        ("help", None) => Input::Help,
        ("quit" | "exit", None) => Input::Quit,
        _ => Input::Invalid(format!("unknown command '/{command}' (try /help)")),
    }
}

pub async fn run(file_config: &FileConfig, args: ChatArgs) -> Result<()> {
    let mut config = file_config.session_config(args.url.as_deref());
    if let Some(mode) = args.mode {
        config.initial_mode = mode;
    }
    let show_reasoning = args.show_reasoning || file_config.chat.show_reasoning;

    info!(url = %config.url, mode = %config.initial_mode, "starting chat");

    let mut session = ChatSession::new(config);
    let printer = tokio::spawn(print_events(session.subscribe(), show_reasoning));
    let handle = session.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        // EOF
        let Some(line) = line else { break };

        if !dispatch(&handle, parse_input(&line)).await? {
            break;
        }
    }

    // Already gone is fine.
    let _ = handle.shutdown().await;
    printer.await.context("Transcript printer panicked")?;
    Ok(())
}

/// Returns false when the user asked to leave.
async fn dispatch(handle: &SessionHandle, input: Input) -> Result<bool> {
    match input {
        Input::Say(text) => match handle.submit(text).await {
            Ok(outcome) => debug!(?outcome, "submitted"),
            Err(SessionError::NotConnected) => {
                render::undelivered(&mut std::io::stdout())
                    .context("Failed to write transcript")?;
            }
            Err(e) => return Err(e).context("Failed to submit message"),
        },
        Input::ShowMode => {
            let snapshot = handle.snapshot().await?;
            eprintln!("[niby: mode: {}]", snapshot.mode);
        }
        Input::SetMode(mode) => handle.set_mode(mode).await?,
        Input::Reconnect => handle.connect().await?,
        Input::Disconnect => handle.close().await?,
        Input::History => {
            let snapshot = handle.snapshot().await?;
            render::history(&mut std::io::stdout(), &snapshot.messages)
                .context("Failed to print history")?;
        }
        Input::Help => eprintln!("{HELP}"),
        Input::Invalid(message) => eprintln!("[niby: {message}]"),
        Input::Quit => return Ok(false),
    }
    Ok(true)
}

/// Runs until the session stops and its stream ends.
async fn print_events(mut events: EventStream, show_reasoning: bool) {
    let mut transcript = Transcript::new(std::io::stdout(), std::io::stderr(), show_reasoning);
    while let Some(event) = events.recv().await {
        if let Err(e) = transcript.event(&event) {
            warn!(error = %e, "failed to write transcript");
            break;
        }
    }
}
