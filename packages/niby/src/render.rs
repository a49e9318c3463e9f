//! Turning session events into terminal output.
//!
//! Assistant text and undelivered-message notices go to `out` (stdout);
//! connection notices and reasoning go to `err` (stderr).

use std::borrow::Cow;
use std::io::{self, Write};

use niby_client::{ConnectionState, Message, Role, SessionEvent};

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Strip control characters except newline and tab, so model output cannot
/// move the cursor or recolor the terminal.
pub fn render(text: &str) -> Cow<'_, str> {
    if !text.chars().any(is_stripped) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().filter(|c| !is_stripped(*c)).collect())
}

fn is_stripped(c: char) -> bool {
    c.is_control() && c != '\n' && c != '\t'
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "niby",
    }
}

/// Print the whole conversation, one message per block.
pub fn history<W: Write>(out: &mut W, messages: &[Message]) -> io::Result<()> {
    if messages.is_empty() {
        writeln!(out, "(no messages yet)")?;
    }
    for message in messages {
        writeln!(out, "{}: {}", speaker(message.role), render(&message.text))?;
    }
    out.flush()
}

/// Inline transcript line for a message that was logged but never sent.
pub fn undelivered<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "[niby: not connected; your message was not sent]")?;
    out.flush()
}

pub struct Transcript<O, E> {
    out: O,
    err: E,
    show_reasoning: bool,
    /// An assistant line is open on `out` and still growing.
    streaming: bool,
}

impl<O: Write, E: Write> Transcript<O, E> {
    pub fn new(out: O, err: E, show_reasoning: bool) -> Self {
        Self {
            out,
            err,
            show_reasoning,
            streaming: false,
        }
    }

    pub fn event(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::StateChanged { state, attempt } => match state {
                ConnectionState::Connecting if *attempt > 0 => {
                    self.notice(&format!("reconnecting (attempt {})", attempt + 1))?
                }
                ConnectionState::Connecting => self.notice("connecting")?,
                ConnectionState::Open => self.notice("connected")?,
                ConnectionState::Closed => self.notice("disconnected")?,
            },
            SessionEvent::ReconnectScheduled { delay, reason, .. } => {
                self.notice(&format!(
                    "{reason}; retrying in {:.1}s",
                    delay.as_secs_f64()
                ))?;
            }
            SessionEvent::MessageAppended { message, .. } => {
                if message.role == Role::Assistant {
                    self.end_line()?;
                    write!(
                        self.out,
                        "{}: {}",
                        speaker(message.role),
                        render(&message.text)
                    )?;
                    self.streaming = true;
                }
            }
            SessionEvent::MessageExtended { fragment, .. } => {
                write!(self.out, "{}", render(fragment))?;
            }
            SessionEvent::TurnEnded { .. } => self.end_line()?,
            SessionEvent::Reasoning { text } => {
                if self.show_reasoning && !text.is_empty() {
                    writeln!(self.err, "{DIM}thinking: {}{RESET}", render(text))?;
                }
            }
            SessionEvent::ModeChanged { mode } => self.notice(&format!("mode: {mode}"))?,
            SessionEvent::Frame { .. } => {}
        }
        self.out.flush()?;
        self.err.flush()
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.err, "[niby: {text}]")
    }

    fn end_line(&mut self) -> io::Result<()> {
        if std::mem::take(&mut self.streaming) {
            writeln!(self.out)?;
        }
        Ok(())
    }
}
