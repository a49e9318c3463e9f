//! ChatSession: one conversation with the assistant.
//!
//! A session is a single tokio task that owns everything mutable: the
//! connection lifecycle, the conversation log, the reassembler's turn flag,
//! the quiet-period timer and the reconnect timer. Callers talk to it through
//! a cloneable [`SessionHandle`] and observe it through [`EventStream`]s.
//! Every subscriber has its own unbounded queue, so a slow reader sees every
//! [`SessionEvent`] in the order things happened, late but never lossy.

use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::connection::{ConnectionLifecycle, ConnectionState};
use crate::conversation::{ConversationLog, Message};
use crate::error::SessionError;
use crate::reassembler::{Fold, StreamReassembler};
use crate::request::{Mode, OutboundRequest, WireFormat};
use crate::transport::{self, TransportEvent};

/// Silence after the last chunk that ends an assistant turn.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(400);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// What happens to the reasoning panel when a turn ends on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPolicy {
    /// Emit an empty `Reasoning` event when the quiet period closes a turn.
    #[default]
    ClearOnTurnEnd,
    /// Leave the last reasoning visible until the next submission.
    Persist,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Full WebSocket URL, e.g. `ws://127.0.0.1:8080/niby-ws`.
    pub url: String,
    pub quiet_period: Duration,
    pub reconnect: ReconnectPolicy,
    /// Handshake deadline; `None` waits as long as the OS does.
    pub connect_timeout: Option<Duration>,
    pub wire_format: WireFormat,
    pub initial_mode: Mode,
    pub reasoning_policy: ReasoningPolicy,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            quiet_period: DEFAULT_QUIET_PERIOD,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            wire_format: WireFormat::default(),
            initial_mode: Mode::default(),
            reasoning_policy: ReasoningPolicy::default(),
        }
    }
}

/// Per-subscriber event queue. Yields `None` once the session has stopped.
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

/// Everything a session reports, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection lifecycle moved. `attempt` is the consecutive-failure
    /// count after the transition.
    StateChanged { state: ConnectionState, attempt: u32 },
    /// A reconnect will be tried after `delay`.
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// A raw inbound payload, before reassembly.
    Frame { payload: String },
    MessageAppended { index: usize, message: Message },
    /// The streaming assistant message at `index` grew by `fragment`; `text`
    /// is its full content so far.
    MessageExtended {
        index: usize,
        fragment: String,
        text: String,
    },
    /// The assistant turn ending at `index` is complete.
    TurnEnded { index: usize },
    /// Reasoning panel content; empty means clear it.
    Reasoning { text: String },
    ModeChanged { mode: Mode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Echoed into the log and handed to the transport.
    Sent,
    /// Blank input; nothing logged, nothing sent.
    Ignored,
}

/// Point-in-time copy of session state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub attempt: u32,
    pub mode: Mode,
    pub turn_open: bool,
    pub messages: Vec<Message>,
}

enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<SubmitOutcome, SessionError>>,
    },
    SetMode(Mode),
    Connect,
    Close,
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Subscribe(mpsc::UnboundedSender<SessionEvent>),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A session that has not started yet. Subscribe first, then
/// [`start`](Self::start), so no event is missed.
pub struct ChatSession {
    config: SessionConfig,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Spawn the session task and begin connecting.
    pub fn start(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            lifecycle: ConnectionLifecycle::new(self.config.reconnect),
            log: ConversationLog::new(),
            reassembler: StreamReassembler::new(),
            mode: self.config.initial_mode,
            generation: 0,
            connection: None,
            quiet_timer: None,
            reconnect_timer: None,
            subscribers: self.subscribers,
            commands: commands_rx,
            transport_tx,
            transport_rx,
            config: self.config,
        };
        tokio::spawn(actor.run());

        SessionHandle {
            commands: commands_tx,
        }
    }
}

/// Cloneable control surface for a running session. The session shuts down
/// when the last handle is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Observe a running session. The stream starts with the events that
    /// follow the registration; earlier ones are not replayed.
    pub async fn subscribe(&self) -> Result<EventStream, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe(tx)).await?;
        Ok(rx)
    }

    /// Echo `text` into the log and transmit it with the current mode.
    ///
    /// Fails with [`SessionError::NotConnected`] when the connection is not
    /// open; the echo stays in the log either way.
    pub async fn submit(&self, text: impl Into<String>) -> Result<SubmitOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), SessionError> {
        self.send(Command::SetMode(mode)).await
    }

    /// Start a handshake now if the connection is closed. No-op otherwise.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.send(Command::Connect).await
    }

    /// Drop the connection and stop retrying until [`connect`](Self::connect).
    pub async fn close(&self) -> Result<(), SessionError> {
        self.send(Command::Close).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Stop the session: cancel both timers, release the transport, end the
    /// task. Resolves once the task has cleaned up.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }
}

struct ActiveConnection {
    cancel: CancellationToken,
    /// Set once the handshake completes.
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct SessionActor {
    config: SessionConfig,
    lifecycle: ConnectionLifecycle,
    log: ConversationLog,
    reassembler: StreamReassembler,
    mode: Mode,
    /// Bumped on every connection attempt and on explicit close; transport
    /// events tagged with an older value are stale.
    generation: u64,
    connection: Option<ActiveConnection>,
    quiet_timer: Option<Pin<Box<Sleep>>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    commands: mpsc::Receiver<Command>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl SessionActor {
    async fn run(mut self) {
        info!(url = %self.config.url, mode = %self.mode, "session started");

        self.emit_state();
        self.spawn_connection();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone.
                        self.teardown();
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = self.transport_rx.recv() => self.handle_transport(event),
                _ = elapsed(&mut self.quiet_timer) => {
                    self.quiet_timer = None;
                    self.finish_turn(self.config.reasoning_policy == ReasoningPolicy::ClearOnTurnEnd);
                }
                _ = elapsed(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    debug!(attempt = self.lifecycle.attempt(), "reconnect timer fired");
                    self.connect();
                }
            }
        }

        info!(url = %self.config.url, "session stopped");
    }

    /// Returns false once the session should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Submit { text, reply } => {
                let _ = reply.send(self.submit(&text));
            }
            Command::SetMode(mode) => {
                if mode != self.mode {
                    info!(from = %self.mode, to = %mode, "mode changed");
                    self.mode = mode;
                    self.emit(SessionEvent::ModeChanged { mode });
                }
            }
            Command::Connect => self.connect(),
            Command::Close => self.close(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Subscribe(tx) => self.subscribers.push(tx),
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn submit(&mut self, text: &str) -> Result<SubmitOutcome, SessionError> {
        let Some(request) = OutboundRequest::build(text, self.mode) else {
            debug!("ignoring blank submission");
            return Ok(SubmitOutcome::Ignored);
        };
        let frame = request.encode(self.config.wire_format)?;

        // A new question closes whatever reply was still streaming, so the
        // open message is always the last one.
        self.quiet_timer = None;
        self.finish_turn(false);
        self.emit(SessionEvent::Reasoning {
            text: String::new(),
        });

        let message = Message::user(request.message);
        let index = self.log.push(message.clone());
        self.emit(SessionEvent::MessageAppended { index, message });

        let outbound = match (&self.connection, self.lifecycle.state()) {
            (
                Some(ActiveConnection {
                    outbound: Some(tx), ..
                }),
                ConnectionState::Open,
            ) => tx,
            (_, state) => {
                warn!(state = %state, "message not sent: not connected");
                return Err(SessionError::NotConnected);
            }
        };
        outbound
            .send(frame)
            .map_err(|_| SessionError::NotConnected)?;

        debug!(mode = %self.mode, index, "request sent");
        Ok(SubmitOutcome::Sent)
    }

    fn connect(&mut self) {
        if !self.lifecycle.begin_connect() {
            debug!(state = %self.lifecycle.state(), "connect ignored");
            return;
        }
        self.reconnect_timer = None;
        info!(
            url = %self.config.url,
            attempt = self.lifecycle.attempt(),
            "connecting"
        );
        self.emit_state();
        self.spawn_connection();
    }

    fn close(&mut self) {
        self.reconnect_timer = None;
        self.drop_connection();
        if self.lifecycle.shutdown() {
            info!(url = %self.config.url, "connection closed on request");
            self.emit_state();
        }
    }

    fn teardown(&mut self) {
        self.quiet_timer = None;
        self.close();
    }

    fn spawn_connection(&mut self) {
        self.generation += 1;
        let cancel = CancellationToken::new();
        transport::spawn_connection(
            self.config.url.clone(),
            self.generation,
            self.config.connect_timeout,
            self.transport_tx.clone(),
            cancel.clone(),
        );
        self.connection = Some(ActiveConnection {
            cancel,
            outbound: None,
        });
    }

    fn drop_connection(&mut self) {
        self.generation += 1;
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened {
                generation,
                outbound,
            } => {
                if generation != self.generation || !self.lifecycle.opened() {
                    debug!(generation, "dropping stale open");
                    return;
                }
                if let Some(connection) = self.connection.as_mut() {
                    connection.outbound = Some(outbound);
                }
                info!(url = %self.config.url, "connected");
                self.emit_state();
            }
            TransportEvent::Frame {
                generation,
                payload,
            } => {
                if generation != self.generation {
                    return;
                }
                self.emit(SessionEvent::Frame {
                    payload: payload.clone(),
                });
                self.ingest(&payload);
            }
            TransportEvent::Closed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                self.connection = None;
                let Some(closure) = self.lifecycle.closed() else {
                    return;
                };
                warn!(
                    error = %error,
                    attempt = closure.attempt,
                    delay_ms = closure.reconnect_in.as_millis() as u64,
                    "connection closed, will reconnect"
                );
                self.emit_state();
                self.emit(SessionEvent::ReconnectScheduled {
                    attempt: closure.attempt,
                    delay: closure.reconnect_in,
                    reason: error.to_string(),
                });
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(closure.reconnect_in)));
            }
        }
    }

    fn ingest(&mut self, payload: &str) {
        let ingest = self.reassembler.ingest(payload, &mut self.log);

        if let Some(text) = ingest.reasoning {
            self.emit(SessionEvent::Reasoning { text });
        }

        let Some((fold, fragment)) = ingest.fold else {
            return;
        };
        let Some(message) = self.log.get(fold.index()).cloned() else {
            return;
        };
        let event = match fold {
            Fold::Appended { index } => SessionEvent::MessageAppended { index, message },
            Fold::Extended { index } => SessionEvent::MessageExtended {
                index,
                fragment,
                text: message.text,
            },
        };
        self.emit(event);

        self.quiet_timer = Some(Box::pin(tokio::time::sleep(self.config.quiet_period)));
    }

    fn finish_turn(&mut self, clear_reasoning: bool) {
        if !self.reassembler.end_turn() {
            return;
        }
        let index = self.log.len().saturating_sub(1);
        debug!(index, "turn complete");
        self.emit(SessionEvent::TurnEnded { index });
        if clear_reasoning {
            self.emit(SessionEvent::Reasoning {
                text: String::new(),
            });
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.lifecycle.state(),
            attempt: self.lifecycle.attempt(),
            mode: self.mode,
            turn_open: self.reassembler.is_turn_open(),
            messages: self.log.messages().to_vec(),
        }
    }

    fn emit_state(&mut self) {
        self.emit(SessionEvent::StateChanged {
            state: self.lifecycle.state(),
            attempt: self.lifecycle.attempt(),
        });
    }

    fn emit(&mut self, event: SessionEvent) {
        // Forget subscribers that dropped their stream.
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Resolve when `timer` fires; never resolve while it is unset.
async fn elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
