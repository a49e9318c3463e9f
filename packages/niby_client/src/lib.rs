//! Niby client - resilient streaming chat over a WebSocket
//!
//! This crate keeps one persistent connection to a Niby assistant, reconnects
//! with capped exponential backoff when it drops, and reassembles the
//! token-by-token response stream into discrete conversation messages. A
//! `<think>...</think>` reasoning segment embedded in the stream is split out
//! and reported separately from the visible reply.
//!
//! It has no UI dependencies: callers observe [`SessionEvent`]s and render them
//! however they like.
//!
//! # Example
//!
//! ```no_run
//! use niby_client::{ChatSession, Mode, SessionConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut session = ChatSession::new(SessionConfig::new("ws://127.0.0.1:8080/niby-ws"));
//!     let mut events = session.subscribe();
//!     let handle = session.start();
//!
//!     handle.set_mode(Mode::Plan).await.unwrap();
//!     if let Err(e) = handle.submit("hello").await {
//!         eprintln!("not sent: {e}");
//!     }
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SessionEvent::MessageAppended { message, .. } => println!("{}", message.text),
//!             SessionEvent::MessageExtended { fragment, .. } => print!("{fragment}"),
//!             SessionEvent::Reasoning { text } => eprintln!("thinking: {text}"),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

pub mod backoff;
pub mod connection;
pub mod conversation;
mod error;
pub mod reasoning;
pub mod reassembler;
pub mod request;
pub mod session;
mod transport;

pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionLifecycle, ConnectionState};
pub use conversation::{ConversationLog, Message, Role};
pub use error::{SessionError, TransportError};
pub use reasoning::{Extracted, extract};
pub use reassembler::{Fold, Ingest, StreamReassembler};
pub use request::{Mode, OutboundRequest, UnknownMode, WireFormat};
pub use session::{
    ChatSession, EventStream, ReasoningPolicy, SessionConfig, SessionEvent, SessionHandle,
    SessionSnapshot, SubmitOutcome,
};
