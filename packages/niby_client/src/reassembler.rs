//! Folds streamed chunks into the conversation log.
//!
//! The transport never marks the end of an assistant turn, so a turn stays
//! open until the owner reports that the quiet period elapsed without a new
//! chunk (see [`StreamReassembler::end_turn`]). Timers live with the owner;
//! this type only holds the open/closed flag.
//!
//! Chunks carry their own inter-token spacing. A chunk that opens a turn is
//! stripped of leading whitespace; a chunk that continues one is appended
//! as-is (minus reasoning spans) so that `"lo "` followed by `"world"` keeps
//! its space. Whitespace-only chunks are dropped either way.

use crate::conversation::{ConversationLog, Message};
use crate::reasoning;

/// How a visible fragment landed in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// A new assistant message was pushed at `index`, opening a turn.
    Appended { index: usize },
    /// The open assistant message at `index` grew by the fragment.
    Extended { index: usize },
}

impl Fold {
    pub fn index(&self) -> usize {
        match self {
            Fold::Appended { index } | Fold::Extended { index } => *index,
        }
    }
}

/// What one payload produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ingest {
    /// Non-empty reasoning text to forward to the reasoning observer.
    pub reasoning: Option<String>,
    /// Where the visible fragment went, and the exact text written.
    pub fold: Option<(Fold, String)>,
}

impl Ingest {
    /// True when the owner should (re)start the quiet-period timer.
    pub fn folded(&self) -> bool {
        self.fold.is_some()
    }
}

#[derive(Debug, Default)]
pub struct StreamReassembler {
    turn_open: bool,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_turn_open(&self) -> bool {
        self.turn_open
    }

    /// Split `raw` and fold its visible part into `log`.
    pub fn ingest(&mut self, raw: &str, log: &mut ConversationLog) -> Ingest {
        let extracted = reasoning::extract(raw);
        let visible = extracted.has_visible();
        let reasoning = extracted.has_reasoning().then_some(extracted.reasoning);

        if !visible {
            return Ingest {
                reasoning,
                fold: None,
            };
        }

        if self.turn_open
            && let Some(index) = log.extend_last_assistant(&extracted.remainder)
        {
            return Ingest {
                reasoning,
                fold: Some((Fold::Extended { index }, extracted.remainder)),
            };
        }

        self.turn_open = true;
        let fragment = extracted.remainder.trim_start().to_string();
        let index = log.push(Message::assistant(fragment.clone()));
        Ingest {
            reasoning,
            fold: Some((Fold::Appended { index }, fragment)),
        }
    }

    /// Close the current turn. Returns whether one was open.
    pub fn end_turn(&mut self) -> bool {
        std::mem::take(&mut self.turn_open)
    }
}
