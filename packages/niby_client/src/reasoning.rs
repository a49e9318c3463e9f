//! Splits the hidden reasoning segment out of a raw inbound payload.
//!
//! The assistant interleaves its deliberation with the reply as
//! `<think>...</think>` spans carried verbatim in the text stream. There is no
//! parse failure mode: a payload without (or with unbalanced) tags is simply
//! all visible text.

use std::sync::LazyLock;

use regex::Regex;

pub const OPEN_TAG: &str = "<think>";
pub const CLOSE_TAG: &str = "</think>";

static THINK_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("static reasoning pattern"));

/// Result of splitting one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Trimmed content of the first reasoning span, empty if there was none.
    pub reasoning: String,
    /// The payload with every reasoning span removed, trimmed.
    pub visible: String,
    /// The payload with every reasoning span removed, whitespace intact.
    pub remainder: String,
}

impl Extracted {
    pub fn has_reasoning(&self) -> bool {
        !self.reasoning.is_empty()
    }

    pub fn has_visible(&self) -> bool {
        !self.visible.is_empty()
    }
}

/// Extract the first reasoning span and strip all of them from `raw`.
pub fn extract(raw: &str) -> Extracted {
    let reasoning = THINK_SPAN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let remainder = THINK_SPAN.replace_all(raw, "").into_owned();
    let visible = remainder.trim().to_string();

    Extracted {
        reasoning,
        visible,
        remainder,
    }
}
