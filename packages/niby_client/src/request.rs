//! Outbound request building: utterance + mode → one text frame.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which assistant pipeline the server should route the utterance to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Basic,
    Plan,
    Act,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Basic, Mode::Plan, Mode::Act];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Basic => "basic",
            Mode::Plan => "plan",
            Mode::Act => "act",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode '{0}' (expected basic, plan or act)")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

/// How a request is put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `{"message": "...", "mode": "basic"}`
    #[default]
    Json,
    /// The bare utterance, for back ends that do not parse JSON. The mode is
    /// not transmitted.
    PlainText,
}

/// A validated user utterance ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub message: String,
    pub mode: Mode,
}

impl OutboundRequest {
    /// Trim `utterance`; `None` if nothing is left.
    pub fn build(utterance: &str, mode: Mode) -> Option<Self> {
        let message = utterance.trim();
        if message.is_empty() {
            return None;
        }
        Some(Self {
            message: message.to_string(),
            mode,
        })
    }

    pub fn encode(&self, format: WireFormat) -> Result<String, serde_json::Error> {
        match format {
            WireFormat::Json => serde_json::to_string(self),
            WireFormat::PlainText => Ok(self.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_trims_utterance() {
        let req = OutboundRequest::build("  hi \n", Mode::Basic).unwrap();
        assert_eq!(req.message, "hi");
        assert_eq!(req.mode, Mode::Basic);
    }

    #[test]
    fn build_rejects_blank() {
        assert!(OutboundRequest::build("", Mode::Plan).is_none());
        assert!(OutboundRequest::build(" \t\n ", Mode::Plan).is_none());
    }

    #[test]
    fn json_wire_shape() {
        let req = OutboundRequest::build("hi", Mode::Basic).unwrap();
        assert_eq!(
            req.encode(WireFormat::Json).unwrap(),
            r#"{"message":"hi","mode":"basic"}"#
        );
    }

    #[test]
    fn json_escapes_content() {
        let req = OutboundRequest::build("say \"hi\"\nplease", Mode::Act).unwrap();
        let wire = req.encode(WireFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["message"], "say \"hi\"\nplease");
        assert_eq!(value["mode"], "act");
    }

    #[test]
    fn plain_text_wire_shape() {
        let req = OutboundRequest::build(" hi ", Mode::Plan).unwrap();
        assert_eq!(req.encode(WireFormat::PlainText).unwrap(), "hi");
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("plan".parse::<Mode>().unwrap(), Mode::Plan);
        assert_eq!(" ACT ".parse::<Mode>().unwrap(), Mode::Act);
        let err = "turbo".parse::<Mode>().unwrap_err();
        assert_eq!(err, UnknownMode("turbo".into()));
    }

    #[test]
    fn mode_display_matches_serde() {
        for mode in Mode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{mode}\""));
        }
    }

    #[test]
    fn default_mode_is_basic() {
        assert_eq!(Mode::default(), Mode::Basic);
    }
}
