use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// `kind` stamped on every envelope whose producer did not supply one.
pub const DEFAULT_KIND: &str = "robot_event";

/// Network transport used to reach the robot or to accept its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

impl Transport {
    /// URI scheme used when synthesizing a peer `source`, e.g. `udp://1.2.3.4:5`.
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Transport {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(GateError::InvalidTransport(other.to_string())),
        }
    }
}

/// Canonical robot behaviours the dispatcher can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Follow,
    Block,
    Research,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Follow, Action::Block, Action::Research];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Follow => "follow",
            Action::Block => "block",
            Action::Research => "research",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

/// Normalized event record published on the bus.
///
/// Holds the producer's JSON object verbatim (field order preserved) plus the
/// `kind` and `source` defaults applied at ingestion. Immutable once built;
/// the bus hands out shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Wrap a producer object, defaulting `kind` and, when `peer` is given
    /// and the producer did not set one, `source`.
    pub fn from_object(mut fields: Map<String, Value>, peer: Option<&str>) -> Self {
        let has_kind = matches!(fields.get("kind"), Some(Value::String(k)) if !k.is_empty());
        if !has_kind {
            fields.insert("kind".to_string(), Value::String(DEFAULT_KIND.to_string()));
        }
        if let Some(peer) = peer {
            if !fields.contains_key("source") {
                fields.insert("source".to_string(), Value::String(peer.to_string()));
            }
        }
        Self(fields)
    }

    /// Fallback shape for payloads that are not a JSON object.
    pub fn from_text(text: &str, peer: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("kind".to_string(), Value::String(DEFAULT_KIND.to_string()));
        fields.insert("source".to_string(), Value::String(peer.to_string()));
        fields.insert("text".to_string(), Value::String(text.to_string()));
        Self(fields)
    }

    /// Normalize one raw socket message.
    ///
    /// Decodes lossily as UTF-8 and strips surrounding whitespace; an empty
    /// result yields `None`. A JSON object is kept with defaults applied,
    /// anything else (plain text, arrays, scalars, malformed JSON) becomes a
    /// `{kind, source, text}` envelope.
    pub fn from_frame(bytes: &[u8], peer: &str) -> Option<Self> {
        let decoded = String::from_utf8_lossy(bytes);
        let text = decoded.trim();
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => Some(Self::from_object(fields, Some(peer))),
            _ => Some(Self::from_text(text, peer)),
        }
    }

    /// Structured submission from a trusted in-process producer: only `kind`
    /// is defaulted, `source` is kept as given (or left absent).
    pub fn from_submission(fields: Map<String, Value>) -> Self {
        Self::from_object(fields, None)
    }

    pub fn kind(&self) -> &str {
        self.0
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_KIND)
    }

    pub fn source(&self) -> Option<&str> {
        self.0.get("source").and_then(Value::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.0.get("text").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Overwrite `source` with the observed peer regardless of what the
    /// producer claimed.
    pub fn stamp_source(&mut self, peer: &str) {
        self.0
            .insert("source".to_string(), Value::String(peer.to_string()));
    }

    /// Compact JSON text, one envelope per push frame.
    pub fn to_json(&self) -> Result<String, GateError> {
        serde_json::to_string(&self.0).map_err(|e| GateError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Structured command
// ---------------------------------------------------------------------------

/// `{cmd, say}` object recovered from free-form model output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuredCommand {
    /// `follow` / `block` / `research` / `none`, or whatever the model wrote.
    pub cmd: Option<String>,
    /// Short reply for the human, already trimmed. Empty when absent.
    #[serde(default)]
    pub say: String,
    /// Name of a generic `{"name": .., "arguments": ..}` tool call, set only
    /// when the object carries no `cmd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl StructuredCommand {
    pub fn from_object(fields: &Map<String, Value>) -> Self {
        let cmd = fields
            .get("cmd")
            .and_then(Value::as_str)
            .map(str::to_string);
        let say = fields
            .get("say")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let tool = if cmd.is_none() {
            fields
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };
        Self { cmd, say, tool }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Gateway-wide error type.
///
/// `Bind` is the only startup-fatal class; everything a steady-state loop
/// encounters is logged and absorbed instead of surfacing here.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("connect to {addr} timed out after {timeout_ms} ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("send to {addr} failed: {reason}")]
    Send { addr: String, reason: String },

    #[error("cannot resolve {target}: {reason}")]
    Resolve { target: String, reason: String },

    #[error("cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown transport {0:?} (expected \"tcp\" or \"udp\")")]
    InvalidTransport(String),
}
