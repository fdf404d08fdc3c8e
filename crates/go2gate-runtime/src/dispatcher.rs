//! Command dispatch: structured command → bound action → robot send.
//!
//! [`ActionTable`] holds one [`ActionBinding`] per canonical [`Action`]: the
//! wire name sent to the robot, the phrases that select it, and the
//! acknowledgment shown to the human. [`Dispatcher`] resolves a command
//! against the table and drives the [`RobotLink`].
//!
//! Transport failures never escape as `Err`: they come back as a reply that
//! starts with [`ERROR_MARKER`], which callers test with [`is_error_reply`].

use std::sync::Arc;

use go2gate_hal::RobotLink;
use go2gate_types::Action;
use tracing::{debug, info, warn};

/// Prefix that marks a reply as a failure.
pub const ERROR_MARKER: &str = "ERROR:";

/// Explicit "do nothing" command.
pub const NO_OP: &str = "none";

/// Reply for a successful generic tool call.
pub const GENERIC_ACK: &str = "명령을 전송했습니다.";

pub fn is_error_reply(reply: &str) -> bool {
    reply.starts_with(ERROR_MARKER)
}

fn normalize(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}

/// Static wiring for one canonical action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBinding {
    pub action: Action,
    /// Name sent to the robot as `{"name": wire_name, ...}`.
    pub wire_name: String,
    /// Normalized phrases that select this action exactly.
    pub synonyms: Vec<String>,
    /// Normalized fragments that select this action inside a tool name.
    pub keywords: Vec<String>,
    pub ack: String,
}

impl ActionBinding {
    fn builtin(action: Action, wire_name: String) -> Self {
        let (synonyms, keywords, ack): (&[&str], &[&str], &str) = match action {
            Action::Follow => (
                &["follow", "따라", "따라가", "따라가라", "따라와"],
                &["따라", "follow"],
                "따라가겠습니다.",
            ),
            Action::Block => (
                &["block", "막", "막아", "길을 막아", "길을 막아라"],
                &["막", "block"],
                "앞을 가로막겠습니다.",
            ),
            Action::Research => (
                &["research", "탐색", "탐색해", "수색", "수색해", "scan", "explore"],
                &["탐색", "수색", "research", "scan", "explore"],
                "주변을 탐색하겠습니다.",
            ),
        };
        let mut binding = Self {
            action,
            synonyms: Vec::new(),
            keywords: keywords.iter().map(|k| normalize(k)).collect(),
            ack: ack.to_string(),
            wire_name,
        };
        let wire = binding.wire_name.clone();
        binding.add_synonyms(synonyms.iter().copied().chain([wire.as_str()]));
        binding
    }

    fn add_synonyms<'a>(&mut self, phrases: impl IntoIterator<Item = &'a str>) {
        for phrase in phrases {
            let phrase = normalize(phrase);
            if !phrase.is_empty() && !self.synonyms.contains(&phrase) {
                self.synonyms.push(phrase);
            }
        }
    }

    fn matches(&self, normalized_cmd: &str) -> bool {
        self.synonyms.iter().any(|s| s == normalized_cmd)
    }

    fn matches_tool(&self, normalized_name: &str) -> bool {
        self.keywords.iter().any(|k| normalized_name.contains(k.as_str()))
    }
}

/// One binding per canonical action, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTable {
    bindings: [ActionBinding; 3],
}

impl ActionTable {
    /// Build the table from the configured wire names.
    pub fn new(
        follow: impl Into<String>,
        block: impl Into<String>,
        research: impl Into<String>,
    ) -> Self {
        Self {
            bindings: [
                ActionBinding::builtin(Action::Follow, follow.into()),
                ActionBinding::builtin(Action::Block, block.into()),
                ActionBinding::builtin(Action::Research, research.into()),
            ],
        }
    }

    /// Add extra phrases that select `action`.
    pub fn with_synonyms<I, S>(mut self, action: Action, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases: Vec<S> = phrases.into_iter().collect();
        self.binding_mut(action)
            .add_synonyms(phrases.iter().map(|p| p.as_ref()));
        self
    }

    pub fn binding(&self, action: Action) -> &ActionBinding {
        &self.bindings[Self::index(action)]
    }

    pub fn bindings(&self) -> &[ActionBinding] {
        &self.bindings
    }

    /// Exact, case-insensitive synonym lookup.
    pub fn resolve(&self, cmd: &str) -> Option<&ActionBinding> {
        let cmd = normalize(cmd);
        self.bindings.iter().find(|b| b.matches(&cmd))
    }

    /// Substring keyword lookup for generic tool-call names.
    pub fn match_tool(&self, name: &str) -> Option<&ActionBinding> {
        let name = normalize(name);
        self.bindings.iter().find(|b| b.matches_tool(&name))
    }

    fn binding_mut(&mut self, action: Action) -> &mut ActionBinding {
        &mut self.bindings[Self::index(action)]
    }

    fn index(action: Action) -> usize {
        match action {
            Action::Follow => 0,
            Action::Block => 1,
            Action::Research => 2,
        }
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new("따라가라", "길을 막아라", "주변을 탐색하라")
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Maps commands to robot sends and human-facing replies.
pub struct Dispatcher {
    link: Arc<dyn RobotLink>,
    actions: ActionTable,
}

impl Dispatcher {
    pub fn new(link: Arc<dyn RobotLink>, actions: ActionTable) -> Self {
        Self { link, actions }
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    pub fn link(&self) -> &Arc<dyn RobotLink> {
        &self.link
    }

    /// Dispatch an extracted `cmd`.
    ///
    /// Returns `None` for a missing, empty, `none` or unrecognized command,
    /// in which case nothing is sent. Otherwise exactly one send happens and
    /// the reply is the action's acknowledgment or an [`ERROR_MARKER`] string.
    pub async fn handle(&self, cmd: Option<&str>) -> Option<String> {
        let raw = cmd?;
        let normalized = normalize(raw);
        if normalized.is_empty() || normalized == NO_OP {
            debug!("no-op command");
            return None;
        }
        let Some(binding) = self.actions.resolve(&normalized) else {
            warn!(cmd = raw, "unknown command ignored");
            return None;
        };
        Some(self.send(binding, &binding.ack).await)
    }

    /// Dispatch a generic `{"name": ..}` tool call by keyword.
    pub async fn handle_tool_call(&self, name: &str) -> String {
        match self.actions.match_tool(name) {
            Some(binding) => self.send(binding, GENERIC_ACK).await,
            None => {
                warn!(tool = name, "unknown tool name");
                format!("{ERROR_MARKER} Unknown tool name: {name}")
            }
        }
    }

    /// Send `action` directly, bypassing extraction.
    pub async fn execute(&self, action: Action) -> String {
        let binding = self.actions.binding(action);
        self.send(binding, &binding.ack).await
    }

    async fn send(&self, binding: &ActionBinding, ack: &str) -> String {
        match self.link.send_action(&binding.wire_name).await {
            Ok(()) => {
                info!(
                    action = binding.action.as_str(),
                    wire_name = %binding.wire_name,
                    "action dispatched"
                );
                ack.to_string()
            }
            Err(e) => {
                warn!(
                    action = binding.action.as_str(),
                    target = %self.link.describe(),
                    error = %e,
                    "action send failed"
                );
                format!("{ERROR_MARKER} {e}")
            }
        }
    }
}
