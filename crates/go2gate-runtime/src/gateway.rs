//! [`CommandGateway`] – text in, reply out.
//!
//! Ties the extractor to the dispatcher and decides which string goes back
//! to the human:
//!
//! | Extraction | Dispatch result | Reply |
//! |---|---|---|
//! | object with known `cmd` | error | the `ERROR:` string |
//! | object with known `cmd` | sent | `say`, else the action ack |
//! | object with `none`/missing/unknown `cmd` | nothing sent | `say`, else raw text |
//! | tool-call object (`name`, no `cmd`) | any | tool-call reply |
//! | nothing found | nothing sent | trimmed raw text |

use go2gate_types::StructuredCommand;

use crate::dispatcher::{Dispatcher, is_error_reply};
use crate::extractor::extract;

pub struct CommandGateway {
    dispatcher: Dispatcher,
}

impl CommandGateway {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Turn model output into the reply for its human originator.
    ///
    /// Never fails; transport faults arrive as `ERROR:` strings.
    pub async fn reply(&self, model_text: &str) -> String {
        let fallback = model_text.trim();
        let Some(command) = extract(model_text) else {
            return fallback.to_string();
        };

        let StructuredCommand { cmd, say, tool } = command;
        if cmd.is_none()
            && let Some(tool) = tool
        {
            return self.dispatcher.handle_tool_call(&tool).await;
        }

        match self.dispatcher.handle(cmd.as_deref()).await {
            Some(result) if is_error_reply(&result) => result,
            Some(ack) => prefer_say(say, ack),
            None => prefer_say(say, fallback.to_string()),
        }
    }
}

fn prefer_say(say: String, otherwise: String) -> String {
    if say.is_empty() { otherwise } else { say }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ActionTable, GENERIC_ACK};
    use crate::testing::RecordingLink;
    use std::sync::Arc;

    fn gateway(link: &Arc<RecordingLink>) -> CommandGateway {
        CommandGateway::new(Dispatcher::new(link.clone(), ActionTable::default()))
    }

    #[tokio::test]
    async fn say_overrides_ack_for_prose_wrapped_command() {
        let link = Arc::new(RecordingLink::default());
        let reply = gateway(&link)
            .reply(r#"blah {"cmd":"follow","say":"ok"} blah"#)
            .await;
        assert_eq!(reply, "ok");
        assert_eq!(link.sent(), vec![("따라가라".to_string(), 1)]);
    }

    #[tokio::test]
    async fn ack_used_when_say_is_empty() {
        let link = Arc::new(RecordingLink::default());
        let reply = gateway(&link).reply(r#"{"cmd":"block","say":"  "}"#).await;
        assert_eq!(reply, "앞을 가로막겠습니다.");
    }

    #[tokio::test]
    async fn error_wins_over_say() {
        let link = Arc::new(RecordingLink::failing());
        let reply = gateway(&link)
            .reply(r#"{"cmd":"research","say":"탐색할게요"}"#)
            .await;
        assert!(is_error_reply(&reply), "got {reply}");
    }

    #[tokio::test]
    async fn none_command_replies_with_say() {
        let link = Arc::new(RecordingLink::default());
        let reply = gateway(&link)
            .reply("```json\n{\"cmd\":\"none\",\"say\":\"안녕하세요\"}\n```")
            .await;
        assert_eq!(reply, "안녕하세요");
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_without_say_echoes_raw_text() {
        let link = Arc::new(RecordingLink::default());
        let text = r#" {"cmd":"dance"} "#;
        assert_eq!(gateway(&link).reply(text).await, text.trim());
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn plain_text_passes_through() {
        let link = Arc::new(RecordingLink::default());
        assert_eq!(gateway(&link).reply("  그냥 대화입니다.\n").await, "그냥 대화입니다.");
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn tool_call_shape_is_dispatched_by_name() {
        let link = Arc::new(RecordingLink::default());
        let g = gateway(&link);
        assert_eq!(
            g.reply(r#"{"name":"explore_room","arguments":{}}"#).await,
            GENERIC_ACK
        );
        assert_eq!(
            g.reply(r#"{"name":"sit_down","arguments":{}}"#).await,
            "ERROR: Unknown tool name: sit_down"
        );
        assert_eq!(link.sent(), vec![("주변을 탐색하라".to_string(), 1)]);
    }

    #[tokio::test]
    async fn cmd_takes_precedence_over_name() {
        let link = Arc::new(RecordingLink::default());
        let reply = gateway(&link)
            .reply(r#"{"cmd":"block","name":"follow_user"}"#)
            .await;
        assert_eq!(reply, "앞을 가로막겠습니다.");
        assert_eq!(link.sent(), vec![("길을 막아라".to_string(), 1)]);
    }
}
