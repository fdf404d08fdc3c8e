//! `RobotLink` – the outbound seam between command dispatch and the robot.
//!
//! The dispatcher only ever talks to this trait, so the network sender can be
//! swapped for a recording double in tests or for another transport without
//! touching extraction or dispatch logic.

use async_trait::async_trait;
use go2gate_types::GateError;

/// `value` sent with a command when the caller has nothing more specific.
pub const DEFAULT_COMMAND_VALUE: i64 = 1;

/// A channel that delivers one named command to the robot.
#[async_trait]
pub trait RobotLink: Send + Sync {
    /// Deliver `{name, value}` as exactly one message.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::ConnectTimeout`], [`GateError::Send`] or
    /// [`GateError::Resolve`] when the message could not be handed to the
    /// network. Failures are always reported, never swallowed.
    async fn send(&self, name: &str, value: i64) -> Result<(), GateError>;

    /// Human-readable destination, e.g. `"tcp://127.0.0.1:5555"`.
    fn describe(&self) -> String;

    /// Send `name` with [`DEFAULT_COMMAND_VALUE`].
    async fn send_action(&self, name: &str) -> Result<(), GateError> {
        self.send(name, DEFAULT_COMMAND_VALUE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl RobotLink for RecordingLink {
        async fn send(&self, name: &str, value: i64) -> Result<(), GateError> {
            self.sent.lock().unwrap().push((name.to_string(), value));
            Ok(())
        }

        fn describe(&self) -> String {
            "memory://recording".to_string()
        }
    }

    #[tokio::test]
    async fn send_action_uses_default_value() {
        let link = RecordingLink::default();
        link.send_action("따라가라").await.unwrap();
        link.send("길을 막아라", 3).await.unwrap();

        let sent = link.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![("따라가라".to_string(), 1), ("길을 막아라".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn usable_as_shared_trait_object() {
        let concrete = Arc::new(RecordingLink::default());
        let link: Arc<dyn RobotLink> = concrete.clone();
        link.send_action("scan").await.unwrap();
        assert_eq!(link.describe(), "memory://recording");
        assert_eq!(concrete.sent.lock().unwrap().len(), 1);
    }
}
