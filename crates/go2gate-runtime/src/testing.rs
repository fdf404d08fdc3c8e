//! In-memory [`RobotLink`] double shared by the dispatcher and gateway tests.

use std::sync::Mutex;

use async_trait::async_trait;
use go2gate_hal::RobotLink;
use go2gate_types::GateError;

#[derive(Default)]
pub(crate) struct RecordingLink {
    sent: Mutex<Vec<(String, i64)>>,
    fail: bool,
}

impl RecordingLink {
    /// A link whose every send fails as a refused connection.
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, i64)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RobotLink for RecordingLink {
    async fn send(&self, name: &str, value: i64) -> Result<(), GateError> {
        if self.fail {
            return Err(GateError::Send {
                addr: "127.0.0.1:5555".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.sent.lock().unwrap().push((name.to_string(), value));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://recording".to_string()
    }
}
