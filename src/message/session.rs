//! Message construction for requests the bridge originates itself.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::message::{Envelope, Header};

/// Protocol version stamped on manufactured headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Identity used when the bridge builds messages (introspection requests,
/// manufactured status broadcasts, outbound requests).
#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    username: String,
}

impl Session {
    /// Creates a session with a fresh random id.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            username: username.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Builds a header with a fresh message id and the current time.
    pub fn header(&self, msg_type: &str) -> Header {
        Header {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: msg_type.to_string(),
            session: self.session_id.clone(),
            username: self.username.clone(),
            date: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
            version: PROTOCOL_VERSION.to_string(),
            extra: Map::new(),
        }
    }

    /// Builds a complete message.
    pub fn message(
        &self,
        msg_type: &str,
        content: &Value,
        parent: Option<&Header>,
        metadata: Map<String, Value>,
    ) -> Envelope {
        Envelope {
            header: self.header(msg_type),
            parent_header: parent.cloned().unwrap_or_default(),
            metadata,
            content: serde_json::to_vec(content).unwrap_or_else(|_| b"{}".to_vec()),
            buffers: Vec::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new("kernel-bridge")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn headers_get_unique_ids() {
        let s = Session::default();
        let a = s.header("kernel_info_request");
        let b = s.header("kernel_info_request");
        assert_ne!(a.msg_id, b.msg_id);
        assert_eq!(a.session, s.session_id());
        assert!(a.timestamp().is_some());
    }

    #[test]
    fn message_links_parent() {
        let s = Session::default();
        let parent = s.header("status");
        let msg = s.message(
            "status",
            &json!({"execution_state": "idle"}),
            Some(&parent),
            Map::new(),
        );
        assert_eq!(msg.parent_msg_id(), Some(parent.msg_id.as_str()));
        assert_eq!(msg.execution_state(), Some(crate::ExecutionState::Idle));
    }
}
