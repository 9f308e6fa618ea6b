//! # Outbound operations and their channel roles.
//!
//! Every outbound request funnels through [`KernelBridge::request`](crate::KernelBridge::request),
//! which looks up the channel here:
//!
//! | Operation                                                                     | Channel   |
//! |-------------------------------------------------------------------------------|-----------|
//! | execute, complete, inspect, history, is_complete, comm_info, kernel_info      | `shell`   |
//! | shutdown, restart, interrupt                                                  | `control` |
//! | input (reply to a prompt)                                                     | `stdin`   |

use serde_json::{Map, Value};

use crate::message::Channel;

/// A kernel operation that produces one outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    Execute,
    Complete,
    Inspect,
    History,
    IsComplete,
    CommInfo,
    KernelInfo,
    Shutdown,
    Restart,
    Interrupt,
    Input,
}

impl Request {
    /// Channel the request is sent on.
    pub fn channel(&self) -> Channel {
        match self {
            Request::Shutdown | Request::Restart | Request::Interrupt => Channel::Control,
            Request::Input => Channel::Stdin,
            _ => Channel::Shell,
        }
    }

    /// Message type of the request.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Request::Execute => "execute_request",
            Request::Complete => "complete_request",
            Request::Inspect => "inspect_request",
            Request::History => "history_request",
            Request::IsComplete => "is_complete_request",
            Request::CommInfo => "comm_info_request",
            Request::KernelInfo => "kernel_info_request",
            Request::Shutdown | Request::Restart => "shutdown_request",
            Request::Interrupt => "interrupt_request",
            Request::Input => "input_reply",
        }
    }

    /// Method name recorded in the correlation entry.
    pub fn method_name(&self) -> &'static str {
        match self {
            Request::Execute => "execute",
            Request::Complete => "complete",
            Request::Inspect => "inspect",
            Request::History => "history",
            Request::IsComplete => "is_complete",
            Request::CommInfo => "comm_info",
            Request::KernelInfo => "kernel_info",
            Request::Shutdown => "shutdown",
            Request::Restart => "restart",
            Request::Interrupt => "interrupt",
            Request::Input => "input",
        }
    }

    /// Request content as sent on the wire.
    ///
    /// `shutdown_request` carries a `restart` flag: forced to `true` for [`Request::Restart`],
    /// defaulted to `false` for [`Request::Shutdown`]. Non-object content is replaced by an
    /// empty object for those two operations.
    pub fn content(&self, content: Value) -> Value {
        let restart = match self {
            Request::Restart => true,
            Request::Shutdown => false,
            _ => return content,
        };
        let mut map = match content {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if restart {
            map.insert("restart".into(), Value::Bool(true));
        } else {
            map.entry("restart").or_insert(Value::Bool(false));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn control_operations_use_control_channel() {
        assert_eq!(Request::Shutdown.channel(), Channel::Control);
        assert_eq!(Request::Restart.channel(), Channel::Control);
        assert_eq!(Request::Interrupt.channel(), Channel::Control);
    }

    #[test]
    fn restart_sets_the_restart_flag() {
        let content = Request::Restart.content(json!({"restart": false, "extra": 1}));
        assert_eq!(content, json!({"restart": true, "extra": 1}));
        assert_eq!(Request::Restart.content(Value::Null), json!({"restart": true}));

        assert_eq!(Request::Shutdown.content(json!({})), json!({"restart": false}));
        assert_eq!(
            Request::Shutdown.content(json!({"restart": true})),
            json!({"restart": true})
        );
        assert_eq!(Request::Execute.content(json!({"code": "1"})), json!({"code": "1"}));
    }

    #[test]
    fn prompt_replies_use_stdin() {
        assert_eq!(Request::Input.channel(), Channel::Stdin);
        assert_eq!(Request::Input.msg_type(), "input_reply");
    }

    #[test]
    fn everything_else_uses_shell() {
        for req in [
            Request::Execute,
            Request::Complete,
            Request::Inspect,
            Request::History,
            Request::IsComplete,
            Request::CommInfo,
            Request::KernelInfo,
        ] {
            assert_eq!(req.channel(), Channel::Shell, "{req:?}");
        }
    }
}
