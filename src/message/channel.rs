//! Logical kernel channels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the five logical communication lines to a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Primary request/reply channel.
    #[serde(rename = "shell")]
    Shell,
    /// Privileged request/reply channel (shutdown, restart, interrupt).
    #[serde(rename = "control")]
    Control,
    /// Input prompts.
    #[serde(rename = "stdin")]
    Stdin,
    /// Broadcast events, including periodic status.
    #[serde(rename = "iopub")]
    IOPub,
    /// Liveness only.
    #[serde(rename = "hb")]
    Heartbeat,
}

impl Channel {
    /// Channels that carry messages and get a monitor loop.
    pub const MONITORED: [Channel; 4] = [
        Channel::IOPub,
        Channel::Shell,
        Channel::Stdin,
        Channel::Control,
    ];

    /// Wire name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Shell => "shell",
            Channel::Control => "control",
            Channel::Stdin => "stdin",
            Channel::IOPub => "iopub",
            Channel::Heartbeat => "hb",
        }
    }

    /// True for the broadcast channel, whose messages are never correlation keys.
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Channel::IOPub)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(Channel::Shell),
            "control" => Ok(Channel::Control),
            "stdin" => Ok(Channel::Stdin),
            "iopub" => Ok(Channel::IOPub),
            "hb" => Ok(Channel::Heartbeat),
            other => Err(format!("unknown channel `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for ch in [
            Channel::Shell,
            Channel::Control,
            Channel::Stdin,
            Channel::IOPub,
            Channel::Heartbeat,
        ] {
            assert_eq!(ch.as_str().parse::<Channel>(), Ok(ch));
        }
        assert!("websocket".parse::<Channel>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Channel::IOPub).unwrap();
        assert_eq!(json, "\"iopub\"");
    }
}
