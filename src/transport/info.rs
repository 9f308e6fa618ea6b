//! Connection info handed out by the kernel process supervisor.

use serde::{Deserialize, Serialize};

use crate::message::Channel;

/// Where and how to reach a kernel's channels.
///
/// Field names follow the kernel connection file, so a file can be read with
/// `serde_json::from_str` directly. Ports may be `0` (placeholders) until the
/// supervisor has provisioned the process; see [`ConnectionInfo::is_provisioned`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub shell_port: u16,
    #[serde(default)]
    pub iopub_port: u16,
    #[serde(default)]
    pub stdin_port: u16,
    #[serde(default)]
    pub control_port: u16,
    #[serde(default)]
    pub hb_port: u16,
    /// Message signing key (empty disables signing).
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_signature_scheme() -> String {
    "hmac-sha256".to_string()
}

impl ConnectionInfo {
    /// Port assigned to `channel`.
    pub fn port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Shell => self.shell_port,
            Channel::IOPub => self.iopub_port,
            Channel::Stdin => self.stdin_port,
            Channel::Control => self.control_port,
            Channel::Heartbeat => self.hb_port,
        }
    }

    /// True once every channel has a real (non-zero) port.
    pub fn is_provisioned(&self) -> bool {
        [
            Channel::Shell,
            Channel::IOPub,
            Channel::Stdin,
            Channel::Control,
            Channel::Heartbeat,
        ]
        .into_iter()
        .all(|ch| self.port(ch) != 0)
    }

    /// `transport://ip:port` for `channel`.
    pub fn endpoint(&self, channel: Channel) -> String {
        let sep = if self.transport == "ipc" { "-" } else { ":" };
        format!("{}://{}{}{}", self.transport, self.ip, sep, self.port(channel))
    }
}
