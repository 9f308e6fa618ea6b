//! # Message envelope.
//!
//! An [`Envelope`] is the deframed form of one kernel message:
//!
//! ```text
//! frame 0  header          (JSON, structured)
//! frame 1  parent_header   (JSON, structured; `{}` when not a reply)
//! frame 2  metadata        (JSON, structured; may carry `cellId`)
//! frame 3  content         (JSON, opaque; parsed lazily for status messages)
//! frame 4… buffers         (opaque)
//! ```
//!
//! Routing identities, the delimiter and the signature are not part of the
//! envelope; see [`transport::wire`](crate::transport::wire).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChannelError;
use crate::state::ExecutionState;

/// Metadata key holding the unit-of-work (cell) identifier.
pub const UNIT_OF_WORK_KEY: &str = "cellId";

/// Message header.
///
/// Unknown fields are kept in `extra` so re-framing a forwarded message loses nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// RFC 3339 timestamp, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Header {
    /// Parsed `date`, if present and well-formed.
    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = self.date.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|d| d.with_timezone(&chrono::Utc))
    }
}

/// Deframed kernel message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub header: Header,
    pub parent_header: Header,
    pub metadata: Map<String, Value>,
    /// Raw content frame.
    pub content: Vec<u8>,
    pub buffers: Vec<Vec<u8>>,
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: ExecutionState,
}

impl Envelope {
    /// Parses `[header, parent_header, metadata, content, buffers...]`.
    ///
    /// Fails with [`ChannelError::Decode`] when fewer than four frames are present or a
    /// structured frame is not a JSON object.
    pub fn from_frames(frames: Vec<Vec<u8>>) -> Result<Self, ChannelError> {
        if frames.len() < 4 {
            return Err(ChannelError::decode(format!(
                "expected at least 4 frames, got {}",
                frames.len()
            )));
        }
        let mut it = frames.into_iter();
        let header = parse_frame::<Header>(it.next(), "header")?;
        let parent_header = parse_frame::<Header>(it.next(), "parent_header")?;
        let metadata = parse_frame::<Map<String, Value>>(it.next(), "metadata")?;
        let content = it.next().unwrap_or_default();
        let buffers = it.collect();

        Ok(Self {
            header,
            parent_header,
            metadata,
            content,
            buffers,
        })
    }

    /// Serializes back into `[header, parent_header, metadata, content, buffers...]`.
    pub fn to_frames(&self) -> Result<Vec<Vec<u8>>, ChannelError> {
        let encode = |v: Result<Vec<u8>, serde_json::Error>| {
            v.map_err(|e| ChannelError::decode(e.to_string()))
        };
        let mut frames = Vec::with_capacity(4 + self.buffers.len());
        frames.push(encode(serde_json::to_vec(&self.header))?);
        frames.push(encode(serde_json::to_vec(&self.parent_header))?);
        frames.push(encode(serde_json::to_vec(&self.metadata))?);
        frames.push(if self.content.is_empty() {
            b"{}".to_vec()
        } else {
            self.content.clone()
        });
        frames.extend(self.buffers.iter().cloned());
        Ok(frames)
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Identifier of the request this message answers, if any.
    pub fn parent_msg_id(&self) -> Option<&str> {
        Some(self.parent_header.msg_id.as_str()).filter(|id| !id.is_empty())
    }

    /// Unit-of-work identifier from `metadata.cellId`.
    pub fn unit_of_work_id(&self) -> Option<&str> {
        self.metadata
            .get(UNIT_OF_WORK_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    #[inline]
    pub fn is_status(&self) -> bool {
        self.header.msg_type == "status"
    }

    /// Execution state carried by a `status` message.
    ///
    /// Content is only parsed here; `None` for other message types or malformed content.
    pub fn execution_state(&self) -> Option<ExecutionState> {
        if !self.is_status() {
            return None;
        }
        serde_json::from_slice::<StatusContent>(&self.content)
            .ok()
            .map(|c| c.execution_state)
    }

    /// Content parsed as JSON (`{}` when empty).
    pub fn content_json(&self) -> Result<Value, ChannelError> {
        if self.content.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_slice(&self.content).map_err(|e| ChannelError::decode(e.to_string()))
    }
}

fn parse_frame<T: serde::de::DeserializeOwned + Default>(
    frame: Option<Vec<u8>>,
    name: &str,
) -> Result<T, ChannelError> {
    match frame {
        Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)
            .map_err(|e| ChannelError::decode(format!("{name}: {e}"))),
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frames(header: Value, parent: Value, metadata: Value, content: Value) -> Vec<Vec<u8>> {
        vec![
            serde_json::to_vec(&header).unwrap(),
            serde_json::to_vec(&parent).unwrap(),
            serde_json::to_vec(&metadata).unwrap(),
            serde_json::to_vec(&content).unwrap(),
        ]
    }

    #[test]
    fn parses_status_message() {
        let env = Envelope::from_frames(frames(
            json!({"msg_id": "m2", "msg_type": "status", "date": "2024-05-01T10:00:00Z"}),
            json!({"msg_id": "m1", "msg_type": "execute_request"}),
            json!({}),
            json!({"execution_state": "idle"}),
        ))
        .unwrap();

        assert_eq!(env.msg_id(), "m2");
        assert_eq!(env.parent_msg_id(), Some("m1"));
        assert_eq!(env.execution_state(), Some(ExecutionState::Idle));
        assert!(env.header.timestamp().is_some());
    }

    #[test]
    fn empty_parent_has_no_id() {
        let env = Envelope::from_frames(frames(
            json!({"msg_id": "m1", "msg_type": "execute_request"}),
            json!({}),
            json!({"cellId": "cell-1"}),
            json!({"code": "1+1"}),
        ))
        .unwrap();

        assert_eq!(env.parent_msg_id(), None);
        assert_eq!(env.unit_of_work_id(), Some("cell-1"));
        assert_eq!(env.execution_state(), None);
    }

    #[test]
    fn keeps_unknown_header_fields_and_buffers() {
        let mut raw = frames(
            json!({"msg_id": "m1", "msg_type": "comm_msg", "subshell_id": "s1"}),
            json!({}),
            json!({}),
            json!({}),
        );
        raw.push(b"\x00\x01".to_vec());
        let env = Envelope::from_frames(raw).unwrap();
        let out = env.to_frames().unwrap();

        assert_eq!(out.len(), 5);
        let header: Value = serde_json::from_slice(&out[0]).unwrap();
        assert_eq!(header["subshell_id"], "s1");
        assert_eq!(out[1], b"{}".to_vec());
        assert_eq!(out[4], b"\x00\x01".to_vec());
    }

    #[test]
    fn too_few_frames_is_a_decode_error() {
        let err = Envelope::from_frames(vec![b"{}".to_vec()]).unwrap_err();
        assert_eq!(err.as_label(), "channel_decode");
    }

    #[test]
    fn malformed_header_is_a_decode_error() {
        let err = Envelope::from_frames(vec![
            b"invalid".to_vec(),
            b"{}".to_vec(),
            b"{}".to_vec(),
            b"{}".to_vec(),
        ])
        .unwrap_err();
        assert!(matches!(err, ChannelError::Decode { .. }));
    }
}
