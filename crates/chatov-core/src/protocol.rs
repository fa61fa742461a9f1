//! Wire format of `GET get-messages`.
//!
//! The whole payload is decoded before any message is handed out, so a malformed message
//! anywhere in the batch rejects the batch as a unit.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Message, MessageId, ReplyContext, SessionId},
    variants::ImageVariantSet,
};

/// Opaque id as it appears on the wire. The reference server sends numbers; other servers
/// may send strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Number(serde_json::Number),
    Text(String),
}

impl Token {
    pub fn into_string(self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Text(s) => s,
        }
    }
}

impl From<u64> for Token {
    fn from(v: u64) -> Self {
        Token::Number(v.into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireBatch {
    pub sid: Token,
    pub messages: Vec<WireMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub mid: Token,
    pub user: String,
    pub user_color: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badges: Option<Vec<ImageVariantSet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replying_to_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replying_to_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        let reply = w.replying_to_user.map(|user| ReplyContext {
            user,
            text: w.replying_to_message.unwrap_or_default(),
        });
        Message {
            id: MessageId(w.mid.into_string()),
            author: w.user,
            author_color: w.user_color,
            text: w.message,
            badges: w.badges.unwrap_or_default(),
            reply,
        }
    }
}

/// A decoded, validated response.
#[derive(Clone, Debug)]
pub struct Batch {
    pub session_id: SessionId,
    pub messages: Vec<Message>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Body is not JSON at all.
    #[error("malformed json: {0}")]
    Parse(serde_json::Error),
    /// Body is JSON but not the expected shape (missing or mistyped fields).
    #[error("unexpected payload shape: {0}")]
    Shape(serde_json::Error),
}

pub fn decode_batch(body: &str) -> Result<Batch, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(DecodeError::Parse)?;
    let wire: WireBatch = serde_json::from_value(value).map_err(DecodeError::Shape)?;
    Ok(Batch {
        session_id: SessionId(wire.sid.into_string()),
        messages: wire.messages.into_iter().map(Message::from).collect(),
    })
}
