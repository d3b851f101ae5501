//! Raw row shape returned by the message store and the push channel.
//!
//! Every field is optional at the serde level so that a row missing a
//! required field decodes successfully and is then rejected by
//! [`Message::try_from`] with a precise [`RowError`], instead of failing deep
//! inside serde with a generic message. Field names accept both the store's
//! `snake_case` and the `camelCase` spelling used by the realtime payloads.

use serde::{Deserialize, Serialize};

use crate::message::{
    ConversationId, ExternalMessageId, MediaRef, Message, MessageBody, MessageId, MessageStatus,
    SenderId, Timestamp,
};

/// Errors raised when a store row cannot be turned into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    /// A required column was absent or null.
    #[error("row is missing required field `{0}`")]
    MissingField(&'static str),

    /// `created_at` was present but not RFC 3339.
    #[error("row has invalid created_at {value:?}: {source}")]
    InvalidTimestamp {
        /// The offending value.
        value: String,
        /// Underlying parse error.
        source: chrono::ParseError,
    },

    /// `status` was not a store-side status.
    #[error("row has invalid status {0:?}")]
    InvalidStatus(String),

    /// The payload was not a JSON object of the expected shape.
    #[error("row is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A message row as persisted by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageRow {
    /// Store id.
    pub id: Option<String>,
    /// Owning conversation.
    #[serde(alias = "conversationId")]
    pub conversation_id: Option<String>,
    /// Text payload.
    pub body: Option<String>,
    /// RFC 3339 creation time.
    #[serde(alias = "createdAt")]
    pub created_at: Option<String>,
    /// Author.
    #[serde(alias = "senderId")]
    pub sender_id: Option<String>,
    /// Gateway id.
    #[serde(alias = "externalMessageId", skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
    /// Store-side status (`sent`, `delivered`, `read`, `edited`, `deleted`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Media reference.
    #[serde(alias = "mediaRef", skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    /// Replied-to message id.
    #[serde(alias = "replyToId", skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

impl MessageRow {
    /// Decodes a JSON row and validates it into a [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] if the JSON is malformed or a required field
    /// is missing or invalid.
    pub fn decode_json(json: &str) -> Result<Message, RowError> {
        let row: Self = serde_json::from_str(json)?;
        Message::try_from(row)
    }

    /// Builds the timestamp-and-id pair the store orders by, tolerating
    /// malformed rows (they sort as the epoch with an empty id).
    #[must_use]
    pub fn order_key(&self) -> (Timestamp, String) {
        let ts = self
            .created_at
            .as_deref()
            .and_then(|v| Timestamp::parse_rfc3339(v).ok())
            .unwrap_or_else(|| Timestamp::from_millis(0));
        (ts, self.id.clone().unwrap_or_default())
    }
}

/// Maps a store-side status string to the engine's status.
///
/// Delivery receipts are all "confirmed" from the engine's point of view.
/// A missing status means a freshly inserted row.
fn parse_status(status: Option<&str>) -> Result<MessageStatus, RowError> {
    match status {
        None | Some("confirmed" | "sent" | "delivered" | "read" | "received") => {
            Ok(MessageStatus::Confirmed)
        }
        Some("edited") => Ok(MessageStatus::Edited),
        Some("deleted") => Ok(MessageStatus::Deleted),
        Some(other) => Err(RowError::InvalidStatus(other.to_string())),
    }
}

fn status_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Confirmed => "confirmed",
        MessageStatus::Edited => "edited",
        MessageStatus::Deleted => "deleted",
        MessageStatus::Pending => "pending",
        MessageStatus::Failed => "failed",
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = RowError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = row.id.ok_or(RowError::MissingField("id"))?;
        let conversation_id = row
            .conversation_id
            .ok_or(RowError::MissingField("conversation_id"))?;
        let raw_ts = row.created_at.ok_or(RowError::MissingField("created_at"))?;
        let created_at =
            Timestamp::parse_rfc3339(&raw_ts).map_err(|source| RowError::InvalidTimestamp {
                value: raw_ts.clone(),
                source,
            })?;
        let sender_id = row.sender_id.ok_or(RowError::MissingField("sender_id"))?;
        let status = parse_status(row.status.as_deref())?;

        // Pure-media rows carry no text; text rows must carry a body.
        let text = match (row.body, &row.media) {
            (Some(text), _) => text,
            (None, Some(_)) => String::new(),
            (None, None) => return Err(RowError::MissingField("body")),
        };

        Ok(Self {
            id: Some(MessageId::new(id)),
            client_temp_id: None,
            conversation_id: ConversationId::new(conversation_id),
            sender_id: SenderId::new(sender_id),
            external_message_id: row.external_message_id.map(ExternalMessageId::new),
            body: MessageBody {
                text,
                media: row.media,
            },
            created_at,
            status,
            reply_to_id: row.reply_to_id.map(MessageId::new),
        })
    }
}

impl From<&Message> for MessageRow {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.as_ref().map(|id| id.as_str().to_string()),
            conversation_id: Some(msg.conversation_id.as_str().to_string()),
            body: Some(msg.body.text.clone()),
            created_at: Some(msg.created_at.to_string()),
            sender_id: Some(msg.sender_id.as_str().to_string()),
            external_message_id: msg
                .external_message_id
                .as_ref()
                .map(|id| id.as_str().to_string()),
            status: Some(status_str(msg.status).to_string()),
            media: msg.body.media.clone(),
            reply_to_id: msg.reply_to_id.as_ref().map(|id| id.as_str().to_string()),
        }
    }
}
