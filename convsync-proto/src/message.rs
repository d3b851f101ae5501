//! Message model shared by every `convsync` component.
//!
//! All identifiers are opaque newtypes. Store-assigned ids are strings (the
//! backing store decides their shape); client temp ids are UUID v7 so that
//! pending messages created in quick succession stay time-ordered.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body text written into soft-deleted messages by the store.
pub const TOMBSTONE_TEXT: &str = "This message was deleted";

/// Identifier assigned by the backing store once a message is persisted.
///
/// Ordering is lexicographic on the underlying string, which is the same
/// ordering the store applies when breaking `created_at` ties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a store-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally generated identifier carried by a message while it is pending.
///
/// Never sent to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientTempId(Uuid);

impl ClientTempId {
    /// Creates a new time-ordered temp id (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ClientTempId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientTempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientTempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

/// Identifies a conversation thread (in practice, the patient's address).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps a conversation key.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies who authored a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(String);

impl SenderId {
    /// Wraps a sender identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the outbound messaging gateway assigned to a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalMessageId(String);

impl ExternalMessageId {
    /// Wraps a gateway identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExternalMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
///
/// Serialized as RFC 3339 (`2024-01-01T00:00:00.000Z`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current instant, truncated to milliseconds.
    #[must_use]
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    ///
    /// Out-of-range values clamp to the epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }

    /// Parses an RFC 3339 timestamp.
    ///
    /// # Errors
    ///
    /// Returns the chrono parse error if `value` is not valid RFC 3339.
    pub fn parse_rfc3339(value: &str) -> Result<Self, chrono::ParseError> {
        let parsed = DateTime::parse_from_rfc3339(value)?;
        Ok(Self::from_millis(parsed.timestamp_millis()))
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Absolute distance between two timestamps.
    #[must_use]
    pub fn abs_diff(&self, other: &Self) -> Duration {
        Duration::from_millis(self.as_millis().abs_diff(other.as_millis()))
    }

    /// Returns a timestamp `offset` later, saturating at the representable range.
    #[must_use]
    pub fn saturating_add(&self, offset: Duration) -> Self {
        let millis = i64::try_from(offset.as_millis()).unwrap_or(i64::MAX);
        Self::from_millis(self.as_millis().saturating_add(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// Kind of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Photo or sticker.
    Image,
    /// Voice note or audio file.
    Audio,
    /// PDF or other document.
    Document,
    /// Shared contact card.
    Contact,
    /// Payment request card.
    PaymentCard,
}

/// Reference to media stored elsewhere. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// What kind of media this is.
    pub kind: MediaKind,
    /// Where the media can be fetched from.
    pub url: String,
    /// Optional caption shown with the media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Text payload plus optional media reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Message text; may be empty for pure-media messages.
    pub text: String,
    /// Attached media, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

impl MessageBody {
    /// A text-only body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    /// A media body; the caption (if any) doubles as the text.
    #[must_use]
    pub fn media(media: MediaRef) -> Self {
        Self {
            text: media.caption.clone().unwrap_or_default(),
            media: Some(media),
        }
    }

    /// The body the store writes into soft-deleted messages.
    #[must_use]
    pub fn tombstone() -> Self {
        Self::text(TOMBSTONE_TEXT)
    }
}

/// Lifecycle state of a message in the merged list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Created locally, not yet confirmed by the store.
    Pending,
    /// Persisted by the store.
    Confirmed,
    /// Persisted, body replaced by a later edit.
    Edited,
    /// Soft-deleted; body is a tombstone.
    Deleted,
    /// Local send failed or timed out. Terminal.
    Failed,
}

impl MessageStatus {
    /// Whether this status belongs to a message the store has not confirmed.
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// Key that identifies an entry in the merged list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Confirmed entry, keyed by its store id.
    Stored(MessageId),
    /// Local entry, keyed by its client temp id.
    Local(ClientTempId),
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stored(id) => write!(f, "{id}"),
            Self::Local(temp) => write!(f, "{temp}"),
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned id; `None` while pending.
    pub id: Option<MessageId>,
    /// Local id; set only while pending (or failed).
    #[serde(skip)]
    pub client_temp_id: Option<ClientTempId>,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: SenderId,
    /// Gateway id, once the gateway has accepted the message.
    pub external_message_id: Option<ExternalMessageId>,
    /// Text and media payload.
    pub body: MessageBody,
    /// Ordering timestamp. Not unique.
    pub created_at: Timestamp,
    /// Lifecycle state.
    pub status: MessageStatus,
    /// Weak reference to the message this one replies to.
    pub reply_to_id: Option<MessageId>,
}

impl Message {
    /// Builds a confirmed message as the store would return it.
    pub fn confirmed(
        id: impl Into<String>,
        conversation_id: ConversationId,
        sender_id: SenderId,
        body: MessageBody,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: Some(MessageId::new(id)),
            client_temp_id: None,
            conversation_id,
            sender_id,
            external_message_id: None,
            body,
            created_at,
            status: MessageStatus::Confirmed,
            reply_to_id: None,
        }
    }

    /// Builds a locally pending message.
    #[must_use]
    pub fn pending(
        client_temp_id: ClientTempId,
        conversation_id: ConversationId,
        sender_id: SenderId,
        body: MessageBody,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: None,
            client_temp_id: Some(client_temp_id),
            conversation_id,
            sender_id,
            external_message_id: None,
            body,
            created_at,
            status: MessageStatus::Pending,
            reply_to_id: None,
        }
    }

    /// Sets the reply reference.
    #[must_use]
    pub fn replying_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to_id = Some(MessageId::new(id));
        self
    }

    /// Sets the gateway id.
    #[must_use]
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_message_id = Some(ExternalMessageId::new(id));
        self
    }

    /// Returns the key identifying this entry in the merged list.
    ///
    /// Entries with neither id nor temp id cannot be built through the
    /// public constructors; they are keyed as an empty stored id.
    #[must_use]
    pub fn key(&self) -> MessageKey {
        match (&self.id, self.client_temp_id) {
            (Some(id), _) => MessageKey::Stored(id.clone()),
            (None, Some(temp)) => MessageKey::Local(temp),
            (None, None) => MessageKey::Stored(MessageId::new(String::new())),
        }
    }

    /// Whether this message is still waiting for store confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    /// Total order used by the merged list.
    ///
    /// `created_at` ascending; ties put stored entries (by id) before local
    /// entries (by temp id).
    #[must_use]
    pub fn order_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| match (&self.id, &other.id) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => self.client_temp_id.cmp(&other.client_temp_id),
            })
    }
}

/// Outcome of looking up the target of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLookup<'a> {
    /// The referenced message is loaded.
    Found(&'a Message),
    /// Not loaded or never existed; rendered as "original unavailable".
    Unavailable,
}
