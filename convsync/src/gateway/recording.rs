//! Recording gateway for testing.
//!
//! [`RecordingGateway`] logs every call, hands out sequential external ids
//! and can be told to fail. With [`RecordingGateway::echo_into`] it also
//! plays the role of the remote side: accepted sends are persisted into a
//! [`MemoryBackend`] as confirmed rows, which then come back to the session
//! through the push channel exactly like a real delivery receipt would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use convsync_proto::message::{
    ClientTempId, ConversationId, ExternalMessageId, MediaRef, Message, MessageBody, SenderId,
    Timestamp,
};

use super::{GatewayError, MessagingGateway};
use crate::store::memory::MemoryBackend;

/// A call received by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// `send_text`.
    SendText {
        /// Destination conversation.
        recipient: ConversationId,
        /// Text sent.
        body: String,
    },
    /// `edit_text`.
    EditText {
        /// Destination conversation.
        recipient: ConversationId,
        /// Message being edited.
        external_id: ExternalMessageId,
        /// Replacement text.
        new_body: String,
    },
    /// `delete_message`.
    Delete {
        /// Destination conversation.
        recipient: ConversationId,
        /// Message being deleted.
        external_id: ExternalMessageId,
    },
    /// `send_media`.
    SendMedia {
        /// Destination conversation.
        recipient: ConversationId,
        /// Media sent.
        media: MediaRef,
    },
}

/// Where accepted sends are persisted, and how.
struct Echo {
    backend: MemoryBackend,
    sender: SenderId,
    header: Option<String>,
}

/// Messaging gateway double that records calls.
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    failures: Mutex<VecDeque<GatewayError>>,
    next_external: AtomicU64,
    latency: Option<Duration>,
    echo: Option<Echo>,
}

impl RecordingGateway {
    /// A gateway that accepts everything and persists nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            next_external: AtomicU64::new(1),
            latency: None,
            echo: None,
        }
    }

    /// Persist accepted messages into `backend` as authored by `sender`.
    #[must_use]
    pub fn echo_into(mut self, backend: MemoryBackend, sender: SenderId) -> Self {
        self.echo = Some(Echo {
            backend,
            sender,
            header: None,
        });
        self
    }

    /// Prefix persisted text with a header line, the way the production
    /// gateway stamps the operator's name onto outgoing messages.
    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        if let Some(echo) = self.echo.as_mut() {
            echo.header = Some(header.into());
        }
        self
    }

    /// Delay every call by `latency` before answering.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next call fail with `error`. Failures queue up in order.
    pub fn fail_next(&self, error: GatewayError) {
        self.failures.lock().push_back(error);
    }

    /// Every call received so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    async fn begin(&self, call: GatewayCall) -> Result<(), GatewayError> {
        self.calls.lock().push(call);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.failures.lock().pop_front().map_or(Ok(()), Err)
    }

    fn allocate_external_id(&self) -> ExternalMessageId {
        let n = self.next_external.fetch_add(1, Ordering::Relaxed);
        ExternalMessageId::new(format!("wamid.{n:06}"))
    }

    fn persist(
        &self,
        recipient: &ConversationId,
        external_id: &ExternalMessageId,
        body: MessageBody,
    ) {
        let Some(echo) = self.echo.as_ref() else {
            return;
        };
        let mut body = body;
        if let Some(header) = &echo.header {
            body.text = format!("{header}\n{}", body.text);
        }
        let mut message = Message::pending(
            ClientTempId::new(),
            recipient.clone(),
            echo.sender.clone(),
            body,
            Timestamp::now(),
        );
        message.external_message_id = Some(external_id.clone());
        echo.backend.insert(message);
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingGateway for RecordingGateway {
    async fn send_text(
        &self,
        recipient: &ConversationId,
        body: &str,
    ) -> Result<ExternalMessageId, GatewayError> {
        self.begin(GatewayCall::SendText {
            recipient: recipient.clone(),
            body: body.to_string(),
        })
        .await?;

        let external_id = self.allocate_external_id();
        self.persist(recipient, &external_id, MessageBody::text(body));
        Ok(external_id)
    }

    async fn edit_text(
        &self,
        recipient: &ConversationId,
        external_id: &ExternalMessageId,
        new_body: &str,
    ) -> Result<(), GatewayError> {
        self.begin(GatewayCall::EditText {
            recipient: recipient.clone(),
            external_id: external_id.clone(),
            new_body: new_body.to_string(),
        })
        .await?;

        if let Some(echo) = self.echo.as_ref() {
            let stored = echo
                .backend
                .find_by_external_id(recipient, external_id)
                .and_then(|m| m.id);
            match stored {
                Some(id) => {
                    echo.backend.edit(recipient, &id, new_body);
                }
                None => {
                    return Err(GatewayError::Rejected(format!(
                        "unknown message {external_id}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        recipient: &ConversationId,
        external_id: &ExternalMessageId,
    ) -> Result<(), GatewayError> {
        self.begin(GatewayCall::Delete {
            recipient: recipient.clone(),
            external_id: external_id.clone(),
        })
        .await?;

        if let Some(echo) = self.echo.as_ref() {
            let stored = echo
                .backend
                .find_by_external_id(recipient, external_id)
                .and_then(|m| m.id);
            match stored {
                Some(id) => {
                    echo.backend.soft_delete(recipient, &id);
                }
                None => {
                    return Err(GatewayError::Rejected(format!(
                        "unknown message {external_id}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn send_media(
        &self,
        recipient: &ConversationId,
        media: &MediaRef,
    ) -> Result<ExternalMessageId, GatewayError> {
        self.begin(GatewayCall::SendMedia {
            recipient: recipient.clone(),
            media: media.clone(),
        })
        .await?;

        let external_id = self.allocate_external_id();
        self.persist(recipient, &external_id, MessageBody::media(media.clone()));
        Ok(external_id)
    }
}
