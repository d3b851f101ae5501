//! Outbound messaging gateway.
//!
//! The gateway talks to the third-party messaging API. Every call is
//! fire-and-await; the engine never retries on its own. A successful send
//! only means the gateway accepted the message: the confirmed copy reaches
//! the session later, through the push channel.

pub mod recording;

use convsync_proto::message::{ConversationId, ExternalMessageId, MediaRef};

/// Errors returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The remote API rejected the request.
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    /// The request did not complete in time.
    #[error("gateway request timed out")]
    Timeout,

    /// The gateway could not be reached.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Client for the outbound messaging API.
///
/// `recipient` is the conversation key, which is the address the gateway
/// delivers to.
pub trait MessagingGateway: Send + Sync {
    /// Send a text message. Returns the gateway's id for it.
    fn send_text(
        &self,
        recipient: &ConversationId,
        body: &str,
    ) -> impl std::future::Future<Output = Result<ExternalMessageId, GatewayError>> + Send;

    /// Replace the text of a previously sent message.
    fn edit_text(
        &self,
        recipient: &ConversationId,
        external_id: &ExternalMessageId,
        new_body: &str,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;

    /// Delete a previously sent message for everyone.
    fn delete_message(
        &self,
        recipient: &ConversationId,
        external_id: &ExternalMessageId,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;

    /// Send an image, audio, document, contact or payment card.
    fn send_media(
        &self,
        recipient: &ConversationId,
        media: &MediaRef,
    ) -> impl std::future::Future<Output = Result<ExternalMessageId, GatewayError>> + Send;
}
