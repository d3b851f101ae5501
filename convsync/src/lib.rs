//! `convsync`: conversation synchronization engine.
//!
//! Keeps one conversation's message list consistent across history pages,
//! optimistic local sends and a push stream of store changes. The entry
//! point is [`session::ConversationSession`]; [`queue::LiveQueue`] is the
//! polling sibling used for the clinic's work queue.

pub mod channel;
pub mod config;
pub mod gateway;
pub mod pagination;
pub mod queue;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod viewport;
