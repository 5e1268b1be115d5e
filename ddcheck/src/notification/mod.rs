//! Outbound group messages.
//!
//! The scheduler and the tweet watcher only see the [`MessageSender`] trait;
//! [`OneBotSender`] is the production transport.

mod format;
mod message;
mod onebot;

pub use format::{build_live_message, build_tweet_message, format_time_left};
pub use message::{GroupMessage, Segment};
pub use onebot::OneBotSender;

use async_trait::async_trait;

use crate::Result;
use crate::domain::GroupId;

/// Capability to post a message into a chat group.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn sender_type(&self) -> &'static str;

    async fn send_group_message(&self, group: GroupId, message: &GroupMessage) -> Result<()>;
}
