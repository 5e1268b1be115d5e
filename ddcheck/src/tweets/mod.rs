//! Tweet relay.
//!
//! A [`TweetSource`] yields recent tweets of one account; the
//! [`TweetWatcher`] polls it and forwards new tweets to every group
//! subscribed to a Bilibili channel.

mod graphql;
mod watcher;

pub use graphql::{GraphqlTweetSource, parse_cookie_keys, parse_timeline};
pub use watcher::{TweetWatcher, broadcast_stop_notice};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tweet {
    pub id: String,
    pub screen_name: String,
    pub created_at: DateTime<FixedOffset>,
    pub text: String,
    pub images: Vec<String>,
    pub quote: Option<QuotedTweet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedTweet {
    pub screen_name: String,
    pub text: String,
}

#[async_trait]
pub trait TweetSource: Send + Sync {
    /// Tweets posted within the last `window`, oldest first.
    async fn recent_tweets(&self, window: Duration) -> Result<Vec<Tweet>>;
}
