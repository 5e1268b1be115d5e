use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Tweet, TweetSource};
use crate::Result;
use crate::domain::SubscriptionBook;
use crate::llm::Translator;
use crate::scheduler::Progress;
use crate::notification::{GroupMessage, MessageSender, build_tweet_message};

/// How many relayed tweet texts are remembered across polls.
const SEEN_CAPACITY: usize = 256;

/// Polls a [`TweetSource`] and relays new tweets.
///
/// Recipients are the groups of all Bilibili subscriptions, each group once.
/// A fetch failure ends [`run`](Self::run) with the error so the bounded
/// supervisor can count it.
pub struct TweetWatcher {
    source: Arc<dyn TweetSource>,
    book: Arc<SubscriptionBook>,
    sender: Arc<dyn MessageSender>,
    translator: Option<Arc<dyn Translator>>,
    screen_name: String,
    interval: Duration,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    order: VecDeque<String>,
    texts: HashSet<String>,
}

impl Seen {
    /// Returns `false` if `text` was already relayed.
    fn insert(&mut self, text: &str) -> bool {
        if !self.texts.insert(text.to_string()) {
            return false;
        }
        self.order.push_back(text.to_string());
        if self.order.len() > SEEN_CAPACITY
            && let Some(oldest) = self.order.pop_front()
        {
            self.texts.remove(&oldest);
        }
        true
    }
}

impl TweetWatcher {
    pub fn new(
        source: Arc<dyn TweetSource>,
        book: Arc<SubscriptionBook>,
        sender: Arc<dyn MessageSender>,
        translator: Option<Arc<dyn Translator>>,
        screen_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            book,
            sender,
            translator,
            screen_name: screen_name.into(),
            interval,
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Poll until cancelled or a fetch fails. Each completed poll is marked
    /// on `progress`.
    pub async fn run(&self, cancel: CancellationToken, progress: Progress) -> Result<()> {
        info!(
            account = %self.screen_name,
            interval_secs = self.interval.as_secs(),
            "Tweet watcher started"
        );
        loop {
            let relayed = self.poll_once().await?;
            progress.mark();
            if relayed > 0 {
                info!(relayed, "Tweets relayed");
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Fetch once and relay every unseen tweet. Returns how many were relayed.
    pub async fn poll_once(&self) -> Result<usize> {
        let tweets = self.source.recent_tweets(self.interval).await?;
        let fresh: Vec<Tweet> = {
            let mut seen = self.seen.lock();
            tweets
                .into_iter()
                .filter(|t| !t.text.is_empty() && seen.insert(&t.text))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        let snapshot = self.book.snapshot();
        let groups = snapshot.bilibili_groups();
        for tweet in &fresh {
            let body = match &tweet.quote {
                Some(quote) => format!("{}\n\n引用 @{}：\n{}", tweet.text, quote.screen_name, quote.text),
                None => tweet.text.clone(),
            };
            let translation = self.translate(&body).await;

            let sends = groups.iter().map(|&group| {
                let message = build_tweet_message(
                    &snapshot.mentions_for(group),
                    &self.screen_name,
                    &body,
                    &tweet.images,
                    translation.as_deref(),
                );
                async move { (group, self.sender.send_group_message(group, &message).await) }
            });
            for (group, result) in join_all(sends).await {
                if let Err(e) = result {
                    warn!(tweet = %tweet.id, group, error = %e, "Tweet not delivered");
                }
            }
        }
        Ok(fresh.len())
    }

    async fn translate(&self, text: &str) -> Option<String> {
        let translator = self.translator.as_ref()?;
        match translator.translate(text).await {
            Ok(translated) => Some(translated),
            Err(e) => {
                warn!(error = %e, "Translation failed, relaying untranslated");
                None
            }
        }
    }
}

/// Tell every tweet recipient group that relaying has stopped.
pub async fn broadcast_stop_notice(book: &SubscriptionBook, sender: &dyn MessageSender, reason: &str) {
    let message = GroupMessage::new().text(format!("推文监控已停止: {reason}"));
    let message = &message;
    let groups = book.snapshot().bilibili_groups();
    let sends = groups
        .iter()
        .map(|&group| async move { (group, sender.send_group_message(group, &message).await) });
    for (group, result) in join_all(sends).await {
        if let Err(e) = result {
            warn!(group, error = %e, "Stop notice not delivered");
        }
    }
}
