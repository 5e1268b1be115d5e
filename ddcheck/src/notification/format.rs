//! Message text builders.

use live_probe::LiveDescriptor;

use super::GroupMessage;
use crate::domain::UserId;

/// Render how long until `release_time`.
///
/// Seconds are only dropped, never shown: anything under a minute away reads
/// as "starting now".
pub fn format_time_left(release_time: i64, now: i64) -> String {
    let delay = release_time - now;
    if delay <= 0 {
        return "已经上机了，快去吧！".to_string();
    }

    let days = delay / 86_400;
    let hours = delay % 86_400 / 3600;
    let minutes = delay % 3600 / 60;
    if days == 0 && hours == 0 && minutes == 0 {
        return "马上就上机了，快去吧！".to_string();
    }

    let mut out = String::from("还有");
    if days > 0 {
        out.push_str(&format!("{days}天"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}小时"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}分钟"));
    }
    out.push_str("配信");
    out
}

/// The go-live notification for one group.
pub fn build_live_message(
    mentions: &[UserId],
    display_name: &str,
    live: &LiveDescriptor,
) -> GroupMessage {
    let mut msg = mentions
        .iter()
        .fold(GroupMessage::new(), |m, user| m.mention(*user));
    msg = msg.text(format!("{display_name}开播啦！\n"));
    if let Some(title) = live.title.as_deref().filter(|t| !t.is_empty()) {
        msg = msg.text(format!("{title}\n"));
    }
    msg.text(format!("传送门: {}", live.url))
}

/// A relayed tweet, with its translation when one is available.
pub fn build_tweet_message(
    mentions: &[UserId],
    screen_name: &str,
    text: &str,
    images: &[String],
    translation: Option<&str>,
) -> GroupMessage {
    let mut msg = mentions
        .iter()
        .fold(GroupMessage::new(), |m, user| m.mention(*user));
    msg = msg.text(format!("\n{screen_name}发推：\n{text}"));
    for url in images {
        msg = msg.image(url.clone());
    }
    if let Some(translation) = translation {
        msg = msg.text(format!("\n\n翻译：\n{translation}"));
    }
    msg
}
