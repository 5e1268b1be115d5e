//! Channel identities and probe output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A followable identity on one of the supported platforms.
///
/// Bilibili channels are keyed by numeric UID, YouTube channels by their
/// `@handle`. Equal raw identifiers on different platforms are distinct
/// channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "platform", content = "id", rename_all = "lowercase")]
pub enum Channel {
    Bilibili(u64),
    Youtube(String),
}

impl Channel {
    /// Build a YouTube channel, prefixing the handle with `@` when missing.
    pub fn youtube(handle: impl AsRef<str>) -> Self {
        Self::Youtube(normalize_youtube_handle(handle.as_ref()))
    }

    pub fn platform_name(&self) -> &'static str {
        match self {
            Self::Bilibili(_) => "bilibili",
            Self::Youtube(_) => "youtube",
        }
    }

    /// Platform-native identifier as it appears in upstream URLs.
    pub fn native_id(&self) -> String {
        match self {
            Self::Bilibili(uid) => uid.to_string(),
            Self::Youtube(handle) => handle.clone(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bilibili(uid) => write!(f, "bilibili:{uid}"),
            Self::Youtube(handle) => write!(f, "youtube:{handle}"),
        }
    }
}

pub fn normalize_youtube_handle(handle: &str) -> String {
    let handle = handle.trim();
    if handle.starts_with('@') {
        handle.to_string()
    } else {
        format!("@{handle}")
    }
}

/// The next scheduled or ongoing stream of a channel.
///
/// `release_time` is in epoch seconds and may lie in the past, which means
/// the stream is already live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDescriptor {
    pub release_time: i64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl LiveDescriptor {
    pub fn new(release_time: i64, url: impl Into<String>) -> Self {
        Self {
            release_time,
            url: url.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Seconds until the stream starts, relative to `now` (epoch seconds).
    pub fn delay_from(&self, now: i64) -> i64 {
        self.release_time - now
    }
}
