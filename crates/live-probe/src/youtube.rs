//! YouTube upcoming-stream probe backed by `yt-dlp`.
//!
//! The channel's `/streams` tab is listed in flat-playlist mode. Entries come
//! newest first; the scan stops at the first entry without a release
//! timestamp and skips schedule placeholders. The last entry that passes is
//! the soonest upcoming stream.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::channel::{Channel, LiveDescriptor};
use crate::error::ProbeError;
use crate::probe::LiveProbe;

static DEFAULT_YTDLP_PATH: &str = "yt-dlp";

/// Number of recent stream entries inspected per probe.
pub const DEFAULT_PLAYLIST_END: u32 = 5;

/// Titles containing this marker are schedule placeholders, not streams.
const SCHEDULE_MARKER: &str = "schedule";

#[derive(Debug, Default, Deserialize)]
struct PlaylistJson {
    #[serde(default)]
    entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PlaylistEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    release_timestamp: Option<i64>,
}

impl PlaylistEntry {
    fn watch_url(&self) -> Option<String> {
        self.url.clone().or_else(|| {
            self.id
                .as_ref()
                .map(|id| format!("https://www.youtube.com/watch?v={id}"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct YoutubeProbe {
    binary_path: String,
    playlist_end: u32,
}

impl Default for YoutubeProbe {
    fn default() -> Self {
        Self::new(None, DEFAULT_PLAYLIST_END)
    }
}

impl YoutubeProbe {
    pub fn new(binary_path: Option<String>, playlist_end: u32) -> Self {
        let binary_path = binary_path
            .filter(|p| !p.is_empty())
            .or_else(|| std::env::var("YTDLP_PATH").ok())
            .unwrap_or_else(|| DEFAULT_YTDLP_PATH.to_string());
        Self {
            binary_path,
            playlist_end: playlist_end.max(1),
        }
    }

    fn streams_url(handle: &str) -> String {
        format!("https://www.youtube.com/{handle}/streams")
    }

    async fn run_ytdlp_json(&self, handle: &str, playlist_end: u32) -> Result<PlaylistJson, ProbeError> {
        let url = Self::streams_url(handle);
        let mut cmd = tokio::process::Command::new(&self.binary_path);
        cmd.arg("--flat-playlist")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--playlist-end")
            .arg(playlist_end.to_string())
            .arg("-J")
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%url, binary = %self.binary_path, "Listing channel streams");
        let out = cmd
            .output()
            .await
            .map_err(|e| ProbeError::ProcessError(format!("Failed to spawn yt-dlp: {e}")))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            return Err(ProbeError::ProcessError(format!(
                "yt-dlp exited with {}: {stderr}",
                out.status
            )));
        }

        Ok(serde_json::from_slice(&out.stdout)?)
    }

    /// Whether the handle resolves to an existing channel.
    pub async fn channel_exists(&self, channel: &Channel) -> Result<bool, ProbeError> {
        let handle = Self::handle_of(channel)?;
        match self.run_ytdlp_json(handle, 1).await {
            Ok(_) => Ok(true),
            Err(ProbeError::ProcessError(msg)) => {
                debug!(%channel, error = %msg, "Channel lookup failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn handle_of(channel: &Channel) -> Result<&str, ProbeError> {
        match channel {
            Channel::Youtube(handle) => Ok(handle.as_str()),
            other => Err(ProbeError::UnsupportedChannel {
                platform: "youtube",
                channel: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl LiveProbe for YoutubeProbe {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn probe(&self, channel: &Channel) -> Result<Option<LiveDescriptor>, ProbeError> {
        let handle = Self::handle_of(channel)?;
        let playlist = self.run_ytdlp_json(handle, self.playlist_end).await?;
        Ok(select_upcoming(&playlist.entries))
    }
}

pub(crate) fn select_upcoming(entries: &[PlaylistEntry]) -> Option<LiveDescriptor> {
    let mut upcoming = None;
    for entry in entries {
        let Some(release_time) = entry.release_timestamp else {
            break;
        };
        let title = entry.title.clone().unwrap_or_default();
        if title.to_lowercase().contains(SCHEDULE_MARKER) {
            trace!(%title, "Skipping schedule placeholder");
            continue;
        }
        let Some(url) = entry.watch_url() else {
            continue;
        };

        let mut live = LiveDescriptor::new(release_time, url);
        if !title.is_empty() {
            live.title = Some(title);
        }
        upcoming = Some(live);
    }
    upcoming
}
