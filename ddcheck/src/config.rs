//! Service configuration.
//!
//! Configuration is read from a TOML file and then overlaid with secrets from
//! the environment (a `.env` file is honoured). Every field has a default, so
//! a missing file yields a runnable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::report::DEFAULT_MIRRORS;
use crate::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "DDCHECK_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the subscription, binding and alias lists.
    pub data_dir: PathBuf,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    pub scheduler: SchedulerSettings,
    pub bilibili: BilibiliSettings,
    pub youtube: YoutubeSettings,
    pub onebot: OneBotSettings,
    pub llm: LlmSettings,
    pub tweets: TweetSettings,
    pub report: ReportSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .map(|d| d.join("ddcheck"))
                .unwrap_or_else(|| PathBuf::from("data")),
            log_dir: PathBuf::from("logs"),
            scheduler: SchedulerSettings::default(),
            bilibili: BilibiliSettings::default(),
            youtube: YoutubeSettings::default(),
            onebot: OneBotSettings::default(),
            llm: LlmSettings::default(),
            tweets: TweetSettings::default(),
            report: ReportSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between full sweeps of all subscribed channels.
    pub poll_interval_secs: u64,
    /// Deadline for one probe attempt. Retries extend the overall call.
    pub probe_timeout_secs: u64,
    /// Channels probed at once during a sweep.
    pub sweep_concurrency: usize,
    /// Pause before a crashed poll loop is restarted.
    pub restart_cooldown_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3600,
            probe_timeout_secs: 20,
            sweep_concurrency: 2,
            restart_cooldown_secs: 5,
        }
    }
}

impl SchedulerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BilibiliSettings {
    /// Raw `Cookie` header sent with API calls.
    pub cookie: String,
    pub attempts: u32,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for BilibiliSettings {
    fn default() -> Self {
        Self {
            cookie: String::new(),
            attempts: 3,
            retry_delay_secs: 2,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    pub ytdlp_path: Option<String>,
    pub playlist_end: u32,
    pub attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            playlist_end: 5,
            attempts: 1,
            retry_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotSettings {
    /// Base URL of the OneBot v11 HTTP API.
    pub base_url: String,
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for OneBotSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5700".to_string(),
            access_token: None,
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Chat-completions endpoint. Translation is disabled when empty.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
        }
    }
}

impl LlmSettings {
    pub fn is_enabled(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TweetSettings {
    pub enabled: bool,
    /// Numeric account id whose timeline is watched.
    pub user_id: String,
    /// Handle tweets must be authored by.
    pub screen_name: String,
    /// Comma-separated base64-encoded cookie strings.
    pub api_keys: String,
    pub poll_interval_minutes: u64,
    /// Consecutive failures after which the watcher gives up.
    pub max_failures: usize,
    /// Failures older than this no longer count as consecutive.
    pub failure_window_secs: u64,
}

impl Default for TweetSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            user_id: "1545351225293426688".to_string(),
            screen_name: "MariaMari0nette".to_string(),
            api_keys: String::new(),
            poll_interval_minutes: 10,
            max_failures: 3,
            failure_window_secs: 1800,
        }
    }
}

impl TweetSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes * 60)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// VTuber directory mirrors, tried in order.
    pub vtb_mirrors: Vec<String>,
    /// Hours between directory refreshes while the service runs.
    pub refresh_interval_hours: u64,
    pub request_timeout_secs: u64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            vtb_mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
            refresh_interval_hours: 24,
            request_timeout_secs: 20,
        }
    }
}

impl ReportSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_hours * 3600)
    }
}

impl AppConfig {
    /// Load configuration from `path`, `$DDCHECK_CONFIG`, or the default
    /// location, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration");
                Self::from_toml_str(&std::fs::read_to_string(&path)?)?
            }
            Some(path) => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("Invalid configuration: {e}")))
    }

    /// Overlay secrets from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("DDCHECK_BILIBILI_COOKIE") {
            self.bilibili.cookie = v;
        }
        if let Some(v) = get("DDCHECK_OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("DDCHECK_OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("DDCHECK_TWEET_API_KEY") {
            self.tweets.api_keys = v;
        }
        if let Some(v) = get("DDCHECK_ONEBOT_ACCESS_TOKEN") {
            self.onebot.access_token = Some(v);
        }
        if let Some(v) = get("DDCHECK_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(Error::config("scheduler.poll_interval_secs must be positive"));
        }
        if self.scheduler.probe_timeout_secs == 0 {
            return Err(Error::config("scheduler.probe_timeout_secs must be positive"));
        }
        if self.scheduler.sweep_concurrency == 0 {
            return Err(Error::config("scheduler.sweep_concurrency must be at least 1"));
        }
        if self.bilibili.attempts == 0 || self.youtube.attempts == 0 {
            return Err(Error::config("probe attempts must be at least 1"));
        }
        if self.report.refresh_interval_hours == 0 {
            return Err(Error::config("report.refresh_interval_hours must be positive"));
        }
        if self.tweets.enabled {
            if self.tweets.poll_interval_minutes == 0 {
                return Err(Error::config("tweets.poll_interval_minutes must be positive"));
            }
            if self.tweets.max_failures == 0 {
                return Err(Error::config("tweets.max_failures must be at least 1"));
            }
            if self.tweets.api_keys.is_empty() {
                return Err(Error::config("tweets.api_keys is required when tweets are enabled"));
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ddcheck").join("config.toml"))
}
