//! The VTuber directory, mirrored from vtbs.moe and cached on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result, error_chain};

pub const CACHE_FILE: &str = "vtb_list.json";

pub const DEFAULT_MIRRORS: [&str; 4] = [
    "https://api.vtbs.moe/v1/short",
    "https://cfapi.vtbs.moe/v1/short",
    "https://hkapi.vtbs.moe/v1/short",
    "https://kr.vtbs.moe/v1/short",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VtbEntry {
    pub mid: u64,
    pub uname: String,
}

/// Mirror rows carry the uid as `mid` or, on older mirrors, as `uid`.
#[derive(Debug, Deserialize)]
struct ShortRow {
    mid: Option<u64>,
    uid: Option<u64>,
    uname: Option<String>,
}

pub(crate) fn parse_short_list(body: &str) -> Result<Vec<VtbEntry>> {
    let rows: Vec<ShortRow> = serde_json::from_str(body)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let mid = row.mid.or(row.uid).filter(|&m| m != 0)?;
            let uname = row.uname.filter(|n| !n.is_empty())?;
            Some(VtbEntry { mid, uname })
        })
        .collect())
}

pub struct VtbDirectory {
    client: Client,
    cache_path: PathBuf,
    mirrors: Vec<String>,
}

impl VtbDirectory {
    pub fn new(client: Client, data_dir: &Path, mirrors: Vec<String>) -> Self {
        Self {
            client,
            cache_path: data_dir.join(CACHE_FILE),
            mirrors,
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Cached entries, refreshing from the mirrors when the cache is empty.
    pub async fn entries(&self) -> Result<Vec<VtbEntry>> {
        let cached = self.load_cache().await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        self.refresh().await?;
        self.load_cache().await
    }

    /// Fetch from the first mirror that answers with a non-empty list and
    /// replace the cache.
    pub async fn refresh(&self) -> Result<usize> {
        for url in &self.mirrors {
            match self.fetch(url).await {
                Ok(entries) if entries.is_empty() => {
                    debug!(url, "Mirror returned an empty list");
                }
                Ok(entries) => {
                    self.store_cache(&entries).await?;
                    info!(url, count = entries.len(), "Refreshed vtb directory");
                    return Ok(entries.len());
                }
                Err(e) => warn!(url, error = %error_chain(&e), "Mirror failed"),
            }
        }
        Err(Error::Other("no vtb directory mirror answered".to_string()))
    }

    /// Refresh on a fixed interval until cancelled.
    pub async fn run_refresh(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "Scheduled vtb directory refresh failed");
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<VtbEntry>> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_short_list(&body)
    }

    async fn load_cache(&self) -> Result<Vec<VtbEntry>> {
        let raw = match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "Corrupt vtb cache, discarding");
                tokio::fs::remove_file(&self.cache_path).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn store_cache(&self, entries: &[VtbEntry]) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.cache_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.cache_path).await?;
        Ok(())
    }
}
