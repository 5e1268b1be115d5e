//! Bilibili user lookups used by the follow-list report.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::wbi::{WbiKeys, sign_query};
use crate::{Error, Result};

const CARD_URL: &str = "https://api.bilibili.com/x/web-interface/card";
const FOLLOWINGS_URL: &str = "https://api.bilibili.com/x/relation/followings";
const MEDAL_WALL_URL: &str = "https://api.live.bilibili.com/xlive/web-ucenter/user/MedalWall";
const SEARCH_URL: &str = "https://api.bilibili.com/x/web-interface/wbi/search/type";
const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";
const REFERER: &str = "https://www.bilibili.com/";

const FOLLOWINGS_PAGE_SIZE: usize = 24;
const WBI_KEYS_TTL: Duration = Duration::from_secs(3600);

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserCard {
    #[serde(deserialize_with = "lenient_u64")]
    pub mid: u64,
    pub name: String,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub fans: u64,
    /// Follow count as reported on the profile.
    #[serde(default)]
    pub attention: u64,
}

/// A fan medal from the medal wall, keyed by the streamer's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Medal {
    pub target_name: String,
    pub name: String,
    pub level: u32,
}

/// Lookups the report needs from Bilibili.
#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn user_card(&self, uid: u64) -> Result<UserCard>;

    /// Every uid the user follows, in page order.
    async fn followings(&self, uid: u64) -> Result<Vec<u64>>;

    async fn medals(&self, uid: u64) -> Result<Vec<Medal>>;

    /// Uid of the user whose name matches exactly.
    async fn search_uid(&self, name: &str) -> Result<Option<u64>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    match NumberOrText::deserialize(d)? {
        NumberOrText::Number(v) => Ok(v),
        NumberOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct CardData {
    card: UserCard,
}

#[derive(Debug, Deserialize)]
struct FollowingsPage {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    list: Option<Vec<FollowingEntry>>,
}

#[derive(Debug, Deserialize)]
struct FollowingEntry {
    mid: u64,
}

#[derive(Debug, Deserialize)]
struct MedalWall {
    #[serde(default)]
    list: Option<Vec<MedalWallEntry>>,
}

#[derive(Debug, Deserialize)]
struct MedalWallEntry {
    #[serde(default)]
    target_name: String,
    medal_info: MedalInfo,
}

#[derive(Debug, Deserialize)]
struct MedalInfo {
    medal_name: String,
    #[serde(default)]
    level: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    result: Option<Vec<SearchUser>>,
}

#[derive(Debug, Deserialize)]
struct SearchUser {
    mid: u64,
    uname: String,
}

#[derive(Debug, Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

fn unwrap_envelope<T: DeserializeOwned>(body: &str) -> Result<Option<T>> {
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    if envelope.code != 0 {
        return Err(Error::Upstream {
            code: envelope.code,
            message: envelope.message,
        });
    }
    Ok(envelope.data)
}

fn require<T>(data: Option<T>, what: &str) -> Result<T> {
    data.ok_or_else(|| Error::Other(format!("{what} response carried no data")))
}

pub(crate) fn parse_card(body: &str) -> Result<UserCard> {
    let data: Option<CardData> = unwrap_envelope(body)?;
    Ok(require(data, "card")?.card)
}

/// Returns the page's uids and the reported total.
pub(crate) fn parse_followings_page(body: &str) -> Result<(Vec<u64>, usize)> {
    let page: FollowingsPage = require(unwrap_envelope(body)?, "followings")?;
    let mids = page
        .list
        .unwrap_or_default()
        .into_iter()
        .map(|e| e.mid)
        .collect();
    Ok((mids, page.total))
}

pub(crate) fn parse_medal_wall(body: &str) -> Result<Vec<Medal>> {
    let wall: Option<MedalWall> = unwrap_envelope(body)?;
    Ok(wall
        .and_then(|w| w.list)
        .unwrap_or_default()
        .into_iter()
        .map(|e| Medal {
            target_name: e.target_name,
            name: e.medal_info.medal_name,
            level: e.medal_info.level,
        })
        .collect())
}

pub(crate) fn parse_search(body: &str, name: &str) -> Result<Option<u64>> {
    let result: Option<SearchResult> = unwrap_envelope(body)?;
    Ok(result
        .and_then(|r| r.result)
        .unwrap_or_default()
        .into_iter()
        .find(|u| u.uname == name)
        .map(|u| u.mid))
}

fn parse_nav(body: &str) -> Result<WbiKeys> {
    // `/nav` answers -101 for anonymous callers but still carries the keys.
    let envelope: Envelope<NavData> = serde_json::from_str(body)?;
    let img = require(envelope.data, "nav")?.wbi_img;
    WbiKeys::from_urls(&img.img_url, &img.sub_url)
        .ok_or_else(|| Error::Other(format!("unexpected wbi key urls: {}", img.img_url)))
}

/// HTTP implementation of [`UserLookup`].
pub struct BilibiliUserApi {
    client: Client,
    cookie: Option<String>,
    wbi_keys: Mutex<Option<(WbiKeys, Instant)>>,
}

impl BilibiliUserApi {
    pub fn new(client: Client, cookie: Option<String>) -> Self {
        Self {
            client,
            cookie: cookie.filter(|c| !c.trim().is_empty()),
            wbi_keys: Mutex::new(None),
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let mut request = self
            .client
            .get(url)
            .query(query)
            .header(reqwest::header::REFERER, REFERER);
        if let Some(cookie) = &self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn wbi_keys(&self) -> Result<WbiKeys> {
        let cached = self
            .wbi_keys
            .lock()
            .as_ref()
            .filter(|(_, fetched_at)| fetched_at.elapsed() < WBI_KEYS_TTL)
            .map(|(keys, _)| keys.clone());
        if let Some(keys) = cached {
            return Ok(keys);
        }

        let keys = parse_nav(&self.get(NAV_URL, &[]).await?)?;
        debug!("Refreshed wbi keys");
        *self.wbi_keys.lock() = Some((keys.clone(), Instant::now()));
        Ok(keys)
    }

    async fn get_signed(&self, url: &str, params: Vec<(&str, String)>) -> Result<String> {
        let keys = self.wbi_keys().await?;
        let query = sign_query(params, &keys, chrono::Utc::now().timestamp());
        let signed_url = format!("{url}?{query}");
        self.get(&signed_url, &[]).await
    }
}

#[async_trait]
impl UserLookup for BilibiliUserApi {
    async fn user_card(&self, uid: u64) -> Result<UserCard> {
        let body = self.get(CARD_URL, &[("mid", uid.to_string())]).await?;
        parse_card(&body)
    }

    async fn followings(&self, uid: u64) -> Result<Vec<u64>> {
        let mut follows = Vec::new();
        let mut page_no = 1u32;
        loop {
            let query = [
                ("vmid", uid.to_string()),
                ("pn", page_no.to_string()),
                ("ps", FOLLOWINGS_PAGE_SIZE.to_string()),
            ];
            let body = self.get(FOLLOWINGS_URL, &query).await?;
            let (page, total) = parse_followings_page(&body)?;
            if page.is_empty() {
                break;
            }
            follows.extend(page);
            if follows.len() >= total {
                break;
            }
            page_no += 1;
        }
        debug!(uid, count = follows.len(), "Fetched followings");
        Ok(follows)
    }

    async fn medals(&self, uid: u64) -> Result<Vec<Medal>> {
        let body = self
            .get(MEDAL_WALL_URL, &[("target_id", uid.to_string())])
            .await?;
        parse_medal_wall(&body)
    }

    async fn search_uid(&self, name: &str) -> Result<Option<u64>> {
        let params = vec![
            ("search_type", "bili_user".to_string()),
            ("keyword", name.to_string()),
        ];
        let body = self.get_signed(SEARCH_URL, params).await?;
        parse_search(&body, name)
    }
}
