//! Bilibili live-reservation probe.
//!
//! A channel is probed in two steps: the space reservation list yields the
//! planned start time, and the live-room lookup yields the canonical room
//! URL. Only the first reservation is considered.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::channel::{Channel, LiveDescriptor};
use crate::error::ProbeError;
use crate::probe::LiveProbe;

/// Upstream codes that signal risk control or request throttling.
const RATE_LIMIT_CODES: [i64; 3] = [-412, -352, -799];

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Reservation {
    #[serde(default)]
    name: Option<String>,
    live_plan_start_time: i64,
}

#[derive(Debug, Deserialize)]
struct LiveRoom {
    #[serde(default)]
    url: String,
    #[serde(default, rename = "roomid")]
    room_id: u64,
}

pub struct BilibiliProbe {
    client: Client,
    cookie: Option<String>,
}

impl BilibiliProbe {
    pub const BASE_URL: &str = "https://www.bilibili.com";

    const RESERVATION_URL: &str = "https://api.bilibili.com/x/space/reservation";

    const LIVE_ROOM_URL: &str = "https://api.live.bilibili.com/room/v1/Room/getRoomInfoOld";

    pub fn new(client: Client, cookie: Option<String>) -> Self {
        let cookie = cookie.filter(|c| !c.trim().is_empty());
        Self { client, cookie }
    }

    async fn get_api(&self, url: &str, params: &[(&str, String)]) -> Result<String, ProbeError> {
        let mut request = self
            .client
            .get(url)
            .query(params)
            .header(reqwest::header::REFERER, Self::BASE_URL);
        if let Some(cookie) = &self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn fetch_room_url(&self, uid: u64) -> Result<String, ProbeError> {
        let body = self
            .get_api(Self::LIVE_ROOM_URL, &[("mid", uid.to_string())])
            .await?;
        parse_room_url(&body, uid)
    }
}

#[async_trait]
impl LiveProbe for BilibiliProbe {
    fn name(&self) -> &'static str {
        "bilibili"
    }

    async fn probe(&self, channel: &Channel) -> Result<Option<LiveDescriptor>, ProbeError> {
        let Channel::Bilibili(uid) = channel else {
            return Err(ProbeError::UnsupportedChannel {
                platform: "bilibili",
                channel: channel.to_string(),
            });
        };

        let body = self
            .get_api(Self::RESERVATION_URL, &[("vmid", uid.to_string())])
            .await?;
        let Some((release_time, title)) = parse_reservation(&body)? else {
            debug!(uid, "No live reservation");
            return Ok(None);
        };

        let url = self.fetch_room_url(*uid).await?;
        let mut live = LiveDescriptor::new(release_time, url);
        live.title = title;
        Ok(Some(live))
    }
}

fn unwrap_response<T: DeserializeOwned>(body: &str) -> Result<Option<T>, ProbeError> {
    let response: ApiResponse<T> = serde_json::from_str(body)?;
    if RATE_LIMIT_CODES.contains(&response.code) {
        return Err(ProbeError::RateLimited(response.code));
    }
    if response.code != 0 {
        return Err(ProbeError::ApiError {
            code: response.code,
            message: response.message,
        });
    }
    Ok(response.data)
}

/// Extract the planned start time and title of the first reservation.
pub(crate) fn parse_reservation(body: &str) -> Result<Option<(i64, Option<String>)>, ProbeError> {
    let reservations: Vec<Reservation> = unwrap_response(body)?.unwrap_or_default();
    Ok(reservations
        .into_iter()
        .next()
        .map(|r| (r.live_plan_start_time, r.name.filter(|n| !n.is_empty()))))
}

/// Extract the live room URL, falling back to the room id when the URL is
/// missing.
pub(crate) fn parse_room_url(body: &str, uid: u64) -> Result<String, ProbeError> {
    let room: Option<LiveRoom> = unwrap_response(body)?;
    match room {
        Some(room) if !room.url.is_empty() => Ok(room.url),
        Some(room) if room.room_id != 0 => Ok(format!("https://live.bilibili.com/{}", room.room_id)),
        _ => Err(ProbeError::Other(format!("no live room for uid {uid}"))),
    }
}
