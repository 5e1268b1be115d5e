//! Timeline fetcher for the web client's GraphQL API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use live_probe::{FixedRetry, ProbeError};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use super::{QuotedTweet, Tweet, TweetSource};
use crate::config::TweetSettings;
use crate::{Error, Result};

const USER_TWEETS_URL: &str = "https://x.com/i/api/graphql/9bXBrlmUXOHFZEq0DuvYWA/UserTweets";

/// Public bearer token of the web client.
const WEB_BEARER: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

type Cookie = Vec<(String, String)>;

/// Decode comma-separated base64 cookie strings into name/value pairs.
pub fn parse_cookie_keys(raw: &str) -> Result<Vec<Cookie>> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|key| {
            let decoded = STANDARD
                .decode(key)
                .map_err(|e| Error::config(format!("Invalid tweet api key: {e}")))?;
            let text = String::from_utf8(decoded)
                .map_err(|e| Error::config(format!("Invalid tweet api key: {e}")))?;
            Ok(text
                .split(';')
                .filter_map(|pair| pair.trim().split_once('='))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect())
        })
        .collect()
}

pub struct GraphqlTweetSource {
    client: Client,
    user_id: String,
    screen_name: String,
    cookies: Vec<Cookie>,
    next_cookie: AtomicUsize,
    retry: FixedRetry,
}

impl GraphqlTweetSource {
    pub fn new(client: Client, settings: &TweetSettings) -> Result<Self> {
        let cookies = parse_cookie_keys(&settings.api_keys)?;
        if cookies.is_empty() {
            return Err(Error::config("tweets.api_keys holds no cookies"));
        }
        Ok(Self {
            client,
            user_id: settings.user_id.clone(),
            screen_name: settings.screen_name.clone(),
            cookies,
            next_cookie: AtomicUsize::new(0),
            retry: FixedRetry::default(),
        })
    }

    /// Round-robin over the configured cookies.
    fn cookie(&self) -> &Cookie {
        let idx = self.next_cookie.fetch_add(1, Ordering::Relaxed) % self.cookies.len();
        &self.cookies[idx]
    }

    async fn fetch_timeline(&self) -> std::result::Result<Value, ProbeError> {
        let cookie = self.cookie();
        let csrf = cookie
            .iter()
            .find(|(k, _)| k == "ct0")
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();
        let cookie_header = cookie
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");

        let variables = json!({
            "userId": self.user_id,
            "count": 20,
            "includePromotedContent": false,
            "withQuickPromoteEligibilityTweetFields": false,
            "withVoice": false,
            "withV2Timeline": false,
        });

        let response = self
            .client
            .get(USER_TWEETS_URL)
            .bearer_auth(WEB_BEARER)
            .header("x-csrf-token", csrf)
            .header(reqwest::header::COOKIE, cookie_header)
            .query(&[
                ("variables", variables.to_string()),
                ("features", timeline_features().to_string()),
            ])
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            return Err(ProbeError::RateLimited(429));
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

#[async_trait]
impl TweetSource for GraphqlTweetSource {
    async fn recent_tweets(&self, window: Duration) -> Result<Vec<Tweet>> {
        let body = self
            .retry
            .run("user tweets", || self.fetch_timeline())
            .await?;
        let tweets = parse_timeline(&body, &self.screen_name, Utc::now(), window)?;
        debug!(count = tweets.len(), "Fetched recent tweets");
        Ok(tweets)
    }
}

fn timeline_features() -> Value {
    json!({
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": true,
        "responsive_web_home_pinned_timelines_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": false,
        "tweet_awards_web_tipping_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_media_download_video_enabled": false,
        "responsive_web_enhance_cards_enabled": false,
    })
}

/// Extract tweets by `screen_name` created within `window` before `now`.
pub fn parse_timeline(
    body: &Value,
    screen_name: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<Vec<Tweet>> {
    let instructions = body
        .pointer("/data/user/result/timeline/timeline/instructions")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::validation("timeline response has no instructions"))?;

    let entries = instructions
        .iter()
        .find(|i| i.get("type").and_then(Value::as_str) == Some("TimelineAddEntries"))
        .and_then(|i| i.get("entries"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    let mut tweets: Vec<Tweet> = entries
        .iter()
        .filter_map(|entry| unwrap_tweet(entry.pointer("/content/itemContent/tweet_results/result")?))
        .filter_map(parse_tweet)
        .filter(|t| {
            let keep = t.screen_name == screen_name && now.signed_duration_since(t.created_at) <= window;
            if !keep {
                trace!(id = %t.id, author = %t.screen_name, "Tweet filtered out");
            }
            keep
        })
        .collect();

    tweets.sort_by_key(|t| t.created_at);
    Ok(tweets)
}

/// Results may be wrapped as `TweetWithVisibilityResults { tweet }`.
fn unwrap_tweet(result: &Value) -> Option<&Value> {
    match result.get("__typename").and_then(Value::as_str) {
        Some("TweetTombstone") | Some("TweetUnavailable") => None,
        _ => Some(result.get("tweet").unwrap_or(result)),
    }
}

fn parse_tweet(data: &Value) -> Option<Tweet> {
    let legacy = data.get("legacy")?;
    let raw = legacy.get("created_at")?.as_str()?;
    let created_at = match DateTime::parse_from_str(raw, CREATED_AT_FORMAT) {
        Ok(created_at) => created_at,
        Err(e) => {
            let id = data.get("rest_id").and_then(Value::as_str).unwrap_or_default();
            warn!(tweet = %id, created_at = %raw, error = %e, "Unparseable tweet timestamp, skipping");
            return None;
        }
    };

    let quote = data
        .pointer("/quoted_status_result/result")
        .and_then(unwrap_tweet)
        .and_then(|q| {
            Some(QuotedTweet {
                screen_name: author(q)?.to_string(),
                text: tweet_text(q),
            })
        });

    Some(Tweet {
        id: data
            .get("rest_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        screen_name: author(data)?.to_string(),
        created_at,
        text: tweet_text(data),
        images: media_urls(legacy),
        quote,
    })
}

fn author(data: &Value) -> Option<&str> {
    data.pointer("/core/user_results/result/legacy/screen_name")
        .or_else(|| data.pointer("/core/user_results/result/core/screen_name"))
        .and_then(Value::as_str)
}

/// Full text with t.co links expanded and trailing media/quote links removed.
fn tweet_text(data: &Value) -> String {
    let mut text = data
        .pointer("/note_tweet/note_tweet_results/result/text")
        .or_else(|| data.pointer("/legacy/full_text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let url_lists = [
        data.pointer("/legacy/entities/urls"),
        data.pointer("/note_tweet/note_tweet_results/result/entity_set/urls"),
    ];
    for item in url_lists.into_iter().flatten().filter_map(Value::as_array).flatten() {
        if let (Some(short), Some(expanded)) = (
            item.get("url").and_then(Value::as_str),
            item.get("expanded_url").and_then(Value::as_str),
        ) {
            text = text.replace(short, expanded);
        }
    }

    let mut trailing: Vec<&str> = data
        .pointer("/legacy/entities/media")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| m.get("url").and_then(Value::as_str))
        .collect();
    trailing.extend(
        [
            data.pointer("/legacy/quoted_status_permalink/url"),
            data.pointer("/legacy/quoted_status_permalink/expanded"),
        ]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str),
    );

    unescape_html(strip_trailing_urls(&text, &trailing).trim())
}

fn strip_trailing_urls<'a>(text: &'a str, urls: &[&str]) -> &'a str {
    let mut urls: Vec<&str> = urls.iter().copied().filter(|u| !u.is_empty()).collect();
    urls.sort_by_key(|u| std::cmp::Reverse(u.len()));

    let mut text = text.trim_end();
    while let Some(url) = urls.iter().find(|u| text.ends_with(**u)) {
        text = text[..text.len() - url.len()].trim_end();
    }
    text
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn media_urls(legacy: &Value) -> Vec<String> {
    legacy
        .pointer("/extended_entities/media")
        .or_else(|| legacy.pointer("/entities/media"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| m.get("media_url_https").and_then(Value::as_str))
        .filter_map(best_quality_image)
        .collect()
}

/// `https://pbs.twimg.com/media/ABC.jpg` → original-size variant.
fn best_quality_image(url: &str) -> Option<String> {
    let file = url.rsplit('/').next()?;
    let (asset, ext) = file.rsplit_once('.')?;
    Some(format!(
        "https://pbs.twimg.com/media/{asset}?format={ext}&name=4096x4096"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Value {
        json!({
            "data": {"user": {"result": {"timeline": {"timeline": {"instructions": [
                {"type": "TimelinePinEntry"},
                {"type": "TimelineAddEntries", "entries": [
                    {"content": {"itemContent": {"tweet_results": {"result": {
                        "__typename": "Tweet",
                        "rest_id": "2",
                        "core": {"user_results": {"result": {"legacy": {"screen_name": "MariaMari0nette"}}}},
                        "legacy": {
                            "created_at": "Mon Oct 19 11:50:00 +0000 2026",
                            "full_text": "new song &amp; more https://t.co/abc https://t.co/media",
                            "entities": {
                                "urls": [{"url": "https://t.co/abc", "expanded_url": "https://youtu.be/x"}],
                                "media": [{"url": "https://t.co/media", "media_url_https": "https://pbs.twimg.com/media/F1.jpg"}]
                            },
                            "extended_entities": {
                                "media": [{"url": "https://t.co/media", "media_url_https": "https://pbs.twimg.com/media/F1.jpg"}]
                            }
                        }
                    }}}}},
                    {"content": {"itemContent": {"tweet_results": {"result": {
                        "__typename": "TweetWithVisibilityResults",
                        "tweet": {
                            "rest_id": "1",
                            "core": {"user_results": {"result": {"legacy": {"screen_name": "MariaMari0nette"}}}},
                            "legacy": {
                                "created_at": "Mon Oct 19 11:45:00 +0000 2026",
                                "full_text": "look https://t.co/q",
                                "quoted_status_permalink": {"url": "https://t.co/q", "expanded": "https://x.com/a/status/9"}
                            },
                            "quoted_status_result": {"result": {
                                "rest_id": "9",
                                "core": {"user_results": {"result": {"legacy": {"screen_name": "someone"}}}},
                                "legacy": {"created_at": "Mon Oct 19 10:00:00 +0000 2026", "full_text": "quoted"}
                            }}
                        }
                    }}}}},
                    {"content": {"itemContent": {"tweet_results": {"result": {
                        "rest_id": "3",
                        "core": {"user_results": {"result": {"legacy": {"screen_name": "MariaMari0nette"}}}},
                        "legacy": {"created_at": "Mon Oct 19 09:00:00 +0000 2026", "full_text": "old"}
                    }}}}},
                    {"content": {"itemContent": {"tweet_results": {"result": {
                        "rest_id": "4",
                        "core": {"user_results": {"result": {"legacy": {"screen_name": "retweeted_account"}}}},
                        "legacy": {"created_at": "Mon Oct 19 11:55:00 +0000 2026", "full_text": "not hers"}
                    }}}}},
                    {"content": {"cursorType": "Bottom"}}
                ]}
            ]}}}}}
        })
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_timeline_filters_and_cleans() {
        let tweets =
            parse_timeline(&fixture(), "MariaMari0nette", now(), Duration::from_secs(1200)).unwrap();

        // Oldest first; the 09:00 tweet and the foreign author are dropped.
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[1].id, "2");
        assert_eq!(tweets[1].text, "new song & more https://youtu.be/x");
        assert_eq!(
            tweets[1].images,
            vec!["https://pbs.twimg.com/media/F1?format=jpg&name=4096x4096".to_string()]
        );

        assert_eq!(tweets[0].id, "1");
        assert_eq!(tweets[0].text, "look");
        assert!(tweets[0].images.is_empty());
        let quote = tweets[0].quote.as_ref().unwrap();
        assert_eq!(quote.screen_name, "someone");
        assert_eq!(quote.text, "quoted");
    }

    #[test]
    fn test_fixture_timestamps_parse() {
        // chrono rejects a weekday that disagrees with the date.
        assert!(DateTime::parse_from_str("Mon Oct 19 11:50:00 +0000 2026", CREATED_AT_FORMAT).is_ok());
        assert!(DateTime::parse_from_str("Sun Oct 19 11:50:00 +0000 2026", CREATED_AT_FORMAT).is_err());
    }

    #[test]
    fn test_bad_timestamp_skips_only_that_tweet() {
        let mut body = fixture();
        let entries = body
            .pointer_mut("/data/user/result/timeline/timeline/instructions/1/entries")
            .and_then(Value::as_array_mut)
            .unwrap();
        entries[0]["content"]["itemContent"]["tweet_results"]["result"]["legacy"]["created_at"] =
            json!("yesterday-ish");

        let tweets =
            parse_timeline(&body, "MariaMari0nette", now(), Duration::from_secs(1200)).unwrap();
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].id, "1");
    }

    #[test]
    fn test_parse_timeline_rejects_unexpected_shape() {
        assert!(parse_timeline(&json!({"errors": []}), "x", now(), Duration::from_secs(60)).is_err());
    }

    #[test]
    fn test_cookie_keys() {
        let key = STANDARD.encode("auth_token=abc; ct0=csrf");
        let cookies = parse_cookie_keys(&format!("{key}, {key}")).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(
            cookies[0],
            vec![
                ("auth_token".to_string(), "abc".to_string()),
                ("ct0".to_string(), "csrf".to_string())
            ]
        );
        assert!(parse_cookie_keys("%%%").is_err());
    }

    #[test]
    fn test_strip_trailing_urls() {
        assert_eq!(strip_trailing_urls("hi https://a https://bb  ", &["https://a", "https://bb"]), "hi");
        assert_eq!(strip_trailing_urls("https://a hi", &["https://a"]), "https://a hi");
    }
}
