use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

use crate::{
    config::Config,
    error::{FetchError, NormalizeError},
    schema::{Author, MediaAttachment, MediaKind, Metrics, Record},
    util,
};

use super::adapter::{NormalizeContext, Page, RateLimitState, RawItem, SourceAdapter};
use super::http::{self, str_field, u32_field, u64_field};

/// Twitter / X API v2 adapter
///
/// Recent search:
/// https://developer.x.com/en/docs/x-api/tweets/search/api-reference/get-tweets-search-recent
///
/// Authenticates with an app bearer token. Rate limits are read
/// from the `x-rate-limit-*` response headers.
pub struct TwitterAdapter {
    client: reqwest::Client,
    token: String,
    base_url: String,
    debug: bool,
}

const SEARCH_PATH: &str = "/2/tweets/search/recent";

/// Recent search only covers the last 7 days.
const MAX_LOOKBACK_DAYS: i64 = 7;

/// Query used by the credential probe.
const PROBE_QUERY: &str = "twitter";

/// Assumed budget when the remaining-calls header is absent.
const DEFAULT_REMAINING: u32 = 900;

/// Fallback window when the reset header is absent.
const DEFAULT_RESET_SECS: i64 = 900;

const TWEET_FIELDS: &str =
    "created_at,text,public_metrics,entities,id,author_id,lang,possibly_sensitive,referenced_tweets,in_reply_to_user_id,attachments";
const USER_FIELDS: &str = "username,name,verified,public_metrics,profile_image_url";
const EXPANSIONS: &str = "author_id,attachments.media_keys";
const MEDIA_FIELDS: &str = "type,url,preview_image_url,width,height,duration_ms";

impl TwitterAdapter {
    pub fn new(token: String, config: &Config) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(config.http.timeout_secs)?,
            token,
            base_url: config.twitter.base_url.trim_end_matches('/').to_string(),
            debug: config.debug_log(),
        })
    }

    async fn search(&self, params: &[(&str, String)]) -> Result<(Value, RateLimitState), FetchError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, SEARCH_PATH))
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(http::classify_send_error)?;

        let now = Utc::now();
        let rate_limit = rate_limit_from_headers(
            http::header_str(response.headers(), "x-rate-limit-remaining"),
            http::header_str(response.headers(), "x-rate-limit-reset"),
            now,
        );

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http::classify_status(status, &body, rate_limit.reset_at));
        }

        let body = http::read_json(response).await?;
        if self.debug {
            log::debug!("[twitter] page body: {}", body);
        }
        Ok((body, rate_limit))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for TwitterAdapter {
    fn name(&self) -> &'static str {
        "twitter"
    }

    fn source_domain(&self) -> &'static str {
        "twitter.com"
    }

    async fn probe_credentials(&self) -> Result<RateLimitState, FetchError> {
        let params = [
            ("query", PROBE_QUERY.to_string()),
            ("max_results", "10".to_string()),
            ("tweet.fields", "id".to_string()),
        ];
        let (_, rate_limit) = self.search(&params).await?;
        Ok(rate_limit)
    }

    async fn fetch_page(
        &self,
        query: &str,
        since: DateTime<Utc>,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        let since = clamp_since(since, Utc::now());

        let mut params = vec![
            ("query", query.to_string()),
            ("max_results", page_size.to_string()),
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("user.fields", USER_FIELDS.to_string()),
            ("expansions", EXPANSIONS.to_string()),
            ("media.fields", MEDIA_FIELDS.to_string()),
            ("start_time", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];
        if let Some(token) = cursor {
            params.push(("next_token", token.to_string()));
        }

        let (body, rate_limit) = self.search(&params).await?;
        parse_page(body, rate_limit)
    }

    fn normalize(&self, item: &RawItem, ctx: &NormalizeContext) -> Result<Record, NormalizeError> {
        normalize_tweet(item, ctx)
    }
}

/// Keeps `since` inside the recent-search window.
fn clamp_since(since: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    // one minute of slack so the request is not rejected on arrival
    let earliest = now - Duration::days(MAX_LOOKBACK_DAYS) + Duration::minutes(1);
    if since < earliest {
        log::warn!(
            "[twitter] lookback before {} is outside recent search, clamping",
            earliest.to_rfc3339()
        );
        earliest
    } else {
        since
    }
}

fn rate_limit_from_headers(
    remaining: Option<&str>,
    reset: Option<&str>,
    now: DateTime<Utc>,
) -> RateLimitState {
    let remaining_calls = remaining
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_REMAINING);

    let reset_at = reset
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(|| now + Duration::seconds(DEFAULT_RESET_SECS));

    RateLimitState {
        remaining_calls,
        reset_at,
    }
}

/// Splits a search response into raw items and the next cursor.
///
/// An empty result set comes back as `{"meta":{"result_count":0}}`
/// without `data`. A body with neither `data` nor `meta` is a
/// contract mismatch.
fn parse_page(mut body: Value, rate_limit: RateLimitState) -> Result<Page, FetchError> {
    if body.get("data").is_none() && body.get("meta").is_none() {
        let detail = body
            .get("errors")
            .map(Value::to_string)
            .unwrap_or_else(|| body.to_string());
        return Err(FetchError::Malformed(format!("unexpected search response: {detail}")));
    }

    let includes = Arc::new(body.get_mut("includes").map(Value::take).unwrap_or(Value::Null));

    let items = match body.get_mut("data").map(Value::take) {
        Some(Value::Array(data)) => data
            .into_iter()
            .map(|tweet| RawItem::new(tweet, includes.clone()))
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(FetchError::Malformed(format!("`data` is not an array: {other}")));
        }
    };

    let next_cursor = body
        .get("meta")
        .and_then(|m| str_field(m, "next_token"))
        .filter(|t| !t.is_empty());

    Ok(Page {
        items,
        next_cursor,
        rate_limit,
    })
}

// ------------------------------------------------------------
// Normalization
// ------------------------------------------------------------

pub fn normalize_tweet(item: &RawItem, ctx: &NormalizeContext) -> Result<Record, NormalizeError> {
    let tweet = &item.data;
    if !tweet.is_object() {
        return Err(NormalizeError::InvalidField {
            field: "data",
            reason: "tweet is not an object".to_string(),
        });
    }

    let id = match tweet.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(NormalizeError::MissingField("id")),
    };

    let text = str_field(tweet, "text").unwrap_or_default();
    let author_id = tweet.get("author_id").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    let author = extract_author(author_id.as_deref(), &item.includes);
    let media = extract_media(tweet, &item.includes);
    let entities = tweet.get("entities").unwrap_or(&Value::Null);

    let (timestamp, timestamp_fallback) =
        util::timestamp_or_now(tweet.get("created_at").and_then(Value::as_str), ctx.collected_at, &id);

    let url = author
        .handle
        .as_ref()
        .map(|user| format!("https://twitter.com/{}/status/{}", user, id));

    let referenced = tweet
        .get("referenced_tweets")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let has_reference = |kind: &str| {
        referenced
            .iter()
            .any(|r| r.get("type").and_then(Value::as_str) == Some(kind))
    };

    Ok(Record {
        unique_id: util::unique_id(&id, &ctx.keyword),
        url,
        lang: str_field(tweet, "lang"),
        author,
        timestamp,
        timestamp_fallback,
        metrics: extract_metrics(tweet.get("public_metrics")),
        media,
        hashtags: entity_list(entities, "hashtags", &["tag"]),
        mentions: entity_list(entities, "mentions", &["username"]),
        urls: entity_list(entities, "urls", &["expanded_url", "url"]),
        is_repost: text.starts_with("RT @") || has_reference("retweeted"),
        is_reply: tweet.get("in_reply_to_user_id").is_some_and(|v| !v.is_null())
            || has_reference("replied_to"),
        is_quote: has_reference("quoted"),
        possibly_sensitive: tweet
            .get("possibly_sensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        keyword: ctx.keyword.clone(),
        platform: "twitter".to_string(),
        source_domain: "twitter.com".to_string(),
        source_type: "social_network".to_string(),
        content_type: "tweet".to_string(),
        collected_at: ctx.collected_at,
        text,
        id,
    })
}

fn extract_author(author_id: Option<&str>, includes: &Value) -> Author {
    let mut author = Author {
        author_id: author_id.map(str::to_string),
        ..Author::default()
    };

    let Some(author_id) = author_id else {
        return author;
    };

    let user = includes
        .get("users")
        .and_then(Value::as_array)
        .and_then(|users| {
            users
                .iter()
                .find(|u| u.get("id").and_then(Value::as_str) == Some(author_id))
        });

    if let Some(user) = user {
        let public = user.get("public_metrics").unwrap_or(&Value::Null);
        author.handle = str_field(user, "username");
        author.display_name = str_field(user, "name");
        author.verified = user.get("verified").and_then(Value::as_bool).unwrap_or(false);
        author.followers_count = u64_field(public, "followers_count");
        author.following_count = u64_field(public, "following_count");
        author.post_count = u64_field(public, "tweet_count");
        author.profile_image_url = str_field(user, "profile_image_url");
    }

    author
}

fn extract_media(tweet: &Value, includes: &Value) -> Vec<MediaAttachment> {
    let keys: Vec<&str> = tweet
        .pointer("/attachments/media_keys")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if keys.is_empty() {
        return Vec::new();
    }

    includes
        .get("media")
        .and_then(Value::as_array)
        .map(|media| {
            media
                .iter()
                .filter(|m| {
                    m.get("media_key")
                        .and_then(Value::as_str)
                        .is_some_and(|k| keys.contains(&k))
                })
                .filter_map(|m| {
                    let kind = match m.get("type").and_then(Value::as_str)? {
                        "photo" => MediaKind::Photo,
                        "video" => MediaKind::Video,
                        "animated_gif" => MediaKind::AnimatedImage,
                        _ => return None,
                    };
                    let url = str_field(m, "url").or_else(|| str_field(m, "preview_image_url"))?;
                    Some(MediaAttachment {
                        kind,
                        url,
                        width: u32_field(m, "width"),
                        height: u32_field(m, "height"),
                        duration_ms: if kind == MediaKind::Video {
                            u64_field(m, "duration_ms")
                        } else {
                            None
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_metrics(public: Option<&Value>) -> Metrics {
    let Some(public) = public else {
        return Metrics::default();
    };
    Metrics {
        likes: u64_field(public, "like_count").unwrap_or(0),
        shares: u64_field(public, "retweet_count").unwrap_or(0),
        replies: u64_field(public, "reply_count").unwrap_or(0),
        quotes: u64_field(public, "quote_count").unwrap_or(0),
        bookmarks: u64_field(public, "bookmark_count").unwrap_or(0),
        impressions: u64_field(public, "impression_count").unwrap_or(0),
    }
}

/// Collects `entities[kind][*][key]`, trying `keys` in order.
fn entity_list(entities: &Value, kind: &str, keys: &[&str]) -> Vec<String> {
    entities
        .get(kind)
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|e| keys.iter().find_map(|k| str_field(e, k)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            keyword: "rust".to_string(),
            collected_at: Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap(),
        }
    }

    fn state() -> RateLimitState {
        RateLimitState {
            remaining_calls: 10,
            reset_at: Utc.with_ymd_and_hms(2025, 1, 10, 12, 15, 0).unwrap(),
        }
    }

    fn search_body() -> Value {
        json!({
            "data": [
                {
                    "id": "100",
                    "text": "Loving #rust with @ferris https://t.co/abc",
                    "author_id": "7",
                    "created_at": "2025-01-09T08:30:00.000Z",
                    "lang": "en",
                    "public_metrics": {
                        "like_count": 5, "retweet_count": 2, "reply_count": 1,
                        "quote_count": 0, "bookmark_count": 3, "impression_count": 99
                    },
                    "entities": {
                        "hashtags": [{ "tag": "rust" }],
                        "mentions": [{ "username": "ferris" }],
                        "urls": [{ "url": "https://t.co/abc", "expanded_url": "https://rust-lang.org" }]
                    },
                    "attachments": { "media_keys": ["3_1", "7_2"] },
                    "referenced_tweets": [{ "type": "quoted", "id": "55" }]
                },
                { "id": "101", "text": "RT @x: hi", "created_at": "not a date" }
            ],
            "includes": {
                "users": [{
                    "id": "7", "username": "crab", "name": "Crab", "verified": true,
                    "public_metrics": { "followers_count": 10, "following_count": 4, "tweet_count": 30 }
                }],
                "media": [
                    { "media_key": "3_1", "type": "photo", "url": "https://img/1.jpg", "width": 640, "height": 480 },
                    { "media_key": "7_2", "type": "video", "preview_image_url": "https://img/2.jpg", "duration_ms": 1500 },
                    { "media_key": "9_9", "type": "photo", "url": "https://img/other.jpg" }
                ]
            },
            "meta": { "result_count": 2, "next_token": "tok2" }
        })
    }

    #[test]
    fn parses_page_items_and_cursor() {
        let page = parse_page(search_body(), state()).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("tok2"));
        assert_eq!(page.rate_limit, state());
        assert!(page.items[0].includes.get("users").is_some());
    }

    #[test]
    fn empty_result_set_is_not_an_error() {
        let page = parse_page(json!({ "meta": { "result_count": 0 } }), state()).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn error_only_body_is_malformed() {
        let err = parse_page(json!({ "errors": [{ "message": "bad" }] }), state()).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(m) if m.contains("bad")));
    }

    #[test]
    fn normalizes_full_tweet() {
        let page = parse_page(search_body(), state()).unwrap();
        let record = normalize_tweet(&page.items[0], &ctx()).unwrap();

        assert_eq!(record.id, "100");
        assert_eq!(record.unique_id, util::unique_id("100", "rust"));
        assert_eq!(record.url.as_deref(), Some("https://twitter.com/crab/status/100"));
        assert_eq!(record.author.handle.as_deref(), Some("crab"));
        assert!(record.author.verified);
        assert_eq!(record.author.followers_count, Some(10));
        assert_eq!(record.author.post_count, Some(30));
        assert_eq!(record.metrics.likes, 5);
        assert_eq!(record.metrics.shares, 2);
        assert_eq!(record.metrics.impressions, 99);
        assert_eq!(record.hashtags, vec!["rust"]);
        assert_eq!(record.mentions, vec!["ferris"]);
        assert_eq!(record.urls, vec!["https://rust-lang.org"]);
        assert!(record.is_quote);
        assert!(!record.is_repost);
        assert!(!record.timestamp_fallback);
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2025, 1, 9, 8, 30, 0).unwrap());

        assert_eq!(record.media.len(), 2);
        assert_eq!(record.media[0].kind, MediaKind::Photo);
        assert_eq!(record.media[0].width, Some(640));
        assert_eq!(record.media[1].kind, MediaKind::Video);
        assert_eq!(record.media[1].url, "https://img/2.jpg");
        assert_eq!(record.media[1].duration_ms, Some(1500));
    }

    #[test]
    fn unparsable_timestamp_is_flagged() {
        let page = parse_page(search_body(), state()).unwrap();
        let record = normalize_tweet(&page.items[1], &ctx()).unwrap();

        assert!(record.timestamp_fallback);
        assert_eq!(record.timestamp, ctx().collected_at);
        assert!(record.is_repost);
        assert_eq!(record.author, Author::default());
        assert_eq!(record.metrics, Metrics::default());
    }

    #[test]
    fn missing_id_is_a_normalization_error() {
        let item = RawItem::standalone(json!({ "text": "no id" }));
        assert_eq!(
            normalize_tweet(&item, &ctx()),
            Err(NormalizeError::MissingField("id"))
        );
    }

    #[test]
    fn rate_limit_headers_are_parsed() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let state = rate_limit_from_headers(Some("42"), Some("1735690500"), now);
        assert_eq!(state.remaining_calls, 42);
        assert_eq!(state.reset_at, Utc.timestamp_opt(1_735_690_500, 0).unwrap());

        let state = rate_limit_from_headers(None, Some("junk"), now);
        assert_eq!(state.remaining_calls, DEFAULT_REMAINING);
        assert_eq!(state.reset_at, now + Duration::seconds(DEFAULT_RESET_SECS));
    }

    #[test]
    fn lookback_is_clamped_to_recent_window() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let recent = now - Duration::days(2);
        assert_eq!(clamp_since(recent, now), recent);

        let old = now - Duration::days(30);
        let clamped = clamp_since(old, now);
        assert!(clamped > now - Duration::days(MAX_LOOKBACK_DAYS));
    }
}
