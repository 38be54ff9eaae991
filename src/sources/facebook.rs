use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde_json::Value;

use crate::{
    config::Config,
    error::{FetchError, NormalizeError},
    schema::{Author, MediaAttachment, MediaKind, Metrics, Record},
    util,
};

use super::adapter::{NormalizeContext, Page, RateLimitState, RawItem, SourceAdapter};
use super::http::{self, str_field, u32_field, u64_field};

/// Facebook Graph API adapter
///
/// Page feed:
/// https://developers.facebook.com/docs/graph-api/reference/page/feed
///
/// The keyword is the Page username or id whose posts are read.
/// Usage is reported as percentages in `x-app-usage`; the quota
/// window is a rolling hour.
///
/// The access token travels in the `Authorization` header, never
/// in the URL.
pub struct FacebookAdapter {
    client: reqwest::Client,
    token: String,
    base_url: String,
    debug: bool,
}

const POST_FIELDS: &str = "id,message,created_time,permalink_url,from,shares,\
reactions.summary(total_count).limit(0),comments.summary(total_count).limit(0),\
attachments{media_type,url,media,subattachments}";

/// Rolling usage window.
const USAGE_WINDOW_SECS: i64 = 3600;

impl FacebookAdapter {
    pub fn new(token: String, config: &Config) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(config.http.timeout_secs)?,
            token,
            base_url: format!(
                "{}/{}",
                config.facebook.base_url.trim_end_matches('/'),
                config.facebook.api_version
            ),
            debug: config.debug_log(),
        })
    }

    /// `{base}/{version}/{segments...}` with every segment percent-encoded,
    /// so a Page name can never add path, query or fragment parts.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, FetchError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| FetchError::Malformed(format!("invalid base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Malformed(format!("base url {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str], params: &[(&str, String)]) -> Result<(Value, RateLimitState), FetchError> {
        let response = self
            .client
            .get(self.endpoint(segments)?)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(http::classify_send_error)?;

        let now = Utc::now();
        let rate_limit = rate_limit_from_usage(http::header_str(response.headers(), "x-app-usage"), now);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_graph_error(status, &body, now));
        }

        let body = http::read_json(response).await?;
        if self.debug {
            log::debug!("[facebook] page body: {}", body);
        }
        Ok((body, rate_limit))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for FacebookAdapter {
    fn name(&self) -> &'static str {
        "facebook"
    }

    fn source_domain(&self) -> &'static str {
        "facebook.com"
    }

    async fn probe_credentials(&self) -> Result<RateLimitState, FetchError> {
        let (_, rate_limit) = self.get(&["me"], &[("fields", "id".to_string())]).await?;
        Ok(rate_limit)
    }

    async fn fetch_page(
        &self,
        query: &str,
        since: DateTime<Utc>,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        let mut params = vec![
            ("fields", POST_FIELDS.to_string()),
            ("limit", page_size.to_string()),
            ("since", since.timestamp().to_string()),
        ];
        if let Some(after) = cursor {
            params.push(("after", after.to_string()));
        }

        let (body, rate_limit) = self.get(&[query, "posts"], &params).await?;
        parse_page(body, rate_limit)
    }

    fn normalize(&self, item: &RawItem, ctx: &NormalizeContext) -> Result<Record, NormalizeError> {
        normalize_post(item, ctx)
    }
}

/// Remaining budget is `100 - highest usage percentage`.
fn rate_limit_from_usage(header: Option<&str>, now: DateTime<Utc>) -> RateLimitState {
    let used = header
        .and_then(|h| serde_json::from_str::<Value>(h).ok())
        .map(|usage| {
            ["call_count", "total_cputime", "total_time"]
                .iter()
                .filter_map(|k| u64_field(&usage, k))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);

    RateLimitState {
        remaining_calls: 100u64.saturating_sub(used) as u32,
        reset_at: now + Duration::seconds(USAGE_WINDOW_SECS),
    }
}

/// Maps a Graph API error body onto a fetch error kind.
///
/// The numeric `error.code` decides when present; the HTTP status
/// is only the fallback.
fn classify_graph_error(status: StatusCode, body: &str, now: DateTime<Utc>) -> FetchError {
    let reset_at = now + Duration::seconds(USAGE_WINDOW_SECS);
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let Some(code) = error.and_then(|e| e.get("code")).and_then(Value::as_u64) else {
        return http::classify_status(status, body, reset_at);
    };

    let message = error
        .and_then(|e| str_field(e, "message"))
        .unwrap_or_default();
    let message = format!("graph error {}: {}", code, message);

    match code {
        102 | 190 | 10 | 200..=299 => FetchError::Unauthorized(message),
        4 | 17 | 32 | 613 | 80001..=80014 => FetchError::RateLimited { reset_at },
        1 | 2 => FetchError::Transient(message),
        _ => FetchError::Malformed(message),
    }
}

/// The feed reports a next page through `paging.next`; the cursor
/// to send back is `paging.cursors.after`.
fn parse_page(mut body: Value, rate_limit: RateLimitState) -> Result<Page, FetchError> {
    let items = match body.get_mut("data").map(Value::take) {
        Some(Value::Array(data)) => data.into_iter().map(RawItem::standalone).collect(),
        _ => {
            return Err(FetchError::Malformed(format!(
                "feed response without `data` array: {}",
                body
            )));
        }
    };

    let next_cursor = body
        .get("paging")
        .filter(|p| p.get("next").is_some_and(|n| !n.is_null()))
        .and_then(|p| p.pointer("/cursors/after"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Page {
        items,
        next_cursor,
        rate_limit,
    })
}

// ------------------------------------------------------------
// Normalization
// ------------------------------------------------------------

pub fn normalize_post(item: &RawItem, ctx: &NormalizeContext) -> Result<Record, NormalizeError> {
    let post = &item.data;
    let id = str_field(post, "id")
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingField("id"))?;

    let text = str_field(post, "message").unwrap_or_default();

    let (timestamp, timestamp_fallback) =
        util::timestamp_or_now(post.get("created_time").and_then(Value::as_str), ctx.collected_at, &id);

    let from = post.get("from").unwrap_or(&Value::Null);
    let author = Author {
        handle: str_field(from, "username"),
        display_name: str_field(from, "name"),
        author_id: str_field(from, "id"),
        ..Author::default()
    };

    let metrics = Metrics {
        likes: post
            .pointer("/reactions/summary/total_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        shares: post.pointer("/shares/count").and_then(Value::as_u64).unwrap_or(0),
        replies: post
            .pointer("/comments/summary/total_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        ..Metrics::default()
    };

    let attachments = flatten_attachments(post);
    let media = attachments.iter().filter_map(|a| attachment_media(a)).collect();
    let urls = attachments
        .iter()
        .filter(|a| a.get("media_type").and_then(Value::as_str) == Some("link"))
        .filter_map(|a| str_field(a, "url"))
        .collect();

    Ok(Record {
        unique_id: util::unique_id(&id, &ctx.keyword),
        url: str_field(post, "permalink_url"),
        lang: None,
        author,
        timestamp,
        timestamp_fallback,
        metrics,
        media,
        hashtags: util::hashtags_in(&text),
        mentions: Vec::new(),
        urls,
        is_repost: false,
        is_reply: false,
        is_quote: false,
        possibly_sensitive: false,
        keyword: ctx.keyword.clone(),
        platform: "facebook".to_string(),
        source_domain: "facebook.com".to_string(),
        source_type: "social_network".to_string(),
        content_type: "social_post".to_string(),
        collected_at: ctx.collected_at,
        text,
        id,
    })
}

/// Top-level attachments plus album children.
fn flatten_attachments(post: &Value) -> Vec<&Value> {
    let mut out = Vec::new();
    let top = post
        .pointer("/attachments/data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for attachment in top {
        match attachment.pointer("/subattachments/data").and_then(Value::as_array) {
            Some(children) if !children.is_empty() => out.extend(children.iter()),
            _ => out.push(attachment),
        }
    }
    out
}

fn attachment_media(attachment: &Value) -> Option<MediaAttachment> {
    let kind = match attachment.get("media_type").and_then(Value::as_str)? {
        "photo" | "album" => MediaKind::Photo,
        "video" | "video_inline" | "video_autoplay" => MediaKind::Video,
        "animated_image_share" | "animated_image_video" | "animated_image_autoplay" => {
            MediaKind::AnimatedImage
        }
        _ => return None,
    };

    let media = attachment.get("media")?;
    let image = media.get("image").unwrap_or(&Value::Null);
    let url = str_field(media, "source").or_else(|| str_field(image, "src"))?;

    Some(MediaAttachment {
        kind,
        url,
        width: u32_field(image, "width"),
        height: u32_field(image, "height"),
        duration_ms: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            keyword: "nasa".to_string(),
            collected_at: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        }
    }

    fn state() -> RateLimitState {
        RateLimitState {
            remaining_calls: 80,
            reset_at: Utc.with_ymd_and_hms(2025, 2, 1, 1, 0, 0).unwrap(),
        }
    }

    fn adapter(base_url: &str, token: &str) -> FacebookAdapter {
        let mut config = Config::default();
        config.facebook.base_url = base_url.to_string();
        FacebookAdapter::new(token.to_string(), &config).unwrap()
    }

    #[test]
    fn page_name_is_a_single_encoded_segment() {
        let fb = adapter("https://graph.facebook.com", "t");
        let url = fb.endpoint(&["a/b?c#d", "posts"]).unwrap();

        assert_eq!(url.as_str(), "https://graph.facebook.com/v19.0/a%2Fb%3Fc%23d/posts");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[tokio::test]
    async fn token_stays_out_of_network_errors() {
        let fb = adapter("http://127.0.0.1:1", "SECRET_TOKEN_123");

        let err = fb.probe_credentials().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!err.to_string().contains("SECRET_TOKEN_123"));

        let url = fb.endpoint(&["me"]).unwrap();
        assert!(!url.as_str().contains("SECRET_TOKEN_123"));
    }

    #[test]
    fn next_cursor_requires_next_link() {
        let body = json!({
            "data": [{ "id": "1_2" }],
            "paging": { "cursors": { "before": "b", "after": "a1" }, "next": "https://graph/next" }
        });
        let page = parse_page(body, state()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("a1"));

        let last = json!({ "data": [], "paging": { "cursors": { "after": "a2" } } });
        assert!(parse_page(last, state()).unwrap().next_cursor.is_none());
    }

    #[test]
    fn missing_data_is_malformed() {
        assert!(matches!(
            parse_page(json!({ "paging": {} }), state()),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn graph_error_codes_decide_kind() {
        let now = Utc::now();
        let body = |code: u64| json!({ "error": { "message": "m", "code": code } }).to_string();

        assert!(matches!(
            classify_graph_error(StatusCode::BAD_REQUEST, &body(190), now),
            FetchError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_graph_error(StatusCode::FORBIDDEN, &body(4), now),
            FetchError::RateLimited { .. }
        ));
        assert!(classify_graph_error(StatusCode::INTERNAL_SERVER_ERROR, &body(2), now).is_transient());
        assert!(matches!(
            classify_graph_error(StatusCode::BAD_REQUEST, &body(100), now),
            FetchError::Malformed(_)
        ));
        assert!(classify_graph_error(StatusCode::BAD_GATEWAY, "<html>", now).is_transient());
    }

    #[test]
    fn usage_header_sets_remaining_budget() {
        let now = Utc::now();
        let state = rate_limit_from_usage(Some(r#"{"call_count":28,"total_cputime":40,"total_time":12}"#), now);
        assert_eq!(state.remaining_calls, 60);

        assert_eq!(rate_limit_from_usage(None, now).remaining_calls, 100);
        assert_eq!(
            rate_limit_from_usage(Some(r#"{"call_count":120}"#), now).remaining_calls,
            0
        );
    }

    #[test]
    fn normalizes_post_with_album() {
        let item = RawItem::standalone(json!({
            "id": "123_456",
            "message": "Launch day #space #nasa",
            "created_time": "2025-01-31T18:00:00+0000",
            "permalink_url": "https://facebook.com/123_456",
            "from": { "id": "123", "name": "NASA" },
            "shares": { "count": 7 },
            "reactions": { "summary": { "total_count": 40 } },
            "comments": { "summary": { "total_count": 3 } },
            "attachments": { "data": [
                { "media_type": "album", "subattachments": { "data": [
                    { "media_type": "photo", "media": { "image": { "src": "https://img/a.jpg", "width": 720, "height": 480 } } },
                    { "media_type": "video", "media": { "source": "https://vid/b.mp4", "image": { "src": "https://img/b.jpg" } } }
                ] } },
                { "media_type": "link", "url": "https://nasa.gov" }
            ] }
        }));

        let record = normalize_post(&item, &ctx()).unwrap();
        assert_eq!(record.id, "123_456");
        assert_eq!(record.author.display_name.as_deref(), Some("NASA"));
        assert_eq!(record.author.author_id.as_deref(), Some("123"));
        assert_eq!(record.metrics.likes, 40);
        assert_eq!(record.metrics.shares, 7);
        assert_eq!(record.metrics.replies, 3);
        assert_eq!(record.hashtags, vec!["space", "nasa"]);
        assert_eq!(record.urls, vec!["https://nasa.gov"]);
        assert_eq!(record.media.len(), 2);
        assert_eq!(record.media[0].width, Some(720));
        assert_eq!(record.media[1].kind, MediaKind::Video);
        assert_eq!(record.media[1].url, "https://vid/b.mp4");
        assert!(!record.timestamp_fallback);
        assert_eq!(record.timestamp, Utc.with_ymd_and_hms(2025, 1, 31, 18, 0, 0).unwrap());
        assert_eq!(record.source_domain, "facebook.com");
    }

    #[test]
    fn post_without_id_is_rejected() {
        let item = RawItem::standalone(json!({ "message": "x" }));
        assert_eq!(normalize_post(&item, &ctx()), Err(NormalizeError::MissingField("id")));
    }
}
