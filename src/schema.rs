use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util;

/// Normalized post, identical in shape for every platform.
///
/// This is the unit that flows through the whole pipeline:
/// - Source adapters produce it from raw API items
/// - The collector dedupes, accumulates and batches it
/// - The storage layer writes it as JSON
///
/// DESIGN NOTES:
/// - Records are never mutated after normalization.
/// - Derived values (engagement, counts, keyphrase, date strings)
///   are NOT stored here. They are computed from these fields by
///   [`Record::derived`] and flattened in at serialization time.
///
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Record {
    /// Platform-native post id. Unique within one run.
    pub id: String,

    /// md5 of `"{id}_{keyword}"`, stable across runs
    pub unique_id: String,

    pub url: Option<String>,
    pub text: String,
    pub lang: Option<String>,

    pub author: Author,

    /// Post creation time in UTC
    pub timestamp: DateTime<Utc>,

    /// True when the platform timestamp could not be parsed and
    /// `timestamp` holds the processing wall-clock time instead.
    pub timestamp_fallback: bool,

    pub metrics: Metrics,
    pub media: Vec<MediaAttachment>,

    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub urls: Vec<String>,

    pub is_repost: bool,
    pub is_reply: bool,
    pub is_quote: bool,
    pub possibly_sensitive: bool,

    // Provenance
    pub keyword: String,
    pub platform: String,
    pub source_domain: String,
    pub source_type: String,
    pub content_type: String,
    pub collected_at: DateTime<Utc>,
}

// ------------------------------------------------------------
// Author
// ------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Author {
    /// Handle without the leading `@`
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub author_id: Option<String>,
    pub verified: bool,
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub post_count: Option<u64>,
    pub profile_image_url: Option<String>,
}

// ------------------------------------------------------------
// Interaction counters
// ------------------------------------------------------------
//
// Field order is the serialized order. Absent counters are zero.
//
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub likes: u64,
    /// Retweets on Twitter, shares on Facebook
    pub shares: u64,
    pub replies: u64,
    pub quotes: u64,
    pub bookmarks: u64,
    pub impressions: u64,
}

impl Metrics {
    /// Weighted interaction sum: likes x1, shares x2, replies x3, quotes x2.
    pub fn engagement_score(&self) -> u64 {
        self.likes + self.shares * 2 + self.replies * 3 + self.quotes * 2
    }
}

// ------------------------------------------------------------
// Media attachments
// ------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedImage,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
}

// ------------------------------------------------------------
// Derived fields
// ------------------------------------------------------------
//
// Pure function of a Record. Only ever built for output.
//
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DerivedFields {
    pub engagement_score: u64,
    pub word_count: usize,
    pub char_count: usize,
    pub has_media: bool,
    pub media_count: usize,
    pub has_hashtags: bool,
    pub has_mentions: bool,
    pub has_urls: bool,
    pub keyphrase: String,
    pub date: String,
    pub time: String,
    pub time_text: String,
}

impl Record {
    pub fn derived(&self) -> DerivedFields {
        DerivedFields {
            engagement_score: self.metrics.engagement_score(),
            word_count: self.text.split_whitespace().count(),
            char_count: self.text.chars().count(),
            has_media: !self.media.is_empty(),
            media_count: self.media.len(),
            has_hashtags: !self.hashtags.is_empty(),
            has_mentions: !self.mentions.is_empty(),
            has_urls: !self.urls.is_empty(),
            keyphrase: util::keyphrase(&self.text, 5),
            date: self.timestamp.format("%Y-%m-%d").to_string(),
            time: self.timestamp.format("%H:%M:%S").to_string(),
            time_text: self.timestamp.format("%I:%M %p · %b %d, %Y").to_string(),
        }
    }

    /// Serializable view: the record with its derived fields flattened in.
    pub fn document(&self) -> RecordDocument<'_> {
        RecordDocument {
            record: self,
            derived: self.derived(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordDocument<'a> {
    #[serde(flatten)]
    pub record: &'a Record,

    #[serde(flatten)]
    pub derived: DerivedFields,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_record(id: &str) -> Record {
        Record {
            id: id.to_string(),
            unique_id: util::unique_id(id, "rust"),
            url: None,
            text: "Hello #rust world".to_string(),
            lang: Some("en".to_string()),
            author: Author {
                handle: Some("ferris".to_string()),
                ..Author::default()
            },
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap(),
            timestamp_fallback: false,
            metrics: Metrics::default(),
            media: vec![],
            hashtags: vec!["rust".to_string()],
            mentions: vec![],
            urls: vec![],
            is_repost: false,
            is_reply: false,
            is_quote: false,
            possibly_sensitive: false,
            keyword: "rust".to_string(),
            platform: "twitter".to_string(),
            source_domain: "twitter.com".to_string(),
            source_type: "social_network".to_string(),
            content_type: "tweet".to_string(),
            collected_at: Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn engagement_score_weights_counters() {
        let metrics = Metrics {
            likes: 10,
            shares: 2,
            replies: 1,
            quotes: 3,
            bookmarks: 100,
            impressions: 1000,
        };
        assert_eq!(metrics.engagement_score(), 10 + 4 + 3 + 6);
    }

    #[test]
    fn derived_fields_follow_record() {
        let mut record = sample_record("1");
        record.media.push(MediaAttachment {
            kind: MediaKind::Photo,
            url: "https://img/1.jpg".to_string(),
            width: Some(10),
            height: Some(20),
            duration_ms: None,
        });

        let derived = record.derived();
        assert_eq!(derived.word_count, 3);
        assert_eq!(derived.char_count, 17);
        assert!(derived.has_media);
        assert_eq!(derived.media_count, 1);
        assert!(derived.has_hashtags);
        assert!(!derived.has_urls);
        assert_eq!(derived.date, "2024-03-05");
        assert_eq!(derived.time, "14:07:09");
        assert_eq!(derived.time_text, "02:07 PM · Mar 05, 2024");
    }

    #[test]
    fn document_flattens_derived_fields() {
        let record = sample_record("42");
        let value = serde_json::to_value(record.document()).unwrap();

        assert_eq!(value["id"], "42");
        assert_eq!(value["engagement_score"], 0);
        assert_eq!(value["timestamp_fallback"], false);
        assert_eq!(value["metrics"]["likes"], 0);
        assert_eq!(value["keyphrase"], "Hello #rust world");
    }

    #[test]
    fn media_kind_uses_snake_case() {
        let value = serde_json::to_value(MediaKind::AnimatedImage).unwrap();
        assert_eq!(value, "animated_image");
    }
}
