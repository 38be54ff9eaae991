use std::collections::HashSet;
use std::path::Path;

use crate::schema::Record;

/// How many records the report lists by engagement.
const TOP_N: usize = 3;

/// Preview length of a record's text in the report.
const PREVIEW_CHARS: usize = 100;

/// Aggregate view over one run's records.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary<'a> {
    pub total: usize,
    pub unique_authors: usize,
    pub avg_engagement: f64,
    pub with_media: usize,
    pub with_hashtags: usize,
    pub with_urls: usize,
    /// Highest engagement first, ties in acceptance order
    pub top: Vec<&'a Record>,
}

impl<'a> Summary<'a> {
    pub fn from_records(records: &'a [Record]) -> Self {
        let authors: HashSet<&str> = records
            .iter()
            .filter_map(|r| r.author.handle.as_deref())
            .filter(|h| !h.is_empty())
            .collect();

        let engagement: u64 = records.iter().map(|r| r.metrics.engagement_score()).sum();
        let avg_engagement = if records.is_empty() {
            0.0
        } else {
            engagement as f64 / records.len() as f64
        };

        let mut top: Vec<&Record> = records.iter().collect();
        top.sort_by_key(|r| std::cmp::Reverse(r.metrics.engagement_score()));
        top.truncate(TOP_N);

        Self {
            total: records.len(),
            unique_authors: authors.len(),
            avg_engagement,
            with_media: records.iter().filter(|r| !r.media.is_empty()).count(),
            with_hashtags: records.iter().filter(|r| !r.hashtags.is_empty()).count(),
            with_urls: records.iter().filter(|r| !r.urls.is_empty()).count(),
            top,
        }
    }

    fn percent(&self, n: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            n as f64 / self.total as f64 * 100.0
        }
    }

    /// Prints the human-readable report to stdout.
    pub fn print(&self, platform: &str, output: &Path) {
        if self.total == 0 {
            println!("No {} posts collected.", platform);
            return;
        }

        let rule = "=".repeat(50);
        println!("\n{}", rule);
        println!("{} COLLECTION SUMMARY", platform.to_uppercase());
        println!("{}", rule);
        println!("Total posts collected: {}", self.total);
        println!("Unique authors: {}", self.unique_authors);
        println!("Data saved to: {}", output.display());

        println!("\nENGAGEMENT STATISTICS:");
        println!("Average engagement score: {:.2}", self.avg_engagement);
        println!("Posts with media: {} ({:.1}%)", self.with_media, self.percent(self.with_media));
        println!(
            "Posts with hashtags: {} ({:.1}%)",
            self.with_hashtags,
            self.percent(self.with_hashtags)
        );
        println!("Posts with URLs: {} ({:.1}%)", self.with_urls, self.percent(self.with_urls));

        println!("\nTOP PERFORMING POSTS:");
        for (i, record) in self.top.iter().enumerate() {
            let derived = record.derived();
            println!(
                "\n{}. @{} - Engagement: {}",
                i + 1,
                record.author.handle.as_deref().unwrap_or("unknown"),
                derived.engagement_score
            );
            println!("   Created: {}", derived.time_text);
            println!("   Text: {}", preview(&record.text));
            println!(
                "   Metrics: {} likes, {} shares, {} replies",
                record.metrics.likes, record.metrics.shares, record.metrics.replies
            );
        }
    }
}

/// First `PREVIEW_CHARS` characters, with an ellipsis when cut.
fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
