use std::path::{Path, PathBuf};

use crate::error::PersistError;
use crate::schema::{Record, RecordDocument};

/// Durable output for collected records.
///
/// Both operations overwrite the artifact named by `label`.
///
/// CONTRACT:
/// - Failures are reported, never retried here
///   (the collector owns the retry policy)
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Persists one batch of the pending buffer.
    async fn write_batch(&self, records: &[Record], label: &str) -> Result<(), PersistError>;

    /// Persists the complete accumulator.
    async fn write_full(&self, records: &[Record], label: &str) -> Result<(), PersistError>;
}

/// Writes pretty-printed JSON arrays to `<dir>/<label>.json`.
///
/// Each element is the record with its derived fields flattened in.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{}.json", label))
    }

    async fn write(&self, records: &[Record], label: &str) -> Result<(), PersistError> {
        let docs: Vec<RecordDocument<'_>> = records.iter().map(Record::document).collect();
        let bytes = serde_json::to_vec_pretty(&docs).map_err(|source| PersistError::Serialize {
            label: label.to_string(),
            source,
        })?;

        create_dir(&self.dir).await?;

        let path = self.path_for(label);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| PersistError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

async fn create_dir(dir: &Path) -> Result<(), PersistError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| PersistError::Io {
            path: dir.display().to_string(),
            source,
        })
}

#[async_trait::async_trait]
impl RecordSink for JsonFileSink {
    async fn write_batch(&self, records: &[Record], label: &str) -> Result<(), PersistError> {
        self.write(records, label).await
    }

    async fn write_full(&self, records: &[Record], label: &str) -> Result<(), PersistError> {
        self.write(records, label).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::sample_record;

    #[tokio::test]
    async fn writes_json_array_with_derived_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(tmp.path().join("out"));
        let records = vec![sample_record("1"), sample_record("2")];

        sink.write_batch(&records, "tweets_batch_0").await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("out/tweets_batch_0.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], "1");
        assert_eq!(items[1]["id"], "2");
        assert_eq!(items[0]["word_count"], 3);
    }

    #[tokio::test]
    async fn full_write_overwrites_previous_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(tmp.path());

        sink.write_full(&[sample_record("1"), sample_record("2")], "data").await.unwrap();
        sink.write_full(&[sample_record("3")], "data").await.unwrap();

        let raw = std::fs::read_to_string(sink.path_for("data")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["id"], "3");
    }

    #[tokio::test]
    async fn unwritable_target_reports_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // a regular file where the output directory should be
        let sink = JsonFileSink::new(&blocker);
        let err = sink.write_full(&[sample_record("1")], "data").await.unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }
}
