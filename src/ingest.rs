//! CSV upload ingestion.
//!
//! Validates the uploaded file, feeds every row through the dispatcher in
//! input order, and produces the same table with a `target_label` column
//! appended. Transient artifacts live under the configured work dir: the
//! input copy is removed on every exit path (drop guard), the output copy
//! is left behind for the caller that streams it back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use axum::http::StatusCode;
use thiserror::Error;

use crate::dispatcher::{Dispatcher, LogRecord};

const SOURCE_COLUMN: &str = "source";
const MESSAGE_COLUMN: &str = "log_message";
const LABEL_COLUMN: &str = "target_label";

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(0);

/// Client-visible ingest failures, each with a distinct status mapping.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("File must be a CSV.")]
    InvalidFormat,

    #[error("The uploaded CSV file is empty.")]
    EmptyInput,

    #[error("Invalid CSV format: {0}")]
    Malformed(String),

    #[error("CSV must contain 'source' and 'log_message' columns.")]
    SchemaViolation,

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Removes the transient input artifact when the ingest scope exits,
/// success and failure paths alike.
struct InputArtifact {
    path: PathBuf,
}

impl Drop for InputArtifact {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!("Failed to remove input file: {}", e);
            }
        }
    }
}

pub struct IngestService {
    dispatcher: Arc<Dispatcher>,
    work_dir: PathBuf,
}

impl IngestService {
    pub fn new(dispatcher: Arc<Dispatcher>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher,
            work_dir: work_dir.into(),
        }
    }

    /// Process one uploaded file and return the annotated CSV bytes.
    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<u8>, IngestError> {
        if !file_name.to_ascii_lowercase().ends_with(".csv") {
            return Err(IngestError::InvalidFormat);
        }

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create work dir: {}", self.work_dir.display()))?;

        // Unique per request so concurrent uploads never clobber each other.
        let job_id = NEXT_JOB_ID.fetch_add(1, Ordering::SeqCst);
        let input_path = self.work_dir.join(format!("uploaded_{}.csv", job_id));
        let output_path = self.work_dir.join(format!("classified_{}.csv", job_id));

        tokio::fs::write(&input_path, bytes)
            .await
            .context("Failed to save uploaded file")?;
        let _input_guard = InputArtifact {
            path: input_path.clone(),
        };

        let content = tokio::fs::read(&input_path)
            .await
            .context("Failed to read uploaded file back")?;

        let output = self.classify_csv(&content).await?;

        tokio::fs::write(&output_path, &output)
            .await
            .context("Failed to save output file")?;
        tracing::info!("File saved to {}", output_path.display());

        Ok(output)
    }

    /// Parse, validate, classify row by row, and serialize the result.
    async fn classify_csv(&self, content: &[u8]) -> Result<Vec<u8>, IngestError> {
        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(IngestError::EmptyInput);
        }

        let mut reader = csv::Reader::from_reader(content);
        let headers = reader
            .headers()
            .map_err(|e| IngestError::Malformed(e.to_string()))?
            .clone();

        let source_idx = headers.iter().position(|h| h == SOURCE_COLUMN);
        let message_idx = headers.iter().position(|h| h == MESSAGE_COLUMN);
        let (source_idx, message_idx) = match (source_idx, message_idx) {
            (Some(s), Some(m)) => (s, m),
            _ => return Err(IngestError::SchemaViolation),
        };

        let mut rows = Vec::new();
        for result in reader.records() {
            let row = result.map_err(|e| IngestError::Malformed(e.to_string()))?;
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(IngestError::EmptyInput);
        }

        tracing::info!("Classifying {} log record(s)", rows.len());

        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut out_headers = headers.clone();
        out_headers.push_field(LABEL_COLUMN);
        writer
            .write_record(&out_headers)
            .map_err(|e| IngestError::Internal(e.into()))?;

        // Rows are classified one at a time, in input order.
        for row in &rows {
            let record = LogRecord {
                source: row.get(source_idx).unwrap_or_default().to_string(),
                message: row.get(message_idx).unwrap_or_default().to_string(),
            };
            let label = self.dispatcher.classify(&record).await;

            let mut out_row = row.clone();
            out_row.push_field(&label);
            writer
                .write_record(&out_row)
                .map_err(|e| IngestError::Internal(e.into()))?;
        }

        let output = writer
            .into_inner()
            .map_err(|e| IngestError::Internal(anyhow::anyhow!("Failed to flush output: {}", e)))?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::RoutingPolicy;
    use crate::rule_classifier::RuleClassifier;
    use crate::traits::{MessageClassifier, UNCLASSIFIED};
    use async_trait::async_trait;

    struct FixedLabel(String);

    #[async_trait]
    impl MessageClassifier for FixedLabel {
        async fn classify(&self, _message: &str) -> String {
            self.0.clone()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn service(embedding_label: &str, llm_label: &str) -> IngestService {
        let dispatcher = Arc::new(Dispatcher::new(
            RuleClassifier::new(),
            Arc::new(FixedLabel(embedding_label.to_string())),
            Arc::new(FixedLabel(llm_label.to_string())),
            RoutingPolicy::default(),
        ));
        let work_dir = std::env::temp_dir().join(format!(
            "log_classifier_test_{}_{}",
            std::process::id(),
            NEXT_JOB_ID.fetch_add(1, Ordering::SeqCst)
        ));
        IngestService::new(dispatcher, work_dir)
    }

    fn parse(output: &[u8]) -> (csv::StringRecord, Vec<csv::StringRecord>) {
        let mut reader = csv::Reader::from_reader(output);
        let headers = reader.headers().unwrap().clone();
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        (headers, rows)
    }

    #[tokio::test]
    async fn test_round_trip_appends_target_label() {
        let svc = service("Critical Error", UNCLASSIFIED);
        let input = "source,log_message\n\
                     ThirdPartyAPI,User User123 logged in.\n\
                     modelA,System crashed due to drivers errors when restarting the server\n";

        let output = svc.ingest("logs.csv", input.as_bytes()).await.unwrap();
        let (headers, rows) = parse(&output);

        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["source", "log_message", "target_label"]
        );
        assert_eq!(rows.len(), 2);
        // Row order preserved; rule stage labels the first row, the mock
        // embedding stage the second.
        assert_eq!(rows[0].get(2), Some("User Action"));
        assert_eq!(rows[1].get(0), Some("modelA"));
        assert_eq!(rows[1].get(2), Some("Critical Error"));
    }

    #[tokio::test]
    async fn test_extra_columns_pass_through_in_order() {
        let svc = service(UNCLASSIFIED, "Workflow Error");
        let input = "timestamp,source,log_message,severity\n\
                     2025-01-15T10:30:45Z,modelA,Case escalation failed,high\n";

        let output = svc.ingest("logs.csv", input.as_bytes()).await.unwrap();
        let (headers, rows) = parse(&output);

        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["timestamp", "source", "log_message", "severity", "target_label"]
        );
        assert_eq!(rows[0].get(0), Some("2025-01-15T10:30:45Z"));
        assert_eq!(rows[0].get(3), Some("high"));
        assert_eq!(rows[0].get(4), Some("Workflow Error"));
    }

    #[tokio::test]
    async fn test_rejects_non_csv_filename() {
        let svc = service(UNCLASSIFIED, UNCLASSIFIED);
        let err = svc
            .ingest("logs.txt", b"source,log_message\na,b\n")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidFormat));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_empty_file() {
        let svc = service(UNCLASSIFIED, UNCLASSIFIED);
        let err = svc.ingest("logs.csv", b"").await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyInput));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_header_only_file() {
        let svc = service(UNCLASSIFIED, UNCLASSIFIED);
        let err = svc
            .ingest("logs.csv", b"source,log_message\n")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::EmptyInput));
    }

    #[tokio::test]
    async fn test_rejects_missing_message_column() {
        let svc = service(UNCLASSIFIED, UNCLASSIFIED);
        let err = svc
            .ingest("logs.csv", b"source,text\nmodelA,hello\n")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SchemaViolation));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_ragged_rows() {
        let svc = service(UNCLASSIFIED, UNCLASSIFIED);
        let err = svc
            .ingest("logs.csv", b"source,log_message\na,b,c\n")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Malformed(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_input_artifact_removed_output_kept() {
        let svc = service("Error", UNCLASSIFIED);
        let input = "source,log_message\nmodelA,some message\n";
        svc.ingest("logs.csv", input.as_bytes()).await.unwrap();

        let mut entries = std::fs::read_dir(&svc.work_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        entries.sort();

        assert!(
            entries.iter().all(|name| !name.starts_with("uploaded_")),
            "input artifact should be deleted, found: {:?}",
            entries
        );
        assert!(
            entries.iter().any(|name| name.starts_with("classified_")),
            "output artifact should remain, found: {:?}",
            entries
        );
    }

    #[tokio::test]
    async fn test_input_artifact_removed_on_failure() {
        let svc = service(UNCLASSIFIED, UNCLASSIFIED);
        // Schema violation happens after the input artifact is written.
        let err = svc
            .ingest("logs.csv", b"source,text\nmodelA,hello\n")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SchemaViolation));

        let leftover = std::fs::read_dir(&svc.work_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with("uploaded_"))
            .collect::<Vec<_>>();
        assert!(leftover.is_empty(), "found leftover inputs: {:?}", leftover);
    }
}
