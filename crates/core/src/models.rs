use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Pdf,
    Epub,
}

impl FileType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.extension())
    }
}

/// One page of one book as written to the `book_pages` table. Never written
/// when `text` is empty; `embedding` stays null when the provider failed.
#[derive(Debug, Clone, Serialize)]
pub struct PageRecord {
    pub book_id: String,
    pub page_number: u32,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

/// A page read back from the store. The backfill path updates its embedding
/// in place and never touches `text` or `page_number`.
#[derive(Debug, Clone)]
pub struct StoredPage {
    pub id: String,
    pub page_number: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub toc: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionSummary {
    pub book_id: String,
    pub section_index: u32,
    pub section_title: String,
    pub summary: String,
}

/// Credentials the store connection is scoped to. Resolved at trigger time,
/// before any job exists.
#[derive(Debug, Clone)]
pub enum StoreAuth {
    ServiceRole,
    Bearer(String),
}

/// One ingestion request, alive from trigger until its terminal notification.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub id: Uuid,
    pub book_id: String,
    pub source_url: Option<String>,
    pub page_count: usize,
    pub file_type: FileType,
    pub use_vision_model: bool,
    pub callback_url: Option<String>,
    pub auth: StoreAuth,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(rename = "pageCount")]
    pub page_count: usize,
}

/// What happened to a single page. Swallowed per-page failures surface here
/// instead of disappearing into a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageDisposition {
    Stored,
    StoredWithoutEmbedding,
    SkippedEmpty,
    WriteFailed(String),
}

#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub page_number: u32,
    pub disposition: PageDisposition,
}

/// Loop result: the wire-facing outcome plus the per-page dispositions that
/// stay on this side of the callback.
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub outcome: IngestionOutcome,
    pub pages: Vec<PageOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub book_id: String,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<IngestionOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryOutcome {
    #[serde(skip)]
    pub book_found: bool,
    pub sections: usize,
    pub message: String,
}
