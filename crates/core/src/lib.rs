pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod runner;
pub mod stores;
pub mod summary;
pub mod traits;

pub use config::{Config, ConfigError};
pub use embeddings::{Embedder, GeminiEmbedder, OpenAiEmbedder};
pub use error::{IngestError, StoreError};
pub use extractor::{
    Extractor, GeminiVisionOcr, OcrEngine, PageSource, PdfFile, TesseractOcr, VisionOcr,
    OCR_DPI, TEXT_LAYER_MIN_CHARS, VISION_DPI,
};
pub use ingest::download_to_tempfile;
pub use models::{
    CallbackPayload, FileType, IngestJob, IngestionOutcome, IngestionReport, JobStatus,
    LibraryEntry, PageDisposition, PageOutcome, PageRecord, SectionSummary, StoreAuth,
    StoredPage, SummaryOutcome,
};
pub use orchestrator::IngestPipeline;
pub use runner::{execute_job, JobContext, JobQueue, Notifier};
pub use stores::PostgrestStore;
pub use summary::{toc_sections, ChatModel, OpenAiChat, SummaryGenerator};
pub use traits::PageStore;
