use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Download(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("page raster error: {0}")]
    Raster(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("model provider error: {0}")]
    Provider(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("job queue unavailable: {0}")]
    Queue(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
