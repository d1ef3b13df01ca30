use crate::error::IngestError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::warn;

/// Trimmed text-layer output longer than this is trusted as a real text
/// layer; anything at or below it falls through to OCR.
pub const TEXT_LAYER_MIN_CHARS: usize = 50;

/// Rendering resolution for the local OCR path.
pub const OCR_DPI: u32 = 100;

/// Rendering resolution for the vision-model path, which reads the image
/// directly and benefits from the extra detail.
pub const VISION_DPI: u32 = 200;

const VISION_PROMPT: &str =
    "This is a page from a book. Extract all the main text from this image.";

#[async_trait]
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    fn text_layer(&self, page_index: usize) -> Result<String, IngestError>;

    async fn rasterize(&self, page_index: usize, dpi: u32) -> Result<Vec<u8>, IngestError>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image_png: &[u8]) -> Result<String, IngestError>;
}

#[async_trait]
pub trait VisionOcr: Send + Sync {
    async fn read_page(&self, image_png: &[u8]) -> Result<String, IngestError>;
}

/// A PDF opened for page-level access: text layer through the parsed
/// document, rasterization through `pdftoppm` against the file on disk.
pub struct PdfFile {
    document: Document,
    path: PathBuf,
}

impl PdfFile {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        Ok(Self {
            document,
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl PageSource for PdfFile {
    fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    fn text_layer(&self, page_index: usize) -> Result<String, IngestError> {
        let page_number = page_index as u32 + 1;
        if !self.document.get_pages().contains_key(&page_number) {
            return Err(IngestError::PdfParse(format!(
                "page {page_number} is out of range"
            )));
        }

        self.document
            .extract_text(&[page_number])
            .map_err(|error| IngestError::PdfParse(error.to_string()))
    }

    async fn rasterize(&self, page_index: usize, dpi: u32) -> Result<Vec<u8>, IngestError> {
        let page_number = page_index + 1;
        let workdir = tempfile::tempdir()?;
        let prefix = workdir.path().join("page");

        let output = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg(&self.path)
            .arg(&prefix)
            .output()
            .await
            .map_err(|error| IngestError::Raster(format!("failed to run pdftoppm: {error}")))?;

        if !output.status.success() {
            return Err(IngestError::Raster(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // pdftoppm zero-pads the page number in the output name, so scan the
        // scratch directory instead of guessing it.
        let mut produced = Vec::new();
        let mut entries = tokio::fs::read_dir(workdir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "png") {
                produced.push(entry.path());
            }
        }
        produced.sort();

        match produced.first() {
            Some(image_path) => Ok(tokio::fs::read(image_path).await?),
            None => Err(IngestError::Raster(format!(
                "pdftoppm produced no image for page {page_number}"
            ))),
        }
    }
}

/// Local OCR through the `tesseract` binary. Page images are treated as a
/// single uniform block of text (`--psm 6`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TesseractOcr;

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image_png: &[u8]) -> Result<String, IngestError> {
        let workdir = tempfile::tempdir()?;
        let image_path = workdir.path().join("page.png");
        tokio::fs::write(&image_path, image_png).await?;

        let output = Command::new("tesseract")
            .arg(&image_path)
            .arg("stdout")
            .arg("--psm")
            .arg("6")
            .output()
            .await
            .map_err(|error| IngestError::OcrFailed(format!("failed to run tesseract: {error}")))?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Vision-model OCR: the rendered page goes to a multimodal model as an
/// inline image with a fixed extraction instruction.
pub struct GeminiVisionOcr {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GeminiVisionOcr {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl VisionOcr for GeminiVisionOcr {
    async fn read_page(&self, image_png: &[u8]) -> Result<String, IngestError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": VISION_PROMPT },
                    {
                        "inline_data": {
                            "mime_type": "image/png",
                            "data": STANDARD.encode(image_png),
                        }
                    },
                ]
            }]
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.endpoint, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "vision ocr request returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let text = parsed
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.pointer("/text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        Ok(text)
    }
}

/// Per-page extraction strategy. Failures at any tier degrade to the next
/// tier or to empty text; nothing raised here ever crosses a page boundary.
pub struct Extractor<O, V> {
    pub(crate) ocr: O,
    pub(crate) vision: V,
    ocr_dpi: u32,
    vision_dpi: u32,
}

impl<O, V> Extractor<O, V>
where
    O: OcrEngine,
    V: VisionOcr,
{
    pub fn new(ocr: O, vision: V) -> Self {
        Self {
            ocr,
            vision,
            ocr_dpi: OCR_DPI,
            vision_dpi: VISION_DPI,
        }
    }

    pub async fn extract<S: PageSource>(
        &self,
        source: &S,
        page_index: usize,
        use_vision_model: bool,
    ) -> String {
        if use_vision_model {
            return self.extract_with_vision(source, page_index).await;
        }

        match source.text_layer(page_index) {
            Ok(text) if text.trim().len() > TEXT_LAYER_MIN_CHARS => {
                return text.trim().to_string();
            }
            Ok(_) => {}
            Err(error) => {
                warn!(
                    page = page_index + 1,
                    %error,
                    "text-layer extraction failed, falling back to ocr"
                );
            }
        }

        let image = match source.rasterize(page_index, self.ocr_dpi).await {
            Ok(image) => image,
            Err(error) => {
                warn!(page = page_index + 1, %error, "page rasterization failed");
                return String::new();
            }
        };

        match self.ocr.recognize(&image).await {
            Ok(text) => text.trim().to_string(),
            Err(error) => {
                warn!(page = page_index + 1, %error, "ocr produced no text");
                String::new()
            }
        }
    }

    async fn extract_with_vision<S: PageSource>(&self, source: &S, page_index: usize) -> String {
        let image = match source.rasterize(page_index, self.vision_dpi).await {
            Ok(image) => image,
            Err(error) => {
                warn!(page = page_index + 1, %error, "page rasterization failed");
                return String::new();
            }
        };

        match self.vision.read_page(&image).await {
            Ok(text) => text.trim().to_string(),
            Err(error) => {
                warn!(page = page_index + 1, %error, "vision ocr produced no text");
                String::new()
            }
        }
    }
}
