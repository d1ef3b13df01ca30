use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{Extractor, OcrEngine, PageSource, PdfFile, VisionOcr};
use crate::ingest::download_to_tempfile;
use crate::models::{
    FileType, IngestionOutcome, IngestionReport, PageDisposition, PageOutcome, PageRecord,
};
use crate::traits::PageStore;
use reqwest::Client;
use tracing::{info, warn};

/// Drives the page loop: extraction, embedding, and store writes, strictly
/// one page at a time in increasing order. Failures inside a page never
/// escape that page's iteration; failures that invalidate the whole job
/// (download, unreadable file, unreachable store on the backfill read)
/// propagate to the caller.
pub struct IngestPipeline<St, Oc, Vi, Em, Ge>
where
    St: PageStore,
    Oc: OcrEngine,
    Vi: VisionOcr,
    Em: Embedder,
    Ge: Embedder,
{
    store: St,
    extractor: Extractor<Oc, Vi>,
    text_embedder: Em,
    vision_embedder: Ge,
    download_client: Client,
}

impl<St, Oc, Vi, Em, Ge> IngestPipeline<St, Oc, Vi, Em, Ge>
where
    St: PageStore,
    Oc: OcrEngine,
    Vi: VisionOcr,
    Em: Embedder,
    Ge: Embedder,
{
    pub fn new(store: St, extractor: Extractor<Oc, Vi>, text_embedder: Em, vision_embedder: Ge) -> Self {
        Self {
            store,
            extractor,
            text_embedder,
            vision_embedder,
            download_client: Client::new(),
        }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub async fn ingest_pdf(
        &self,
        source_url: &str,
        book_id: &str,
        page_cap: usize,
        use_vision_model: bool,
    ) -> Result<IngestionReport, IngestError> {
        let source_file =
            download_to_tempfile(&self.download_client, source_url, FileType::Pdf).await?;
        let source = PdfFile::open(source_file.path())?;

        let report = self
            .ingest_pages(&source, book_id, page_cap, use_vision_model)
            .await;

        // `source_file` drops here; the guard removes the temporary whether
        // the loop above ran or an earlier `?` returned.
        Ok(report)
    }

    pub async fn ingest_pages<S: PageSource>(
        &self,
        source: &S,
        book_id: &str,
        page_cap: usize,
        use_vision_model: bool,
    ) -> IngestionReport {
        let total_pages = source.page_count().min(page_cap);
        info!(book_id, total_pages, use_vision_model, "starting page-by-page ingestion");

        let mut pages = Vec::with_capacity(total_pages);
        for page_index in 0..total_pages {
            let page_number = page_index as u32 + 1;
            info!(book_id, page_number, total_pages, "processing page");

            let text = self
                .extractor
                .extract(source, page_index, use_vision_model)
                .await;

            if text.trim().is_empty() {
                info!(book_id, page_number, "page produced no text, skipping");
                pages.push(PageOutcome {
                    page_number,
                    disposition: PageDisposition::SkippedEmpty,
                });
                continue;
            }

            let embedding = self.embed_or_null(&text, use_vision_model).await;
            let had_embedding = embedding.is_some();
            let record = PageRecord {
                book_id: book_id.to_string(),
                page_number,
                text,
                embedding,
            };

            let disposition = match self.store.insert_page(&record).await {
                Ok(()) if had_embedding => PageDisposition::Stored,
                Ok(()) => PageDisposition::StoredWithoutEmbedding,
                Err(error) => {
                    warn!(book_id, page_number, %error, "failed to write page record");
                    PageDisposition::WriteFailed(error.to_string())
                }
            };
            pages.push(PageOutcome {
                page_number,
                disposition,
            });
        }

        info!(book_id, total_pages, "finished page-by-page ingestion");

        IngestionReport {
            outcome: IngestionOutcome {
                success: true,
                message: "PDF processed and stored successfully".to_string(),
                page_count: total_pages,
            },
            pages,
        }
    }

    pub async fn backfill_embeddings(
        &self,
        book_id: &str,
        use_vision_provider: bool,
    ) -> Result<IngestionReport, IngestError> {
        let stored = self.store.pages_for_book(book_id).await?;

        if stored.is_empty() {
            warn!(book_id, "no stored pages for book, nothing to backfill");
            return Ok(IngestionReport {
                outcome: IngestionOutcome {
                    success: false,
                    message: "No pages found for this book".to_string(),
                    page_count: 0,
                },
                pages: Vec::new(),
            });
        }

        let total_pages = stored.len();
        let mut pages = Vec::with_capacity(total_pages);
        let mut updated = 0usize;

        for page in stored {
            if page.text.trim().is_empty() {
                pages.push(PageOutcome {
                    page_number: page.page_number,
                    disposition: PageDisposition::SkippedEmpty,
                });
                continue;
            }

            info!(
                book_id,
                page_number = page.page_number,
                total_pages,
                "generating embedding for stored page"
            );

            let embedding = self.embed_or_null(&page.text, use_vision_provider).await;
            let had_embedding = embedding.is_some();

            let disposition = match self
                .store
                .update_embedding(&page.id, embedding.as_deref())
                .await
            {
                Ok(()) => {
                    updated += 1;
                    if had_embedding {
                        PageDisposition::Stored
                    } else {
                        PageDisposition::StoredWithoutEmbedding
                    }
                }
                Err(error) => {
                    warn!(
                        book_id,
                        page_number = page.page_number,
                        %error,
                        "failed to update page embedding"
                    );
                    PageDisposition::WriteFailed(error.to_string())
                }
            };
            pages.push(PageOutcome {
                page_number: page.page_number,
                disposition,
            });
        }

        info!(book_id, updated, "finished embedding backfill");

        Ok(IngestionReport {
            outcome: IngestionOutcome {
                success: true,
                message: "Embeddings generated and stored successfully".to_string(),
                page_count: updated,
            },
            pages,
        })
    }

    async fn embed_or_null(&self, text: &str, use_vision_provider: bool) -> Option<Vec<f32>> {
        let result = if use_vision_provider {
            self.vision_embedder.embed(text).await
        } else {
            self.text_embedder.embed(text).await
        };

        match result {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(%error, "embedding generation failed, storing null embedding");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IngestPipeline;
    use crate::embeddings::Embedder;
    use crate::error::{IngestError, StoreError};
    use crate::extractor::{Extractor, OcrEngine, PageSource, VisionOcr};
    use crate::models::{
        LibraryEntry, PageDisposition, PageRecord, SectionSummary, StoredPage,
    };
    use crate::traits::PageStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeSource {
        layers: Vec<String>,
    }

    #[async_trait]
    impl PageSource for FakeSource {
        fn page_count(&self) -> usize {
            self.layers.len()
        }

        fn text_layer(&self, page_index: usize) -> Result<String, IngestError> {
            Ok(self.layers[page_index].clone())
        }

        async fn rasterize(&self, _page_index: usize, _dpi: u32) -> Result<Vec<u8>, IngestError> {
            Ok(b"png".to_vec())
        }
    }

    #[derive(Default)]
    struct FakeOcr {
        calls: AtomicUsize,
        text: String,
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(&self, _image_png: &[u8]) -> Result<String, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.clone())
        }
    }

    #[derive(Default)]
    struct FakeVision {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionOcr for FakeVision {
        async fn read_page(&self, _image_png: &[u8]) -> Result<String, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("vision text".to_string())
        }
    }

    #[derive(Default)]
    struct FakeEmbedder {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
            self.calls.lock().expect("lock").push(text.to_string());
            if self.fail {
                return Err(IngestError::Embedding("provider down".to_string()));
            }
            Ok(vec![0.5, 0.5])
        }
    }

    #[derive(Default)]
    struct FakeStore {
        inserted: Mutex<Vec<PageRecord>>,
        updates: Mutex<Vec<(String, Option<Vec<f32>>)>>,
        stored_pages: Vec<StoredPage>,
        fail_insert_page_number: Option<u32>,
    }

    #[async_trait]
    impl PageStore for FakeStore {
        async fn insert_page(&self, record: &PageRecord) -> Result<(), StoreError> {
            if self.fail_insert_page_number == Some(record.page_number) {
                return Err(StoreError::Request("insert rejected".to_string()));
            }
            self.inserted.lock().expect("lock").push(record.clone());
            Ok(())
        }

        async fn update_embedding(
            &self,
            page_id: &str,
            embedding: Option<&[f32]>,
        ) -> Result<(), StoreError> {
            self.updates
                .lock()
                .expect("lock")
                .push((page_id.to_string(), embedding.map(<[f32]>::to_vec)));
            Ok(())
        }

        async fn pages_for_book(&self, _book_id: &str) -> Result<Vec<StoredPage>, StoreError> {
            Ok(self.stored_pages.clone())
        }

        async fn library_entry(&self, _book_id: &str) -> Result<Option<LibraryEntry>, StoreError> {
            Ok(None)
        }

        async fn insert_section_summary(&self, _summary: &SectionSummary) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn rich(text: &str) -> String {
        format!(
            "{text} {}",
            "filler words that comfortably carry this page past the fifty character threshold."
        )
    }

    fn pipeline(
        store: FakeStore,
        ocr_text: &str,
    ) -> IngestPipeline<FakeStore, FakeOcr, FakeVision, FakeEmbedder, FakeEmbedder> {
        IngestPipeline::new(
            store,
            Extractor::new(
                FakeOcr {
                    calls: AtomicUsize::new(0),
                    text: ocr_text.to_string(),
                },
                FakeVision::default(),
            ),
            FakeEmbedder::default(),
            FakeEmbedder::default(),
        )
    }

    #[tokio::test]
    async fn rich_pages_are_stored_from_the_text_layer_alone() {
        let source = FakeSource {
            layers: vec![rich("one"), rich("two"), rich("three")],
        };
        let pipeline = pipeline(FakeStore::default(), "ocr text");

        let report = pipeline.ingest_pages(&source, "book-1", 5, false).await;

        assert!(report.outcome.success);
        assert_eq!(report.outcome.page_count, 3);

        let inserted = pipeline.store.inserted.lock().expect("lock");
        assert_eq!(inserted.len(), 3);
        assert_eq!(inserted[0].page_number, 1);
        assert_eq!(inserted[2].page_number, 3);
        assert!(inserted.iter().all(|record| record.embedding.is_some()));

        // no page fell through to ocr
        assert_eq!(pipeline.extractor.ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn garbled_pages_fall_back_to_ocr() {
        let source = FakeSource {
            layers: vec![rich("one"), "garbled".to_string()],
        };
        let pipeline = pipeline(FakeStore::default(), "recovered by ocr");

        let report = pipeline.ingest_pages(&source, "book-1", 5, false).await;

        assert_eq!(report.outcome.page_count, 2);
        assert_eq!(pipeline.extractor.ocr.calls.load(Ordering::SeqCst), 1);

        let inserted = pipeline.store.inserted.lock().expect("lock");
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[1].text, "recovered by ocr");
    }

    #[tokio::test]
    async fn empty_pages_write_nothing_and_embed_nothing() {
        let source = FakeSource {
            layers: vec![rich("one"), String::new(), rich("three")],
        };
        let pipeline = pipeline(FakeStore::default(), "");

        let report = pipeline.ingest_pages(&source, "book-1", 5, false).await;

        assert_eq!(report.outcome.page_count, 3);
        assert_eq!(report.pages[1].disposition, PageDisposition::SkippedEmpty);

        let inserted = pipeline.store.inserted.lock().expect("lock");
        assert_eq!(inserted.len(), 2);
        let embed_calls = pipeline.text_embedder.calls.lock().expect("lock");
        assert_eq!(embed_calls.len(), 2);
    }

    #[tokio::test]
    async fn page_cap_bounds_the_loop() {
        let source = FakeSource {
            layers: vec![rich("one"), rich("two"), rich("three"), rich("four")],
        };
        let pipeline = pipeline(FakeStore::default(), "");

        let report = pipeline.ingest_pages(&source, "book-1", 2, false).await;

        assert_eq!(report.outcome.page_count, 2);
        let inserted = pipeline.store.inserted.lock().expect("lock");
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[0].page_number, 1);
        assert_eq!(inserted[1].page_number, 2);
    }

    #[tokio::test]
    async fn a_failed_write_does_not_stop_later_pages() {
        let source = FakeSource {
            layers: vec![rich("one"), rich("two"), rich("three")],
        };
        let store = FakeStore {
            fail_insert_page_number: Some(2),
            ..FakeStore::default()
        };
        let pipeline = pipeline(store, "");

        let report = pipeline.ingest_pages(&source, "book-1", 5, false).await;

        assert!(report.outcome.success);
        assert!(matches!(
            report.pages[1].disposition,
            PageDisposition::WriteFailed(_)
        ));

        let inserted = pipeline.store.inserted.lock().expect("lock");
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[1].page_number, 3);
    }

    #[tokio::test]
    async fn embedding_failure_stores_the_page_with_null_embedding() {
        let source = FakeSource {
            layers: vec![rich("one")],
        };
        let mut pipeline = pipeline(FakeStore::default(), "");
        pipeline.text_embedder.fail = true;

        let report = pipeline.ingest_pages(&source, "book-1", 5, false).await;

        assert_eq!(
            report.pages[0].disposition,
            PageDisposition::StoredWithoutEmbedding
        );
        let inserted = pipeline.store.inserted.lock().expect("lock");
        assert_eq!(inserted.len(), 1);
        assert!(inserted[0].embedding.is_none());
    }

    #[tokio::test]
    async fn vision_flag_routes_to_the_vision_provider() {
        let source = FakeSource {
            layers: vec![rich("never read")],
        };
        let pipeline = pipeline(FakeStore::default(), "");

        let report = pipeline.ingest_pages(&source, "book-1", 5, true).await;

        assert_eq!(report.outcome.page_count, 1);
        assert_eq!(pipeline.extractor.vision.calls.load(Ordering::SeqCst), 1);

        let vision_calls = pipeline.vision_embedder.calls.lock().expect("lock");
        assert_eq!(vision_calls.len(), 1);
        let text_calls = pipeline.text_embedder.calls.lock().expect("lock");
        assert!(text_calls.is_empty());
    }

    #[tokio::test]
    async fn backfill_with_no_pages_is_a_quiet_failure_shape() {
        let pipeline = pipeline(FakeStore::default(), "");

        let report = pipeline
            .backfill_embeddings("book-1", false)
            .await
            .expect("backfill should not error");

        assert!(!report.outcome.success);
        assert_eq!(report.outcome.page_count, 0);
        let embed_calls = pipeline.text_embedder.calls.lock().expect("lock");
        assert!(embed_calls.is_empty());
    }

    #[tokio::test]
    async fn backfill_updates_only_pages_with_text() {
        let store = FakeStore {
            stored_pages: vec![
                StoredPage {
                    id: "1".to_string(),
                    page_number: 1,
                    text: "first page".to_string(),
                },
                StoredPage {
                    id: "2".to_string(),
                    page_number: 2,
                    text: "  ".to_string(),
                },
                StoredPage {
                    id: "3".to_string(),
                    page_number: 3,
                    text: "third page".to_string(),
                },
                StoredPage {
                    id: "4".to_string(),
                    page_number: 4,
                    text: "fourth page".to_string(),
                },
            ],
            ..FakeStore::default()
        };
        let pipeline = pipeline(store, "");

        let report = pipeline
            .backfill_embeddings("book-1", false)
            .await
            .expect("backfill should succeed");

        assert!(report.outcome.success);
        assert_eq!(report.outcome.page_count, 3);

        let embed_calls = pipeline.text_embedder.calls.lock().expect("lock");
        assert_eq!(embed_calls.len(), 3);

        let updates = pipeline.store.updates.lock().expect("lock");
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].0, "1");
        assert_eq!(updates[1].0, "3");
        assert_eq!(updates[2].0, "4");
        assert!(updates.iter().all(|(_, embedding)| embedding.is_some()));

        // nothing inserted: the backfill only patches existing rows
        let inserted = pipeline.store.inserted.lock().expect("lock");
        assert!(inserted.is_empty());
    }

    #[tokio::test]
    async fn backfill_routes_to_the_vision_provider_on_request() {
        let store = FakeStore {
            stored_pages: vec![StoredPage {
                id: "1".to_string(),
                page_number: 1,
                text: "text".to_string(),
            }],
            ..FakeStore::default()
        };
        let pipeline = pipeline(store, "");

        pipeline
            .backfill_embeddings("book-1", true)
            .await
            .expect("backfill should succeed");

        let vision_calls = pipeline.vision_embedder.calls.lock().expect("lock");
        assert_eq!(vision_calls.len(), 1);
    }
}
