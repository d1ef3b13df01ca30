use crate::error::StoreError;
use crate::models::{LibraryEntry, PageRecord, SectionSummary, StoredPage};
use async_trait::async_trait;

/// Page persistence seam. Inserts and updates are independent per page; no
/// call here spans more than one row.
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn insert_page(&self, record: &PageRecord) -> Result<(), StoreError>;

    /// Patches only the embedding of an existing page, never its text.
    async fn update_embedding(
        &self,
        page_id: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError>;

    async fn pages_for_book(&self, book_id: &str) -> Result<Vec<StoredPage>, StoreError>;

    async fn library_entry(&self, book_id: &str) -> Result<Option<LibraryEntry>, StoreError>;

    async fn insert_section_summary(&self, summary: &SectionSummary) -> Result<(), StoreError>;
}
