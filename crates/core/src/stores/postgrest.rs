use crate::error::StoreError;
use crate::models::{LibraryEntry, PageRecord, SectionSummary, StoredPage};
use crate::traits::PageStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// PostgREST-compatible datastore client (Supabase-style). Every request
/// carries the anonymous `apikey` plus a bearer credential that scopes the
/// connection to either the service role or the calling user.
pub struct PostgrestStore {
    client: Client,
    endpoint: String,
    api_key: String,
    bearer: String,
}

impl PostgrestStore {
    pub fn service_role(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        service_role_key: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            bearer: service_role_key.into(),
        }
    }

    pub fn bearer(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            bearer: token.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.endpoint, table)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.bearer)
    }
}

#[async_trait]
impl PageStore for PostgrestStore {
    async fn insert_page(&self, record: &PageRecord) -> Result<(), StoreError> {
        let response = self
            .request(self.client.post(self.table_url("book_pages")))
            .header("Prefer", "return=minimal")
            .json(&json!({
                "book_id": record.book_id,
                "page_number": record.page_number,
                "text": record.text,
                "embedding": record.embedding,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn update_embedding(
        &self,
        page_id: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let response = self
            .request(self.client.patch(self.table_url("book_pages")))
            .query(&[("id", format!("eq.{page_id}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "embedding": embedding }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn pages_for_book(&self, book_id: &str) -> Result<Vec<StoredPage>, StoreError> {
        let response = self
            .request(self.client.get(self.table_url("book_pages")))
            .query(&[
                ("book_id", format!("eq.{book_id}")),
                ("select", "id,page_number,text".to_string()),
                ("order", "page_number.asc".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let rows = parsed.as_array().cloned().unwrap_or_default();

        let mut pages = Vec::with_capacity(rows.len());
        for row in rows {
            pages.push(StoredPage {
                id: row.pointer("/id").map(value_to_id).unwrap_or_default(),
                page_number: row
                    .pointer("/page_number")
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as u32,
                text: row
                    .pointer("/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Ok(pages)
    }

    async fn library_entry(&self, book_id: &str) -> Result<Option<LibraryEntry>, StoreError> {
        let response = self
            .request(self.client.get(self.table_url("library")))
            .query(&[
                ("id", format!("eq.{book_id}")),
                ("select", "id,title,author,toc".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let row = match parsed.as_array().and_then(|rows| rows.first()) {
            Some(row) => row.clone(),
            None => return Ok(None),
        };

        Ok(Some(LibraryEntry {
            id: row.pointer("/id").map(value_to_id).unwrap_or_default(),
            title: row
                .pointer("/title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            author: row
                .pointer("/author")
                .and_then(Value::as_str)
                .map(str::to_string),
            toc: row.pointer("/toc").filter(|toc| !toc.is_null()).cloned(),
        }))
    }

    async fn insert_section_summary(&self, summary: &SectionSummary) -> Result<(), StoreError> {
        let response = self
            .request(self.client.post(self.table_url("section_summaries")))
            .header("Prefer", "return=minimal")
            .json(&json!({
                "book_id": summary.book_id,
                "section_index": summary.section_index,
                "section_title": summary.section_title,
                "summary": summary.summary,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "postgrest".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

// PostgREST serializes bigint keys as numbers and uuid keys as strings;
// filters accept either form as text.
fn value_to_id(value: &Value) -> String {
    match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        _ => String::new(),
    }
}
