use crate::error::IngestError;
use crate::models::{LibraryEntry, SectionSummary, SummaryOutcome};
use crate::traits::PageStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, IngestError>;
}

/// Chat-completion backend used for section summaries.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
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
impl ChatModel for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String, IngestError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": "You summarize book sections for readers. Stay concise and faithful to the section's scope.",
                    },
                    { "role": "user", "content": prompt },
                ],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Provider(format!(
                "chat completion returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let answer = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if answer.is_empty() {
            return Err(IngestError::Provider(
                "chat response carried no content".to_string(),
            ));
        }

        Ok(answer)
    }
}

/// Pulls section titles out of a library `toc` value. Accepts an array of
/// strings or an array of objects with a `title` key; anything else reads
/// as "no table of contents".
pub fn toc_sections(toc: &Value) -> Vec<String> {
    toc.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(title) => Some(title.trim().to_string()),
                    Value::Object(_) => item
                        .pointer("/title")
                        .and_then(Value::as_str)
                        .map(|title| title.trim().to_string()),
                    _ => None,
                })
                .filter(|title| !title.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub struct SummaryGenerator<C> {
    chat: C,
}

impl<C: ChatModel> SummaryGenerator<C> {
    pub fn new(chat: C) -> Self {
        Self { chat }
    }

    /// Generates one summary per TOC section and stores each as its own
    /// row. A missing library entry or an absent TOC is a normal
    /// zero-section outcome; store and provider failures propagate.
    pub async fn generate<S: PageStore>(
        &self,
        store: &S,
        book_id: &str,
    ) -> Result<SummaryOutcome, IngestError> {
        let entry = match store.library_entry(book_id).await? {
            Some(entry) => entry,
            None => {
                warn!(book_id, "book not found in library, skipping summaries");
                return Ok(SummaryOutcome {
                    book_found: false,
                    sections: 0,
                    message: "Book not found in library.".to_string(),
                });
            }
        };

        let sections = entry.toc.as_ref().map(toc_sections).unwrap_or_default();
        if sections.is_empty() {
            info!(book_id, "no table of contents, skipping summaries");
            return Ok(SummaryOutcome {
                book_found: true,
                sections: 0,
                message: "No table of contents available.".to_string(),
            });
        }

        for (index, title) in sections.iter().enumerate() {
            info!(book_id, section = %title, "generating section summary");
            let summary = self.chat.complete(&section_prompt(&entry, title)).await?;

            store
                .insert_section_summary(&SectionSummary {
                    book_id: book_id.to_string(),
                    section_index: index as u32 + 1,
                    section_title: title.clone(),
                    summary,
                })
                .await?;
        }

        Ok(SummaryOutcome {
            book_found: true,
            sections: sections.len(),
            message: "Summary generation completed.".to_string(),
        })
    }
}

fn section_prompt(entry: &LibraryEntry, section_title: &str) -> String {
    let author = entry.author.as_deref().unwrap_or("an unknown author");
    format!(
        "Summarize the section \"{section_title}\" of the book \"{}\" by {author}. \
         Focus on the ideas a reader should retain from that section.",
        entry.title
    )
}

#[cfg(test)]
mod tests {
    use super::{toc_sections, ChatModel, SummaryGenerator};
    use crate::error::{IngestError, StoreError};
    use crate::models::{LibraryEntry, PageRecord, SectionSummary, StoredPage};
    use crate::traits::PageStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeChat {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn complete(&self, prompt: &str) -> Result<String, IngestError> {
            self.prompts.lock().expect("lock").push(prompt.to_string());
            Ok(format!("summary of: {prompt}"))
        }
    }

    struct FakeStore {
        entry: Option<LibraryEntry>,
        summaries: Mutex<Vec<SectionSummary>>,
    }

    #[async_trait]
    impl PageStore for FakeStore {
        async fn insert_page(&self, _record: &PageRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn update_embedding(
            &self,
            _page_id: &str,
            _embedding: Option<&[f32]>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn pages_for_book(&self, _book_id: &str) -> Result<Vec<StoredPage>, StoreError> {
            Ok(Vec::new())
        }

        async fn library_entry(&self, _book_id: &str) -> Result<Option<LibraryEntry>, StoreError> {
            Ok(self.entry.clone())
        }

        async fn insert_section_summary(&self, summary: &SectionSummary) -> Result<(), StoreError> {
            self.summaries.lock().expect("lock").push(summary.clone());
            Ok(())
        }
    }

    fn entry(toc: Option<serde_json::Value>) -> LibraryEntry {
        LibraryEntry {
            id: "book-1".to_string(),
            title: "A Book".to_string(),
            author: Some("Someone".to_string()),
            toc,
        }
    }

    #[test]
    fn toc_accepts_strings_and_titled_objects() {
        let sections = toc_sections(&json!([
            "Intro",
            { "title": "Middle" },
            { "name": "ignored" },
            42,
            "  ",
        ]));
        assert_eq!(sections, vec!["Intro".to_string(), "Middle".to_string()]);

        assert!(toc_sections(&json!({"not": "an array"})).is_empty());
    }

    #[tokio::test]
    async fn missing_book_is_a_quiet_zero_section_outcome() {
        let store = FakeStore {
            entry: None,
            summaries: Mutex::new(Vec::new()),
        };
        let generator = SummaryGenerator::new(FakeChat {
            prompts: Mutex::new(Vec::new()),
        });

        let outcome = generator
            .generate(&store, "book-1")
            .await
            .expect("generation should not error");

        assert!(!outcome.book_found);
        assert_eq!(outcome.sections, 0);
        assert!(generator.chat.prompts.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn missing_toc_skips_generation_without_error() {
        let store = FakeStore {
            entry: Some(entry(None)),
            summaries: Mutex::new(Vec::new()),
        };
        let generator = SummaryGenerator::new(FakeChat {
            prompts: Mutex::new(Vec::new()),
        });

        let outcome = generator
            .generate(&store, "book-1")
            .await
            .expect("generation should not error");

        assert!(outcome.book_found);
        assert_eq!(outcome.sections, 0);
        assert!(generator.chat.prompts.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn one_summary_row_per_toc_section() {
        let store = FakeStore {
            entry: Some(entry(Some(json!(["Intro", "Conclusion"])))),
            summaries: Mutex::new(Vec::new()),
        };
        let generator = SummaryGenerator::new(FakeChat {
            prompts: Mutex::new(Vec::new()),
        });

        let outcome = generator
            .generate(&store, "book-1")
            .await
            .expect("generation should succeed");

        assert_eq!(outcome.sections, 2);
        assert_eq!(outcome.message, "Summary generation completed.");

        let summaries = store.summaries.lock().expect("lock");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].section_index, 1);
        assert_eq!(summaries[0].section_title, "Intro");
        assert_eq!(summaries[1].section_index, 2);

        let prompts = generator.chat.prompts.lock().expect("lock");
        assert!(prompts[0].contains("A Book"));
        assert!(prompts[0].contains("Intro"));
    }
}
