use crate::config::Config;
use crate::embeddings::{Embedder, GeminiEmbedder, OpenAiEmbedder};
use crate::error::IngestError;
use crate::extractor::{Extractor, GeminiVisionOcr, OcrEngine, TesseractOcr, VisionOcr};
use crate::models::{
    CallbackPayload, FileType, IngestJob, IngestionReport, JobStatus, StoreAuth,
};
use crate::orchestrator::IngestPipeline;
use crate::stores::PostgrestStore;
use crate::summary::{ChatModel, OpenAiChat, SummaryGenerator};
use crate::traits::PageStore;
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

const QUEUE_DEPTH: usize = 64;

/// Posts the terminal callback. Delivery failure is logged and dropped;
/// there is nobody left to escalate to.
pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub async fn notify(&self, callback_url: &str, payload: &CallbackPayload) {
        match self.client.post(callback_url).json(payload).send().await {
            Ok(response) => {
                info!(callback_url, status = %response.status(), "webhook delivered");
            }
            Err(failure) => {
                error!(callback_url, error = %failure, "webhook delivery failed");
            }
        }
    }
}

/// Process-wide collaborators shared by every job. The store itself is not
/// here: it is rebuilt per job from the caller's credentials.
pub struct JobContext {
    config: Config,
    notifier: Notifier,
}

impl JobContext {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let notifier = Notifier::new(Duration::from_secs(config.webhook_timeout_secs))?;
        Ok(Self { config, notifier })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store_for(&self, auth: &StoreAuth) -> PostgrestStore {
        match auth {
            StoreAuth::ServiceRole => PostgrestStore::service_role(
                &self.config.store_url,
                &self.config.store_anon_key,
                &self.config.store_service_role_key,
            ),
            StoreAuth::Bearer(token) => PostgrestStore::bearer(
                &self.config.store_url,
                &self.config.store_anon_key,
                token,
            ),
        }
    }

    pub fn pipeline(
        &self,
        store: PostgrestStore,
    ) -> IngestPipeline<PostgrestStore, TesseractOcr, GeminiVisionOcr, OpenAiEmbedder, GeminiEmbedder>
    {
        let extractor = Extractor::new(
            TesseractOcr,
            GeminiVisionOcr::new(
                &self.config.gemini_api_base,
                &self.config.gemini_api_key,
                &self.config.gemini_vision_model,
            ),
        );

        IngestPipeline::new(
            store,
            extractor,
            OpenAiEmbedder::new(
                &self.config.openai_api_base,
                &self.config.openai_api_key,
                &self.config.openai_embedding_model,
            ),
            GeminiEmbedder::new(
                &self.config.gemini_api_base,
                &self.config.gemini_api_key,
                &self.config.gemini_embedding_model,
            ),
        )
    }

    pub fn summarizer(&self) -> SummaryGenerator<OpenAiChat> {
        SummaryGenerator::new(OpenAiChat::new(
            &self.config.openai_api_base,
            &self.config.openai_api_key,
            &self.config.openai_chat_model,
        ))
    }
}

/// Bounded background queue. Submitting returns as soon as the job is
/// enqueued; at most `worker_count` jobs run at once. There is no
/// cancellation and no per-job timeout, and two jobs for the same book may
/// interleave writes — callers are expected to avoid that.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<IngestJob>,
}

impl JobQueue {
    pub fn start(context: Arc<JobContext>, worker_count: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<IngestJob>(QUEUE_DEPTH);
        let limiter = Arc::new(Semaphore::new(worker_count.max(1)));

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let Ok(permit) = limiter.clone().acquire_owned().await else {
                    break;
                };
                let context = context.clone();
                tokio::spawn(async move {
                    run_job(context, job).await;
                    drop(permit);
                });
            }
        });

        Self { sender }
    }

    pub async fn submit(&self, job: IngestJob) -> Result<(), IngestError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| IngestError::Queue("queue receiver is gone".to_string()))
    }
}

async fn run_job(context: Arc<JobContext>, job: IngestJob) {
    info!(
        job_id = %job.id,
        book_id = %job.book_id,
        file_type = %job.file_type,
        use_vision_model = job.use_vision_model,
        "job started"
    );

    let store = context.store_for(&job.auth);
    let pipeline = context.pipeline(store);
    let summarizer = context.summarizer();

    let payload = execute_job(&pipeline, &summarizer, &job).await;

    let elapsed = Utc::now() - job.submitted_at;
    info!(
        job_id = %job.id,
        book_id = %job.book_id,
        status = ?payload.status,
        elapsed_ms = elapsed.num_milliseconds(),
        "job finished"
    );

    if let Some(callback_url) = &job.callback_url {
        context.notifier.notify(callback_url, &payload).await;
    }
}

/// Runs ingestion and the unconditional summary step, translating any
/// failure along the way into a terminal error payload. This is the only
/// place that turns job failures into notifications.
pub async fn execute_job<St, Oc, Vi, Em, Ge, C>(
    pipeline: &IngestPipeline<St, Oc, Vi, Em, Ge>,
    summarizer: &SummaryGenerator<C>,
    job: &IngestJob,
) -> CallbackPayload
where
    St: PageStore,
    Oc: OcrEngine,
    Vi: VisionOcr,
    Em: Embedder,
    Ge: Embedder,
    C: ChatModel,
{
    match run_stages(pipeline, summarizer, job).await {
        Ok((report, message)) => CallbackPayload {
            book_id: job.book_id.clone(),
            status: JobStatus::Completed,
            message,
            result: Some(report.outcome),
        },
        Err(failure) => {
            error!(book_id = %job.book_id, error = %failure, "background job failed");
            CallbackPayload {
                book_id: job.book_id.clone(),
                status: JobStatus::Error,
                message: failure.to_string(),
                result: None,
            }
        }
    }
}

async fn run_stages<St, Oc, Vi, Em, Ge, C>(
    pipeline: &IngestPipeline<St, Oc, Vi, Em, Ge>,
    summarizer: &SummaryGenerator<C>,
    job: &IngestJob,
) -> Result<(IngestionReport, String), IngestError>
where
    St: PageStore,
    Oc: OcrEngine,
    Vi: VisionOcr,
    Em: Embedder,
    Ge: Embedder,
    C: ChatModel,
{
    let (report, mut message) = match job.file_type {
        FileType::Epub => {
            let report = pipeline
                .backfill_embeddings(&job.book_id, job.use_vision_model)
                .await?;
            info!(book_id = %job.book_id, "ebook embedding generation completed");
            let message = format!(
                "Ebook embedding generation completed successfully for file type: {}.",
                job.file_type
            );
            (report, message)
        }
        FileType::Pdf => {
            let source_url = job.source_url.as_deref().ok_or_else(|| {
                IngestError::InvalidArgument("pdf ingestion requires a source url".to_string())
            })?;
            let report = pipeline
                .ingest_pdf(
                    source_url,
                    &job.book_id,
                    job.page_count,
                    job.use_vision_model,
                )
                .await?;
            info!(book_id = %job.book_id, "ebook processing completed");
            let message = format!(
                "Ebook processing completed successfully for file type: {}.",
                job.file_type
            );
            (report, message)
        }
    };

    let summary = summarizer.generate(pipeline.store(), &job.book_id).await?;
    message.push(' ');
    message.push_str(&summary.message);

    Ok((report, message))
}
