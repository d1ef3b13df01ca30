mod api;

use api::{create_router, ServiceApi};
use async_trait::async_trait;
use book_ingest_core::{
    Config, IngestError, IngestJob, JobContext, JobQueue, StoreAuth, SummaryOutcome,
};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "book-ingest-server", version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Maximum number of ingestion jobs running at once.
    #[arg(long, env = "WORKER_COUNT", default_value = "4")]
    workers: usize,
}

struct AppService {
    queue: JobQueue,
    context: Arc<JobContext>,
}

#[async_trait]
impl ServiceApi for AppService {
    async fn submit(&self, job: IngestJob) -> Result<(), IngestError> {
        self.queue.submit(job).await
    }

    async fn generate_summaries(
        &self,
        book_id: &str,
        auth: StoreAuth,
    ) -> Result<SummaryOutcome, IngestError> {
        let store = self.context.store_for(&auth);
        self.context.summarizer().generate(&store, book_id).await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let context = Arc::new(JobContext::new(config)?);
    let queue = JobQueue::start(context.clone(), cli.workers);
    let service = Arc::new(AppService {
        queue,
        context: context.clone(),
    });

    let app = create_router(service);
    let address = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %address,
        workers = cli.workers,
        started_at = %Utc::now().to_rfc3339(),
        "book-ingest-server boot"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
