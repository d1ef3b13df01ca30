use crate::error::IngestError;
use crate::models::FileType;
use reqwest::Client;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::info;
use url::Url;

/// Streams the source file into a suffixed temporary file. The returned
/// guard removes the file when dropped, on success and error paths alike.
pub async fn download_to_tempfile(
    client: &Client,
    source_url: &str,
    file_type: FileType,
) -> Result<NamedTempFile, IngestError> {
    let url = Url::parse(source_url).map_err(|error| {
        IngestError::InvalidArgument(format!("invalid source url {source_url}: {error}"))
    })?;

    info!(%url, file_type = %file_type, "downloading source file");

    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, "Mozilla/5.0")
        .header(
            reqwest::header::ACCEPT,
            format!("application/{}", file_type.extension()),
        )
        .send()
        .await
        .map_err(|error| IngestError::Download(error.to_string()))?;

    let mut response = response
        .error_for_status()
        .map_err(|error| IngestError::Download(error.to_string()))?;

    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{}", file_type.extension()))
        .tempfile()?;

    let mut bytes_written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|error| IngestError::Download(error.to_string()))?
    {
        file.write_all(&chunk)?;
        bytes_written += chunk.len() as u64;
    }
    file.flush()?;

    info!(
        bytes = bytes_written,
        path = %file.path().display(),
        "download complete"
    );

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::download_to_tempfile;
    use crate::error::IngestError;
    use crate::models::FileType;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn downloads_into_a_suffixed_tempfile() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/books/sample.pdf");
                then.status(200).body(b"%PDF-1.4 fake body");
            })
            .await;

        let client = reqwest::Client::new();
        let file = download_to_tempfile(
            &client,
            &format!("{}/books/sample.pdf", server.base_url()),
            FileType::Pdf,
        )
        .await
        .expect("download should succeed");

        assert!(file
            .path()
            .extension()
            .is_some_and(|extension| extension == "pdf"));
        let contents = std::fs::read(file.path()).expect("tempfile should be readable");
        assert_eq!(contents, b"%PDF-1.4 fake body");
    }

    #[tokio::test]
    async fn tempfile_is_removed_when_the_guard_drops() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).body(b"data");
            })
            .await;

        let client = reqwest::Client::new();
        let file = download_to_tempfile(
            &client,
            &format!("{}/f.pdf", server.base_url()),
            FileType::Pdf,
        )
        .await
        .expect("download should succeed");

        let path = file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn http_errors_abort_the_download() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(404);
            })
            .await;

        let client = reqwest::Client::new();
        let result = download_to_tempfile(
            &client,
            &format!("{}/missing.pdf", server.base_url()),
            FileType::Pdf,
        )
        .await;

        assert!(matches!(result, Err(IngestError::Download(_))));
    }

    #[tokio::test]
    async fn malformed_urls_are_rejected_before_any_request() {
        let client = reqwest::Client::new();
        let result = download_to_tempfile(&client, "not a url", FileType::Pdf).await;

        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }
}
