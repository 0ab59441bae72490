//! Kintone file API.
//!
//! Handles the file transfer side of the client:
//! - Uploading local files as multipart requests
//! - Downloading by key, either buffered or as a `FileStream`
//! - Batch variants with bounded parallelism

use std::path::Path;

use futures_util::future::try_join_all;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::cybozu::client::CybozuClient;
use crate::cybozu::{redact_id, GuestSpaceId};
use crate::error::AppError;
use crate::streaming::FileStream;

/// Opaque key issued by the server for uploaded content.
///
/// A key returned by `upload` is meant to be consumed once, by attaching it
/// to a resource. Keys read back from a resource are used for downloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileKey(String);

impl FileKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FileKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for FileKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUploadResponse {
    file_key: FileKey,
}

/// File operations bound to one client.
#[derive(Clone)]
pub struct FileClient {
    client: CybozuClient,
}

impl FileClient {
    pub fn new(client: CybozuClient) -> Self {
        Self { client }
    }

    /// Uploads a local file and returns its key.
    ///
    /// `display_name` overrides the file name the server stores; it defaults
    /// to the last component of `path`.
    ///
    /// # Errors
    ///
    /// - `AppError::LocalFile` if the file cannot be read (no request is sent)
    /// - `AppError::Transfer` if the request fails
    pub async fn upload(
        &self,
        path: &Path,
        guest: Option<GuestSpaceId>,
        display_name: Option<&str>,
    ) -> Result<FileKey, AppError> {
        let url = self.client.kintone_url("file", guest)?;
        upload_to(&self.client, url, path, display_name).await
    }

    /// Downloads the full content for `key`.
    pub async fn download(
        &self,
        key: &FileKey,
        guest: Option<GuestSpaceId>,
    ) -> Result<Vec<u8>, AppError> {
        let response = self.initiate_download(key, guest).await?;
        let content = response
            .bytes()
            .await
            .map_err(|e| AppError::StreamRead(e.without_url().to_string()))?;

        info!(
            "[FILE] downloaded {} ({} bytes)",
            redact_id(key.as_str()),
            content.len()
        );
        Ok(content.to_vec())
    }

    /// Starts a download and hands back the unread body.
    ///
    /// Request failures are reported here, before any stream exists.
    pub async fn download_stream(
        &self,
        key: &FileKey,
        guest: Option<GuestSpaceId>,
    ) -> Result<FileStream, AppError> {
        let response = self.initiate_download(key, guest).await?;
        Ok(FileStream::from_response(response))
    }

    /// Streams the content for `key` into `destination`.
    ///
    /// The destination only appears once the whole body has been written.
    pub async fn download_to_file(
        &self,
        key: &FileKey,
        guest: Option<GuestSpaceId>,
        destination: &Path,
    ) -> Result<u64, AppError> {
        self.download_stream(key, guest)
            .await?
            .save_to(destination)
            .await
    }

    /// Uploads every path, returning keys in input order.
    ///
    /// The first failure aborts the batch and is returned.
    pub async fn multi_upload<P>(
        &self,
        paths: &[P],
        guest: Option<GuestSpaceId>,
    ) -> Result<Vec<FileKey>, AppError>
    where
        P: AsRef<Path>,
    {
        info!(
            "[FILE] batch upload of {} files (max {} in flight)",
            paths.len(),
            self.client.scheduler().max_concurrent()
        );

        let uploads = paths.iter().map(|path| async move {
            let _permit = self.client.scheduler().acquire().await?;
            self.upload(path.as_ref(), guest, None).await
        });

        try_join_all(uploads).await
    }

    /// Downloads every key, returning contents in input order.
    ///
    /// The first failure aborts the batch and is returned.
    pub async fn multi_download(
        &self,
        keys: &[FileKey],
        guest: Option<GuestSpaceId>,
    ) -> Result<Vec<Vec<u8>>, AppError> {
        info!(
            "[FILE] batch download of {} files (max {} in flight)",
            keys.len(),
            self.client.scheduler().max_concurrent()
        );

        let downloads = keys.iter().map(|key| async move {
            let _permit = self.client.scheduler().acquire().await?;
            self.download(key, guest).await
        });

        try_join_all(downloads).await
    }

    /// Shared first step of every download flavor.
    async fn initiate_download(
        &self,
        key: &FileKey,
        guest: Option<GuestSpaceId>,
    ) -> Result<reqwest::Response, AppError> {
        let url = self.client.kintone_url("file", guest)?;
        let builder = self
            .client
            .request(Method::GET, url)
            .query(&[("fileKey", key.as_str())]);
        self.client.send(builder).await
    }
}

/// Uploads `path` as the `file` part of a multipart POST to `url`.
///
/// Shared by the Kintone file API and the User API file endpoint used for
/// CSV imports.
pub(crate) async fn upload_to(
    client: &CybozuClient,
    url: Url,
    path: &Path,
    display_name: Option<&str>,
) -> Result<FileKey, AppError> {
    let content = tokio::fs::read(path).await.map_err(|e| AppError::LocalFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let file_name = display_name
        .map(str::to_string)
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "file".to_string());
    let size = content.len();

    let form = Form::new().part("file", Part::bytes(content).file_name(file_name));
    let response = client
        .send(client.request(Method::POST, url).multipart(form))
        .await?;

    let wire: WireUploadResponse = response.json().await.map_err(|e| {
        AppError::transfer(format!("Failed to parse upload response: {}", e.without_url()))
    })?;

    info!(
        "[FILE] uploaded {} bytes as {}",
        size,
        redact_id(wire.file_key.as_str())
    );
    Ok(wire.file_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ClientConfig;
    use crate::cybozu::client::Credentials;
    use crate::cybozu::fake_server::FakeKintone;
    use crate::cybozu::transport::{Transport, TransportFailure, TransportFuture};
    use reqwest::StatusCode;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base: &str) -> CybozuClient {
        let config = ClientConfig::new(
            Url::parse(base).unwrap(),
            Credentials::password("user", "pass"),
        );
        CybozuClient::new(config).unwrap()
    }

    struct FailingTransport(TransportFailure);

    impl Transport for FailingTransport {
        fn execute(&self, _request: reqwest::Request) -> TransportFuture<'_> {
            let failure = self.0.clone();
            Box::pin(async move { Err(failure) })
        }
    }

    fn failing_client(failure: TransportFailure) -> CybozuClient {
        let config = ClientConfig::new(
            Url::parse("https://example.cybozu.com").unwrap(),
            Credentials::password("user", "pass"),
        );
        CybozuClient::with_transport(config, Arc::new(FailingTransport(failure))).unwrap()
    }

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Upload
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upload_sends_multipart_file_part() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/k/v1/file.json"))
            .and(body_string_contains("name=\"file\""))
            .and(body_string_contains("filename=\"sample.js\""))
            .and(body_string_contains("console.log(1);"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "fileKey": "c15b3870-7505-4ab6" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "sample.js", b"console.log(1);");
        let files = test_client(&mock_server.uri()).files();

        let key = files.upload(&local, None, None).await.unwrap();

        assert_eq!(key.as_str(), "c15b3870-7505-4ab6");
    }

    #[tokio::test]
    async fn upload_in_guest_space_uses_display_name() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/k/guest/5/v1/file.json"))
            .and(body_string_contains("filename=\"renamed.js\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "fileKey": "k1" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "sample.js", b"x");
        let files = test_client(&mock_server.uri()).files();

        let key = files
            .upload(&local, Some(GuestSpaceId(5)), Some("renamed.js"))
            .await
            .unwrap();

        assert_eq!(key, FileKey::new("k1"));
    }

    #[tokio::test]
    async fn upload_missing_file_sends_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let files = test_client(&mock_server.uri()).files();

        let result = files.upload(&dir.path().join("nope.js"), None, None).await;

        assert!(matches!(result, Err(AppError::LocalFile { .. })));
    }

    #[tokio::test]
    async fn upload_error_uses_message_from_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/k/v1/file.json"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "CB_VA01",
                "id": "req-1",
                "message": "simple error"
            })))
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "sample.js", b"x");
        let files = test_client(&mock_server.uri()).files();

        let err = files.upload(&local, None, None).await.unwrap_err();

        assert_eq!(err.to_string(), "simple error");
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.error_code(), Some("CB_VA01"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Download
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn download_passes_file_key_as_query() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/k/v1/file.json"))
            .and(query_param("fileKey", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let files = test_client(&mock_server.uri()).files();

        let content = files.download(&FileKey::new("abc"), None).await.unwrap();

        assert_eq!(content, b"payload");
    }

    #[tokio::test]
    async fn download_error_without_response_uses_transport_text() {
        let files = failing_client(TransportFailure::new("foobar")).files();

        let buffered = files.download(&FileKey::new("k"), None).await.unwrap_err();
        let streamed = files
            .download_stream(&FileKey::new("k"), None)
            .await
            .unwrap_err();

        assert_eq!(buffered.to_string(), "foobar");
        assert_eq!(streamed.to_string(), "foobar");
    }

    #[tokio::test]
    async fn download_error_with_json_body_uses_its_message() {
        let body = br#"{"message":"simple error"}"#.to_vec();
        let failure =
            TransportFailure::with_response("HTTP 400 Bad Request", StatusCode::BAD_REQUEST, body);
        let files = failing_client(failure).files();

        let buffered = files.download(&FileKey::new("k"), None).await.unwrap_err();
        let streamed = files
            .download_stream(&FileKey::new("k"), None)
            .await
            .unwrap_err();

        assert_eq!(buffered.to_string(), "simple error");
        assert_eq!(streamed.to_string(), "simple error");
    }

    #[tokio::test]
    async fn download_stream_first_read_returns_whole_small_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/k/v1/file.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"alert('x');".to_vec()))
            .mount(&mock_server)
            .await;

        let files = test_client(&mock_server.uri()).files();

        let mut stream = files
            .download_stream(&FileKey::new("k"), None)
            .await
            .unwrap();
        let first = stream.read(1024).await.unwrap();
        let rest = stream.read(1024).await.unwrap();

        assert_eq!(first, b"alert('x');");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn download_to_file_writes_destination() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/k/v1/file.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out").join("blob.bin");
        let files = test_client(&mock_server.uri()).files();

        let written = files
            .download_to_file(&FileKey::new("k"), None, &destination)
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 4096]);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Round trips against the in-memory service
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let mock_server = MockServer::start().await;
        let fake = FakeKintone::new();
        fake.mount(&mock_server, None).await;

        let dir = TempDir::new().unwrap();
        let local = write_file(&dir, "sample.js", b"kintone.events.on('app.record.index.show');");
        let files = test_client(&mock_server.uri()).files();

        let key = files.upload(&local, None, None).await.unwrap();
        let buffered = files.download(&key, None).await.unwrap();
        let streamed = files
            .download_stream(&key, None)
            .await
            .unwrap()
            .read_to_end()
            .await
            .unwrap();

        let expected = std::fs::read(&local).unwrap();
        assert_eq!(buffered, expected);
        assert_eq!(streamed, expected);
    }

    #[tokio::test]
    async fn multi_transfer_preserves_order() {
        let mock_server = MockServer::start().await;
        let fake = FakeKintone::new();
        fake.mount(&mock_server, Some(3)).await;

        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..12)
            .map(|i| write_file(&dir, &format!("f{}.js", i), format!("file {}", i).as_bytes()))
            .collect();
        let client = test_client(&mock_server.uri());
        let files = client.files();

        let keys = files
            .multi_upload(&paths, Some(GuestSpaceId(3)))
            .await
            .unwrap();
        let contents = files
            .multi_download(&keys, Some(GuestSpaceId(3)))
            .await
            .unwrap();

        assert_eq!(keys.len(), 12);
        assert_eq!(fake.file_count(), 12);
        for (i, content) in contents.iter().enumerate() {
            assert_eq!(content, format!("file {}", i).as_bytes());
        }
        assert_eq!(client.scheduler().active_transfers(), 0);
    }

    #[tokio::test]
    async fn multi_upload_fails_fast_on_missing_file() {
        let mock_server = MockServer::start().await;
        let fake = FakeKintone::new();
        fake.mount(&mock_server, None).await;

        let dir = TempDir::new().unwrap();
        let paths = vec![
            write_file(&dir, "a.js", b"a"),
            dir.path().join("missing.js"),
            write_file(&dir, "c.js", b"c"),
        ];
        let files = test_client(&mock_server.uri()).files();

        let result = files.multi_upload(&paths, None).await;

        assert!(matches!(result, Err(AppError::LocalFile { .. })));
    }

    #[tokio::test]
    async fn multi_download_fails_on_unknown_key() {
        let mock_server = MockServer::start().await;
        let fake = FakeKintone::new();
        fake.mount(&mock_server, None).await;

        let dir = TempDir::new().unwrap();
        let files = test_client(&mock_server.uri()).files();
        let good = files
            .upload(&write_file(&dir, "a.js", b"a"), None, None)
            .await
            .unwrap();

        let err = files
            .multi_download(&[good, FileKey::new("does-not-exist")], None)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "The specified file was not found.");
        assert_eq!(err.error_code(), Some("GAIA_BL01"));
    }
}
