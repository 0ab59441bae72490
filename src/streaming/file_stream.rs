//! Incremental reader over a downloaded response body.

use std::path::Path;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::info;

use crate::error::AppError;
use crate::streaming::AtomicFileWriter;

/// Upper bound for buffer preallocation; `Content-Length` is only a hint.
const MAX_PREALLOCATION: usize = 64 * 1024;

/// A successfully initiated download whose body has not been read yet.
///
/// Obtaining a `FileStream` means the request itself succeeded; reads may
/// still fail with `AppError::StreamRead` if the connection drops.
pub struct FileStream {
    body: BoxStream<'static, Result<Bytes, AppError>>,
    /// Bytes received but not yet handed out.
    pending: Bytes,
    /// Chunk error held back so bytes read before it could be returned.
    deferred_error: Option<AppError>,
    content_length: Option<u64>,
    content_type: Option<String>,
}

impl FileStream {
    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| AppError::StreamRead(e.without_url().to_string())));

        Self {
            body: body.boxed(),
            pending: Bytes::new(),
            deferred_error: None,
            content_length,
            content_type,
        }
    }

    /// Wraps an arbitrary chunk stream.
    pub fn from_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, AppError>> + Send + 'static,
    {
        Self {
            body: chunks.boxed(),
            pending: Bytes::new(),
            deferred_error: None,
            content_length: None,
            content_type: None,
        }
    }

    /// `Content-Length` announced by the server, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// `Content-Type` announced by the server, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Reads at most `max` bytes.
    ///
    /// Keeps pulling chunks until `max` bytes are collected or the body ends,
    /// so a short result means the end of the stream was reached. An empty
    /// result means nothing is left.
    ///
    /// If the connection fails after some bytes were collected, those bytes
    /// are returned first and the error is reported by the next call.
    pub async fn read(&mut self, max: usize) -> Result<Vec<u8>, AppError> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }

        let mut out = Vec::with_capacity(max.min(MAX_PREALLOCATION));

        while out.len() < max {
            if self.pending.is_empty() {
                match self.body.next().await {
                    Some(Ok(chunk)) => {
                        self.pending = chunk;
                        continue;
                    }
                    Some(Err(err)) if out.is_empty() => return Err(err),
                    Some(Err(err)) => {
                        self.deferred_error = Some(err);
                        break;
                    }
                    None => break,
                }
            }

            let take = (max - out.len()).min(self.pending.len());
            out.extend_from_slice(&self.pending.split_to(take));
        }

        Ok(out)
    }

    /// Reads everything that is left.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, AppError> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }

        let hint = self
            .content_length
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0)
            .min(MAX_PREALLOCATION);
        let mut out = Vec::with_capacity(hint);
        out.extend_from_slice(&self.pending);

        while let Some(chunk) = self.body.next().await {
            out.extend_from_slice(&chunk?);
        }

        Ok(out)
    }

    /// Streams the remaining body into `path` atomically.
    ///
    /// Returns the number of bytes written. On any error the destination is
    /// left untouched.
    pub async fn save_to(mut self, path: &Path) -> Result<u64, AppError> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }
        let mut writer = AtomicFileWriter::new(path)?;

        if !self.pending.is_empty() {
            writer.write_chunk(&self.pending).await?;
        }
        while let Some(chunk) = self.body.next().await {
            writer.write_chunk(&chunk?).await?;
        }

        let total_bytes = writer.bytes_written();
        writer.finish().await?;

        info!("[FILE] saved {} bytes to disk", total_bytes);
        Ok(total_bytes)
    }

    /// Adapts the remaining body to `tokio::io::AsyncRead`.
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        let pending = (!self.pending.is_empty()).then_some(Ok(self.pending));
        let deferred = self.deferred_error.map(Err);
        let chunks = stream::iter(pending)
            .chain(stream::iter(deferred))
            .chain(self.body)
            .map(|chunk| chunk.map_err(|e| std::io::Error::other(e.to_string())));

        StreamReader::new(chunks)
    }
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("buffered", &self.pending.len())
            .finish_non_exhaustive()
    }
}
