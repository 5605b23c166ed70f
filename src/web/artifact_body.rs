// Streams an artifact file as a response body and deletes it once the body is gone.

use crate::temp_files::Artifact;
use axum::body::{Body, Bytes};
use futures::Stream;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// File stream that owns the artifact it reads from.
///
/// Hyper drops the body after the last chunk is written or when the client
/// goes away, which drops the guard and deletes the file exactly once.
struct ArtifactStream {
    // Declared first so the handle is closed before the file is removed.
    inner: ReaderStream<File>,
    _artifact: Artifact,
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Opens the artifact and wraps it in a streaming `Body`.
///
/// If the file cannot be opened the artifact is dropped (and deleted) here.
pub async fn artifact_body(artifact: Artifact) -> io::Result<Body> {
    let file = File::open(artifact.path()).await?;
    let stream = ArtifactStream {
        inner: ReaderStream::new(file),
        _artifact: artifact,
    };
    Ok(Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_files::{TempFileManager, count_artifacts};
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_body_streams_file_then_deletes_it() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = TempFileManager::new(dir.path()).unwrap();
        let artifact = temp_files.allocate().unwrap();
        std::fs::write(artifact.path(), vec![7u8; 200_000]).unwrap();

        let body = artifact_body(artifact).await.unwrap();
        assert_eq!(count_artifacts(dir.path()), 1);

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes.len(), 200_000);
        assert!(bytes.iter().all(|&b| b == 7));
        assert_eq!(count_artifacts(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_unread_body_still_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = TempFileManager::new(dir.path()).unwrap();
        let artifact = temp_files.allocate().unwrap();
        std::fs::write(artifact.path(), b"partial").unwrap();

        let body = artifact_body(artifact).await.unwrap();
        drop(body);

        assert_eq!(count_artifacts(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = TempFileManager::new(dir.path()).unwrap();
        let artifact = temp_files.allocate().unwrap();
        std::fs::remove_file(artifact.path()).unwrap();

        assert!(artifact_body(artifact).await.is_err());
        assert_eq!(count_artifacts(dir.path()), 0);
    }
}
