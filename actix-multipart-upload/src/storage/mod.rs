//! Storage engines that persist the file parts of a multipart body.

use std::{
    fmt,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};

use actix_web::{web::Bytes, HttpRequest};
use futures::{future::LocalBoxFuture, stream::LocalBoxStream, Stream};
use mime::Mime;

use crate::MultipartError;

mod disk;
mod memory;

pub use disk::{DiskStorage, DiskStorageBuilder};
pub use memory::{ConcatSink, MemoryStorage};

/// Decides where the bytes of an uploaded file go.
///
/// Called once per file part. The returned future must read `file.stream`
/// to the end (or drop it) and resolve exactly once.
pub trait StorageEngine: 'static {
    fn handle_file(&self, file: IncomingFile)
        -> LocalBoxFuture<'static, Result<StoredFile, MultipartError>>;
}

/// Bytes of a single file part, as they are read from the request body.
///
/// Yields an error instead of more bytes when the file exceeds the size limit.
pub struct FileStream(LocalBoxStream<'static, Result<Bytes, MultipartError>>);

impl FileStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, MultipartError>> + 'static,
    {
        FileStream(Box::pin(stream))
    }
}

impl Stream for FileStream {
    type Item = Result<Bytes, MultipartError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileStream")
    }
}

/// A file part handed to a [`StorageEngine`].
#[derive(Debug)]
pub struct IncomingFile {
    pub stream: FileStream,
    /// The `filename` parameter of the part's `content-disposition`.
    pub filename: String,
    pub field_name: String,
    pub request: HttpRequest,
    /// The part's `content-transfer-encoding`, `7bit` when absent.
    pub encoding: String,
    pub mime_type: Mime,
}

/// What a storage engine produced for one file.
#[derive(Debug, Clone)]
pub enum StoredFile {
    Memory {
        contents: Bytes,
    },
    Disk {
        /// Bytes written to disk.
        size: u64,
        path: PathBuf,
        /// Generated name of the file inside its destination.
        filename: String,
    },
}

/// Representing an uploaded file once its storage finished.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_filename: String,
    pub field_name: String,
    pub stored: StoredFile,
}

impl UploadedFile {
    /// Size of the stored payload in bytes.
    pub fn size(&self) -> u64 {
        match &self.stored {
            StoredFile::Memory { contents } => contents.len() as u64,
            StoredFile::Disk { size, .. } => *size,
        }
    }

    /// Buffered contents, for files kept in memory.
    pub fn contents(&self) -> Option<&Bytes> {
        match &self.stored {
            StoredFile::Memory { contents } => Some(contents),
            StoredFile::Disk { .. } => None,
        }
    }

    /// Location on disk, for files written by [`DiskStorage`].
    pub fn path(&self) -> Option<&Path> {
        match &self.stored {
            StoredFile::Disk { path, .. } => Some(path.as_path()),
            StoredFile::Memory { .. } => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use actix_web::test::TestRequest;
    use futures::stream;

    use super::*;

    /// Build an [`IncomingFile`] from a list of chunks.
    pub(crate) fn incoming(chunks: Vec<Result<Bytes, MultipartError>>) -> IncomingFile {
        IncomingFile {
            stream: FileStream::new(stream::iter(chunks)),
            filename: "short.txt".to_owned(),
            field_name: "text".to_owned(),
            request: TestRequest::default().to_http_request(),
            encoding: "7bit".to_owned(),
            mime_type: mime::TEXT_PLAIN,
        }
    }

    #[test]
    fn uploaded_file_accessors() {
        let file = UploadedFile {
            original_filename: "a.txt".to_owned(),
            field_name: "a".to_owned(),
            stored: StoredFile::Memory {
                contents: Bytes::from_static(b"hello"),
            },
        };
        assert_eq!(file.size(), 5);
        assert_eq!(file.contents().unwrap().as_ref(), b"hello");
        assert!(file.path().is_none());
    }
}
