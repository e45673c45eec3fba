use std::{
    pin::Pin,
    task::{Context, Poll},
};

use actix_web::web::{Bytes, BytesMut};
use futures::{future::LocalBoxFuture, Sink, StreamExt};

use super::{IncomingFile, StorageEngine, StoredFile};
use crate::MultipartError;

/// Sink that keeps every chunk written to it and hands them back as one buffer.
#[derive(Debug, Default)]
pub struct ConcatSink {
    chunks: Vec<Bytes>,
}

impl ConcatSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, chunk: Bytes) {
        self.chunks.push(chunk);
    }

    /// Everything written so far, concatenated.
    pub fn body(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            chunks => {
                let len = chunks.iter().map(Bytes::len).sum();
                let mut body = BytesMut::with_capacity(len);
                for chunk in chunks {
                    body.extend_from_slice(chunk);
                }
                body.freeze()
            }
        }
    }
}

impl Sink<Bytes> for ConcatSink {
    type Error = MultipartError;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.get_mut().write(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Buffers every file completely in memory.
///
/// Memory use grows with the file size, use [`DiskStorage`](super::DiskStorage)
/// for large uploads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorage;

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage
    }
}

impl StorageEngine for MemoryStorage {
    fn handle_file(
        &self,
        file: IncomingFile,
    ) -> LocalBoxFuture<'static, Result<StoredFile, MultipartError>> {
        Box::pin(async move {
            let mut sink = ConcatSink::new();
            file.stream.forward(&mut sink).await?;

            Ok(StoredFile::Memory {
                contents: sink.body(),
            })
        })
    }
}
