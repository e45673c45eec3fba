//! Turns the sequential field stream of [`actix_multipart::Multipart`] into events.
//!
//! The body is read by a spawned task. File parts are forwarded into their own
//! [`FileStream`] so storage can consume several files while the parser keeps
//! going; a file whose stream was dropped is drained and discarded.

use std::{
    cell::RefCell,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use actix_multipart::Field;
use actix_web::{
    error::PayloadError,
    http::header::{HeaderMap, CONTENT_TYPE},
    web::{Bytes, BytesMut},
};
use futures::{
    channel::mpsc::{self, UnboundedSender},
    SinkExt, Stream, StreamExt, TryStreamExt,
};
use mime::Mime;

use crate::{storage::FileStream, MultipartError};

/// Chunks buffered per file before the parser waits for storage to catch up.
const FILE_CHUNK_BUFFER: usize = 16;

const DEFAULT_ENCODING: &str = "7bit";

#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub(crate) max_file_size: usize,
    pub(crate) max_num_files: usize,
    pub(crate) max_field_size: usize,
}

#[derive(Debug)]
pub(crate) struct FilePart {
    pub(crate) field_name: String,
    pub(crate) filename: String,
    pub(crate) encoding: String,
    pub(crate) mime_type: Mime,
    pub(crate) stream: FileStream,
}

#[derive(Debug)]
pub(crate) enum Event {
    Field { name: String, value: String },
    File(FilePart),
    Finish,
    Error(MultipartError),
}

/// Event stream of one multipart body. Dropping it stops the parser.
pub(crate) struct Parser {
    events: mpsc::UnboundedReceiver<Event>,
}

impl Parser {
    pub(crate) fn new<S>(headers: &HeaderMap, payload: S, limits: Limits) -> Self
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
    {
        let head = boundary(headers).map(Head::new);
        let recorder = head.clone();
        let payload = payload.inspect(move |chunk| {
            if let (Some(head), Ok(chunk)) = (&recorder, chunk) {
                head.record(chunk);
            }
        });

        let multipart = actix_multipart::Multipart::new(headers, payload.boxed_local());
        let (tx, events) = mpsc::unbounded();
        actix_web::rt::spawn(pump(multipart, tx, limits, head));

        Parser { events }
    }
}

impl Stream for Parser {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.events.poll_next_unpin(cx)
    }
}

fn boundary(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?.parse::<Mime>().ok()?;
    content_type.get_param(mime::BOUNDARY).map(|b| b.as_str().to_owned())
}

/// First bytes of the body, enough to recognize a form made of the closing
/// delimiter alone. `actix_multipart` reports such a body as incomplete.
#[derive(Clone)]
struct Head {
    seen: Rc<RefCell<BytesMut>>,
    closing: Vec<u8>,
}

impl Head {
    fn new(boundary: String) -> Self {
        Head {
            seen: Rc::new(RefCell::new(BytesMut::new())),
            closing: format!("--{}--", boundary).into_bytes(),
        }
    }

    /// Keeps at most a few bytes past the delimiter, a longer body is never empty.
    fn cap(&self) -> usize {
        self.closing.len() + 8
    }

    fn record(&self, chunk: &Bytes) {
        let mut seen = self.seen.borrow_mut();
        let room = (self.cap() + 1).saturating_sub(seen.len());
        seen.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn is_closing_only(&self) -> bool {
        let seen = self.seen.borrow();
        seen.len() <= self.cap()
            && std::str::from_utf8(&seen).map_or(false, |s| s.trim().as_bytes() == self.closing)
    }
}

async fn pump(
    mut multipart: actix_multipart::Multipart,
    events: UnboundedSender<Event>,
    limits: Limits,
    head: Option<Head>,
) {
    let mut parts = 0;
    let mut files = 0;

    loop {
        let mut field = match multipart.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                let _ = events.unbounded_send(Event::Finish);
                return;
            }
            Err(actix_multipart::MultipartError::Incomplete)
                if parts == 0 && head.as_ref().map_or(false, Head::is_closing_only) =>
            {
                let _ = events.unbounded_send(Event::Finish);
                return;
            }
            Err(err) => {
                let _ = events.unbounded_send(Event::Error(MultipartError::Parse(err)));
                return;
            }
        };
        parts += 1;

        let disposition = field.content_disposition().clone();

        // Unnamed parts are skipped, the multipart stream drains them
        let name = match disposition.get_name() {
            Some(v) => v.to_owned(),
            None => continue,
        };

        let event = match disposition.get_filename() {
            Some(filename) => {
                files += 1;
                if files > limits.max_num_files {
                    let _ = events.unbounded_send(Event::Error(MultipartError::TooManyFiles {
                        limit: limits.max_num_files,
                    }));
                    return;
                }

                let (mut tx, rx) = mpsc::channel(FILE_CHUNK_BUFFER);
                let part = FilePart {
                    encoding: field
                        .headers()
                        .get("content-transfer-encoding")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or(DEFAULT_ENCODING)
                        .to_owned(),
                    mime_type: field.content_type().clone(),
                    filename: filename.to_owned(),
                    field_name: name.clone(),
                    stream: FileStream::new(rx),
                };

                if events.unbounded_send(Event::File(part)).is_err() {
                    return;
                }

                match forward_file(&mut field, &mut tx, &name, limits.max_file_size).await {
                    Ok(()) => continue,
                    Err(err) => {
                        let _ = events.unbounded_send(Event::Error(err));
                        // the file was cut short, its storage must not see a clean end
                        let incomplete = actix_multipart::MultipartError::Incomplete;
                        let _ = tx.send(Err(MultipartError::Parse(incomplete))).await;
                        return;
                    }
                }
            }
            None => match read_value(&mut field, &name, limits.max_field_size).await {
                Ok(value) => Event::Field { name, value },
                Err(err) => Event::Error(err),
            },
        };

        let failed = matches!(event, Event::Error(_));
        if events.unbounded_send(event).is_err() || failed {
            return;
        }
    }
}

/// Copy a file part into its channel. Once the file is over `limit` or the
/// receiver is gone, the rest of the part is read and thrown away.
async fn forward_file(
    field: &mut Field,
    file: &mut mpsc::Sender<Result<Bytes, MultipartError>>,
    name: &str,
    limit: usize,
) -> Result<(), MultipartError> {
    let mut size = 0;
    let mut open = true;

    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(MultipartError::Parse)?;
        if !open {
            continue;
        }

        size += chunk.len();
        let item = if size > limit {
            open = false;
            Err(MultipartError::FileTooLarge {
                field: name.to_owned(),
                limit,
            })
        } else {
            Ok(chunk)
        };

        if file.send(item).await.is_err() {
            open = false;
        }
    }

    Ok(())
}

async fn read_value(field: &mut Field, name: &str, limit: usize) -> Result<String, MultipartError> {
    let mut value = BytesMut::new();

    while let Some(chunk) = field.try_next().await.map_err(MultipartError::Parse)? {
        if value.len() + chunk.len() > limit {
            return Err(MultipartError::FieldTooLarge {
                field: name.to_owned(),
                limit,
            });
        }
        value.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&value).into_owned())
}
