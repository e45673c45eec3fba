//! Per-request state machine tying parser events to the storage engine.
//!
//! A request moves from receiving to finalizing to either proceeded or failed.
//! It proceeds once the parser finished, no storage operation is in flight and
//! nothing failed. On the first failure it waits for every in-flight storage
//! operation to settle, then fails with that error. Later errors are dropped.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use actix_web::HttpRequest;
use futures::{
    channel::oneshot,
    future::{self, Either},
    StreamExt,
};
use serde_json::{Map, Value};

use crate::{
    append_field,
    parser::{Event, FilePart, Parser},
    pending::Pending,
    storage::{IncomingFile, StorageEngine, UploadedFile},
    MultipartError,
};

/// Everything read from a multipart body that proceeded.
#[derive(Debug, Default)]
pub(crate) struct Collected {
    pub(crate) fields: Map<String, Value>,
    pub(crate) files: Vec<UploadedFile>,
}

type Outcome = Result<Collected, MultipartError>;

#[derive(Default)]
struct State {
    collected: Collected,
    parser_finished: bool,
    errored: bool,
    terminal: bool,
}

struct Upload {
    state: RefCell<State>,
    pending: Pending,
    outcome: RefCell<Option<oneshot::Sender<Outcome>>>,
}

impl Upload {
    fn new(outcome: oneshot::Sender<Outcome>) -> Self {
        Upload {
            state: RefCell::new(State::default()),
            pending: Pending::new(),
            outcome: RefCell::new(Some(outcome)),
        }
    }

    /// Consume parser events until the stream ends.
    async fn drive(
        self: Rc<Self>,
        mut parser: Parser,
        storage: Rc<dyn StorageEngine>,
        request: HttpRequest,
    ) {
        while let Some(event) = parser.next().await {
            match event {
                Event::Field { name, value } => {
                    let mut state = self.state.borrow_mut();
                    if !state.terminal {
                        append_field(&mut state.collected.fields, &name, value);
                    }
                }
                Event::File(part) => self.dispatch(part, &storage, &request),
                Event::Finish => {
                    self.state.borrow_mut().parser_finished = true;
                    self.check_done();
                }
                Event::Error(err) => self.error_out(err),
            }
        }

        // The body ended without a finish event, treat it as truncated.
        if !self.state.borrow().parser_finished {
            self.error_out(MultipartError::Incomplete);
        }
    }

    fn dispatch(
        self: &Rc<Self>,
        part: FilePart,
        storage: &Rc<dyn StorageEngine>,
        request: &HttpRequest,
    ) {
        {
            let state = self.state.borrow();
            if state.errored || state.terminal {
                // dropping the stream makes the parser discard the rest of the file
                log::debug!("Skipping file for field ({}) after failure", part.field_name);
                return;
            }
        }

        let in_flight = self.pending.increment();
        log::debug!(
            "Storing file for field ({}), {} in flight",
            part.field_name,
            in_flight
        );

        let original_filename = part.filename.clone();
        let field_name = part.field_name.clone();
        let fut = storage.handle_file(IncomingFile {
            stream: part.stream,
            filename: part.filename,
            field_name: part.field_name,
            request: request.clone(),
            encoding: part.encoding,
            mime_type: part.mime_type,
        });

        let upload = Rc::clone(self);
        actix_web::rt::spawn(async move {
            match fut.await {
                Ok(stored) => {
                    upload.state.borrow_mut().collected.files.push(UploadedFile {
                        original_filename,
                        field_name,
                        stored,
                    });
                    upload.pending.decrement();
                    upload.check_done();
                }
                Err(err) => {
                    upload.pending.decrement();
                    upload.error_out(err);
                }
            }
        });
    }

    fn check_done(&self) {
        let ready = {
            let state = self.state.borrow();
            state.parser_finished && self.pending.is_zero() && !state.errored && !state.terminal
        };

        if ready {
            let collected = std::mem::take(&mut self.state.borrow_mut().collected);
            log::debug!(
                "Multipart body complete: {} fields, {} files",
                collected.fields.len(),
                collected.files.len()
            );
            self.settle(Ok(collected));
        }
    }

    /// Only the first error is kept. It is reported once nothing is in flight.
    fn error_out(self: &Rc<Self>, err: MultipartError) {
        {
            let mut state = self.state.borrow_mut();
            if state.errored || state.terminal {
                log::debug!("Ignoring error after the first: {}", err);
                return;
            }
            state.errored = true;
        }

        let upload: Weak<Self> = Rc::downgrade(self);
        self.pending.when_zero(move || {
            if let Some(upload) = upload.upgrade() {
                upload.settle(Err(err));
            }
        });
    }

    fn settle(&self, outcome: Outcome) {
        self.state.borrow_mut().terminal = true;
        if let Some(tx) = self.outcome.borrow_mut().take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Read a whole multipart body, storing its files with `storage`.
///
/// Resolves once every field is parsed and every dispatched storage operation
/// has settled. The parser is dropped as soon as the outcome is known.
pub(crate) async fn collect(
    parser: Parser,
    storage: Rc<dyn StorageEngine>,
    request: HttpRequest,
) -> Outcome {
    let (tx, rx) = oneshot::channel();
    let upload = Rc::new(Upload::new(tx));

    let drive = Rc::clone(&upload).drive(parser, storage, request);
    futures::pin_mut!(drive);

    let outcome = match future::select(drive, rx).await {
        Either::Left(((), rx)) => rx.await,
        Either::Right((outcome, _drive)) => outcome,
    };

    outcome.unwrap_or(Err(MultipartError::Incomplete))
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, time::Duration};

    use actix_web::{
        error::PayloadError,
        http::header::{self, HeaderMap, HeaderValue},
        test::TestRequest,
        web::Bytes,
    };
    use futures::{future::LocalBoxFuture, stream};

    use super::*;
    use crate::{parser::Limits, ConcatSink, StoredFile};

    const BOUNDARY: &str = "abbc761f78ff4d7cb7573b5a23f96ef0";

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&format!("multipart/form-data; boundary={}", BOUNDARY)).unwrap(),
        );
        headers
    }

    fn file(name: &str) -> String {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}.txt\"\r\n\r\n\
             contents of {}\r\n",
            BOUNDARY, name, name, name
        )
    }

    /// Records which files were handed over. `bad` fails at once, the rest
    /// settle a while after their stream ended.
    #[derive(Clone, Default)]
    struct Recording {
        started: Rc<RefCell<Vec<String>>>,
        settled: Rc<Cell<usize>>,
    }

    impl StorageEngine for Recording {
        fn handle_file(
            &self,
            mut file: IncomingFile,
        ) -> LocalBoxFuture<'static, Result<StoredFile, MultipartError>> {
            self.started.borrow_mut().push(file.field_name.clone());
            let settled = Rc::clone(&self.settled);

            Box::pin(async move {
                if file.field_name == "bad" {
                    return Err(MultipartError::storage("Help im alive"));
                }

                let mut sink = ConcatSink::new();
                while let Some(chunk) = file.stream.next().await {
                    sink.write(chunk?);
                }
                actix_rt::time::sleep(Duration::from_millis(100)).await;
                settled.set(settled.get() + 1);

                Ok(StoredFile::Memory {
                    contents: sink.body(),
                })
            })
        }
    }

    async fn run(chunks: Vec<(u64, String)>, storage: Recording) -> Outcome {
        let payload = stream::iter(chunks).then(|(delay, chunk)| async move {
            actix_rt::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, PayloadError>(Bytes::from(chunk))
        });
        let limits = Limits {
            max_file_size: 1024,
            max_num_files: 10,
            max_field_size: 1024,
        };

        collect(
            Parser::new(&headers(), payload, limits),
            Rc::new(storage),
            TestRequest::default().to_http_request(),
        )
        .await
    }

    #[actix_rt::test]
    async fn files_after_failure_are_never_stored() {
        let storage = Recording::default();

        // the good files only arrive once `bad` has failed and `slow` is still in flight
        let first = format!("{}{}", file("slow"), file("bad"));
        let second = format!("{}{}--{}--\r\n", file("good1"), file("good2"), BOUNDARY);
        let outcome = run(vec![(0, first), (20, second)], storage.clone()).await;

        match outcome {
            Err(err @ MultipartError::Storage(_)) => assert_eq!(err.to_string(), "Help im alive"),
            other => panic!("unexpected {:?}", other.map(|c| c.files.len())),
        }
        assert_eq!(*storage.started.borrow(), vec!["slow", "bad"]);
        assert_eq!(storage.settled.get(), 1);
    }

    #[actix_rt::test]
    async fn proceeds_once_every_file_settled() {
        let storage = Recording::default();

        let body = format!("{}{}--{}--\r\n", file("one"), file("two"), BOUNDARY);
        let collected = run(vec![(0, body)], storage.clone()).await.unwrap();

        assert_eq!(collected.files.len(), 2);
        assert_eq!(storage.settled.get(), 2);
        assert!(collected.fields.is_empty());
    }
}
