#![allow(dead_code)]

use actix_web::{
    http::header::CONTENT_TYPE,
    test::TestRequest,
    web::{BufMut, Bytes, BytesMut},
};
use serde_json::{json, Value};

use actix_multipart_upload::{Files, UploadedFile};

const BOUNDARY: &str = "------------------------abbc761f78ff4d7cb7573b5a23f96ef0";

/// Hand-built `multipart/form-data` body.
pub struct Form {
    body: BytesMut,
}

impl Form {
    pub fn new() -> Self {
        Form {
            body: BytesMut::new(),
        }
    }

    fn boundary(&mut self) {
        self.body.put_slice(b"--");
        self.body.put_slice(BOUNDARY.as_bytes());
        self.body.put_slice(b"\r\n");
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.boundary();
        self.body.put_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        self.body.put_slice(value.as_bytes());
        self.body.put_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, filename: &str, contents: &[u8]) -> Self {
        self.boundary();
        self.body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                name, filename
            )
            .as_bytes(),
        );
        self.body.put_slice(contents);
        self.body.put_slice(b"\r\n");
        self
    }

    fn request(body: Bytes) -> TestRequest {
        TestRequest::post()
            .uri("/")
            .insert_header((
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    pub fn finish(mut self) -> TestRequest {
        self.body.put_slice(b"--");
        self.body.put_slice(BOUNDARY.as_bytes());
        self.body.put_slice(b"--\r\n");
        Self::request(self.body.freeze())
    }

    /// Body that stops before the closing boundary.
    pub fn truncated(self) -> TestRequest {
        let len = self.body.len().saturating_sub(2);
        Self::request(self.body.freeze().slice(..len))
    }
}

pub fn short_text() -> Vec<u8> {
    b"Hello, world!\n".to_vec()
}

pub fn long_text() -> Vec<u8> {
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n"
        .repeat(4_000)
        .into_bytes()
}

/// Binary content that contains CR/LF and dashes.
pub fn small_binary() -> Vec<u8> {
    (0..20_000u32).map(|i| (i * 31 % 256) as u8).collect()
}

/// JSON summary of the uploaded files, sorted by field name.
pub fn describe(files: &Files) -> Value {
    let mut files: Vec<&UploadedFile> = files.iter().collect();
    files.sort_by(|a, b| a.field_name.cmp(&b.field_name));

    Value::Array(
        files
            .into_iter()
            .map(|file| {
                json!({
                    "field": file.field_name,
                    "name": file.original_filename,
                    "size": file.size(),
                })
            })
            .collect(),
    )
}
