use std::{
    future::{ready, Ready},
    ops::{Deref, DerefMut},
};

use actix_web::{
    dev::Payload, http::ConnectionType, FromRequest, HttpMessage, HttpRequest, HttpResponse,
    ResponseError,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{MultipartConfig, MultipartError, UploadedFile};

/// Files uploaded with the request, in the order their storage finished.
#[derive(Debug, Clone, Default)]
pub struct Files(pub Vec<UploadedFile>);

/// Form fields of the request, with bracket notation expanded.
///
/// Fields parsed by the middleware are merged into a `FormBody` that earlier
/// middleware may have put in the request extensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormBody(pub Map<String, Value>);

impl FormBody {
    /// Deserialize the form into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, MultipartError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(MultipartError::ParseError)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl Files {
    pub fn into_inner(self) -> Vec<UploadedFile> {
        self.0
    }
}

impl Deref for Files {
    type Target = Vec<UploadedFile>;

    fn deref(&self) -> &Vec<UploadedFile> {
        &self.0
    }
}

impl DerefMut for Files {
    fn deref_mut(&mut self) -> &mut Vec<UploadedFile> {
        &mut self.0
    }
}

impl Deref for FormBody {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl DerefMut for FormBody {
    fn deref_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }
}

impl FromRequest for Files {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Files>()
                .cloned()
                .ok_or_else(|| MultipartError::NotCollected.into()),
        )
    }
}

impl FromRequest for FormBody {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<FormBody>()
                .cloned()
                .ok_or_else(|| MultipartError::NotCollected.into()),
        )
    }
}

/// Turn a failed request into an error response, using the configured handler if any.
pub(crate) fn handle_error(error: MultipartError, config: &MultipartConfig) -> actix_web::Error {
    log::warn!("Multipart request failed: {}", error);

    let mut res = match &config.error_handler {
        Some(error_handler) => error_handler(error),
        None => HttpResponse::build(error.status_code()).body(error.to_string()),
    };

    // The rest of the body may still be unread, don't reuse the connection
    res.head_mut().set_connection_type(ConnectionType::Close);

    actix_web::error::InternalError::from_response("invalid multipart", res).into()
}
