//! Multipart form and file upload middleware for Actix Web.
//!
//! Wrap an app or scope with [`Multipart`] and every `multipart/*` request has
//! its fields collected into a [`FormBody`] and its files handed to a
//! [`StorageEngine`] before the handler runs. [`MemoryStorage`] keeps files in
//! memory, [`DiskStorage`] streams them into a directory.

mod config;
mod error;
mod extractor;
mod form;
mod middleware;
mod parser;
mod pending;
mod storage;
mod upload;

pub use config::*;
pub use error::*;
pub use extractor::{Files, FormBody};
pub use form::append_field;
pub use middleware::{Multipart, MultipartMiddleware};
pub use storage::*;
