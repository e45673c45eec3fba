use std::{env, rc::Rc, str::FromStr};

use actix_web::HttpResponse;
use parse_size::parse_size;

use crate::{
    parser::Limits, ConfigError, DiskStorage, MemoryStorage, MultipartError, StorageEngine,
};

type MultipartErrorHandler = Rc<dyn Fn(MultipartError) -> HttpResponse + 'static>;

/// 200 MiB.
pub const DEFAULT_MAX_FILE_SIZE: usize = 200 * 1024 * 1024;
pub const DEFAULT_MAX_NUM_FILES: usize = 20;
/// 1 MiB.
pub const DEFAULT_MAX_FIELD_SIZE: usize = 1024 * 1024;

/// Config for the [`Multipart`](crate::Multipart) middleware.
#[derive(Clone)]
pub struct MultipartConfig {
    pub max_file_size: usize,
    pub max_num_files: usize,
    pub max_field_size: usize,
    pub(crate) storage: Rc<dyn StorageEngine>,
    pub(crate) error_handler: Option<MultipartErrorHandler>,
}

impl MultipartConfig {
    pub fn new<S: StorageEngine>(storage: S) -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_num_files: DEFAULT_MAX_NUM_FILES,
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
            storage: Rc::new(storage),
            error_handler: None,
        }
    }

    /// Maximum size in bytes of a single file.
    pub fn max_file_size(mut self, limit: usize) -> Self {
        self.max_file_size = limit;
        self
    }

    /// Maximum number of files in one request.
    pub fn max_num_files(mut self, limit: usize) -> Self {
        self.max_num_files = limit;
        self
    }

    /// Maximum size in bytes of a non-file field value.
    pub fn max_field_size(mut self, limit: usize) -> Self {
        self.max_field_size = limit;
        self
    }

    pub fn set_error_handler<F>(mut self, error_handler: F) -> Self
    where
        F: Fn(MultipartError) -> HttpResponse + 'static,
    {
        self.error_handler = Some(Rc::new(error_handler));
        self
    }

    /// Load the config from `MULTIPART_*` environment variables.
    ///
    /// | variable | |
    /// |---|---|
    /// | `MULTIPART_STORAGE` | `memory` or `disk`, required |
    /// | `MULTIPART_DESTINATION` | directory for `disk` storage |
    /// | `MULTIPART_MAX_FILE_SIZE` | size like `200MiB` |
    /// | `MULTIPART_MAX_FILES` | number of files |
    /// | `MULTIPART_MAX_FIELD_SIZE` | size like `1MiB` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = match lookup("MULTIPART_STORAGE").as_deref() {
            None => return Err(ConfigError::MissingStorage),
            Some("memory") => Self::new(MemoryStorage),
            Some("disk") => {
                let storage = DiskStorage::builder();
                let storage = match lookup("MULTIPART_DESTINATION") {
                    Some(dir) => storage.destination(dir),
                    None => storage,
                };
                Self::new(storage.build()?)
            }
            Some(other) => return Err(ConfigError::UnknownStorage(other.to_owned())),
        };

        if let Some(size) = size_var(&lookup, "MULTIPART_MAX_FILE_SIZE")? {
            config.max_file_size = size;
        }
        if let Some(size) = size_var(&lookup, "MULTIPART_MAX_FIELD_SIZE")? {
            config.max_field_size = size;
        }
        if let Some(value) = lookup("MULTIPART_MAX_FILES") {
            config.max_num_files = usize::from_str(value.trim()).map_err(|_| {
                ConfigError::InvalidValue {
                    key: "MULTIPART_MAX_FILES",
                    value,
                }
            })?;
        }

        Ok(config)
    }

    pub(crate) fn limits(&self) -> Limits {
        Limits {
            max_file_size: self.max_file_size,
            max_num_files: self.max_num_files,
            max_field_size: self.max_field_size,
        }
    }
}

fn size_var<F>(lookup: &F, key: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => match parse_size(value.trim()) {
            Ok(size) => usize::try_from(size)
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { key, value }),
            Err(_) => Err(ConfigError::InvalidValue { key, value }),
        },
    }
}
