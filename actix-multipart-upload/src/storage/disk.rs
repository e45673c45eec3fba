use std::{
    fmt,
    future::Future,
    io,
    path::{Path, PathBuf},
    rc::Rc,
};

use futures::{future::LocalBoxFuture, TryStreamExt};
use tokio::io::AsyncWriteExt;

use super::{FileStream, IncomingFile, StorageEngine, StoredFile};
use crate::{ConfigError, MultipartError};

type Generator = Rc<dyn Fn(&IncomingFile) -> LocalBoxFuture<'static, io::Result<String>>>;

fn boxed_generator<F, Fut>(f: F) -> Generator
where
    F: Fn(&IncomingFile) -> Fut + 'static,
    Fut: Future<Output = io::Result<String>> + 'static,
{
    Rc::new(move |file: &IncomingFile| -> LocalBoxFuture<'static, io::Result<String>> {
        Box::pin(f(file))
    })
}

/// 8 random bytes, hex encoded.
fn random_filename() -> String {
    rand::random::<[u8; 8]>()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[derive(Clone)]
enum Destination {
    Fixed(PathBuf),
    Generated(Generator),
}

/// Streams every file to its own path on disk.
///
/// Files are written to `destination/filename` and stay there after the
/// request, removing them is up to the application. A write that fails
/// halfway leaves the partial file behind.
#[derive(Clone)]
pub struct DiskStorage {
    destination: Destination,
    filename_generator: Option<Generator>,
}

impl DiskStorage {
    pub fn builder() -> DiskStorageBuilder {
        DiskStorageBuilder::default()
    }

    /// Shorthand for a disk storage writing into a fixed directory.
    pub fn new(destination: impl AsRef<Path>) -> Self {
        DiskStorage {
            destination: Destination::Fixed(destination.as_ref().to_owned()),
            filename_generator: None,
        }
    }
}

impl fmt::Debug for DiskStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("DiskStorage");
        match &self.destination {
            Destination::Fixed(dir) => s.field("destination", dir),
            Destination::Generated(_) => s.field("destination", &"<generator>"),
        };
        s.field("custom_filenames", &self.filename_generator.is_some())
            .finish()
    }
}

/// Builder for [`DiskStorage`]. Exactly one of [`destination`](Self::destination)
/// and [`destination_generator`](Self::destination_generator) must be set.
#[derive(Default)]
pub struct DiskStorageBuilder {
    destination: Option<PathBuf>,
    destination_generator: Option<Generator>,
    filename_generator: Option<Generator>,
}

impl DiskStorageBuilder {
    /// Write every file into this directory. It must already exist.
    pub fn destination(mut self, dir: impl AsRef<Path>) -> Self {
        self.destination = Some(dir.as_ref().to_owned());
        self
    }

    /// Compute the directory for each file.
    pub fn destination_generator<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&IncomingFile) -> Fut + 'static,
        Fut: Future<Output = io::Result<String>> + 'static,
    {
        self.destination_generator = Some(boxed_generator(f));
        self
    }

    /// Compute the name of each file. Defaults to 16 random hex characters.
    pub fn filename_generator<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&IncomingFile) -> Fut + 'static,
        Fut: Future<Output = io::Result<String>> + 'static,
    {
        self.filename_generator = Some(boxed_generator(f));
        self
    }

    pub fn build(self) -> Result<DiskStorage, ConfigError> {
        let destination = match (self.destination, self.destination_generator) {
            (Some(dir), None) => Destination::Fixed(dir),
            (None, Some(generator)) => Destination::Generated(generator),
            _ => return Err(ConfigError::Destination),
        };

        Ok(DiskStorage {
            destination,
            filename_generator: self.filename_generator,
        })
    }
}

async fn write_file(path: &Path, mut stream: FileStream) -> Result<u64, MultipartError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut size = 0;

    let res: Result<(), MultipartError> = async {
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(err) = res {
        log::warn!("Partial upload left at {}: {}", path.display(), err);
        return Err(err);
    }

    Ok(size)
}

impl StorageEngine for DiskStorage {
    fn handle_file(
        &self,
        file: IncomingFile,
    ) -> LocalBoxFuture<'static, Result<StoredFile, MultipartError>> {
        let storage = self.clone();

        Box::pin(async move {
            let filename = match &storage.filename_generator {
                Some(generate) => generate(&file).await?,
                None => random_filename(),
            };

            let destination = match &storage.destination {
                Destination::Fixed(dir) => dir.clone(),
                Destination::Generated(generate) => PathBuf::from(generate(&file).await?),
            };

            let path = destination.join(&filename);
            log::debug!("Writing field ({}) to {}", file.field_name, path.display());
            let size = write_file(&path, file.stream).await?;

            Ok(StoredFile::Disk {
                size,
                path,
                filename,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use actix_web::web::Bytes;

    use super::*;
    use crate::storage::tests::incoming;

    fn chunks() -> Vec<Result<Bytes, MultipartError>> {
        vec![
            Ok(Bytes::from_static(b"Hello, ")),
            Ok(Bytes::from_static(b"world!")),
        ]
    }

    #[test]
    fn builder_needs_exactly_one_destination() {
        assert!(matches!(
            DiskStorage::builder().build(),
            Err(ConfigError::Destination)
        ));

        let both = DiskStorage::builder()
            .destination("/tmp")
            .destination_generator(|_| async { Ok("/tmp".to_owned()) })
            .build();
        assert!(matches!(both, Err(ConfigError::Destination)));

        assert!(DiskStorage::builder().destination("/tmp").build().is_ok());
        assert!(DiskStorage::builder()
            .destination_generator(|_| async { Ok("/tmp".to_owned()) })
            .build()
            .is_ok());
    }

    #[test]
    fn random_filenames_are_hex() {
        let name = random_filename();
        assert_eq!(name.len(), 16);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(name, random_filename());
    }

    #[actix_rt::test]
    async fn writes_to_fixed_destination() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());

        let stored = storage.handle_file(incoming(chunks())).await.unwrap();
        match stored {
            StoredFile::Disk {
                size,
                path,
                filename,
            } => {
                assert_eq!(size, 13);
                assert_eq!(path, dir.path().join(&filename));
                assert_eq!(std::fs::read(&path).unwrap(), b"Hello, world!");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[actix_rt::test]
    async fn uses_generators() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("text")).unwrap();
        let root = dir.path().to_owned();

        let storage = DiskStorage::builder()
            .destination_generator(move |file: &IncomingFile| {
                let dest = root.join(&file.field_name);
                async move { Ok(dest.to_string_lossy().into_owned()) }
            })
            .filename_generator(|file: &IncomingFile| {
                let name = format!("upload-{}", file.filename);
                async move { Ok(name) }
            })
            .build()
            .unwrap();

        let stored = storage.handle_file(incoming(chunks())).await.unwrap();
        match stored {
            StoredFile::Disk { path, filename, .. } => {
                assert_eq!(filename, "upload-short.txt");
                assert_eq!(path, dir.path().join("text").join("upload-short.txt"));
                assert!(path.exists());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[actix_rt::test]
    async fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().join("does-not-exist"));

        let err = storage.handle_file(incoming(chunks())).await.unwrap_err();
        assert!(matches!(err, MultipartError::Io(_)));
    }

    #[actix_rt::test]
    async fn generator_error_fails_the_file() {
        let storage = DiskStorage::builder()
            .destination("/tmp")
            .filename_generator(|_| async {
                Err(io::Error::new(io::ErrorKind::Other, "no names left"))
            })
            .build()
            .unwrap();

        let err = storage.handle_file(incoming(chunks())).await.unwrap_err();
        assert_eq!(err.to_string(), "Could not write uploaded file: no names left");
    }
}
