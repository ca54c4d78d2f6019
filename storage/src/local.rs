use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Suffix of in-flight upload files. These are never listed.
const PARTIAL_SUFFIX: &str = ".partial";

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A sibling of `target` to write into before renaming over it.
fn partial_path(target: &Utf8Path) -> Utf8PathBuf {
    let name = target.file_name().unwrap_or("object");
    let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(".{name}.{}.{n}{PARTIAL_SUFFIX}", std::process::id()))
}

/// Storage driver backed by a directory on the local filesystem.
///
/// Each bucket is a directory under the root, and object paths map directly
/// onto file paths inside it.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at the given directory.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push(remote);
        path
    }

    fn error(&self, bucket: &str, path: &Utf8Path, context: &str, err: std::io::Error) -> StorageError {
        StorageError::builder(self.name(), StorageErrorKind::from_io(err.kind()), err)
            .bucket(bucket)
            .path(path.as_str())
            .context(context)
            .build()
    }

    async fn ensure_parent(&self, bucket: &str, target: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.error(bucket, target, "create parent directory", err))?;
        }
        Ok(())
    }

    async fn write_file(
        &self,
        bucket: &str,
        target: &Utf8Path,
        file: tokio::fs::File,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut writer = tokio::io::BufWriter::new(file);

        tokio::io::copy(local, &mut writer)
            .await
            .map_err(|err| self.error(bucket, target, "copy", err))?;

        writer
            .shutdown()
            .await
            .map_err(|err| self.error(bucket, target, "shutdown writer", err))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let target = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|err| self.error(bucket, remote, "metadata", err))?;

        if !metadata.is_file() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                format!("not a file: {target}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        Ok(Metadata {
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(Into::into)
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let target = self.path(bucket, remote);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.error(bucket, remote, "remove file", err)),
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let target = self.path(bucket, remote);
        self.ensure_parent(bucket, &target).await?;

        // Write beside the target and rename, so a reader never sees a
        // truncated object.
        let partial = partial_path(&target);
        let file = tokio::fs::File::create(&partial)
            .await
            .map_err(|err| self.error(bucket, remote, "open file", err))?;

        let written = match self.write_file(bucket, remote, file, local).await {
            Ok(()) => tokio::fs::rename(&partial, &target)
                .await
                .map_err(|err| self.error(bucket, remote, "rename into place", err)),
            Err(error) => Err(error),
        };
        if written.is_err() {
            if let Err(err) = tokio::fs::remove_file(&partial).await {
                tracing::debug!(%partial, "could not remove partial upload: {err}");
            }
        }
        written
    }

    async fn create(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let target = self.path(bucket, remote);
        self.ensure_parent(bucket, &target).await?;

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|err| self.error(bucket, remote, "create new file", err))?;

        self.write_file(bucket, remote, file, local).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let target = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&target)
                .await
                .map_err(|err| self.error(bucket, remote, "open file", err))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .map_err(|err| self.error(bucket, remote, "copy", err))?;

        local
            .flush()
            .await
            .map_err(|err| self.error(bucket, remote, "flush writer", err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let root = self.root.join(bucket);
        let start = match prefix {
            Some(prefix) => root.join(prefix),
            None => root.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&root, &start))
            .in_current_span()
            .await
            .map_err(StorageError::with(self.name(), StorageErrorKind::Other))?
            .map_err(|err| StorageError::io(self.name(), err))?;

        tracing::debug!("Found {} entries", items.len());

        Ok(items)
    }
}

#[tracing::instrument]
fn collect_list(root: &Utf8Path, start: &Utf8Path) -> std::io::Result<Vec<String>> {
    if !start.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    visit(start, &mut files)?;

    let mut items: Vec<String> = files
        .into_iter()
        .filter_map(|p| p.strip_prefix(root).ok().map(|p| p.to_string()))
        .collect();
    items.sort();

    Ok(items)
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> std::io::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else if !entry.file_name().ends_with(PARTIAL_SUFFIX) {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, LocalDriver::new(root))
    }

    #[tokio::test]
    async fn upload_then_download() {
        let (_dir, driver) = driver();
        let remote = Utf8Path::new("1-acme/blob/ab/abcd");

        driver
            .upload("archive", remote, &mut &b"layer"[..])
            .await
            .unwrap();

        let mut out = Vec::new();
        driver.download("archive", remote, &mut out).await.unwrap();
        assert_eq!(out, b"layer");

        let metadata = driver.metadata("archive", remote).await.unwrap();
        assert_eq!(metadata.size, 5);
    }

    #[tokio::test]
    async fn create_is_exclusive() {
        let (_dir, driver) = driver();
        let remote = Utf8Path::new("1-acme/backup/lock");

        driver.create("archive", remote, &mut &b""[..]).await.unwrap();
        let err = driver
            .create("archive", remote, &mut &b""[..])
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        driver.delete("archive", remote).await.unwrap();
        driver.delete("archive", remote).await.unwrap();
        assert!(!driver.exists("archive", remote).await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_bucket_relative_paths() {
        let (_dir, driver) = driver();
        for path in ["1-acme/backup/0.json", "1-acme/backup/1.json", "2-other/backup/0.json"] {
            driver
                .upload("archive", Utf8Path::new(path), &mut &b"{}"[..])
                .await
                .unwrap();
        }

        let listed = driver
            .list("archive", Some(Utf8Path::new("1-acme/backup")))
            .await
            .unwrap();
        assert_eq!(listed, vec!["1-acme/backup/0.json", "1-acme/backup/1.json"]);

        let missing = driver
            .list("archive", Some(Utf8Path::new("9-none/backup")))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn failed_upload_leaves_previous_object() {
        let (_dir, driver) = driver();
        let remote = Utf8Path::new("registry/sha256/ab/abcd");

        driver
            .upload("registry", remote, &mut &b"complete"[..])
            .await
            .unwrap();

        let mut broken = tokio::io::BufReader::new(FailingReader);
        let err = driver.upload("registry", remote, &mut broken).await.unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::Io);

        let mut out = Vec::new();
        driver.download("registry", remote, &mut out).await.unwrap();
        assert_eq!(out, b"complete");

        let listed = driver.list("registry", None).await.unwrap();
        assert_eq!(listed, vec!["registry/sha256/ab/abcd"]);
    }

    /// A reader which fails part way through an object.
    struct FailingReader;

    impl tokio::io::AsyncRead for FailingReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("connection reset")))
        }
    }
}
