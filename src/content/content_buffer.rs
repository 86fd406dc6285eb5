use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{trace, warn};

use crate::{AppError, AppResult};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A message body backed by exactly one file.
///
/// Buffers created with [`ContentBuffer::temp`] own a temp file that is
/// removed when the buffer is dropped, unless it was renamed into place
/// first. Buffers created with [`ContentBuffer::adopt`] wrap an existing
/// file and never delete it on drop.
pub struct ContentBuffer {
    name: String,
    declared: Option<u64>,
    path: PathBuf,
    written: u64,
    completed: bool,
    renamed: bool,
    aborted: bool,
    delete_on_drop: bool,
    writer: Option<BufWriter<File>>,
    reader: Option<File>,
}

impl fmt::Debug for ContentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentBuffer")
            .field("name", &self.name)
            .field("declared", &self.declared)
            .field("path", &self.path)
            .field("written", &self.written)
            .field("completed", &self.completed)
            .finish()
    }
}

impl ContentBuffer {
    /// An empty buffer whose backing file will live in `dir`. The file is
    /// only created by the first write.
    pub fn temp(dir: &Path, name: impl Into<String>, declared: Option<u64>) -> Self {
        let path = dir.join(format!(".courier-{}.tmp", uuid::Uuid::new_v4().simple()));
        ContentBuffer {
            name: name.into(),
            declared,
            path,
            written: 0,
            completed: false,
            renamed: false,
            aborted: false,
            delete_on_drop: true,
            writer: None,
            reader: None,
        }
    }

    /// Wraps an existing file without copying it.
    pub async fn adopt(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let length = fs::metadata(&path).await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ContentBuffer {
            name,
            declared: Some(length),
            path,
            written: length,
            completed: true,
            renamed: false,
            aborted: false,
            delete_on_drop: false,
            writer: None,
            reader: None,
        })
    }

    /// Materialises `bytes` into a fresh temp file.
    pub async fn from_bytes(dir: &Path, name: impl Into<String>, bytes: &[u8]) -> AppResult<Self> {
        let mut buffer = Self::temp(dir, name, Some(bytes.len() as u64));
        buffer.append(bytes, true).await?;
        Ok(buffer)
    }

    /// Materialises `declared` bytes read from `reader` into a fresh temp file.
    /// The reader must yield exactly that many bytes.
    pub async fn from_reader<R>(
        dir: &Path,
        name: impl Into<String>,
        declared: u64,
        reader: &mut R,
    ) -> AppResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = Self::temp(dir, name, Some(declared));
        let mut chunk = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.append(&chunk[..n], false).await?;
        }
        buffer.append(&[], true).await?;
        Ok(buffer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declared(&self) -> Option<u64> {
        self.declared
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Body length; only final once the buffer is completed.
    pub fn len(&self) -> u64 {
        self.declared.unwrap_or(self.written)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    async fn abort(&mut self) {
        self.aborted = true;
        self.writer = None;
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("failed to remove aborted content {}: {}", self.path.display(), e);
            }
        }
    }

    /// Streams one decoded slice of the body into the backing file. The last
    /// call passes `is_last = true`, which flushes and closes the file and
    /// marks the buffer completed.
    pub async fn append(&mut self, chunk: &[u8], is_last: bool) -> AppResult<()> {
        if self.completed || self.aborted {
            return Err(AppError::IllegalState(format!(
                "content {} no longer accepts data",
                self.name
            )));
        }
        let attempted = self.written + chunk.len() as u64;
        if let Some(declared) = self.declared {
            if attempted > declared {
                self.abort().await;
                return Err(AppError::OutOfSize {
                    declared,
                    attempted,
                });
            }
        }
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&self.path)
                .await?;
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(chunk).await?;
        }
        self.written = attempted;

        if is_last {
            if let Some(declared) = self.declared {
                if self.written != declared {
                    self.abort().await;
                    return Err(AppError::MalformedProtocol(format!(
                        "content {} ended after {} of {} bytes",
                        self.name, self.written, declared
                    )));
                }
            }
            if let Some(mut writer) = self.writer.take() {
                writer.flush().await?;
                writer.get_ref().sync_all().await?;
            }
            self.declared = Some(self.written);
            self.completed = true;
            trace!("content {} completed with {} bytes", self.name, self.written);
        }
        Ok(())
    }

    /// Sequential read of the next slice, `None` once the body is exhausted.
    pub async fn read_chunk(&mut self, max: usize) -> AppResult<Option<Bytes>> {
        if !self.completed {
            return Err(AppError::IllegalState(format!(
                "content {} is read before it is completed",
                self.name
            )));
        }
        if self.reader.is_none() {
            self.reader = Some(File::open(&self.path).await?);
        }
        let mut buf = vec![0u8; max.max(1)];
        let n = match self.reader.as_mut() {
            Some(reader) => reader.read(&mut buf).await?,
            None => 0,
        };
        if n == 0 {
            self.reader = None;
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    /// Moves the backing file to `dest`, replacing whatever is there. From
    /// then on the file belongs to `dest` and is never deleted by the buffer.
    pub async fn rename_to(&mut self, dest: &Path) -> AppResult<()> {
        if !self.completed {
            return Err(AppError::IllegalState(format!(
                "content {} is renamed before it is completed",
                self.name
            )));
        }
        self.reader = None;
        if self.written == 0 && fs::metadata(&self.path).await.is_err() {
            // nothing was ever written, so there is no file to move
            File::create(dest).await?;
        } else if let Err(e) = fs::rename(&self.path, dest).await {
            // rename cannot cross file systems, fall back to copy + remove
            trace!("rename {} failed ({}), copying", self.path.display(), e);
            fs::copy(&self.path, dest).await.map_err(|_| e)?;
            fs::remove_file(&self.path).await?;
        }
        self.path = dest.to_path_buf();
        self.renamed = true;
        Ok(())
    }

    /// Appends the whole body to the end of `dest`, creating it if needed.
    pub async fn append_into(&mut self, dest: &Path) -> AppResult<u64> {
        if !self.completed {
            return Err(AppError::IllegalState(format!(
                "content {} is appended before it is completed",
                self.name
            )));
        }
        let target = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .await?;
        let mut target = BufWriter::new(target);
        let mut copied = 0;
        if self.written > 0 {
            let mut source = File::open(&self.path).await?;
            copied = tokio::io::copy(&mut source, &mut target).await?;
        }
        target.flush().await?;
        target.get_ref().sync_all().await?;
        Ok(copied)
    }

    /// Best-effort removal of the backing file, skipped once renamed.
    pub async fn delete(&mut self) -> AppResult<()> {
        if self.renamed {
            return Ok(());
        }
        self.writer = None;
        self.reader = None;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ContentBuffer {
    fn drop(&mut self) {
        if self.delete_on_drop && !self.renamed {
            self.writer = None;
            self.reader = None;
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("failed to remove temp content {}: {}", self.path.display(), e);
                }
            }
        }
    }
}
