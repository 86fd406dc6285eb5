use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::content::ContentBuffer;
use crate::network::{AgentClient, AgentConnector};
use crate::protocol::{
    headers, AgentAddr, Command, Message, OnExist, ResourceUri, ResponseCode, UriOptions,
};
use crate::{AppError, AppResult};

/// Number of splits for a file of `size` bytes: at least two, one per
/// `min_chunk` bytes otherwise, never more than `max_workers`.
pub fn worker_count(size: u64, min_chunk: u64, max_workers: usize) -> usize {
    let chunks = size.div_ceil(min_chunk.max(1)).max(2);
    usize::try_from(chunks)
        .unwrap_or(usize::MAX)
        .min(max_workers.max(1))
}

/// `<file>.<tag>.split<index>`
pub fn split_name(file_name: &str, tag: &str, index: usize) -> String {
    format!("{}.{}.split{}", file_name, tag, index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRange {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

/// Hands out the splits of one source file. Indices are assigned under a
/// lock so each worker gets its own; reading the bytes happens outside it.
#[derive(Debug)]
pub struct SplitReader {
    source: PathBuf,
    size: u64,
    split_size: u64,
    count: usize,
    next: Mutex<usize>,
}

impl SplitReader {
    pub fn new(source: impl Into<PathBuf>, size: u64, count: usize) -> Self {
        let count = count.max(1);
        SplitReader {
            source: source.into(),
            size,
            split_size: size.div_ceil(count as u64).max(1),
            count,
            next: Mutex::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn next_split(&self) -> Option<SplitRange> {
        let mut next = self.next.lock();
        if *next >= self.count {
            return None;
        }
        let index = *next;
        *next += 1;
        let offset = (index as u64 * self.split_size).min(self.size);
        Some(SplitRange {
            index,
            offset,
            length: self.split_size.min(self.size - offset),
        })
    }

    /// Copies the bytes of `range` into a temp file under `temp_dir`.
    pub async fn read(
        &self,
        range: &SplitRange,
        temp_dir: &Path,
        name: &str,
    ) -> AppResult<ContentBuffer> {
        let mut file = File::open(&self.source).await?;
        file.seek(SeekFrom::Start(range.offset)).await?;
        let mut limited = file.take(range.length);
        ContentBuffer::from_reader(temp_dir, name, range.length, &mut limited).await
    }
}

/// One split ready to leave this agent.
#[derive(Debug)]
pub struct SplitUpload {
    pub session_id: String,
    pub index: usize,
    pub destination: ResourceUri,
    pub content: ContentBuffer,
}

/// Where split workers deliver their splits.
pub trait SplitSink: Send + Sync + 'static {
    fn upload(&self, split: SplitUpload) -> impl Future<Output = AppResult<()>> + Send;
}

/// Uploads every split over its own connection to `addr`.
#[derive(Debug)]
pub struct RemoteSplitSink<C> {
    connector: Arc<C>,
    addr: AgentAddr,
}

impl<C: AgentConnector> RemoteSplitSink<C> {
    pub fn new(connector: Arc<C>, addr: AgentAddr) -> Self {
        RemoteSplitSink { connector, addr }
    }
}

impl<C: AgentConnector> SplitSink for RemoteSplitSink<C> {
    async fn upload(&self, split: SplitUpload) -> AppResult<()> {
        let mut client = self.connector.connect(&self.addr).await?;
        let mut request = Message::new(Command::Put, split.destination.to_string())
            .with_header(headers::SESSION_ID, split.session_id)?;
        request.set_content(split.content);
        client.request(request).await?;
        client.close().await
    }
}

/// Client side of large file uploads.
#[derive(Debug)]
pub struct ParallelUploader<C> {
    connector: Arc<C>,
}

impl<C: AgentConnector> ParallelUploader<C> {
    pub fn new(connector: Arc<C>) -> Self {
        ParallelUploader { connector }
    }

    /// Uploads `local` to `destination` on the agent behind `client`. Files
    /// above the large file threshold go through split upload and merge.
    pub async fn put(
        &self,
        client: &mut AgentClient,
        local: &Path,
        destination: &ResourceUri,
    ) -> AppResult<Message> {
        let size = fs::metadata(local).await?.len();
        if size <= self.connector.config().transfer.large_file_threshold {
            let content = ContentBuffer::adopt(local).await?;
            return client.put(content, destination).await;
        }
        let sink = Arc::new(RemoteSplitSink::new(
            self.connector.clone(),
            client.addr().clone(),
        ));
        self.upload_with(client, local, destination, sink).await
    }

    /// Split upload through `sink`, then a merge request over `client`.
    /// The first failing worker aborts all others and no merge is sent;
    /// splits already delivered are left to the session's expiry.
    pub async fn upload_with<K: SplitSink>(
        &self,
        client: &mut AgentClient,
        local: &Path,
        destination: &ResourceUri,
        sink: Arc<K>,
    ) -> AppResult<Message> {
        let config = self.connector.config().clone();
        if destination.options.on_exist == OnExist::Fail
            && client.exist(destination).await?.is_some()
        {
            return Err(AppError::response(
                ResponseCode::AlreadyExist,
                format!("{} already exists on {}", destination.path, client.addr()),
            ));
        }

        let size = fs::metadata(local).await?.len();
        let count = worker_count(
            size,
            config.transfer.min_chunk_size,
            config.transfer.max_workers,
        );
        let session_id = client.open_session().await?;
        let tag = Uuid::new_v4().simple().to_string();
        info!(
            "uploading {} ({} bytes) to {} in {} splits, session {}",
            local.display(),
            size,
            destination.path,
            count,
            session_id
        );

        let reader = Arc::new(SplitReader::new(local, size, count));
        let parent = destination
            .path
            .rsplit_once('/')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default();
        let split_options = UriOptions {
            site: destination.options.site.clone(),
            delete_on_exit: true,
            on_exist: OnExist::Overwrite,
            ..Default::default()
        };
        let file_name = destination.file_name().to_string();
        let temp_dir = config.temp_dir();

        let mut workers = JoinSet::new();
        for _ in 0..count {
            let reader = reader.clone();
            let sink = sink.clone();
            let session_id = session_id.clone();
            let temp_dir = temp_dir.clone();
            let name_prefix = file_name.clone();
            let tag = tag.clone();
            let split_options = split_options.clone();
            let parent = parent.clone();
            workers.spawn(async move {
                let range = reader.next_split().ok_or_else(|| {
                    AppError::IllegalState("more split workers than splits".to_string())
                })?;
                let name = split_name(&name_prefix, &tag, range.index);
                let content = reader.read(&range, &temp_dir, &name).await?;
                sink.upload(SplitUpload {
                    session_id,
                    index: range.index,
                    destination: ResourceUri::local(format!("{}/{}", parent, name))
                        .with_options(split_options),
                    content,
                })
                .await?;
                debug!("split {} ({} bytes) delivered", name, range.length);
                Ok::<String, AppError>(name)
            });
        }

        let mut names = Vec::with_capacity(count);
        while let Some(joined) = workers.join_next().await {
            match joined.map_err(AppError::from).and_then(|uploaded| uploaded) {
                Ok(name) => names.push(name),
                Err(e) => {
                    workers.abort_all();
                    warn!(
                        "split upload of {} failed, aborting: {}",
                        local.display(),
                        e
                    );
                    return Err(e.or_code(ResponseCode::TransferFailed));
                }
            }
        }
        client.merge(destination, &session_id, &names).await
    }
}
