//! File-capture bridge
//!
//! Every file-producing call a sandboxed script makes (screenshot, PDF,
//! video) ends up here: the script-supplied path is used only to derive a
//! display name and extension, the bytes are written to a bridge-chosen
//! location under the run's private asset directory, and a descriptor is
//! emitted on the run's capture channel. When the run completes, the
//! listener waits for asynchronous writers to settle, then publishes each
//! file through a [`FileStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use playpen_common::{CapturedFile, RunId};

use crate::error::CaptureError;

/// Poll interval for the file-size stabilization wait.
const SETTLE_TICK: Duration = Duration::from_millis(120);

/// A file staged into the asset directory, not yet published
#[derive(Debug, Clone)]
struct StagedFile {
    /// Display name: the path string the script supplied
    file_name: String,
    extension: String,
    staged_path: PathBuf,
}

/// Emitting half of a run's capture channel.
///
/// One bridge exists per run; its channel is private to the run, so no
/// listener bookkeeping is shared across runs.
#[derive(Clone)]
pub struct CaptureBridge {
    run: RunId,
    asset_dir: PathBuf,
    tx: mpsc::UnboundedSender<StagedFile>,
}

impl CaptureBridge {
    /// Create the bridge/listener pair for one run.
    pub fn channel(run: RunId, asset_dir: impl Into<PathBuf>) -> (CaptureBridge, CaptureListener) {
        let asset_dir = asset_dir.into();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CaptureBridge {
                run,
                asset_dir: asset_dir.clone(),
                tx,
            },
            CaptureListener {
                run,
                asset_dir,
                rx,
                settle: Duration::from_secs(10),
            },
        )
    }

    /// The run's private asset directory. Engines that write files on their
    /// own (video recorders) are pointed at it; the listener picks those
    /// files up at finalize time.
    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    /// Persist captured bytes under a bridge-chosen name and emit the
    /// descriptor. `original_path` never becomes a write location.
    pub async fn capture(
        &self,
        original_path: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, CaptureError> {
        let extension = extension_of(original_path);
        let staged_path = self
            .asset_dir
            .join(format!("{}{}", uuid::Uuid::new_v4(), extension));

        tokio::fs::write(&staged_path, bytes)
            .await
            .map_err(CaptureError::Stage)?;

        debug!(
            run_id = %self.run,
            original = original_path,
            staged = %staged_path.display(),
            size = bytes.len(),
            "captured file"
        );

        let _ = self.tx.send(StagedFile {
            file_name: original_path.to_string(),
            extension,
            staged_path: staged_path.clone(),
        });
        Ok(staged_path)
    }
}

/// Collecting half of a run's capture channel. Consumed by `finalize`, so
/// deregistration happens exactly once by construction.
pub struct CaptureListener {
    run: RunId,
    asset_dir: PathBuf,
    rx: mpsc::UnboundedReceiver<StagedFile>,
    settle: Duration,
}

impl CaptureListener {
    /// Bound the stabilization wait (tests shrink it).
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Wait for outstanding writes to settle, then publish every captured
    /// file (staged descriptors plus any file an engine dropped into the
    /// asset directory on its own) through the store.
    pub async fn finalize(
        mut self,
        store: &dyn FileStore,
    ) -> Result<Vec<CapturedFile>, CaptureError> {
        wait_for_stable_sizes(&self.asset_dir, self.settle).await?;

        let mut staged = Vec::new();
        while let Ok(file) = self.rx.try_recv() {
            staged.push(file);
        }

        // Pick up unstaged files (e.g. a recorder writing straight into the
        // asset dir) under their on-disk names.
        let known: Vec<PathBuf> = staged.iter().map(|f| f.staged_path.clone()).collect();
        let mut dir = tokio::fs::read_dir(&self.asset_dir)
            .await
            .map_err(CaptureError::Stage)?;
        while let Some(entry) = dir.next_entry().await.map_err(CaptureError::Stage)? {
            let path = entry.path();
            if path.is_file() && !known.contains(&path) {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                staged.push(StagedFile {
                    extension: extension_of(&file_name),
                    file_name,
                    staged_path: path,
                });
            }
        }

        let mut published = Vec::with_capacity(staged.len());
        for file in staged {
            let captured = store
                .publish(&file.staged_path, &file.file_name, &file.extension)
                .await?;
            published.push(captured);
        }

        if !published.is_empty() {
            info!(run_id = %self.run, files = published.len(), "published captured files");
        }
        Ok(published)
    }
}

/// Poll directory entry sizes until two consecutive reads agree and no file
/// is empty. Producers (PDF renderers, video encoders) keep writing after
/// the triggering call returns; this is the wait that makes collection safe.
async fn wait_for_stable_sizes(dir: &Path, bound: Duration) -> Result<(), CaptureError> {
    let deadline = tokio::time::Instant::now() + bound;
    let mut previous = dir_sizes(dir).await?;
    loop {
        tokio::time::sleep(SETTLE_TICK).await;
        let current = dir_sizes(dir).await?;
        let changed = previous != current || current.values().any(|size| *size == 0);
        if !changed {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(dir = %dir.display(), "file stabilization wait hit its bound");
            return Ok(());
        }
        previous = current;
    }
}

async fn dir_sizes(dir: &Path) -> Result<HashMap<PathBuf, u64>, CaptureError> {
    let mut sizes = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(CaptureError::Stage)?;
    while let Some(entry) = entries.next_entry().await.map_err(CaptureError::Stage)? {
        let meta = entry.metadata().await.map_err(CaptureError::Stage)?;
        if meta.is_file() {
            sizes.insert(entry.path(), meta.len());
        }
    }
    Ok(sizes)
}

/// Extension including the leading dot, or empty when there is none.
fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Destination for captured files once a run completes
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Publish one staged file and return its public descriptor.
    async fn publish(
        &self,
        staged: &Path,
        file_name: &str,
        extension: &str,
    ) -> Result<CapturedFile, CaptureError>;
}

/// Store that moves captured files into a locally served public directory
/// and deletes them after a retention window.
pub struct LocalFileStore {
    public_dir: PathBuf,
    url_prefix: String,
    retention: Option<Duration>,
}

impl LocalFileStore {
    pub fn new(public_dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            public_dir: public_dir.into(),
            url_prefix: url_prefix.into(),
            retention: Some(Duration::from_secs(60)),
        }
    }

    /// Override the retention window; `None` disables deletion.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn publish(
        &self,
        staged: &Path,
        file_name: &str,
        extension: &str,
    ) -> Result<CapturedFile, CaptureError> {
        let object_name = staged
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CaptureError::Publish("staged file has no name".into()))?;
        let target = self.public_dir.join(&object_name);

        tokio::fs::create_dir_all(&self.public_dir)
            .await
            .map_err(CaptureError::Stage)?;
        // Copy rather than rename: the asset dir is usually on a different
        // filesystem (tmpfs) than the public dir.
        tokio::fs::copy(staged, &target)
            .await
            .map_err(CaptureError::Stage)?;

        if let Some(retention) = self.retention {
            let doomed = target.clone();
            tokio::spawn(async move {
                tokio::time::sleep(retention).await;
                debug!(file = %doomed.display(), "removing expired captured file");
                if let Err(e) = tokio::fs::remove_file(&doomed).await {
                    warn!(file = %doomed.display(), error = %e, "could not remove expired file");
                }
            });
        }

        Ok(CapturedFile {
            file_name: file_name.to_string(),
            extension: extension.to_string(),
            public_url: format!("{}/{}", self.url_prefix.trim_end_matches('/'), object_name),
        })
    }
}

/// Store that uploads captured files to the shared file service and returns
/// the service-assigned public URLs.
pub struct HttpFileStore {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpFileStore {
    pub fn new(file_service_url: Url) -> Result<Self, CaptureError> {
        let endpoint = file_service_url
            .join("api/v1/file/upload")
            .map_err(|e| CaptureError::Publish(format!("invalid file service url: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn publish(
        &self,
        staged: &Path,
        file_name: &str,
        _extension: &str,
    ) -> Result<CapturedFile, CaptureError> {
        let content = tokio::fs::read(staged).await.map_err(CaptureError::Stage)?;
        let part = reqwest::multipart::Part::bytes(content)
            .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file-0", part);

        let resp = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| CaptureError::Publish(format!("could not upload file: {e}")))?;
        if !resp.status().is_success() {
            return Err(CaptureError::Publish(format!(
                "upload returned status {}",
                resp.status()
            )));
        }

        let mut files: Vec<CapturedFile> = resp
            .json()
            .await
            .map_err(|e| CaptureError::Publish(format!("malformed upload response: {e}")))?;
        files
            .pop()
            .ok_or_else(|| CaptureError::Publish("upload response contained no files".into()))
    }
}
