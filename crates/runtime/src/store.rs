//! Model asset store
//!
//! Local storage for model assets and the downloader that fills it. A
//! model directory holds the model manifest, the weight-shard index, the
//! tokenizer files, and the shards themselves. Downloads are planned from
//! the manifest and index, skip files that are already present, and report
//! progress through an event channel. Fetching goes through the `Fetcher`
//! capability so tests can run without a network.

use async_trait::async_trait;
use inflight_common::config::{DownloadConfig, ModelRecord};
use inflight_common::error::{InflightError, Result};
use inflight_common::metrics::METRICS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-model manifest filename
pub const MODEL_CONFIG_FILENAME: &str = "mlc-chat-config.json";

/// Weight-shard index filename
pub const PARAMS_CONFIG_FILENAME: &str = "ndarray-cache.json";

/// Path suffix between a model's base URL and its files
pub const MODEL_URL_SUFFIX: &str = "/resolve/main/";

/// Per-model manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    /// Tokenizer files the model needs locally
    pub tokenizer_files: Vec<String>,

    /// Engine library descriptor, when the manifest carries one
    #[serde(default)]
    pub model_lib: Option<String>,

    /// Context window size in tokens
    #[serde(default)]
    pub context_window_size: Option<u32>,

    /// Prefill chunk size in tokens
    #[serde(default)]
    pub prefill_chunk_size: Option<u32>,
}

/// Weight-shard index
#[derive(Debug, Clone, Deserialize)]
pub struct ParamsIndex {
    /// Shard records
    pub records: Vec<ParamsRecord>,
}

/// One weight shard
#[derive(Debug, Clone, Deserialize)]
pub struct ParamsRecord {
    /// Shard path relative to the model directory
    #[serde(rename = "dataPath")]
    pub data_path: String,
}

/// Progress events emitted while a model download runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Download planned; `total` files are needed overall
    Started { total: usize },

    /// `completed` of `total` files are present locally
    Progress { completed: usize, total: usize },

    /// All files are present
    Completed,

    /// The download failed
    Failed { message: String },
}

/// One pending file download
#[derive(Debug, Clone)]
struct DownloadTask {
    url: String,
    dest: PathBuf,
}

/// Capability for fetching a remote file to a local path
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` into `dest`, creating parent directories as needed
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// HTTP fetcher streaming response bodies to disk
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a timeout sized for large model shards
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3600))
            .build()
            .map_err(|e| InflightError::download(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| InflightError::download(format!("No parent dir for {}", dest.display())))?;
        tokio::fs::create_dir_all(parent).await?;

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InflightError::download(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(InflightError::download(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        // Stream into a temp file, then rename into place
        let temp_path = parent.join(format!(".{}.part", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&temp_path).await?;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| InflightError::download(format!("GET {} read error: {}", url, e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tokio::fs::rename(&temp_path, dest).await?;
        debug!("Fetched {} -> {}", url, dest.display());
        Ok(())
    }
}

/// Local model asset store and downloader
pub struct ModelStore {
    /// Directory all model directories live under
    root: PathBuf,

    /// Remote fetch capability
    fetcher: Arc<dyn Fetcher>,

    /// Maximum concurrent file downloads per model
    max_concurrent: usize,
}

impl ModelStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>, config: &DownloadConfig) -> Self {
        Self {
            root: root.into(),
            fetcher,
            max_concurrent: config.max_concurrent,
        }
    }

    /// Directory holding a model's assets
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(model_id)
    }

    /// Make sure every asset of `record` is present locally
    ///
    /// Plans the download from the model manifest and the weight-shard
    /// index, skips files that already exist, and fetches the rest with
    /// bounded concurrency. Progress is reported on `progress` when given.
    /// Returns the model directory. Idempotent.
    pub async fn ensure_model(
        &self,
        record: &ModelRecord,
        progress: Option<UnboundedSender<DownloadEvent>>,
    ) -> Result<PathBuf> {
        METRICS.store.downloads_total.inc();

        match self.ensure_model_inner(record, &progress).await {
            Ok(dir) => {
                emit(&progress, DownloadEvent::Completed);
                Ok(dir)
            }
            Err(e) => {
                METRICS.store.download_failures_total.inc();
                emit(
                    &progress,
                    DownloadEvent::Failed {
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn ensure_model_inner(
        &self,
        record: &ModelRecord,
        progress: &Option<UnboundedSender<DownloadEvent>>,
    ) -> Result<PathBuf> {
        let dir = self.model_dir(&record.model_id);
        tokio::fs::create_dir_all(&dir).await?;

        let manifest = self.ensure_manifest(record, &dir).await?;
        let index = self.ensure_params_index(record, &dir).await?;

        let (tasks, mut completed, total) = plan(record, &dir, &manifest, &index);
        emit(progress, DownloadEvent::Started { total });
        emit(progress, DownloadEvent::Progress { completed, total });

        if tasks.is_empty() {
            return Ok(dir);
        }

        info!(
            "Downloading {} of {} files for model {}",
            tasks.len(),
            total,
            record.model_id
        );

        let mut pending = tasks.into_iter();
        let mut workers: JoinSet<Result<()>> = JoinSet::new();

        loop {
            while workers.len() < self.max_concurrent {
                let Some(task) = pending.next() else { break };
                let fetcher = Arc::clone(&self.fetcher);
                workers.spawn(async move { fetcher.fetch(&task.url, &task.dest).await });
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            joined.map_err(|e| InflightError::internal(format!("download task panicked: {}", e)))??;

            completed += 1;
            METRICS.store.files_fetched_total.inc();
            emit(progress, DownloadEvent::Progress { completed, total });
        }

        Ok(dir)
    }

    async fn ensure_manifest(&self, record: &ModelRecord, dir: &Path) -> Result<ModelManifest> {
        let path = dir.join(MODEL_CONFIG_FILENAME);
        if !path.exists() {
            self.fetcher
                .fetch(&file_url(record, MODEL_CONFIG_FILENAME), &path)
                .await?;
        }

        let content = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&content).map_err(|e| {
            InflightError::download(format!("Bad manifest for {}: {}", record.model_id, e))
        })
    }

    async fn ensure_params_index(&self, record: &ModelRecord, dir: &Path) -> Result<ParamsIndex> {
        let path = dir.join(PARAMS_CONFIG_FILENAME);
        if !path.exists() {
            self.fetcher
                .fetch(&file_url(record, PARAMS_CONFIG_FILENAME), &path)
                .await?;
        }

        let content = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&content).map_err(|e| {
            InflightError::download(format!("Bad params index for {}: {}", record.model_id, e))
        })
    }

    /// Delete every model directory, returning how many were removed
    pub async fn delete_all(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }

        info!("Deleted {} model directories", removed);
        Ok(removed)
    }
}

/// Build the remote URL of one model file
fn file_url(record: &ModelRecord, filename: &str) -> String {
    format!("{}{}{}", record.model_url, MODEL_URL_SUFFIX, filename)
}

/// Index needed files against what is already on disk
fn plan(
    record: &ModelRecord,
    dir: &Path,
    manifest: &ModelManifest,
    index: &ParamsIndex,
) -> (Vec<DownloadTask>, usize, usize) {
    let needed = manifest
        .tokenizer_files
        .iter()
        .map(String::as_str)
        .chain(index.records.iter().map(|r| r.data_path.as_str()));

    let mut tasks = Vec::new();
    let mut present = 0;
    let mut total = 0;

    for filename in needed {
        total += 1;
        let dest = dir.join(filename);
        if dest.exists() {
            present += 1;
        } else {
            tasks.push(DownloadTask {
                url: file_url(record, filename),
                dest,
            });
        }
    }

    (tasks, present, total)
}

fn emit(progress: &Option<UnboundedSender<DownloadEvent>>, event: DownloadEvent) {
    if let Some(tx) = progress {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    /// In-memory fetcher backed by a url -> content map
    struct MemoryFetcher {
        files: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MemoryFetcher {
        fn new(files: Vec<(String, String)>) -> Self {
            Self {
                files: files.into_iter().collect(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().clone()
        }
    }

    #[async_trait]
    impl Fetcher for MemoryFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
            let content = self
                .files
                .get(url)
                .ok_or_else(|| InflightError::download(format!("GET {} returned 404", url)))?;

            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, content).await?;
            self.fetched.lock().push(url.to_string());
            Ok(())
        }
    }

    fn record() -> ModelRecord {
        ModelRecord {
            model_id: "phi-3".to_string(),
            model_url: "https://hub.test/phi-3".to_string(),
            model_lib: "phi3-q4f16_1".to_string(),
            estimated_vram_bytes: None,
        }
    }

    fn hub_files() -> Vec<(String, String)> {
        let base = "https://hub.test/phi-3/resolve/main/";
        vec![
            (
                format!("{}{}", base, MODEL_CONFIG_FILENAME),
                r#"{"tokenizer_files": ["tokenizer.json"], "model_lib": "phi3-q4f16_1", "context_window_size": 4096}"#.to_string(),
            ),
            (
                format!("{}{}", base, PARAMS_CONFIG_FILENAME),
                r#"{"records": [{"dataPath": "params_shard_0.bin"}, {"dataPath": "params_shard_1.bin"}]}"#.to_string(),
            ),
            (format!("{}tokenizer.json", base), "{}".to_string()),
            (format!("{}params_shard_0.bin", base), "shard0".to_string()),
            (format!("{}params_shard_1.bin", base), "shard1".to_string()),
        ]
    }

    fn store_with(fetcher: Arc<MemoryFetcher>, root: &Path) -> ModelStore {
        ModelStore::new(root, fetcher, &DownloadConfig { max_concurrent: 2 })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_ensure_model_downloads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MemoryFetcher::new(hub_files()));
        let store = store_with(Arc::clone(&fetcher), dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let model_dir = store.ensure_model(&record(), Some(tx)).await.unwrap();

        assert_eq!(model_dir, dir.path().join("phi-3"));
        assert!(model_dir.join("tokenizer.json").exists());
        assert!(model_dir.join("params_shard_0.bin").exists());
        assert!(model_dir.join("params_shard_1.bin").exists());

        let events = drain(&mut rx);
        assert_eq!(events[0], DownloadEvent::Started { total: 3 });
        assert_eq!(events[1], DownloadEvent::Progress { completed: 0, total: 3 });
        assert_eq!(*events.last().unwrap(), DownloadEvent::Completed);
        // One progress event per fetched file
        let fetched_progress = events
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Progress { .. }))
            .count();
        assert_eq!(fetched_progress, 4);
    }

    #[tokio::test]
    async fn test_ensure_model_skips_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("phi-3");
        tokio::fs::create_dir_all(&model_dir).await.unwrap();
        tokio::fs::write(model_dir.join("params_shard_0.bin"), "already here")
            .await
            .unwrap();

        let fetcher = Arc::new(MemoryFetcher::new(hub_files()));
        let store = store_with(Arc::clone(&fetcher), dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        store.ensure_model(&record(), Some(tx)).await.unwrap();

        let fetched = fetcher.fetched();
        assert!(!fetched.iter().any(|url| url.ends_with("params_shard_0.bin")));

        let events = drain(&mut rx);
        assert_eq!(events[1], DownloadEvent::Progress { completed: 1, total: 3 });
        // Pre-existing content is left alone
        let kept = tokio::fs::read_to_string(model_dir.join("params_shard_0.bin"))
            .await
            .unwrap();
        assert_eq!(kept, "already here");
    }

    #[tokio::test]
    async fn test_ensure_model_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MemoryFetcher::new(hub_files()));
        let store = store_with(Arc::clone(&fetcher), dir.path());

        store.ensure_model(&record(), None).await.unwrap();
        let after_first = fetcher.fetched().len();

        store.ensure_model(&record(), None).await.unwrap();

        assert_eq!(fetcher.fetched().len(), after_first);
    }

    #[tokio::test]
    async fn test_missing_asset_fails_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = hub_files();
        files.retain(|(url, _)| !url.ends_with("params_shard_1.bin"));

        let fetcher = Arc::new(MemoryFetcher::new(files));
        let store = store_with(fetcher, dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = store.ensure_model(&record(), Some(tx)).await;

        assert!(matches!(result, Err(InflightError::Download(_))));
        let events = drain(&mut rx);
        assert!(matches!(
            events.last().unwrap(),
            DownloadEvent::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_delete_all_models() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MemoryFetcher::new(hub_files()));
        let store = store_with(fetcher, dir.path());

        store.ensure_model(&record(), None).await.unwrap();
        assert!(dir.path().join("phi-3").exists());

        let removed = store.delete_all().await.unwrap();

        assert_eq!(removed, 1);
        assert!(!dir.path().join("phi-3").exists());
        // Nothing left to delete
        assert_eq!(store.delete_all().await.unwrap(), 0);
    }
}
