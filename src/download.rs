//! Concurrent wallpaper downloads.
//!
//! Fetches stream to a content-hashed temp file, fsync, then rename into the
//! cache, so a crash never leaves a half-written `{id}.img`. Concurrency is
//! bounded by a semaphore; cancellation is honored between chunks and does
//! not count as a retry. Failed items back off exponentially inside the
//! process and stay in the queue for visibility.

use crate::cache::CacheManager;
use crate::error::EngineError;
use crate::queue::DownloadQueue;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Default in-flight fetch bound.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Per-file fetch timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Sentinel failure message for cooperative cancellation; a cancelled fetch
/// must not count as a retry.
const CANCEL_MSG: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub url: String,
}

/// Foreground progress surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: usize,
    pub failed: usize,
    pub total: usize,
}

/// What a batch accomplished.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub downloaded: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

enum FetchOutcome {
    Done,
    Failed(String),
    Cancelled,
}

pub struct Downloader {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    /// In-memory retry ledger: earliest next attempt per id.
    backoff_until: Mutex<HashMap<String, Instant>>,
}

impl Downloader {
    pub fn new(concurrency: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("driftwall/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            backoff_until: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an item's backoff window has elapsed.
    pub async fn eligible(&self, id: &str) -> bool {
        let ledger = self.backoff_until.lock().await;
        ledger.get(id).map(|t| *t <= Instant::now()).unwrap_or(true)
    }

    /// Fetch one wallpaper into the cache, returning the cached path and the
    /// ids evicted to make room. Timeout, IO and HTTP failures surface as
    /// [`EngineError::Download`]; cancellation never increments retries, the
    /// caller sees `Cancelled` via the batch report instead.
    pub async fn fetch_into_cache(
        &self,
        task: &DownloadTask,
        cache: &CacheManager,
        cancel: &AtomicBool,
    ) -> Result<(PathBuf, Vec<String>), EngineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::Download {
                id: task.id.clone(),
                message: "downloader shut down".into(),
            })?;

        if cancel.load(Ordering::SeqCst) {
            return Err(EngineError::Download {
                id: task.id.clone(),
                message: CANCEL_MSG.into(),
            });
        }

        let tmp = cache.dir().join(format!(".{}.part", content_key(&task.url)));
        let fetch = self.stream_to_file(task, &tmp, cancel);
        let written = match tokio::time::timeout(FETCH_TIMEOUT, fetch).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(EngineError::Download {
                    id: task.id.clone(),
                    message: "fetch timed out".into(),
                });
            }
        };

        let evicted = cache.ensure_room(written);
        let path = cache.commit(&task.id, &tmp).map_err(|e| EngineError::Download {
            id: task.id.clone(),
            message: e.to_string(),
        })?;
        debug!(id = %task.id, bytes = written, "download cached");
        Ok((path, evicted))
    }

    async fn stream_to_file(
        &self,
        task: &DownloadTask,
        tmp: &std::path::Path,
        cancel: &AtomicBool,
    ) -> Result<u64, EngineError> {
        let err = |message: String| EngineError::Download {
            id: task.id.clone(),
            message,
        };

        let response = self
            .client
            .get(&task.url)
            .send()
            .await
            .map_err(|e| err(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(err(format!("HTTP {status}")));
        }

        let mut file = tokio::fs::File::create(tmp)
            .await
            .map_err(|e| err(e.to_string()))?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                return Err(err(CANCEL_MSG.into()));
            }
            let chunk = chunk.map_err(|e| err(e.to_string()))?;
            file.write_all(&chunk).await.map_err(|e| err(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.sync_all().await.map_err(|e| err(e.to_string()))?;
        Ok(written)
    }

    /// Run a batch of downloads with shared concurrency, updating the queue
    /// and streaming `{downloaded, failed, total}` progress. Items still in
    /// their backoff window are skipped without counting as failures.
    pub async fn run_batch(
        &self,
        tasks: Vec<DownloadTask>,
        cache: &CacheManager,
        queue: &Mutex<DownloadQueue>,
        cancel: &AtomicBool,
        progress: Option<&watch::Sender<DownloadProgress>>,
    ) -> BatchReport {
        let total = tasks.len();
        let done = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let publish = |done: usize, failed: usize| {
            if let Some(tx) = progress {
                let _ = tx.send(DownloadProgress {
                    downloaded: done,
                    failed,
                    total,
                });
            }
        };
        publish(0, 0);

        let outcomes: Vec<(String, FetchOutcome)> = futures_util::stream::iter(
            tasks.into_iter().map(|task| {
                let done = &done;
                let failed = &failed;
                async move {
                    if cancel.load(Ordering::SeqCst) {
                        return (task.id.clone(), FetchOutcome::Cancelled);
                    }
                    if !self.eligible(&task.id).await {
                        debug!(id = %task.id, "still backing off, skipped");
                        return (task.id.clone(), FetchOutcome::Cancelled);
                    }
                    match self.fetch_into_cache(&task, cache, cancel).await {
                        Ok((_, evicted)) => {
                            let mut q = queue.lock().await;
                            q.mark_downloaded(&task.id);
                            for id in &evicted {
                                q.mark_evicted(id);
                            }
                            done.fetch_add(1, Ordering::SeqCst);
                            (task.id.clone(), FetchOutcome::Done)
                        }
                        Err(EngineError::Download { message, .. }) if message == CANCEL_MSG => {
                            (task.id.clone(), FetchOutcome::Cancelled)
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                            (task.id.clone(), FetchOutcome::Failed(e.to_string()))
                        }
                    }
                }
            }),
        )
        .buffer_unordered(self.permits.available_permits().max(1))
        .inspect(|_| publish(done.load(Ordering::SeqCst), failed.load(Ordering::SeqCst)))
        .collect()
        .await;

        let mut report = BatchReport::default();
        let mut ledger = self.backoff_until.lock().await;
        let mut q = queue.lock().await;
        for (id, outcome) in outcomes {
            match outcome {
                FetchOutcome::Done => {
                    ledger.remove(&id);
                    q.reset_retry(&id);
                    report.downloaded.push(id);
                }
                FetchOutcome::Failed(message) => {
                    let retries = q.increment_retry(&id);
                    let delay = DownloadQueue::backoff_delay(retries);
                    ledger.insert(id.clone(), Instant::now() + delay);
                    if retries >= crate::queue::MAX_RETRIES {
                        warn!(id = %id, %message, "download permanently failed");
                    } else {
                        debug!(id = %id, %message, retries, "download failed, will retry");
                    }
                    report.failed.push(id);
                }
                FetchOutcome::Cancelled => {
                    report.cancelled = report.cancelled || cancel.load(Ordering::SeqCst);
                }
            }
        }
        drop(q);
        drop(ledger);

        publish(done.load(Ordering::SeqCst), failed.load(Ordering::SeqCst));
        info!(
            downloaded = report.downloaded.len(),
            failed = report.failed.len(),
            total,
            "batch download finished"
        );
        report
    }
}

/// Stable content key for temp naming: first 16 hex chars of SHA-256(url).
fn content_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_BUDGET_BYTES;

    fn task(id: &str, url: &str) -> DownloadTask {
        DownloadTask {
            id: id.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_content_key_stable_and_distinct() {
        let a = content_key("https://cdn.example/a.jpg");
        let b = content_key("https://cdn.example/b.jpg");
        assert_eq!(a, content_key("https://cdn.example/a.jpg"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_cancelled_batch_increments_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), DEFAULT_BUDGET_BYTES).unwrap();
        let queue = Mutex::new(DownloadQueue::open(dir.path()).unwrap());
        queue
            .lock()
            .await
            .insert_all(&["a".to_string(), "b".to_string()]);

        let cancel = AtomicBool::new(true);
        let downloader = Downloader::new(2);
        let report = downloader
            .run_batch(
                vec![task("a", "http://127.0.0.1:0/a.jpg")],
                &cache,
                &queue,
                &cancel,
                None,
            )
            .await;

        assert!(report.cancelled);
        assert!(report.downloaded.is_empty());
        assert!(report.failed.is_empty());
        let q = queue.lock().await;
        assert_eq!(q.get("a").unwrap().retry_count, 0, "cancel is not a retry");
    }

    #[tokio::test]
    async fn test_failed_fetch_increments_retry_and_backs_off() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), DEFAULT_BUDGET_BYTES).unwrap();
        let queue = Mutex::new(DownloadQueue::open(dir.path()).unwrap());
        queue.lock().await.insert_all(&["a".to_string()]);

        let cancel = AtomicBool::new(false);
        let downloader = Downloader::new(2);
        // Port 0 is unroutable: the connect fails without touching a network.
        let report = downloader
            .run_batch(
                vec![task("a", "http://127.0.0.1:0/a.jpg")],
                &cache,
                &queue,
                &cancel,
                None,
            )
            .await;

        assert_eq!(report.failed, vec!["a".to_string()]);
        assert_eq!(queue.lock().await.get("a").unwrap().retry_count, 1);
        assert!(
            !downloader.eligible("a").await,
            "failed item enters its backoff window"
        );
        assert!(downloader.eligible("never-seen").await);
    }

    #[tokio::test]
    async fn test_failed_item_stays_in_queue_at_retry_cap() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), DEFAULT_BUDGET_BYTES).unwrap();
        let queue = Mutex::new(DownloadQueue::open(dir.path()).unwrap());
        queue.lock().await.insert_all(&["a".to_string()]);
        // Two strikes already on the books.
        {
            let mut q = queue.lock().await;
            q.increment_retry("a");
            q.increment_retry("a");
        }

        let cancel = AtomicBool::new(false);
        let downloader = Downloader::new(1);
        // Clear the in-process ledger path by using a fresh downloader.
        let _ = downloader
            .run_batch(
                vec![task("a", "http://127.0.0.1:0/a.jpg")],
                &cache,
                &queue,
                &cancel,
                None,
            )
            .await;

        let q = queue.lock().await;
        let item = q.get("a").unwrap();
        assert_eq!(item.retry_count, crate::queue::MAX_RETRIES);
        assert!(!item.downloaded);
        // Permanently failed items are retained, not deleted.
        assert_eq!(q.len(), 1);
        assert!(q.top_undownloaded(10).is_empty());
    }

    #[tokio::test]
    async fn test_progress_channel_reports_totals() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), DEFAULT_BUDGET_BYTES).unwrap();
        let queue = Mutex::new(DownloadQueue::open(dir.path()).unwrap());
        queue
            .lock()
            .await
            .insert_all(&["a".to_string(), "b".to_string()]);

        let (tx, rx) = watch::channel(DownloadProgress::default());
        let cancel = AtomicBool::new(false);
        let downloader = Downloader::new(2);
        let _ = downloader
            .run_batch(
                vec![
                    task("a", "http://127.0.0.1:0/a.jpg"),
                    task("b", "http://127.0.0.1:0/b.jpg"),
                ],
                &cache,
                &queue,
                &cancel,
                Some(&tx),
            )
            .await;

        let last = *rx.borrow();
        assert_eq!(last.total, 2);
        assert_eq!(last.failed, 2);
        assert_eq!(last.downloaded, 0);
    }
}
