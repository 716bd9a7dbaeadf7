//! Prioritized pre-download queue.
//!
//! Bounded to 50 unique wallpaper ids. Priorities come from the caller's
//! ranked list (`1 − index/len`), so the best-ranked id gets 1.0 and the
//! tail fades toward zero. Retry accounting is monotone per id and capped;
//! permanently failed items stay visible rather than vanishing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Queue capacity.
pub const MAX_QUEUE: usize = 50;

/// Retries per item before it is considered permanently failed.
pub const MAX_RETRIES: u8 = 3;

const QUEUE_VERSION: u32 = 1;
const BACKOFF_BASE: Duration = Duration::from_secs(60);
const BACKOFF_CAP: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub wallpaper_id: String,
    /// In [0, 1]; higher downloads sooner.
    pub priority: f32,
    pub downloaded: bool,
    pub retry_count: u8,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct QueueData {
    version: u32,
    items: Vec<QueueItem>,
}

pub struct DownloadQueue {
    data: QueueData,
    path: PathBuf,
}

impl DownloadQueue {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("queue.json");
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<QueueData>(&raw) {
                Ok(data) if data.version == QUEUE_VERSION => data,
                _ => {
                    warn!("download queue unreadable or outdated, starting empty");
                    QueueData {
                        version: QUEUE_VERSION,
                        ..Default::default()
                    }
                }
            }
        } else {
            QueueData {
                version: QUEUE_VERSION,
                ..Default::default()
            }
        };
        Ok(Self { data, path })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Replace the queue with a ranked id list. Position `i` of `len` gets
    /// priority `1 − i/len`. Download and retry state carries over for ids
    /// that survive the refill; duplicates keep their first (best) rank.
    /// The result is truncated to [`MAX_QUEUE`].
    pub fn insert_all(&mut self, ranked_ids: &[String]) {
        let len = ranked_ids.len().max(1) as f32;
        let previous: std::collections::HashMap<String, (bool, u8)> = self
            .data
            .items
            .drain(..)
            .map(|item| (item.wallpaper_id, (item.downloaded, item.retry_count)))
            .collect();

        let mut seen = std::collections::HashSet::new();
        for (index, id) in ranked_ids.iter().enumerate() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if self.data.items.len() >= MAX_QUEUE {
                break;
            }
            let (downloaded, retry_count) =
                previous.get(id).copied().unwrap_or((false, 0));
            self.data.items.push(QueueItem {
                wallpaper_id: id.clone(),
                priority: 1.0 - index as f32 / len,
                downloaded,
                retry_count,
            });
        }
    }

    /// Up to `n` undownloaded items with retries left, priority descending,
    /// id ascending on ties.
    pub fn top_undownloaded(&self, n: usize) -> Vec<&QueueItem> {
        let mut items: Vec<&QueueItem> = self
            .data
            .items
            .iter()
            .filter(|item| !item.downloaded && item.retry_count < MAX_RETRIES)
            .collect();
        items.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.wallpaper_id.cmp(&b.wallpaper_id))
        });
        items.truncate(n);
        items
    }

    pub fn mark_downloaded(&mut self, id: &str) {
        if let Some(item) = self.get_mut(id) {
            item.downloaded = true;
        }
    }

    /// Flip an item back to pending, typically after cache eviction.
    pub fn mark_evicted(&mut self, id: &str) {
        if let Some(item) = self.get_mut(id) {
            item.downloaded = false;
        }
    }

    /// Bump the retry counter, saturating at [`MAX_RETRIES`]. Returns the
    /// new count.
    pub fn increment_retry(&mut self, id: &str) -> u8 {
        match self.get_mut(id) {
            Some(item) => {
                item.retry_count = (item.retry_count + 1).min(MAX_RETRIES);
                item.retry_count
            }
            None => 0,
        }
    }

    pub fn reset_retry(&mut self, id: &str) {
        if let Some(item) = self.get_mut(id) {
            item.retry_count = 0;
        }
    }

    /// Remove entries whose priority fell below `threshold`.
    pub fn delete_below_threshold(&mut self, threshold: f32) -> usize {
        let before = self.data.items.len();
        self.data.items.retain(|item| item.priority >= threshold);
        before - self.data.items.len()
    }

    /// Keep the `n` best-priority entries.
    pub fn keep_top_n(&mut self, n: usize) {
        self.data.items.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.wallpaper_id.cmp(&b.wallpaper_id))
        });
        self.data.items.truncate(n);
    }

    /// Exponential retry backoff: `min(60 s · 2^retry, 30 min)`.
    pub fn backoff_delay(retry_count: u8) -> Duration {
        crate::error::backoff_delay(BACKOFF_BASE, BACKOFF_CAP, retry_count as u32)
    }

    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.data.items.iter().find(|item| item.wallpaper_id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut QueueItem> {
        self.data
            .items
            .iter_mut()
            .find(|item| item.wallpaper_id == id)
    }

    pub fn len(&self) -> usize {
        self.data.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.data.items.iter()
    }

    pub fn undownloaded_count(&self) -> usize {
        self.data
            .items
            .iter()
            .filter(|item| !item.downloaded && item.retry_count < MAX_RETRIES)
            .count()
    }

    pub fn clear(&mut self) {
        self.data.items.clear();
    }
}
