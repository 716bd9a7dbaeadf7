//! Catalog of pre-embedded wallpapers.
//!
//! The catalog is an in-memory index over a versioned JSON manifest served
//! from a content CDN. A sync replaces the whole catalog; readers hold `Arc`
//! snapshots published through [`CatalogHandle`], so a refresh never blocks
//! a ranking pass in flight.

use crate::error::{backoff_delay, EngineError};
use crate::vecops;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

const FETCH_ATTEMPTS: u32 = 3;
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Where a wallpaper was originally published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Github,
    Bing,
    #[serde(other)]
    #[default]
    Unknown,
}

impl Source {
    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Source::Github => "github",
            Source::Bing => "bing",
            Source::Unknown => "unknown",
        }
    }
}

/// One manifest row. Unknown fields are ignored; `contrast` defaults to 50
/// and `category` to the empty string per the compatibility rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub url: String,
    #[serde(default, alias = "thumbnail_url")]
    pub thumbnail: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default, alias = "palette")]
    pub colors: Vec<String>,
    #[serde(default = "default_tone")]
    pub brightness: i32,
    #[serde(default)]
    pub contrast: Option<i32>,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub attribution: String,
}

fn default_tone() -> i32 {
    50
}

/// The versioned manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub model_version: String,
    pub embedding_dim: usize,
    #[serde(default)]
    pub total_wallpapers: usize,
    pub wallpapers: Vec<ManifestEntry>,
}

/// Immutable per-wallpaper metadata, embedding re-normalized on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallpaperMeta {
    pub id: String,
    pub url: String,
    pub thumbnail: String,
    pub source: Source,
    /// Short lowercase category; may be empty.
    pub category: String,
    /// Up to five hex colors, dominant first.
    pub palette: Vec<String>,
    /// 0..=100
    pub brightness: i32,
    /// 0..=100
    pub contrast: i32,
    pub embedding: Vec<f32>,
    pub resolution: String,
    pub attribution: String,
}

impl WallpaperMeta {
    fn from_entry(entry: ManifestEntry) -> Self {
        Self {
            id: entry.id,
            url: entry.url,
            thumbnail: entry.thumbnail,
            source: entry.source,
            category: entry.category.trim().to_lowercase(),
            palette: entry.colors.into_iter().take(5).collect(),
            brightness: entry.brightness.clamp(0, 100),
            contrast: entry.contrast.unwrap_or(50).clamp(0, 100),
            embedding: vecops::normalize(&entry.embedding),
            resolution: entry.resolution,
            attribution: entry.attribution,
        }
    }
}

/// In-memory index over the manifest.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<WallpaperMeta>,
    by_id: HashMap<String, usize>,
    pub version: u32,
    pub model_version: String,
    pub embedding_dim: usize,
}

impl Catalog {
    /// Build from a parsed manifest, replacing any previous contents.
    /// Entries whose embedding length differs from `embedding_dim` are
    /// dropped with a warning rather than poisoning the ranking pass.
    pub fn from_manifest(manifest: Manifest) -> Self {
        let dim = manifest.embedding_dim;
        let mut entries = Vec::with_capacity(manifest.wallpapers.len());
        for entry in manifest.wallpapers {
            if entry.embedding.len() != dim {
                warn!(
                    id = %entry.id,
                    got = entry.embedding.len(),
                    want = dim,
                    "dropping manifest entry with wrong embedding dimension"
                );
                continue;
            }
            entries.push(WallpaperMeta::from_entry(entry));
        }

        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, w)| (w.id.clone(), i))
            .collect();

        Self {
            entries,
            by_id,
            version: manifest.version,
            model_version: manifest.model_version,
            embedding_dim: dim,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&WallpaperMeta> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &WallpaperMeta> {
        self.entries.iter()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self
            .entries
            .iter()
            .map(|w| w.category.clone())
            .filter(|c| !c.is_empty())
            .collect();
        cats.sort();
        cats.dedup();
        cats
    }
}

/// Shared catalog cell. A refresh builds the new catalog off to the side and
/// publishes it with a pointer swap; readers clone the `Arc` and keep an
/// immutable snapshot for the duration of a ranking pass.
#[derive(Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn empty() -> Self {
        Self::new(Catalog::default())
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn publish(&self, catalog: Catalog) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(catalog);
    }
}

/// On-disk manifest snapshot so rotation works offline after the first sync.
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("catalog.json"),
        }
    }

    pub fn load(&self) -> Result<Option<Manifest>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let manifest =
            serde_json::from_str(&raw).context("failed to parse stored catalog")?;
        Ok(Some(manifest))
    }

    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(manifest)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

fn classify_fetch_error(err: &reqwest::Error) -> EngineError {
    if let Some(status) = err.status() {
        EngineError::ManifestHttp(status.as_u16())
    } else {
        EngineError::ManifestFetch(err.to_string())
    }
}

/// Fetch and parse the manifest with exponential backoff on network errors
/// and 5xx. 4xx and parse failures are terminal.
pub async fn fetch_manifest(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<Manifest, EngineError> {
    let mut last_err = EngineError::ManifestFetch("no attempt made".into());

    for attempt in 0..FETCH_ATTEMPTS {
        if attempt > 0 {
            let delay = backoff_delay(BACKOFF_BASE, BACKOFF_CAP, attempt - 1);
            debug!(?delay, attempt, "manifest fetch backing off");
            tokio::time::sleep(delay).await;
        }

        let response = match tokio::time::timeout(FETCH_TIMEOUT, client.get(url).send()).await
        {
            Err(_) => {
                last_err = EngineError::ManifestFetch("attempt timed out".into());
                continue;
            }
            Ok(Err(e)) => {
                last_err = classify_fetch_error(&e);
                if !last_err.is_retryable() {
                    return Err(last_err);
                }
                continue;
            }
            Ok(Ok(resp)) => resp,
        };

        let status = response.status();
        if !status.is_success() {
            last_err = EngineError::ManifestHttp(status.as_u16());
            if !last_err.is_retryable() {
                return Err(last_err);
            }
            continue;
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                last_err = EngineError::ManifestFetch(e.to_string());
                continue;
            }
        };

        return parse_manifest(&body);
    }

    Err(last_err)
}

/// Parse a manifest body. Failures are terminal and carry version context
/// when the version field itself was readable.
pub fn parse_manifest(body: &str) -> std::result::Result<Manifest, EngineError> {
    match serde_json::from_str::<Manifest>(body) {
        Ok(manifest) => {
            info!(
                version = manifest.version,
                wallpapers = manifest.wallpapers.len(),
                model = %manifest.model_version,
                "manifest parsed"
            );
            Ok(manifest)
        }
        Err(e) => {
            // Best effort: recover the version for the error context.
            let version = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("version").and_then(|x| x.as_u64()))
                .map(|v| v as u32);
            Err(EngineError::ManifestParse {
                version,
                message: e.to_string(),
            })
        }
    }
}
