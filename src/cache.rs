//! On-disk image cache with a byte budget.
//!
//! Files are `{id}.img`, with an optional `{id}_cropped.img` variant
//! precomputed to the screen aspect so previews match what gets applied.
//! Insertion checks the budget and evicts oldest-mtime files down to 80 %
//! of it; evicted ids are reported so the queue can flip `downloaded`.

use anyhow::{Context, Result};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Default on-disk budget: 450 MiB.
pub const DEFAULT_BUDGET_BYTES: u64 = 450 * 1024 * 1024;

/// Eviction drains the cache to this fraction of the budget.
const EVICT_TO_FRACTION: f64 = 0.8;

const IMAGE_SUFFIX: &str = ".img";
const CROPPED_SUFFIX: &str = "_cropped.img";

pub struct CacheManager {
    dir: PathBuf,
    budget_bytes: u64,
    /// Exclusive over the whole directory for the eviction window; single
    /// downloads hold it only for their own commit.
    lock: Mutex<()>,
}

impl CacheManager {
    pub fn new(dir: PathBuf, budget_bytes: u64) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
        Ok(Self {
            dir,
            budget_bytes,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{IMAGE_SUFFIX}"))
    }

    pub fn cropped_path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{CROPPED_SUFFIX}"))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    /// Preferred file to hand to the apply primitive: the cropped variant
    /// when it exists, the original otherwise.
    pub fn display_path(&self, id: &str) -> Option<PathBuf> {
        let cropped = self.cropped_path_for(id);
        if cropped.exists() {
            return Some(cropped);
        }
        let original = self.path_for(id);
        original.exists().then_some(original)
    }

    /// Total bytes currently cached.
    pub fn total_bytes(&self) -> u64 {
        WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Make room for `incoming_bytes`, evicting oldest-mtime files until the
    /// existing contents fit in 80 % of the budget. Returns the ids whose
    /// files were removed. After this returns, cache bytes ≤ budget.
    pub fn ensure_room(&self, incoming_bytes: u64) -> Vec<String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let total = self.total_bytes();
        if total + incoming_bytes <= self.budget_bytes {
            return Vec::new();
        }

        let target = (self.budget_bytes as f64 * EVICT_TO_FRACTION) as u64;
        let mut files: Vec<(PathBuf, u64, std::time::SystemTime)> = WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let mtime = meta.modified().ok()?;
                Some((e.path().to_path_buf(), meta.len(), mtime))
            })
            .collect();
        files.sort_by_key(|(_, _, mtime)| *mtime);

        let mut remaining = total;
        let mut evicted = Vec::new();
        for (path, len, _) in files {
            if remaining <= target {
                break;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    remaining = remaining.saturating_sub(len);
                    if let Some(id) = id_from_path(&path) {
                        debug!(id = %id, "evicted cached wallpaper");
                        evicted.push(id);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "eviction failed"),
            }
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), "cache evicted to budget");
        }
        evicted.sort();
        evicted.dedup();
        evicted
    }

    /// Move a fully-written temp file into place as `{id}.img`. The caller
    /// is expected to have called [`CacheManager::ensure_room`] first; the
    /// rename itself is atomic on the same filesystem.
    pub fn commit(&self, id: &str, temp: &Path) -> Result<PathBuf> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let dest = self.path_for(id);
        fs::rename(temp, &dest)
            .with_context(|| format!("failed to move download into cache for {id}"))?;
        Ok(dest)
    }

    /// Remove an id's files (original and cropped variant).
    pub fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = false;
        for path in [self.path_for(id), self.cropped_path_for(id)] {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Precompute the screen-aspect center crop so preview == applied.
    pub fn prepare_cropped(
        &self,
        id: &str,
        img: &DynamicImage,
        screen: (u32, u32),
    ) -> Result<PathBuf> {
        let cropped = center_crop_to_aspect(img, screen);
        let dest = self.cropped_path_for(id);
        cropped
            .save_with_format(&dest, image::ImageFormat::Png)
            .with_context(|| format!("failed to write cropped variant for {id}"))?;
        Ok(dest)
    }

    /// Ids with a cached original, for candidate building.
    pub fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_str()?;
                if name.ends_with(CROPPED_SUFFIX) {
                    None
                } else {
                    name.strip_suffix(IMAGE_SUFFIX).map(str::to_owned)
                }
            })
            .collect();
        ids.sort();
        ids
    }
}

/// Strip cache suffixes back to the wallpaper id.
fn id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if let Some(stem) = name.strip_suffix(CROPPED_SUFFIX) {
        return Some(stem.to_string());
    }
    name.strip_suffix(IMAGE_SUFFIX).map(str::to_owned)
}

/// Cover-fit center crop to the screen aspect ratio.
fn center_crop_to_aspect(img: &DynamicImage, screen: (u32, u32)) -> DynamicImage {
    let (sw, sh) = (screen.0.max(1), screen.1.max(1));
    let (w, h) = (img.width().max(1), img.height().max(1));

    let screen_aspect = sw as f64 / sh as f64;
    let image_aspect = w as f64 / h as f64;

    let (crop_w, crop_h) = if image_aspect > screen_aspect {
        (((h as f64) * screen_aspect).round() as u32, h)
    } else {
        (w, ((w as f64) / screen_aspect).round() as u32)
    };
    let crop_w = crop_w.clamp(1, w);
    let crop_h = crop_h.clamp(1, h);
    let x = (w - crop_w) / 2;
    let y = (h - crop_h) / 2;
    img.crop_imm(x, y, crop_w, crop_h)
}
