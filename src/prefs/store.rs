//! Versioned persistence for [`PreferenceData`].
//!
//! One JSON document under the data directory, carrying a schema version.
//! Older documents are migrated stepwise on load (v1..v6); readers take
//! `Arc` snapshots from an RCU-style cell while a single writer clones,
//! mutates, persists and swaps.

use super::PreferenceData;
use crate::error::EngineError;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Current schema version.
pub const STORE_VERSION: u32 = 6;

const LOAD_RETRIES: u32 = 5;
const LOAD_RETRY_PAUSE: Duration = Duration::from_millis(500);

pub struct PreferenceStore {
    path: PathBuf,
    current: RwLock<Arc<PreferenceData>>,
    /// Serializes writers; readers never take it.
    writer: Mutex<()>,
}

impl PreferenceStore {
    /// Load from disk, auto-initializing defaults when absent. Transient read
    /// failures (a writer mid-rename elsewhere) are retried a few times with
    /// short pauses before giving up.
    pub fn open(data_dir: &Path, dim: usize) -> Result<Self> {
        let path = data_dir.join("preferences.json");

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..LOAD_RETRIES {
            if attempt > 0 {
                std::thread::sleep(LOAD_RETRY_PAUSE);
            }
            match Self::load_data(&path, dim) {
                Ok(data) => {
                    return Ok(Self {
                        path,
                        current: RwLock::new(Arc::new(data)),
                        writer: Mutex::new(()),
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "preference load failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("preference load failed")))
    }

    fn load_data(path: &Path, dim: usize) -> Result<PreferenceData> {
        if !path.exists() {
            info!("no preference store found, starting fresh");
            return Ok(PreferenceData::with_dim(dim));
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw).context("preference store is not JSON")?;
        let migrated = migrate(value)?;
        let data: PreferenceData =
            serde_json::from_value(migrated.clone()).context("preference store schema mismatch")?;
        Ok(data)
    }

    /// Cheap read snapshot. The returned `Arc` stays consistent for as long
    /// as the caller holds it, regardless of concurrent updates.
    pub fn snapshot(&self) -> Arc<PreferenceData> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply a mutation under the single-writer lock: clone the current data,
    /// run `f`, re-assert the unit-taste invariant, persist, swap.
    ///
    /// A violated invariant drops the update and surfaces
    /// [`EngineError::PreferenceWriteSkew`]; the persisted state keeps its
    /// pre-call shape.
    pub fn update<F>(&self, f: F) -> std::result::Result<Arc<PreferenceData>, EngineError>
    where
        F: FnOnce(&mut PreferenceData),
    {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut data = (*self.snapshot()).clone();
        let count_before = data.user.feedback_count;
        f(&mut data);

        if !data.taste_is_unit() {
            warn!("dropping preference update: taste vector lost unit norm");
            return Err(EngineError::PreferenceWriteSkew);
        }
        if data.user.feedback_count < count_before {
            warn!("dropping preference update: feedback_count would decrease");
            return Err(EngineError::PreferenceWriteSkew);
        }

        self.persist(&data).map_err(|e| {
            EngineError::Cache(std::io::Error::other(format!("preference write: {e}")))
        })?;

        let arc = Arc::new(data);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = arc.clone();
        Ok(arc)
    }

    fn persist(&self, data: &PreferenceData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut value = serde_json::to_value(data)?;
        if let Value::Object(map) = &mut value {
            map.insert("version".into(), json!(STORE_VERSION));
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&value)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Wipe learned state back to defaults, keeping the embedding dimension.
    /// This is the one sanctioned path on which `feedback_count` may fall.
    pub fn reset(&self) -> std::result::Result<Arc<PreferenceData>, EngineError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let dim = self.snapshot().user.taste.len();
        let data = PreferenceData::with_dim(dim);
        self.persist(&data).map_err(|e| {
            EngineError::Cache(std::io::Error::other(format!("preference write: {e}")))
        })?;
        let arc = Arc::new(data);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = arc.clone();
        Ok(arc)
    }
}

/// Step a raw JSON document from its recorded version up to
/// [`STORE_VERSION`], filling in each era's additions with defaults.
///
/// v1 base profile → v2 tone (contrast tracking) → v3 momentum + category
/// stores → v4 color stores → v5 feedback context fields → v6 composition.
pub fn migrate(mut value: Value) -> Result<Value> {
    let obj = value
        .as_object_mut()
        .context("preference store root must be an object")?;

    let mut version = obj
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(1);

    if version > STORE_VERSION {
        anyhow::bail!("preference store version {version} is newer than supported {STORE_VERSION}");
    }

    while version < STORE_VERSION {
        match version {
            1 => {
                obj.entry("tone").or_insert_with(|| {
                    json!({"brightness": 50.0, "contrast": 50.0, "samples": 0})
                });
            }
            2 => {
                if let Some(user) = obj.get_mut("user").and_then(Value::as_object_mut) {
                    if !user.contains_key("velocity") {
                        let dim = user
                            .get("taste")
                            .and_then(Value::as_array)
                            .map(|a| a.len())
                            .unwrap_or(super::DEFAULT_EMBEDDING_DIM);
                        user.insert("velocity".into(), json!(vec![0.0f32; dim]));
                    }
                }
                obj.entry("categories").or_insert_with(|| json!({}));
            }
            3 => {
                obj.entry("colors").or_insert_with(|| json!({}));
            }
            4 => {
                if let Some(user) = obj.get_mut("user").and_then(Value::as_object_mut) {
                    user.entry("liked").or_insert_with(|| json!([]));
                    user.entry("disliked").or_insert_with(|| json!([]));
                }
            }
            5 => {
                obj.entry("composition").or_insert_with(|| {
                    json!({
                        "symmetry": 0.5,
                        "rule_of_thirds": 0.5,
                        "center_weight": 0.5,
                        "edge_density": 0.5,
                        "complexity": 0.5,
                        "sample_count": 0
                    })
                });
            }
            _ => unreachable!("migration loop past {version}"),
        }
        version += 1;
        info!(version, "preference store migrated");
    }

    obj.insert("version".into(), json!(STORE_VERSION));
    Ok(value)
}
