//! The apply-next pipeline.
//!
//! One plain struct owns every collaborator and wires a wallpaper change:
//! pick the next image, seal the previous history entry (deriving implicit
//! feedback on manual changes), hand the file to the apply primitive, record
//! history, refill the download queue against the updated taste.

use crate::cache::CacheManager;
use crate::catalog::{self, Catalog, CatalogHandle, CatalogStore, Source};
use crate::composition::{self, CompositionFeatures};
use crate::config::Config;
use crate::download::{BatchReport, DownloadProgress, DownloadTask, Downloader};
use crate::error::EngineError;
use crate::explore::{ExplorationPolicy, SelectionReason, WallpaperStats};
use crate::feedback::FeedbackProcessor;
use crate::history::{HistoryLog, MAX_ENTRIES};
use crate::learner::PreferenceLearner;
use crate::platform::{Clock, ImageDecoder, PaletteExtractor, SystemStatus, WallpaperSetter};
use crate::prefs::store::PreferenceStore;
use crate::prefs::Feedback;
use crate::queue::{DownloadQueue, MAX_QUEUE};
use crate::schedule::Engagement;
use crate::scoring::{SimilarityEngine, TasteProfile};
use anyhow::Result;
use lru::LruCache;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Apply primitive must answer within this window.
const APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Cleanup drops queue rows below this priority.
const CLEANUP_PRIORITY_FLOOR: f32 = 0.2;

/// After a month without feedback the taste vector relaxes toward uniform.
const IDLE_DECAY_AFTER_SECS: i64 = 30 * 24 * 3600;
const IDLE_DECAY: f32 = 0.05;

/// Decoded-composition LRU capacity.
const COMPOSITION_CACHE: usize = 128;

/// Result of a successful apply-next.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Applied {
        wallpaper_id: String,
        reason: SelectionReason,
        exploration_weight: f32,
    },
    /// Nothing to choose from; state unchanged.
    NothingToDo,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    pub history_trimmed: usize,
    pub files_removed: usize,
    pub queue_dropped: usize,
}

pub struct Orchestrator {
    data_dir: PathBuf,
    config: std::sync::Mutex<Config>,
    catalog: CatalogHandle,
    catalog_store: CatalogStore,
    store: Arc<PreferenceStore>,
    history: Mutex<HistoryLog>,
    queue: Mutex<DownloadQueue>,
    cache: CacheManager,
    downloader: Downloader,
    engine: SimilarityEngine,
    policy: ExplorationPolicy,
    feedback: FeedbackProcessor,
    learner: PreferenceLearner,
    setter: Arc<dyn WallpaperSetter>,
    decoder: Arc<dyn ImageDecoder>,
    palettes: Arc<dyn PaletteExtractor>,
    status: Arc<dyn SystemStatus>,
    clock: Arc<dyn Clock>,
    compositions: std::sync::Mutex<LruCache<String, CompositionFeatures>>,
    http: reqwest::Client,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        data_dir: PathBuf,
        config: Config,
        setter: Arc<dyn WallpaperSetter>,
        decoder: Arc<dyn ImageDecoder>,
        palettes: Arc<dyn PaletteExtractor>,
        status: Arc<dyn SystemStatus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let catalog_store = CatalogStore::new(&data_dir);
        let catalog = CatalogHandle::empty();
        let mut dim = crate::prefs::DEFAULT_EMBEDDING_DIM;
        if let Some(manifest) = catalog_store.load()? {
            dim = manifest.embedding_dim;
            catalog.publish(Catalog::from_manifest(manifest));
        }

        let store = Arc::new(PreferenceStore::open(&data_dir, dim)?);
        if store.snapshot().user.mode != config.mode {
            store.update(|data| data.user.mode = config.mode)?;
        }
        let history = HistoryLog::open(&data_dir)?;
        let queue = DownloadQueue::open(&data_dir)?;
        let cache = CacheManager::new(Config::cache_dir(&data_dir), config.cache.budget_bytes)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("driftwall/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            data_dir,
            config: std::sync::Mutex::new(config),
            catalog,
            catalog_store,
            store,
            history: Mutex::new(history),
            queue: Mutex::new(queue),
            cache,
            downloader: Downloader::new(crate::download::DEFAULT_CONCURRENCY),
            engine: SimilarityEngine,
            policy: ExplorationPolicy,
            feedback: FeedbackProcessor::default(),
            learner: PreferenceLearner,
            setter,
            decoder,
            palettes,
            status,
            clock,
            compositions: std::sync::Mutex::new(LruCache::new(
                NonZeroUsize::new(COMPOSITION_CACHE).expect("non-zero capacity"),
            )),
            http,
        })
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.snapshot()
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn last_sync_ts(&self) -> i64 {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).sync.last_sync_ts
    }

    /// Weekly change + feedback volume → refresh cadence tier.
    pub async fn engagement(&self) -> Engagement {
        let week_ago = self.clock.now() - 7 * 24 * 3600;
        let history = self.history.lock().await;
        let mut changes = 0u32;
        let mut rated = 0u32;
        for entry in history.recent(MAX_ENTRIES) {
            if entry.applied_at < week_ago {
                break;
            }
            changes += 1;
            if entry.feedback.is_some() {
                rated += 1;
            }
        }
        Engagement::assess(changes, rated)
    }

    /// Fetch the manifest, validate compatibility, publish the new catalog
    /// and refill the queue. Returns the new catalog size.
    pub async fn refresh_catalog(&self) -> std::result::Result<usize, EngineError> {
        let url = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.sync.manifest_url.clone()
        };

        let mut manifest = catalog::fetch_manifest(&self.http, &url).await?;

        // Source opt-outs from config.
        let (github_on, bing_on) = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            (config.sources.github, config.sources.bing)
        };
        manifest.wallpapers.retain(|entry| match entry.source {
            Source::Github => github_on,
            Source::Bing => bing_on,
            Source::Unknown => true,
        });

        // The taste vector and the catalog must live in the same space.
        let snap = self.store.snapshot();
        let local_dim = snap.user.taste.len();
        if manifest.embedding_dim != local_dim {
            if snap.user.feedback_count == 0 {
                info!(
                    from = local_dim,
                    to = manifest.embedding_dim,
                    "no feedback yet; reinitializing taste at the manifest dimension"
                );
                // Safe: nothing learned yet.
                let dim = manifest.embedding_dim;
                self.store.update(|data| {
                    *data = crate::prefs::PreferenceData::with_dim(dim);
                })?;
            } else {
                return Err(EngineError::ManifestIncompatible(format!(
                    "embedding_dim {} != local taste dimension {} (model {})",
                    manifest.embedding_dim, local_dim, manifest.model_version
                )));
            }
        }

        let previous = self.catalog.snapshot();
        if !previous.model_version.is_empty() && previous.model_version != manifest.model_version {
            info!(
                from = %previous.model_version,
                to = %manifest.model_version,
                "catalog model version changed"
            );
        }

        self.catalog_store
            .save(&manifest)
            .map_err(|e| EngineError::Cache(std::io::Error::other(e.to_string())))?;
        let size = manifest.wallpapers.len();
        self.catalog.publish(Catalog::from_manifest(manifest));

        {
            let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.sync.last_sync_ts = self.clock.now();
            if let Err(e) = config.save(&self.data_dir) {
                warn!(error = %e, "failed to persist last_sync_ts");
            }
        }

        self.refill_queue().await?;
        info!(wallpapers = size, "catalog refreshed");
        Ok(size)
    }

    /// §4.12 apply-next with a clock-derived RNG seed.
    pub async fn apply_next(
        &self,
        manual: bool,
        cancel: &AtomicBool,
    ) -> std::result::Result<ApplyOutcome, EngineError> {
        let seed = self.clock.now() as u64;
        self.apply_next_seeded(manual, cancel, seed).await
    }

    /// Deterministic variant: the whole decision path is a pure function of
    /// (catalog snapshot, preference snapshot, seed).
    pub async fn apply_next_seeded(
        &self,
        manual: bool,
        cancel: &AtomicBool,
        seed: u64,
    ) -> std::result::Result<ApplyOutcome, EngineError> {
        // Guard first: refuse without touching any state.
        if self.setter.live_wallpaper_active() {
            return Err(EngineError::LiveWallpaperBlocking);
        }

        let catalog = self.catalog.snapshot();
        if catalog.is_empty() {
            debug!("empty catalog, nothing to apply");
            return Ok(ApplyOutcome::NothingToDo);
        }

        let prefs = self.store.snapshot();
        let active_id = {
            let history = self.history.lock().await;
            history.active().map(|e| e.wallpaper_id.clone())
        };

        // Downloaded wallpapers first; the whole catalog only when the
        // queue has nothing in flight either.
        let cached = self.cache.cached_ids();
        let mut candidates: Vec<&crate::catalog::WallpaperMeta> = cached
            .iter()
            .filter_map(|id| catalog.get(id))
            .filter(|meta| !prefs.user.disliked.contains(&meta.id))
            .filter(|meta| Some(&meta.id) != active_id.as_ref())
            .collect();
        if candidates.is_empty() {
            let queue_size = self.queue.lock().await.len();
            if queue_size == 0 {
                candidates = catalog
                    .iter()
                    .filter(|meta| !prefs.user.disliked.contains(&meta.id))
                    .filter(|meta| Some(&meta.id) != active_id.as_ref())
                    .collect();
            }
        }
        if candidates.is_empty() {
            return Ok(ApplyOutcome::NothingToDo);
        }

        // Rank against an immutable (catalog, taste) snapshot.
        let profile = TasteProfile::from_prefs(&prefs);
        let compositions = self.known_compositions(&candidates);
        let ranked = self.engine.rank(&profile, &candidates, &compositions);

        let (recent_categories, wp_stats) = {
            let history = self.history.lock().await;
            let recent = history.recent_categories(10, |id| {
                catalog.get(id).map(|m| m.category.clone())
            });
            let stats: HashMap<String, WallpaperStats> = history
                .wallpaper_stats()
                .into_iter()
                .map(|(id, (views, likes))| (id, WallpaperStats { views, likes }))
                .collect();
            (recent, stats)
        };

        // Personalized mode trusts the ranking outright; auto mode explores.
        let mut rng = StdRng::seed_from_u64(seed);
        let selection = if prefs.user.mode == crate::prefs::SelectionMode::Personalized {
            crate::explore::Selection {
                ranked: ranked[0],
                reason: SelectionReason::BestMatch,
                exploration_weight: 0.0,
            }
        } else {
            self.policy
                .choose(&ranked, &prefs, &recent_categories, &wp_stats, &mut rng)?
        };
        let chosen = selection.ranked.meta;
        info!(
            wallpaper = %chosen.id,
            reason = selection.reason.name(),
            weight = selection.exploration_weight,
            "wallpaper selected"
        );

        // Ensure the bytes are on disk; this invocation fails (and can be
        // retried) when the fetch does.
        if !self.cache.contains(&chosen.id) {
            let task = DownloadTask {
                id: chosen.id.clone(),
                url: chosen.url.clone(),
            };
            match self.downloader.fetch_into_cache(&task, &self.cache, cancel).await {
                Ok((_, evicted)) => {
                    let mut queue = self.queue.lock().await;
                    queue.mark_downloaded(&chosen.id);
                    for id in &evicted {
                        queue.mark_evicted(id);
                    }
                    let _ = queue.save();
                }
                Err(e) => {
                    let mut queue = self.queue.lock().await;
                    queue.increment_retry(&chosen.id);
                    let _ = queue.save();
                    return Err(e);
                }
            }
        }
        self.prepare_display_variant(&chosen.id);

        // Seal the previous entry; a manual change also feeds it to the
        // feedback processor as an implicit signal.
        let now = self.clock.now();
        {
            let mut history = self.history.lock().await;
            if let Some(sealed) = history.seal_active(now) {
                if manual {
                    let comp = self.composition_of(&sealed.wallpaper_id);
                    let meta = catalog
                        .get(&sealed.wallpaper_id)
                        .map(|m| self.enrich_palette(m));
                    if let Err(e) = self.feedback.process_implicit(
                        &self.store,
                        &mut history,
                        meta.as_ref(),
                        sealed.id,
                        comp.as_ref(),
                        now,
                    ) {
                        warn!(error = %e, "implicit feedback failed");
                    }
                } else {
                    let _ = history.save();
                }
            }
        }

        // A cancelled apply-next aborts before the external primitive runs;
        // the log is sealed but never left with two active rows.
        if cancel.load(Ordering::SeqCst) {
            return Err(EngineError::Download {
                id: chosen.id.clone(),
                message: "cancelled".into(),
            });
        }

        let path = self
            .cache
            .display_path(&chosen.id)
            .ok_or_else(|| EngineError::Download {
                id: chosen.id.clone(),
                message: "cached file vanished before apply".into(),
            })?;
        self.apply_with_timeout(&path).await?;

        {
            let mut history = self.history.lock().await;
            let context = if manual { "manual" } else { "rotation" };
            history.record_applied(&chosen.id, now, Some(context.into()));
            history
                .save()
                .map_err(|e| EngineError::Cache(std::io::Error::other(e.to_string())))?;
        }

        // Views feed the category/color stores.
        let chosen_meta = chosen.clone();
        if let Err(e) = self.store.update(|data| {
            self.learner.record_view(data, &chosen_meta, now);
        }) {
            warn!(error = %e, "view recording dropped");
        }

        self.refill_queue().await?;

        Ok(ApplyOutcome::Applied {
            wallpaper_id: chosen.id.clone(),
            reason: selection.reason,
            exploration_weight: selection.exploration_weight,
        })
    }

    async fn apply_with_timeout(&self, path: &std::path::Path) -> std::result::Result<(), EngineError> {
        let setter = self.setter.clone();
        let target = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.apply_target
        };
        let path = path.to_path_buf();
        let apply = tokio::task::spawn_blocking(move || setter.apply(&path, target));
        match tokio::time::timeout(APPLY_TIMEOUT, apply).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(EngineError::Apply(e.to_string())),
            Ok(Err(join)) => Err(EngineError::Apply(join.to_string())),
            Err(_) => Err(EngineError::Apply("apply primitive timed out".into())),
        }
    }

    /// Recompute similarities against the current taste and rewrite the
    /// queue with the top candidates.
    pub async fn refill_queue(&self) -> std::result::Result<(), EngineError> {
        let catalog = self.catalog.snapshot();
        if catalog.is_empty() {
            return Ok(());
        }
        let prefs = self.store.snapshot();
        let profile = TasteProfile::from_prefs(&prefs);

        let candidates: Vec<&crate::catalog::WallpaperMeta> = catalog
            .iter()
            .filter(|meta| !prefs.user.disliked.contains(&meta.id))
            .collect();
        let compositions = self.known_compositions(&candidates);
        let ranked = self.engine.rank(&profile, &candidates, &compositions);

        let ids: Vec<String> = ranked
            .iter()
            .take(MAX_QUEUE)
            .map(|r| r.meta.id.clone())
            .collect();

        let mut queue = self.queue.lock().await;
        queue.insert_all(&ids);
        queue.keep_top_n(MAX_QUEUE);
        for item_id in ids.iter() {
            if self.cache.contains(item_id) {
                queue.mark_downloaded(item_id);
            }
        }
        queue
            .save()
            .map_err(|e| EngineError::Cache(std::io::Error::other(e.to_string())))?;
        debug!(queued = queue.len(), "queue refilled");
        Ok(())
    }

    /// Download the top of the queue with bounded concurrency, streaming
    /// progress to the optional channel.
    pub async fn batch_download(
        &self,
        limit: usize,
        cancel: &AtomicBool,
        progress: Option<&watch::Sender<DownloadProgress>>,
    ) -> std::result::Result<BatchReport, EngineError> {
        let catalog = self.catalog.snapshot();
        let tasks: Vec<DownloadTask> = {
            let queue = self.queue.lock().await;
            queue
                .top_undownloaded(limit.min(MAX_QUEUE))
                .into_iter()
                .filter_map(|item| {
                    catalog.get(&item.wallpaper_id).map(|meta| DownloadTask {
                        id: meta.id.clone(),
                        url: meta.url.clone(),
                    })
                })
                .collect()
        };
        if tasks.is_empty() {
            return Ok(BatchReport::default());
        }

        let report = self
            .downloader
            .run_batch(tasks, &self.cache, &self.queue, cancel, progress)
            .await;
        self.queue
            .lock()
            .await
            .save()
            .map_err(|e| EngineError::Cache(std::io::Error::other(e.to_string())))?;
        Ok(report)
    }

    /// Nightly maintenance: trim history, drop disliked files, prune the
    /// queue's tail.
    pub async fn cleanup(&self) -> std::result::Result<CleanupReport, EngineError> {
        let mut report = CleanupReport::default();

        {
            let mut history = self.history.lock().await;
            let before = history.len();
            history.trim();
            report.history_trimmed = before - history.len();
            history
                .save()
                .map_err(|e| EngineError::Cache(std::io::Error::other(e.to_string())))?;
        }

        let disliked: Vec<String> = {
            let prefs = self.store.snapshot();
            prefs.user.disliked.iter().cloned().collect()
        };
        for id in &disliked {
            match self.cache.remove(id) {
                Ok(true) => report.files_removed += 1,
                Ok(false) => {}
                Err(e) => warn!(id = %id, error = %e, "failed to drop disliked file"),
            }
        }

        {
            let mut queue = self.queue.lock().await;
            report.queue_dropped = queue.delete_below_threshold(CLEANUP_PRIORITY_FLOOR);
            queue
                .save()
                .map_err(|e| EngineError::Cache(std::io::Error::other(e.to_string())))?;
        }

        // Long-idle profiles relax so fresh feedback moves them faster.
        let now = self.clock.now();
        let snap = self.store.snapshot();
        if snap.user.feedback_count > 0
            && snap.user.last_updated > 0
            && now - snap.user.last_updated > IDLE_DECAY_AFTER_SECS
        {
            self.store
                .update(|data| self.learner.decay_taste(data, IDLE_DECAY))?;
            info!("idle taste decay applied");
        }

        info!(
            history_trimmed = report.history_trimmed,
            files_removed = report.files_removed,
            queue_dropped = report.queue_dropped,
            "cleanup finished"
        );
        Ok(report)
    }

    /// Forget everything learned: preferences, history and the queue.
    /// Cached files stay; they re-rank under the fresh profile.
    pub async fn reset_all(&self) -> Result<()> {
        self.store.reset().map_err(|e| anyhow::anyhow!(e))?;
        {
            let mut history = self.history.lock().await;
            history.clear();
            history.save()?;
        }
        {
            let mut queue = self.queue.lock().await;
            queue.clear();
            queue.save()?;
        }
        Ok(())
    }

    /// Rate the active (or most recent) wallpaper from the CLI surface.
    pub async fn rate_current(&self, feedback: Feedback) -> Result<String> {
        let catalog = self.catalog.snapshot();
        let mut history = self.history.lock().await;
        let entry = history
            .active()
            .or_else(|| history.recent(1).into_iter().next())
            .ok_or_else(|| anyhow::anyhow!("no wallpaper has been applied yet"))?;
        let entry_id = entry.id;
        let wallpaper_id = entry.wallpaper_id.clone();
        let meta = catalog
            .get(&wallpaper_id)
            .map(|m| self.enrich_palette(m))
            .ok_or_else(|| anyhow::anyhow!("wallpaper {wallpaper_id} not in catalog"))?;

        let comp = self.composition_of(&wallpaper_id);
        self.feedback.process_explicit(
            &self.store,
            &mut history,
            &meta,
            entry_id,
            feedback,
            None,
            comp.as_ref(),
            self.clock.now(),
        )?;
        Ok(wallpaper_id)
    }

    /// A catalog row with an empty palette gets one measured from the cached
    /// file, so color preferences keep learning even on sparse manifests.
    fn enrich_palette(&self, meta: &crate::catalog::WallpaperMeta) -> crate::catalog::WallpaperMeta {
        let mut meta = meta.clone();
        if meta.palette.is_empty() {
            let path = self.cache.path_for(&meta.id);
            if path.exists() {
                if let Ok(img) = self.decoder.decode(&path) {
                    meta.palette = self.palettes.extract(&img, 5);
                }
            }
        }
        meta
    }

    /// Measured composition of a cached image, memoized. Decode failures
    /// quietly downgrade to "no composition" (the legacy scoring path).
    fn composition_of(&self, id: &str) -> Option<CompositionFeatures> {
        {
            let mut cache = self
                .compositions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(found) = cache.get(id) {
                return Some(*found);
            }
        }
        let path = self.cache.path_for(id);
        if !path.exists() {
            return None;
        }
        match self.decoder.decode(&path) {
            Ok(img) => {
                let features = composition::analyze(&img);
                self.compositions
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .put(id.to_string(), features);
                Some(features)
            }
            Err(e) => {
                debug!(id = %id, error = %e, "decode failed, using legacy scoring path");
                None
            }
        }
    }

    /// Compositions for every candidate already measured or cheap to
    /// measure (on disk). Purely additive: absent entries score legacy.
    fn known_compositions(
        &self,
        candidates: &[&crate::catalog::WallpaperMeta],
    ) -> HashMap<String, CompositionFeatures> {
        let mut map = HashMap::new();
        for meta in candidates {
            if let Some(found) = self.composition_of(&meta.id) {
                map.insert(meta.id.clone(), found);
            }
        }
        map
    }

    /// Best-effort screen-aspect crop so preview == applied.
    fn prepare_display_variant(&self, id: &str) {
        if self.cache.cropped_path_for(id).exists() {
            return;
        }
        let path = self.cache.path_for(id);
        if !path.exists() {
            return;
        }
        match self.decoder.decode(&path) {
            Ok(img) => {
                if let Err(e) = self
                    .cache
                    .prepare_cropped(id, &img, self.status.screen_size())
                {
                    debug!(id = %id, error = %e, "crop precompute failed");
                }
            }
            Err(e) => debug!(id = %id, error = %e, "decode failed, applying original"),
        }
    }

    /// Queue stats for the status surface: (total, undownloaded).
    pub async fn queue_stats(&self) -> (usize, usize) {
        let queue = self.queue.lock().await;
        (queue.len(), queue.undownloaded_count())
    }

    /// Top queue rows for the status surface: (id, priority, downloaded, retries).
    pub async fn queue_preview(&self, n: usize) -> Vec<(String, f32, bool, u8)> {
        let queue = self.queue.lock().await;
        let mut rows: Vec<(String, f32, bool, u8)> = queue
            .iter()
            .map(|item| {
                (
                    item.wallpaper_id.clone(),
                    item.priority,
                    item.downloaded,
                    item.retry_count,
                )
            })
            .collect();
        rows.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        rows.truncate(n);
        rows
    }

    pub async fn history_summary(&self, limit: usize) -> Vec<(String, i64, Option<Feedback>)> {
        let history = self.history.lock().await;
        history
            .recent(limit)
            .into_iter()
            .map(|e| (e.wallpaper_id.clone(), e.applied_at, e.feedback))
            .collect()
    }
}
