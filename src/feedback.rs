//! Feedback routing.
//!
//! Explicit like/dislike events and duration-derived implicit signals both
//! land here and are funneled into the learner. Updates to the preference
//! store go through its single-writer lock, so learner updates are
//! linearizable no matter which surface they came from.

use crate::catalog::WallpaperMeta;
use crate::composition::CompositionFeatures;
use crate::error::EngineError;
use crate::history::{HistoryEntry, HistoryLog};
use crate::learner::PreferenceLearner;
use crate::prefs::store::PreferenceStore;
use crate::prefs::Feedback;
use anyhow::Result;
use tracing::{debug, info};

/// Implicit signals run at 30 % of the adaptive learning rate.
pub const IMPLICIT_STRENGTH: f32 = 0.3;

/// Replaced within five minutes → implicit dislike.
pub const IMPLICIT_DISLIKE_UNDER_SECS: i64 = 5 * 60;

/// Kept for over a day → implicit like.
pub const IMPLICIT_LIKE_OVER_SECS: i64 = 24 * 3600;

#[derive(Debug, Default)]
pub struct FeedbackProcessor {
    learner: PreferenceLearner,
}

impl FeedbackProcessor {
    /// Handle an explicit rating of a history entry. The caller resolves
    /// `wallpaper` from its catalog snapshot (possibly palette-enriched).
    pub fn process_explicit(
        &self,
        store: &PreferenceStore,
        history: &mut HistoryLog,
        wallpaper: &WallpaperMeta,
        entry_id: u64,
        feedback: Feedback,
        context: Option<String>,
        composition: Option<&CompositionFeatures>,
        now: i64,
    ) -> Result<()> {
        let entry = history
            .get(entry_id)
            .ok_or_else(|| anyhow::anyhow!("no history entry {entry_id}"))?;
        anyhow::ensure!(
            entry.wallpaper_id == wallpaper.id,
            "entry {entry_id} is for {}, not {}",
            entry.wallpaper_id,
            wallpaper.id
        );
        history.set_feedback(entry_id, feedback)?;
        if let Some(ctx) = context {
            // Context is advisory; the original context of the entry wins.
            debug!(entry_id, context = %ctx, "explicit feedback context");
        }

        store
            .update(|data| {
                self.learner
                    .apply(data, wallpaper, feedback, 1.0, composition, now)
            })
            .map_err(|e| anyhow::anyhow!(e))?;
        history.save()?;
        info!(entry_id, wallpaper = %wallpaper.id, feedback = ?feedback, "explicit feedback applied");
        Ok(())
    }

    /// Classify a sealed entry's display duration. `None` means the duration
    /// is in the indifferent middle band and produces no update.
    pub fn classify_implicit(entry: &HistoryEntry) -> Option<Feedback> {
        let duration = entry.duration_secs()?;
        if duration < IMPLICIT_DISLIKE_UNDER_SECS {
            Some(Feedback::Dislike)
        } else if duration > IMPLICIT_LIKE_OVER_SECS {
            Some(Feedback::Like)
        } else {
            None
        }
    }

    /// Apply duration-derived feedback for a sealed entry, at most once per
    /// entry. Entries with explicit feedback are left alone; the user
    /// already spoke. `wallpaper` is `None` when the entry's image has left
    /// the catalog; the entry is still consumed. Returns whether a learner
    /// update ran.
    pub fn process_implicit(
        &self,
        store: &PreferenceStore,
        history: &mut HistoryLog,
        wallpaper: Option<&WallpaperMeta>,
        entry_id: u64,
        composition: Option<&CompositionFeatures>,
        now: i64,
    ) -> Result<bool, EngineError> {
        let Some(entry) = history.get(entry_id) else {
            return Ok(false);
        };
        if entry.implicit_applied || entry.removed_at.is_none() || entry.feedback.is_some() {
            return Ok(false);
        }

        let verdict = Self::classify_implicit(entry);
        let wallpaper_id = entry.wallpaper_id.clone();

        let applied = match (verdict, wallpaper) {
            (Some(feedback), Some(wallpaper)) => {
                store.update(|data| {
                    self.learner.apply(
                        data,
                        wallpaper,
                        feedback,
                        IMPLICIT_STRENGTH,
                        composition,
                        now,
                    )
                })?;
                info!(
                    entry_id,
                    wallpaper = %wallpaper_id,
                    feedback = ?feedback,
                    "implicit feedback applied"
                );
                true
            }
            (Some(_), None) => {
                debug!(entry_id, wallpaper = %wallpaper_id, "implicit target left catalog");
                false
            }
            (None, _) => false,
        };

        // Mark consumed either way so replays stay idempotent.
        history.mark_implicit_applied(entry_id);
        if let Err(e) = history.save() {
            return Err(EngineError::Cache(std::io::Error::other(e.to_string())));
        }
        Ok(applied)
    }
}
