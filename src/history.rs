//! Append-only wallpaper history.
//!
//! One entry per applied wallpaper. At most one entry is active (unsealed)
//! at any moment; sealing stamps `removed_at` and makes the entry eligible
//! for duration-derived implicit feedback, exactly once.

use crate::prefs::Feedback;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Keep this many most-recent entries.
pub const MAX_ENTRIES: usize = 100;

const HISTORY_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub wallpaper_id: String,
    /// Unix seconds when the wallpaper went up.
    pub applied_at: i64,
    /// Unix seconds when it was replaced; `None` while active.
    pub removed_at: Option<i64>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    /// Free-form situational note ("manual", "rotation", ...).
    #[serde(default)]
    pub context: Option<String>,
    /// Set once duration-derived feedback has been consumed, so replays
    /// are idempotent.
    #[serde(default)]
    pub implicit_applied: bool,
}

impl HistoryEntry {
    pub fn duration_secs(&self) -> Option<i64> {
        self.removed_at
            .map(|removed| (removed - self.applied_at).max(0))
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct HistoryData {
    version: u32,
    next_id: u64,
    entries: Vec<HistoryEntry>,
}

/// The log itself. All mutation happens through `&mut self`; the orchestrator
/// wraps it in a lock held across the seal/insert pair.
pub struct HistoryLog {
    data: HistoryData,
    path: PathBuf,
}

impl HistoryLog {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("history.json");
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<HistoryData>(&raw) {
                Ok(data) if data.version == HISTORY_VERSION => data,
                Ok(data) => {
                    warn!(
                        found = data.version,
                        expected = HISTORY_VERSION,
                        "history format changed, starting a fresh log"
                    );
                    HistoryData {
                        version: HISTORY_VERSION,
                        ..Default::default()
                    }
                }
                Err(e) => {
                    warn!(error = %e, "history unreadable, starting a fresh log");
                    HistoryData {
                        version: HISTORY_VERSION,
                        ..Default::default()
                    }
                }
            }
        } else {
            HistoryData {
                version: HISTORY_VERSION,
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

    /// The single unsealed entry, if any.
    pub fn active(&self) -> Option<&HistoryEntry> {
        self.data.entries.iter().find(|e| e.removed_at.is_none())
    }

    /// Seal the active entry with `removed_at = now` and return a copy for
    /// implicit-feedback processing. No-op when the log has no active entry.
    pub fn seal_active(&mut self, now: i64) -> Option<HistoryEntry> {
        let entry = self
            .data
            .entries
            .iter_mut()
            .find(|e| e.removed_at.is_none())?;
        entry.removed_at = Some(now.max(entry.applied_at));
        Some(entry.clone())
    }

    /// Record a freshly-applied wallpaper. Seals any stale active entry
    /// first so the one-active-row invariant survives crashes between the
    /// seal and the insert.
    pub fn record_applied(
        &mut self,
        wallpaper_id: &str,
        now: i64,
        context: Option<String>,
    ) -> u64 {
        if self.active().is_some() {
            warn!("active history entry found while inserting; sealing it");
            self.seal_active(now);
        }

        let id = self.data.next_id;
        self.data.next_id += 1;
        self.data.entries.push(HistoryEntry {
            id,
            wallpaper_id: wallpaper_id.to_string(),
            applied_at: now,
            removed_at: None,
            feedback: None,
            context,
            implicit_applied: false,
        });
        self.trim();
        id
    }

    /// Attach explicit feedback. Feedback is write-once; a second write with
    /// a different polarity is refused.
    pub fn set_feedback(&mut self, entry_id: u64, feedback: Feedback) -> Result<&HistoryEntry> {
        let entry = self
            .data
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .with_context(|| format!("no history entry {entry_id}"))?;
        match entry.feedback {
            Some(existing) if existing != feedback => {
                anyhow::bail!("entry {entry_id} already has feedback")
            }
            _ => entry.feedback = Some(feedback),
        }
        Ok(entry)
    }

    /// Flag an entry as having had its duration-derived feedback consumed.
    pub fn mark_implicit_applied(&mut self, entry_id: u64) {
        if let Some(entry) = self.data.entries.iter_mut().find(|e| e.id == entry_id) {
            entry.implicit_applied = true;
        }
    }

    pub fn get(&self, entry_id: u64) -> Option<&HistoryEntry> {
        self.data.entries.iter().find(|e| e.id == entry_id)
    }

    /// Entries newest-first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<&HistoryEntry> {
        let mut entries: Vec<&HistoryEntry> = self.data.entries.iter().collect();
        entries.sort_by(|a, b| b.applied_at.cmp(&a.applied_at).then(b.id.cmp(&a.id)));
        entries.truncate(limit);
        entries
    }

    /// Category trail of recent selections for the stuck detector, newest
    /// first, resolved through the caller's id→category lookup.
    pub fn recent_categories<F>(&self, limit: usize, category_of: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.recent(limit)
            .into_iter()
            .filter_map(|e| category_of(&e.wallpaper_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    /// Drop everything. Explicit reset is the only path that unsets feedback.
    pub fn clear(&mut self) {
        self.data.entries.clear();
    }

    /// Keep the `MAX_ENTRIES` most recent by `applied_at`.
    pub fn trim(&mut self) {
        if self.data.entries.len() <= MAX_ENTRIES {
            return;
        }
        self.data
            .entries
            .sort_by(|a, b| b.applied_at.cmp(&a.applied_at).then(b.id.cmp(&a.id)));
        self.data.entries.truncate(MAX_ENTRIES);
    }

    /// Applications and likes per wallpaper, for the per-wallpaper UCB blend.
    pub fn wallpaper_stats(&self) -> std::collections::HashMap<String, (u32, u32)> {
        let mut stats: std::collections::HashMap<String, (u32, u32)> =
            std::collections::HashMap::new();
        for entry in &self.data.entries {
            let slot = stats.entry(entry.wallpaper_id.clone()).or_default();
            slot.0 += 1;
            if entry.feedback == Some(Feedback::Like) {
                slot.1 += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log() -> (HistoryLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::open(dir.path()).unwrap();
        (log, dir)
    }

    #[test]
    fn test_record_creates_single_active_entry() {
        let (mut log, _dir) = open_log();
        assert!(log.active().is_none());
        let id = log.record_applied("w1", 100, Some("manual".into()));
        let active = log.active().unwrap();
        assert_eq!(active.id, id);
        assert_eq!(active.wallpaper_id, "w1");
        assert_eq!(active.applied_at, 100);
        assert!(active.removed_at.is_none());
    }

    #[test]
    fn test_one_active_row_invariant_across_inserts() {
        let (mut log, _dir) = open_log();
        for i in 0..10 {
            log.seal_active(i * 100 + 50);
            log.record_applied(&format!("w{i}"), i * 100, None);
            let actives = log
                .recent(100)
                .iter()
                .filter(|e| e.removed_at.is_none())
                .count();
            assert_eq!(actives, 1, "exactly one active row after insert {i}");
        }
    }

    #[test]
    fn test_insert_with_stale_active_self_heals() {
        let (mut log, _dir) = open_log();
        log.record_applied("w1", 100, None);
        // Simulate a missed seal: insert directly.
        log.record_applied("w2", 200, None);
        let actives = log
            .recent(100)
            .iter()
            .filter(|e| e.removed_at.is_none())
            .count();
        assert_eq!(actives, 1);
    }

    #[test]
    fn test_seal_computes_duration() {
        let (mut log, _dir) = open_log();
        let id = log.record_applied("w1", 1_000, None);
        let sealed = log.seal_active(1_240).unwrap();
        assert_eq!(sealed.id, id);
        assert_eq!(sealed.duration_secs(), Some(240));
    }

    #[test]
    fn test_seal_clamps_negative_duration() {
        let (mut log, _dir) = open_log();
        log.record_applied("w1", 1_000, None);
        let sealed = log.seal_active(900).unwrap(); // clock went backwards
        assert_eq!(sealed.duration_secs(), Some(0));
    }

    #[test]
    fn test_feedback_write_once() {
        let (mut log, _dir) = open_log();
        let id = log.record_applied("w1", 100, None);
        log.set_feedback(id, Feedback::Like).unwrap();
        // Same polarity is fine (idempotent), flip is refused.
        assert!(log.set_feedback(id, Feedback::Like).is_ok());
        assert!(log.set_feedback(id, Feedback::Dislike).is_err());
        assert_eq!(log.get(id).unwrap().feedback, Some(Feedback::Like));
    }

    #[test]
    fn test_implicit_flag_sticks() {
        let (mut log, _dir) = open_log();
        let id = log.record_applied("w1", 100, None);
        assert!(!log.get(id).unwrap().implicit_applied);
        log.mark_implicit_applied(id);
        assert!(log.get(id).unwrap().implicit_applied);
    }

    #[test]
    fn test_trim_keeps_most_recent_hundred() {
        let (mut log, _dir) = open_log();
        for i in 0..130 {
            log.seal_active(i);
            log.record_applied(&format!("w{i}"), i, None);
        }
        assert_eq!(log.len(), MAX_ENTRIES);
        let recent = log.recent(5);
        assert_eq!(recent[0].wallpaper_id, "w129");
        // The oldest survivors are the 100 most recent applications.
        assert!(log.recent(200).iter().all(|e| e.applied_at >= 30));
    }

    #[test]
    fn test_recent_sorted_desc_with_limit() {
        let (mut log, _dir) = open_log();
        for i in 0..10 {
            log.seal_active(i * 10 + 5);
            log.record_applied(&format!("w{i}"), i * 10, None);
        }
        let recent = log.recent(3);
        assert_eq!(recent.len(), 3);
        assert!(recent[0].applied_at > recent[1].applied_at);
        assert!(recent[1].applied_at > recent[2].applied_at);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = HistoryLog::open(dir.path()).unwrap();
            let id = log.record_applied("w1", 100, Some("manual".into()));
            log.set_feedback(id, Feedback::Like).unwrap();
            log.save().unwrap();
        }
        let log = HistoryLog::open(dir.path()).unwrap();
        assert_eq!(log.len(), 1);
        let entry = log.recent(1)[0];
        assert_eq!(entry.wallpaper_id, "w1");
        assert_eq!(entry.feedback, Some(Feedback::Like));
        assert_eq!(entry.context.as_deref(), Some("manual"));
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("history.json"), "not json").unwrap();
        let log = HistoryLog::open(dir.path()).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_wallpaper_stats_counts_views_and_likes() {
        let (mut log, _dir) = open_log();
        let a1 = log.record_applied("a", 10, None);
        log.seal_active(20);
        log.record_applied("b", 30, None);
        log.seal_active(40);
        log.record_applied("a", 50, None);
        log.set_feedback(a1, Feedback::Like).unwrap();

        let stats = log.wallpaper_stats();
        assert_eq!(stats.get("a"), Some(&(2, 1)));
        assert_eq!(stats.get("b"), Some(&(1, 0)));
    }
}
