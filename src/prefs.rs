//! User preference model.
//!
//! A single taste vector living in the same embedding space as the catalog,
//! plus auxiliary per-category, per-color and composition preference stores.
//! All mutation goes through the learner; everyone else reads `Arc` snapshots.

use crate::composition::CompositionFeatures;
use crate::vecops;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod store;

/// Embedding dimension used before the first catalog sync fixes the real one.
pub const DEFAULT_EMBEDDING_DIM: usize = 576;

/// Hard cap on the momentum vector's magnitude.
pub const VELOCITY_CAP: f32 = 0.5;

/// Selection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Rotate freely, still learning in the background.
    #[default]
    Auto,
    /// Rank strictly by the learned profile.
    Personalized,
}

/// Explicit feedback polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Feedback {
    Like,
    Dislike,
}

impl Feedback {
    pub fn sign(&self) -> f32 {
        match self {
            Feedback::Like => 1.0,
            Feedback::Dislike => -1.0,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Feedback::Like)
    }
}

/// The singleton user profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Unit-length taste embedding.
    pub taste: Vec<f32>,
    /// Momentum of taste updates, `‖velocity‖₂ ≤ 0.5`.
    pub velocity: Vec<f32>,
    pub mode: SelectionMode,
    /// Monotone non-decreasing.
    pub feedback_count: u32,
    /// Current ε for the greedy policy, in [0.05, 0.30].
    pub epsilon: f32,
    pub liked: BTreeSet<String>,
    pub disliked: BTreeSet<String>,
    /// Unix seconds of the last learner update.
    pub last_updated: i64,
}

impl UserPreferences {
    pub fn with_dim(dim: usize) -> Self {
        Self {
            taste: vecops::normalize(&vec![0.0; dim]),
            velocity: vec![0.0; dim],
            mode: SelectionMode::default(),
            feedback_count: 0,
            epsilon: 0.30,
            liked: BTreeSet::new(),
            disliked: BTreeSet::new(),
            last_updated: 0,
        }
    }
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self::with_dim(DEFAULT_EMBEDDING_DIM)
    }
}

/// Per-category engagement counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    pub likes: u32,
    pub dislikes: u32,
    pub views: u32,
    pub last_shown: i64,
}

impl CategoryStats {
    /// Dislikes weigh double; a view without feedback slowly dilutes.
    pub fn score(&self) -> f32 {
        (self.likes as f32 - 2.0 * self.dislikes as f32) / (self.views as f32 + 1.0)
    }
}

/// Per-hex-color engagement counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ColorStats {
    pub likes: u32,
    pub dislikes: u32,
    pub views: u32,
    pub last_shown: i64,
}

impl ColorStats {
    pub fn score(&self) -> f32 {
        (self.likes as f32 - 2.0 * self.dislikes as f32)
            / (self.likes as f32 + self.dislikes as f32 + 1.0)
    }
}

/// EMA-tracked composition preference. One row per user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompositionPreference {
    pub symmetry: f32,
    pub rule_of_thirds: f32,
    pub center_weight: f32,
    pub edge_density: f32,
    pub complexity: f32,
    pub sample_count: u32,
}

impl Default for CompositionPreference {
    fn default() -> Self {
        Self {
            symmetry: 0.5,
            rule_of_thirds: 0.5,
            center_weight: 0.5,
            edge_density: 0.5,
            complexity: 0.5,
            sample_count: 0,
        }
    }
}

impl CompositionPreference {
    pub fn as_features(&self) -> CompositionFeatures {
        CompositionFeatures {
            symmetry: self.symmetry,
            rule_of_thirds: self.rule_of_thirds,
            center_weight: self.center_weight,
            edge_density: self.edge_density,
            complexity: self.complexity,
        }
    }

    /// Blend toward a measured composition. `alpha` is the weight of the new
    /// observation; `sign` is negative for dislikes (blend away).
    pub fn blend(&mut self, observed: &CompositionFeatures, alpha: f32, sign: f32) {
        let step = |mean: f32, obs: f32| -> f32 {
            (mean + sign * alpha * (obs - mean)).clamp(0.0, 1.0)
        };
        self.symmetry = step(self.symmetry, observed.symmetry);
        self.rule_of_thirds = step(self.rule_of_thirds, observed.rule_of_thirds);
        self.center_weight = step(self.center_weight, observed.center_weight);
        self.edge_density = step(self.edge_density, observed.edge_density);
        self.complexity = step(self.complexity, observed.complexity);
        self.sample_count += 1;
    }

    /// Human-readable tendency labels for the status surface.
    pub fn tendencies(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.sample_count < 3 {
            return out;
        }
        if self.symmetry > 0.65 {
            out.push("symmetric");
        }
        if self.rule_of_thirds > 0.65 {
            out.push("rule-of-thirds");
        }
        if self.center_weight > 0.65 {
            out.push("center-weighted");
        }
        if self.complexity > 0.65 {
            out.push("busy");
        } else if self.complexity < 0.35 {
            out.push("minimal");
        }
        out
    }
}

/// EMA of the brightness/contrast of liked wallpapers, feeding the category
/// bonus. Neutral until at least one like lands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToneProfile {
    pub brightness: f32,
    pub contrast: f32,
    pub samples: u32,
}

impl Default for ToneProfile {
    fn default() -> Self {
        Self {
            brightness: 50.0,
            contrast: 50.0,
            samples: 0,
        }
    }
}

impl ToneProfile {
    pub fn blend(&mut self, brightness: i32, contrast: i32, alpha: f32) {
        self.brightness += alpha * (brightness as f32 - self.brightness);
        self.contrast += alpha * (contrast as f32 - self.contrast);
        self.samples += 1;
    }
}

/// Everything the preference store persists, as one versioned document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreferenceData {
    pub user: UserPreferences,
    pub categories: BTreeMap<String, CategoryStats>,
    pub colors: BTreeMap<String, ColorStats>,
    pub composition: CompositionPreference,
    pub tone: ToneProfile,
}

impl PreferenceData {
    pub fn with_dim(dim: usize) -> Self {
        Self {
            user: UserPreferences::with_dim(dim),
            ..Default::default()
        }
    }

    /// Best-scoring category with at least one view, if any.
    pub fn favorite_category(&self) -> Option<&str> {
        self.categories
            .iter()
            .filter(|(_, s)| s.views > 0 || s.likes > 0)
            .max_by(|a, b| {
                a.1.score()
                    .partial_cmp(&b.1.score())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.cmp(a.0))
            })
            .map(|(name, _)| name.as_str())
    }

    /// Preferred palette: the top-scoring colors with positive score,
    /// dominant-liked first. Empty until color feedback exists.
    pub fn preferred_palette(&self, max: usize) -> Vec<String> {
        let mut scored: Vec<(&String, f32)> = self
            .colors
            .iter()
            .map(|(hex, s)| (hex, s.score()))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.into_iter().take(max).map(|(h, _)| h.clone()).collect()
    }

    /// Unit-norm invariant check used by the write-skew guard.
    pub fn taste_is_unit(&self) -> bool {
        (vecops::norm(&self.user.taste) - 1.0).abs() <= 1e-3
    }
}
