//! Online preference learning.
//!
//! The taste vector follows liked embeddings (and flees disliked ones) with
//! a momentum-EMA step, staying unit-length after every successful update.
//! Auxiliary category, color, composition and tone stores are updated in the
//! same transaction.

use crate::catalog::WallpaperMeta;
use crate::composition::CompositionFeatures;
use crate::prefs::{Feedback, PreferenceData, VELOCITY_CAP};
use crate::vecops;
use tracing::debug;

/// Momentum retained between steps.
const MOMENTUM: f32 = 0.30;

/// EMA blend factor for the composition and tone preferences.
const AUX_BLEND: f32 = 0.2;

/// How many palette colors a single feedback event credits.
const PALETTE_CREDIT: usize = 3;

/// ε-decay: `max(0.05, 0.30·0.95^(count/50))`.
pub fn epsilon_for(count: u32) -> f32 {
    (0.30 * 0.95f32.powf(count as f32 / 50.0)).max(0.05)
}

/// Learning-rate schedule. Negative feedback corrects harder than positive
/// feedback reinforces, and both anneal as evidence accumulates.
pub fn adaptive_rate(feedback_count: u32, feedback: Feedback) -> f32 {
    match feedback {
        Feedback::Like => match feedback_count {
            0..=9 => 0.15,
            10..=49 => 0.10,
            _ => 0.05,
        },
        Feedback::Dislike => match feedback_count {
            0..=9 => 0.20,
            10..=49 => 0.15,
            _ => 0.10,
        },
    }
}

/// One momentum-EMA step. Returns the new (taste, velocity), or `None` when
/// the step would degenerate (mismatched dimensions or a zero-norm result),
/// in which case the caller must treat the update as a no-op.
pub fn momentum_step(
    taste: &[f32],
    velocity: &[f32],
    target: &[f32],
    eta: f32,
    sign: f32,
) -> Option<(Vec<f32>, Vec<f32>)> {
    if taste.len() != target.len() || taste.len() != velocity.len() || taste.is_empty() {
        return None;
    }

    let mut new_velocity: Vec<f32> = taste
        .iter()
        .zip(velocity.iter())
        .zip(target.iter())
        .map(|((t, v), e)| MOMENTUM * v + eta * sign * (e - t))
        .collect();
    vecops::clip_norm(&mut new_velocity, VELOCITY_CAP);

    let raw: Vec<f32> = taste
        .iter()
        .zip(new_velocity.iter())
        .map(|(t, v)| t + v)
        .collect();
    let n = vecops::norm(&raw);
    if n <= f32::EPSILON || !n.is_finite() {
        return None;
    }
    Some((raw.iter().map(|x| x / n).collect(), new_velocity))
}

/// Applies feedback to a [`PreferenceData`] document in place. The caller
/// owns persistence and the single-writer discipline.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferenceLearner;

impl PreferenceLearner {
    /// Route one feedback event into the taste vector and every auxiliary
    /// store. `strength` scales the adaptive learning rate (1.0 for explicit
    /// feedback, 0.3 for duration-derived implicit feedback). `composition`
    /// is the measured composition of the rated image when one was decodable.
    pub fn apply(
        &self,
        data: &mut PreferenceData,
        wallpaper: &WallpaperMeta,
        feedback: Feedback,
        strength: f32,
        composition: Option<&CompositionFeatures>,
        now: i64,
    ) {
        let eta = adaptive_rate(data.user.feedback_count, feedback) * strength.clamp(0.0, 1.0);
        let sign = feedback.sign();

        match momentum_step(
            &data.user.taste,
            &data.user.velocity,
            &wallpaper.embedding,
            eta,
            sign,
        ) {
            Some((taste, velocity)) => {
                data.user.taste = taste;
                data.user.velocity = velocity;
            }
            None => {
                debug!(id = %wallpaper.id, "degenerate taste step skipped");
            }
        }

        data.user.feedback_count += 1;
        data.user.epsilon = epsilon_for(data.user.feedback_count);
        data.user.last_updated = now;

        match feedback {
            Feedback::Like => {
                data.user.liked.insert(wallpaper.id.clone());
                data.user.disliked.remove(&wallpaper.id);
            }
            Feedback::Dislike => {
                data.user.disliked.insert(wallpaper.id.clone());
                data.user.liked.remove(&wallpaper.id);
            }
        }

        self.credit_category(data, &wallpaper.category, feedback, now);
        self.credit_colors(data, &wallpaper.palette, feedback, now);

        if let Some(observed) = composition {
            data.composition.blend(observed, AUX_BLEND, sign);
        }
        if feedback.is_positive() {
            data.tone
                .blend(wallpaper.brightness, wallpaper.contrast, AUX_BLEND);
        }
    }

    /// Count a wallpaper as shown, without feedback.
    pub fn record_view(&self, data: &mut PreferenceData, wallpaper: &WallpaperMeta, now: i64) {
        if !wallpaper.category.is_empty() {
            let stats = data.categories.entry(wallpaper.category.clone()).or_default();
            stats.views += 1;
            stats.last_shown = now;
        }
        for hex in wallpaper.palette.iter().take(PALETTE_CREDIT) {
            let stats = data.colors.entry(hex.to_lowercase()).or_default();
            stats.views += 1;
            stats.last_shown = now;
        }
    }

    /// Relax the taste vector toward uniform after long idle stretches.
    /// `decay` in [0, 1]; the vector is re-normalized, so the practical
    /// effect is letting fresh feedback move it faster again.
    pub fn decay_taste(&self, data: &mut PreferenceData, decay: f32) {
        let decay = decay.clamp(0.0, 1.0);
        let scaled: Vec<f32> = data.user.taste.iter().map(|x| x * (1.0 - decay)).collect();
        data.user.taste = vecops::normalize(&scaled);
    }

    fn credit_category(
        &self,
        data: &mut PreferenceData,
        category: &str,
        feedback: Feedback,
        now: i64,
    ) {
        if category.is_empty() {
            return;
        }
        let stats = data.categories.entry(category.to_string()).or_default();
        match feedback {
            Feedback::Like => stats.likes += 1,
            Feedback::Dislike => stats.dislikes += 1,
        }
        stats.last_shown = now;
    }

    fn credit_colors(
        &self,
        data: &mut PreferenceData,
        palette: &[String],
        feedback: Feedback,
        now: i64,
    ) {
        for hex in palette.iter().take(PALETTE_CREDIT) {
            let stats = data.colors.entry(hex.to_lowercase()).or_default();
            match feedback {
                Feedback::Like => stats.likes += 1,
                Feedback::Dislike => stats.dislikes += 1,
            }
            stats.last_shown = now;
        }
    }
}
