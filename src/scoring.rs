//! Composite ranking of catalog wallpapers against the learned profile.
//!
//! The embedding cosine carries most of the weight; palette, composition and
//! a category/tone bonus refine it. Weights were tuned against the remapped
//! cosine range, so the `(x+1)/2` remap in [`crate::vecops::cosine`] is load
//! bearing.

use crate::catalog::WallpaperMeta;
use crate::composition::CompositionFeatures;
use crate::palette::{self, PaletteAnalysis};
use crate::prefs::PreferenceData;
use crate::vecops;
use rayon::prelude::*;
use std::collections::HashMap;

const WEIGHT_EMBEDDING: f32 = 0.75;
const WEIGHT_PALETTE: f32 = 0.10;
const WEIGHT_COMPOSITION: f32 = 0.10;
const WEIGHT_CATEGORY: f32 = 0.05;

/// Snapshot of everything ranking needs from the preference store. Built
/// once per pass so the pass sees one consistent profile.
#[derive(Debug, Clone)]
pub struct TasteProfile {
    pub taste: Vec<f32>,
    preferred_analysis: Option<PaletteAnalysis>,
    composition: CompositionFeatures,
    favorite_category: Option<String>,
    tone: Option<(f32, f32)>,
}

impl TasteProfile {
    pub fn from_prefs(data: &PreferenceData) -> Self {
        let preferred_palette = data.preferred_palette(5);
        let preferred_analysis = if preferred_palette.is_empty() {
            None
        } else {
            Some(palette::analyze(&preferred_palette))
        };
        Self {
            taste: data.user.taste.clone(),
            preferred_analysis,
            composition: data.composition.as_features(),
            favorite_category: data.favorite_category().map(str::to_owned),
            tone: (data.tone.samples > 0).then_some((data.tone.brightness, data.tone.contrast)),
        }
    }
}

/// A scored candidate, borrowed from the catalog snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Ranked<'a> {
    pub meta: &'a WallpaperMeta,
    pub score: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimilarityEngine;

impl SimilarityEngine {
    /// Category/tone bonus in [0, 1]. Starts neutral at 0.5; category match
    /// adds up to +0.3, brightness within ±20 up to +0.2, contrast within
    /// ±15 up to +0.15. Unknown category or tone contributes nothing.
    pub fn category_bonus(&self, profile: &TasteProfile, meta: &WallpaperMeta) -> f32 {
        let mut bonus = 0.5;

        if let Some(favorite) = &profile.favorite_category {
            if !meta.category.is_empty() && meta.category == *favorite {
                bonus += 0.3;
            }
        }

        if let Some((brightness, contrast)) = profile.tone {
            let db = (meta.brightness as f32 - brightness).abs();
            if db <= 20.0 {
                bonus += 0.2 * (1.0 - db / 20.0);
            }
            let dc = (meta.contrast as f32 - contrast).abs();
            if dc <= 15.0 {
                bonus += 0.15 * (1.0 - dc / 15.0);
            }
        }

        bonus.clamp(0.0, 1.0)
    }

    fn palette_term(&self, profile: &TasteProfile, meta: &WallpaperMeta) -> f32 {
        match &profile.preferred_analysis {
            Some(analysis) if !meta.palette.is_empty() => {
                let candidate = palette::analyze(&meta.palette);
                palette::similarity_analyzed(analysis, &candidate)
            }
            _ => 0.5,
        }
    }

    /// Composite score in [0, 1].
    ///
    /// Default path blends embedding, palette, composition and the category
    /// bonus. Without a measured composition the legacy weights apply (the
    /// composition term is simply absent). With no usable embedding the
    /// category bonus alone decides.
    pub fn score(
        &self,
        profile: &TasteProfile,
        meta: &WallpaperMeta,
        composition: Option<&CompositionFeatures>,
    ) -> f32 {
        let category = self.category_bonus(profile, meta);

        if profile.taste.len() != meta.embedding.len() || meta.embedding.is_empty() {
            return category;
        }

        let embedding = vecops::cosine(&profile.taste, &meta.embedding);
        let pal = self.palette_term(profile, meta);

        let score = match composition {
            Some(features) => {
                let comp = profile.composition.similarity(features);
                WEIGHT_EMBEDDING * embedding
                    + WEIGHT_PALETTE * pal
                    + WEIGHT_COMPOSITION * comp
                    + WEIGHT_CATEGORY * category
            }
            None => WEIGHT_EMBEDDING * embedding + WEIGHT_PALETTE * pal + WEIGHT_CATEGORY * category,
        };
        score.clamp(0.0, 1.0)
    }

    /// Score and sort a candidate set. The pass is O(N·D), chunked across
    /// CPU workers; ordering is total so repeated calls over the same
    /// snapshot return the same ranking: score desc, id asc, then catalog
    /// position implied by the stable input order.
    pub fn rank<'a>(
        &self,
        profile: &TasteProfile,
        candidates: &[&'a WallpaperMeta],
        compositions: &HashMap<String, CompositionFeatures>,
    ) -> Vec<Ranked<'a>> {
        let mut ranked: Vec<Ranked<'a>> = candidates
            .par_iter()
            .map(|&meta| Ranked {
                meta,
                score: self.score(profile, meta, compositions.get(&meta.id)),
            })
            .collect();

        ranked.sort_by(compare_ranked);
        ranked
    }
}

/// Total order for ranked candidates: score desc, id asc.
pub fn compare_ranked(a: &Ranked<'_>, b: &Ranked<'_>) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.meta.id.cmp(&b.meta.id))
}
