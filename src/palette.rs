//! Palette analysis and similarity.
//!
//! Catalog entries carry up to five `#RRGGBB` colors, dominant first. This
//! module classifies a palette (warm/cool, vibrant/muted, harmony) and scores
//! how well two palettes match. Perceptual color distance runs in LAB space.

use palette::{IntoColor, Lab, Srgb};

/// Hue-spread classification of a palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Harmony {
    /// All hues within 30°
    Monochromatic,
    /// Hues within 60°
    Analogous,
    /// Hue spread beyond 150°
    Complementary,
    /// Everything in between
    Triadic,
}

impl Harmony {
    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Harmony::Monochromatic => "monochromatic",
            Harmony::Analogous => "analogous",
            Harmony::Complementary => "complementary",
            Harmony::Triadic => "triadic",
        }
    }

    fn from_spread(spread: f32) -> Self {
        if spread < 30.0 {
            Harmony::Monochromatic
        } else if spread < 60.0 {
            Harmony::Analogous
        } else if spread > 150.0 {
            Harmony::Complementary
        } else {
            Harmony::Triadic
        }
    }
}

/// Aggregate description of a palette.
#[derive(Debug, Clone)]
pub struct PaletteAnalysis {
    pub dominant_rgb: (u8, u8, u8),
    /// Up to two accent colors following the dominant one.
    pub accent_rgb: Vec<(u8, u8, u8)>,
    /// Circular mean hue in degrees [0, 360).
    pub avg_hue: f32,
    pub avg_sat: f32,
    pub avg_val: f32,
    pub is_warm: bool,
    pub is_vibrant: bool,
    pub harmony: Harmony,
}

impl PaletteAnalysis {
    /// Neutral stand-in when a palette has no parseable colors.
    pub fn neutral() -> Self {
        Self {
            dominant_rgb: (128, 128, 128),
            accent_rgb: Vec::new(),
            avg_hue: 0.0,
            avg_sat: 0.0,
            avg_val: 0.5,
            is_warm: false,
            is_vibrant: false,
            harmony: Harmony::Monochromatic,
        }
    }
}

/// Parse a hex color string. Supports "#RRGGBB" and "RRGGBB".
pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

/// Convert to LAB for perceptual distance.
pub fn rgb_to_lab(rgb: (u8, u8, u8)) -> Lab {
    let srgb = Srgb::new(
        rgb.0 as f32 / 255.0,
        rgb.1 as f32 / 255.0,
        rgb.2 as f32 / 255.0,
    );
    srgb.into_color()
}

/// RGB → HSV. Hue in degrees [0, 360), saturation and value in [0, 1].
pub fn rgb_to_hsv(rgb: (u8, u8, u8)) -> (f32, f32, f32) {
    let r = rgb.0 as f32 / 255.0;
    let g = rgb.1 as f32 / 255.0;
    let b = rgb.2 as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let value = max;
    let saturation = if max > 0.0 { delta / max } else { 0.0 };

    if delta < 1e-4 {
        return (0.0, saturation, value);
    }

    let hue = if (max - r).abs() < 1e-4 {
        60.0 * (((g - b) / delta) % 6.0)
    } else if (max - g).abs() < 1e-4 {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let hue = if hue < 0.0 { hue + 360.0 } else { hue };

    (hue, saturation, value)
}

/// Angular distance between two hues, wrapping around 360°. Result in [0, 180].
pub fn hue_distance(h1: f32, h2: f32) -> f32 {
    let diff = (h1 - h2).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Circular mean of hue angles in degrees.
fn circular_mean_hue(hues: &[f32]) -> f32 {
    if hues.is_empty() {
        return 0.0;
    }
    let (sin_sum, cos_sum) = hues.iter().fold((0.0f32, 0.0f32), |(s, c), h| {
        let rad = h.to_radians();
        (s + rad.sin(), c + rad.cos())
    });
    let mean = sin_sum.atan2(cos_sum).to_degrees();
    if mean < 0.0 {
        mean + 360.0
    } else {
        mean
    }
}

/// Perceptual similarity of two colors in [0, 1], via CIE76 distance in LAB.
/// The power curve keeps sensitivity to small differences.
pub fn color_similarity(a: (u8, u8, u8), b: (u8, u8, u8)) -> f32 {
    let la = rgb_to_lab(a);
    let lb = rgb_to_lab(b);
    let dl = la.l - lb.l;
    let da = la.a - lb.a;
    let db = la.b - lb.b;
    let distance = (dl * dl + da * da + db * db).sqrt();
    (1.0 - (distance / 100.0).powf(0.7)).max(0.0)
}

fn parse_palette(palette: &[String]) -> Vec<(u8, u8, u8)> {
    palette.iter().filter_map(|c| hex_to_rgb(c)).collect()
}

/// Analyze a palette. Invalid entries are skipped; an all-invalid (or empty)
/// palette yields [`PaletteAnalysis::neutral`].
pub fn analyze(palette: &[String]) -> PaletteAnalysis {
    let rgbs = parse_palette(palette);
    if rgbs.is_empty() {
        return PaletteAnalysis::neutral();
    }

    let hsvs: Vec<(f32, f32, f32)> = rgbs.iter().map(|&c| rgb_to_hsv(c)).collect();
    let hues: Vec<f32> = hsvs.iter().map(|h| h.0).collect();

    let avg_hue = circular_mean_hue(&hues);
    let avg_sat = hsvs.iter().map(|h| h.1).sum::<f32>() / hsvs.len() as f32;
    let avg_val = hsvs.iter().map(|h| h.2).sum::<f32>() / hsvs.len() as f32;

    let spread = hues
        .iter()
        .flat_map(|a| hues.iter().map(move |b| hue_distance(*a, *b)))
        .fold(0.0f32, f32::max);

    PaletteAnalysis {
        dominant_rgb: rgbs[0],
        accent_rgb: rgbs.iter().skip(1).take(2).copied().collect(),
        avg_hue,
        avg_sat,
        avg_val,
        is_warm: avg_hue < 60.0 || avg_hue > 300.0,
        is_vibrant: avg_sat > 0.5 && avg_val > 0.4,
        harmony: Harmony::from_spread(spread),
    }
}

/// Best accent-to-accent match between two analyses, 0.5 when either side
/// has no accents.
fn accent_similarity(a: &PaletteAnalysis, b: &PaletteAnalysis) -> f32 {
    if a.accent_rgb.is_empty() || b.accent_rgb.is_empty() {
        return 0.5;
    }
    a.accent_rgb
        .iter()
        .flat_map(|x| b.accent_rgb.iter().map(move |y| color_similarity(*x, *y)))
        .fold(0.0f32, f32::max)
}

/// Weighted palette similarity in [0, 1].
///
/// Components: dominant color 0.35, circular hue 0.20, saturation 0.15,
/// value 0.15, accents 0.15, plus +0.10 each for matching warm/cool and
/// vibrant/muted classes. Either palette empty or unparseable → 0.5.
/// The ranking engine pre-analyzes its reference palette and goes through
/// [`similarity_analyzed`] instead.
#[allow(dead_code)]
pub fn similarity(p1: &[String], p2: &[String]) -> f32 {
    let a = analyze(p1);
    let b = analyze(p2);
    if parse_palette(p1).is_empty() || parse_palette(p2).is_empty() {
        return 0.5;
    }
    similarity_analyzed(&a, &b)
}

/// Similarity over pre-computed analyses.
pub fn similarity_analyzed(a: &PaletteAnalysis, b: &PaletteAnalysis) -> f32 {
    let dominant = color_similarity(a.dominant_rgb, b.dominant_rgb);
    let hue = 1.0 - hue_distance(a.avg_hue, b.avg_hue) / 180.0;
    let sat = 1.0 - (a.avg_sat - b.avg_sat).abs();
    let val = 1.0 - (a.avg_val - b.avg_val).abs();
    let accent = accent_similarity(a, b);

    let mut score =
        dominant * 0.35 + hue * 0.20 + sat * 0.15 + val * 0.15 + accent * 0.15;
    if a.is_warm == b.is_warm {
        score += 0.10;
    }
    if a.is_vibrant == b.is_vibrant {
        score += 0.10;
    }
    score.clamp(0.0, 1.0)
}
