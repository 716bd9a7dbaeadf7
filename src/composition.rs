//! Composition analysis over decoded images.
//!
//! Partitions a downsampled frame into a 3×3 grid, samples every 4th pixel
//! per cell, and derives five compositional scalars in [0, 1]. Deterministic
//! for identical input; callers fall back to [`CompositionFeatures::neutral`]
//! when an image cannot be decoded.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

const MAX_SIDE: u32 = 512;
const SAMPLE_STEP: u32 = 4;
const EDGE_THRESHOLD: f32 = 0.2;

/// Five compositional scalars, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositionFeatures {
    /// Top↔bottom and left↔right brightness agreement.
    pub symmetry: f32,
    /// Contrast concentration at the four third-intersection cells.
    pub rule_of_thirds: f32,
    /// >0.5 when the center outshines the corners.
    pub center_weight: f32,
    /// Fraction of detected edges lying in border cells.
    pub edge_density: f32,
    /// Combined edge count and global contrast.
    pub complexity: f32,
}

impl CompositionFeatures {
    /// Neutral features for undecodable images.
    pub fn neutral() -> Self {
        Self {
            symmetry: 0.5,
            rule_of_thirds: 0.5,
            center_weight: 0.5,
            edge_density: 0.5,
            complexity: 0.5,
        }
    }

    /// Mean absolute agreement with another feature set, in [0, 1].
    pub fn similarity(&self, other: &CompositionFeatures) -> f32 {
        let d = (self.symmetry - other.symmetry).abs()
            + (self.rule_of_thirds - other.rule_of_thirds).abs()
            + (self.center_weight - other.center_weight).abs()
            + (self.edge_density - other.edge_density).abs()
            + (self.complexity - other.complexity).abs();
        (1.0 - d / 5.0).clamp(0.0, 1.0)
    }

    pub fn as_array(&self) -> [f32; 5] {
        [
            self.symmetry,
            self.rule_of_thirds,
            self.center_weight,
            self.edge_density,
            self.complexity,
        ]
    }
}

/// Per-cell statistics from the sampling pass.
#[derive(Debug, Clone, Copy, Default)]
struct CellStats {
    mean_brightness: f32,
    contrast: f32,
    edges: u32,
    samples: u32,
}

fn luminance(px: image::Rgba<u8>) -> f32 {
    (0.299 * px.0[0] as f32 + 0.587 * px.0[1] as f32 + 0.114 * px.0[2] as f32) / 255.0
}

fn sample_cell(img: &DynamicImage, x0: u32, y0: u32, x1: u32, y1: u32) -> CellStats {
    let mut sum = 0.0f32;
    let mut sum_sq = 0.0f32;
    let mut edges = 0u32;
    let mut samples = 0u32;

    let mut y = y0;
    while y < y1 {
        let mut prev: Option<f32> = None;
        let mut x = x0;
        while x < x1 {
            let b = luminance(img.get_pixel(x, y));
            sum += b;
            sum_sq += b * b;
            samples += 1;
            if let Some(p) = prev {
                if (b - p).abs() > EDGE_THRESHOLD {
                    edges += 1;
                }
            }
            prev = Some(b);
            x += SAMPLE_STEP;
        }
        y += SAMPLE_STEP;
    }

    if samples == 0 {
        return CellStats::default();
    }
    let mean = sum / samples as f32;
    let variance = (sum_sq / samples as f32 - mean * mean).max(0.0);
    CellStats {
        mean_brightness: mean,
        contrast: variance.sqrt(),
        edges,
        samples,
    }
}

/// Analyze a decoded image. The frame is downsampled so its longest side is
/// at most 512 before sampling.
pub fn analyze(img: &DynamicImage) -> CompositionFeatures {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return CompositionFeatures::neutral();
    }

    let scaled;
    let frame = if w.max(h) > MAX_SIDE {
        scaled = img.resize(MAX_SIDE, MAX_SIDE, FilterType::Triangle);
        &scaled
    } else {
        img
    };
    let (w, h) = frame.dimensions();

    // 3×3 grid; last row/column absorbs the remainder.
    let mut grid = [[CellStats::default(); 3]; 3];
    for (row, cells) in grid.iter_mut().enumerate() {
        for (col, cell) in cells.iter_mut().enumerate() {
            let x0 = col as u32 * w / 3;
            let x1 = if col == 2 { w } else { (col as u32 + 1) * w / 3 };
            let y0 = row as u32 * h / 3;
            let y1 = if row == 2 { h } else { (row as u32 + 1) * h / 3 };
            *cell = sample_cell(frame, x0, y0, x1, y1);
        }
    }

    derive_features(&grid)
}

fn derive_features(grid: &[[CellStats; 3]; 3]) -> CompositionFeatures {
    // Symmetry: brightness agreement across the horizontal and vertical axes.
    let mut vertical = 0.0f32;
    let mut horizontal = 0.0f32;
    for i in 0..3 {
        for j in 0..3 {
            vertical += 1.0 - (grid[0][j].mean_brightness - grid[2][j].mean_brightness).abs();
            horizontal += 1.0 - (grid[i][0].mean_brightness - grid[i][2].mean_brightness).abs();
        }
    }
    // Each axis accumulated 9 pair comparisons (3 rows/cols × 3 cells).
    let symmetry = ((vertical / 9.0 + horizontal / 9.0) / 2.0).clamp(0.0, 1.0);

    let corners = [grid[0][0], grid[0][2], grid[2][0], grid[2][2]];
    let corner_contrast =
        corners.iter().map(|c| c.contrast).sum::<f32>() / corners.len() as f32;
    let global_contrast = grid
        .iter()
        .flat_map(|row| row.iter())
        .map(|c| c.contrast)
        .sum::<f32>()
        / 9.0;
    let rule_of_thirds = if global_contrast > 1e-6 {
        (corner_contrast / global_contrast * 0.5).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let corner_brightness =
        corners.iter().map(|c| c.mean_brightness).sum::<f32>() / corners.len() as f32;
    let center_weight =
        (0.5 + (grid[1][1].mean_brightness - corner_brightness) / 2.0).clamp(0.0, 1.0);

    let total_edges: u32 = grid.iter().flat_map(|r| r.iter()).map(|c| c.edges).sum();
    let border_edges: u32 = grid
        .iter()
        .enumerate()
        .flat_map(|(i, row)| {
            row.iter()
                .enumerate()
                .filter(move |(j, _)| i != 1 || *j != 1)
                .map(|(_, c)| c.edges)
        })
        .sum();
    let edge_density = if total_edges > 0 {
        border_edges as f32 / total_edges as f32
    } else {
        0.5
    };

    let total_samples: u32 = grid.iter().flat_map(|r| r.iter()).map(|c| c.samples).sum();
    let edge_fraction = if total_samples > 0 {
        total_edges as f32 / total_samples as f32
    } else {
        0.0
    };
    // Brightness stdev tops out at 0.5 for a two-tone cell.
    let contrast_norm = (global_contrast * 2.0).clamp(0.0, 1.0);
    let complexity = ((edge_fraction + contrast_norm) / 2.0).clamp(0.0, 1.0);

    CompositionFeatures {
        symmetry,
        rule_of_thirds,
        center_weight,
        edge_density,
        complexity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn flat_image(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |_, _| Rgb([v, v, v])))
    }

    #[test]
    fn test_flat_image_is_symmetric_and_simple() {
        let f = analyze(&flat_image(120, 120, 128));
        assert!(f.symmetry > 0.95, "flat image is symmetric: {}", f.symmetry);
        assert!(f.complexity < 0.1, "flat image is simple: {}", f.complexity);
        assert!((f.edge_density - 0.5).abs() < 1e-6, "no edges → neutral 0.5");
        assert!((f.center_weight - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_bright_center_scores_above_half() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(120, 120, |x, y| {
            if (40..80).contains(&x) && (40..80).contains(&y) {
                Rgb([240, 240, 240])
            } else {
                Rgb([20, 20, 20])
            }
        }));
        let f = analyze(&img);
        assert!(
            f.center_weight > 0.5,
            "bright centered subject scores above 0.5: {}",
            f.center_weight
        );
    }

    #[test]
    fn test_half_split_breaks_vertical_symmetry() {
        // Top half bright, bottom half dark
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(120, 120, |_, y| {
            if y < 60 {
                Rgb([230, 230, 230])
            } else {
                Rgb([20, 20, 20])
            }
        }));
        let f = analyze(&img);
        assert!(
            f.symmetry < 0.8,
            "top/bottom split lowers symmetry: {}",
            f.symmetry
        );
    }

    #[test]
    fn test_noise_is_complex() {
        // Checkerboard at sampling frequency: every sampled neighbor differs
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(128, 128, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }));
        let f = analyze(&img);
        let flat = analyze(&flat_image(128, 128, 128));
        assert!(
            f.complexity > flat.complexity,
            "checkerboard beats flat: {} vs {}",
            f.complexity,
            flat.complexity
        );
    }

    #[test]
    fn test_all_features_in_unit_range() {
        let imgs = [
            flat_image(50, 50, 0),
            flat_image(700, 300, 255),
            DynamicImage::ImageRgb8(RgbImage::from_fn(97, 53, |x, y| {
                Rgb([(x * 2) as u8, (y * 3) as u8, 77])
            })),
        ];
        for img in &imgs {
            let f = analyze(img);
            for v in f.as_array() {
                assert!((0.0..=1.0).contains(&v), "feature out of range: {v}");
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(200, 150, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
        }));
        assert_eq!(analyze(&img), analyze(&img));
    }

    #[test]
    fn test_degenerate_image_is_neutral() {
        let f = analyze(&DynamicImage::ImageRgb8(RgbImage::new(0, 0)));
        assert_eq!(f, CompositionFeatures::neutral());
    }

    #[test]
    fn test_similarity_identical_is_one() {
        let f = CompositionFeatures {
            symmetry: 0.8,
            rule_of_thirds: 0.3,
            center_weight: 0.6,
            edge_density: 0.4,
            complexity: 0.7,
        };
        assert!((f.similarity(&f) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_extremes() {
        let lo = CompositionFeatures {
            symmetry: 0.0,
            rule_of_thirds: 0.0,
            center_weight: 0.0,
            edge_density: 0.0,
            complexity: 0.0,
        };
        let hi = CompositionFeatures {
            symmetry: 1.0,
            rule_of_thirds: 1.0,
            center_weight: 1.0,
            edge_density: 1.0,
            complexity: 1.0,
        };
        assert!(lo.similarity(&hi).abs() < 1e-6);
    }
}
