//! Platform seams.
//!
//! The engine core stays testable by talking to the OS through small traits:
//! applying a wallpaper, decoding images, extracting palettes, reading the
//! clock and the device status. Default implementations cover a desktop
//! setup (external setter command, `image` decode, k-means palettes).

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use kmeans_colors::get_kmeans_hamerly;
use palette::{IntoColor, Lab, Srgb};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Which surface receives the wallpaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplyTarget {
    #[default]
    Home,
    Lock,
    Both,
}

impl ApplyTarget {
    pub fn name(&self) -> &'static str {
        match self {
            ApplyTarget::Home => "home",
            ApplyTarget::Lock => "lock",
            ApplyTarget::Both => "both",
        }
    }
}

/// The external "put pixels on screen" primitive.
///
/// Implementations must be cheap to call for the guard check; the actual
/// apply may block and is wrapped in a timeout by the orchestrator.
pub trait WallpaperSetter: Send + Sync {
    /// True when a live/animated wallpaper owns the surface; applying a
    /// static image must be refused while this holds.
    fn live_wallpaper_active(&self) -> bool {
        false
    }

    fn apply(&self, path: &Path, target: ApplyTarget) -> Result<()>;
}

/// Applies wallpapers by invoking an external command (swww, feh, a vendor
/// helper) with the file path appended.
pub struct CommandSetter {
    command: String,
}

impl CommandSetter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl WallpaperSetter for CommandSetter {
    fn apply(&self, path: &Path, target: ApplyTarget) -> Result<()> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().context("empty setter command")?;
        let status = Command::new(program)
            .args(parts)
            .arg(path)
            .status()
            .with_context(|| format!("failed to run setter '{}'", self.command))?;
        if !status.success() {
            anyhow::bail!("setter exited with {status} for target {}", target.name());
        }
        debug!(path = %path.display(), target = target.name(), "wallpaper applied");
        Ok(())
    }
}

/// Decodes an image file into pixels.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DynamicImage>;
}

/// Default decoder backed by the `image` crate.
pub struct FileImageDecoder;

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, path: &Path) -> Result<DynamicImage> {
        image::open(path).with_context(|| format!("failed to decode {}", path.display()))
    }
}

/// Extracts a dominant-first hex palette from a decoded image.
pub trait PaletteExtractor: Send + Sync {
    fn extract(&self, img: &DynamicImage, k: usize) -> Vec<String>;
}

/// K-means over a small LAB thumbnail, centroids ordered by cluster size.
pub struct KmeansPaletteExtractor;

impl PaletteExtractor for KmeansPaletteExtractor {
    fn extract(&self, img: &DynamicImage, k: usize) -> Vec<String> {
        const THUMBNAIL_SIZE: u32 = 128;
        const MAX_ITERATIONS: usize = 30;
        const CONVERGENCE: f32 = 5.0;

        if k == 0 {
            return Vec::new();
        }

        let thumb = img.resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle);
        let rgb = thumb.to_rgb8();
        let lab: Vec<Lab> = rgb
            .pixels()
            .map(|p| {
                let srgb = Srgb::new(
                    p.0[0] as f32 / 255.0,
                    p.0[1] as f32 / 255.0,
                    p.0[2] as f32 / 255.0,
                );
                srgb.into_color()
            })
            .collect();
        if lab.is_empty() {
            return Vec::new();
        }

        let result = get_kmeans_hamerly(k, MAX_ITERATIONS, CONVERGENCE, false, &lab, 0);

        let mut counts = vec![0usize; k];
        for &idx in &result.indices {
            if (idx as usize) < counts.len() {
                counts[idx as usize] += 1;
            }
        }

        let mut pairs: Vec<(String, usize)> = result
            .centroids
            .iter()
            .zip(counts.iter())
            .map(|(c, &count)| {
                let srgb: Srgb = (*c).into_color();
                let hex = format!(
                    "#{:02x}{:02x}{:02x}",
                    (srgb.red * 255.0) as u8,
                    (srgb.green * 255.0) as u8,
                    (srgb.blue * 255.0) as u8
                );
                (hex, count)
            })
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        pairs.into_iter().map(|(hex, _)| hex).collect()
    }
}

/// Wall-clock source, swappable in tests.
pub trait Clock: Send + Sync {
    /// Unix seconds.
    fn now(&self) -> i64;

    fn now_local(&self) -> chrono::DateTime<chrono::Local> {
        chrono::Local::now()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Connectivity classes a duty may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Offline,
    Metered,
    Unmetered,
}

/// Device status used by the scheduler's resource guards.
pub trait SystemStatus: Send + Sync {
    fn network(&self) -> NetworkState;
    fn battery_low(&self) -> bool;
    fn storage_low(&self) -> bool;
    /// Primary display size for the smart-crop preprocess.
    fn screen_size(&self) -> (u32, u32);
}

/// Desktop default: always online and unconstrained.
pub struct DesktopStatus {
    pub screen: (u32, u32),
}

impl Default for DesktopStatus {
    fn default() -> Self {
        Self {
            screen: (1920, 1080),
        }
    }
}

impl SystemStatus for DesktopStatus {
    fn network(&self) -> NetworkState {
        NetworkState::Unmetered
    }

    fn battery_low(&self) -> bool {
        false
    }

    fn storage_low(&self) -> bool {
        false
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_kmeans_extractor_dominant_first() {
        // 3/4 red, 1/4 blue
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, _| {
            if x < 48 {
                Rgb([200, 20, 20])
            } else {
                Rgb([20, 20, 200])
            }
        }));
        let palette = KmeansPaletteExtractor.extract(&img, 2);
        assert_eq!(palette.len(), 2);
        let dominant = crate::palette::hex_to_rgb(&palette[0]).unwrap();
        assert!(
            dominant.0 > dominant.2,
            "dominant cluster should be the red one, got {palette:?}"
        );
    }

    #[test]
    fn test_kmeans_extractor_zero_k() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        assert!(KmeansPaletteExtractor.extract(&img, 0).is_empty());
    }

    #[test]
    fn test_apply_target_names() {
        assert_eq!(ApplyTarget::Home.name(), "home");
        assert_eq!(ApplyTarget::Both.name(), "both");
    }

    #[test]
    fn test_default_setter_guard_is_open() {
        let setter = CommandSetter::new("true");
        assert!(!setter.live_wallpaper_active());
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = testing::ManualClock::at(100);
        assert_eq!(clock.now(), 100);
        clock.advance(42);
        assert_eq!(clock.now(), 142);
    }
}
