use std::time::Duration;
use thiserror::Error;

/// Typed failures of the engine core.
///
/// Each variant carries its retry disposition: schedulers ask
/// [`EngineError::is_retryable`] instead of matching variants themselves.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network-level manifest fetch failure (DNS, connect, timeout).
    #[error("manifest fetch failed: {0}")]
    ManifestFetch(String),

    /// Server rejected or errored the manifest request.
    #[error("manifest fetch returned HTTP {0}")]
    ManifestHttp(u16),

    /// Manifest body did not parse; terminal until the CDN publishes a fix.
    #[error("manifest parse failed (version {version:?}): {message}")]
    ManifestParse {
        version: Option<u32>,
        message: String,
    },

    /// Manifest is well-formed but incompatible with the local model state.
    #[error("manifest incompatible: {0}")]
    ManifestIncompatible(String),

    /// Image bytes on disk could not be decoded.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// A single wallpaper download failed (IO or timeout).
    #[error("download failed for {id}: {message}")]
    Download { id: String, message: String },

    /// Cache directory IO failure.
    #[error("cache error: {0}")]
    Cache(#[from] std::io::Error),

    /// A live wallpaper is active; applying a static image would be ignored
    /// or would clobber it. No state is mutated on this path.
    #[error("a live wallpaper is active; refusing to apply")]
    LiveWallpaperBlocking,

    /// Nothing to choose from. Callers treat apply-next as a successful no-op.
    #[error("no candidate wallpapers available")]
    NoCandidates,

    /// The learner's unit-vector post-condition failed after a write race;
    /// the update was dropped.
    #[error("preference update dropped: unit-vector invariant violated")]
    PreferenceWriteSkew,

    /// The wallpaper apply primitive failed or timed out.
    #[error("apply primitive failed: {0}")]
    Apply(String),
}

impl EngineError {
    /// Whether the operation may succeed if repeated after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ManifestFetch(_) => true,
            EngineError::ManifestHttp(status) => *status >= 500,
            EngineError::Download { .. } => true,
            EngineError::Cache(_) => true,
            EngineError::ManifestParse { .. }
            | EngineError::ManifestIncompatible(_)
            | EngineError::Decode(_)
            | EngineError::LiveWallpaperBlocking
            | EngineError::NoCandidates
            | EngineError::PreferenceWriteSkew
            | EngineError::Apply(_) => false,
        }
    }
}

/// Exponential backoff series: `base · 2^attempt`, capped.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let scaled = base.saturating_mul(1u32 << attempt.min(20));
    scaled.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_dispositions() {
        assert!(EngineError::ManifestFetch("timeout".into()).is_retryable());
        assert!(EngineError::ManifestHttp(503).is_retryable());
        assert!(!EngineError::ManifestHttp(404).is_retryable());
        assert!(!EngineError::ManifestParse {
            version: Some(3),
            message: "bad json".into()
        }
        .is_retryable());
        assert!(!EngineError::NoCandidates.is_retryable());
        assert!(!EngineError::LiveWallpaperBlocking.is_retryable());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, cap, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, cap, 10), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_large_attempt_does_not_overflow() {
        let d = backoff_delay(Duration::from_secs(60), Duration::from_secs(1800), 63);
        assert_eq!(d, Duration::from_secs(1800));
    }
}
