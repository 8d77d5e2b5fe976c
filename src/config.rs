use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sources::ranker::RankerConfig;
use crate::sources::waterfall::MatchConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // APIs (Opcionales)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub soundcloud_client_id: Option<String>,

    // Cola
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    pub deferred_threshold: usize,
    pub lookahead_window: usize,

    // Búsqueda y ranking
    pub search_limit: usize,
    pub min_match_ratio: f64,
    pub min_duration_secs: u64,
    pub strict_delta_secs: u64,
    pub loose_delta_secs: u64,

    // Tiempos límite
    pub open_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub rate_limit_retries: u32,
    pub rate_limit_max_wait_secs: u64,
    pub hydration_pause_ms: u64,
    pub metadata_cache_ttl_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // APIs
            spotify_client_id: optional_var("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: optional_var("SPOTIFY_CLIENT_SECRET"),
            soundcloud_client_id: optional_var("SOUNDCLOUD_CLIENT_ID"),

            // Cola
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_playlist_size: std::env::var("MAX_PLAYLIST_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            deferred_threshold: std::env::var("DEFERRED_THRESHOLD")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            lookahead_window: std::env::var("LOOKAHEAD_WINDOW")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,

            // Búsqueda
            search_limit: std::env::var("SEARCH_LIMIT")
                .unwrap_or_else(|_| "8".to_string())
                .parse()?,
            min_match_ratio: std::env::var("MIN_MATCH_RATIO")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            min_duration_secs: std::env::var("MIN_DURATION_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            strict_delta_secs: std::env::var("STRICT_DELTA_SECS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()?,
            loose_delta_secs: std::env::var("LOOSE_DELTA_SECS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()?,

            // Tiempos límite
            open_timeout_secs: std::env::var("OPEN_TIMEOUT_SECS")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            rate_limit_retries: std::env::var("RATE_LIMIT_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            rate_limit_max_wait_secs: std::env::var("RATE_LIMIT_MAX_WAIT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            hydration_pause_ms: std::env::var("HYDRATION_PAUSE_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()?,
            metadata_cache_ttl_secs: std::env::var("METADATA_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Queue and playlist limits must be greater than 0
    /// - Match ratio must be within `0.0..=1.0`
    /// - The strict duration delta cannot exceed the loose one
    /// - Timeouts must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.search_limit == 0 {
            anyhow::bail!("Search limit must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.min_match_ratio) {
            anyhow::bail!("Min match ratio must be between 0.0 and 1.0, got: {}", self.min_match_ratio);
        }

        if self.strict_delta_secs > self.loose_delta_secs {
            anyhow::bail!(
                "Strict duration delta ({}s) cannot exceed loose delta ({}s)",
                self.strict_delta_secs,
                self.loose_delta_secs
            );
        }

        if self.open_timeout_secs == 0 || self.resolve_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        // Spotify necesita ambos valores o ninguno
        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Credentials are reported only as present/absent.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Credentials: Spotify={}, SoundCloud={}\n  \
            Queue: {} max, {} per playlist, deferred above {}, lookahead {}\n  \
            Matching: ratio {:.2}, min {}s, delta {}s/{}s\n  \
            Timeouts: open {}s, resolve {}s, {} retries (max wait {}s)",
            self.spotify_client_id.is_some(),
            self.soundcloud_client_id.is_some(),
            self.max_queue_size,
            self.max_playlist_size,
            self.deferred_threshold,
            self.lookahead_window,
            self.min_match_ratio,
            self.min_duration_secs,
            self.strict_delta_secs,
            self.loose_delta_secs,
            self.open_timeout_secs,
            self.resolve_timeout_secs,
            self.rate_limit_retries,
            self.rate_limit_max_wait_secs,
        )
    }

    pub fn ranker(&self) -> RankerConfig {
        RankerConfig {
            min_match_ratio: self.min_match_ratio,
            min_duration: Duration::from_secs(self.min_duration_secs),
            ..RankerConfig::default()
        }
    }

    pub fn matching(&self) -> MatchConfig {
        MatchConfig {
            strict_delta: Duration::from_secs(self.strict_delta_secs),
            loose_delta: Duration::from_secs(self.loose_delta_secs),
            search_limit: self.search_limit,
            deferred_threshold: self.deferred_threshold,
            max_playlist_size: self.max_playlist_size,
            ..MatchConfig::default()
        }
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            max_queue_size: self.max_queue_size,
            lookahead_window: self.lookahead_window,
            open_timeout: Duration::from_secs(self.open_timeout_secs),
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            hydration_pause: Duration::from_millis(self.hydration_pause_ms),
        }
    }

    pub fn rate_limit(&self) -> crate::sources::rate_limit::RetryPolicy {
        crate::sources::rate_limit::RetryPolicy {
            max_retries: self.rate_limit_retries,
            max_wait: Duration::from_secs(self.rate_limit_max_wait_secs),
            ..Default::default()
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            spotify_client_id: None,
            spotify_client_secret: None,
            soundcloud_client_id: None,

            max_queue_size: 1000,
            max_playlist_size: 100,
            deferred_threshold: 10,
            lookahead_window: 2,

            search_limit: 8,
            min_match_ratio: 0.5,
            min_duration_secs: 30,
            strict_delta_secs: 8,
            loose_delta_secs: 25,

            open_timeout_secs: 12,
            resolve_timeout_secs: 20,
            rate_limit_retries: 3,
            rate_limit_max_wait_secs: 30,
            hydration_pause_ms: 250,
            metadata_cache_ttl_secs: 3600,
        }
    }
}

/// Límites de reproducción derivados de [`Config`]
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub max_queue_size: usize,
    pub lookahead_window: usize,
    pub open_timeout: Duration,
    pub resolve_timeout: Duration,
    pub hydration_pause: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Config::default().playback()
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
