//! # Error Types
//!
//! Typed errors for provider access, track resolution, queue mutation and the
//! audio sink. Resolution and playback code decide between "swallow and move
//! on" and "surface to the caller" by matching on these variants.

use std::time::Duration;

use serenity::model::id::GuildId;

use crate::sources::Provider;

/// Errores de un proveedor de medios (HTTP, yt-dlp, scraping)
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error (subproceso)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// yt-dlp terminó con error
    #[error("yt-dlp failed: {0}")]
    Subprocess(String),

    /// El proveedor respondió 429 y se agotaron los reintentos
    #[error("{provider} rate limited the request (retry after {retry_after:?})")]
    RateLimited {
        provider: Provider,
        retry_after: Option<Duration>,
    },

    /// API returned an error status
    #[error("{provider} API error: {status}")]
    Api { provider: Provider, status: u16 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("missing credentials for {0}")]
    MissingCredentials(Provider),

    /// No se pudo abrir el stream de audio
    #[error("could not open audio stream: {0}")]
    ResourceOpenFailed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Resultado terminal de la cascada de resolución.
///
/// "Sin resultados" nunca es un error: se devuelve una lista vacía.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{provider} credentials are required to load a {collection}")]
    ProviderCredentialsMissing {
        provider: Provider,
        collection: &'static str,
    },

    #[error("personalized SoundCloud links (discover/mixes) cannot be played: {0}")]
    PersonalizedLinkUnsupported(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full (max {max} tracks)")]
    Full { max: usize },

    #[error("index {index} out of range (queue has {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no queue exists for guild {0}")]
    UnknownGuild(GuildId),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("no active voice connection")]
    NotConnected,

    #[error("voice driver error: {0}")]
    Driver(String),
}
