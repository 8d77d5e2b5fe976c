//! # Sources Module
//!
//! Everything that turns a user request into playable [`TrackInfo`] values.
//!
//! ## Architecture
//!
//! - [`MediaGateway`] - narrow async interface to the media providers
//!   (search, resolve, open stream). [`gateway::HttpGateway`] is the
//!   production implementation built on `yt-dlp`, SoundCloud api-v2 and the
//!   Spotify Web API.
//! - [`ranker`] - scores search candidates against an "artist - title" query.
//! - [`waterfall`] - the ordered resolution strategies (SoundCloud → Spotify →
//!   YouTube → search) with duration-aware disambiguation.
//! - [`links`] - URL classification for all supported providers.
//! - [`rate_limit`] - bounded retry for HTTP 429 responses.

pub mod gateway;
pub mod links;
pub mod ranker;
pub mod rate_limit;
pub mod soundcloud;
pub mod spotify;
pub mod waterfall;
pub mod youtube;

use async_trait::async_trait;
use std::{fmt, time::Duration};

use crate::{
    audio::track::{PendingMetadata, PendingSource, TrackInfo},
    error::ProviderError,
};

pub use gateway::HttpGateway;
pub use links::{QueryKind, SpotifyKind, SpotifyLink};
pub use ranker::{RankerConfig, SearchRanker};
pub use spotify::SpotifyTrackMeta;
pub use waterfall::{MatchConfig, ResolveOptions, Waterfall};

/// Tipos de fuentes de música
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    YouTube,
    SoundCloud,
    Spotify,
    Direct,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::YouTube => "youtube",
            Provider::SoundCloud => "soundcloud",
            Provider::Spotify => "spotify",
            Provider::Direct => "direct",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::YouTube => "YouTube",
            Provider::SoundCloud => "SoundCloud",
            Provider::Spotify => "Spotify",
            Provider::Direct => "URL directa",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Interfaz común para todos los proveedores de medios.
///
/// Los errores "sin resultados" se expresan con listas vacías u `Option`;
/// `Err` queda para fallos reales del proveedor.
#[async_trait]
pub trait MediaGateway: Send + Sync + 'static {
    /// Recurso de audio abierto, listo para entregar al sink
    type Resource: Send + 'static;

    /// Busca tracks en un proveedor
    async fn search_tracks(
        &self,
        provider: Provider,
        query: &str,
        limit: usize,
    ) -> Result<Vec<TrackInfo>, ProviderError>;

    /// Resuelve una URL a uno o varios tracks (track suelto o playlist)
    async fn resolve_by_url(&self, provider: Provider, url: &str) -> Result<Vec<TrackInfo>, ProviderError>;

    /// Resuelve un id nativo del proveedor a un track reproducible
    async fn resolve_by_id(&self, provider: Provider, id: &str) -> Result<Option<TrackInfo>, ProviderError>;

    /// Sigue las redirecciones de un enlace corto
    async fn expand_short_link(&self, url: &str) -> Result<String, ProviderError>;

    /// Indica si hay credenciales de API para el proveedor
    fn has_credentials(&self, provider: Provider) -> bool;

    /// Tracks de un enlace de Spotify vía Web API (requiere credenciales)
    async fn fetch_spotify(&self, link: &SpotifyLink) -> Result<Vec<SpotifyTrackMeta>, ProviderError>;

    /// Metadata de un track de Spotify sin credenciales (oEmbed + meta tags)
    async fn scrape_spotify_track(&self, url: &str) -> Result<Option<SpotifyTrackMeta>, ProviderError>;

    /// Completa título/artistas/duración de un placeholder
    async fn fetch_pending_metadata(&self, pending: &PendingSource) -> Result<PendingMetadata, ProviderError>;

    /// Abre el stream de audio; debe fallar dentro de `budget`
    async fn open_audio_stream(&self, track: &TrackInfo, budget: Duration) -> Result<Self::Resource, ProviderError>;

    /// Libera un recurso abierto que no se va a reproducir
    fn release(&self, resource: Self::Resource) {
        drop(resource);
    }
}
