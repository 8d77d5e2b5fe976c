use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::sources::Provider;

/// Identificador de un track dentro de la cola. Nunca se reutiliza.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Generador monotónico de ids, compartido por todas las colas del proceso
/// e inyectado al construir cada [`GuildQueue`](super::queue::GuildQueue).
#[derive(Debug)]
pub struct TrackIdGenerator {
    next: AtomicU64,
}

impl TrackIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> TrackId {
        TrackId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TrackIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Marca de un clon sintético generado por el modo loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTag {
    Single,
    Queue,
}

/// Contenido original del que se derivó un track (p.ej. Spotify → YouTube)
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOrigin {
    pub provider: Provider,
    pub id: String,
    pub url: String,
}

/// Identificadores nativos de un placeholder todavía sin resolver
#[derive(Debug, Clone, PartialEq)]
pub enum PendingSource {
    Spotify {
        track_id: String,
        artists: Vec<String>,
        album: Option<String>,
    },
    SoundCloud {
        track_id: u64,
    },
}

impl PendingSource {
    pub fn provider(&self) -> Provider {
        match self {
            PendingSource::Spotify { .. } => Provider::Spotify,
            PendingSource::SoundCloud { .. } => Provider::SoundCloud,
        }
    }

    pub fn provider_id(&self) -> String {
        match self {
            PendingSource::Spotify { track_id, .. } => track_id.clone(),
            PendingSource::SoundCloud { track_id } => track_id.to_string(),
        }
    }

    /// Clave para la caché de metadata (`spotify:4uLU6hMC...`)
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.provider().as_str(), self.provider_id())
    }
}

/// Campos específicos de cada proveedor
#[derive(Debug, Clone, PartialEq)]
pub enum TrackSource {
    YouTube {
        video_id: String,
        channel: Option<String>,
        thumbnail: Option<String>,
        origin: Option<TrackOrigin>,
    },
    SoundCloud {
        track_id: Option<u64>,
        artist: Option<String>,
        artwork: Option<String>,
    },
    Direct,
    Pending(PendingSource),
}

/// Metadata completada por el hidratador sin resolver todavía una URL
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMetadata {
    pub title: String,
    pub artists: Vec<String>,
    pub duration: Option<Duration>,
}

/// Contenido de un track, sin identidad de cola
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub title: String,
    pub url: String,
    pub display_url: String,
    pub duration: Option<Duration>,
    pub source: TrackSource,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>, url: impl Into<String>, source: TrackSource) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            display_url: url.clone(),
            url,
            duration: None,
            source,
        }
    }

    /// Placeholder diferido: sin URL reproducible hasta que se resuelva
    pub fn pending(pending: PendingSource, display_url: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            url: String::new(),
            display_url: display_url.into(),
            duration: None,
            source: TrackSource::Pending(pending),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_display_url(mut self, display_url: impl Into<String>) -> Self {
        self.display_url = display_url.into();
        self
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.source, TrackSource::Pending(_))
    }

    pub fn pending_source(&self) -> Option<&PendingSource> {
        match &self.source {
            TrackSource::Pending(pending) => Some(pending),
            _ => None,
        }
    }

    /// URL que puede abrirse como stream; `None` para placeholders y entradas rotas
    pub fn playable_url(&self) -> Option<&str> {
        if self.is_pending() {
            return None;
        }
        let url = self.url.trim();
        (!url.is_empty()).then_some(url)
    }

    /// El placeholder aún no conoce su título
    pub fn needs_metadata(&self) -> bool {
        self.is_pending() && self.title.trim().is_empty()
    }

    pub fn artist(&self) -> Option<String> {
        match &self.source {
            TrackSource::YouTube { channel, .. } => channel.clone(),
            TrackSource::SoundCloud { artist, .. } => artist.clone(),
            TrackSource::Direct => None,
            TrackSource::Pending(PendingSource::Spotify { artists, .. }) if !artists.is_empty() => {
                Some(artists.join(", "))
            }
            TrackSource::Pending(_) => None,
        }
    }

    pub fn provider(&self) -> Provider {
        match &self.source {
            TrackSource::YouTube { .. } => Provider::YouTube,
            TrackSource::SoundCloud { .. } => Provider::SoundCloud,
            TrackSource::Direct => Provider::Direct,
            TrackSource::Pending(pending) => pending.provider(),
        }
    }

    pub fn thumbnail(&self) -> Option<&str> {
        match &self.source {
            TrackSource::YouTube { thumbnail, .. } => thumbnail.as_deref(),
            TrackSource::SoundCloud { artwork, .. } => artwork.as_deref(),
            _ => None,
        }
    }

    /// Consulta "artista - título" usada para buscar el equivalente reproducible
    pub fn search_query(&self) -> Option<String> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }
        match self.artist() {
            Some(artist) => Some(format!("{} - {}", artist, title)),
            None => Some(title.to_string()),
        }
    }
}

/// Track resuelto que todavía no tiene id de cola
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub info: TrackInfo,
    pub requester: UserId,
}

/// Clave del caché de preload: identidad de cola + URL reproducible
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub id: TrackId,
    pub url: Option<String>,
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "{}@{}", self.id, url),
            None => write!(f, "{}@pending", self.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub requester: UserId,
    pub added_at: DateTime<Utc>,
    pub info: TrackInfo,
    pub loop_tag: Option<LoopTag>,
    pub loop_source_key: Option<TrackId>,
}

impl Track {
    pub(crate) fn new(id: TrackId, request: NewTrack) -> Self {
        Self {
            id,
            requester: request.requester,
            added_at: Utc::now(),
            info: request.info,
            loop_tag: None,
            loop_source_key: None,
        }
    }

    pub fn key(&self) -> TrackKey {
        TrackKey {
            id: self.id,
            url: self.info.playable_url().map(str::to_string),
        }
    }

    /// Identidad del contenido original, estable a través de clones de loop
    pub fn source_key(&self) -> TrackId {
        self.loop_source_key.unwrap_or(self.id)
    }

    pub fn is_pending(&self) -> bool {
        self.info.is_pending()
    }

    pub fn is_loop_clone(&self) -> bool {
        self.loop_tag.is_some()
    }

    /// Clon para el modo loop: id nuevo, misma identidad de origen
    pub(crate) fn loop_clone(&self, id: TrackId, tag: LoopTag) -> Track {
        Track {
            id,
            requester: self.requester,
            added_at: Utc::now(),
            info: self.info.clone(),
            loop_tag: Some(tag),
            loop_source_key: Some(self.source_key()),
        }
    }

    /// Sustituye el placeholder por el contenido resuelto, en el mismo track.
    ///
    /// Devuelve `false` (sin tocar nada) si el track ya no estaba pendiente o
    /// si el contenido nuevo sigue siendo un placeholder.
    pub(crate) fn hydrate(&mut self, resolved: TrackInfo) -> bool {
        if !self.is_pending() || resolved.is_pending() || resolved.playable_url().is_none() {
            return false;
        }
        // El enlace que pidió el usuario (p.ej. Spotify) sigue siendo el visible
        let display_url = if self.info.display_url.is_empty() {
            resolved.display_url.clone()
        } else {
            self.info.display_url.clone()
        };
        self.info = TrackInfo {
            display_url,
            ..resolved
        };
        true
    }

    /// Completa título/artistas/duración de un placeholder
    pub(crate) fn apply_metadata(&mut self, metadata: PendingMetadata) -> bool {
        let TrackSource::Pending(pending) = &mut self.info.source else {
            return false;
        };
        if let PendingSource::Spotify { artists, .. } = pending {
            if artists.is_empty() {
                *artists = metadata.artists;
            }
        }
        self.info.title = metadata.title;
        if self.info.duration.is_none() {
            self.info.duration = metadata.duration;
        }
        true
    }
}
