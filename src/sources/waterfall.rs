//! Ordered resolution of a user query into playable tracks.
//!
//! Each strategy is tried only when the previous one produced nothing usable:
//! SoundCloud links, Spotify links, YouTube references, direct URLs and
//! finally a cross-provider search. "No result" is an empty list; only the
//! conditions the user has to act on are returned as [`ResolveError`].

use futures::{stream, StreamExt};
use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    links::{self, QueryKind, SpotifyKind, SpotifyLink},
    ranker::SearchRanker,
    spotify::SpotifyTrackMeta,
    MediaGateway, Provider,
};
use crate::{
    audio::track::{NewTrack, PendingSource, TrackInfo, TrackOrigin, TrackSource},
    error::{ProviderError, ResolveError},
};

/// Parámetros de la desambiguación por duración y de colecciones
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub strict_delta: Duration,
    pub loose_delta: Duration,
    pub search_limit: usize,
    /// Colecciones más grandes se encolan como placeholders
    pub deferred_threshold: usize,
    pub max_playlist_size: usize,
    /// Sufijos de consulta probados en orden ("" = consulta base)
    pub query_suffixes: Vec<String>,
    pub eager_concurrency: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            strict_delta: Duration::from_secs(8),
            loose_delta: Duration::from_secs(25),
            search_limit: 8,
            deferred_threshold: 10,
            max_playlist_size: 100,
            query_suffixes: vec![String::new(), "official audio".into(), "lyrics".into()],
            eager_concurrency: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub allow_search_fallback: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            allow_search_fallback: true,
        }
    }
}

pub struct Waterfall<G: MediaGateway> {
    gateway: Arc<G>,
    ranker: SearchRanker,
    config: MatchConfig,
}

impl<G: MediaGateway> Waterfall<G> {
    pub fn new(gateway: Arc<G>, ranker: SearchRanker, config: MatchConfig) -> Self {
        Self { gateway, ranker, config }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Resuelve una consulta de usuario a tracks listos para encolar
    pub async fn resolve(
        &self,
        query: &str,
        requester: UserId,
        options: ResolveOptions,
    ) -> Result<Vec<NewTrack>, ResolveError> {
        let tracks = self.resolve_infos(query, options).await?;
        if tracks.is_empty() {
            info!("🔍 Sin resultados para: {}", query);
        } else {
            info!("✅ '{}' resuelto a {} track(s)", query, tracks.len());
        }
        Ok(tracks
            .into_iter()
            .map(|info| NewTrack { info, requester })
            .collect())
    }

    async fn resolve_infos(&self, query: &str, options: ResolveOptions) -> Result<Vec<TrackInfo>, ResolveError> {
        let search_text = match links::classify(query) {
            QueryKind::SoundCloud { url, short_link } => {
                return self.resolve_soundcloud(url, short_link).await;
            }
            QueryKind::Spotify(link) => return self.resolve_spotify(&link).await,
            QueryKind::YouTubeVideo { video_id, url } => {
                let tracks = self.resolve_url(Provider::YouTube, &url).await;
                if !tracks.is_empty() {
                    return Ok(tracks);
                }
                video_id
            }
            QueryKind::YouTubePlaylist { url, .. } => {
                let tracks = self.resolve_url(Provider::YouTube, &url).await;
                if !tracks.is_empty() {
                    return Ok(tracks);
                }
                url
            }
            QueryKind::Url(url) => {
                let tracks = self.resolve_url(Provider::Direct, &url).await;
                if !tracks.is_empty() {
                    return Ok(tracks);
                }
                url
            }
            QueryKind::Search(text) => text,
        };

        if !options.allow_search_fallback {
            debug!("Búsqueda genérica deshabilitada para: {}", query);
            return Ok(Vec::new());
        }
        Ok(self.search_any(&search_text).await.into_iter().collect())
    }

    async fn resolve_url(&self, provider: Provider, url: &str) -> Vec<TrackInfo> {
        match self.gateway.resolve_by_url(provider, url).await {
            Ok(mut tracks) => {
                tracks.truncate(self.config.max_playlist_size);
                tracks
            }
            Err(e) => {
                warn!("⚠️ {} no pudo resolver {}: {}", provider, url, e);
                Vec::new()
            }
        }
    }

    async fn resolve_soundcloud(&self, url: String, short_link: bool) -> Result<Vec<TrackInfo>, ResolveError> {
        let url = if short_link {
            match self.gateway.expand_short_link(&url).await {
                Ok(expanded) => {
                    debug!("🔗 {} → {}", url, expanded);
                    expanded
                }
                Err(e) => {
                    warn!("⚠️ No se pudo expandir el enlace corto {}: {}", url, e);
                    return Ok(Vec::new());
                }
            }
        } else {
            url
        };

        let tracks = self.resolve_url(Provider::SoundCloud, &url).await;
        if tracks.is_empty() && links::is_soundcloud_discover(&url) {
            return Err(ResolveError::PersonalizedLinkUnsupported(url));
        }
        Ok(tracks)
    }

    async fn resolve_spotify(&self, link: &SpotifyLink) -> Result<Vec<TrackInfo>, ResolveError> {
        if !self.gateway.has_credentials(Provider::Spotify) {
            if link.kind != SpotifyKind::Track {
                return Err(ResolveError::ProviderCredentialsMissing {
                    provider: Provider::Spotify,
                    collection: link.kind.as_str(),
                });
            }
            let meta = match self.gateway.scrape_spotify_track(&link.url).await {
                Ok(Some(meta)) => meta,
                Ok(None) => return Ok(Vec::new()),
                Err(e) => {
                    warn!("⚠️ Scraping de Spotify falló para {}: {}", link.url, e);
                    return Ok(Vec::new());
                }
            };
            return Ok(self.match_spotify_track(&meta).await.into_iter().collect());
        }

        let mut metas = match self.gateway.fetch_spotify(link).await {
            Ok(metas) => metas,
            Err(ProviderError::MissingCredentials(provider)) => {
                return Err(ResolveError::ProviderCredentialsMissing {
                    provider,
                    collection: link.kind.as_str(),
                });
            }
            Err(e) => {
                warn!("⚠️ Spotify API falló para {}: {}", link.url, e);
                return Ok(Vec::new());
            }
        };
        metas.truncate(self.config.max_playlist_size);

        if link.kind != SpotifyKind::Track && metas.len() > self.config.deferred_threshold {
            info!(
                "⏳ {} de Spotify con {} tracks: se encolan como placeholders",
                link.kind.as_str(),
                metas.len()
            );
            return Ok(metas.into_iter().map(spotify_placeholder).collect());
        }

        let matched: Vec<TrackInfo> = stream::iter(metas)
            .map(|meta| async move { self.match_spotify_track(&meta).await })
            .buffered(self.config.eager_concurrency.max(1))
            .filter_map(|track| async move { track })
            .collect()
            .await;
        Ok(matched)
    }

    /// Mejor equivalente reproducible de un track de Spotify
    async fn match_spotify_track(&self, meta: &SpotifyTrackMeta) -> Option<TrackInfo> {
        let query = meta.search_query();
        let candidate = match meta.duration {
            Some(target) => match self.match_by_duration(&query, target).await {
                Some(found) => Some(found),
                None => self.search_provider(Provider::SoundCloud, &query).await,
            },
            None => self.search_any(&query).await,
        };

        match candidate {
            Some(track) => Some(attach_origin(track, meta)),
            None => {
                debug!("Sin equivalente para el track de Spotify {}", meta.id);
                None
            }
        }
    }

    /// Búsqueda en YouTube con variantes de consulta, eligiendo por duración
    pub async fn match_by_duration(&self, query: &str, target: Duration) -> Option<TrackInfo> {
        let options = self.ranker.config().default_options();
        let mut variants: Vec<Vec<TrackInfo>> = Vec::with_capacity(self.config.query_suffixes.len());

        for suffix in &self.config.query_suffixes {
            let variant_query = if suffix.is_empty() {
                query.to_string()
            } else {
                format!("{} {}", query, suffix)
            };
            match self
                .gateway
                .search_tracks(Provider::YouTube, &variant_query, self.config.search_limit)
                .await
            {
                // El ranking se hace contra la consulta base: el sufijo sólo amplía la búsqueda
                Ok(candidates) => variants.push(self.ranker.rank(candidates, query, &options)),
                Err(e) => {
                    warn!("⚠️ Búsqueda '{}' falló: {}", variant_query, e);
                    variants.push(Vec::new());
                }
            }

            // Un candidato estricto en una variante temprana ya es la respuesta
            if find_within(&variants, target, self.config.strict_delta).is_some() {
                break;
            }
        }

        select_by_duration(variants, target, self.config.strict_delta, self.config.loose_delta)
    }

    /// Búsqueda genérica: YouTube primero, SoundCloud después
    async fn search_any(&self, query: &str) -> Option<TrackInfo> {
        for provider in [Provider::YouTube, Provider::SoundCloud] {
            if let Some(track) = self.search_provider(provider, query).await {
                return Some(track);
            }
        }
        None
    }

    async fn search_provider(&self, provider: Provider, query: &str) -> Option<TrackInfo> {
        let options = self.ranker.config().default_options();
        match self
            .gateway
            .search_tracks(provider, query, self.config.search_limit)
            .await
        {
            Ok(candidates) => {
                debug!("🔍 {} devolvió {} candidatos para '{}'", provider, candidates.len(), query);
                self.ranker.pick(candidates, query, &options)
            }
            Err(e) => {
                warn!("⚠️ Búsqueda en {} falló: {}", provider, e);
                None
            }
        }
    }

    /// Resuelve un placeholder a contenido reproducible.
    ///
    /// `Ok(None)` significa que el proveedor no tiene equivalente.
    pub async fn resolve_pending(&self, info: &TrackInfo) -> Result<Option<TrackInfo>, ProviderError> {
        let Some(pending) = info.pending_source() else {
            return Ok(info.playable_url().map(|_| info.clone()));
        };

        match pending {
            PendingSource::Spotify {
                track_id,
                artists,
                album,
            } => {
                let meta = if info.needs_metadata() {
                    let fetched = self.gateway.fetch_pending_metadata(pending).await?;
                    SpotifyTrackMeta {
                        id: track_id.clone(),
                        title: fetched.title,
                        artists: if artists.is_empty() { fetched.artists } else { artists.clone() },
                        album: album.clone(),
                        duration: info.duration.or(fetched.duration),
                        url: info.display_url.clone(),
                    }
                } else {
                    SpotifyTrackMeta {
                        id: track_id.clone(),
                        title: info.title.clone(),
                        artists: artists.clone(),
                        album: album.clone(),
                        duration: info.duration,
                        url: info.display_url.clone(),
                    }
                };
                Ok(self.match_spotify_track(&meta).await)
            }
            PendingSource::SoundCloud { track_id } => {
                self.gateway
                    .resolve_by_id(Provider::SoundCloud, &track_id.to_string())
                    .await
            }
        }
    }
}

fn spotify_placeholder(meta: SpotifyTrackMeta) -> TrackInfo {
    let mut info = TrackInfo::pending(
        PendingSource::Spotify {
            track_id: meta.id,
            artists: meta.artists,
            album: meta.album,
        },
        meta.url,
    )
    .with_title(meta.title);
    info.duration = meta.duration;
    info
}

fn attach_origin(mut track: TrackInfo, meta: &SpotifyTrackMeta) -> TrackInfo {
    if let TrackSource::YouTube { origin, .. } = &mut track.source {
        *origin = Some(TrackOrigin {
            provider: Provider::Spotify,
            id: meta.id.clone(),
            url: meta.url.clone(),
        });
    }
    track.title = meta.title.clone();
    track.display_url = meta.url.clone();
    track
}

fn within(candidate: &TrackInfo, target: Duration, delta: Duration) -> bool {
    candidate
        .duration
        .map(|duration| {
            let diff = if duration > target { duration - target } else { target - duration };
            diff <= delta
        })
        .unwrap_or(false)
}

fn find_within(variants: &[Vec<TrackInfo>], target: Duration, delta: Duration) -> Option<&TrackInfo> {
    variants
        .iter()
        .flat_map(|candidates| candidates.iter())
        .find(|candidate| within(candidate, target, delta))
}

/// Primer candidato dentro del delta estricto; si no, dentro del laxo; si no,
/// el mejor de la primera variante con resultados
pub fn select_by_duration(
    variants: Vec<Vec<TrackInfo>>,
    target: Duration,
    strict: Duration,
    loose: Duration,
) -> Option<TrackInfo> {
    if let Some(found) = find_within(&variants, target, strict) {
        return Some(found.clone());
    }
    if let Some(found) = find_within(&variants, target, loose) {
        return Some(found.clone());
    }
    variants.into_iter().find_map(|candidates| candidates.into_iter().next())
}
