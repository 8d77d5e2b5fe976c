use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::{
    sync::LazyLock,
    time::{Duration, Instant},
};
use tracing::{debug, info};

use super::{
    links::{SpotifyKind, SpotifyLink},
    rate_limit::{check_status, with_rate_limit_retry, RetryPolicy},
    Provider,
};
use crate::{audio::track::PendingMetadata, error::ProviderError};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const OEMBED_URL: &str = "https://open.spotify.com/oembed";

static META_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+(?:property|name)="([^"]+)"\s+content="([^"]*)""#).expect("regex de meta tags válida")
});

/// Metadata de un track de Spotify (nunca reproducible por sí misma)
#[derive(Debug, Clone, PartialEq)]
pub struct SpotifyTrackMeta {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
    pub url: String,
}

impl SpotifyTrackMeta {
    /// "Artista1, Artista2 - Título"
    pub fn search_query(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artists.join(", "), self.title)
        }
    }

    pub fn metadata(&self) -> PendingMetadata {
        PendingMetadata {
            title: self.title.clone(),
            artists: self.artists.clone(),
            duration: self.duration,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiAlbumRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    duration_ms: Option<u64>,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    album: Option<ApiAlbumRef>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    name: String,
    tracks: Page<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Cliente de la Web API de Spotify (client credentials) y del scraping público
pub struct SpotifyClient {
    http: reqwest::Client,
    credentials: Option<(String, String)>,
    token: Mutex<Option<CachedToken>>,
    retry: RetryPolicy,
}

impl SpotifyClient {
    pub fn new(http: reqwest::Client, client_id: Option<String>, client_secret: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            http,
            credentials: client_id.zip(client_secret),
            token: Mutex::new(None),
            retry,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.token.lock().as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let (id, secret) = self
            .credentials
            .as_ref()
            .ok_or(ProviderError::MissingCredentials(Provider::Spotify))?;
        let basic = BASE64.encode(format!("{}:{}", id, secret));

        let response = self
            .http
            .post(TOKEN_URL)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", basic))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: TokenResponse = check_status(Provider::Spotify, response)?.json().await?;

        info!("🔑 Token de Spotify renovado (expira en {}s)", token.expires_in);
        // margen de un minuto antes de la expiración real
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.token.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        with_rate_limit_retry(&self.retry, "spotify api", || async {
            let token = self.access_token().await?;
            let response = self.http.get(url).bearer_auth(token).send().await?;
            Ok(check_status(Provider::Spotify, response)?.json::<T>().await?)
        })
        .await
    }

    /// Obtiene los tracks de un track/álbum/playlist, hasta `limit`
    pub async fn fetch(&self, link: &SpotifyLink, limit: usize) -> Result<Vec<SpotifyTrackMeta>, ProviderError> {
        if !self.has_credentials() {
            return Err(ProviderError::MissingCredentials(Provider::Spotify));
        }

        match link.kind {
            SpotifyKind::Track => {
                let track: ApiTrack = self.get_json(&format!("{}/tracks/{}", API_BASE, link.id)).await?;
                Ok(to_meta(track, None).into_iter().collect())
            }
            SpotifyKind::Album => {
                let album: ApiAlbum = self.get_json(&format!("{}/albums/{}", API_BASE, link.id)).await?;
                let album_name = album.name.clone();
                let mut tracks: Vec<SpotifyTrackMeta> = album
                    .tracks
                    .items
                    .into_iter()
                    .filter_map(|track| to_meta(track, Some(album_name.clone())))
                    .collect();
                let mut next = album.tracks.next;
                while let Some(url) = next.filter(|_| tracks.len() < limit) {
                    let page: Page<ApiTrack> = self.get_json(&url).await?;
                    tracks.extend(page.items.into_iter().filter_map(|t| to_meta(t, Some(album_name.clone()))));
                    next = page.next;
                }
                tracks.truncate(limit);
                Ok(tracks)
            }
            SpotifyKind::Playlist => {
                let mut tracks = Vec::new();
                let mut next = Some(format!("{}/playlists/{}/tracks?limit=100", API_BASE, link.id));
                while let Some(url) = next.filter(|_| tracks.len() < limit) {
                    let page: Page<PlaylistItem> = self.get_json(&url).await?;
                    tracks.extend(
                        page.items
                            .into_iter()
                            .filter_map(|item| item.track)
                            .filter_map(|track| to_meta(track, None)),
                    );
                    next = page.next;
                }
                tracks.truncate(limit);
                debug!("📋 Playlist de Spotify {}: {} tracks", link.id, tracks.len());
                Ok(tracks)
            }
        }
    }

    /// Metadata de un track por id (hidratación de placeholders)
    pub async fn track_metadata(&self, track_id: &str) -> Result<SpotifyTrackMeta, ProviderError> {
        let link = SpotifyLink {
            kind: SpotifyKind::Track,
            id: track_id.to_string(),
            url: format!("https://open.spotify.com/track/{}", track_id),
        };
        if self.has_credentials() {
            return self
                .fetch(&link, 1)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::NotFound(link.url.clone()));
        }
        self.scrape_track(&link.url)
            .await?
            .ok_or_else(|| ProviderError::NotFound(link.url))
    }

    /// Sin credenciales: título vía oEmbed, artista y duración vía meta tags
    pub async fn scrape_track(&self, url: &str) -> Result<Option<SpotifyTrackMeta>, ProviderError> {
        let Some(link) = super::links::parse_spotify_link(url) else {
            return Ok(None);
        };

        let oembed: OEmbed = with_rate_limit_retry(&self.retry, "spotify oembed", || async {
            let response = self.http.get(OEMBED_URL).query(&[("url", link.url.as_str())]).send().await?;
            Ok(check_status(Provider::Spotify, response)?.json::<OEmbed>().await?)
        })
        .await?;

        let page = with_rate_limit_retry(&self.retry, "spotify page", || async {
            let response = self.http.get(&link.url).send().await?;
            Ok(check_status(Provider::Spotify, response)?.text().await?)
        })
        .await?;

        let mut meta = parse_page_meta(&page, &link);
        if meta.title.is_empty() {
            meta.title = oembed.title;
        }
        if meta.title.is_empty() {
            return Ok(None);
        }
        Ok(Some(meta))
    }
}

fn to_meta(track: ApiTrack, album: Option<String>) -> Option<SpotifyTrackMeta> {
    // Tracks locales o eliminados no tienen id
    let id = track.id?;
    Some(SpotifyTrackMeta {
        url: format!("https://open.spotify.com/track/{}", id),
        id,
        title: track.name,
        artists: track.artists.into_iter().map(|artist| artist.name).collect(),
        album: album.or_else(|| track.album.map(|album| album.name)),
        duration: track.duration_ms.map(Duration::from_millis),
    })
}

/// Extrae `og:title`, `og:description` ("Artista · Álbum · Canción · 2020") y
/// `music:duration` de la página pública
fn parse_page_meta(page: &str, link: &SpotifyLink) -> SpotifyTrackMeta {
    let mut title = String::new();
    let mut artists = Vec::new();
    let mut duration = None;

    for captures in META_TAG.captures_iter(page) {
        let (Some(key), Some(value)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        let value = decode_entities(value.as_str());
        match key.as_str() {
            "og:title" => title = value,
            "og:description" if artists.is_empty() => {
                if let Some(artist) = value.split(" · ").next().filter(|a| !a.trim().is_empty()) {
                    artists = artist.split(", ").map(str::to_string).collect();
                }
            }
            "music:musician_description" => {
                artists = value.split(", ").map(str::to_string).collect();
            }
            "music:duration" => duration = value.parse::<u64>().ok().map(Duration::from_secs),
            _ => {}
        }
    }

    SpotifyTrackMeta {
        id: link.id.clone(),
        title,
        artists,
        album: None,
        duration,
        url: link.url.clone(),
    }
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
