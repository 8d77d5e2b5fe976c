use async_trait::async_trait;
use songbird::input::{HttpRequest, Input, YoutubeDl};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    links::{self, SpotifyLink},
    rate_limit::{check_status, with_rate_limit_retry, RetryPolicy},
    soundcloud::SoundCloudClient,
    spotify::{SpotifyClient, SpotifyTrackMeta},
    youtube::YouTubeClient,
    MediaGateway, Provider,
};
use crate::{
    audio::track::{PendingMetadata, PendingSource, TrackInfo, TrackSource},
    config::Config,
    error::ProviderError,
};

const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".ogg", ".opus", ".flac", ".m4a", ".aac", ".webm"];

/// Gateway de producción: yt-dlp para YouTube, api-v2 para SoundCloud y la
/// Web API de Spotify. Los recursos son `Input` de songbird.
pub struct HttpGateway {
    http: reqwest::Client,
    youtube: YouTubeClient,
    soundcloud: SoundCloudClient,
    spotify: SpotifyClient,
    retry: RetryPolicy,
    max_playlist_size: usize,
}

impl HttpGateway {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("open-music-queue/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.resolve_timeout_secs))
            .build()?;
        let retry = config.rate_limit();

        info!(
            "🌐 Gateway listo (Spotify API: {}, SoundCloud API: {})",
            config.spotify_client_id.is_some(),
            config.soundcloud_client_id.is_some()
        );

        Ok(Self {
            youtube: YouTubeClient::new(Duration::from_secs(config.resolve_timeout_secs)),
            soundcloud: SoundCloudClient::new(http.clone(), config.soundcloud_client_id.clone(), retry.clone()),
            spotify: SpotifyClient::new(
                http.clone(),
                config.spotify_client_id.clone(),
                config.spotify_client_secret.clone(),
                retry.clone(),
            ),
            http,
            retry,
            max_playlist_size: config.max_playlist_size,
        })
    }

    /// URL http(s) de un archivo de audio servido directamente
    async fn inspect_direct(&self, url: &str) -> Result<Vec<TrackInfo>, ProviderError> {
        let parsed = Url::parse(url)?;
        let response = with_rate_limit_retry(&self.retry, "direct head", || async {
            let response = self.http.head(parsed.as_str()).send().await?;
            check_status(Provider::Direct, response)
        })
        .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        let path = parsed.path().to_lowercase();
        let is_media = content_type.starts_with("audio/")
            || content_type.starts_with("video/")
            || AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext));
        if !is_media {
            debug!("{} no es un archivo de audio ({})", url, content_type);
            return Ok(Vec::new());
        }

        let file_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(|name| urlencoding::decode(name).map(|s| s.into_owned()).unwrap_or_else(|_| name.to_string()))
            .unwrap_or_else(|| url.to_string());

        Ok(vec![TrackInfo::new(file_name, url, TrackSource::Direct)])
    }
}

#[async_trait]
impl MediaGateway for HttpGateway {
    type Resource = Input;

    async fn search_tracks(
        &self,
        provider: Provider,
        query: &str,
        limit: usize,
    ) -> Result<Vec<TrackInfo>, ProviderError> {
        match provider {
            Provider::YouTube => self.youtube.search(query, limit).await,
            Provider::SoundCloud => self.soundcloud.search(query, limit).await,
            // Spotify no es reproducible y las URLs directas no se buscan
            Provider::Spotify | Provider::Direct => Ok(Vec::new()),
        }
    }

    async fn resolve_by_url(&self, provider: Provider, url: &str) -> Result<Vec<TrackInfo>, ProviderError> {
        match provider {
            Provider::YouTube => {
                if links::youtube_video_id(url).is_none() && links::youtube_playlist_id(url).is_some() {
                    self.youtube.get_playlist(url, self.max_playlist_size).await
                } else {
                    Ok(self.youtube.get_info(url).await?.into_iter().collect())
                }
            }
            Provider::SoundCloud => self.soundcloud.resolve(url, self.max_playlist_size).await,
            Provider::Direct => {
                let tracks = self.inspect_direct(url).await?;
                if !tracks.is_empty() {
                    return Ok(tracks);
                }
                // yt-dlp entiende muchos sitios además de YouTube
                Ok(self.youtube.get_info(url).await?.into_iter().collect())
            }
            Provider::Spotify => Ok(Vec::new()),
        }
    }

    async fn resolve_by_id(&self, provider: Provider, id: &str) -> Result<Option<TrackInfo>, ProviderError> {
        match provider {
            Provider::SoundCloud => {
                let track_id = id
                    .parse::<u64>()
                    .map_err(|_| ProviderError::NotFound(format!("soundcloud track {}", id)))?;
                self.soundcloud.track_by_id(track_id).await
            }
            Provider::YouTube => {
                self.youtube
                    .get_info(&format!("https://www.youtube.com/watch?v={}", id))
                    .await
            }
            Provider::Spotify | Provider::Direct => Ok(None),
        }
    }

    async fn expand_short_link(&self, url: &str) -> Result<String, ProviderError> {
        let response = with_rate_limit_retry(&self.retry, "short link", || async {
            let response = self.http.get(url).send().await?;
            check_status(Provider::SoundCloud, response)
        })
        .await?;
        Ok(response.url().to_string())
    }

    fn has_credentials(&self, provider: Provider) -> bool {
        match provider {
            Provider::Spotify => self.spotify.has_credentials(),
            Provider::SoundCloud => self.soundcloud.has_credentials(),
            Provider::YouTube | Provider::Direct => true,
        }
    }

    async fn fetch_spotify(&self, link: &SpotifyLink) -> Result<Vec<SpotifyTrackMeta>, ProviderError> {
        self.spotify.fetch(link, self.max_playlist_size).await
    }

    async fn scrape_spotify_track(&self, url: &str) -> Result<Option<SpotifyTrackMeta>, ProviderError> {
        self.spotify.scrape_track(url).await
    }

    async fn fetch_pending_metadata(&self, pending: &PendingSource) -> Result<PendingMetadata, ProviderError> {
        match pending {
            PendingSource::Spotify { track_id, .. } => {
                Ok(self.spotify.track_metadata(track_id).await?.metadata())
            }
            PendingSource::SoundCloud { track_id } => self.soundcloud.track_metadata(*track_id).await,
        }
    }

    async fn open_audio_stream(&self, track: &TrackInfo, budget: Duration) -> Result<Input, ProviderError> {
        let url = track
            .playable_url()
            .ok_or_else(|| ProviderError::ResourceOpenFailed(format!("'{}' no tiene URL reproducible", track.title)))?
            .to_string();

        if matches!(track.source, TrackSource::Direct) {
            debug!("🎵 Abriendo stream directo: {}", url);
            return Ok(HttpRequest::new(self.http.clone(), url).into());
        }

        debug!("🎵 Abriendo stream vía yt-dlp: {}", url);
        let mut input: Input = YoutubeDl::new(self.http.clone(), url.clone()).into();
        // Sondear la fuente detecta videos privados o bloqueados antes de reproducir
        match tokio::time::timeout(budget, input.aux_metadata()).await {
            Ok(Ok(_)) => Ok(input),
            Ok(Err(e)) => {
                warn!("⚠️ No se pudo abrir {}: {}", url, e);
                Err(ProviderError::ResourceOpenFailed(e.to_string()))
            }
            Err(_) => Err(ProviderError::Timeout(budget)),
        }
    }
}
