use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    rate_limit::{check_status, with_rate_limit_retry, RetryPolicy},
    Provider,
};
use crate::{
    audio::track::{PendingMetadata, PendingSource, TrackInfo, TrackSource},
    error::ProviderError,
};

const API_BASE: &str = "https://api-v2.soundcloud.com";

#[derive(Debug, Deserialize)]
struct ApiUser {
    username: String,
}

/// Track de api-v2. En playlists largas sólo los primeros traen metadata;
/// el resto llega como `{ "id": ... }`
#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: u64,
    title: Option<String>,
    permalink_url: Option<String>,
    /// Milisegundos
    duration: Option<u64>,
    artwork_url: Option<String>,
    user: Option<ApiUser>,
    policy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    #[serde(default)]
    tracks: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum Resolved {
    #[serde(rename = "track")]
    Track(ApiTrack),
    #[serde(rename = "playlist")]
    Playlist(ApiPlaylist),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    collection: Vec<ApiTrack>,
}

/// Cliente de SoundCloud api-v2
pub struct SoundCloudClient {
    http: reqwest::Client,
    client_id: Option<String>,
    retry: RetryPolicy,
}

impl SoundCloudClient {
    pub fn new(http: reqwest::Client, client_id: Option<String>, retry: RetryPolicy) -> Self {
        Self { http, client_id, retry }
    }

    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(ProviderError::MissingCredentials(Provider::SoundCloud))?;
        let url = format!("{}{}", API_BASE, path);

        with_rate_limit_retry(&self.retry, "soundcloud api", || async {
            let response = self
                .http
                .get(&url)
                .query(query)
                .query(&[("client_id", client_id)])
                .send()
                .await?;
            Ok(check_status(Provider::SoundCloud, response)?.json::<T>().await?)
        })
        .await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>, ProviderError> {
        info!("🔍 Buscando en SoundCloud: {}", query);
        let page: SearchPage = self
            .get_json("/search/tracks", &[("q", query.to_string()), ("limit", limit.to_string())])
            .await?;
        Ok(page.collection.into_iter().filter_map(to_track_info).collect())
    }

    /// Resuelve la URL de un track o playlist. Las entradas sin metadata de
    /// una playlist vuelven como placeholders
    pub async fn resolve(&self, url: &str, max_items: usize) -> Result<Vec<TrackInfo>, ProviderError> {
        let resolved: Resolved = self.get_json("/resolve", &[("url", url.to_string())]).await?;
        let tracks: Vec<TrackInfo> = match resolved {
            Resolved::Track(track) => to_track_info(track).into_iter().collect(),
            Resolved::Playlist(playlist) => playlist
                .tracks
                .into_iter()
                .take(max_items)
                .filter_map(to_track_info)
                .collect(),
            Resolved::Other => {
                debug!("URL de SoundCloud no reproducible: {}", url);
                Vec::new()
            }
        };
        Ok(tracks)
    }

    pub async fn track_by_id(&self, track_id: u64) -> Result<Option<TrackInfo>, ProviderError> {
        let track: ApiTrack = match self.get_json(&format!("/tracks/{}", track_id), &[]).await {
            Ok(track) => track,
            Err(ProviderError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(to_track_info(track).filter(|info| !info.is_pending()))
    }

    pub async fn track_metadata(&self, track_id: u64) -> Result<PendingMetadata, ProviderError> {
        let track: ApiTrack = self.get_json(&format!("/tracks/{}", track_id), &[]).await?;
        Ok(PendingMetadata {
            title: track.title.unwrap_or_default(),
            artists: track.user.map(|user| vec![user.username]).unwrap_or_default(),
            duration: track.duration.map(Duration::from_millis),
        })
    }
}

fn to_track_info(track: ApiTrack) -> Option<TrackInfo> {
    if track.policy.as_deref() == Some("BLOCK") {
        return None;
    }

    let (Some(title), Some(permalink)) = (track.title, track.permalink_url) else {
        return Some(TrackInfo::pending(PendingSource::SoundCloud { track_id: track.id }, ""));
    };

    let mut info = TrackInfo::new(
        title,
        permalink,
        TrackSource::SoundCloud {
            track_id: Some(track.id),
            artist: track.user.map(|user| user.username),
            artwork: track.artwork_url,
        },
    );
    if let Some(ms) = track.duration {
        info = info.with_duration(Duration::from_millis(ms));
    }
    Some(info)
}
