use async_process::{Command, Output};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    audio::track::{TrackInfo, TrackSource},
    error::ProviderError,
};

/// Cliente para interactuar con YouTube/yt-dlp
pub struct YouTubeClient {
    rate_limiter: Semaphore,
    /// Tiempo máximo por invocación de yt-dlp
    timeout: Duration,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    webpage_url: Option<String>,
    url: Option<String>,
    is_live: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl YouTubeClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            // Limitar procesos concurrentes para evitar rate limiting
            rate_limiter: Semaphore::new(3),
            timeout,
        }
    }

    /// Busca videos en YouTube
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>, ProviderError> {
        info!("🔍 Buscando en YouTube: {}", query);
        let search_query = format!("ytsearch{}:{}", limit, query);
        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--flat-playlist", "--skip-download", &search_query])
            .await?;
        Ok(parse_lines(&stdout))
    }

    /// Obtiene información de un video concreto
    pub async fn get_info(&self, url: &str) -> Result<Option<TrackInfo>, ProviderError> {
        debug!("📊 Obteniendo info de: {}", url);
        let stdout = self.run(&["--no-playlist", "--dump-json", "--skip-download", url]).await?;
        Ok(parse_lines(&stdout).into_iter().next())
    }

    /// Obtiene las entradas de una playlist, hasta `max_items`
    pub async fn get_playlist(&self, url: &str, max_items: usize) -> Result<Vec<TrackInfo>, ProviderError> {
        info!("📋 Obteniendo playlist: {}", url);
        let end = max_items.to_string();
        let stdout = self
            .run(&["--flat-playlist", "--dump-json", "--playlist-end", &end, url])
            .await?;
        Ok(parse_lines(&stdout))
    }

    async fn run(&self, args: &[&str]) -> Result<String, ProviderError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ProviderError::Subprocess(e.to_string()))?;

        let socket_timeout = self.timeout.as_secs().max(1).to_string();
        let mut command = Command::new("yt-dlp");
        command
            .args(args)
            .arg("--no-warnings")
            .args(["--socket-timeout", &socket_timeout]);

        let output = run_bounded(command, self.timeout).await?;
        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Subprocess(error.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Ejecuta el proceso con un límite de tiempo; al vencer, el proceso se mata
async fn run_bounded(mut command: Command, budget: Duration) -> Result<Output, ProviderError> {
    command.kill_on_drop(true);
    match tokio::time::timeout(budget, command.output()).await {
        Ok(output) => Ok(output?),
        Err(_) => {
            warn!("⏱️ yt-dlp no respondió en {:?}, proceso terminado", budget);
            Err(ProviderError::Timeout(budget))
        }
    }
}

impl Default for YouTubeClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

/// Una línea JSON por resultado; las líneas ilegibles se descartan
fn parse_lines(stdout: &str) -> Vec<TrackInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpInfo>(line) {
            Ok(info) => info_to_track(info),
            Err(e) => {
                debug!("Línea de yt-dlp ignorada: {}", e);
                None
            }
        })
        .collect()
}

/// Convierte YtDlpInfo a TrackInfo; los directos se descartan
fn info_to_track(info: YtDlpInfo) -> Option<TrackInfo> {
    if info.is_live.unwrap_or(false) {
        return None;
    }

    let url = info
        .webpage_url
        .or(info.url)
        .filter(|url| url.starts_with("http"))
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", info.id));
    let thumbnail = info
        .thumbnail
        .or_else(|| info.thumbnails.into_iter().last().map(|thumb| thumb.url));

    let mut track = TrackInfo::new(
        info.title.unwrap_or_default(),
        url,
        TrackSource::YouTube {
            video_id: info.id,
            channel: info.channel.or(info.uploader),
            thumbnail,
            origin: None,
        },
    );
    // yt-dlp a veces reporta duraciones negativas o NaN
    if let Some(duration) = info.duration.and_then(|secs| Duration::try_from_secs_f64(secs).ok()) {
        track = track.with_duration(duration);
    }
    Some(track)
}
