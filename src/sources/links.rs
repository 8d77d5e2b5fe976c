use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?|embed/|v/|shorts/|playlist\?)|youtu\.be/|music\.youtube\.com/)")
        .expect("regex de YouTube válida")
});

static YOUTUBE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("regex de id válida"));

static SPOTIFY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:intl-[a-z]{2}(?:-[A-Za-z]{2})?/)?(track|album|playlist)/([A-Za-z0-9]+)")
        .expect("regex de Spotify válida")
});

/// Tipo de recurso de Spotify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyKind {
    Track,
    Album,
    Playlist,
}

impl SpotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotifyKind::Track => "track",
            SpotifyKind::Album => "album",
            SpotifyKind::Playlist => "playlist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyLink {
    pub kind: SpotifyKind,
    pub id: String,
    pub url: String,
}

/// Clasificación de una consulta de usuario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    SoundCloud { url: String, short_link: bool },
    Spotify(SpotifyLink),
    YouTubeVideo { video_id: String, url: String },
    YouTubePlaylist { list_id: String, url: String },
    /// URL http(s) de otro sitio
    Url(String),
    Search(String),
}

pub fn classify(query: &str) -> QueryKind {
    let query = query.trim();

    if is_soundcloud_url(query) {
        return QueryKind::SoundCloud {
            url: query.to_string(),
            short_link: is_soundcloud_short_link(query),
        };
    }

    if let Some(link) = parse_spotify_link(query) {
        return QueryKind::Spotify(link);
    }

    if is_youtube_url(query) {
        if let Some(video_id) = youtube_video_id(query) {
            return QueryKind::YouTubeVideo {
                video_id: video_id.clone(),
                url: format!("https://www.youtube.com/watch?v={}", video_id),
            };
        }
        if let Some(list_id) = youtube_playlist_id(query) {
            return QueryKind::YouTubePlaylist {
                list_id: list_id.clone(),
                url: format!("https://www.youtube.com/playlist?list={}", list_id),
            };
        }
    }

    if looks_like_bare_video_id(query) {
        return QueryKind::YouTubeVideo {
            video_id: query.to_string(),
            url: format!("https://www.youtube.com/watch?v={}", query),
        };
    }

    if query.starts_with("http://") || query.starts_with("https://") {
        return QueryKind::Url(query.to_string());
    }

    QueryKind::Search(query.to_string())
}

fn host_of(query: &str) -> Option<String> {
    Url::parse(query)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.trim_start_matches("www.").to_lowercase()))
}

pub fn is_soundcloud_url(query: &str) -> bool {
    matches!(
        host_of(query).as_deref(),
        Some("soundcloud.com" | "m.soundcloud.com" | "on.soundcloud.com" | "snd.sc")
    )
}

pub fn is_soundcloud_short_link(query: &str) -> bool {
    matches!(host_of(query).as_deref(), Some("on.soundcloud.com" | "snd.sc"))
}

/// Enlaces "discover" (mixes personalizados): sólo funcionan con la sesión del usuario
pub fn is_soundcloud_discover(query: &str) -> bool {
    Url::parse(query)
        .ok()
        .filter(|_| is_soundcloud_url(query))
        .map(|url| url.path().starts_with("/discover"))
        .unwrap_or(false)
}

pub fn parse_spotify_link(query: &str) -> Option<SpotifyLink> {
    if let Some(rest) = query.strip_prefix("spotify:") {
        let mut parts = rest.splitn(2, ':');
        let kind = spotify_kind(parts.next()?)?;
        let id = parts.next()?.to_string();
        return Some(SpotifyLink {
            kind,
            url: format!("https://open.spotify.com/{}/{}", kind.as_str(), id),
            id,
        });
    }

    let url = Url::parse(query).ok()?;
    if url.host_str()? != "open.spotify.com" {
        return None;
    }
    let captures = SPOTIFY_PATH.captures(url.path())?;
    let kind = spotify_kind(captures.get(1)?.as_str())?;
    let id = captures.get(2)?.as_str().to_string();
    Some(SpotifyLink {
        kind,
        url: format!("https://open.spotify.com/{}/{}", kind.as_str(), id),
        id,
    })
}

fn spotify_kind(raw: &str) -> Option<SpotifyKind> {
    match raw {
        "track" => Some(SpotifyKind::Track),
        "album" => Some(SpotifyKind::Album),
        "playlist" => Some(SpotifyKind::Playlist),
        _ => None,
    }
}

/// Verifica si una URL es válida para YouTube
pub fn is_youtube_url(url: &str) -> bool {
    YOUTUBE_URL.is_match(url)
}

pub fn youtube_video_id(query: &str) -> Option<String> {
    let url = Url::parse(query).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").to_lowercase();

    let candidate = if host == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else if url.path() == "/watch" {
        url.query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    } else {
        let mut segments = url.path_segments()?;
        match segments.next() {
            Some("embed" | "v" | "shorts") => segments.next().map(str::to_string),
            _ => None,
        }
    };

    candidate.filter(|id| YOUTUBE_ID.is_match(id))
}

pub fn youtube_playlist_id(query: &str) -> Option<String> {
    let url = Url::parse(query).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "list")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}

/// Un id suelto de 11 caracteres; exige algún dígito, `-` o `_` para no
/// confundir palabras de búsqueda con ids
fn looks_like_bare_video_id(query: &str) -> bool {
    YOUTUBE_ID.is_match(query) && query.chars().any(|c| c.is_ascii_digit() || c == '-' || c == '_')
}
