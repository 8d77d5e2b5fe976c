//! Fakes and builders shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Semaphore};

use crate::{
    audio::{
        player::PlaybackEngine,
        queue::{GuildQueue, QueueSnapshot},
        sink::{AudioSink, PlaybackToken, SinkEvent, SinkEventKind},
        track::{NewTrack, PendingMetadata, PendingSource, Track, TrackIdGenerator, TrackInfo, TrackSource},
    },
    cache::MetadataCache,
    config::PlaybackConfig,
    error::{ProviderError, SinkError},
    sources::{MatchConfig, MediaGateway, Provider, SearchRanker, SpotifyLink, SpotifyTrackMeta, Waterfall},
    ui::{Presenter, SkipSummary},
};

pub const GUILD: GuildId = GuildId::new(1001);
pub const OTHER_GUILD: GuildId = GuildId::new(2002);

pub fn youtube_track(title: &str, slug: &str, secs: u64) -> TrackInfo {
    TrackInfo::new(
        title,
        format!("https://youtu.be/{}", slug),
        TrackSource::YouTube {
            video_id: slug.to_string(),
            channel: Some("Channel".to_string()),
            thumbnail: None,
            origin: None,
        },
    )
    .with_duration(Duration::from_secs(secs))
}

pub fn new_track(title: &str) -> NewTrack {
    NewTrack {
        info: youtube_track(title, title, 200),
        requester: UserId::new(1),
    }
}

/// Entrada sin URL reproducible ni forma de resolverse
pub fn malformed_track(title: &str) -> NewTrack {
    NewTrack {
        info: TrackInfo::new(title, "", TrackSource::Direct),
        requester: UserId::new(1),
    }
}

/// Placeholder de Spotify; sin título necesita metadata
pub fn spotify_placeholder(id: &str, title: Option<&str>) -> NewTrack {
    let pending = PendingSource::Spotify {
        track_id: id.to_string(),
        artists: if title.is_some() { vec!["Artist".to_string()] } else { Vec::new() },
        album: None,
    };
    let mut info = TrackInfo::pending(pending, format!("https://open.spotify.com/track/{}", id));
    if let Some(title) = title {
        info = info.with_title(title).with_duration(Duration::from_secs(200));
    }
    NewTrack {
        info,
        requester: UserId::new(1),
    }
}

pub fn soundcloud_placeholder(id: u64) -> NewTrack {
    NewTrack {
        info: TrackInfo::pending(PendingSource::SoundCloud { track_id: id }, ""),
        requester: UserId::new(1),
    }
}

pub fn queue_with(titles: &[&str]) -> GuildQueue {
    let mut queue = GuildQueue::new(Arc::new(TrackIdGenerator::new()), 100);
    queue.enqueue_many(titles.iter().map(|title| new_track(title)).collect());
    queue
}

/// Espera (con límite) a que se cumpla una condición observada desde fuera
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 2s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeResource {
    pub url: String,
}

#[derive(Default)]
pub struct FakeGateway {
    search: HashMap<(Provider, String), Vec<TrackInfo>>,
    failing_search: HashSet<Provider>,
    urls: HashMap<String, Vec<TrackInfo>>,
    ids: HashMap<(Provider, String), TrackInfo>,
    short_links: HashMap<String, String>,
    credentials: HashSet<Provider>,
    spotify: HashMap<String, Vec<SpotifyTrackMeta>>,
    scraped: HashMap<String, SpotifyTrackMeta>,
    metadata: HashMap<String, PendingMetadata>,
    failing_opens: HashSet<String>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    search_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
    opens: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, provider: Provider, query: &str, results: Vec<TrackInfo>) -> Self {
        self.search.insert((provider, query.to_string()), results);
        self
    }

    pub fn with_failing_search(mut self, provider: Provider) -> Self {
        self.failing_search.insert(provider);
        self
    }

    pub fn with_url(mut self, url: &str, tracks: Vec<TrackInfo>) -> Self {
        self.urls.insert(url.to_string(), tracks);
        self
    }

    pub fn with_id(mut self, provider: Provider, id: &str, track: TrackInfo) -> Self {
        self.ids.insert((provider, id.to_string()), track);
        self
    }

    pub fn with_short_link(mut self, short: &str, full: &str) -> Self {
        self.short_links.insert(short.to_string(), full.to_string());
        self
    }

    pub fn with_credentials(mut self, provider: Provider) -> Self {
        self.credentials.insert(provider);
        self
    }

    pub fn with_spotify(mut self, id: &str, metas: Vec<SpotifyTrackMeta>) -> Self {
        self.spotify.insert(id.to_string(), metas);
        self
    }

    pub fn with_scraped(mut self, url: &str, meta: SpotifyTrackMeta) -> Self {
        self.scraped.insert(url.to_string(), meta);
        self
    }

    pub fn with_metadata(mut self, cache_key: &str, title: &str, artists: &[&str], secs: u64) -> Self {
        self.metadata.insert(
            cache_key.to_string(),
            PendingMetadata {
                title: title.to_string(),
                artists: artists.iter().map(|artist| artist.to_string()).collect(),
                duration: Some(Duration::from_secs(secs)),
            },
        );
        self
    }

    pub fn with_failing_open(mut self, url: &str) -> Self {
        self.failing_opens.insert(url.to_string());
        self
    }

    /// Bloquea la apertura de `url` hasta que el test agregue un permiso
    pub fn gate(&self, url: &str) -> Arc<Semaphore> {
        self.gates
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }

    /// Las búsquedas de `query` quedan colgadas hasta que se liberen permisos
    pub fn gate_search(&self, query: &str) -> Arc<Semaphore> {
        self.gate(&format!("search:{}", query))
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn open_count(&self, url: &str) -> usize {
        self.opens.lock().iter().filter(|opened| opened.as_str() == url).count()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl MediaGateway for FakeGateway {
    type Resource = FakeResource;

    async fn search_tracks(&self, provider: Provider, query: &str, _limit: usize) -> Result<Vec<TrackInfo>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().get(&format!("search:{}", query)).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        if self.failing_search.contains(&provider) {
            return Err(ProviderError::Api { provider, status: 500 });
        }
        Ok(self
            .search
            .get(&(provider, query.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_by_url(&self, _provider: Provider, url: &str) -> Result<Vec<TrackInfo>, ProviderError> {
        Ok(self.urls.get(url).cloned().unwrap_or_default())
    }

    async fn resolve_by_id(&self, provider: Provider, id: &str) -> Result<Option<TrackInfo>, ProviderError> {
        Ok(self.ids.get(&(provider, id.to_string())).cloned())
    }

    async fn expand_short_link(&self, url: &str) -> Result<String, ProviderError> {
        self.short_links
            .get(url)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(url.to_string()))
    }

    fn has_credentials(&self, provider: Provider) -> bool {
        self.credentials.contains(&provider)
    }

    async fn fetch_spotify(&self, link: &SpotifyLink) -> Result<Vec<SpotifyTrackMeta>, ProviderError> {
        if !self.has_credentials(Provider::Spotify) {
            return Err(ProviderError::MissingCredentials(Provider::Spotify));
        }
        Ok(self.spotify.get(&link.id).cloned().unwrap_or_default())
    }

    async fn scrape_spotify_track(&self, url: &str) -> Result<Option<SpotifyTrackMeta>, ProviderError> {
        Ok(self.scraped.get(url).cloned())
    }

    async fn fetch_pending_metadata(&self, pending: &PendingSource) -> Result<PendingMetadata, ProviderError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.metadata
            .get(&pending.cache_key())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(pending.cache_key()))
    }

    async fn open_audio_stream(&self, track: &TrackInfo, _budget: Duration) -> Result<FakeResource, ProviderError> {
        let url = track
            .playable_url()
            .ok_or_else(|| ProviderError::ResourceOpenFailed("no playable url".into()))?
            .to_string();
        self.opens.lock().push(url.clone());

        let gate = self.gates.lock().get(&url).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        if self.failing_opens.contains(&url) {
            return Err(ProviderError::ResourceOpenFailed(url));
        }
        Ok(FakeResource { url })
    }

    fn release(&self, resource: FakeResource) {
        self.released.lock().push(resource.url);
    }
}

/// Sink en memoria: registra lo reproducido y emite eventos a demanda
#[derive(Default)]
pub struct FakeSink {
    events: Mutex<Option<mpsc::UnboundedSender<SinkEvent>>>,
    current: Mutex<Option<PlaybackToken>>,
    played: Mutex<Vec<(String, PlaybackToken)>>,
    stops: AtomicUsize,
    released_connections: AtomicUsize,
    fail_play: AtomicBool,
}

impl FakeSink {
    pub fn played_urls(&self) -> Vec<String> {
        self.played.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn current_token(&self) -> Option<PlaybackToken> {
        *self.current.lock()
    }

    /// Fin natural del track que suena
    pub fn finish(&self) {
        let token = self.current.lock().take();
        if let Some(token) = token {
            self.emit(token, SinkEventKind::Finished);
        }
    }

    pub fn emit(&self, token: PlaybackToken, kind: SinkEventKind) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(SinkEvent { token, kind });
        }
    }

    pub fn fail_next_plays(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn released_connections(&self) -> usize {
        self.released_connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink<FakeResource> for FakeSink {
    fn subscribe(&self, events: mpsc::UnboundedSender<SinkEvent>) {
        *self.events.lock() = Some(events);
    }

    async fn play(&self, resource: FakeResource, token: PlaybackToken) -> Result<(), SinkError> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(SinkError::Driver("play rejected".into()));
        }
        self.played.lock().push((resource.url, token));
        *self.current.lock() = Some(token);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn unpause(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn stop(&self, _force: bool) -> Result<(), SinkError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish();
        Ok(())
    }

    async fn release_connection(&self) -> Result<(), SinkError> {
        self.released_connections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Presenter que descarta todas las notificaciones
pub struct SilentPresenter;

impl Presenter for SilentPresenter {
    fn on_queue_changed(&self, _guild_id: GuildId, _snapshot: &QueueSnapshot) {}

    fn on_playback_started(&self, _guild_id: GuildId, _track: &Track, _snapshot: &QueueSnapshot) {}

    fn on_skip_summary(&self, _guild_id: GuildId, _summary: &SkipSummary) {}

    fn on_queue_ended(&self, _guild_id: GuildId) {}
}

pub struct Harness {
    pub engine: PlaybackEngine<FakeGateway>,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<FakeSink>,
}

pub fn test_config() -> PlaybackConfig {
    PlaybackConfig {
        max_queue_size: 50,
        lookahead_window: 2,
        open_timeout: Duration::from_secs(1),
        resolve_timeout: Duration::from_secs(1),
        hydration_pause: Duration::ZERO,
    }
}

pub fn harness(gateway: FakeGateway) -> Harness {
    harness_with_presenter(gateway, Arc::new(SilentPresenter))
}

/// Motor con un sink falso conectado a [`GUILD`]. Requiere un runtime de tokio.
pub fn harness_with_presenter(gateway: FakeGateway, presenter: Arc<dyn Presenter>) -> Harness {
    let gateway = Arc::new(gateway);
    let waterfall = Arc::new(Waterfall::new(
        gateway.clone(),
        SearchRanker::default(),
        MatchConfig::default(),
    ));
    let engine = PlaybackEngine::new(
        waterfall,
        presenter,
        Arc::new(TrackIdGenerator::new()),
        MetadataCache::default(),
        test_config(),
    );
    let sink = Arc::new(FakeSink::default());
    engine.attach_sink(GUILD, sink.clone());
    Harness { engine, gateway, sink }
}
