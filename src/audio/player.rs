//! Per-guild playback engine.
//!
//! Each guild gets a [`GuildPlayer`]: queue state behind a short-held
//! `parking_lot` mutex, an async lock that serialises advances, and the
//! attached [`AudioSink`]. A supervisor task per sink turns finished/errored
//! events into exactly one advance, ignoring events whose [`PlaybackToken`]
//! no longer matches the current playback.

use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    loop_mode,
    preload::{PreloadCache, PreloadOutcome, PreloadResult, PreloadStart, PreloadTake},
    queue::{LoopMode, QueueSnapshot},
    sink::{AudioSink, PlaybackToken, SinkEvent, SinkEventKind},
    track::{NewTrack, Track, TrackId, TrackIdGenerator, TrackInfo},
    GuildQueue,
};
use crate::{
    cache::MetadataCache,
    config::PlaybackConfig,
    error::{ProviderError, QueueError},
    sources::{MediaGateway, ResolveOptions, Waterfall},
    ui::{Presenter, SkipSummary},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Playing,
}

pub(crate) struct GuildState<R> {
    pub(crate) queue: GuildQueue,
    pub(crate) preload: PreloadCache<R>,
    pub(crate) phase: PlaybackPhase,
    pub(crate) paused: bool,
    /// Reproducción vigente; los eventos del sink deben traer este token
    pub(crate) playback: Option<PlaybackToken>,
    pub(crate) metadata_hydration_in_flight: bool,
    pub(crate) deferred_resolve_in_flight: bool,
    /// Placeholders cuya resolución anticipada ya falló
    pub(crate) failed_lookahead: HashSet<TrackId>,
}

impl<R> GuildState<R> {
    /// Vacía la cola y descarta el preload; devuelve el recurso a liberar
    fn reset(&mut self) -> Option<R> {
        self.queue.clear();
        loop_mode::set_mode(&mut self.queue, LoopMode::Off);
        self.queue.set_current(None);
        self.playback = None;
        self.phase = PlaybackPhase::Idle;
        self.paused = false;
        self.failed_lookahead.clear();
        self.preload.invalidate()
    }
}

pub struct GuildPlayer<R: Send + 'static> {
    pub(crate) guild_id: GuildId,
    pub(crate) state: Mutex<GuildState<R>>,
    advance_lock: AsyncMutex<()>,
    sink: Mutex<Option<Arc<dyn AudioSink<R>>>>,
    supervisor: Mutex<Option<CancellationToken>>,
    pub(crate) cancel: CancellationToken,
    next_token: AtomicU64,
}

impl<R: Send + 'static> GuildPlayer<R> {
    fn new(guild_id: GuildId, queue: GuildQueue) -> Self {
        Self {
            guild_id,
            state: Mutex::new(GuildState {
                queue,
                preload: PreloadCache::default(),
                phase: PlaybackPhase::Idle,
                paused: false,
                playback: None,
                metadata_hydration_in_flight: false,
                deferred_resolve_in_flight: false,
                failed_lookahead: HashSet::new(),
            }),
            advance_lock: AsyncMutex::new(()),
            sink: Mutex::new(None),
            supervisor: Mutex::new(None),
            cancel: CancellationToken::new(),
            next_token: AtomicU64::new(1),
        }
    }

    fn sink(&self) -> Option<Arc<dyn AudioSink<R>>> {
        self.sink.lock().clone()
    }

    fn next_token(&self) -> PlaybackToken {
        PlaybackToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct PlaybackEngine<G: MediaGateway> {
    pub(crate) gateway: Arc<G>,
    pub(crate) waterfall: Arc<Waterfall<G>>,
    pub(crate) presenter: Arc<dyn Presenter>,
    players: Arc<DashMap<GuildId, Arc<GuildPlayer<G::Resource>>>>,
    ids: Arc<TrackIdGenerator>,
    pub(crate) metadata_cache: MetadataCache,
    pub(crate) config: Arc<PlaybackConfig>,
}

impl<G: MediaGateway> Clone for PlaybackEngine<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            waterfall: self.waterfall.clone(),
            presenter: self.presenter.clone(),
            players: self.players.clone(),
            ids: self.ids.clone(),
            metadata_cache: self.metadata_cache.clone(),
            config: self.config.clone(),
        }
    }
}

impl<G: MediaGateway> PlaybackEngine<G> {
    pub fn new(
        waterfall: Arc<Waterfall<G>>,
        presenter: Arc<dyn Presenter>,
        ids: Arc<TrackIdGenerator>,
        metadata_cache: MetadataCache,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            gateway: waterfall.gateway().clone(),
            waterfall,
            presenter,
            players: Arc::new(DashMap::new()),
            ids,
            metadata_cache,
            config: Arc::new(config),
        }
    }

    pub fn player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer<G::Resource>>> {
        self.players.get(&guild_id).map(|entry| entry.clone())
    }

    fn player_or_create(&self, guild_id: GuildId) -> Arc<GuildPlayer<G::Resource>> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("Nueva cola para guild {}", guild_id);
                let queue = GuildQueue::new(self.ids.clone(), self.config.max_queue_size);
                Arc::new(GuildPlayer::new(guild_id, queue))
            })
            .clone()
    }

    fn existing(&self, guild_id: GuildId) -> Result<Arc<GuildPlayer<G::Resource>>, QueueError> {
        self.player(guild_id).ok_or(QueueError::UnknownGuild(guild_id))
    }

    /// Conecta la salida de audio de un guild y arranca su supervisor
    pub fn attach_sink(&self, guild_id: GuildId, sink: Arc<dyn AudioSink<G::Resource>>) {
        let player = self.player_or_create(guild_id);
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkEvent>();
        sink.subscribe(tx);
        *player.sink.lock() = Some(sink);

        let supervisor = player.cancel.child_token();
        if let Some(previous) = player.supervisor.lock().replace(supervisor.clone()) {
            previous.cancel();
        }

        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = supervisor.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => engine.handle_sink_event(guild_id, event).await,
                        None => break,
                    },
                }
            }
            debug!("Supervisor de guild {} terminado", guild_id);
        });
        info!("🔊 Sink conectado en guild {}", guild_id);
    }

    async fn handle_sink_event(&self, guild_id: GuildId, event: SinkEvent) {
        let Some(player) = self.player(guild_id) else {
            return;
        };
        let _turn = player.advance_lock.lock().await;

        let is_current = {
            let mut state = player.state.lock();
            if state.playback == Some(event.token) {
                state.playback = None;
                true
            } else {
                false
            }
        };
        if !is_current {
            debug!("Evento obsoleto de {} ignorado", event.token);
            return;
        }

        if let SinkEventKind::Errored(reason) = &event.kind {
            warn!("⚠️ Error de reproducción en guild {}: {}", guild_id, reason);
        }
        self.advance_locked(&player).await;
    }

    /// Pasa al siguiente track reproducible
    pub async fn advance(&self, guild_id: GuildId) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        let _turn = player.advance_lock.lock().await;
        self.advance_locked(&player).await;
        Ok(())
    }

    async fn advance_locked(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        let guild_id = player.guild_id;
        let Some(sink) = player.sink() else {
            warn!("⚠️ Guild {} sin conexión de voz, no se puede avanzar", guild_id);
            player.state.lock().phase = PlaybackPhase::Idle;
            return;
        };

        {
            let mut state = player.state.lock();
            loop_mode::prepare_for_next_track(&mut state.queue);
            state.playback = None;
            state.paused = false;
            state.phase = PlaybackPhase::Loading;
        }

        let mut summary = SkipSummary::default();
        loop {
            if player.cancel.is_cancelled() {
                return;
            }

            let next = {
                let mut state = player.state.lock();
                state.queue.set_current(None);
                let next = state.queue.pop_front();
                if let Some(track) = &next {
                    state.failed_lookahead.remove(&track.id);
                }
                next
            };
            let Some(track) = next else {
                self.finish_queue(player, &sink, summary).await;
                return;
            };

            let track = if track.is_pending() {
                match self.resolve_at_head(track).await {
                    Some(track) => track,
                    None => {
                        summary.load_failures += 1;
                        continue;
                    }
                }
            } else if track.info.playable_url().is_none() {
                warn!("⚠️ Entrada {} sin URL reproducible, se salta", track.id);
                summary.malformed += 1;
                continue;
            } else {
                track
            };

            let key = track.key();
            let (taken, evicted) = {
                let mut state = player.state.lock();
                state.queue.set_current(Some(track.clone()));
                state.preload.take(&key)
            };
            self.release(evicted);

            let opened = match taken {
                PreloadTake::Ready(resource) => {
                    debug!("⚡ Usando preload para {}", key);
                    Ok(resource)
                }
                PreloadTake::Waiting(rx) => {
                    debug!("⏳ Esperando el preload en curso de {}", key);
                    match rx.await {
                        Ok(result) => result,
                        Err(_) => self.open(&track.info).await,
                    }
                }
                PreloadTake::Miss => self.open(&track.info).await,
            };
            let resource = match opened {
                Ok(resource) => resource,
                Err(e) => {
                    warn!("⚠️ No se pudo abrir '{}': {}", track.info.title, e);
                    summary.load_failures += 1;
                    continue;
                }
            };

            let token = player.next_token();
            player.state.lock().playback = Some(token);
            if let Err(e) = sink.play(resource, token).await {
                error!("❌ El sink rechazó '{}': {}", track.info.title, e);
                player.state.lock().playback = None;
                summary.load_failures += 1;
                continue;
            }

            let snapshot = {
                let mut state = player.state.lock();
                state.phase = PlaybackPhase::Playing;
                state.queue.snapshot()
            };
            info!("🎵 Reproduciendo: {} en guild {}", track.info.title, guild_id);
            self.presenter.on_playback_started(guild_id, &track, &snapshot);
            if !summary.is_empty() {
                self.presenter.on_skip_summary(guild_id, &summary);
            }
            self.schedule_background(player);
            return;
        }
    }

    async fn finish_queue(
        &self,
        player: &Arc<GuildPlayer<G::Resource>>,
        sink: &Arc<dyn AudioSink<G::Resource>>,
        mut summary: SkipSummary,
    ) {
        let guild_id = player.guild_id;
        let evicted = {
            let mut state = player.state.lock();
            state.queue.set_current(None);
            state.playback = None;
            state.phase = PlaybackPhase::Idle;
            state.preload.invalidate()
        };
        self.release(evicted);

        if !summary.is_empty() {
            summary.exhausted = true;
            warn!("⚠️ Guild {} sin tracks reproducibles: {}", guild_id, summary.message());
            self.presenter.on_skip_summary(guild_id, &summary);
        }
        info!("⏹️ Cola terminada en guild {}", guild_id);
        self.presenter.on_queue_ended(guild_id);

        if let Err(e) = sink.release_connection().await {
            error!("❌ Error al liberar la conexión de guild {}: {}", guild_id, e);
        }
    }

    /// Resuelve un placeholder que llegó a la cabeza sin hidratar
    async fn resolve_at_head(&self, mut track: Track) -> Option<Track> {
        let budget = self.config.resolve_timeout;
        let resolved = match tokio::time::timeout(budget, self.waterfall.resolve_pending(&track.info)).await {
            Ok(Ok(Some(info))) => info,
            Ok(Ok(None)) => {
                warn!("⚠️ Sin equivalente reproducible para {}", track.info.display_url);
                return None;
            }
            Ok(Err(e)) => {
                warn!("⚠️ Error resolviendo {}: {}", track.id, e);
                return None;
            }
            Err(_) => {
                warn!("⏱️ Resolución de {} excedió {:?}", track.id, budget);
                return None;
            }
        };

        if track.hydrate(resolved) {
            debug!("✅ {} resuelto al reproducir: {}", track.id, track.info.url);
            Some(track)
        } else {
            None
        }
    }

    async fn open(&self, info: &TrackInfo) -> PreloadResult<G::Resource> {
        let budget = self.config.open_timeout;
        match tokio::time::timeout(budget, self.gateway.open_audio_stream(info, budget)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(budget)),
        }
    }

    pub(crate) fn release(&self, resource: Option<G::Resource>) {
        if let Some(resource) = resource {
            self.gateway.release(resource);
        }
    }

    /// Preload, resolución anticipada e hidratación de metadata en segundo plano
    pub(crate) fn schedule_background(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        if player.cancel.is_cancelled() {
            return;
        }
        let engine = self.clone();
        let preload_player = player.clone();
        tokio::spawn(async move {
            engine.ensure_preload_for(&preload_player).await;
        });
        self.spawn_lookahead(player);
        self.spawn_metadata_hydration(player);
    }

    /// Precarga la cabeza de la cola si no está ya cubierta
    pub async fn ensure_preload(&self, guild_id: GuildId) {
        if let Some(player) = self.player(guild_id) {
            self.ensure_preload_for(&player).await;
        }
    }

    pub(crate) async fn ensure_preload_for(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        let (job, info, evicted) = {
            let mut state = player.state.lock();
            let Some(head) = state.queue.head() else {
                return;
            };
            if head.info.playable_url().is_none() {
                return;
            }
            let key = head.key();
            let info = head.info.clone();
            match state.preload.begin(key) {
                PreloadStart::AlreadyCovered => return,
                PreloadStart::Started { job, evicted } => (job, info, evicted),
            }
        };
        self.release(evicted);

        debug!("⏩ Precargando {}", job.key);
        let result = self.open(&info).await;
        let outcome = player.state.lock().preload.complete(&job, result);
        match outcome {
            PreloadOutcome::Delivered | PreloadOutcome::Committed => {}
            PreloadOutcome::Stale(resource) => {
                debug!("🗑️ Preload obsoleto de {} liberado", job.key);
                self.release(resource);
            }
            PreloadOutcome::Failed(e) => warn!("⚠️ Preload de {} falló: {}", job.key, e),
        }
    }

    /// Tras cualquier mutación: alinear preload, refrescar UI y reanudar trabajo de fondo
    fn queue_changed(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        let (evicted, snapshot) = {
            let mut state = player.state.lock();
            let head = state.queue.head_key();
            let evicted = state.preload.reconcile(head.as_ref());
            (evicted, state.queue.snapshot())
        };
        self.release(evicted);
        self.presenter.on_queue_changed(player.guild_id, &snapshot);
        self.schedule_background(player);
    }

    async fn start_if_idle(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        if player.sink().is_none() {
            debug!("Guild {} sin sink: se encola sin reproducir", player.guild_id);
            return;
        }
        let _turn = player.advance_lock.lock().await;
        let idle = {
            let state = player.state.lock();
            state.phase == PlaybackPhase::Idle && state.queue.current().is_none()
        };
        if idle {
            self.advance_locked(player).await;
        }
    }

    pub fn enqueue(&self, guild_id: GuildId, request: NewTrack) -> Result<TrackId, QueueError> {
        let player = self.player_or_create(guild_id);
        let id = player.state.lock().queue.enqueue(request)?;
        self.queue_changed(&player);
        Ok(id)
    }

    pub fn enqueue_many(&self, guild_id: GuildId, requests: Vec<NewTrack>) -> Vec<TrackId> {
        let player = self.player_or_create(guild_id);
        let ids = player.state.lock().queue.enqueue_many(requests);
        self.queue_changed(&player);
        ids
    }

    /// Resuelve la consulta, encola el resultado y arranca si no había nada sonando
    pub async fn request(&self, guild_id: GuildId, query: &str, requester: UserId) -> Result<Vec<TrackId>, QueueError> {
        let tracks = self
            .waterfall
            .resolve(query, requester, ResolveOptions::default())
            .await?;
        if tracks.is_empty() {
            return Ok(Vec::new());
        }

        let player = self.player_or_create(guild_id);
        let ids = {
            let mut state = player.state.lock();
            match <[NewTrack; 1]>::try_from(tracks) {
                Ok([track]) => vec![state.queue.enqueue(track)?],
                Err(tracks) => state.queue.enqueue_many(tracks),
            }
        };
        self.queue_changed(&player);
        self.start_if_idle(&player).await;
        Ok(ids)
    }

    pub fn remove(&self, guild_id: GuildId, index: usize) -> Result<Track, QueueError> {
        let player = self.existing(guild_id)?;
        let removed = {
            let mut state = player.state.lock();
            let removed = state.queue.remove(index)?;
            state.failed_lookahead.remove(&removed.id);
            removed
        };
        self.queue_changed(&player);
        Ok(removed)
    }

    pub fn move_track(&self, guild_id: GuildId, from: usize, to: usize) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        player.state.lock().queue.move_track(from, to)?;
        self.queue_changed(&player);
        Ok(())
    }

    pub fn shuffle(&self, guild_id: GuildId) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        player.state.lock().queue.shuffle();
        self.queue_changed(&player);
        Ok(())
    }

    pub fn clear(&self, guild_id: GuildId) -> Result<usize, QueueError> {
        let player = self.existing(guild_id)?;
        let removed = {
            let mut state = player.state.lock();
            state.failed_lookahead.clear();
            state.queue.clear()
        };
        self.queue_changed(&player);
        Ok(removed)
    }

    pub fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        loop_mode::set_mode(&mut player.state.lock().queue, mode);
        self.queue_changed(&player);
        Ok(())
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<QueueSnapshot> {
        self.player(guild_id).map(|player| player.state.lock().queue.snapshot())
    }

    pub fn phase(&self, guild_id: GuildId) -> Option<PlaybackPhase> {
        self.player(guild_id).map(|player| player.state.lock().phase)
    }

    pub fn is_paused(&self, guild_id: GuildId) -> bool {
        self.player(guild_id)
            .is_some_and(|player| player.state.lock().paused)
    }

    /// Salta el track actual; sin reproducción activa avanza directamente
    pub async fn skip(&self, guild_id: GuildId) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        let playing = player.state.lock().playback.is_some();
        match player.sink() {
            Some(sink) if playing => {
                info!("⏭️ Saltando track en guild {}", guild_id);
                // El evento de fin del sink dispara el avance
                sink.stop(true).await?;
            }
            _ => self.advance(guild_id).await?,
        }
        Ok(())
    }

    /// Detiene la reproducción y vacía la cola, manteniendo la conexión
    pub async fn stop(&self, guild_id: GuildId) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        let _turn = player.advance_lock.lock().await;
        let evicted = player.state.lock().reset();
        self.release(evicted);

        if let Some(sink) = player.sink() {
            sink.stop(true).await?;
        }
        let snapshot = player.state.lock().queue.snapshot();
        self.presenter.on_queue_changed(guild_id, &snapshot);
        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        Ok(())
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        if let Some(sink) = player.sink() {
            sink.pause().await?;
            player.state.lock().paused = true;
        }
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), QueueError> {
        let player = self.existing(guild_id)?;
        if let Some(sink) = player.sink() {
            sink.unpause().await?;
            player.state.lock().paused = false;
        }
        Ok(())
    }

    /// Elimina la cola del guild, libera recursos y la conexión de voz
    pub async fn teardown(&self, guild_id: GuildId) {
        let Some((_, player)) = self.players.remove(&guild_id) else {
            return;
        };
        player.cancel.cancel();
        let _turn = player.advance_lock.lock().await;

        let evicted = player.state.lock().reset();
        self.release(evicted);

        let sink = player.sink.lock().take();
        if let Some(sink) = sink {
            if let Err(e) = sink.stop(true).await {
                warn!("⚠️ Error al detener guild {}: {}", guild_id, e);
            }
            if let Err(e) = sink.release_connection().await {
                warn!("⚠️ Error al liberar la conexión de guild {}: {}", guild_id, e);
            }
        }
        info!("🧹 Cola de guild {} eliminada", guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::track::LoopTag,
        sources::Provider,
        testing::{
            harness, harness_with_presenter, malformed_track, new_track, spotify_placeholder, wait_until,
            youtube_track, FakeGateway, GUILD,
        },
        ui::MockPresenter,
    };
    use pretty_assertions::assert_eq;

    fn current_title(engine: &PlaybackEngine<FakeGateway>) -> Option<String> {
        engine
            .snapshot(GUILD)
            .and_then(|snapshot| snapshot.current.map(|track| track.info.title))
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped_with_one_notice() {
        let mut presenter = MockPresenter::new();
        presenter.expect_on_queue_changed().returning(|_, _| ());
        presenter
            .expect_on_playback_started()
            .withf(|_, track, _| track.info.title == "valid")
            .times(1)
            .returning(|_, _, _| ());
        presenter
            .expect_on_skip_summary()
            .withf(|_, summary| summary.malformed == 3 && summary.load_failures == 0 && !summary.exhausted)
            .times(1)
            .returning(|_, _| ());
        presenter.expect_on_queue_ended().times(0);

        let h = harness_with_presenter(FakeGateway::new(), Arc::new(presenter));
        h.engine.enqueue_many(
            GUILD,
            vec![
                malformed_track("broken 1"),
                malformed_track("broken 2"),
                malformed_track("broken 3"),
                new_track("valid"),
            ],
        );
        h.engine.advance(GUILD).await.unwrap();

        assert_eq!(current_title(&h.engine).as_deref(), Some("valid"));
        assert_eq!(h.sink.played_urls(), vec!["https://youtu.be/valid".to_string()]);
    }

    #[tokio::test]
    async fn unplayable_queue_ends_with_a_single_notice() {
        let mut presenter = MockPresenter::new();
        presenter.expect_on_queue_changed().returning(|_, _| ());
        presenter.expect_on_playback_started().times(0);
        presenter
            .expect_on_skip_summary()
            .withf(|_, summary| summary.exhausted && summary.malformed == 1 && summary.load_failures == 1)
            .times(1)
            .returning(|_, _| ());
        presenter.expect_on_queue_ended().times(1).returning(|_| ());

        let gateway = FakeGateway::new().with_failing_open("https://youtu.be/dead");
        let h = harness_with_presenter(gateway, Arc::new(presenter));
        h.engine
            .enqueue_many(GUILD, vec![malformed_track("broken"), new_track("dead")]);
        h.engine.advance(GUILD).await.unwrap();

        assert_eq!(current_title(&h.engine), None);
        assert_eq!(h.engine.phase(GUILD), Some(PlaybackPhase::Idle));
        assert_eq!(h.sink.released_connections(), 1);
    }

    #[tokio::test]
    async fn request_starts_playback_and_preloads_the_next_track() {
        let gateway = FakeGateway::new()
            .with_search(Provider::YouTube, "first song", vec![youtube_track("first song", "first", 200)])
            .with_search(Provider::YouTube, "second song", vec![youtube_track("second song", "second", 200)]);
        let h = harness(gateway);
        let user = UserId::new(7);

        h.engine.request(GUILD, "first song", user).await.unwrap();
        h.engine.request(GUILD, "second song", user).await.unwrap();
        assert_eq!(current_title(&h.engine).as_deref(), Some("first song"));

        let player = h.engine.player(GUILD).unwrap();
        wait_until(|| player.state.lock().preload.ready_key().is_some()).await;

        h.sink.finish();
        wait_until(|| h.sink.played_urls().len() == 2).await;
        assert_eq!(current_title(&h.engine).as_deref(), Some("second song"));

        assert_eq!(h.gateway.open_count("https://youtu.be/first"), 1);
        assert_eq!(h.gateway.open_count("https://youtu.be/second"), 1);
        assert!(h.gateway.released().is_empty());
    }

    #[tokio::test]
    async fn ensure_preload_twice_opens_once() {
        let h = harness(FakeGateway::new());
        h.engine.enqueue(GUILD, new_track("head")).unwrap();
        let player = h.engine.player(GUILD).unwrap();
        wait_until(|| player.state.lock().preload.ready_key().is_some()).await;

        h.engine.ensure_preload(GUILD).await;
        h.engine.ensure_preload(GUILD).await;

        assert_eq!(h.gateway.open_count("https://youtu.be/head"), 1);
    }

    #[tokio::test]
    async fn reorder_mid_preload_discards_and_releases() {
        let gateway = FakeGateway::new();
        let gate = gateway.gate("https://youtu.be/b");
        let h = harness(gateway);
        h.engine
            .enqueue_many(GUILD, vec![new_track("b"), new_track("c")]);
        wait_until(|| h.gateway.open_count("https://youtu.be/b") == 1).await;

        // "c" pasa a la cabeza mientras "b" sigue abriéndose
        h.engine.move_track(GUILD, 1, 0).unwrap();
        gate.add_permits(1);

        wait_until(|| h.gateway.released() == vec!["https://youtu.be/b".to_string()]).await;
        let player = h.engine.player(GUILD).unwrap();
        wait_until(|| player.state.lock().preload.ready_key().is_some()).await;

        let state = player.state.lock();
        assert_eq!(state.preload.ready_key(), state.queue.head_key().as_ref());
    }

    #[tokio::test]
    async fn advance_waits_for_the_in_flight_preload() {
        let gateway = FakeGateway::new();
        let gate = gateway.gate("https://youtu.be/slow");
        let h = harness(gateway);
        h.engine.enqueue(GUILD, new_track("slow")).unwrap();
        wait_until(|| h.gateway.open_count("https://youtu.be/slow") == 1).await;

        let engine = h.engine.clone();
        let advance = tokio::spawn(async move { engine.advance(GUILD).await });
        tokio::task::yield_now().await;
        gate.add_permits(1);
        advance.await.unwrap().unwrap();

        assert_eq!(current_title(&h.engine).as_deref(), Some("slow"));
        assert_eq!(h.gateway.open_count("https://youtu.be/slow"), 1);
    }

    #[tokio::test]
    async fn stale_and_duplicate_sink_events_advance_once() {
        let h = harness(FakeGateway::new());
        h.engine
            .enqueue_many(GUILD, vec![new_track("a"), new_track("b"), new_track("c")]);
        h.engine.advance(GUILD).await.unwrap();
        let first = h.sink.current_token().unwrap();

        // Token desconocido: no avanza
        h.sink.emit(PlaybackToken(9999), SinkEventKind::Finished);
        // Fin y error de la misma reproducción: un solo avance
        h.sink.emit(first, SinkEventKind::Errored("decoder".into()));
        h.sink.emit(first, SinkEventKind::Finished);

        wait_until(|| h.sink.played_urls().len() == 2).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(current_title(&h.engine).as_deref(), Some("b"));
        assert_eq!(h.sink.played_urls().len(), 2);
        assert_ne!(h.sink.current_token(), Some(first));
    }

    #[tokio::test]
    async fn skip_stops_the_sink_and_moves_on() {
        let h = harness(FakeGateway::new());
        h.engine.enqueue_many(GUILD, vec![new_track("a"), new_track("b")]);
        h.engine.advance(GUILD).await.unwrap();

        h.engine.skip(GUILD).await.unwrap();
        wait_until(|| h.sink.played_urls().len() == 2).await;
        assert_eq!(current_title(&h.engine).as_deref(), Some("b"));
        assert_eq!(h.sink.stops(), 1);
    }

    #[tokio::test]
    async fn pending_head_is_resolved_in_place() {
        let gateway = FakeGateway::new().with_search(
            Provider::YouTube,
            "Artist - Title",
            vec![youtube_track("Artist - Title", "resolved", 200)],
        );
        let h = harness(gateway);
        let id = h
            .engine
            .enqueue(GUILD, spotify_placeholder("sp1", Some("Title")))
            .unwrap();
        h.engine.advance(GUILD).await.unwrap();

        let current = h.engine.snapshot(GUILD).unwrap().current.unwrap();
        assert_eq!(current.id, id);
        assert!(!current.is_pending());
        assert_eq!(current.info.url, "https://youtu.be/resolved");
        assert_eq!(current.info.display_url, "https://open.spotify.com/track/sp1");
    }

    #[tokio::test]
    async fn queue_loop_replays_finished_tracks() {
        let h = harness(FakeGateway::new());
        h.engine.enqueue_many(GUILD, vec![new_track("a"), new_track("b")]);
        h.engine.set_loop_mode(GUILD, LoopMode::Queue).unwrap();
        h.engine.advance(GUILD).await.unwrap();

        for (plays, expected) in [(2, "b"), (3, "a"), (4, "b")] {
            h.sink.finish();
            wait_until(|| h.sink.played_urls().len() == plays).await;
            assert_eq!(current_title(&h.engine).as_deref(), Some(expected));
        }
        let snapshot = h.engine.snapshot(GUILD).unwrap();
        assert_eq!(snapshot.tracks.len(), 1);
        assert_eq!(snapshot.tracks[0].loop_tag, Some(LoopTag::Queue));
    }

    #[tokio::test]
    async fn stop_clears_everything_and_ignores_the_end_event() {
        let h = harness(FakeGateway::new());
        h.engine.enqueue_many(GUILD, vec![new_track("a"), new_track("b")]);
        h.engine.advance(GUILD).await.unwrap();

        h.engine.stop(GUILD).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let snapshot = h.engine.snapshot(GUILD).unwrap();
        assert!(snapshot.current.is_none());
        assert!(snapshot.tracks.is_empty());
        assert_eq!(h.sink.played_urls().len(), 1);
        assert_eq!(h.engine.phase(GUILD), Some(PlaybackPhase::Idle));
    }

    #[tokio::test]
    async fn teardown_releases_preload_and_connection() {
        let h = harness(FakeGateway::new());
        h.engine.enqueue_many(GUILD, vec![new_track("a"), new_track("b")]);
        h.engine.advance(GUILD).await.unwrap();
        let player = h.engine.player(GUILD).unwrap();
        wait_until(|| player.state.lock().preload.ready_key().is_some()).await;

        h.engine.teardown(GUILD).await;

        assert!(h.engine.player(GUILD).is_none());
        assert_eq!(h.gateway.released(), vec!["https://youtu.be/b".to_string()]);
        assert_eq!(h.sink.released_connections(), 1);
        assert!(matches!(h.engine.advance(GUILD).await, Err(QueueError::UnknownGuild(_))));
    }

    #[tokio::test]
    async fn pause_flag_resets_on_the_next_track() {
        let h = harness(FakeGateway::new());
        h.engine.enqueue_many(GUILD, vec![new_track("a"), new_track("b")]);
        h.engine.advance(GUILD).await.unwrap();

        h.engine.pause(GUILD).await.unwrap();
        assert!(h.engine.is_paused(GUILD));
        h.engine.resume(GUILD).await.unwrap();
        assert!(!h.engine.is_paused(GUILD));

        h.engine.pause(GUILD).await.unwrap();
        h.engine.skip(GUILD).await.unwrap();
        wait_until(|| h.sink.played_urls().len() == 2).await;
        assert!(!h.engine.is_paused(GUILD));
    }

    #[tokio::test]
    async fn rejected_play_counts_as_a_load_failure() {
        let h = harness(FakeGateway::new());
        h.sink.fail_next_plays(true);
        h.engine.enqueue(GUILD, new_track("a")).unwrap();
        h.engine.advance(GUILD).await.unwrap();

        assert_eq!(h.engine.phase(GUILD), Some(PlaybackPhase::Idle));
        assert!(h.sink.played_urls().is_empty());
        assert_eq!(h.sink.released_connections(), 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_single_requests() {
        let gateway = FakeGateway::new()
            .with_search(Provider::YouTube, "song", vec![youtube_track("song", "song", 200)]);
        let h = harness(gateway);
        let fill: Vec<_> = (0..h.engine.config.max_queue_size)
            .map(|i| new_track(&format!("t{}", i)))
            .collect();
        // Sin sink la cola no avanza y se llena
        h.engine.enqueue_many(crate::testing::OTHER_GUILD, fill);

        let result = h
            .engine
            .request(crate::testing::OTHER_GUILD, "song", UserId::new(1))
            .await;
        assert!(matches!(result, Err(QueueError::Full { .. })));
    }

    #[tokio::test]
    async fn stuck_open_counts_as_a_load_failure() {
        let mut presenter = MockPresenter::new();
        presenter.expect_on_queue_changed().returning(|_, _| ());
        presenter
            .expect_on_playback_started()
            .withf(|_, track, _| track.info.title == "valid")
            .times(1)
            .returning(|_, _, _| ());
        presenter
            .expect_on_skip_summary()
            .withf(|_, summary| summary.load_failures == 1 && summary.malformed == 0 && !summary.exhausted)
            .times(1)
            .returning(|_, _| ());
        presenter.expect_on_queue_ended().times(0);

        let gateway = FakeGateway::new();
        // Nunca se liberan permisos: la apertura queda colgada
        let _gate = gateway.gate("https://youtu.be/stuck");
        let h = harness_with_presenter(gateway, Arc::new(presenter));
        h.engine.enqueue_many(GUILD, vec![new_track("stuck"), new_track("valid")]);
        h.engine.advance(GUILD).await.unwrap();

        assert_eq!(current_title(&h.engine).as_deref(), Some("valid"));
        assert_eq!(h.sink.played_urls(), vec!["https://youtu.be/valid".to_string()]);
        assert_eq!(h.engine.phase(GUILD), Some(PlaybackPhase::Playing));
    }

    #[tokio::test]
    async fn stuck_head_resolution_counts_as_a_load_failure() {
        let mut presenter = MockPresenter::new();
        presenter.expect_on_queue_changed().returning(|_, _| ());
        presenter
            .expect_on_playback_started()
            .withf(|_, track, _| track.info.title == "valid")
            .times(1)
            .returning(|_, _, _| ());
        presenter
            .expect_on_skip_summary()
            .withf(|_, summary| summary.load_failures == 1 && summary.malformed == 0 && !summary.exhausted)
            .times(1)
            .returning(|_, _| ());

        let gateway = FakeGateway::new();
        let _gate = gateway.gate_search("Artist - Title");
        let h = harness_with_presenter(gateway, Arc::new(presenter));
        h.engine.enqueue_many(
            GUILD,
            vec![spotify_placeholder("sp1", Some("Title")), new_track("valid")],
        );
        h.engine.advance(GUILD).await.unwrap();

        assert_eq!(current_title(&h.engine).as_deref(), Some("valid"));
        assert_eq!(h.sink.played_urls(), vec!["https://youtu.be/valid".to_string()]);
        let player = h.engine.player(GUILD).unwrap();
        assert!(player.state.lock().failed_lookahead.is_empty());
    }

    #[tokio::test]
    async fn removed_entries_leave_no_failed_lookahead_behind() {
        let h = harness(FakeGateway::new());
        let id = h
            .engine
            .enqueue(GUILD, spotify_placeholder("gone", Some("Missing")))
            .unwrap();
        let player = h.engine.player(GUILD).unwrap();
        wait_until(|| player.state.lock().failed_lookahead.contains(&id)).await;

        let removed = h.engine.remove(GUILD, 0).unwrap();
        assert_eq!(removed.id, id);
        assert!(player.state.lock().failed_lookahead.is_empty());
    }
}
