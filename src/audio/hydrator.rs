//! Background completion of deferred queue entries.
//!
//! Two jobs run per guild, each guarded by its own in-flight flag so at most
//! one of each is active:
//!
//! - metadata hydration fills title, artists and duration of placeholders
//!   across the whole queue, one provider call at a time, through the shared
//!   [`MetadataCache`](crate::cache::MetadataCache);
//! - lookahead resolution turns the placeholders within the first
//!   `lookahead_window` queue positions into playable tracks, in place, so the
//!   preload can cover the head before it is needed.
//!
//! Results are only applied if the entry is still in the queue and still
//! pending; anything else is dropped silently.

use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    player::{GuildPlayer, GuildState, PlaybackEngine},
    track::{TrackId, TrackInfo},
};
use crate::sources::MediaGateway;

/// Primer placeholder dentro de la ventana que no haya fallado ya
fn next_lookahead<R>(state: &GuildState<R>, window: usize) -> Option<(TrackId, TrackInfo)> {
    state
        .queue
        .tracks()
        .iter()
        .take(window)
        .find(|track| track.is_pending() && !state.failed_lookahead.contains(&track.id))
        .map(|track| (track.id, track.info.clone()))
}

impl<G: MediaGateway> PlaybackEngine<G> {
    pub(crate) fn spawn_metadata_hydration(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        {
            let mut state = player.state.lock();
            if state.metadata_hydration_in_flight
                || !state.queue.tracks().iter().any(|track| track.info.needs_metadata())
            {
                return;
            }
            state.metadata_hydration_in_flight = true;
        }

        let engine = self.clone();
        let player = player.clone();
        tokio::spawn(async move {
            engine.hydrate_metadata(&player).await;
        });
    }

    async fn hydrate_metadata(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        let guild_id = player.guild_id;
        // Fallos de esta pasada; una pasada nueva vuelve a intentarlos
        let mut failed: HashSet<TrackId> = HashSet::new();
        let mut filled = 0usize;

        loop {
            let next = {
                let mut state = player.state.lock();
                let next = if player.cancel.is_cancelled() {
                    None
                } else {
                    state
                        .queue
                        .tracks()
                        .iter()
                        .find(|track| track.info.needs_metadata() && !failed.contains(&track.id))
                        .and_then(|track| track.info.pending_source().map(|pending| (track.id, pending.clone())))
                };
                if next.is_none() {
                    state.metadata_hydration_in_flight = false;
                }
                next
            };
            let Some((id, pending)) = next else {
                break;
            };

            let metadata = match self.metadata_cache.get(&pending) {
                Some(metadata) => Some(metadata),
                None => match self.gateway.fetch_pending_metadata(&pending).await {
                    Ok(metadata) => {
                        self.metadata_cache.insert(&pending, metadata.clone());
                        Some(metadata)
                    }
                    Err(e) => {
                        debug!("Sin metadata para {}: {}", pending.cache_key(), e);
                        None
                    }
                },
            };
            let Some(metadata) = metadata else {
                failed.insert(id);
                continue;
            };

            let snapshot = {
                let mut state = player.state.lock();
                let applied = match state.queue.find_mut(id) {
                    Some(track) if track.info.needs_metadata() => track.apply_metadata(metadata),
                    _ => false,
                };
                applied.then(|| state.queue.snapshot())
            };
            if let Some(snapshot) = snapshot {
                filled += 1;
                self.presenter.on_queue_changed(guild_id, &snapshot);
            }

            if !self.config.hydration_pause.is_zero() {
                tokio::time::sleep(self.config.hydration_pause).await;
            }
        }

        if filled > 0 || !failed.is_empty() {
            info!(
                "📝 Metadata en guild {}: {} completados, {} sin datos (caché {:.0}% aciertos)",
                guild_id,
                filled,
                failed.len(),
                self.metadata_cache.hit_rate() * 100.0
            );
        }
    }

    pub(crate) fn spawn_lookahead(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        let window = self.config.lookahead_window;
        {
            let mut state = player.state.lock();
            if state.deferred_resolve_in_flight || next_lookahead(&state, window).is_none() {
                return;
            }
            state.deferred_resolve_in_flight = true;
        }

        let engine = self.clone();
        let player = player.clone();
        tokio::spawn(async move {
            engine.resolve_lookahead(&player).await;
        });
    }

    async fn resolve_lookahead(&self, player: &Arc<GuildPlayer<G::Resource>>) {
        let window = self.config.lookahead_window;
        let budget = self.config.resolve_timeout;

        loop {
            let next = {
                let mut state = player.state.lock();
                let next = if player.cancel.is_cancelled() {
                    None
                } else {
                    next_lookahead(&state, window)
                };
                if next.is_none() {
                    state.deferred_resolve_in_flight = false;
                }
                next
            };
            let Some((id, info)) = next else {
                break;
            };

            debug!("🔎 Resolviendo {} por adelantado", id);
            let resolved = match tokio::time::timeout(budget, self.waterfall.resolve_pending(&info)).await {
                Ok(Ok(resolved)) => resolved,
                Ok(Err(e)) => {
                    warn!("⚠️ Resolución anticipada de {} falló: {}", id, e);
                    None
                }
                Err(_) => {
                    warn!("⏱️ Resolución anticipada de {} excedió {:?}", id, budget);
                    None
                }
            };

            let refreshed = {
                let mut state = player.state.lock();
                let hydrated = match state.queue.find_mut(id) {
                    Some(track) => Some(resolved.is_some_and(|resolved| track.hydrate(resolved))),
                    // Ya salió de la cola (reproducido o eliminado)
                    None => None,
                };
                match hydrated {
                    Some(true) => {
                        let head = state.queue.head_key();
                        let evicted = state.preload.reconcile(head.as_ref());
                        Some((evicted, state.queue.snapshot()))
                    }
                    Some(false) => {
                        state.failed_lookahead.insert(id);
                        None
                    }
                    None => None,
                }
            };

            if let Some((evicted, snapshot)) = refreshed {
                self.release(evicted);
                debug!("✅ {} listo antes de llegar a la cabeza", id);
                self.presenter.on_queue_changed(player.guild_id, &snapshot);
                self.ensure_preload_for(player).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        sources::Provider,
        testing::{harness, soundcloud_placeholder, spotify_placeholder, wait_until, youtube_track, FakeGateway, GUILD, OTHER_GUILD},
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn titles(h: &crate::testing::Harness, guild: serenity::model::id::GuildId) -> Vec<String> {
        h.engine
            .snapshot(guild)
            .map(|snapshot| snapshot.tracks.iter().map(|track| track.info.title.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn metadata_is_fetched_once_across_guilds() {
        let gateway = FakeGateway::new().with_metadata("soundcloud:77", "Cached Song", &["Someone"], 210);
        let h = harness(gateway);

        h.engine.enqueue(GUILD, soundcloud_placeholder(77)).unwrap();
        wait_until(|| titles(&h, GUILD) == vec!["Cached Song".to_string()]).await;

        h.engine.enqueue(OTHER_GUILD, soundcloud_placeholder(77)).unwrap();
        wait_until(|| titles(&h, OTHER_GUILD) == vec!["Cached Song".to_string()]).await;

        assert_eq!(h.gateway.metadata_calls(), 1);
        // Un fallo en la primera guild, un acierto en la segunda
        assert_eq!(h.engine.metadata_cache.hit_rate(), 0.5);
        let snapshot = h.engine.snapshot(OTHER_GUILD).unwrap();
        assert!(snapshot.tracks[0].is_pending());
        assert_eq!(snapshot.tracks[0].info.duration, Some(Duration::from_secs(210)));
    }

    #[tokio::test]
    async fn failed_metadata_ends_the_pass() {
        let h = harness(FakeGateway::new());
        h.engine.enqueue(GUILD, soundcloud_placeholder(5)).unwrap();
        let player = h.engine.player(GUILD).unwrap();

        wait_until(|| h.gateway.metadata_calls() == 1 && !player.state.lock().metadata_hydration_in_flight).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.gateway.metadata_calls(), 1);
        assert_eq!(titles(&h, GUILD), vec![String::new()]);
    }

    #[tokio::test]
    async fn lookahead_only_resolves_the_window() {
        let mut gateway = FakeGateway::new();
        for i in 0..4 {
            let query = format!("Artist - Song {}", i);
            gateway = gateway.with_search(Provider::YouTube, &query, vec![youtube_track(&query, &format!("song{}", i), 200)]);
        }
        let h = harness(gateway);
        let window = h.engine.config.lookahead_window;
        h.engine.enqueue_many(
            GUILD,
            (0..4)
                .map(|i| spotify_placeholder(&format!("sp{}", i), Some(&format!("Song {}", i))))
                .collect(),
        );

        let player = h.engine.player(GUILD).unwrap();
        wait_until(|| {
            let state = player.state.lock();
            state.queue.tracks().iter().take(window).all(|track| !track.is_pending())
                && state.preload.ready_key() == state.queue.head_key().as_ref()
        })
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = h.engine.snapshot(GUILD).unwrap();
        let pending: Vec<bool> = snapshot.tracks.iter().map(|track| track.is_pending()).collect();
        assert_eq!(pending, vec![false, false, true, true]);
        assert_eq!(snapshot.tracks[0].info.url, "https://youtu.be/song0");
        assert_eq!(snapshot.tracks[0].info.display_url, "https://open.spotify.com/track/sp0");
        assert_eq!(h.gateway.open_count("https://youtu.be/song0"), 1);
    }

    #[tokio::test]
    async fn soundcloud_placeholders_resolve_by_id() {
        let gateway = FakeGateway::new()
            .with_metadata("soundcloud:9", "Deep Cut", &[], 180)
            .with_id(Provider::SoundCloud, "9", youtube_track("Deep Cut", "deep", 180));
        let h = harness(gateway);
        let id = h.engine.enqueue(GUILD, soundcloud_placeholder(9)).unwrap();

        wait_until(|| h.engine.snapshot(GUILD).is_some_and(|snapshot| !snapshot.tracks[0].is_pending())).await;
        let snapshot = h.engine.snapshot(GUILD).unwrap();
        assert_eq!(snapshot.tracks[0].id, id);
        assert_eq!(snapshot.tracks[0].info.url, "https://youtu.be/deep");
    }

    #[tokio::test]
    async fn unresolvable_placeholders_are_not_retried() {
        let h = harness(FakeGateway::new());
        let id = h
            .engine
            .enqueue(GUILD, spotify_placeholder("nothing", Some("Unknown")))
            .unwrap();
        let player = h.engine.player(GUILD).unwrap();
        wait_until(|| player.state.lock().failed_lookahead.contains(&id)).await;
        let calls = h.gateway.search_calls();

        h.engine.enqueue(GUILD, crate::testing::new_track("other")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.gateway.search_calls(), calls);
        assert!(h.engine.snapshot(GUILD).unwrap().tracks[0].is_pending());
    }
}
