//! # UI Module
//!
//! The playback engine reports to a [`Presenter`]: now playing, queue
//! refreshes, coalesced skip notices and the end of the queue. Calls are
//! synchronous and fire-and-forget; a presenter can never fail the engine.
//!
//! [`DiscordPresenter`] posts serenity embeds to a per-guild announcement
//! channel, spawning the HTTP calls and only logging their failures.

pub mod embeds;

use dashmap::DashMap;
use serenity::{
    builder::{CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, GuildId, MessageId},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audio::{queue::QueueSnapshot, track::Track};

/// Tracks saltados durante un único avance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipSummary {
    /// Entradas sin URL y sin posibilidad de resolverse
    pub malformed: usize,
    /// Placeholders que no resolvieron o streams que no abrieron
    pub load_failures: usize,
    /// La cola se agotó sin encontrar nada reproducible
    pub exhausted: bool,
}

impl SkipSummary {
    pub fn is_empty(&self) -> bool {
        self.malformed == 0 && self.load_failures == 0
    }

    pub fn message(&self) -> String {
        let mut parts = Vec::new();
        if self.malformed > 0 {
            parts.push(format!(
                "Skipped {} malformed queue {}",
                self.malformed,
                if self.malformed == 1 { "entry" } else { "entries" }
            ));
        }
        if self.load_failures > 0 {
            parts.push(format!(
                "{} {} failed to load",
                self.load_failures,
                if self.load_failures == 1 { "track" } else { "tracks" }
            ));
        }
        let detail = parts.join("; ");
        if self.exhausted {
            format!("No playable tracks left in the queue. {}", detail)
        } else {
            detail
        }
    }
}

/// Destino de las notificaciones del motor de reproducción
#[cfg_attr(test, mockall::automock)]
pub trait Presenter: Send + Sync {
    /// La cola cambió (hidratación, reordenamiento, encolado)
    fn on_queue_changed(&self, guild_id: GuildId, snapshot: &QueueSnapshot);

    fn on_playback_started(&self, guild_id: GuildId, track: &Track, snapshot: &QueueSnapshot);

    fn on_skip_summary(&self, guild_id: GuildId, summary: &SkipSummary);

    fn on_queue_ended(&self, guild_id: GuildId);
}

/// Presenter que publica embeds en Discord
pub struct DiscordPresenter {
    http: Arc<Http>,
    channels: DashMap<GuildId, ChannelId>,
    /// Último "Reproduciendo Ahora" por guild, refrescado con cada cambio de cola
    now_playing: Arc<DashMap<GuildId, (ChannelId, MessageId)>>,
}

impl DiscordPresenter {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            channels: DashMap::new(),
            now_playing: Arc::new(DashMap::new()),
        }
    }

    /// Canal donde se anuncian los eventos de un guild
    pub fn set_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.channels.insert(guild_id, channel_id);
    }

    pub fn forget(&self, guild_id: GuildId) {
        self.channels.remove(&guild_id);
        self.now_playing.remove(&guild_id);
    }

    fn send(&self, guild_id: GuildId, message: CreateMessage, remember_now_playing: bool) {
        let Some(channel_id) = self.channels.get(&guild_id).map(|entry| *entry) else {
            debug!("Sin canal de anuncios para guild {}", guild_id);
            return;
        };
        let http = self.http.clone();
        let now_playing = self.now_playing.clone();

        tokio::spawn(async move {
            match channel_id.send_message(&http, message).await {
                Ok(sent) if remember_now_playing => {
                    now_playing.insert(guild_id, (channel_id, sent.id));
                }
                Ok(_) => {}
                Err(e) => warn!("⚠️ No se pudo enviar mensaje en guild {}: {}", guild_id, e),
            }
        });
    }
}

impl Presenter for DiscordPresenter {
    fn on_queue_changed(&self, guild_id: GuildId, snapshot: &QueueSnapshot) {
        let Some(current) = &snapshot.current else {
            return;
        };
        let Some((channel_id, message_id)) = self.now_playing.get(&guild_id).map(|entry| *entry) else {
            return;
        };
        let embed = embeds::create_now_playing_embed(current, snapshot.tracks.first());
        let http = self.http.clone();

        tokio::spawn(async move {
            if let Err(e) = channel_id
                .edit_message(&http, message_id, EditMessage::new().embed(embed))
                .await
            {
                debug!("No se pudo refrescar el mensaje de guild {}: {}", guild_id, e);
            }
        });
    }

    fn on_playback_started(&self, guild_id: GuildId, track: &Track, snapshot: &QueueSnapshot) {
        let embed = embeds::create_now_playing_embed(track, snapshot.tracks.first());
        self.send(guild_id, CreateMessage::new().embed(embed), true);
    }

    fn on_skip_summary(&self, guild_id: GuildId, summary: &SkipSummary) {
        let embed = embeds::create_skip_summary_embed(summary);
        self.send(guild_id, CreateMessage::new().embed(embed), false);
    }

    fn on_queue_ended(&self, guild_id: GuildId) {
        self.now_playing.remove(&guild_id);
        self.send(
            guild_id,
            CreateMessage::new().embed(embeds::create_queue_ended_embed()),
            false,
        );
    }
}
