use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::GuildId;
use songbird::{
    input::Input,
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::{fmt, sync::Arc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::SinkError;

/// Identifica una reproducción concreta; los eventos con un token viejo se ignoran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackToken(pub(crate) u64);

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEventKind {
    Finished,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEvent {
    pub token: PlaybackToken,
    pub kind: SinkEventKind,
}

/// Salida de audio de un guild. Sólo el motor de reproducción la controla.
#[async_trait]
pub trait AudioSink<R: Send + 'static>: Send + Sync {
    /// Canal por el que llegan los eventos de fin/error de cada reproducción
    fn subscribe(&self, events: mpsc::UnboundedSender<SinkEvent>);

    async fn play(&self, resource: R, token: PlaybackToken) -> Result<(), SinkError>;

    async fn pause(&self) -> Result<(), SinkError>;

    async fn unpause(&self) -> Result<(), SinkError>;

    async fn stop(&self, force: bool) -> Result<(), SinkError>;

    /// Abandona el canal de voz
    async fn release_connection(&self) -> Result<(), SinkError>;
}

/// Sink sobre una llamada de songbird
pub struct SongbirdSink {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    events: SyncMutex<Option<mpsc::UnboundedSender<SinkEvent>>>,
    current: SyncMutex<Option<TrackHandle>>,
}

impl SongbirdSink {
    pub fn new(guild_id: GuildId, call: Arc<Mutex<Call>>) -> Self {
        Self {
            guild_id,
            call,
            events: SyncMutex::new(None),
            current: SyncMutex::new(None),
        }
    }

    fn current_handle(&self) -> Result<TrackHandle, SinkError> {
        self.current.lock().clone().ok_or(SinkError::NotConnected)
    }
}

/// Reenvía End/Error de songbird al supervisor del guild
struct TrackEventForwarder {
    token: PlaybackToken,
    events: mpsc::UnboundedSender<SinkEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let kind = match ctx {
            EventContext::Track(states) => match states.first().map(|(state, _)| &state.playing) {
                Some(songbird::tracks::PlayMode::Errored(e)) => SinkEventKind::Errored(e.to_string()),
                _ => SinkEventKind::Finished,
            },
            _ => SinkEventKind::Finished,
        };
        debug!("Evento de track {}: {:?}", self.token, kind);

        if self.events.send(SinkEvent { token: self.token, kind }).is_err() {
            debug!("Supervisor ya no escucha eventos de {}", self.token);
        }
        None
    }
}

#[async_trait]
impl AudioSink<Input> for SongbirdSink {
    fn subscribe(&self, events: mpsc::UnboundedSender<SinkEvent>) {
        *self.events.lock() = Some(events);
    }

    async fn play(&self, resource: Input, token: PlaybackToken) -> Result<(), SinkError> {
        let events = self.events.lock().clone().ok_or(SinkError::NotConnected)?;

        let handle = {
            let mut call = self.call.lock().await;
            if call.current_connection().is_none() {
                return Err(SinkError::NotConnected);
            }
            call.play_only_input(resource)
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEventForwarder {
                        token,
                        events: events.clone(),
                    },
                )
                .map_err(|e| SinkError::Driver(e.to_string()))?;
        }

        *self.current.lock() = Some(handle);
        info!("🎵 Reproduciendo en guild {} ({})", self.guild_id, token);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SinkError> {
        self.current_handle()?
            .pause()
            .map_err(|e| SinkError::Driver(e.to_string()))?;
        info!("⏸️ Reproducción pausada");
        Ok(())
    }

    async fn unpause(&self) -> Result<(), SinkError> {
        self.current_handle()?
            .play()
            .map_err(|e| SinkError::Driver(e.to_string()))?;
        info!("▶️ Reproducción reanudada");
        Ok(())
    }

    async fn stop(&self, force: bool) -> Result<(), SinkError> {
        let handle = self.current.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.stop() {
                    // El track ya terminó por su cuenta
                    debug!("stop sobre un track terminado: {}", e);
                }
            }
            None if force => self.call.lock().await.stop(),
            None => {}
        }
        Ok(())
    }

    async fn release_connection(&self) -> Result<(), SinkError> {
        self.current.lock().take();
        let mut call = self.call.lock().await;
        call.stop();
        if let Err(e) = call.leave().await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {}", self.guild_id, e);
            return Err(SinkError::Driver(e.to_string()));
        }
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

impl Drop for SongbirdSink {
    fn drop(&mut self) {
        if let Some(handle) = self.current.get_mut().take() {
            if let Err(e) = handle.stop() {
                debug!("Track ya detenido al soltar el sink: {}", e);
            }
        }
    }
}
