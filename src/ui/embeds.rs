use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use super::SkipSummary;
use crate::{
    audio::{
        queue::{LoopMode, QueueSnapshot},
        track::Track,
    },
    error::ResolveError,
};

/// Paleta de colores estandarizada
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Music";

const QUEUE_ITEMS_PER_PAGE: usize = 10;

/// Título visible; los placeholders sin metadata muestran un texto de espera
fn display_title(track: &Track) -> String {
    if track.info.title.trim().is_empty() {
        format!("⏳ Cargando… ({})", track.info.provider())
    } else {
        track.info.title.clone()
    }
}

fn loop_icon(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Single => "🔂",
        LoopMode::Queue => "🔁",
        LoopMode::Off => "▶️",
    }
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track, up_next: Option<&Track>) -> CreateEmbed {
    let artist = track.info.artist().unwrap_or_else(|| "Desconocido".to_string());
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", display_title(track)))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artista", artist, true);

    embed = match track.info.duration {
        Some(duration) => embed.field("⏱️ Duración", format_duration(duration), true),
        None => embed.field("⏱️ Duración", "🔴 En vivo", true),
    };

    embed = embed
        .field("👤 Solicitado por", format!("<@{}>", track.requester), true)
        .field("🔗 Fuente", track.info.provider().display_name(), true);

    if let Some(next) = up_next {
        embed = embed.field("⏭️ Siguiente", display_title(next), false);
    }

    if let Some(thumbnail) = track.info.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }
    if !track.info.display_url.is_empty() {
        embed = embed.url(&track.info.display_url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso único con los tracks saltados durante un avance
pub fn create_skip_summary_embed(summary: &SkipSummary) -> CreateEmbed {
    let color = if summary.exhausted {
        colors::ERROR_RED
    } else {
        colors::WARNING_ORANGE
    };
    CreateEmbed::default()
        .title("⚠️ Tracks saltados")
        .description(summary.message())
        .color(color)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_ended_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("⏹️ Cola terminada")
        .description("💡 Usa `/play <canción>` para agregar música")
        .color(colors::NEUTRAL_GRAY)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(snapshot: &QueueSnapshot, page: usize) -> CreateEmbed {
    let queue_page = snapshot.page(page, QUEUE_ITEMS_PER_PAGE);

    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if snapshot.current.is_none() && queue_page.total_items == 0 {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &snapshot.current {
        embed = embed.field(
            format!("{} Reproduciendo", loop_icon(snapshot.loop_mode)),
            with_artist(current),
            false,
        );
    }

    if !queue_page.items.is_empty() {
        let first = (queue_page.current_page - 1) * QUEUE_ITEMS_PER_PAGE;
        let description: String = queue_page
            .items
            .iter()
            .enumerate()
            .map(|(i, track)| {
                let duration = track
                    .info
                    .duration
                    .map(|d| format!(" `[{}]`", format_duration(d)))
                    .unwrap_or_default();
                let tag = if track.is_loop_clone() { " 🔁" } else { "" };
                format!("**{}**. {}{}{}\n", first + i + 1, with_artist(track), duration, tag)
            })
            .collect();
        embed = embed.field("Próximas canciones", description, false);
    }

    let mut info = format!("**Total:** {} canciones", queue_page.total_items);
    if snapshot.total_duration > Duration::ZERO {
        info.push_str(&format!(" • **Duración:** {}", format_duration(snapshot.total_duration)));
    }
    embed = embed.field("Información", info, false);

    let footer = if queue_page.total_pages > 1 {
        format!(
            "Página {} de {} • Open Music",
            queue_page.current_page, queue_page.total_pages
        )
    } else {
        STANDARD_FOOTER.to_string()
    };
    embed.footer(CreateEmbedFooter::new(footer)).timestamp(Timestamp::now())
}

/// Crea un embed de error para un fallo terminal de resolución
pub fn create_resolve_error_embed(error: &ResolveError) -> CreateEmbed {
    let description = match error {
        ResolveError::ProviderCredentialsMissing { provider, collection } => format!(
            "Para cargar un {} de {} se necesitan credenciales de API.",
            collection, provider
        ),
        ResolveError::PersonalizedLinkUnsupported(_) => {
            "Los mixes personalizados de SoundCloud sólo funcionan con tu sesión.".to_string()
        }
        ResolveError::Provider(e) => format!("Error del proveedor: {}", e),
    };
    CreateEmbed::default()
        .title("❌ No se pudo cargar")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn with_artist(track: &Track) -> String {
    match track.info.artist() {
        Some(artist) => format!("**{}** - {}", display_title(track), artist),
        None => format!("**{}**", display_title(track)),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
