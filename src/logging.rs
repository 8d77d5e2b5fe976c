use anyhow::Result;
use tracing::info;

/// Inicializa el subscriber de tracing.
///
/// `RUST_LOG` tiene prioridad; si no está definido se usan las directivas por
/// defecto del crate y de songbird.
pub fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("open_music_queue=debug".parse()?)
        .add_directive("songbird=info".parse()?)
        .add_directive("serenity=info".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("No se pudo inicializar el logging: {}", e))?;

    info!("🎵 Open Music Queue v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
