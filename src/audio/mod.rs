//! # Audio Module
//!
//! Per-guild queue state and the playback engine that drives it.
//!
//! ## Architecture
//!
//! ### [`track`] - Data Model
//! - Tracks with process-unique ids, resolved or pending (placeholders)
//! - One-way hydration of placeholders, in place
//!
//! ### [`queue`] and [`loop_mode`] - Queue Management
//! - Ordered upcoming tracks plus the current one
//! - `single`/`queue` loop modes expressed as tagged clones
//!
//! ### [`player`] - Playback Engine
//! - One [`player::GuildPlayer`] per guild, serialised advances
//! - Playback tokens: one advance per finished or errored playback
//! - Coalesced skip notices for malformed or unloadable entries
//!
//! ### [`preload`] and [`hydrator`] - Background Work
//! - The queue head is opened ahead of time; stale opens are released
//! - Placeholders near the head are resolved early, the rest get metadata
//!
//! ### [`sink`] - Audio Output
//! - [`sink::AudioSink`] seam, implemented over songbird calls
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let engine = PlaybackEngine::new(waterfall, presenter, ids, MetadataCache::default(), config.playback());
//! engine.attach_sink(guild_id, Arc::new(SongbirdSink::new(guild_id, call)));
//!
//! engine.request(guild_id, "artist - song", user_id).await?;
//! engine.set_loop_mode(guild_id, LoopMode::Queue)?;
//! engine.skip(guild_id).await?;
//! ```

pub mod hydrator;
pub mod loop_mode;
pub mod player;
pub mod preload;
pub mod queue;
pub mod sink;
pub mod track;

pub use player::{PlaybackEngine, PlaybackPhase};
pub use queue::{GuildQueue, LoopMode, QueueSnapshot};
pub use sink::{AudioSink, SongbirdSink};
pub use track::{NewTrack, Track, TrackId, TrackIdGenerator, TrackInfo};
