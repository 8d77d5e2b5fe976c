//! # Open Music Queue
//!
//! Per-guild music queue core for a Discord bot: multi-provider track
//! resolution (YouTube, SoundCloud, Spotify, direct URLs), loop modes,
//! deferred placeholders for large playlists and preloaded playback over
//! songbird.
//!
//! ## Modules
//!
//! - [`sources`] - provider clients and the resolution waterfall
//! - [`audio`] - queue, loop modes, preload and the playback engine
//! - [`cache`] - bounded metadata cache
//! - [`ui`] - presenter seam and Discord embeds
//! - [`config`], [`logging`], [`error`] - ambient setup

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod sources;
pub mod ui;

#[cfg(test)]
mod testing;

pub use audio::{LoopMode, PlaybackEngine};
pub use config::Config;
pub use sources::{HttpGateway, Waterfall};
