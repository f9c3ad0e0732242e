//! # Guildplay Common Library
//!
//! Shared code for the guildplay workspace including:
//! - Guild and channel identifiers
//! - The `Track` data model and source filters
//! - Session lifecycle events (SessionEvent enum) and the EventBus
//! - Configuration loading (TOML bootstrap + built-in defaults)

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod track;

pub use error::{Error, Result};
pub use events::{EventBus, PlaybackState, SessionEvent};
pub use ids::{ChannelId, GuildId, VoiceChannel};
pub use track::{SourceFilter, Track, TrackSource};
