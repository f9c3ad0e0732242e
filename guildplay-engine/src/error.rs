//! Error types for guildplay-engine
//!
//! Only session-establishment failures and malformed caller input reach the
//! façade. Per-track resolution failures are `ResolveError`s
//! (see `providers`) and are absorbed inside the session.

use guildplay_common::{ChannelId, GuildId};
use std::time::Duration;
use thiserror::Error;

/// Main error type for guildplay-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Transport never reached the ready state
    #[error("Voice connection to channel {channel} not ready after {timeout:?}")]
    ConnectionTimeout { channel: ChannelId, timeout: Duration },

    /// Transport refused or failed the connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session was destroyed while the request was in flight
    #[error("Session for guild {0} is closed")]
    SessionClosed(GuildId),

    /// Catalog collaborator failure
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The catalog could not map a track to anything streamable
    #[error("No playable location for {0}")]
    NoPlayableLocation(String),

    /// Catalog search returned nothing
    #[error("No results found for query: {0}")]
    NoResults(String),

    /// Invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Errors from the common crate (configuration, parsing)
    #[error(transparent)]
    Common(#[from] guildplay_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using guildplay-engine Error
pub type Result<T> = std::result::Result<T, Error>;
