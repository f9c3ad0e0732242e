//! Session lifecycle events
//!
//! Provides the shared event definitions and the EventBus that playback
//! sessions publish to. Front ends subscribe to report progress; the engine
//! never depends on anyone listening.

use crate::ids::GuildId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Playback state of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No current track
    #[default]
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// Session event types
///
/// Events are broadcast via EventBus and can be serialized for any
/// front end that wants to forward them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A track's stream was handed to the transport
    TrackStarted {
        guild_id: GuildId,
        title: String,
        /// Name of the provider that produced the stream
        provider: String,
        /// Container/codec detected for the stream
        format: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track was dropped because no provider could stream it
    TrackSkipped {
        guild_id: GuildId,
        title: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The queue ran out and the session went idle
    QueueDrained {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The session released its connection and left the registry
    SessionDestroyed {
        guild_id: GuildId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SessionEvent {
    /// Guild the event belongs to
    pub fn guild_id(&self) -> GuildId {
        match self {
            SessionEvent::TrackStarted { guild_id, .. }
            | SessionEvent::TrackSkipped { guild_id, .. }
            | SessionEvent::QueueDrained { guild_id, .. }
            | SessionEvent::SessionDestroyed { guild_id, .. } => *guild_id,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::TrackStarted { .. } => "TrackStarted",
            SessionEvent::TrackSkipped { .. } => "TrackSkipped",
            SessionEvent::QueueDrained { .. } => "QueueDrained",
            SessionEvent::SessionDestroyed { .. } => "SessionDestroyed",
        }
    }
}

/// Broadcast bus for session events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
