//! Per-guild playback session
//!
//! **Responsibilities:**
//! - Own the transport connection, the FIFO queue, the current track and the idle timer
//! - Drive the Idle/Playing/Paused state machine
//! - Run the provider chain for each track, one resolution at a time
//!
//! **Module Structure:**
//! - `actor.rs`: the session task and its state transitions
//! - `timer.rs`: single-shot idle timer
//!
//! Every session is one tokio task. `SessionHandle` is a cheap clonable
//! sender; requests are answered over oneshot channels, and transport
//! end-of-stream signals arrive on the same channel, so transitions are
//! serialized without locks.

mod actor;
mod timer;

pub(crate) use actor::Command;

use crate::error::{Error, Result};
use crate::providers::ProviderChain;
use crate::transport::VoiceTransport;
use guildplay_common::config::TomlConfig;
use guildplay_common::{ChannelId, EventBus, GuildId, PlaybackState, Track};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Owned copy of a session's queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub state: PlaybackState,
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
}

/// Timing knobs for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Deadline for the transport to become ready on `join`
    pub connect_timeout: Duration,
    /// Delay with nothing playing and nothing queued before teardown
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&TomlConfig::default())
    }
}

impl From<&TomlConfig> for SessionSettings {
    fn from(config: &TomlConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Handle to a running session
///
/// Every operation fails with `Error::SessionClosed` once the session has
/// been destroyed, except `destroy` itself.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Unique id of this session instance
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Whether the session task has ended
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| Error::SessionClosed(self.guild_id))?;
        response.await.map_err(|_| Error::SessionClosed(self.guild_id))
    }

    /// Connect to `channel`, or move there; no-op when already connected to it
    ///
    /// On `ConnectionTimeout` an existing connection keeps playing. Without
    /// one, the current track is put back at the head of the queue and
    /// resumes on the next successful join.
    pub async fn join(&self, channel: ChannelId) -> Result<()> {
        self.request(|reply| Command::Join { channel, reply }).await?
    }

    /// Append `track`; starts playback when the session is idle
    pub async fn enqueue(&self, track: Track) -> Result<()> {
        self.request(|reply| Command::Enqueue { track, reply }).await
    }

    /// Drop every upcoming track, returning how many were removed
    pub async fn clear_upcoming(&self) -> Result<usize> {
        self.request(|reply| Command::ClearUpcoming { reply }).await
    }

    pub async fn pause(&self) -> Result<bool> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<bool> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Abandon the current track and move to the next one
    pub async fn skip(&self) -> Result<()> {
        self.request(|reply| Command::Skip { reply }).await
    }

    /// Clear the queue and the current track and go idle
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Tear the session down; succeeds if it is already gone
    pub async fn destroy(&self) -> Result<()> {
        match self.request(|reply| Command::Destroy { reply }).await {
            Err(Error::SessionClosed(_)) => Ok(()),
            other => other,
        }
    }
}

/// Start a session task for `guild_id`
///
/// The idle timer is armed immediately. `on_destroy` runs exactly once, with
/// the session id, when the session tears itself down.
pub fn spawn(
    guild_id: GuildId,
    transport: Box<dyn VoiceTransport>,
    chain: Arc<ProviderChain>,
    settings: SessionSettings,
    events: EventBus,
    on_destroy: impl FnOnce(Uuid) + Send + 'static,
) -> SessionHandle {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    let session = actor::SessionActor::new(
        id,
        guild_id,
        transport,
        chain,
        settings,
        events,
        rx,
        tx.downgrade(),
        Box::new(on_destroy),
    );
    tokio::spawn(session.run());

    SessionHandle { id, guild_id, tx }
}
