//! Voice transport collaborator contract
//!
//! A transport is owned exclusively by one session. It connects to a voice
//! channel, plays one `AudioStream` at a time and reports the end of every
//! stream through the `StreamEnd` it was handed with it.
//!
//! **Module Structure:**
//! - `file_sink.rs`: transport writing each guild's audio to a file

mod file_sink;

pub use file_sink::{FileSinkFactory, FileSinkTransport};

use crate::error::Result;
use crate::providers::AudioStream;
use crate::session::Command;
use async_trait::async_trait;
use guildplay_common::{ChannelId, GuildId};
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

#[async_trait]
pub trait VoiceTransport: Send {
    /// Connect (or move) to `channel` and wait until audio can be sent
    ///
    /// The session bounds this call with its connect deadline.
    async fn connect(&mut self, channel: ChannelId) -> Result<()>;

    /// Channel currently connected to
    fn channel(&self) -> Option<ChannelId>;

    /// Start playing `stream`, replacing anything playing
    ///
    /// `end` must be signalled when the stream finishes or fails. Dropping it
    /// counts as a natural finish.
    fn play(&mut self, stream: AudioStream, end: StreamEnd);

    /// Returns `false` when nothing is playing or it is already paused
    fn pause(&mut self) -> bool;

    /// Returns `false` when nothing is paused
    fn resume(&mut self) -> bool;

    /// Stop the current stream; its `StreamEnd` fires
    fn stop(&mut self);

    /// Stop playback and leave the channel
    async fn disconnect(&mut self);
}

/// Creates the transport for a new session
pub trait TransportFactory: Send + Sync {
    fn create(&self, guild_id: GuildId) -> Box<dyn VoiceTransport>;
}

/// One-shot end-of-stream signal
///
/// Consuming methods guarantee a single delivery; if the transport drops the
/// signal without using it, a natural finish is reported.
pub struct StreamEnd {
    generation: u64,
    tx: Option<UnboundedSender<Command>>,
}

impl StreamEnd {
    pub(crate) fn new(generation: u64, tx: UnboundedSender<Command>) -> Self {
        Self {
            generation,
            tx: Some(tx),
        }
    }

    /// The stream played to its end (or was stopped)
    pub fn finished(mut self) {
        self.send(None);
    }

    /// The stream failed mid-playback; handled like a natural end
    pub fn failed(mut self, reason: impl Into<String>) {
        self.send(Some(reason.into()));
    }

    fn send(&mut self, error: Option<String>) {
        if let Some(tx) = self.tx.take() {
            // The session may already be gone
            let _ = tx.send(Command::StreamEnded {
                generation: self.generation,
                error,
            });
        }
    }
}

impl Drop for StreamEnd {
    fn drop(&mut self) {
        self.send(None);
    }
}

impl fmt::Debug for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEnd")
            .field("generation", &self.generation)
            .field("pending", &self.tx.is_some())
            .finish()
    }
}
