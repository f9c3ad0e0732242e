//! Session task
//!
//! All state lives in `SessionActor` and is only touched from its own task.
//! Resolutions run in spawned tasks and report back as `Command::Resolved`;
//! transports report the end of a stream as `Command::StreamEnded`. Both
//! carry the generation they were started under, and anything from an older
//! generation is discarded, so an abandoned resolution or a stopped stream
//! can never resurrect playback.

use super::timer::IdleTimer;
use super::{QueueSnapshot, SessionSettings};
use crate::error::{Error, Result};
use crate::providers::{AudioStream, ProviderChain, ResolveError};
use crate::transport::{StreamEnd, VoiceTransport};
use chrono::Utc;
use guildplay_common::{ChannelId, EventBus, GuildId, PlaybackState, SessionEvent, Track};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub(crate) enum Command {
    Join {
        channel: ChannelId,
        reply: oneshot::Sender<Result<()>>,
    },
    Enqueue {
        track: Track,
        reply: oneshot::Sender<()>,
    },
    ClearUpcoming {
        reply: oneshot::Sender<usize>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Skip {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
    /// Outcome of the provider chain for the track started under `generation`
    Resolved {
        generation: u64,
        track: Track,
        result: std::result::Result<AudioStream, ResolveError>,
    },
    /// Transport finished (or failed) the stream started under `generation`
    StreamEnded {
        generation: u64,
        error: Option<String>,
    },
}

/// What the session is doing with the current track
enum Phase {
    /// No current track
    Stopped,
    /// Provider chain running; cancelling the token abandons it
    Resolving(CancellationToken),
    /// Stream handed to the transport
    Streaming,
}

pub(crate) struct SessionActor {
    id: Uuid,
    guild_id: GuildId,
    transport: Box<dyn VoiceTransport>,
    chain: Arc<ProviderChain>,
    settings: SessionSettings,
    events: EventBus,
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::WeakUnboundedSender<Command>,

    queue: VecDeque<Track>,
    current: Option<Track>,
    state: PlaybackState,
    phase: Phase,
    /// Bumped whenever the current track is abandoned or replaced
    generation: u64,
    /// Pause requested while the current track was still resolving
    start_paused: bool,
    timer: IdleTimer,
    on_destroy: Option<Box<dyn FnOnce(Uuid) + Send>>,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: Uuid,
        guild_id: GuildId,
        transport: Box<dyn VoiceTransport>,
        chain: Arc<ProviderChain>,
        settings: SessionSettings,
        events: EventBus,
        rx: mpsc::UnboundedReceiver<Command>,
        tx: mpsc::WeakUnboundedSender<Command>,
        on_destroy: Box<dyn FnOnce(Uuid) + Send>,
    ) -> Self {
        let mut timer = IdleTimer::new(settings.idle_timeout);
        timer.arm();

        Self {
            id,
            guild_id,
            transport,
            chain,
            settings,
            events,
            rx,
            tx,
            queue: VecDeque::new(),
            current: None,
            state: PlaybackState::Idle,
            phase: Phase::Stopped,
            generation: 0,
            start_paused: false,
            timer,
            on_destroy: Some(on_destroy),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(guild = %self.guild_id, session = %self.id, "Session started");

        loop {
            let idle = self.timer.expired();
            tokio::select! {
                biased;
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        self.teardown().await;
                        break;
                    };
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
                _ = idle => {
                    info!(guild = %self.guild_id, "Idle timeout reached, leaving voice channel");
                    self.teardown().await;
                    break;
                }
            }
        }

        debug!(guild = %self.guild_id, session = %self.id, "Session task finished");
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Join { channel, reply } => {
                let result = self.join(channel).await;
                let _ = reply.send(result);
            }
            Command::Enqueue { track, reply } => {
                self.enqueue(track);
                let _ = reply.send(());
            }
            Command::ClearUpcoming { reply } => {
                let removed = self.queue.len();
                self.queue.clear();
                debug!(guild = %self.guild_id, "Cleared {} upcoming tracks", removed);
                let _ = reply.send(removed);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            Command::Skip { reply } => {
                self.skip();
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Destroy { reply } => {
                self.teardown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            Command::Resolved {
                generation,
                track,
                result,
            } => self.on_resolved(generation, track, result),
            Command::StreamEnded { generation, error } => self.on_stream_ended(generation, error),
        }
        ControlFlow::Continue(())
    }

    async fn join(&mut self, channel: ChannelId) -> Result<()> {
        self.timer.disarm();
        let previous = self.transport.channel();

        let result = if previous == Some(channel) {
            debug!(guild = %self.guild_id, "Already connected to channel {}", channel);
            Ok(())
        } else {
            let timeout = self.settings.connect_timeout;
            let outcome = match tokio::time::timeout(timeout, self.transport.connect(channel)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    warn!(guild = %self.guild_id, "Failed to connect to channel {}: {}", channel, e);
                    Err(e)
                }
                Err(_) => {
                    warn!(
                        guild = %self.guild_id,
                        "Voice connection to channel {} not ready after {:?}", channel, timeout
                    );
                    Err(Error::ConnectionTimeout { channel, timeout })
                }
            };
            if outcome.is_err() {
                self.recover_failed_connect(previous).await;
            }
            outcome
        };

        // A track halted by an earlier failed join resumes once connected
        if result.is_ok() && self.current.is_none() && !self.queue.is_empty() {
            self.advance();
        }
        // A join that is not followed by a track must not keep the session alive
        if self.current.is_none() {
            self.timer.arm();
        }
        result
    }

    /// Leave the transport usable after a failed connect
    ///
    /// A working connection to another channel is kept along with its stream.
    /// A half-open first connection is released; if no connection is left,
    /// playback halts without consuming the queue.
    async fn recover_failed_connect(&mut self, previous: Option<ChannelId>) {
        match previous {
            Some(old) if self.transport.channel() == Some(old) => {
                debug!(guild = %self.guild_id, "Keeping connection to channel {}", old);
            }
            Some(_) => self.halt_playback(),
            None => {
                self.halt_playback();
                self.transport.disconnect().await;
            }
        }
    }

    /// Stop the current stream without advancing
    ///
    /// The track goes back to the head of the queue so the next successful
    /// join starts it again.
    fn halt_playback(&mut self) {
        let Some(track) = self.current.take() else {
            return;
        };
        info!(guild = %self.guild_id, "Halting {:?} until the session reconnects", track.title);
        self.queue.push_front(track);
        self.abandon_current();
        self.transport.stop();
    }

    fn enqueue(&mut self, track: Track) {
        self.timer.disarm();
        debug!(guild = %self.guild_id, "Enqueued {:?}", track.title);
        self.queue.push_back(track);
        if self.current.is_none() {
            self.advance();
        }
    }

    fn pause(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        match self.phase {
            Phase::Streaming => {
                if !self.transport.pause() {
                    return false;
                }
            }
            Phase::Resolving(_) => self.start_paused = true,
            Phase::Stopped => return false,
        }
        self.state = PlaybackState::Paused;
        true
    }

    fn resume(&mut self) -> bool {
        if self.state != PlaybackState::Paused {
            return false;
        }
        match self.phase {
            Phase::Streaming => {
                if !self.transport.resume() {
                    return false;
                }
            }
            Phase::Resolving(_) => self.start_paused = false,
            Phase::Stopped => return false,
        }
        self.state = PlaybackState::Playing;
        true
    }

    fn skip(&mut self) {
        let Some(current) = &self.current else {
            debug!(guild = %self.guild_id, "Nothing to skip");
            return;
        };
        info!(guild = %self.guild_id, "Skipping {:?}", current.title);
        if matches!(self.phase, Phase::Streaming) {
            self.transport.stop();
        }
        self.advance();
    }

    fn stop(&mut self) {
        info!(guild = %self.guild_id, "Stopping playback");
        self.queue.clear();
        self.abandon_current();
        self.transport.stop();
        self.timer.arm();
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.state,
            current: self.current.clone(),
            upcoming: self.queue.iter().cloned().collect(),
        }
    }

    /// Cancel any resolution and forget the current track
    ///
    /// Bumping the generation turns every in-flight `Resolved` and
    /// `StreamEnded` for the abandoned track into a stale message.
    fn abandon_current(&mut self) {
        if let Phase::Resolving(cancel) = std::mem::replace(&mut self.phase, Phase::Stopped) {
            cancel.cancel();
        }
        self.generation += 1;
        self.current = None;
        self.state = PlaybackState::Idle;
        self.start_paused = false;
    }

    /// Start the next queued track, or go idle when the queue is empty
    fn advance(&mut self) {
        self.abandon_current();

        let Some(track) = self.queue.pop_front() else {
            info!(guild = %self.guild_id, "Queue empty, waiting for idle timeout");
            self.timer.arm();
            self.events.emit_lossy(SessionEvent::QueueDrained {
                guild_id: self.guild_id,
                timestamp: Utc::now(),
            });
            return;
        };

        let Some(tx) = self.tx.upgrade() else {
            // Every sender is gone; the run loop is about to end
            return;
        };

        self.timer.disarm();
        self.current = Some(track.clone());
        self.state = PlaybackState::Playing;

        let cancel = CancellationToken::new();
        self.phase = Phase::Resolving(cancel.clone());
        let generation = self.generation;
        let chain = self.chain.clone();

        tokio::spawn(async move {
            let (track, result) = chain.resolve(track, &cancel).await;
            let resolved = Command::Resolved {
                generation,
                track,
                result,
            };
            if let Err(mpsc::error::SendError(Command::Resolved { result: Ok(stream), .. })) =
                tx.send(resolved)
            {
                stream.close().await;
            }
        });
    }

    fn on_resolved(
        &mut self,
        generation: u64,
        track: Track,
        result: std::result::Result<AudioStream, ResolveError>,
    ) {
        if generation != self.generation || !matches!(self.phase, Phase::Resolving(_)) {
            debug!(guild = %self.guild_id, "Discarding stale resolution of {:?}", track.title);
            if let Ok(stream) = result {
                tokio::spawn(stream.close());
            }
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(ResolveError::Cancelled) => return,
            Err(e) => {
                warn!(guild = %self.guild_id, "Skipping {:?}: {}", track.title, e);
                self.events.emit_lossy(SessionEvent::TrackSkipped {
                    guild_id: self.guild_id,
                    title: track.title,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.advance();
                return;
            }
        };

        let Some(tx) = self.tx.upgrade() else {
            tokio::spawn(stream.close());
            return;
        };

        let provider = stream.provider().to_string();
        let format = stream.format().to_string();
        self.transport.play(stream, StreamEnd::new(generation, tx));
        self.phase = Phase::Streaming;

        if self.start_paused && self.transport.pause() {
            self.state = PlaybackState::Paused;
        } else {
            self.state = PlaybackState::Playing;
        }
        self.start_paused = false;

        info!(guild = %self.guild_id, "Now playing {:?} via {} ({})", track.title, provider, format);
        self.events.emit_lossy(SessionEvent::TrackStarted {
            guild_id: self.guild_id,
            title: track.title.clone(),
            provider,
            format,
            timestamp: Utc::now(),
        });
        // Keeps the location mapped during resolution
        self.current = Some(track);
    }

    fn on_stream_ended(&mut self, generation: u64, error: Option<String>) {
        if generation != self.generation || !matches!(self.phase, Phase::Streaming) {
            return;
        }
        match error {
            Some(e) => warn!(guild = %self.guild_id, "Player error: {}", e),
            None => debug!(guild = %self.guild_id, "Track finished"),
        }
        self.advance();
    }

    async fn teardown(&mut self) {
        // Handles observe the session as closed from here on
        self.rx.close();
        self.timer.disarm();
        self.queue.clear();
        self.abandon_current();
        self.transport.stop();
        self.transport.disconnect().await;

        if let Some(on_destroy) = self.on_destroy.take() {
            on_destroy(self.id);
        }

        info!(guild = %self.guild_id, "Session destroyed");
        self.events.emit_lossy(SessionEvent::SessionDestroyed {
            guild_id: self.guild_id,
            timestamp: Utc::now(),
        });
    }
}
