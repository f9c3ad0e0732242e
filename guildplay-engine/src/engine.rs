//! Playback engine façade
//!
//! Thin dispatch layer: every intent looks up (or creates) the guild's
//! session and forwards to it. A request that races with the session's own
//! teardown is retried once against a fresh session.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::registry::SessionRegistry;
use crate::session::{QueueSnapshot, SessionHandle};
use guildplay_common::{EventBus, GuildId, SessionEvent, SourceFilter, Track, VoiceChannel};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct PlaybackEngine {
    registry: SessionRegistry,
    catalog: Arc<dyn Catalog>,
    events: EventBus,
}

impl PlaybackEngine {
    pub fn new(registry: SessionRegistry, catalog: Arc<dyn Catalog>, events: EventBus) -> Self {
        Self {
            registry,
            catalog,
            events,
        }
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    async fn with_session<T, F, Fut>(&self, guild_id: GuildId, op: F) -> Result<T>
    where
        F: Fn(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op(self.registry.get_or_create(guild_id)).await {
            Err(Error::SessionClosed(_)) => {
                debug!(guild = %guild_id, "Session closed mid-request, retrying on a new session");
                op(self.registry.get_or_create(guild_id)).await
            }
            other => other,
        }
    }

    /// Join `channel` and enqueue `track`
    pub async fn play(&self, channel: VoiceChannel, track: Track) -> Result<()> {
        if track.canonical_url.trim().is_empty() {
            return Err(Error::InvalidInput("track has no location".to_string()));
        }

        info!(channel = %channel, "Queueing {:?}", track.title);
        self.with_session(channel.guild_id, |session| {
            let track = track.clone();
            async move {
                session.join(channel.channel_id).await?;
                session.enqueue(track).await
            }
        })
        .await
    }

    /// Search the catalog, map the first result to a playable location and play it
    ///
    /// Returns the queued track.
    pub async fn play_query(
        &self,
        channel: VoiceChannel,
        query: &str,
        filter: SourceFilter,
        requested_by: Option<&str>,
    ) -> Result<Track> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("empty query".to_string()));
        }

        let first = self
            .catalog
            .search(query, filter, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoResults(query.to_string()))?;

        let mut track = self.catalog.resolve_playable(first).await?;
        if track.playback_location().is_none() && !track.source.is_streamable() {
            return Err(Error::NoPlayableLocation(track.title));
        }
        if let Some(requester) = requested_by {
            track.requested_by = Some(requester.to_string());
        }

        self.play(channel, track.clone()).await?;
        Ok(track)
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<bool> {
        self.with_session(guild_id, |session| async move { session.pause().await })
            .await
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<bool> {
        self.with_session(guild_id, |session| async move { session.resume().await })
            .await
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<()> {
        self.with_session(guild_id, |session| async move { session.skip().await })
            .await
    }

    pub async fn stop(&self, guild_id: GuildId) -> Result<()> {
        self.with_session(guild_id, |session| async move { session.stop().await })
            .await
    }

    /// Remove every upcoming track, returning how many were removed
    pub async fn clear(&self, guild_id: GuildId) -> Result<usize> {
        self.with_session(guild_id, |session| async move { session.clear_upcoming().await })
            .await
    }

    pub async fn get_state(&self, guild_id: GuildId) -> Result<QueueSnapshot> {
        self.with_session(guild_id, |session| async move { session.snapshot().await })
            .await
    }

    /// Destroy every live session
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
