//! In-memory collaborators

use async_trait::async_trait;
use guildplay_common::{ChannelId, GuildId, SourceFilter, Track, TrackSource};
use guildplay_engine::catalog::Catalog;
use guildplay_engine::providers::{
    video_id, watch_url, AudioStream, ResolveError, StreamFormat, StreamResolver,
};
use guildplay_engine::transport::{StreamEnd, TransportFactory, VoiceTransport};
use guildplay_engine::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Transport call as observed by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(ChannelId),
    Play { provider: String, format: String },
    Pause,
    Resume,
    Stop,
    Disconnect,
}

#[derive(Default)]
struct LogInner {
    calls: Vec<(GuildId, TransportCall)>,
    active: HashMap<GuildId, StreamEnd>,
    paused: HashSet<GuildId>,
}

/// Shared record of every fake transport, plus control over their streams
#[derive(Clone, Default)]
pub struct TransportLog {
    inner: Arc<Mutex<LogInner>>,
}

impl TransportLog {
    fn record(&self, guild_id: GuildId, call: TransportCall) {
        self.inner.lock().unwrap().calls.push((guild_id, call));
    }

    /// Calls made by the transport of `guild_id`, in order
    pub fn calls(&self, guild_id: GuildId) -> Vec<TransportCall> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(guild, _)| *guild == guild_id)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn count(&self, guild_id: GuildId, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls(guild_id).iter().filter(|call| predicate(call)).count()
    }

    pub fn plays(&self, guild_id: GuildId) -> usize {
        self.count(guild_id, |call| matches!(call, TransportCall::Play { .. }))
    }

    pub fn is_streaming(&self, guild_id: GuildId) -> bool {
        self.inner.lock().unwrap().active.contains_key(&guild_id)
    }

    /// End the active stream of `guild_id` as if it played out
    pub fn finish(&self, guild_id: GuildId) {
        let end = self.inner.lock().unwrap().active.remove(&guild_id);
        end.expect("no active stream to finish").finished();
    }

    /// Fail the active stream of `guild_id`
    pub fn fail(&self, guild_id: GuildId, reason: &str) {
        let end = self.inner.lock().unwrap().active.remove(&guild_id);
        end.expect("no active stream to fail").failed(reason);
    }
}

pub struct FakeTransport {
    guild_id: GuildId,
    channel: Option<ChannelId>,
    log: TransportLog,
    connect_delay: Duration,
    slow_channels: HashMap<ChannelId, Duration>,
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(&mut self, channel: ChannelId) -> Result<()> {
        self.log.record(self.guild_id, TransportCall::Connect(channel));
        let delay = self.slow_channels.get(&channel).copied().unwrap_or(self.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.channel = Some(channel);
        Ok(())
    }

    fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    fn play(&mut self, stream: AudioStream, end: StreamEnd) {
        self.log.record(
            self.guild_id,
            TransportCall::Play {
                provider: stream.provider().to_string(),
                format: stream.format().to_string(),
            },
        );
        let previous = {
            let mut inner = self.log.inner.lock().unwrap();
            inner.paused.remove(&self.guild_id);
            inner.active.insert(self.guild_id, end)
        };
        // Replaced streams report their end like a real transport would
        drop(previous);
    }

    fn pause(&mut self) -> bool {
        let mut inner = self.log.inner.lock().unwrap();
        if !inner.active.contains_key(&self.guild_id) || !inner.paused.insert(self.guild_id) {
            return false;
        }
        inner.calls.push((self.guild_id, TransportCall::Pause));
        true
    }

    fn resume(&mut self) -> bool {
        let mut inner = self.log.inner.lock().unwrap();
        if !inner.active.contains_key(&self.guild_id) || !inner.paused.remove(&self.guild_id) {
            return false;
        }
        inner.calls.push((self.guild_id, TransportCall::Resume));
        true
    }

    fn stop(&mut self) {
        let end = {
            let mut inner = self.log.inner.lock().unwrap();
            inner.calls.push((self.guild_id, TransportCall::Stop));
            inner.paused.remove(&self.guild_id);
            inner.active.remove(&self.guild_id)
        };
        if let Some(end) = end {
            end.finished();
        }
    }

    async fn disconnect(&mut self) {
        self.stop();
        self.log.record(self.guild_id, TransportCall::Disconnect);
        self.channel = None;
    }
}

pub struct FakeTransportFactory {
    log: TransportLog,
    connect_delay: Duration,
    slow_channels: HashMap<ChannelId, Duration>,
}

impl FakeTransportFactory {
    pub fn new(log: TransportLog, connect_delay: Duration) -> Self {
        Self {
            log,
            connect_delay,
            slow_channels: HashMap::new(),
        }
    }

    /// Connecting to `channel` takes `delay` instead of the default
    pub fn slow_channel(mut self, channel: ChannelId, delay: Duration) -> Self {
        self.slow_channels.insert(channel, delay);
        self
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self, guild_id: GuildId) -> Box<dyn VoiceTransport> {
        Box::new(FakeTransport {
            guild_id,
            channel: None,
            log: self.log.clone(),
            connect_delay: self.connect_delay,
            slow_channels: self.slow_channels.clone(),
        })
    }
}

/// How a `FakeResolver` answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Never finishes on its own; honours cancellation
    Hang,
    /// Succeeds after the delay even when cancelled
    IgnoreCancel,
}

/// Scripted provider recording every location it was asked for
pub struct FakeResolver {
    name: &'static str,
    behavior: Behavior,
    delay: Duration,
    failing_ids: HashSet<String>,
    attempts: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<Mutex<usize>>,
}

impl FakeResolver {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            behavior: Behavior::Succeed,
            delay: Duration::ZERO,
            failing_ids: HashSet::new(),
            attempts: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(0)),
        }
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Wait this long before answering
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail for this video id whatever the behavior
    pub fn failing(mut self, video_id: &str) -> Self {
        self.failing_ids.insert(video_id.to_string());
        self
    }

    pub fn attempts(&self) -> Arc<Mutex<Vec<String>>> {
        self.attempts.clone()
    }

    pub fn cancellations(&self) -> Arc<Mutex<usize>> {
        self.cancelled.clone()
    }
}

#[async_trait]
impl StreamResolver for FakeResolver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt(
        &self,
        location: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<AudioStream, ResolveError> {
        self.attempts.lock().unwrap().push(location.to_string());

        if self.behavior == Behavior::IgnoreCancel {
            tokio::time::sleep(self.delay).await;
            return Ok(AudioStream::new(
                StreamFormat::WebmOpus,
                self.name,
                Cursor::new(b"\x1a\x45\xdf\xa3A_OPUS".to_vec()),
            ));
        }

        let wait = async {
            if self.behavior == Behavior::Hang {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(self.delay).await;
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                *self.cancelled.lock().unwrap() += 1;
                return Err(ResolveError::Cancelled);
            }
            _ = wait => {}
        }

        let failing = video_id(location).is_some_and(|id| self.failing_ids.contains(&id));
        if self.behavior == Behavior::Fail || failing {
            return Err(ResolveError::Probe(format!("{} cannot stream {}", self.name, location)));
        }

        Ok(AudioStream::new(
            StreamFormat::WebmOpus,
            self.name,
            Cursor::new(b"\x1a\x45\xdf\xa3A_OPUS".to_vec()),
        ))
    }
}

/// Catalog with a fixed result list
#[derive(Default)]
pub struct FakeCatalog {
    results: Vec<Track>,
    queries: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn with_results(results: Vec<Track>) -> Self {
        Self {
            results,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn search(&self, query: &str, filter: SourceFilter, limit: usize) -> Result<Vec<Track>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self
            .results
            .iter()
            .filter(|track| filter.allows(track.source))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn resolve_playable(&self, mut track: Track) -> Result<Track> {
        if track.playback_location().is_some() {
            return Ok(track);
        }
        if track.source == TrackSource::YouTube {
            if let Some(id) = video_id(&track.canonical_url) {
                track.set_playback_location(watch_url(&id));
                return Ok(track);
            }
        }

        let surrogate = self
            .search(track.lookup_query(), SourceFilter::YouTube, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Catalog(format!("no match for {:?}", track.title)))?;
        track.set_playback_location(surrogate.canonical_url);
        Ok(track)
    }
}
