//! Test helpers for guildplay-engine integration tests
//!
//! Provides in-memory collaborators:
//! - FakeTransport: records every call and lets the test end streams
//! - FakeResolver: scripted stream provider
//! - FakeCatalog: fixed search results
#![allow(dead_code)]

pub mod fakes;

pub use fakes::{
    Behavior, FakeCatalog, FakeResolver, FakeTransportFactory, TransportCall, TransportLog,
};

use guildplay_common::{ChannelId, EventBus, GuildId, SessionEvent, Track, TrackSource};
use guildplay_engine::catalog::Catalog;
use guildplay_engine::providers::{watch_url, LocationResolver, ProviderChain, StreamResolver};
use guildplay_engine::{PlaybackEngine, QueueSnapshot, SessionHandle, SessionRegistry, SessionSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// An 11-character video id unique to `n`
pub fn video_id(n: u32) -> String {
    format!("track{:06}", n)
}

/// A YouTube track whose location carries `video_id(n)`
pub fn track(n: u32) -> Track {
    Track::new(format!("Track {}", n), watch_url(&video_id(n)), TrackSource::YouTube)
}

pub struct Harness {
    pub engine: PlaybackEngine,
    pub transport: TransportLog,
    pub events: EventBus,
    pub catalog: Arc<FakeCatalog>,
}

impl Harness {
    pub fn registry(&self) -> &SessionRegistry {
        self.engine.registry()
    }

    pub fn session(&self, guild_id: GuildId) -> SessionHandle {
        self.registry().get_or_create(guild_id)
    }
}

pub struct HarnessBuilder {
    resolvers: Vec<Box<dyn StreamResolver>>,
    catalog: FakeCatalog,
    settings: SessionSettings,
    connect_delay: Duration,
    slow_channels: Vec<(ChannelId, Duration)>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
            catalog: FakeCatalog::default(),
            settings: SessionSettings::default(),
            connect_delay: Duration::ZERO,
            slow_channels: Vec::new(),
        }
    }

    pub fn resolver(mut self, resolver: FakeResolver) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn catalog(mut self, catalog: FakeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Only connects to `channel` take `delay`
    pub fn slow_channel(mut self, channel: ChannelId, delay: Duration) -> Self {
        self.slow_channels.push((channel, delay));
        self
    }

    pub fn build(self) -> Harness {
        let resolvers = if self.resolvers.is_empty() {
            vec![Box::new(FakeResolver::new("fake")) as Box<dyn StreamResolver>]
        } else {
            self.resolvers
        };

        let catalog = Arc::new(self.catalog);
        let dyn_catalog: Arc<dyn Catalog> = catalog.clone();
        let chain = Arc::new(ProviderChain::new(LocationResolver::new(dyn_catalog.clone()), resolvers));

        let transport = TransportLog::default();
        let mut factory = FakeTransportFactory::new(transport.clone(), self.connect_delay);
        for (channel, delay) in self.slow_channels {
            factory = factory.slow_channel(channel, delay);
        }
        let events = EventBus::new(1024);
        let registry = SessionRegistry::new(Arc::new(factory), chain, self.settings, events.clone());

        Harness {
            engine: PlaybackEngine::new(registry, dyn_catalog, events.clone()),
            transport,
            events,
            catalog,
        }
    }
}

/// Poll `check` until it returns true, panicking after `WAIT_LIMIT`
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(WAIT_LIMIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "Timed out waiting for {}", what);
}

/// Poll the session until its snapshot satisfies `check`
pub async fn wait_for_snapshot(
    session: &SessionHandle,
    what: &str,
    check: impl Fn(&QueueSnapshot) -> bool,
) -> QueueSnapshot {
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let snapshot = session.snapshot().await.expect("session alive");
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Timed out waiting for {}", what))
}

/// Wait for the next event matching `check`
pub async fn next_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    check: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let event = rx.recv().await.expect("event bus open");
            if check(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event")
}
