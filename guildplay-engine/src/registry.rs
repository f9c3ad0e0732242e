//! Session registry
//!
//! Maps guilds to their live session. Creation happens under the registry
//! lock, so concurrent lookups for an unseen guild yield a single session.
//! Entries are removed only by the session itself, through the eviction
//! callback it receives at spawn time.

use crate::providers::ProviderChain;
use crate::session::{self, SessionHandle, SessionSettings};
use crate::transport::TransportFactory;
use guildplay_common::{EventBus, GuildId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

struct RegistryInner {
    sessions: Mutex<HashMap<GuildId, SessionHandle>>,
    factory: Arc<dyn TransportFactory>,
    chain: Arc<ProviderChain>,
    settings: SessionSettings,
    events: EventBus,
}

impl RegistryInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<GuildId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evict the entry for `guild_id` if it still belongs to session `id`
    fn remove(&self, guild_id: GuildId, id: Uuid) {
        let mut sessions = self.sessions();
        if sessions.get(&guild_id).map(SessionHandle::id) == Some(id) {
            sessions.remove(&guild_id);
            debug!(guild = %guild_id, session = %id, "Session removed from registry");
        }
    }
}

/// Shared registry of per-guild sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        chain: Arc<ProviderChain>,
        settings: SessionSettings,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                factory,
                chain,
                settings,
                events,
            }),
        }
    }

    /// Live session for `guild_id`, creating one if needed
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_or_create(&self, guild_id: GuildId) -> SessionHandle {
        let mut sessions = self.inner.sessions();
        if let Some(handle) = sessions.get(&guild_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let registry = Arc::downgrade(&self.inner);
        let handle = session::spawn(
            guild_id,
            self.inner.factory.create(guild_id),
            self.inner.chain.clone(),
            self.inner.settings,
            self.inner.events.clone(),
            move |id| {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(guild_id, id);
                }
            },
        );
        info!(guild = %guild_id, session = %handle.id(), "Created playback session");
        sessions.insert(guild_id, handle.clone());
        handle
    }

    /// Live session for `guild_id`, if any
    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.inner
            .sessions()
            .get(&guild_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions().is_empty()
    }

    /// Guilds with a registered session
    pub fn guilds(&self) -> Vec<GuildId> {
        let mut guilds: Vec<GuildId> = self.inner.sessions().keys().copied().collect();
        guilds.sort();
        guilds
    }

    /// Destroy every session
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.inner.sessions().values().cloned().collect();
        info!("Shutting down {} sessions", handles.len());

        futures::future::join_all(handles.iter().map(|handle| handle.destroy())).await;

        // Sessions whose task already ended never ran their callback
        self.inner.sessions().retain(|_, handle| !handle.is_closed());
    }
}
