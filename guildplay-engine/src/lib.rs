//! # Guildplay Playback Engine (guildplay-engine)
//!
//! Per-guild playback sessions over a live audio transport.
//!
//! **Purpose:** Keep one ordered play queue per guild, turn each queued track
//! into a live audio stream through an ordered chain of fallible providers,
//! and drive the playing/paused/idle state machine including idle teardown.
//!
//! **Architecture:** Each session is a single tokio task (actor) that owns its
//! transport connection, queue and idle timer. External intents and transport
//! signals arrive as messages, so state transitions within a session are
//! serialized without a shared lock. The `SessionRegistry` is the only
//! structure shared between sessions.
//!
//! ```text
//! intent → PlaybackEngine → SessionRegistry::get_or_create → SessionHandle → session task
//!                                                                 │
//!                            transport end-of-stream signal ──────┘ → advance → ProviderChain
//! ```

pub mod catalog;
pub mod console;
pub mod engine;
pub mod error;
pub mod providers;
pub mod registry;
pub mod session;
pub mod transport;

pub use engine::PlaybackEngine;
pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use session::{QueueSnapshot, SessionHandle, SessionSettings};
