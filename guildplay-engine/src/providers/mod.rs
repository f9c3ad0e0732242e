//! Stream resolution - the provider chain
//!
//! **Responsibilities:**
//! - Map catalog-only tracks to a streamable surrogate (cached on the track)
//! - Validate the location and recover a playable one through the catalog
//! - Try each `StreamResolver` in order until one produces a live stream
//!
//! **Module Structure:**
//! - `probe.rs`: container sniffing of the first bytes of a stream
//! - `location.rs`: video reference parsing, cross-source mapping, recovery search
//! - `extractor.rs`: external extractor subprocess
//! - `library.rs`: in-process streaming library and catalog client adapters
//! - `http.rs`: reqwest-backed implementation of the library contracts

mod extractor;
mod http;
mod library;
mod location;
mod probe;

pub use extractor::ExtractorProcess;
pub(crate) use extractor::capture_output;
pub use http::HttpLibrary;
pub use library::{
    CatalogClient, CatalogClientResolver, LibraryResolver, Quality, StreamHandle, StreamLibrary,
};
pub use location::{is_playable_video, video_id, watch_url, LocationResolver};
pub use probe::{probe, sniff, ProbeSettings, StreamFormat};

use crate::catalog::Catalog;
use async_trait::async_trait;
use guildplay_common::config::{ProviderKind, TomlConfig};
use guildplay_common::Track;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failure of one resolution step
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Extractor process could not be started
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// Stream produced no usable data
    #[error("Probe failed: {0}")]
    Probe(String),

    /// In-process streaming library failure
    #[error("Streaming library error: {0}")]
    Library(String),

    /// Catalog lookup failure
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Location is not a reference this provider can stream
    #[error("Unsupported location: {0}")]
    UnsupportedLocation(String),

    /// Every provider (or every recovery attempt) failed
    #[error("No playable location for {0}")]
    NoPlayableLocation(String),

    /// The session abandoned this resolution
    #[error("Resolution cancelled")]
    Cancelled,

    /// Stream I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live, probed audio byte stream ready for the transport
///
/// When the stream is backed by a subprocess the child is owned here and is
/// killed and reaped by [`AudioStream::close`] (or killed on drop).
pub struct AudioStream {
    format: StreamFormat,
    provider: &'static str,
    reader: Pin<Box<dyn AsyncRead + Send>>,
    child: Option<Child>,
}

impl AudioStream {
    pub fn new(
        format: StreamFormat,
        provider: &'static str,
        reader: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self {
            format,
            provider,
            reader: Box::pin(reader),
            child: None,
        }
    }

    pub(crate) fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Container/codec detected for the stream
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Name of the provider that produced the stream
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Release the stream, killing and reaping any backing subprocess
    pub async fn close(mut self) {
        if let Some(child) = self.child.take() {
            extractor::reap(child).await;
        }
    }
}

impl AsyncRead for AudioStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream")
            .field("format", &self.format)
            .field("provider", &self.provider)
            .field("subprocess", &self.child.as_ref().and_then(|c| c.id()))
            .finish()
    }
}

/// One strategy for turning a validated location into a live stream
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Short name used in logs and events
    fn name(&self) -> &'static str;

    /// Try to open a stream for `location`
    ///
    /// Implementations must return promptly with `ResolveError::Cancelled`
    /// once `cancel` fires, releasing anything they started.
    async fn attempt(
        &self,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioStream, ResolveError>;
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ResolveError>
where
    F: Future<Output = Result<T, ResolveError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        result = fut => result,
    }
}

/// Ordered provider chain; the first provider to produce a stream wins
pub struct ProviderChain {
    locations: LocationResolver,
    resolvers: Vec<Box<dyn StreamResolver>>,
}

impl ProviderChain {
    pub fn new(locations: LocationResolver, resolvers: Vec<Box<dyn StreamResolver>>) -> Self {
        Self {
            locations,
            resolvers,
        }
    }

    /// Provider names in attempt order
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Resolve `track` into a live stream
    ///
    /// The track is handed back in every case so a location mapped during
    /// resolution stays cached on it.
    pub async fn resolve(
        &self,
        mut track: Track,
        cancel: &CancellationToken,
    ) -> (Track, Result<AudioStream, ResolveError>) {
        if let Err(e) = cancellable(cancel, self.locations.prepare(&mut track)).await {
            return (track, Err(e));
        }

        let location = match cancellable(cancel, self.locations.validate(&track)).await {
            Ok(location) => location,
            Err(e) => return (track, Err(e)),
        };

        info!("Starting playback for {:?} ({})", track.title, location);

        for resolver in &self.resolvers {
            if cancel.is_cancelled() {
                return (track, Err(ResolveError::Cancelled));
            }

            debug!("Attempting {} stream", resolver.name());
            match resolver.attempt(&location, cancel).await {
                Ok(stream) => {
                    info!(
                        "Playing via {} (format: {})",
                        resolver.name(),
                        stream.format()
                    );
                    return (track, Ok(stream));
                }
                Err(ResolveError::Cancelled) => return (track, Err(ResolveError::Cancelled)),
                Err(e) => warn!("{} stream failed: {}", resolver.name(), e),
            }
        }

        error!("All playback fallbacks failed for {:?}", track.title);
        let title = track.title.clone();
        (track, Err(ResolveError::NoPlayableLocation(title)))
    }
}

/// Build the provider chain described by `config.providers.order`
///
/// `library` backs both the primary and secondary providers (with different
/// quality negotiation); `client` backs the catalog provider.
pub fn build_chain(
    config: &TomlConfig,
    catalog: Arc<dyn Catalog>,
    library: Arc<dyn StreamLibrary>,
    client: Arc<dyn CatalogClient>,
) -> ProviderChain {
    let probe = ProbeSettings::from(&config.extractor);
    let resolvers = config
        .providers
        .order
        .iter()
        .map(|kind| -> Box<dyn StreamResolver> {
            match kind {
                ProviderKind::Extractor => Box::new(ExtractorProcess::new(config.extractor.clone())),
                ProviderKind::Primary => Box::new(LibraryResolver::primary(library.clone(), probe)),
                ProviderKind::Secondary => {
                    Box::new(LibraryResolver::secondary(library.clone(), probe))
                }
                ProviderKind::Catalog => Box::new(CatalogClientResolver::new(client.clone(), probe)),
            }
        })
        .collect();

    ProviderChain::new(LocationResolver::new(catalog), resolvers)
}
