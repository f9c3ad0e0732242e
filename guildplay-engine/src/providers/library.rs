//! In-process streaming library and catalog client providers
//!
//! `StreamLibrary` and `CatalogClient` are the contracts of the in-process
//! stream sources. The primary and secondary providers share one library and
//! differ only in the quality they negotiate; the catalog provider goes
//! through the catalog client by video id.

use super::location::video_id;
use super::probe::{probe, ProbeSettings, StreamFormat};
use super::{cancellable, AudioStream, ResolveError, StreamResolver};
use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Format negotiation requested from a streaming library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Whatever the library considers the best audio-only format
    Default,
    /// Highest-bitrate audio, whatever its container
    HighestAudio,
}

/// Stream opened by a library, with the format it declared (if any)
pub struct StreamHandle {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub declared: Option<StreamFormat>,
}

impl StreamHandle {
    pub fn new(reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            reader: Box::pin(reader),
            declared: None,
        }
    }

    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.declared = Some(format);
        self
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("declared", &self.declared)
            .finish_non_exhaustive()
    }
}

/// In-process streaming library
#[async_trait]
pub trait StreamLibrary: Send + Sync {
    async fn open(&self, location: &str, quality: Quality) -> Result<StreamHandle, ResolveError>;
}

/// Direct catalog client able to stream audio by video id
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn audio_stream(&self, video_id: &str) -> Result<StreamHandle, ResolveError>;
}

async fn into_audio_stream(
    provider: &'static str,
    handle: StreamHandle,
    settings: ProbeSettings,
    cancel: &CancellationToken,
) -> Result<AudioStream, ResolveError> {
    match handle.declared {
        Some(format) => Ok(AudioStream::new(format, provider, handle.reader)),
        None => {
            let (format, reader) = cancellable(cancel, probe(handle.reader, settings)).await?;
            Ok(AudioStream::new(format, provider, reader))
        }
    }
}

/// Provider backed by a `StreamLibrary` at a fixed quality
pub struct LibraryResolver {
    name: &'static str,
    library: Arc<dyn StreamLibrary>,
    quality: Quality,
    probe: ProbeSettings,
}

impl LibraryResolver {
    pub fn primary(library: Arc<dyn StreamLibrary>, probe: ProbeSettings) -> Self {
        Self {
            name: "primary",
            library,
            quality: Quality::Default,
            probe,
        }
    }

    pub fn secondary(library: Arc<dyn StreamLibrary>, probe: ProbeSettings) -> Self {
        Self {
            name: "secondary",
            library,
            quality: Quality::HighestAudio,
            probe,
        }
    }
}

#[async_trait]
impl StreamResolver for LibraryResolver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt(
        &self,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioStream, ResolveError> {
        let handle = cancellable(cancel, self.library.open(location, self.quality)).await?;
        into_audio_stream(self.name, handle, self.probe, cancel).await
    }
}

/// Provider backed by a `CatalogClient`; always probes
pub struct CatalogClientResolver {
    client: Arc<dyn CatalogClient>,
    probe: ProbeSettings,
}

impl CatalogClientResolver {
    pub fn new(client: Arc<dyn CatalogClient>, probe: ProbeSettings) -> Self {
        Self { client, probe }
    }
}

#[async_trait]
impl StreamResolver for CatalogClientResolver {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn attempt(
        &self,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioStream, ResolveError> {
        let id = video_id(location)
            .ok_or_else(|| ResolveError::UnsupportedLocation(location.to_string()))?;
        let mut handle = cancellable(cancel, self.client.audio_stream(&id)).await?;
        handle.declared = None;
        into_audio_stream(self.name(), handle, self.probe, cancel).await
    }
}
