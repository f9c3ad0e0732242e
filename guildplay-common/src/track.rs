//! Track data model
//!
//! A `Track` is a logical reference to playable content. It is immutable once
//! enqueued, except for the playback location which the resolution step may
//! fill in exactly once.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content source a track was found on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    YouTube,
    Spotify,
}

impl TrackSource {
    /// Whether audio for this source can be streamed directly
    ///
    /// Catalog-only sources need a streamable surrogate before playback.
    pub fn is_streamable(self) -> bool {
        matches!(self, TrackSource::YouTube)
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSource::YouTube => write!(f, "youtube"),
            TrackSource::Spotify => write!(f, "spotify"),
        }
    }
}

/// Source restriction for catalog searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFilter {
    #[default]
    Auto,
    YouTube,
    Spotify,
}

impl SourceFilter {
    /// Whether results from `source` pass this filter
    pub fn allows(self, source: TrackSource) -> bool {
        match self {
            SourceFilter::Auto => true,
            SourceFilter::YouTube => source == TrackSource::YouTube,
            SourceFilter::Spotify => source == TrackSource::Spotify,
        }
    }
}

impl FromStr for SourceFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(SourceFilter::Auto),
            "youtube" | "yt" => Ok(SourceFilter::YouTube),
            "spotify" => Ok(SourceFilter::Spotify),
            other => Err(Error::InvalidInput(format!("unknown source: {}", other))),
        }
    }
}

/// A logical reference to playable content plus its resolved playback location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Display title
    pub title: String,
    /// Location identifying the content on its source
    pub canonical_url: String,
    pub source: TrackSource,
    /// Duration in seconds, when known
    pub duration: Option<u64>,
    /// Query used to find a playable surrogate when `canonical_url` cannot be streamed
    pub search_hint: Option<String>,
    /// Display attribution
    pub requested_by: Option<String>,
    /// Directly streamable location; authoritative once set
    playback_location: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, canonical_url: impl Into<String>, source: TrackSource) -> Self {
        Self {
            title: title.into(),
            canonical_url: canonical_url.into(),
            source,
            duration: None,
            search_hint: None,
            requested_by: None,
            playback_location: None,
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_search_hint(mut self, hint: impl Into<String>) -> Self {
        self.search_hint = Some(hint.into());
        self
    }

    pub fn with_requested_by(mut self, requester: impl Into<String>) -> Self {
        self.requested_by = Some(requester.into());
        self
    }

    pub fn with_playback_location(mut self, location: impl Into<String>) -> Self {
        self.playback_location = Some(location.into());
        self
    }

    /// Resolved streamable location, if resolution has run
    pub fn playback_location(&self) -> Option<&str> {
        self.playback_location.as_deref()
    }

    /// Record the resolved location
    ///
    /// Returns `false` and leaves the track unchanged if a location was already set.
    pub fn set_playback_location(&mut self, location: impl Into<String>) -> bool {
        if self.playback_location.is_some() {
            return false;
        }
        self.playback_location = Some(location.into());
        true
    }

    /// Location to stream from: the resolved location, else the canonical one
    pub fn location(&self) -> &str {
        self.playback_location.as_deref().unwrap_or(&self.canonical_url)
    }

    /// Query used when the track has to be looked up again
    pub fn lookup_query(&self) -> &str {
        self.search_hint.as_deref().unwrap_or(&self.title)
    }
}
