//! Playback location validation and recovery

use super::ResolveError;
use crate::catalog::Catalog;
use guildplay_common::{SourceFilter, Track};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const VIDEO_ID_LEN: usize = 11;
const RECOVERY_SEARCH_LIMIT: usize = 5;

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == VIDEO_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the video id from a YouTube location
///
/// Accepts `watch?v=`, `youtu.be/<id>`, `/shorts/<id>`, `/embed/<id>` and
/// `/live/<id>` forms on the www, mobile and music hosts.
pub fn video_id(location: &str) -> Option<String> {
    let url = Url::parse(location.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    let host = host.strip_prefix("m.").unwrap_or(host);

    let candidate = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("shorts") | Some("embed") | Some("live") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

/// Whether `location` references a single playable video
pub fn is_playable_video(location: &str) -> bool {
    video_id(location).is_some()
}

/// Canonical watch URL for a video id
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Turns a queued track into a location the stream providers accept
pub struct LocationResolver {
    catalog: Arc<dyn Catalog>,
}

impl LocationResolver {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Map a catalog-only track to a streamable surrogate
    ///
    /// The mapped location is cached on the track. Tracks that already carry
    /// a playback location, or come from a streamable source, are left as-is.
    pub async fn prepare(&self, track: &mut Track) -> Result<(), ResolveError> {
        if track.playback_location().is_some() || track.source.is_streamable() {
            return Ok(());
        }

        let location = match self.catalog.resolve_playable(track.clone()).await {
            Ok(resolved) => resolved.playback_location().map(str::to_string),
            Err(e) => {
                warn!("Catalog could not map {:?}: {}", track.title, e);
                None
            }
        };

        let location = match location {
            Some(location) => location,
            None => self
                .first_playable(track.lookup_query())
                .await?
                .ok_or_else(|| ResolveError::NoPlayableLocation(track.title.clone()))?,
        };

        info!(
            "Mapped {} track {:?} to {}",
            track.source, track.title, location
        );
        track.set_playback_location(location);
        Ok(())
    }

    /// Validate the track's location, recovering through a catalog search
    ///
    /// Returns the canonical watch URL of the video to stream.
    pub async fn validate(&self, track: &Track) -> Result<String, ResolveError> {
        let location = track.location();
        if let Some(id) = video_id(location) {
            return Ok(watch_url(&id));
        }

        warn!(
            "Invalid video location {:?}, searching for {:?}",
            location,
            track.lookup_query()
        );

        match self.first_playable(track.lookup_query()).await? {
            Some(recovered) => {
                info!("Recovered {:?} as {}", track.title, recovered);
                Ok(recovered)
            }
            None if location.is_empty() => {
                Err(ResolveError::NoPlayableLocation(track.title.clone()))
            }
            None => Err(ResolveError::UnsupportedLocation(location.to_string())),
        }
    }

    async fn first_playable(&self, query: &str) -> Result<Option<String>, ResolveError> {
        if query.trim().is_empty() {
            return Ok(None);
        }

        let results = self
            .catalog
            .search(query, SourceFilter::YouTube, RECOVERY_SEARCH_LIMIT)
            .await
            .map_err(|e| ResolveError::Catalog(e.to_string()))?;

        debug!("Recovery search for {:?} returned {} results", query, results.len());
        Ok(results
            .iter()
            .find_map(|result| video_id(result.location()))
            .map(|id| watch_url(&id)))
    }
}
