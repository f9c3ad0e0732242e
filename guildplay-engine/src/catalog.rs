//! Catalog collaborator contract
//!
//! The catalog answers metadata searches and maps a track to a playable
//! location. The engine only depends on the result contract; the binary uses
//! `ExtractorCatalog`, which runs flat searches through the extractor.

use crate::error::{Error, Result};
use crate::providers::{capture_output, video_id, watch_url};
use async_trait::async_trait;
use guildplay_common::config::ExtractorConfig;
use guildplay_common::{SourceFilter, Track, TrackSource};
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Search for up to `limit` tracks matching `query`
    async fn search(&self, query: &str, filter: SourceFilter, limit: usize) -> Result<Vec<Track>>;

    /// Return `track` with its playback location set
    async fn resolve_playable(&self, track: Track) -> Result<Track>;
}

const PRINT_TEMPLATE: &str = "%(id)s\t%(title)s\t%(duration)s";

/// Parse one line of `--print` output into a track
fn parse_search_line(line: &str) -> Option<Track> {
    let mut fields = line.trim_end_matches(['\r', '\n']).splitn(3, '\t');
    let id = fields.next()?.trim();
    let title = fields.next()?.trim();
    let duration = fields
        .next()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d.round() as u64);

    let url = watch_url(id);
    video_id(&url)?;

    let title = if title.is_empty() || title == "NA" { id } else { title };
    let track = Track::new(title, url, TrackSource::YouTube);
    Some(match duration {
        Some(seconds) => track.with_duration(seconds),
        None => track,
    })
}

/// Catalog backed by extractor flat searches
pub struct ExtractorCatalog {
    config: ExtractorConfig,
}

impl ExtractorCatalog {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Catalog for ExtractorCatalog {
    async fn search(&self, query: &str, filter: SourceFilter, limit: usize) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() || !filter.allows(TrackSource::YouTube) {
            return Ok(Vec::new());
        }

        let limit = limit.max(1);
        let mut command = Command::new(&self.config.binary);
        command
            .arg(format!("ytsearch{}:{}", limit, query))
            .args(["--flat-playlist", "--no-warnings", "--print", PRINT_TEMPLATE]);
        if let Some(cookies) = &self.config.cookies_file {
            command.arg("--cookies").arg(cookies);
        }

        let output = capture_output(&mut command).await.map_err(|e| {
            Error::Catalog(format!("failed to run {}: {}", self.config.binary.display(), e))
        })?;
        if !output.status.success() {
            return Err(Error::Catalog(format!(
                "search for {:?} failed ({}): {}",
                query,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let tracks: Vec<Track> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_search_line)
            .take(limit)
            .collect();
        debug!("Search for {:?} returned {} tracks", query, tracks.len());
        Ok(tracks)
    }

    async fn resolve_playable(&self, mut track: Track) -> Result<Track> {
        if track.playback_location().is_some() {
            return Ok(track);
        }

        if track.source.is_streamable() {
            if let Some(id) = video_id(&track.canonical_url) {
                track.set_playback_location(watch_url(&id));
                return Ok(track);
            }
        }

        let results = self
            .search(track.lookup_query(), SourceFilter::YouTube, 1)
            .await?;
        let id = results
            .iter()
            .find_map(|result| video_id(&result.canonical_url))
            .ok_or_else(|| Error::NoPlayableLocation(track.title.clone()))?;
        track.set_playback_location(watch_url(&id));
        Ok(track)
    }
}
