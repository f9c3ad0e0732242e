//! HTTP-backed streaming library
//!
//! Asks the extractor for a direct media URL (`-g`) and streams the response
//! body with reqwest. Implements both the streaming library contract (used by
//! the primary and secondary providers) and the catalog client contract.

use super::extractor::capture_output;
use super::library::{CatalogClient, Quality, StreamHandle, StreamLibrary};
use super::location::watch_url;
use super::probe::StreamFormat;
use super::ResolveError;
use async_trait::async_trait;
use futures::TryStreamExt;
use guildplay_common::config::ExtractorConfig;
use reqwest::header::CONTENT_TYPE;
use tokio::process::Command;
use tokio_util::io::StreamReader;
use tracing::debug;

const DEFAULT_FORMAT: &str = "bestaudio[acodec=opus]/bestaudio";
const HIGHEST_AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio/best";
const CATALOG_FORMAT: &str = "bestaudio";

fn format_selector(quality: Quality) -> &'static str {
    match quality {
        Quality::Default => DEFAULT_FORMAT,
        Quality::HighestAudio => HIGHEST_AUDIO_FORMAT,
    }
}

/// Format a response declares, trusted only when it pins down Opus
fn declared_format(content_type: &str) -> Option<StreamFormat> {
    let lowered = content_type.to_ascii_lowercase();
    match StreamFormat::from_mime(&lowered)? {
        StreamFormat::Webm if lowered.contains("opus") => Some(StreamFormat::WebmOpus),
        StreamFormat::Ogg if lowered.contains("opus") => Some(StreamFormat::OggOpus),
        StreamFormat::OggOpus => Some(StreamFormat::OggOpus),
        _ => None,
    }
}

pub struct HttpLibrary {
    client: reqwest::Client,
    config: ExtractorConfig,
}

impl HttpLibrary {
    pub fn new(config: ExtractorConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: ExtractorConfig) -> Self {
        Self { client, config }
    }

    async fn direct_url(&self, location: &str, format: &str) -> Result<String, ResolveError> {
        let mut command = Command::new(&self.config.binary);
        command
            .arg(location)
            .args(["-g", "-f", format, "--no-playlist", "--no-warnings"]);
        if let Some(cookies) = &self.config.cookies_file {
            command.arg("--cookies").arg(cookies);
        }

        let output = capture_output(&mut command).await.map_err(|source| ResolveError::Spawn {
            binary: self.config.binary.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(ResolveError::Library(format!(
                "{} exited with {}: {}",
                self.config.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::Library("extractor returned no media URL".to_string()))
    }

    async fn stream_url(&self, url: &str) -> Result<StreamHandle, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ResolveError::Library(e.to_string()))?;

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(declared_format);
        debug!(status = %response.status(), ?declared, "Media response received");

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let handle = StreamHandle::new(StreamReader::new(body));
        Ok(match declared {
            Some(format) => handle.with_format(format),
            None => handle,
        })
    }
}

#[async_trait]
impl StreamLibrary for HttpLibrary {
    async fn open(&self, location: &str, quality: Quality) -> Result<StreamHandle, ResolveError> {
        let url = self.direct_url(location, format_selector(quality)).await?;
        self.stream_url(&url).await
    }
}

#[async_trait]
impl CatalogClient for HttpLibrary {
    async fn audio_stream(&self, video_id: &str) -> Result<StreamHandle, ResolveError> {
        let url = self.direct_url(&watch_url(video_id), CATALOG_FORMAT).await?;
        self.stream_url(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_selector() {
        assert_eq!(format_selector(Quality::Default), DEFAULT_FORMAT);
        assert_eq!(format_selector(Quality::HighestAudio), HIGHEST_AUDIO_FORMAT);
    }

    #[test]
    fn test_declared_format() {
        assert_eq!(declared_format("audio/webm; codecs=\"opus\""), Some(StreamFormat::WebmOpus));
        assert_eq!(declared_format("audio/ogg; codecs=opus"), Some(StreamFormat::OggOpus));
        assert_eq!(declared_format("audio/opus"), Some(StreamFormat::OggOpus));
        assert_eq!(declared_format("audio/webm"), None);
        assert_eq!(declared_format("audio/mp4; codecs=\"mp4a.40.2\""), None);
        assert_eq!(declared_format("text/plain"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_extractor_is_library_error() {
        let library = HttpLibrary::new(ExtractorConfig {
            binary: PathBuf::from("/bin/false"),
            ..ExtractorConfig::default()
        });

        let result = library
            .open("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Quality::Default)
            .await;
        assert!(matches!(result, Err(ResolveError::Library(_))));
    }

    #[tokio::test]
    async fn test_missing_extractor_is_spawn_error() {
        let library = HttpLibrary::new(ExtractorConfig {
            binary: PathBuf::from("/nonexistent/yt-dlp"),
            ..ExtractorConfig::default()
        });

        let result = library.audio_stream("dQw4w9WgXcQ").await;
        assert!(matches!(result, Err(ResolveError::Spawn { .. })));
    }
}
