//! Stream probing
//!
//! None of the providers declare their output format reliably, so the first
//! bytes of every stream are sniffed to detect the container before the
//! stream reaches the transport. Opus-in-WebM and Opus-in-Ogg are reported
//! separately because the transport can pass them through without
//! transcoding; anything unrecognised is `Arbitrary`.

use super::ResolveError;
use guildplay_common::config::ExtractorConfig;
use std::fmt;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const OGG_MAGIC: &[u8] = b"OggS";
const MATROSKA_OPUS_CODEC: &[u8] = b"A_OPUS";
const OGG_OPUS_HEAD: &[u8] = b"OpusHead";

/// Container (and codec, where it matters) of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    WebmOpus,
    OggOpus,
    Webm,
    Ogg,
    Mp4,
    Mp3,
    Flac,
    Wav,
    Aac,
    /// Unrecognised framing; needs a full decode
    Arbitrary,
}

impl StreamFormat {
    /// Whether the stream carries Opus packets the transport can forward as-is
    pub fn is_opus(self) -> bool {
        matches!(self, StreamFormat::WebmOpus | StreamFormat::OggOpus)
    }

    /// File extension for the container
    pub fn extension(self) -> &'static str {
        match self {
            StreamFormat::WebmOpus | StreamFormat::Webm => "webm",
            StreamFormat::OggOpus => "opus",
            StreamFormat::Ogg => "ogg",
            StreamFormat::Mp4 => "m4a",
            StreamFormat::Mp3 => "mp3",
            StreamFormat::Flac => "flac",
            StreamFormat::Wav => "wav",
            StreamFormat::Aac => "aac",
            StreamFormat::Arbitrary => "bin",
        }
    }

    /// Map a MIME type (parameters ignored) to a container
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "audio/webm" | "video/webm" | "video/x-matroska" | "audio/x-matroska" => {
                Some(StreamFormat::Webm)
            }
            "audio/ogg" | "application/ogg" => Some(StreamFormat::Ogg),
            "audio/opus" => Some(StreamFormat::OggOpus),
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "video/mp4" => Some(StreamFormat::Mp4),
            "audio/mpeg" | "audio/mp3" => Some(StreamFormat::Mp3),
            "audio/flac" | "audio/x-flac" => Some(StreamFormat::Flac),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some(StreamFormat::Wav),
            "audio/aac" | "audio/x-aac" => Some(StreamFormat::Aac),
            _ => None,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamFormat::WebmOpus => "webm/opus",
            StreamFormat::OggOpus => "ogg/opus",
            StreamFormat::Webm => "webm",
            StreamFormat::Ogg => "ogg",
            StreamFormat::Mp4 => "mp4",
            StreamFormat::Mp3 => "mp3",
            StreamFormat::Flac => "flac",
            StreamFormat::Wav => "wav",
            StreamFormat::Aac => "aac",
            StreamFormat::Arbitrary => "arbitrary",
        };
        write!(f, "{}", name)
    }
}

/// Limits applied while probing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Leading bytes collected for sniffing
    pub max_bytes: usize,
    /// Upper bound on waiting for those bytes
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&ExtractorConfig::default())
    }
}

impl From<&ExtractorConfig> for ProbeSettings {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            max_bytes: config.probe_bytes.max(1),
            timeout: config.probe_timeout(),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Detect the container of a stream from its leading bytes
pub fn sniff(prefix: &[u8]) -> StreamFormat {
    if prefix.starts_with(&EBML_MAGIC) {
        return if contains(prefix, MATROSKA_OPUS_CODEC) {
            StreamFormat::WebmOpus
        } else {
            StreamFormat::Webm
        };
    }

    if prefix.starts_with(OGG_MAGIC) {
        return if contains(prefix, OGG_OPUS_HEAD) {
            StreamFormat::OggOpus
        } else {
            StreamFormat::Ogg
        };
    }

    infer::get(prefix)
        .and_then(|kind| StreamFormat::from_mime(kind.mime_type()))
        .unwrap_or(StreamFormat::Arbitrary)
}

/// Read the leading bytes of `reader` and detect its container
///
/// Returns the detected format and a reader that replays the sniffed bytes
/// before the rest of the stream. Fails when the stream closes or stays
/// silent before producing a single byte.
pub async fn probe<R>(
    mut reader: R,
    settings: ProbeSettings,
) -> Result<(StreamFormat, impl AsyncRead + Send + Unpin + 'static), ResolveError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut prefix = vec![0u8; settings.max_bytes.max(1)];
    let mut filled = 0;
    let mut timed_out = false;
    let deadline = Instant::now() + settings.timeout;

    while filled < prefix.len() {
        match timeout_at(deadline, reader.read(&mut prefix[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(ResolveError::Io(e)),
            Err(_) => {
                timed_out = true;
                break;
            }
        }
    }

    if filled == 0 {
        return Err(ResolveError::Probe(if timed_out {
            format!("no audio data within {:?}", settings.timeout)
        } else {
            "stream ended before any audio data".to_string()
        }));
    }

    prefix.truncate(filled);
    let format = sniff(&prefix);
    Ok((format, Cursor::new(prefix).chain(reader)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webm_opus_header() -> Vec<u8> {
        let mut bytes = EBML_MAGIC.to_vec();
        bytes.extend_from_slice(b"\x42\x82\x84webm");
        bytes.extend_from_slice(&[0u8; 32]);
        bytes.extend_from_slice(b"\x86\x86A_OPUS");
        bytes
    }

    fn ogg_opus_header() -> Vec<u8> {
        let mut bytes = b"OggS".to_vec();
        bytes.extend_from_slice(&[0u8; 24]);
        bytes.extend_from_slice(b"OpusHead");
        bytes
    }

    #[test]
    fn test_sniff_opus_containers() {
        assert_eq!(sniff(&webm_opus_header()), StreamFormat::WebmOpus);
        assert_eq!(sniff(&ogg_opus_header()), StreamFormat::OggOpus);

        let mut vorbis = b"OggS".to_vec();
        vorbis.extend_from_slice(&[0u8; 24]);
        vorbis.extend_from_slice(b"\x01vorbis");
        assert_eq!(sniff(&vorbis), StreamFormat::Ogg);

        let mut webm_vorbis = EBML_MAGIC.to_vec();
        webm_vorbis.extend_from_slice(b"A_VORBIS");
        assert_eq!(sniff(&webm_vorbis), StreamFormat::Webm);
    }

    #[test]
    fn test_sniff_other_containers() {
        let mut mp3 = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
        mp3.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff(&mp3), StreamFormat::Mp3);

        let mut flac = b"fLaC".to_vec();
        flac.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff(&flac), StreamFormat::Flac);

        assert_eq!(sniff(b"definitely not audio"), StreamFormat::Arbitrary);
    }

    #[test]
    fn test_from_mime() {
        assert_eq!(StreamFormat::from_mime("audio/webm; codecs=\"opus\""), Some(StreamFormat::Webm));
        assert_eq!(StreamFormat::from_mime("AUDIO/MP4"), Some(StreamFormat::Mp4));
        assert_eq!(StreamFormat::from_mime("text/html"), None);
    }

    #[test]
    fn test_format_properties() {
        assert!(StreamFormat::WebmOpus.is_opus());
        assert!(!StreamFormat::Webm.is_opus());
        assert_eq!(StreamFormat::OggOpus.extension(), "opus");
        assert_eq!(StreamFormat::WebmOpus.to_string(), "webm/opus");
    }

    #[tokio::test]
    async fn test_probe_replays_sniffed_bytes() {
        let mut data = ogg_opus_header();
        data.extend((0..10_000u32).map(|i| (i % 251) as u8));

        let settings = ProbeSettings {
            max_bytes: 64,
            timeout: Duration::from_secs(1),
        };
        let (format, mut reader) = probe(Cursor::new(data.clone()), settings).await.unwrap();
        assert_eq!(format, StreamFormat::OggOpus);

        let mut replayed = Vec::new();
        reader.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, data);
    }

    #[tokio::test]
    async fn test_probe_short_stream() {
        // Fewer bytes than max_bytes: sniff what arrived before EOF
        let (format, _) = probe(Cursor::new(b"fLaC\0\0\0\x22".to_vec()), ProbeSettings::default())
            .await
            .unwrap();
        assert_eq!(format, StreamFormat::Flac);
    }

    #[tokio::test]
    async fn test_probe_empty_stream_fails() {
        let result = probe(Cursor::new(Vec::new()), ProbeSettings::default()).await;
        assert!(matches!(result, Err(ResolveError::Probe(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_silent_stream_times_out() {
        let (_writer, reader) = tokio::io::duplex(64);
        let settings = ProbeSettings {
            max_bytes: 16,
            timeout: Duration::from_secs(5),
        };

        let result = probe(reader, settings).await;
        match result {
            Err(ResolveError::Probe(message)) => assert!(message.contains("no audio data")),
            other => panic!("Expected probe timeout, got {:?}", other.map(|(f, _)| f)),
        }
    }
}
