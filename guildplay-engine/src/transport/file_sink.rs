//! File sink transport
//!
//! Stands in for a voice connection in the console binary: "connecting"
//! prepares the output directory and each stream is copied verbatim to
//! `<out_dir>/<guild>.<ext>`, honouring pause and stop.

use super::{StreamEnd, TransportFactory, VoiceTransport};
use crate::error::{Error, Result};
use crate::providers::AudioStream;
use async_trait::async_trait;
use guildplay_common::{ChannelId, GuildId};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

struct ActivePlayback {
    paused: watch::Sender<bool>,
    stop: CancellationToken,
}

pub struct FileSinkTransport {
    guild_id: GuildId,
    out_dir: PathBuf,
    channel: Option<ChannelId>,
    active: Option<ActivePlayback>,
}

impl FileSinkTransport {
    pub fn new(guild_id: GuildId, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            guild_id,
            out_dir: out_dir.into(),
            channel: None,
            active: None,
        }
    }

    fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.cancel();
        }
    }

    fn is_live(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.stop.is_cancelled() && !active.paused.is_closed())
    }
}

#[async_trait]
impl VoiceTransport for FileSinkTransport {
    async fn connect(&mut self, channel: ChannelId) -> Result<()> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", self.out_dir.display(), e)))?;
        if let Some(previous) = self.channel.replace(channel) {
            info!(guild = %self.guild_id, "Moved from channel {} to {}", previous, channel);
        } else {
            info!(guild = %self.guild_id, "Connected to channel {}", channel);
        }
        Ok(())
    }

    fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    fn play(&mut self, stream: AudioStream, end: StreamEnd) {
        self.stop_active();

        let path = self
            .out_dir
            .join(format!("{}.{}", self.guild_id, stream.format().extension()));
        let (paused_tx, paused_rx) = watch::channel(false);
        let stop = CancellationToken::new();
        self.active = Some(ActivePlayback {
            paused: paused_tx,
            stop: stop.clone(),
        });

        tokio::spawn(async move {
            let mut stream = stream;
            let result = copy_to_file(&mut stream, &path, paused_rx, stop).await;
            stream.close().await;
            match result {
                Ok(bytes) => {
                    debug!("Wrote {} bytes to {}", bytes, path.display());
                    end.finished();
                }
                Err(e) => {
                    warn!("Writing {} failed: {}", path.display(), e);
                    end.failed(e.to_string());
                }
            }
        });
    }

    fn pause(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        self.active
            .as_ref()
            .is_some_and(|active| active.paused.send_if_modified(|paused| !std::mem::replace(paused, true)))
    }

    fn resume(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        self.active
            .as_ref()
            .is_some_and(|active| active.paused.send_if_modified(|paused| std::mem::replace(paused, false)))
    }

    fn stop(&mut self) {
        self.stop_active();
    }

    async fn disconnect(&mut self) {
        self.stop_active();
        if let Some(channel) = self.channel.take() {
            info!(guild = %self.guild_id, "Disconnected from channel {}", channel);
        }
    }
}

/// Copy `stream` into `path` until it ends or `stop` fires
async fn copy_to_file(
    stream: &mut AudioStream,
    path: &Path,
    mut paused: watch::Receiver<bool>,
    stop: CancellationToken,
) -> std::io::Result<u64> {
    let mut file = File::create(path).await?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    loop {
        let is_paused = *paused.borrow_and_update();
        if is_paused {
            tokio::select! {
                _ = stop.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = paused.changed() => continue,
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                file.write_all(&buf[..n]).await?;
                written += n as u64;
            }
        }
    }

    file.flush().await?;
    Ok(written)
}

/// Creates a `FileSinkTransport` per guild under one output directory
pub struct FileSinkFactory {
    out_dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl TransportFactory for FileSinkFactory {
    fn create(&self, guild_id: GuildId) -> Box<dyn VoiceTransport> {
        Box::new(FileSinkTransport::new(guild_id, self.out_dir.clone()))
    }
}
