//! External extractor subprocess provider
//!
//! Spawns the extractor (yt-dlp) with the audio written to stdout, gives it a
//! short grace period to start producing output, then probes the framing.
//! The child is owned by the resulting `AudioStream`; on any failure or
//! cancellation it is killed and reaped before returning.

use super::probe::{probe, ProbeSettings};
use super::{AudioStream, ResolveError, StreamResolver};
use async_trait::async_trait;
use guildplay_common::config::ExtractorConfig;
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PROVIDER_NAME: &str = "extractor";

pub struct ExtractorProcess {
    config: ExtractorConfig,
    probe: ProbeSettings,
}

impl ExtractorProcess {
    pub fn new(config: ExtractorConfig) -> Self {
        let probe = ProbeSettings::from(&config);
        Self { config, probe }
    }

    fn command(&self, location: &str) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .arg(location)
            .args(["-o", "-", "-f", self.config.format.as_str()])
            .args(["--no-playlist", "--quiet", "--no-warnings"]);
        if let Some(cookies) = &self.config.cookies_file {
            command.arg("--cookies").arg(cookies);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl StreamResolver for ExtractorProcess {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn attempt(
        &self,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioStream, ResolveError> {
        let mut child = self
            .command(location)
            .spawn()
            .map_err(|source| ResolveError::Spawn {
                binary: self.config.binary.display().to_string(),
                source,
            })?;
        debug!(pid = ?child.id(), "Spawned {}", self.config.binary.display());

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        let Some(stdout) = child.stdout.take() else {
            reap(child).await;
            return Err(ResolveError::Probe("extractor stdout not captured".to_string()));
        };

        let grace = self.config.grace();
        let settings = self.probe;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            result = async move {
                tokio::time::sleep(grace).await;
                probe(stdout, settings).await
            } => result,
        };

        match outcome {
            Ok((format, reader)) => Ok(AudioStream::new(format, PROVIDER_NAME, reader).with_child(child)),
            Err(e) => {
                reap(child).await;
                Err(e)
            }
        }
    }
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("yt-dlp stderr: {}", line);
    }
}

/// Kill `child` if it is still running and wait for it to exit
pub(crate) async fn reap(mut child: Child) {
    match child.try_wait() {
        Ok(Some(status)) => debug!("Extractor exited with {}", status),
        Ok(None) => match child.kill().await {
            Ok(()) => debug!("Extractor killed"),
            Err(e) => warn!("Failed to kill extractor: {}", e),
        },
        Err(e) => warn!("Failed to query extractor status: {}", e),
    }
}

/// Child handle that kills and reaps the process in the background when
/// dropped before it exited
struct ReapOnDrop(Option<Child>);

impl ReapOnDrop {
    async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        let Some(child) = self.0.as_mut() else {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "child already reaped"));
        };
        let status = child.wait().await?;
        self.0 = None;
        Ok(status)
    }
}

impl Drop for ReapOnDrop {
    fn drop(&mut self) {
        let Some(child) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(reap(child));
            }
            // kill_on_drop still fires when the child itself is dropped
            Err(_) => debug!("No runtime to reap abandoned child"),
        }
    }
}

/// Run `command` to completion, capturing stdout and stderr
///
/// Dropping the future (a cancelled resolution) kills the child and waits on
/// it instead of leaving it to `kill_on_drop`.
pub(crate) async fn capture_output(command: &mut Command) -> std::io::Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut guard = ReapOnDrop(Some(child));

    let (mut out, mut err) = (Vec::new(), Vec::new());
    let read_out = async {
        match stdout {
            Some(mut pipe) => pipe.read_to_end(&mut out).await,
            None => Ok(0),
        }
    };
    let read_err = async {
        match stderr {
            Some(mut pipe) => pipe.read_to_end(&mut err).await,
            None => Ok(0),
        }
    };
    let (_, _, status) = tokio::try_join!(read_out, read_err, guard.wait())?;

    Ok(Output {
        status,
        stdout: out,
        stderr: err,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::providers::StreamFormat;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    /// The script path is passed as the location so `/bin/sh` runs it
    fn sh_config() -> ExtractorConfig {
        ExtractorConfig {
            binary: PathBuf::from("/bin/sh"),
            grace_ms: 10,
            probe_bytes: 64,
            probe_timeout_ms: 2_000,
            ..ExtractorConfig::default()
        }
    }

    fn script(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("extractor.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_command_arguments() {
        let config = ExtractorConfig {
            cookies_file: Some(PathBuf::from("/tmp/cookies.txt")),
            ..ExtractorConfig::default()
        };
        let extractor = ExtractorProcess::new(config);
        let command = extractor.command("https://youtu.be/dQw4w9WgXcQ");
        let std_command = command.as_std();

        assert_eq!(std_command.get_program(), "yt-dlp");
        let args: Vec<_> = std_command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[0], "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(&args[1..5], ["-o", "-", "-f", "bestaudio[ext=webm][acodec=opus]/bestaudio/best"]);
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(args[args.len() - 2..], ["--cookies", "/tmp/cookies.txt"]);
    }

    #[tokio::test]
    async fn test_attempt_streams_opus_output() {
        let dir = TempDir::new().unwrap();
        let location = script(&dir, "printf 'OggSxxxxxxxxOpusHead'\nhead -c 4096 /dev/zero\nsleep 30");
        let extractor = ExtractorProcess::new(sh_config());

        let mut stream = extractor
            .attempt(&location, &CancellationToken::new())
            .await
            .expect("extractor stream");
        assert_eq!(stream.format(), StreamFormat::OggOpus);
        assert_eq!(stream.provider(), "extractor");

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"OggS");

        // The child is still sleeping; close must kill and reap it
        tokio::time::timeout(Duration::from_secs(5), stream.close())
            .await
            .expect("close should not hang");
    }

    #[tokio::test]
    async fn test_attempt_fails_on_empty_output() {
        let dir = TempDir::new().unwrap();
        let location = script(&dir, "echo 'ERROR: video unavailable' >&2\nexit 1");
        let extractor = ExtractorProcess::new(sh_config());

        let result = extractor.attempt(&location, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ResolveError::Probe(_))));
    }

    #[tokio::test]
    async fn test_attempt_missing_binary() {
        let config = ExtractorConfig {
            binary: Path::new("/nonexistent/yt-dlp").to_path_buf(),
            ..sh_config()
        };
        let extractor = ExtractorProcess::new(config);

        let result = extractor
            .attempt("https://youtu.be/dQw4w9WgXcQ", &CancellationToken::new())
            .await;
        match result {
            Err(ResolveError::Spawn { binary, .. }) => assert_eq!(binary, "/nonexistent/yt-dlp"),
            other => panic!("Expected spawn error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attempt_cancelled_while_silent() {
        let dir = TempDir::new().unwrap();
        let location = script(&dir, "sleep 30");
        let extractor = ExtractorProcess::new(ExtractorConfig {
            probe_timeout_ms: 30_000,
            ..sh_config()
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), extractor.attempt(&location, &cancel))
            .await
            .expect("cancellation should end the attempt promptly");
        assert!(matches!(result, Err(ResolveError::Cancelled)));
    }

    #[tokio::test]
    async fn test_capture_output_collects_both_pipes() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "echo media-url; echo warning >&2"]);

        let output = capture_output(&mut command).await.unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "media-url\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "warning\n");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_capture_output_reaps_abandoned_child() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(format!("echo $$ > {}; exec sleep 30", pid_file.display()));

        let abandoned = tokio::time::timeout(Duration::from_millis(300), capture_output(&mut command)).await;
        assert!(abandoned.is_err(), "sleep 30 cannot finish in time");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_entry = PathBuf::from(format!("/proc/{}", pid.trim()));
        // A killed but unreaped child keeps its /proc entry as a zombie
        tokio::time::timeout(Duration::from_secs(5), async {
            while proc_entry.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("abandoned child should be killed and reaped");
    }
}
