//! Line-oriented console front end
//!
//! Reads one command per line and drives the engine:
//!
//! ```text
//! play <guild> <channel> <url or search query>
//! pause|resume|skip|stop|clear|queue <guild>
//! quit
//! ```

use crate::engine::PlaybackEngine;
use crate::error::{Error, Result};
use crate::providers::is_playable_video;
use guildplay_common::{ChannelId, GuildId, SourceFilter, Track, TrackSource, VoiceChannel};
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

const REQUESTER: &str = "console";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Play { channel: VoiceChannel, query: String },
    Pause(GuildId),
    Resume(GuildId),
    Skip(GuildId),
    Stop(GuildId),
    Clear(GuildId),
    Queue(GuildId),
    Quit,
}

fn parse_guild(arg: Option<&str>) -> Result<GuildId> {
    let arg = arg.ok_or_else(|| Error::InvalidInput("missing guild id".to_string()))?;
    Ok(GuildId::from_str(arg)?)
}

impl FromStr for ConsoleCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| Error::InvalidInput("empty command".to_string()))?
            .to_ascii_lowercase();

        match verb.as_str() {
            "play" => {
                let guild_id = parse_guild(parts.next())?;
                let channel_arg = parts
                    .next()
                    .ok_or_else(|| Error::InvalidInput("missing channel id".to_string()))?;
                let channel_id = ChannelId::from_str(channel_arg)?;
                let query = parts.collect::<Vec<_>>().join(" ");
                if query.is_empty() {
                    return Err(Error::InvalidInput("missing url or query".to_string()));
                }
                Ok(ConsoleCommand::Play {
                    channel: VoiceChannel::new(guild_id, channel_id),
                    query,
                })
            }
            "pause" => Ok(ConsoleCommand::Pause(parse_guild(parts.next())?)),
            "resume" => Ok(ConsoleCommand::Resume(parse_guild(parts.next())?)),
            "skip" => Ok(ConsoleCommand::Skip(parse_guild(parts.next())?)),
            "stop" => Ok(ConsoleCommand::Stop(parse_guild(parts.next())?)),
            "clear" => Ok(ConsoleCommand::Clear(parse_guild(parts.next())?)),
            "queue" => Ok(ConsoleCommand::Queue(parse_guild(parts.next())?)),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            other => Err(Error::InvalidInput(format!("unknown command: {}", other))),
        }
    }
}

/// Execute one command, returning the reply line
pub async fn execute(engine: &PlaybackEngine, command: ConsoleCommand) -> Result<String> {
    match command {
        ConsoleCommand::Play { channel, query } => {
            if is_playable_video(&query) {
                let track = Track::new(query.clone(), query, TrackSource::YouTube)
                    .with_requested_by(REQUESTER);
                let title = track.title.clone();
                engine.play(channel, track).await?;
                Ok(format!("queued {}", title))
            } else {
                let track = engine
                    .play_query(channel, &query, SourceFilter::Auto, Some(REQUESTER))
                    .await?;
                Ok(format!("queued {} ({})", track.title, track.canonical_url))
            }
        }
        ConsoleCommand::Pause(guild_id) => Ok(if engine.pause(guild_id).await? {
            "paused".to_string()
        } else {
            "nothing is playing".to_string()
        }),
        ConsoleCommand::Resume(guild_id) => Ok(if engine.resume(guild_id).await? {
            "resumed".to_string()
        } else {
            "nothing is paused".to_string()
        }),
        ConsoleCommand::Skip(guild_id) => {
            engine.skip(guild_id).await?;
            Ok("skipped".to_string())
        }
        ConsoleCommand::Stop(guild_id) => {
            engine.stop(guild_id).await?;
            Ok("stopped".to_string())
        }
        ConsoleCommand::Clear(guild_id) => {
            let removed = engine.clear(guild_id).await?;
            Ok(format!("removed {} tracks", removed))
        }
        ConsoleCommand::Queue(guild_id) => {
            let snapshot = engine.get_state(guild_id).await?;
            serde_json::to_string(&snapshot)
                .map_err(|e| Error::Common(guildplay_common::Error::Internal(e.to_string())))
        }
        ConsoleCommand::Quit => Ok("bye".to_string()),
    }
}

/// Read commands from `input` until `quit` or end of input
pub async fn run<R, W>(engine: &PlaybackEngine, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let (reply, quit) = match line.parse::<ConsoleCommand>() {
            Ok(command) => {
                let quit = command == ConsoleCommand::Quit;
                match execute(engine, command).await {
                    Ok(reply) => (reply, quit),
                    Err(e) => {
                        warn!("Command {:?} failed: {}", line.trim(), e);
                        (format!("error: {}", e), quit)
                    }
                }
            }
            Err(e) => (format!("error: {}", e), false),
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;

        if quit {
            break;
        }
    }
    Ok(())
}
