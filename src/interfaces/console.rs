//! Line-oriented console host.
//!
//! Host signals arrive as text commands, one per line, and events leave as
//! JSON lines. This lets a shell script, a supervisor process or a test play
//! the role of the hosting application.

use crate::application::lifecycle::{LifecycleGuard, MemoryTrimLevel};
use crate::application::orchestrator::{OrchestratorHandle, Snapshot};
use crate::domain::events::TerminalEvent;
use crate::domain::ports::EventSink;
use crate::error::Result;
use crate::infrastructure::simulated_reader::SimulatedReader;
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("missing argument for {0}")]
    MissingArgument(&'static str),
    #[error("invalid trim level: {0}")]
    InvalidTrimLevel(String),
}

/// A signal from the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Foreground,
    Background,
    Started,
    Stopped,
    Trim(MemoryTrimLevel),
    Abort(String),
    Start,
    Stop,
    Status,
    /// Drops the simulated reader's connection.
    Disconnect(String),
    /// Runs a simulated auto-reconnect cycle.
    Reconnect { reason: String, succeeds: bool },
    Quit,
}

impl FromStr for HostCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(word, rest)| (word, rest.trim()))
            .unwrap_or((line, ""));
        match word.to_ascii_lowercase().as_str() {
            "foreground" | "resume" => Ok(Self::Foreground),
            "background" | "pause" => Ok(Self::Background),
            "started" => Ok(Self::Started),
            "stopped" => Ok(Self::Stopped),
            "trim" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument("trim"));
                }
                rest.parse::<u32>()
                    .map(|level| Self::Trim(MemoryTrimLevel(level)))
                    .map_err(|_| CommandError::InvalidTrimLevel(rest.to_owned()))
            }
            "abort" => {
                if rest.is_empty() {
                    Err(CommandError::MissingArgument("abort"))
                } else {
                    Ok(Self::Abort(rest.to_owned()))
                }
            }
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "status" => Ok(Self::Status),
            "disconnect" => Ok(Self::Disconnect(reason_or_default(rest))),
            "reconnect" => Ok(Self::Reconnect {
                reason: reason_or_default(rest),
                succeeds: true,
            }),
            "reconnect-fail" => Ok(Self::Reconnect {
                reason: reason_or_default(rest),
                succeeds: false,
            }),
            "quit" | "exit" => Ok(Self::Quit),
            _ => Err(CommandError::Unknown(line.to_owned())),
        }
    }
}

fn reason_or_default(rest: &str) -> String {
    if rest.is_empty() {
        "simulated".to_owned()
    } else {
        rest.to_owned()
    }
}

/// Reads host commands from a line stream, skipping blank lines and `#` comments.
pub struct CommandReader<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> CommandReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
        }
    }

    /// Next command, or `None` at end of input. Read errors end the input.
    pub async fn next(&mut self) -> Option<std::result::Result<HostCommand, CommandError>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "failed to read host command");
                    return None;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(trimmed.parse());
        }
    }
}

/// What the console loop should do after a command was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum HostReply {
    Continue,
    Status(Snapshot),
    Quit,
}

/// Routes host commands to the orchestrator and its lifecycle guard.
pub struct ConsoleHost {
    orchestrator: OrchestratorHandle,
    lifecycle: LifecycleGuard,
    simulator: Option<Arc<SimulatedReader>>,
}

impl ConsoleHost {
    pub fn new(orchestrator: OrchestratorHandle, lifecycle: LifecycleGuard) -> Self {
        Self {
            orchestrator,
            lifecycle,
            simulator: None,
        }
    }

    /// Enables the `disconnect` and `reconnect` commands against this reader.
    pub fn with_simulator(mut self, simulator: Arc<SimulatedReader>) -> Self {
        self.simulator = Some(simulator);
        self
    }

    pub async fn apply(&mut self, command: HostCommand) -> Result<HostReply> {
        match command {
            HostCommand::Foreground => self.lifecycle.on_foregrounded(),
            HostCommand::Background => self.lifecycle.on_backgrounded(),
            HostCommand::Started => self.lifecycle.on_started(),
            HostCommand::Stopped => self.lifecycle.on_stopped(),
            HostCommand::Trim(level) => self.lifecycle.on_trim_memory(level),
            HostCommand::Abort(reason) => self.orchestrator.abort_active_flow(reason)?,
            HostCommand::Start => self.orchestrator.start()?,
            HostCommand::Stop => self.orchestrator.stop()?,
            HostCommand::Status => {
                return Ok(HostReply::Status(self.orchestrator.snapshot().await?));
            }
            HostCommand::Disconnect(reason) => match &self.simulator {
                Some(sim) => sim.simulate_disconnect(&reason),
                None => warn!("no simulated reader to disconnect"),
            },
            HostCommand::Reconnect { reason, succeeds } => match &self.simulator {
                Some(sim) => sim.simulate_reconnect(&reason, succeeds),
                None => warn!("no simulated reader to reconnect"),
            },
            HostCommand::Quit => return Ok(HostReply::Quit),
        }
        Ok(HostReply::Continue)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename = "status")]
struct StatusLine<'a> {
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

/// Writes every event as one JSON object per line.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Writes a snapshot as a `{"type":"status",...}` line.
    pub fn write_status(&self, snapshot: &Snapshot) {
        self.write_line(&StatusLine { snapshot });
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_line<T: Serialize>(&self, value: &T) {
        let mut line = match serde_json::to_string(value) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize event");
                return;
            }
        };
        line.push('\n');
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|()| out.flush()) {
            warn!(error = %e, "failed to write event");
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: TerminalEvent) {
        self.write_line(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{SessionEvent, SessionEventStatus};
    use crate::domain::reader::ReaderConnectionState;

    #[test]
    fn test_parse_commands() {
        assert_eq!("background".parse::<HostCommand>(), Ok(HostCommand::Background));
        assert_eq!("  Foreground ".parse::<HostCommand>(), Ok(HostCommand::Foreground));
        assert_eq!(
            "trim 40".parse::<HostCommand>(),
            Ok(HostCommand::Trim(MemoryTrimLevel::BACKGROUND))
        );
        assert_eq!(
            "abort operator canceled".parse::<HostCommand>(),
            Ok(HostCommand::Abort("operator canceled".into()))
        );
        assert_eq!("started".parse::<HostCommand>(), Ok(HostCommand::Started));
        assert_eq!("quit".parse::<HostCommand>(), Ok(HostCommand::Quit));
    }

    #[test]
    fn test_parse_simulator_commands() {
        assert_eq!(
            "disconnect".parse::<HostCommand>(),
            Ok(HostCommand::Disconnect("simulated".into()))
        );
        assert_eq!(
            "reconnect-fail bluetooth".parse::<HostCommand>(),
            Ok(HostCommand::Reconnect {
                reason: "bluetooth".into(),
                succeeds: false
            })
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            "trim".parse::<HostCommand>(),
            Err(CommandError::MissingArgument("trim"))
        );
        assert_eq!(
            "trim high".parse::<HostCommand>(),
            Err(CommandError::InvalidTrimLevel("high".into()))
        );
        assert_eq!(
            "abort".parse::<HostCommand>(),
            Err(CommandError::MissingArgument("abort"))
        );
        assert!(matches!(
            "dance".parse::<HostCommand>(),
            Err(CommandError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_skips_blank_and_comment_lines() {
        let input: &[u8] = b"\n# warm up\nstart\n\nbogus\nstatus\n";
        let mut reader = CommandReader::new(input);

        assert_eq!(reader.next().await, Some(Ok(HostCommand::Start)));
        assert!(matches!(reader.next().await, Some(Err(CommandError::Unknown(_)))));
        assert_eq!(reader.next().await, Some(Ok(HostCommand::Status)));
        assert_eq!(reader.next().await, None);
    }

    #[test]
    fn test_json_lines_sink_writes_one_object_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(TerminalEvent::Session(
            SessionEvent::new("ps_1", SessionEventStatus::Failed).with_message("activity-paused"),
        ));
        sink.write_status(&Snapshot {
            running: true,
            reader_state: ReaderConnectionState::Connected,
            flow_state: None,
            active_session_id: None,
            busy: false,
            location_known: true,
        });

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "session");
        assert_eq!(lines[0]["message"], "activity-paused");
        assert_eq!(lines[1]["type"], "status");
        assert_eq!(lines[1]["readerState"], "connected");
        assert_eq!(lines[1]["running"], true);
    }
}
