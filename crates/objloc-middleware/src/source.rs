//! Sensor source adapters.
//!
//! The node never talks to a camera driver directly. A [`SensorSource`]
//! yields inbound [`EventPayload`]s (detection batches and point clouds) and
//! the node forwards them onto the [`EventBus`][crate::bus::EventBus].
//!
//! - [`SensorSource`] – the trait every input adapter implements.
//! - [`ReplaySource`] – replays a recorded NDJSON file, one inbound payload
//!   per line.
//! - [`StdinSource`] – reads the same NDJSON format live from standard input.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use objloc_types::{EventPayload, InboundPayload, LocError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Every external-input adapter must implement this trait.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Open the source and return its stream of inbound payloads.
    async fn inbound(&self) -> Result<BoxStream<'static, EventPayload>, LocError>;
}

/// Replays sensor traffic recorded as newline-delimited JSON.
///
/// Each line holds one [`InboundPayload`], e.g.
/// `{"kind":"detections","data":{...}}`. Blank lines and lines starting with
/// `#` are ignored; malformed lines are logged and skipped.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    path: PathBuf,
}

impl ReplaySource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Parse an NDJSON document into payloads, skipping bad lines.
    pub fn parse(raw: &str) -> Vec<EventPayload> {
        raw.lines()
            .enumerate()
            .filter_map(|(idx, line)| parse_line(idx + 1, line))
            .collect()
    }
}

/// Decode one NDJSON line. Blank, comment and malformed lines yield `None`.
fn parse_line(line_no: usize, line: &str) -> Option<EventPayload> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str::<InboundPayload>(line) {
        Ok(payload) => Some(EventPayload::from(payload)),
        Err(e) => {
            warn!(line = line_no, error = %e, "skipping malformed input line");
            None
        }
    }
}

#[async_trait]
impl SensorSource for ReplaySource {
    async fn inbound(&self) -> Result<BoxStream<'static, EventPayload>, LocError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            LocError::InvalidInput(format!("cannot read replay {}: {e}", self.path.display()))
        })?;
        let payloads = Self::parse(&raw);
        debug!(path = %self.path.display(), count = payloads.len(), "replay loaded");
        Ok(stream::iter(payloads).boxed())
    }
}

/// Reads inbound payloads from standard input until EOF.
///
/// Uses the same line format as [`ReplaySource`]. Read errors end the
/// stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinSource;

#[async_trait]
impl SensorSource for StdinSource {
    async fn inbound(&self) -> Result<BoxStream<'static, EventPayload>, LocError> {
        Ok(lines_to_payloads(BufReader::new(tokio::io::stdin())))
    }
}

/// Turn any async line reader into a payload stream.
fn lines_to_payloads<R>(reader: R) -> BoxStream<'static, EventPayload>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    stream::unfold((reader.lines(), 0usize), |(mut lines, mut line_no)| async move {
        loop {
            line_no += 1;
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(payload) = parse_line(line_no, &line) {
                        return Some((payload, (lines, line_no)));
                    }
                }
                Ok(None) => {
                    debug!(lines = line_no - 1, "input closed");
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "input read failed");
                    return None;
                }
            }
        }
    })
    .boxed()
}
