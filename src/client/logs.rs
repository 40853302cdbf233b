//! Container log streaming.
//!
//! The daemon multiplexes stdout and stderr frames over one connection and
//! frames carry arbitrary byte chunks, not whole lines. This module turns
//! the raw frame stream into complete per-source lines that tasks can print
//! or write to a sink file.

use std::pin::Pin;

use async_stream::try_stream;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use futures::{Stream, StreamExt};

use crate::error::RemoteApiError;

/// Stream a log line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
}

impl LogSource {
    /// Marker used when rendering lines to a sink file.
    pub fn marker(&self) -> &'static str {
        match self {
            LogSource::Stdout => "STDOUT",
            LogSource::Stderr => "STDERR",
        }
    }
}

/// One complete log line from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    pub text: String,
}

/// Options for a log streaming request.
///
/// With `follow` enabled the stream stays open and ends when the container
/// stops; otherwise it ends once the present log tail is drained.
#[derive(Debug, Clone)]
pub struct LogStreamOptions {
    /// Keep the stream open and deliver new output as it appears.
    pub follow: bool,
    /// Include stdout frames.
    pub stdout: bool,
    /// Include stderr frames.
    pub stderr: bool,
    /// Ask the daemon to prefix each line with an RFC 3339 timestamp.
    pub timestamps: bool,
    /// Only return lines logged after this Unix timestamp.
    pub since: Option<i64>,
    /// Only return the last `n` lines.
    pub tail: Option<u64>,
}

impl Default for LogStreamOptions {
    fn default() -> Self {
        Self {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: false,
            since: None,
            tail: None,
        }
    }
}

impl LogStreamOptions {
    /// Creates options with both sources enabled and no following.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to enable follow mode.
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Builder method to enable daemon-side timestamps.
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Builder method to skip lines older than a Unix timestamp.
    pub fn with_since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    /// Builder method to limit output to the last `n` lines.
    pub fn with_tail(mut self, tail: u64) -> Self {
        self.tail = Some(tail);
        self
    }
}

/// Splits a raw frame stream into complete lines, one assembler per source.
///
/// A trailing chunk without a newline is flushed as a final line when the
/// stream ends. Frame errors end the stream after being surfaced.
pub(crate) fn demux<S>(
    id: String,
    frames: S,
) -> Pin<Box<dyn Stream<Item = Result<LogLine, RemoteApiError>> + Send>>
where
    S: Stream<Item = Result<LogOutput, BollardError>> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut frames = Box::pin(frames);
        let mut stdout = LineAssembler::new(LogSource::Stdout);
        let mut stderr = LineAssembler::new(LogSource::Stderr);

        while let Some(frame) = frames.next().await {
            let frame = frame.map_err(|e| RemoteApiError::Logs {
                id: id.clone(),
                message: e.to_string(),
            })?;

            match frame {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    for line in stdout.push(&message) {
                        yield line;
                    }
                }
                LogOutput::StdErr { message } => {
                    for line in stderr.push(&message) {
                        yield line;
                    }
                }
                LogOutput::StdIn { .. } => {}
            }
        }

        if let Some(line) = stdout.finish() {
            yield line;
        }
        if let Some(line) = stderr.finish() {
            yield line;
        }
    })
}

/// Accumulates frame bytes for one source and emits complete lines.
struct LineAssembler {
    source: LogSource,
    buffer: Vec<u8>,
}

impl LineAssembler {
    fn new(source: LogSource) -> Self {
        Self {
            source,
            buffer: Vec::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<LogLine> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(self.take_line());
            } else {
                self.buffer.push(byte);
            }
        }
        lines
    }

    fn take_line(&mut self) -> LogLine {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        LogLine {
            source: self.source,
            text,
        }
    }

    fn finish(&mut self) -> Option<LogLine> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn stdout_frame(data: &[u8]) -> Result<LogOutput, BollardError> {
        Ok(LogOutput::StdOut {
            message: data.to_vec().into(),
        })
    }

    fn stderr_frame(data: &[u8]) -> Result<LogOutput, BollardError> {
        Ok(LogOutput::StdErr {
            message: data.to_vec().into(),
        })
    }

    async fn collect(
        frames: Vec<Result<LogOutput, BollardError>>,
    ) -> Vec<Result<LogLine, RemoteApiError>> {
        demux("c1".to_string(), stream::iter(frames))
            .collect::<Vec<_>>()
            .await
    }

    fn line(source: LogSource, text: &str) -> LogLine {
        LogLine {
            source,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_demux_reassembles_split_lines() {
        let frames = vec![
            stdout_frame(b"hel"),
            stdout_frame(b"lo\nwor"),
            stdout_frame(b"ld\n"),
        ];
        let lines: Vec<LogLine> = collect(frames).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            lines,
            vec![
                line(LogSource::Stdout, "hello"),
                line(LogSource::Stdout, "world"),
            ]
        );
    }

    #[tokio::test]
    async fn test_demux_keeps_sources_separate() {
        let frames = vec![
            stdout_frame(b"out"),
            stderr_frame(b"err\n"),
            stdout_frame(b"put\n"),
        ];
        let lines: Vec<LogLine> = collect(frames).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            lines,
            vec![
                line(LogSource::Stderr, "err"),
                line(LogSource::Stdout, "output"),
            ]
        );
    }

    #[tokio::test]
    async fn test_demux_flushes_trailing_partial_line() {
        let frames = vec![stdout_frame(b"no newline")];
        let lines: Vec<LogLine> = collect(frames).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec![line(LogSource::Stdout, "no newline")]);
    }

    #[tokio::test]
    async fn test_demux_strips_carriage_returns() {
        let frames = vec![stdout_frame(b"windows\r\n")];
        let lines: Vec<LogLine> = collect(frames).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec![line(LogSource::Stdout, "windows")]);
    }

    #[tokio::test]
    async fn test_demux_surfaces_frame_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection gone");
        let frames = vec![stdout_frame(b"ok\n"), Err(BollardError::from(io_error))];

        let results = collect(frames).await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].as_ref().unwrap(),
            &line(LogSource::Stdout, "ok")
        );
        let err = results[1].as_ref().unwrap_err().to_string();
        assert!(err.contains("c1"));
        assert!(err.contains("connection gone"));
    }

    #[test]
    fn test_log_stream_options_builder() {
        let options = LogStreamOptions::new()
            .with_follow(true)
            .with_timestamps(true)
            .with_since(1700000000)
            .with_tail(25);

        assert!(options.follow);
        assert!(options.stdout);
        assert!(options.stderr);
        assert!(options.timestamps);
        assert_eq!(options.since, Some(1700000000));
        assert_eq!(options.tail, Some(25));
    }

    #[test]
    fn test_source_markers() {
        assert_eq!(LogSource::Stdout.marker(), "STDOUT");
        assert_eq!(LogSource::Stderr.marker(), "STDERR");
    }
}
