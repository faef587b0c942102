//! Log collection from many roles into one stream.
//!
//! In tail mode each role contributes its last N lines and the stream ends.
//! In follow mode each role is polled for bytes appended since the last
//! read until the cancellation token fires; the stream then drains, waits
//! a grace period for in-flight reads, and closes every connection it used
//! before ending.

use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LogSettings;
use crate::connection::shell_quote;
use crate::executor::{ExecutionUnit, RemoteExecutor, UnitOperation};
use crate::topology::{Host, Role};

const CHANNEL_CAPACITY: usize = 1024;

/// Which lines to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// The last N lines of every role, then end
    Tail(usize),
    /// New lines until cancelled, optionally starting with the last N
    Follow { backlog: Option<usize> },
}

/// One line of one role's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub role: String,
    pub line: String,
}

/// Keeps lines containing a fixed substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFilter(String);

impl LineFilter {
    pub fn new(needle: impl Into<String>) -> Self {
        LineFilter(needle.into())
    }

    pub fn matches(&self, line: &str) -> bool {
        line.contains(self.0.as_str())
    }
}

/// Read position within one role's log, counted in raw bytes.
#[derive(Debug, Clone, Default)]
pub struct LogCursor {
    offset: u64,
    partial: Vec<u8>,
}

impl LogCursor {
    pub fn at(offset: u64) -> Self {
        Self {
            offset,
            partial: Vec::new(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Consume newly read bytes and return the complete lines among them.
    /// A trailing partial line, possibly ending inside a multibyte
    /// character, is kept until its newline arrives.
    pub fn advance(&mut self, chunk: &[u8]) -> Vec<String> {
        self.offset += chunk.len() as u64;
        self.partial.extend_from_slice(chunk);

        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete[..last_newline]
            .split(|b| *b == b'\n')
            .map(|l| String::from_utf8_lossy(l.strip_suffix(b"\r").unwrap_or(l)).into_owned())
            .collect()
    }

    /// The file shrank below our offset: start over from the beginning.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }
}

/// Shell expression naming the role's current log file. Glob patterns pick
/// the most recently modified match.
fn file_expr(log_file: &str) -> String {
    if log_file.contains(['*', '?', '[']) {
        format!("\"$(ls -1t {} 2>/dev/null | head -n 1)\"", log_file)
    } else {
        shell_quote(log_file)
    }
}

fn tail_command(log_file: &str, lines: usize) -> String {
    format!("tail -n {} {}", lines, file_expr(log_file))
}

/// Print the file size on the first line, then up to `max` bytes after
/// `offset`.
fn poll_command(log_file: &str, offset: u64, max: u64) -> String {
    format!(
        "f={}; s=$(wc -c < \"$f\"); echo \"$s\"; \
         if [ \"$s\" -gt {off} ]; then tail -c +{start} \"$f\" | head -c {max}; fi",
        file_expr(log_file),
        off = offset,
        start = offset + 1,
        max = max
    )
}

/// Size line plus the `backlog` lines preceding it, read consistently.
fn start_command(log_file: &str, backlog: usize) -> String {
    format!(
        "f={}; s=$(wc -c < \"$f\"); echo \"$s\"; head -c \"$s\" \"$f\" | tail -n {}",
        file_expr(log_file),
        backlog
    )
}

/// Split the leading size line off raw command output.
fn split_size(stdout: &[u8]) -> Option<(u64, &[u8])> {
    let (first, rest) = match stdout.iter().position(|b| *b == b'\n') {
        Some(i) => (&stdout[..i], &stdout[i + 1..]),
        None => (stdout, &[][..]),
    };
    let size = std::str::from_utf8(first).ok()?.trim().parse().ok()?;
    Some((size, rest))
}

/// Stream of log lines returned by [`LogAggregator::stream`].
pub struct LogStream {
    inner: ReceiverStream<LogLine>,
}

impl Stream for LogStream {
    type Item = LogLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LogLine>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Collects logs of many roles into one [`LogStream`].
#[derive(Clone)]
pub struct LogAggregator {
    executor: Arc<RemoteExecutor>,
    poll_interval: Duration,
    grace_period: Duration,
    max_read_bytes: u64,
    timeout: Duration,
    parallelism: usize,
}

impl LogAggregator {
    pub fn new(executor: Arc<RemoteExecutor>, settings: &LogSettings) -> Self {
        Self {
            executor,
            poll_interval: settings.poll_interval,
            grace_period: settings.grace_period,
            max_read_bytes: settings.max_read_bytes.max(1),
            timeout: Duration::from_secs(60),
            parallelism: 5,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Start collecting. Lines pass `filter` when one is given.
    pub fn stream(
        &self,
        targets: Vec<(Role, Host)>,
        mode: LogMode,
        filter: Option<LineFilter>,
        cancel: CancellationToken,
    ) -> LogStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move { this.supervise(targets, mode, filter, cancel, tx).await });
        LogStream {
            inner: ReceiverStream::new(rx),
        }
    }

    async fn supervise(
        self,
        targets: Vec<(Role, Host)>,
        mode: LogMode,
        filter: Option<LineFilter>,
        cancel: CancellationToken,
        tx: mpsc::Sender<LogLine>,
    ) {
        let hosts: Vec<Host> = targets.iter().map(|(_, h)| h.clone()).collect();

        match mode {
            LogMode::Tail(lines) => {
                let tail = self.tail_all(targets, lines, filter.as_ref(), &tx);
                tokio::select! {
                    _ = tail => {}
                    _ = cancel.cancelled() => debug!("Tail cancelled"),
                }
            }
            LogMode::Follow { backlog } => {
                let mut followers = JoinSet::new();
                for (role, host) in targets {
                    let follower = Follower {
                        aggregator: self.clone(),
                        role,
                        host,
                        filter: filter.clone(),
                        cancel: cancel.clone(),
                        tx: tx.clone(),
                    };
                    followers.spawn(follower.run(backlog));
                }

                let drained = async { while followers.join_next().await.is_some() {} };
                let finished = tokio::select! {
                    _ = drained => true,
                    _ = cancel.cancelled() => false,
                };

                if !finished {
                    let graceful = tokio::time::timeout(self.grace_period, async {
                        while followers.join_next().await.is_some() {}
                    })
                    .await;
                    if graceful.is_err() {
                        warn!(grace = ?self.grace_period, "Log readers did not stop in time, aborting");
                        followers.abort_all();
                        while followers.join_next().await.is_some() {}
                    }
                }
            }
        }

        self.executor.close_hosts(&hosts).await;
        debug!("Log stream closed");
        drop(tx);
    }

    async fn tail_all(
        &self,
        targets: Vec<(Role, Host)>,
        lines: usize,
        filter: Option<&LineFilter>,
        tx: &mpsc::Sender<LogLine>,
    ) {
        let mut fetched = stream::iter(targets)
            .map(|(role, host)| async move {
                let unit = ExecutionUnit::new(
                    &role,
                    &host,
                    UnitOperation::Command(tail_command(&role.log_file, lines)),
                    self.timeout,
                )
                .with_label("tail log");
                (role, self.executor.execute(&unit).await)
            })
            .buffered(self.parallelism);

        while let Some((role, result)) = fetched.next().await {
            if !result.is_success() {
                warn!(role = %role.name, detail = %result.failure_detail(), "Could not read log");
                continue;
            }
            for line in result.stdout.lines() {
                if filter.is_some_and(|f| !f.matches(line)) {
                    continue;
                }
                let sent = tx
                    .send(LogLine {
                        role: role.name.clone(),
                        line: line.to_string(),
                    })
                    .await;
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Polls one role's log until cancelled.
struct Follower {
    aggregator: LogAggregator,
    role: Role,
    host: Host,
    filter: Option<LineFilter>,
    cancel: CancellationToken,
    tx: mpsc::Sender<LogLine>,
}

impl Follower {
    fn unit(&self, command: String) -> ExecutionUnit {
        ExecutionUnit::new(
            &self.role,
            &self.host,
            UnitOperation::Command(command),
            self.aggregator.timeout,
        )
        .with_label("follow log")
    }

    /// Run `command` unless cancelled first, returning its stdout bytes.
    async fn run_command(&self, command: String) -> Option<Vec<u8>> {
        let unit = self.unit(command);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            result = self.aggregator.executor.execute(&unit) => result,
        };
        if !result.is_success() {
            debug!(role = %self.role.name, detail = %result.failure_detail(), "Log poll failed");
            return Some(Vec::new());
        }
        Some(result.data.unwrap_or_else(|| result.stdout.into_bytes()))
    }

    /// Send lines; false once the receiver is gone.
    async fn emit(&self, lines: impl IntoIterator<Item = String>) -> bool {
        for line in lines {
            if self.filter.as_ref().is_some_and(|f| !f.matches(&line)) {
                continue;
            }
            let sent = self
                .tx
                .send(LogLine {
                    role: self.role.name.clone(),
                    line,
                })
                .await;
            if sent.is_err() {
                return false;
            }
        }
        true
    }

    async fn run(self, backlog: Option<usize>) {
        let start = match backlog {
            Some(n) => start_command(&self.role.log_file, n),
            None => format!("f={}; wc -c < \"$f\"", file_expr(&self.role.log_file)),
        };
        let Some(stdout) = self.run_command(start).await else {
            return;
        };

        let mut cursor = match split_size(&stdout) {
            Some((size, backlog_lines)) => {
                let lines: Vec<String> = String::from_utf8_lossy(backlog_lines)
                    .lines()
                    .map(str::to_string)
                    .collect();
                if !self.emit(lines).await {
                    return;
                }
                LogCursor::at(size)
            }
            None => {
                debug!(role = %self.role.name, "Log file not readable yet, following from start");
                LogCursor::default()
            }
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.aggregator.poll_interval) => {}
            }

            let command =
                poll_command(&self.role.log_file, cursor.offset(), self.aggregator.max_read_bytes);
            let Some(stdout) = self.run_command(command).await else {
                return;
            };
            let Some((size, chunk)) = split_size(&stdout) else {
                continue;
            };

            if size < cursor.offset() {
                debug!(role = %self.role.name, "Log truncated or rotated, rereading");
                cursor.reset();
                continue;
            }
            let lines = cursor.advance(chunk);
            if !self.emit(lines).await {
                return;
            }
        }
    }
}
