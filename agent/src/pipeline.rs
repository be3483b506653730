//! Streaming pipeline
//!
//! Launches the sampling tool, feeds each output line through the parser
//! into the buffer, and ships the buffer every `batch_size` samples. On end
//! of stream or interrupt it makes one final send for whatever is still
//! buffered, then reaps the subprocess.
//!
//! Everything runs on one task: the HTTP send is awaited inline between
//! line reads, so the buffer needs no locking.

use std::future::Future;
use std::process::{Command, ExitStatus};
use std::time::Duration;

use smisend_sampler::{SampleParser, SamplerCommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tracing::{debug, error, info, warn};

use crate::buffer::MetricBuffer;
use crate::config::{Config, MalformedRowPolicy};
use crate::error::AgentError;
use crate::metrics;
use crate::shipper::{BatchSink, SendOutcome};

/// Progress is logged every this many samples
const PROGRESS_EVERY: u64 = 100;

/// Time a sampler whose output has closed gets to exit before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Launching the sampler and skipping its header row
    Starting,
    /// Reading, buffering and shipping rows
    Streaming,
    /// Stream closed or interrupted; final flush
    Draining,
    /// Stream ended on an error; final flush still attempted
    Failed,
    /// Subprocess reaped
    Stopped,
}

/// Counters for one streaming run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    /// Rows recorded into the buffer
    pub samples: u64,
    /// Malformed rows dropped under [`MalformedRowPolicy::Skip`]
    pub skipped: u64,
    /// Samples evicted by the buffer cap
    pub evicted: u64,
    pub sends_accepted: u64,
    pub sends_rejected: u64,
    /// True when the stream ended because of the shutdown signal
    pub interrupted: bool,
    /// Samples still buffered after the final flush (lost on exit)
    pub unflushed: usize,
    /// How the sampler exited, once reaped
    pub sampler_status: Option<ExitStatus>,
}

pub struct Pipeline<S: BatchSink> {
    config: Config,
    parser: SampleParser,
    buffer: MetricBuffer,
    sink: S,
    state: PipelineState,
    report: StreamReport,
    /// Output lines read so far, header included
    lines_read: u64,
}

impl<S: BatchSink> Pipeline<S> {
    pub fn new(config: Config, sink: S) -> Self {
        let parser = SampleParser::new(&config.catalog, config.timestamp_zone);
        let buffer =
            MetricBuffer::new(config.catalog.clone()).with_max_samples(config.max_buffered_samples);

        Self {
            config,
            parser,
            buffer,
            sink,
            state: PipelineState::Starting,
            report: StreamReport::default(),
            lines_read: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn buffer(&self) -> &MetricBuffer {
        &self.buffer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn report(&self) -> &StreamReport {
        &self.report
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Launch the configured sampling tool and stream until it exits or
    /// `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<StreamReport, AgentError>
    where
        F: Future<Output = ()>,
    {
        let command = SamplerCommand::new(
            &self.config.tool,
            self.config.interval_ms,
            &self.config.catalog,
        )
        .to_command();
        self.run_command(command, shutdown).await
    }

    /// Stream from an already prepared command. stdout must be piped.
    ///
    /// The pipeline is consumed: the sink, and with it the HTTP client, is
    /// dropped once the subprocess has been reaped.
    pub async fn run_command<F>(
        mut self,
        command: Command,
        shutdown: F,
    ) -> Result<StreamReport, AgentError>
    where
        F: Future<Output = ()>,
    {
        self.transition(PipelineState::Starting);
        let program = command.get_program().to_string_lossy().into_owned();

        let mut child = tokio::process::Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                error!("Failed to launch {}: {}", program, source);
                AgentError::Launch {
                    program: program.clone(),
                    source,
                }
            })?;
        info!("Launched {} (pid {:?})", program, child.id());

        let result = match child.stdout.take() {
            Some(stdout) => self.stream(BufReader::new(stdout), shutdown).await,
            None => Err(AgentError::NoStdout),
        };

        let grace = match &result {
            Ok(report) if !report.interrupted => EXIT_GRACE,
            _ => Duration::ZERO,
        };
        let status = reap(&mut child, grace).await;
        self.transition(PipelineState::Stopped);

        drop(self.sink);
        debug!("HTTP client released");

        result.map(|report| StreamReport {
            sampler_status: status,
            ..report
        })
    }

    /// Consume sampler output: skip the header, stream rows, then drain.
    ///
    /// The reader is dropped before returning, which closes the pipe.
    ///
    /// Lines are read as raw bytes so that one that is not valid UTF-8 goes
    /// through the malformed-row policy like any other bad row.
    pub async fn stream<R, F>(
        &mut self,
        mut reader: R,
        shutdown: F,
    ) -> Result<StreamReport, AgentError>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let mut line = Vec::new();
        tokio::pin!(shutdown);

        let outcome: Result<(), AgentError> = loop {
            line.clear();
            let next = tokio::select! {
                _ = &mut shutdown => {
                    warn!("Goodbye! Interrupted, flushing buffered samples");
                    self.report.interrupted = true;
                    break Ok(());
                }
                read = reader.read_until(b'\n', &mut line) => read,
            };

            match next {
                Ok(0) => {
                    info!("Sampler output closed after {} lines", self.lines_read);
                    break Ok(());
                }
                Ok(_) => {}
                Err(e) => break Err(AgentError::Io(e)),
            }
            self.lines_read += 1;

            if self.state == PipelineState::Starting {
                debug!("Skipping header row: {}", String::from_utf8_lossy(&line).trim());
                self.transition(PipelineState::Streaming);
                continue;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            if let Err(e) = self.ingest_bytes(&line).await {
                break Err(e);
            }
        };
        drop(reader);

        match &outcome {
            Ok(()) => self.transition(PipelineState::Draining),
            Err(e) => {
                error!("Stream failed: {}", e);
                self.transition(PipelineState::Failed);
            }
        }
        self.drain().await;

        outcome.map(|()| self.report.clone())
    }

    /// Parse one data row, record it and ship on batch boundaries.
    pub async fn ingest_line(&mut self, line: &str) -> Result<(), AgentError> {
        self.ingest_bytes(line.as_bytes()).await
    }

    async fn ingest_bytes(&mut self, line: &[u8]) -> Result<(), AgentError> {
        let row = match self.parser.parse_bytes(line) {
            Ok(row) => row,
            Err(source) => match self.config.on_malformed {
                MalformedRowPolicy::Fail => {
                    return Err(AgentError::MalformedRow {
                        line: self.lines_read,
                        source,
                    })
                }
                MalformedRowPolicy::Skip => {
                    warn!("Skipping malformed row {}: {}", self.lines_read, source);
                    self.report.skipped += 1;
                    metrics::ROWS_SKIPPED.inc();
                    return Ok(());
                }
            },
        };

        self.report.evicted += self.buffer.record(row)? as u64;
        self.report.samples += 1;
        metrics::SAMPLES_TOTAL.inc();

        let count = self.report.samples;
        if count % self.config.batch_size.max(1) == 0 {
            self.send_batch().await;
        }
        if count % PROGRESS_EVERY == 0 {
            info!("Received datapoints: {}", count);
        }

        Ok(())
    }

    /// Send everything buffered; clear only if the destination accepted it.
    async fn send_batch(&mut self) -> bool {
        let outcome = self.sink.send(self.buffer.snapshot()).await;
        match outcome {
            SendOutcome::Accepted => {
                self.buffer.clear();
                self.report.sends_accepted += 1;
                true
            }
            SendOutcome::Rejected(e) => {
                self.report.sends_rejected += 1;
                info!(
                    "Keeping {} samples for the next batch ({})",
                    self.buffer.len(),
                    e
                );
                false
            }
        }
    }

    /// One last send for whatever is left. There is no next batch to fold a
    /// rejection into, so a rejection here loses data.
    async fn drain(&mut self) {
        if !self.buffer.is_empty() {
            info!("Flushing {} remaining samples", self.buffer.len());
            if !self.send_batch().await {
                error!(
                    "Final flush rejected, dropping {} samples",
                    self.buffer.len()
                );
            }
        }
        self.report.unflushed = self.buffer.len();
    }
}

fn log_exit(status: ExitStatus) {
    if status.success() {
        debug!("Sampler exited: {}", status);
    } else {
        warn!("Sampler exited with failure: {}", status);
    }
}

/// Wait up to `grace` for the sampler to exit, then kill it.
async fn reap(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            log_exit(status);
            return Some(status);
        }
        Ok(Err(e)) => {
            warn!("Failed to query sampler status: {}", e);
            return None;
        }
        Err(_) => {}
    }

    if let Err(e) = child.start_kill() {
        warn!("Failed to signal sampler: {}", e);
    }
    match child.wait().await {
        Ok(status) => {
            debug!("Sampler stopped: {}", status);
            Some(status)
        }
        Err(e) => {
            warn!("Failed to reap sampler: {}", e);
            None
        }
    }
}
