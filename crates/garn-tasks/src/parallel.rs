//! Parallel fan-out of sub-processes
//!
//! Programs are split into batches of at most `parallelism` programs. Batches
//! run one after another, the programs of a batch run concurrently. Output is
//! line-prefixed and gated: the first program of a batch to start owns the
//! terminal, everybody else is buffered and flushed in start order once the
//! owner exits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use console::Term;
use futures::future::join_all;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument};

use garn_core::error::ProcessError;
use garn_core::exec::{ensure_in_path, program_name};

use crate::reporter::{TaskEvent, TaskReporter, TracingReporter};

/// One program to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelProgram {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Prepended to every output line, e.g. `[web] `
    pub prefix: Option<String>,
}

impl ParallelProgram {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            prefix: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Name used in progress reports
    pub fn label(&self) -> String {
        match &self.prefix {
            Some(prefix) if !prefix.trim().is_empty() => prefix.trim().to_string(),
            _ => program_name(&self.program),
        }
    }
}

/// How many programs may run at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// Everything in one batch
    Unbounded,
    /// Batches of at most this many programs
    Max(NonZeroUsize),
}

impl Parallelism {
    /// One program at a time
    pub fn sequential() -> Self {
        Self::Max(NonZeroUsize::MIN)
    }

    /// `Max(n)`, or sequential for `n == 0`
    pub fn max(n: usize) -> Self {
        NonZeroUsize::new(n).map_or_else(Self::sequential, Self::Max)
    }
}

/// Split items into consecutive batches
pub fn partition_batches<T>(items: Vec<T>, parallelism: Parallelism) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = match parallelism {
        Parallelism::Unbounded => return vec![items],
        Parallelism::Max(n) => n.get(),
    };

    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        batches.push(items.by_ref().take(size).collect());
    }
    batches
}

/// Which stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Destination of gated output lines
pub trait OutputSink: Send + Sync {
    fn write_line(&self, stream: OutputStream, line: &str);
}

/// Writes to this process's stdout/stderr
#[derive(Debug, Default)]
pub struct TerminalSink;

impl OutputSink for TerminalSink {
    fn write_line(&self, stream: OutputStream, line: &str) {
        let term = match stream {
            OutputStream::Stdout => Term::stdout(),
            OutputStream::Stderr => Term::stderr(),
        };
        if let Err(e) = term.write_line(line) {
            debug!("Failed to write program output: {}", e);
        }
    }
}

/// Keeps lines in memory (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<(OutputStream, String)>>,
}

impl CollectingSink {
    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Line texts regardless of stream
    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|(_, line)| line).collect()
    }
}

impl OutputSink for CollectingSink {
    fn write_line(&self, stream: OutputStream, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((stream, line.to_string()));
    }
}

#[derive(Default)]
struct GateState {
    owner: Option<usize>,
    queue: VecDeque<usize>,
    buffers: HashMap<usize, Vec<(OutputStream, String)>>,
    finished: HashSet<usize>,
}

/// Lets one program at a time write to the sink
pub struct OutputGate {
    sink: Arc<dyn OutputSink>,
    state: Mutex<GateState>,
}

impl fmt::Debug for OutputGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("OutputGate")
            .field("owner", &state.owner)
            .field("queue", &state.queue)
            .finish_non_exhaustive()
    }
}

impl OutputGate {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(GateState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A program started. The first one owns the terminal.
    pub fn register(&self, id: usize) {
        let mut state = self.state();
        if state.owner.is_none() {
            state.owner = Some(id);
        } else {
            state.queue.push_back(id);
        }
    }

    pub fn write(&self, id: usize, stream: OutputStream, line: &str) {
        let mut state = self.state();
        if state.owner == Some(id) {
            self.sink.write_line(stream, line);
        } else {
            state
                .buffers
                .entry(id)
                .or_default()
                .push((stream, line.to_string()));
        }
    }

    /// A program exited. If it owned the terminal, hand it to the next one.
    pub fn finish(&self, id: usize) {
        let mut state = self.state();
        state.finished.insert(id);
        if state.owner != Some(id) {
            return;
        }
        state.owner = None;

        while let Some(next) = state.queue.pop_front() {
            self.flush(&mut state, next);
            if !state.finished.contains(&next) {
                state.owner = Some(next);
                break;
            }
        }
    }

    /// Flush whatever is still buffered, in start order
    pub fn release_all(&self) {
        let mut state = self.state();
        state.owner = None;
        while let Some(next) = state.queue.pop_front() {
            self.flush(&mut state, next);
        }
        state.finished.clear();
    }

    fn flush(&self, state: &mut GateState, id: usize) {
        for (stream, line) in state.buffers.remove(&id).unwrap_or_default() {
            self.sink.write_line(stream, &line);
        }
    }
}

/// Failures of one fan-out run
#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("{}", describe_failures(.0))]
    Failed(Vec<ProcessError>),
}

fn describe_failures(errors: &[ProcessError]) -> String {
    let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!(
        "{} program(s) failed:\n{}",
        errors.len(),
        details.join("\n")
    )
}

/// What a successful fan-out did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutSummary {
    pub programs: usize,
    pub batches: usize,
    pub duration: Duration,
}

/// Runs programs in gated, bounded batches
pub struct ParallelRunner {
    sink: Arc<dyn OutputSink>,
    reporter: Arc<dyn TaskReporter>,
}

impl Default for ParallelRunner {
    fn default() -> Self {
        Self::new(Arc::new(TracingReporter))
    }
}

impl ParallelRunner {
    /// Runner writing to the terminal
    pub fn new(reporter: Arc<dyn TaskReporter>) -> Self {
        Self {
            sink: Arc::new(TerminalSink),
            reporter,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run all programs. A failing program never stops its siblings, but
    /// later batches don't start.
    #[instrument(skip_all, fields(programs = programs.len(), parallelism = ?parallelism))]
    pub async fn run(
        &self,
        programs: Vec<ParallelProgram>,
        parallelism: Parallelism,
    ) -> Result<FanOutSummary, FanOutError> {
        let start = Instant::now();
        let total = programs.len();
        let batches = partition_batches(programs.into_iter().enumerate().collect(), parallelism);
        let batch_count = batches.len();
        let gate = OutputGate::new(self.sink.clone());
        let mut ran = 0;

        for (batch_index, batch) in batches.into_iter().enumerate() {
            self.reporter.report(&TaskEvent::BatchStarted {
                batch: batch_index,
                size: batch.len(),
            });
            ran += batch.len();

            let results = join_all(
                batch
                    .iter()
                    .map(|(id, program)| self.run_program(*id, program, &gate)),
            )
            .await;
            gate.release_all();

            let failures: Vec<ProcessError> = results.into_iter().filter_map(Result::err).collect();
            if !failures.is_empty() {
                self.reporter.report(&TaskEvent::AllCompleted {
                    total: ran,
                    failed: failures.len(),
                    duration: start.elapsed(),
                });
                return Err(FanOutError::Failed(failures));
            }
        }

        self.reporter.report(&TaskEvent::AllCompleted {
            total,
            failed: 0,
            duration: start.elapsed(),
        });
        Ok(FanOutSummary {
            programs: total,
            batches: batch_count,
            duration: start.elapsed(),
        })
    }

    async fn run_program(
        &self,
        id: usize,
        program: &ParallelProgram,
        gate: &OutputGate,
    ) -> Result<(), ProcessError> {
        let start = Instant::now();
        gate.register(id);
        let result = spawn_gated(id, program, gate).await;
        gate.finish(id);

        self.reporter.report(&TaskEvent::ProgramFinished {
            program: program.label(),
            success: result.is_ok(),
            duration: start.elapsed(),
        });
        result
    }
}

async fn spawn_gated(
    id: usize,
    program: &ParallelProgram,
    gate: &OutputGate,
) -> Result<(), ProcessError> {
    ensure_in_path(&program.program)?;
    let joined = program.args.join(" ");
    debug!(program = %program.program, args = %joined, "spawning fan-out program");

    let mut cmd = Command::new(&program.program);
    cmd.args(&program.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &program.cwd {
        cmd.current_dir(cwd);
    }

    let spawn_failed = |e: std::io::Error| ProcessError::SpawnFailed {
        program: program_name(&program.program),
        args: joined.clone(),
        reason: e.to_string(),
    };
    let mut child = cmd.spawn().map_err(spawn_failed)?;

    let prefix = program.prefix.as_deref().unwrap_or("");
    let (_, stderr) = tokio::join!(
        pump(child.stdout.take(), OutputStream::Stdout, prefix, id, gate),
        pump(child.stderr.take(), OutputStream::Stderr, prefix, id, gate),
    );
    let status = child.wait().await.map_err(spawn_failed)?;

    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::Failed {
            program: program_name(&program.program),
            args: joined,
            code: status.code().unwrap_or(-1),
            stderr: stderr.join("\n"),
        })
    }
}

/// Forward lines of one stream to the gate, returning them
async fn pump<R>(
    reader: Option<R>,
    stream: OutputStream,
    prefix: &str,
    id: usize,
    gate: &OutputGate,
) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Vec::new();
    };
    let mut seen = Vec::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        gate.write(id, stream, &format!("{}{}", prefix, line));
        seen.push(line);
    }
    seen
}
