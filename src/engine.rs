use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::time::Instant;

use console::style;
use indicatif::ProgressStyle;
use parking_lot::RwLock;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::EngineConfig;
use crate::context::TaskContext;
use crate::error::TaskError;
use crate::id::{Id, IdGenerator};
use crate::process::{Process, Step};
use crate::vfs::{File, Filesystem};

/// Cooperative cancellation signal for a run.
///
/// Cancelling stops the engine from dispatching further steps once the
/// current step's barrier is crossed. In-flight tasks are left to finish;
/// they are expected to poll [`TaskContext::is_cancelled`] themselves.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running { step: usize },
    Completed,
    Failed(FailureCause),
}

/// Why a run ended in [`RunState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// At least one task of the step raised an error.
    TaskFailed { step: usize },
    /// The external cancellation signal was observed.
    Cancelled,
    /// The step's barrier was not crossed within the configured timeout.
    StepTimedOut { step: usize },
}

/// Failure record for a single task, with enough detail to identify which
/// task of which step went wrong.
#[derive(Debug)]
pub struct TaskFailure {
    pub step_index: usize,
    pub step_id: Id,
    pub step_name: String,
    pub task_id: Id,
    pub task_name: String,
    pub error: TaskError,
}

/// Outcome of a [`Engine::run`] call.
///
/// The file list always contains everything successfully produced up to the
/// point of failure, alongside the failure reports. Ownership of the graph
/// stays with the [`Filesystem`] the engine was built around; this holds
/// cheap handles into it.
#[derive(Debug)]
pub struct RunResult {
    pub state: RunState,
    pub source: Arc<File>,
    /// The final available-files set: the source plus every derived file
    /// folded in at each barrier, in fold order.
    pub files: Vec<Arc<File>>,
    pub failures: Vec<TaskFailure>,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self.state {
            RunState::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Walks a [`Process`] over a source file: steps strictly serial, tasks of a
/// step in parallel on the rayon pool, with a barrier at the end of every
/// step.
///
/// One engine drives one run at a time; [`Engine::state`] reflects the most
/// recent run.
pub struct Engine {
    fs: Arc<Filesystem>,
    config: EngineConfig,
    cancel: CancelToken,
    state: RwLock<RunState>,
}

impl Engine {
    pub fn new(fs: Arc<Filesystem>) -> Self {
        Self::with_config(fs, EngineConfig::default())
    }

    pub fn with_config(fs: Arc<Filesystem>, config: EngineConfig) -> Self {
        Self {
            fs,
            config,
            cancel: CancelToken::new(),
            state: RwLock::new(RunState::NotStarted),
        }
    }

    /// Build an engine together with a fresh filesystem, with the Identifier
    /// Service set up from the configuration's id section.
    pub fn from_config(config: EngineConfig) -> Self {
        let fs = Arc::new(Filesystem::with_ids(IdGenerator::new(&config.id)));
        Self::with_config(fs, config)
    }

    pub fn filesystem(&self) -> &Arc<Filesystem> {
        &self.fs
    }

    /// A handle that can cancel this engine's run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    fn set_state(&self, state: RunState) {
        *self.state.write() = state;
    }

    /// Run every step of `process` against `source`.
    ///
    /// Never returns an error: task failures, cancellation and timeouts are
    /// reported through the returned [`RunResult`].
    pub fn run(&self, process: &Process, source: Arc<File>) -> RunResult {
        eprintln!(
            "Refining {} with process {}.",
            style(source.name()).red(),
            style(process.name()).blue()
        );

        self.set_state(RunState::NotStarted);

        // Ids present before the run never get folded into the available
        // set; only files created by this run's steps do.
        let mut known: HashSet<Id> = self
            .fs
            .files()
            .iter()
            .map(|file| file.id().clone())
            .collect();
        known.insert(source.id().clone());

        let mut available: Vec<Arc<File>> = vec![source.clone()];
        let mut failures: Vec<TaskFailure> = Vec::new();
        let mut cause: Option<FailureCause> = None;

        for (index, step) in process.steps().iter().enumerate() {
            if self.cancel.is_cancelled() {
                cause = Some(FailureCause::Cancelled);
                break;
            }

            self.set_state(RunState::Running { step: index });
            tracing::debug!(step = index, name = step.name(), "starting step");

            let (step_failures, timed_out) = self.run_step(index, step, &source, &available);

            // Fold before any early exit so the partial output of a failed
            // or cancelled step is retained in the result.
            let mut produced: Vec<Arc<File>> = self
                .fs
                .files()
                .into_iter()
                .filter(|file| !known.contains(file.id()))
                .collect();
            produced.sort_by(|a, b| a.id().cmp(b.id()));

            for file in produced {
                known.insert(file.id().clone());
                available.push(file);
            }

            let failed = !step_failures.is_empty();
            failures.extend(step_failures);

            if timed_out {
                cause = Some(FailureCause::StepTimedOut { step: index });
                break;
            }

            if failed {
                cause = Some(FailureCause::TaskFailed { step: index });
                break;
            }

            if self.cancel.is_cancelled() {
                cause = Some(FailureCause::Cancelled);
                break;
            }
        }

        let state = match cause {
            None => RunState::Completed,
            Some(cause) => RunState::Failed(cause),
        };
        self.set_state(state);

        match state {
            RunState::Completed => {
                tracing::info!(files = available.len(), "run completed");
            }
            _ => {
                tracing::warn!(?state, files = available.len(), "run failed");
            }
        }

        RunResult {
            state,
            source,
            files: available,
            failures,
        }
    }

    /// Dispatch every task of one step and sit at the barrier until all of
    /// them reported back or the deadline passed.
    fn run_step(
        &self,
        index: usize,
        step: &Step,
        source: &Arc<File>,
        available: &[Arc<File>],
    ) -> (Vec<TaskFailure>, bool) {
        let total = step.tasks().len() as u64;
        let mut failures = Vec::new();

        let span = tracing::span!(Level::INFO, "step", name = step.name());
        span.pb_set_length(total);
        span.pb_set_style(
            &ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        span.pb_set_message(step.name());
        let _enter = span.enter();

        if total == 0 {
            return (failures, false);
        }

        // Each task gets the same snapshot of the inputs as they stood at
        // the start of the step; sibling output stays invisible until the
        // next barrier.
        let snapshot = Arc::new(available.to_vec());
        let visible: Arc<HashSet<Id>> =
            Arc::new(snapshot.iter().map(|file| file.id().clone()).collect());

        let deadline = self
            .config
            .step_timeout()
            .map(|timeout| Instant::now() + timeout);

        let task_style = ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap();

        let (sender, receiver) = channel::<(usize, Result<(), TaskError>)>();

        for (slot, task) in step.tasks().iter().enumerate() {
            let action = task.action();
            let name = task.name().to_string();
            let sender = sender.clone();
            let pb_style = task_style.clone();
            let context = TaskContext::new(
                source.clone(),
                snapshot.clone(),
                visible.clone(),
                self.fs.clone(),
                self.cancel.clone(),
            );

            // Detached spawn rather than a scoped one: if the barrier times
            // out the engine moves on while the straggler finishes on the
            // pool, and its send is simply dropped.
            rayon::spawn(move || {
                let span = tracing::span!(Level::INFO, "task", name = name.as_str());
                span.pb_set_style(&pb_style);
                span.pb_set_message(&format!("Running {name}"));
                let _enter = span.enter();

                // AssertUnwindSafe: a panicking task only ever touched
                // cloned or append-only shared state.
                let result = match catch_unwind(AssertUnwindSafe(|| (action)(&context))) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    }
                };

                let _ = sender.send((slot, result));
            });
        }

        drop(sender);

        // Barrier: no step begins until every task of this one reported
        // back, successfully or not.
        let mut completed = 0u64;
        let mut timed_out = false;

        while completed < total {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(remaining) {
                        Ok(received) => received,
                        Err(RecvTimeoutError::Timeout) => {
                            timed_out = true;
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match receiver.recv() {
                    Ok(received) => received,
                    Err(_) => break,
                },
            };

            let (slot, result) = received;
            completed += 1;
            span.pb_inc(1);

            if let Err(error) = result {
                let task = &step.tasks()[slot];
                tracing::error!("Task '{}' failed: {error:#}", task.name());

                failures.push(TaskFailure {
                    step_index: index,
                    step_id: step.id().clone(),
                    step_name: step.name().to_string(),
                    task_id: task.id().clone(),
                    task_name: task.name().to_string(),
                    error,
                });
            }
        }

        if timed_out {
            tracing::warn!(
                "Step '{}' missed its deadline with {completed} of {total} tasks done",
                step.name()
            );
        }

        (failures, timed_out)
    }
}
