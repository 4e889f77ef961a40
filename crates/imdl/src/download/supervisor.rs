use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use serde::Serialize;

use super::{DownloadMode, DownloadTask, TaskState};
use crate::config::{AppConfig, DownloadConfig, ToolConfig};
use crate::error::{Error, Result};
use crate::runner::{ProcessRunner, SystemRunner};
use crate::tool::{HttpFetcher, ToolFetcher, ensure_tool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub target: String,
    pub mode: DownloadMode,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Done
    }
}

#[derive(Debug)]
struct Slot {
    // true when no task occupies the slot
    complete: AtomicBool,
    state: AtomicU8,
    live_workers: AtomicUsize,
    peak_workers: AtomicUsize,
}

impl Slot {
    fn set_state(&self, s: TaskState) {
        self.state.store(s as u8, Ordering::Release);
    }
}

// Releases the slot on every exit path, panics included.
struct SlotGuard {
    slot: Arc<Slot>,
}

impl SlotGuard {
    fn enter(slot: Arc<Slot>) -> Self {
        let live = slot.live_workers.fetch_add(1, Ordering::AcqRel) + 1;
        slot.peak_workers.fetch_max(live, Ordering::AcqRel);
        Self { slot }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.slot.set_state(TaskState::Failed);
        }
        self.slot.live_workers.fetch_sub(1, Ordering::AcqRel);
        self.slot.complete.store(true, Ordering::Release);
    }
}

struct WorkerCtx {
    runner: Arc<dyn ProcessRunner>,
    fetcher: Arc<dyn ToolFetcher>,
    tool: ToolConfig,
    download: DownloadConfig,
    slot: Arc<Slot>,
}

pub struct DownloadSupervisor {
    runner: Arc<dyn ProcessRunner>,
    fetcher: Arc<dyn ToolFetcher>,
    tool: ToolConfig,
    download: DownloadConfig,
    slot: Arc<Slot>,
    worker: Option<JoinHandle<TaskOutcome>>,
    last_outcome: Option<TaskOutcome>,
    spawned: usize,
}

impl DownloadSupervisor {
    pub fn new(
        cfg: &AppConfig,
        runner: Arc<dyn ProcessRunner>,
        fetcher: Arc<dyn ToolFetcher>,
    ) -> Self {
        Self {
            runner,
            fetcher,
            tool: cfg.tool.clone(),
            download: cfg.download.clone(),
            slot: Arc::new(Slot {
                complete: AtomicBool::new(true),
                state: AtomicU8::new(TaskState::Idle as u8),
                live_workers: AtomicUsize::new(0),
                peak_workers: AtomicUsize::new(0),
            }),
            worker: None,
            last_outcome: None,
            spawned: 0,
        }
    }

    pub fn system(cfg: &AppConfig) -> Self {
        let fetcher = HttpFetcher::new(std::time::Duration::from_secs(
            cfg.tool.fetch_timeout_secs.max(1),
        ));
        Self::new(cfg, Arc::new(SystemRunner), Arc::new(fetcher))
    }

    pub fn is_busy(&self) -> bool {
        !self.slot.complete.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.slot.state.load(Ordering::Acquire))
    }

    /// Returns `Ok(false)` without doing anything while a task is running.
    pub fn start(&mut self, target: &str, mode: DownloadMode) -> Result<bool> {
        let task = DownloadTask::new(target, mode)?;
        if self.is_busy() {
            tracing::warn!("A download is already running; ignoring new request.");
            return Ok(false);
        }
        self.reap();

        self.slot.complete.store(false, Ordering::Release);
        self.slot.set_state(TaskState::Resolving);

        let ctx = WorkerCtx {
            runner: Arc::clone(&self.runner),
            fetcher: Arc::clone(&self.fetcher),
            tool: self.tool.clone(),
            download: self.download.clone(),
            slot: Arc::clone(&self.slot),
        };
        // Workers log through whatever subscriber the caller has, scoped or global.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        tracing::debug!(url = %task.target, mode = %task.mode, "starting download worker");

        let spawned = thread::Builder::new()
            .name("imdl-download".into())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || run_worker(ctx, task)));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.spawned += 1;
                Ok(true)
            }
            Err(e) => {
                self.slot.set_state(TaskState::Failed);
                self.slot.complete.store(true, Ordering::Release);
                Err(Error::msg(format!("failed to spawn download worker: {e}")))
            }
        }
    }

    pub fn join(&mut self) -> Option<TaskOutcome> {
        self.reap();
        self.last_outcome.clone()
    }

    pub fn last_outcome(&self) -> Option<&TaskOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn spawned_workers(&self) -> usize {
        self.spawned
    }

    pub fn peak_live_workers(&self) -> usize {
        self.slot.peak_workers.load(Ordering::Acquire)
    }

    fn reap(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        match handle.join() {
            Ok(outcome) => self.last_outcome = Some(outcome),
            Err(_) => {
                tracing::error!("download worker panicked");
                self.last_outcome = None;
            }
        }
    }
}

fn run_worker(ctx: WorkerCtx, task: DownloadTask) -> TaskOutcome {
    let _guard = SlotGuard::enter(Arc::clone(&ctx.slot));

    match execute(&ctx, &task) {
        Ok(file_name) => {
            ctx.slot.set_state(TaskState::Done);
            tracing::info!("Download complete: {file_name}");
            TaskOutcome {
                target: task.target,
                mode: task.mode,
                state: TaskState::Done,
                file_name: Some(file_name),
                error: None,
            }
        }
        Err(e) => {
            ctx.slot.set_state(TaskState::Failed);
            tracing::error!("{e}");
            TaskOutcome {
                target: task.target,
                mode: task.mode,
                state: TaskState::Failed,
                file_name: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn execute(ctx: &WorkerCtx, task: &DownloadTask) -> Result<String> {
    let program = ensure_tool(&ctx.tool, ctx.fetcher.as_ref())?;

    let resolved = ctx
        .runner
        .run(&task.metadata_invocation(&program, &ctx.download))?;
    let resolved = resolved.trim();
    if resolved.is_empty() {
        return Err(Error::EmptyResolution(task.target.clone()));
    }

    ctx.slot.set_state(TaskState::Transferring);
    let transfer = task.transfer_invocation(&program, &ctx.download);
    tracing::debug!("Running command: {transfer}");
    ctx.runner.run(&transfer)?;

    Ok(task.final_file_name(resolved))
}
