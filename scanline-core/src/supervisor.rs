//! One external scanner process per scan id.
//!
//! [`ScanSupervisor::start`] registers the scan and hands the process to a
//! spawned task, so callers never wait for the scanner. That task is the only
//! writer of the scan's progress and graph; cancel requests reach it through
//! the [`ProcessHandle`] stored in the scan's state.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scanline_model::{
    ScanConfig, ScanId, ScanResults, ScanSnapshot, ScanStatus, TimelineEvent,
    WorkflowGraph,
};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{OnceCell, oneshot, watch};
use tokio::time::{interval, timeout};
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, ScanError};
use crate::line_splitter::{DEFAULT_MAX_CHUNK_LEN, LineGroup, LineSplitter};
use crate::progress::ProgressExtractor;
use crate::registry::ScanRegistry;
use crate::state::ScanState;
use crate::tool::ScannerTool;
use crate::workflow::{self, ExportFormat, WorkflowGraphBuilder, WorkflowVocabulary};

pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(1);

type OutputStream = Pin<Box<dyn Stream<Item = io::Result<LineGroup>> + Send>>;

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Explicit scanner executable; discovered when unset
    pub scanner_path: Option<PathBuf>,
    /// How long a terminated scanner may take to exit before it is killed
    pub cancel_grace: Duration,
    pub max_chunk_len: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            scanner_path: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
        }
    }
}

/// Live-process side of a running scan, kept in its [`ScanState`].
#[derive(Debug)]
pub(crate) struct ProcessHandle {
    pid: Option<u32>,
    exited: watch::Receiver<bool>,
    kill: Option<oneshot::Sender<()>>,
}

enum CancelAction {
    Unlaunched,
    Running {
        pid: Option<u32>,
        exited: watch::Receiver<bool>,
        kill: Option<oneshot::Sender<()>>,
    },
}

/// Launches, follows and cancels scanner processes.
#[derive(Clone)]
pub struct ScanSupervisor {
    inner: Arc<ScanSupervisorInner>,
}

struct ScanSupervisorInner {
    registry: ScanRegistry,
    vocabulary: Arc<WorkflowVocabulary>,
    settings: SupervisorSettings,
    tool: OnceCell<ScannerTool>,
}

impl fmt::Debug for ScanSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSupervisor")
            .field("registry", &self.inner.registry)
            .field("settings", &self.inner.settings)
            .field("tool", &self.inner.tool.get())
            .finish()
    }
}

impl ScanSupervisor {
    pub fn new(
        registry: ScanRegistry,
        vocabulary: WorkflowVocabulary,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ScanSupervisorInner {
                registry,
                vocabulary: Arc::new(vocabulary),
                settings,
                tool: OnceCell::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ScanRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    /// Discovered scanner, cached after the first success.
    pub async fn tool(&self) -> Result<&ScannerTool> {
        self.inner
            .tool
            .get_or_try_init(|| {
                ScannerTool::discover(self.inner.settings.scanner_path.as_deref())
            })
            .await
    }

    pub async fn is_installed(&self) -> bool {
        match self.tool().await {
            Ok(tool) => tool.is_installed().await,
            Err(_) => false,
        }
    }

    pub async fn version(&self) -> Option<String> {
        self.tool().await.ok()?.version().await
    }

    /// Registers a scan and launches the scanner in the background.
    ///
    /// Fails without issuing an id when the configuration is invalid or no
    /// scanner can be found.
    pub async fn start(&self, config: ScanConfig) -> Result<ScanId> {
        config.validate()?;
        let tool = self.tool().await?;
        let command = tool.command(&config)?;

        let scan_id = ScanId::new();
        info!(
            scan_id = %scan_id,
            target = %format!("{}/{}", config.target_type, config.target_name),
            "Scan submitted via {}",
            tool.display()
        );
        self.inner
            .registry
            .insert(ScanState::new(scan_id.clone(), config));

        let supervisor = self.clone();
        let task_id = scan_id.clone();
        tokio::spawn(async move {
            supervisor.run_scan(task_id, command).await;
        });

        Ok(scan_id)
    }

    #[instrument(skip_all, fields(scan_id = %scan_id))]
    async fn run_scan(self, scan_id: ScanId, mut command: Command) {
        let registry = &self.inner.registry;

        if registry
            .with_scan(&scan_id, |state| state.cancel_requested)
            .unwrap_or(true)
        {
            info!("Scan cancelled before launch");
            return;
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!("Failed to spawn scanner: {}", err);
                registry.with_scan_mut(&scan_id, |state| {
                    state.latch_error(ScanError::launch(err.to_string()).to_string());
                    state.status = ScanStatus::Failed;
                    state.completed_at = Some(Utc::now());
                });
                return;
            }
        };

        let (exit_tx, exit_rx) = watch::channel(false);
        let (kill_tx, mut kill_rx) = oneshot::channel();
        let handle = ProcessHandle {
            pid: child.id(),
            exited: exit_rx,
            kill: Some(kill_tx),
        };
        let attached = registry
            .with_scan_mut(&scan_id, |state| {
                if state.cancel_requested {
                    return false;
                }
                state.status = ScanStatus::Running;
                state.started_at = Some(Utc::now());
                state.process = Some(handle);
                true
            })
            .unwrap_or(false);

        if !attached {
            info!("Scan cancelled during launch");
            let _ = child.start_kill();
            let status = child.wait().await;
            let _ = exit_tx.send(true);
            self.finalize(&scan_id, status);
            return;
        }
        info!(pid = ?child.id(), "Scanner started");

        let mut output = merged_output(
            child.stdout.take(),
            child.stderr.take(),
            self.inner.settings.max_chunk_len,
        );
        let mut progress = ProgressExtractor::new();
        let mut workflow = WorkflowGraphBuilder::new(Arc::clone(&self.inner.vocabulary));
        let mut kill_armed = true;

        loop {
            tokio::select! {
                request = &mut kill_rx, if kill_armed => {
                    kill_armed = false;
                    if request.is_ok() {
                        force_kill(&mut child);
                    }
                }
                item = output.next() => match item {
                    Some(Ok(group)) => {
                        self.handle_group(&scan_id, &group, &mut progress, &mut workflow);
                    }
                    Some(Err(err)) => {
                        warn!("Error reading scanner output: {}", err);
                        break;
                    }
                    None => break,
                }
            }
        }

        let status = loop {
            tokio::select! {
                request = &mut kill_rx, if kill_armed => {
                    kill_armed = false;
                    if request.is_ok() {
                        force_kill(&mut child);
                    }
                }
                status = child.wait() => break status,
            }
        };
        let _ = exit_tx.send(true);
        self.finalize(&scan_id, status);
    }

    fn handle_group(
        &self,
        scan_id: &ScanId,
        group: &LineGroup,
        progress: &mut ProgressExtractor,
        workflow: &mut WorkflowGraphBuilder,
    ) {
        let registry = &self.inner.registry;
        for line in group.lines() {
            let outcome =
                registry.with_scan_mut(scan_id, |state| progress.apply(line, state));
            match outcome {
                Some(outcome) if outcome.is_progress_bar() => debug!("{}", line),
                Some(_) => info!("{}", line),
                None => {}
            }
            registry.with_graph_mut(scan_id, |graph| workflow.process_line(graph, line));
        }
        registry.with_scan_mut(scan_id, |state| {
            state.output_lines.push(group.durable().to_string());
        });
    }

    fn finalize(&self, scan_id: &ScanId, status: io::Result<ExitStatus>) {
        self.inner.registry.with_scan_mut(scan_id, |state| {
            state.process = None;
            let now = Utc::now();

            if state.cancel_requested || state.status == ScanStatus::Cancelled {
                state.status = ScanStatus::Cancelled;
                state.completed_at.get_or_insert(now);
                info!("Scan cancelled");
                return;
            }
            state.completed_at = Some(now);

            let exit = match status {
                Ok(exit) => exit,
                Err(err) => {
                    state.latch_error(format!("Failed to wait for scanner: {err}"));
                    state.status = ScanStatus::Failed;
                    error!("Failed to wait for scanner: {}", err);
                    return;
                }
            };

            if state.status == ScanStatus::Failed || state.has_latched_error() {
                state.status = ScanStatus::Failed;
                error!(
                    "Scan failed: {}",
                    state.error_message.as_deref().unwrap_or("unknown error")
                );
            } else if exit.success() {
                state.status = ScanStatus::Completed;
                state.progress = 100.0;
                info!("Scan completed successfully");
            } else {
                let message = match exit.code() {
                    Some(code) => ScanError::ProcessExit(code).to_string(),
                    None => "process terminated by signal".to_string(),
                };
                state.latch_error(message);
                state.status = ScanStatus::Failed;
                error!("Scan failed with {}", exit);
            }
        });
    }

    /// Requests termination of a pending or running scan.
    ///
    /// Running scanners get SIGTERM (on unix) and [`SupervisorSettings::cancel_grace`]
    /// to exit before being killed. Returns `false` for unknown or already
    /// finished scans.
    #[instrument(skip_all, fields(scan_id = %scan_id))]
    pub async fn cancel(&self, scan_id: &ScanId) -> bool {
        let action = self
            .inner
            .registry
            .with_scan_mut(scan_id, |state| {
                if !state.status.is_cancellable() || state.cancel_requested {
                    return None;
                }
                state.cancel_requested = true;
                match state.process.as_mut() {
                    None => {
                        state.status = ScanStatus::Cancelled;
                        state.completed_at = Some(Utc::now());
                        Some(CancelAction::Unlaunched)
                    }
                    Some(handle) => Some(CancelAction::Running {
                        pid: handle.pid,
                        exited: handle.exited.clone(),
                        kill: handle.kill.take(),
                    }),
                }
            })
            .flatten();

        let Some(action) = action else {
            debug!("Cancel ignored: scan unknown or already finished");
            return false;
        };

        let CancelAction::Running {
            pid,
            mut exited,
            mut kill,
        } = action
        else {
            info!("Scan cancelled before its process started");
            return true;
        };

        info!("Cancelling scan");
        if !request_termination(pid) {
            send_kill(&mut kill);
        }

        let grace = self.inner.settings.cancel_grace;
        let exited_in_time = timeout(grace, exited.wait_for(|done| *done)).await.is_ok();
        if !exited_in_time {
            warn!("Scanner still running after {:?}, killing it", grace);
            send_kill(&mut kill);
            let _ = timeout(grace, exited.wait_for(|done| *done)).await;
        }

        self.inner.registry.with_scan_mut(scan_id, |state| {
            if !state.status.is_terminal() {
                state.status = ScanStatus::Cancelled;
                state.completed_at = Some(Utc::now());
            }
        });
        true
    }

    /// Live snapshot, or one reconstructed from the scanner's report files.
    pub async fn status(&self, scan_id: &ScanId) -> Result<ScanSnapshot> {
        self.inner
            .registry
            .snapshot(scan_id)
            .await
            .ok_or_else(|| ScanError::not_found(scan_id))
    }

    pub async fn results(&self, scan_id: &ScanId) -> Result<ScanResults> {
        self.status(scan_id).await.map(ScanResults::from)
    }

    pub async fn list(&self) -> Vec<ScanSnapshot> {
        self.inner.registry.list().await
    }

    /// Polls until the scan reaches a terminal status.
    pub async fn wait(&self, scan_id: &ScanId, poll: Duration) -> Result<ScanSnapshot> {
        let mut ticker = interval(poll);
        loop {
            ticker.tick().await;
            let snapshot = self.status(scan_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
        }
    }

    pub fn get_workflow_graph(&self, scan_id: &ScanId) -> Result<WorkflowGraph> {
        self.inner
            .registry
            .graph(scan_id)
            .ok_or_else(|| ScanError::not_found(scan_id))
    }

    /// Timeline of the scan's graph; empty when no graph exists.
    pub fn get_timeline(&self, scan_id: &ScanId) -> Vec<TimelineEvent> {
        self.inner
            .registry
            .with_graph(scan_id, workflow::timeline)
            .unwrap_or_default()
    }

    /// Exports the scan's graph. The format is checked before the graph is
    /// looked up.
    pub fn export(&self, scan_id: &ScanId, format: &str) -> Result<String> {
        let format: ExportFormat = format.parse()?;
        self.inner
            .registry
            .with_graph(scan_id, |graph| workflow::export(graph, format))
            .ok_or_else(|| ScanError::not_found(scan_id))?
    }

    /// Drops the in-memory graph of a scan. Returns whether one existed.
    pub fn clear(&self, scan_id: &ScanId) -> bool {
        let cleared = self.inner.registry.clear_graph(scan_id);
        if cleared {
            debug!(scan_id = %scan_id, "Workflow graph cleared");
        }
        cleared
    }
}

fn merged_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    max_chunk_len: usize,
) -> OutputStream {
    let stdout =
        stdout.map(|out| FramedRead::new(out, LineSplitter::with_max_chunk_len(max_chunk_len)));
    let stderr =
        stderr.map(|err| FramedRead::new(err, LineSplitter::with_max_chunk_len(max_chunk_len)));
    match (stdout, stderr) {
        (Some(out), Some(err)) => Box::pin(out.merge(err)),
        (Some(out), None) => Box::pin(out),
        (None, Some(err)) => Box::pin(err),
        (None, None) => Box::pin(tokio_stream::empty::<io::Result<LineGroup>>()),
    }
}

fn force_kill(child: &mut Child) {
    warn!("Force killing scanner");
    if let Err(err) = child.start_kill() {
        debug!("Kill failed, scanner likely exited: {}", err);
    }
}

fn send_kill(kill: &mut Option<oneshot::Sender<()>>) {
    if let Some(tx) = kill.take() {
        let _ = tx.send(());
    }
}

/// Sends SIGTERM. Returns `false` when no signal could be delivered.
#[cfg(unix)]
fn request_termination(pid: Option<u32>) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!("SIGTERM to {} failed: {}", pid, err);
            false
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_pid: Option<u32>) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanline_model::ScanConfig;

    fn supervisor() -> ScanSupervisor {
        ScanSupervisor::new(
            ScanRegistry::default(),
            WorkflowVocabulary::default(),
            SupervisorSettings::default(),
        )
    }

    #[tokio::test]
    async fn cancel_of_unknown_scan_is_rejected() {
        assert!(!supervisor().cancel(&ScanId::from("nope")).await);
    }

    #[tokio::test]
    async fn pending_scan_cancels_without_a_process() {
        let supervisor = supervisor();
        let state = ScanState::new(ScanId::new(), ScanConfig::new("test", "blank"));
        let id = state.scan_id.clone();
        supervisor.registry().insert(state);

        assert!(supervisor.cancel(&id).await);
        let snapshot = supervisor.status(&id).await.unwrap();
        assert_eq!(snapshot.status, ScanStatus::Cancelled);
        assert!(snapshot.completed_at.is_some());

        // second request finds a terminal scan
        assert!(!supervisor.cancel(&id).await);
    }

    #[tokio::test]
    async fn failed_scan_is_not_cancellable() {
        let supervisor = supervisor();
        let mut state = ScanState::new(ScanId::new(), ScanConfig::new("test", "blank"));
        state.status = ScanStatus::Failed;
        let id = state.scan_id.clone();
        supervisor.registry().insert(state);

        assert!(!supervisor.cancel(&id).await);
        assert_eq!(
            supervisor.status(&id).await.unwrap().status,
            ScanStatus::Failed
        );
    }

    #[tokio::test]
    async fn status_of_unknown_scan_is_not_found() {
        let err = supervisor().status(&ScanId::from("nope")).await.unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[test]
    fn export_rejects_format_before_looking_up_graph() {
        let err = supervisor()
            .export(&ScanId::from("nope"), "svg")
            .unwrap_err();
        assert!(matches!(err, ScanError::UnsupportedExportFormat(_)));

        let err = supervisor()
            .export(&ScanId::from("nope"), "JSON")
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[test]
    fn graph_queries_on_unknown_scans() {
        let supervisor = supervisor();
        let id = ScanId::from("nope");
        assert!(supervisor.get_timeline(&id).is_empty());
        assert!(matches!(
            supervisor.get_workflow_graph(&id),
            Err(ScanError::NotFound(_))
        ));
        assert!(!supervisor.clear(&id));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_without_an_id() {
        let supervisor = supervisor();
        let mut config = ScanConfig::new("openai", "gpt-4");
        config.generations = 0;
        let err = supervisor.start(config).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
        assert!(supervisor.list().await.is_empty());
    }
}
