use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alias::AliasTable;
use crate::config::ExecutionConfig;
use crate::executor::{ExecutionJob, ProcessExecutor, WorkerGate};
use crate::history::HistoryLog;
use crate::record::{CommandRequest, ExecutionSnapshot};
use crate::registry::{CancelOutcome, ExecutionRegistry};

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    pub elevated: bool,
    pub timeout: Option<Duration>,
}

/// Caller's handle to one submitted execution. The terminal snapshot arrives
/// on the channel exactly once, whichever way the execution ends.
pub struct ExecutionHandle {
    id: u64,
    outcome: Receiver<ExecutionSnapshot>,
}

impl ExecutionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the execution reaches a terminal state.
    pub fn wait(&self) -> Result<ExecutionSnapshot> {
        self.outcome
            .recv()
            .context("execution worker dropped its completion channel")
    }

    /// Non-blocking poll for the terminal snapshot.
    pub fn try_outcome(&self) -> Option<ExecutionSnapshot> {
        self.outcome.try_recv().ok()
    }
}

/// Front door of the execution core: resolves aliases, records history,
/// registers executions, and hands them to worker threads. `submit` never
/// blocks on process I/O; its only synchronous failure is an invalid
/// (empty) submission.
pub struct CommandDispatcher {
    aliases: Mutex<AliasTable>,
    history: HistoryLog,
    registry: Arc<ExecutionRegistry>,
    executor: ProcessExecutor,
}

impl CommandDispatcher {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self::with_aliases(config, AliasTable::new())
    }

    pub fn with_aliases(config: &ExecutionConfig, aliases: AliasTable) -> Self {
        let registry = Arc::new(ExecutionRegistry::new(config.retain_terminal));
        let gate = Arc::new(WorkerGate::new(config.max_concurrent));
        let executor = ProcessExecutor::new(
            registry.clone(),
            gate,
            config.shell.clone(),
            Duration::from_millis(config.poll_interval_ms.max(1)),
        );
        Self {
            aliases: Mutex::new(aliases),
            history: HistoryLog::new(),
            registry,
            executor,
        }
    }

    pub fn submit(&self, raw: &str) -> Result<ExecutionHandle> {
        self.submit_with(raw, SubmitOptions::default())
    }

    pub fn submit_with(&self, raw: &str, options: SubmitOptions) -> Result<ExecutionHandle> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("invalid command: empty submission"));
        }

        let resolved = self.aliases.lock().expect("alias lock").resolve(trimmed);
        let request = CommandRequest::new(trimmed, &resolved);
        self.history.append(request.clone());

        let (id, cancel) = self.registry.create(request, options.elevated);
        let (done, outcome) = mpsc::channel();
        let job = ExecutionJob {
            id,
            command: resolved,
            timeout: options.timeout,
            cancel,
            done,
        };
        if options.elevated {
            self.executor.start_elevated(job);
        } else {
            self.executor.start(job);
        }
        Ok(ExecutionHandle { id, outcome })
    }

    /// Request cancellation. True when a live (Pending or Running) execution
    /// was found; cancelling a terminal or unknown id is a no-op reported as
    /// false. Best effort: the definitive outcome is the terminal state the
    /// worker records.
    pub fn cancel(&self, id: u64) -> bool {
        !matches!(
            self.registry.request_cancel(id),
            CancelOutcome::NotCancellable
        )
    }

    pub fn define_alias(&self, definition: &str) -> Result<(String, String)> {
        self.aliases.lock().expect("alias lock").define(definition)
    }

    pub fn remove_alias(&self, name: &str) -> bool {
        self.aliases.lock().expect("alias lock").remove(name)
    }

    pub fn aliases(&self) -> Vec<(String, String)> {
        self.aliases.lock().expect("alias lock").entries()
    }

    pub fn history(&self) -> Vec<CommandRequest> {
        self.history.all()
    }

    pub fn clear_history(&self) {
        self.history.clear()
    }

    pub fn execution(&self, id: u64) -> Option<ExecutionSnapshot> {
        self.registry.get(id)
    }

    pub fn executions(&self) -> Vec<ExecutionSnapshot> {
        self.registry.list()
    }

    pub fn running(&self) -> Vec<ExecutionSnapshot> {
        self.registry.list_running()
    }

    /// Explicit cleanup of one terminal execution.
    pub fn remove_execution(&self, id: u64) -> bool {
        self.registry.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ExecutionState, FailureKind};
    use std::thread;
    use std::time::Instant;

    fn test_config() -> ExecutionConfig {
        ExecutionConfig {
            shell: None,
            max_concurrent: 0,
            retain_terminal: 0,
            poll_interval_ms: 10,
        }
    }

    fn dispatcher() -> CommandDispatcher {
        CommandDispatcher::new(&test_config())
    }

    fn wait_for_running(dispatcher: &CommandDispatcher, id: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match dispatcher.execution(id).map(|s| s.state) {
                Some(ExecutionState::Running) => return,
                Some(state) if state.is_terminal() => return,
                _ => thread::sleep(Duration::from_millis(5)),
            }
        }
        panic!("execution {id} never left Pending");
    }

    #[test]
    fn empty_submission_is_rejected_without_side_effects() {
        let d = dispatcher();
        assert!(d.submit("").is_err());
        assert!(d.submit("   \t  ").is_err());
        assert!(d.history().is_empty());
        assert!(d.executions().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn echo_completes_with_captured_output() {
        let d = dispatcher();
        let handle = d.submit("echo hello").unwrap();
        let snap = handle.wait().unwrap();

        assert_eq!(snap.state, ExecutionState::Completed);
        assert_eq!(snap.exit_code, Some(0));
        assert_eq!(snap.stdout, "hello\n");
        assert!(snap.stderr.is_empty());
        assert!(!snap.elevated);
        assert!(snap.started_at.is_some());
        assert!(snap.ended_at.is_some());
        assert!(snap.failure.is_none());

        let history = d.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].raw, "echo hello");
    }

    #[test]
    #[cfg(unix)]
    fn alias_resolution_feeds_the_spawned_process() {
        let d = dispatcher();
        d.define_alias("greet=echo aliased").unwrap();

        let snap = d.submit("greet").unwrap().wait().unwrap();
        assert_eq!(snap.stdout, "aliased\n");
        assert_eq!(snap.request.raw, "greet");
        assert_eq!(snap.request.resolved, "echo aliased");

        // Non-alias text passes through untouched
        let snap = d.submit("echo greet").unwrap().wait().unwrap();
        assert_eq!(snap.request.resolved, "echo greet");
    }

    #[test]
    #[cfg(unix)]
    fn nonzero_exit_is_a_runtime_failure_with_output_delivered() {
        let d = dispatcher();
        let snap = d
            .submit("echo partial && echo oops >&2 && exit 7")
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(snap.state, ExecutionState::Failed);
        assert_eq!(snap.exit_code, Some(7));
        assert_eq!(snap.failure, Some(FailureKind::Runtime));
        // Both streams are delivered regardless of exit status
        assert_eq!(snap.stdout, "partial\n");
        assert_eq!(snap.stderr, "oops\n");
    }

    #[test]
    #[cfg(unix)]
    fn concurrent_executions_do_not_cross_contaminate() {
        let d = dispatcher();
        let a = d.submit("echo A").unwrap();
        let b = d.submit("echo B").unwrap();

        let snap_a = a.wait().unwrap();
        let snap_b = b.wait().unwrap();
        assert_eq!(snap_a.stdout, "A\n");
        assert_eq!(snap_b.stdout, "B\n");

        let history = d.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].raw, "echo A");
        assert_eq!(history[1].raw, "echo B");
    }

    #[test]
    #[cfg(unix)]
    fn cancel_kills_a_running_command_and_keeps_prior_output() {
        let d = dispatcher();
        let started = Instant::now();
        let handle = d.submit("echo early && sleep 5").unwrap();
        wait_for_running(&d, handle.id());
        thread::sleep(Duration::from_millis(200));

        assert!(d.cancel(handle.id()));
        let snap = handle.wait().unwrap();

        assert_eq!(snap.state, ExecutionState::Cancelled);
        assert!(snap.exit_code.is_none());
        assert_eq!(snap.stdout, "early\n");
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "cancellation did not shorten the run"
        );
        let run = snap.ended_at.unwrap() - snap.started_at.unwrap();
        assert!(run.num_seconds() < 3);
    }

    #[test]
    #[cfg(unix)]
    fn cancelling_a_terminal_execution_is_a_reported_noop() {
        let d = dispatcher();
        let handle = d.submit("echo done").unwrap();
        let snap = handle.wait().unwrap();

        assert!(!d.cancel(handle.id()));
        let after = d.execution(handle.id()).unwrap();
        assert_eq!(after.state, snap.state);
        assert_eq!(after.stdout, snap.stdout);
    }

    #[test]
    fn cancelling_an_unknown_id_returns_false() {
        let d = dispatcher();
        assert!(!d.cancel(424242));
    }

    #[test]
    #[cfg(unix)]
    fn queued_pending_execution_cancels_without_spawning() {
        let config = ExecutionConfig {
            max_concurrent: 1,
            ..test_config()
        };
        let d = CommandDispatcher::new(&config);

        let first = d.submit("sleep 5").unwrap();
        wait_for_running(&d, first.id());

        let queued = d.submit("echo never").unwrap();
        assert_eq!(
            d.execution(queued.id()).unwrap().state,
            ExecutionState::Pending
        );

        assert!(d.cancel(queued.id()));
        let snap = queued.wait().unwrap();
        assert_eq!(snap.state, ExecutionState::Cancelled);
        assert!(snap.started_at.is_none(), "queued execution must not spawn");
        assert!(snap.stdout.is_empty());

        assert!(d.cancel(first.id()));
        assert_eq!(first.wait().unwrap().state, ExecutionState::Cancelled);
    }

    #[test]
    fn spawn_failure_goes_straight_to_failed() {
        let config = ExecutionConfig {
            shell: Some("/nonexistent/cx-test-shell".to_string()),
            ..test_config()
        };
        let d = CommandDispatcher::new(&config);

        let snap = d.submit("echo hi").unwrap().wait().unwrap();
        assert_eq!(snap.state, ExecutionState::Failed);
        assert_eq!(snap.failure, Some(FailureKind::Spawn));
        assert!(snap.started_at.is_none(), "no Running interval on spawn failure");
        assert!(snap.exit_code.is_none());
        assert!(snap.stderr.contains("failed to spawn"));

        // The attempt still counts as a submission
        assert_eq!(d.history().len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn timeout_behaves_as_scheduled_cancellation() {
        let d = dispatcher();
        let started = Instant::now();
        let snap = d
            .submit_with(
                "sleep 5",
                SubmitOptions {
                    elevated: false,
                    timeout: Some(Duration::from_millis(300)),
                },
            )
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(snap.state, ExecutionState::Cancelled);
        assert!(snap.stderr.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    #[cfg(unix)]
    fn try_outcome_is_nonblocking_until_terminal() {
        let d = dispatcher();
        let handle = d.submit("sleep 5").unwrap();
        assert!(handle.try_outcome().is_none());

        wait_for_running(&d, handle.id());
        assert!(d.running().iter().any(|s| s.id == handle.id()));

        d.cancel(handle.id());
        let snap = handle.wait().unwrap();
        assert_eq!(snap.state, ExecutionState::Cancelled);
        assert!(d.running().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn elevated_submissions_are_distinguishable() {
        let d = dispatcher();
        let plain = d.submit("echo marker").unwrap().wait().unwrap();
        let elevated = d
            .submit_with(
                "echo marker",
                SubmitOptions {
                    elevated: true,
                    timeout: Some(Duration::from_secs(10)),
                },
            )
            .unwrap()
            .wait()
            .unwrap();

        assert!(!plain.elevated);
        assert!(elevated.elevated);
        assert!(elevated.state.is_terminal());
        // Depending on the host: passwordless sudo completes, a denial is an
        // elevation failure, and a missing sudo binary is a spawn failure.
        match elevated.state {
            ExecutionState::Completed => assert_eq!(elevated.stdout, "marker\n"),
            ExecutionState::Failed => assert!(elevated.failure.is_some()),
            other => panic!("unexpected elevated outcome: {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn explicit_cleanup_clears_terminal_entries_and_history() {
        let d = dispatcher();
        let handle = d.submit("echo bye").unwrap();
        handle.wait().unwrap();

        assert!(d.remove_execution(handle.id()));
        assert!(d.execution(handle.id()).is_none());
        assert!(!d.remove_execution(handle.id()));

        d.clear_history();
        assert!(d.history().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn history_keeps_every_submission_regardless_of_outcome() {
        let d = dispatcher();
        let ok = d.submit("true").unwrap();
        let bad = d.submit("exit 3").unwrap();
        let cancelled = d.submit("sleep 5").unwrap();
        wait_for_running(&d, cancelled.id());
        d.cancel(cancelled.id());

        ok.wait().unwrap();
        bad.wait().unwrap();
        cancelled.wait().unwrap();

        let raws: Vec<String> = d.history().into_iter().map(|r| r.raw).collect();
        assert_eq!(raws, vec!["true", "exit 3", "sleep 5"]);
    }
}
