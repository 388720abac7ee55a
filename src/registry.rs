use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::record::{hash_command, CommandRequest, ExecutionSnapshot, ExecutionState, FailureKind};

/// Terminal result a worker reports back for one execution.
pub struct TerminalOutcome {
    pub state: ExecutionState, // Completed, Failed or Cancelled
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
}

/// What happened to a cancellation request.
pub enum CancelOutcome {
    /// Entry was still Pending; it is now Cancelled and will never spawn.
    CancelledBeforeStart,
    /// Entry was Running; the worker has been signalled to kill the child.
    Signalled,
    /// Terminal or unknown id; state untouched.
    NotCancellable,
}

struct Slot {
    snapshot: ExecutionSnapshot,
    cancel: Arc<AtomicBool>,
}

struct Inner {
    slots: HashMap<u64, Slot>,
    // Terminal entries in completion order, oldest first
    finished: VecDeque<u64>,
}

/// Owns every execution from creation to removal. Workers report transitions
/// into it; transitions are monotonic and terminal states are absorbing, so
/// a cancellation racing a natural exit resolves to exactly one outcome.
pub struct ExecutionRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    retain_terminal: usize,
}

impl ExecutionRegistry {
    /// `retain_terminal` bounds how many finished entries are kept (0 keeps
    /// everything). Live entries are never evicted.
    pub fn new(retain_terminal: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                finished: VecDeque::new(),
            }),
            next_id: AtomicU64::new(1),
            retain_terminal,
        }
    }

    pub fn create(&self, request: CommandRequest, elevated: bool) -> (u64, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        let snapshot = ExecutionSnapshot {
            id,
            command_hash: hash_command(&request.resolved),
            request,
            state: ExecutionState::Pending,
            stdout: String::new(),
            stderr: String::new(),
            started_at: None,
            ended_at: None,
            exit_code: None,
            failure: None,
            elevated,
        };
        let mut inner = self.inner.lock().expect("registry lock");
        inner.slots.insert(
            id,
            Slot {
                snapshot,
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }

    pub fn get(&self, id: u64) -> Option<ExecutionSnapshot> {
        let inner = self.inner.lock().expect("registry lock");
        inner.slots.get(&id).map(|slot| slot.snapshot.clone())
    }

    pub fn list(&self) -> Vec<ExecutionSnapshot> {
        let inner = self.inner.lock().expect("registry lock");
        let mut all: Vec<ExecutionSnapshot> =
            inner.slots.values().map(|s| s.snapshot.clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    pub fn list_running(&self) -> Vec<ExecutionSnapshot> {
        self.list()
            .into_iter()
            .filter(|s| s.state == ExecutionState::Running)
            .collect()
    }

    /// Pending -> Running. Refused (false) for any other current state, in
    /// particular when a pending cancellation already made the entry terminal.
    pub fn mark_running(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().expect("registry lock");
        match inner.slots.get_mut(&id) {
            Some(slot) if slot.snapshot.state == ExecutionState::Pending => {
                slot.snapshot.state = ExecutionState::Running;
                slot.snapshot.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Record the terminal outcome for an execution. Returns the final
    /// snapshot, or None when the entry is unknown, already terminal, or the
    /// outcome state is not terminal — the first recorded outcome stands.
    pub fn finish(&self, id: u64, outcome: TerminalOutcome) -> Option<ExecutionSnapshot> {
        let mut inner = self.inner.lock().expect("registry lock");
        Self::finish_locked(&mut inner, self.retain_terminal, id, outcome)
    }

    fn finish_locked(
        inner: &mut Inner,
        retain_terminal: usize,
        id: u64,
        outcome: TerminalOutcome,
    ) -> Option<ExecutionSnapshot> {
        if !outcome.state.is_terminal() {
            return None;
        }
        let snapshot = {
            let slot = inner.slots.get_mut(&id)?;
            if slot.snapshot.state.is_terminal() {
                return None;
            }
            slot.snapshot.state = outcome.state;
            slot.snapshot.stdout = outcome.stdout;
            slot.snapshot.stderr = outcome.stderr;
            slot.snapshot.exit_code = outcome.exit_code;
            slot.snapshot.failure = outcome.failure;
            slot.snapshot.ended_at = Some(Utc::now());
            slot.snapshot.clone()
        };
        inner.finished.push_back(id);
        if retain_terminal > 0 {
            while inner.finished.len() > retain_terminal {
                if let Some(old) = inner.finished.pop_front() {
                    inner.slots.remove(&old);
                }
            }
        }
        Some(snapshot)
    }

    /// Route a cancellation request to the right mechanism for the entry's
    /// current state, atomically with respect to worker transitions. Best
    /// effort for a Running entry: this only signals the worker; the
    /// definitive outcome is whatever terminal state it records.
    pub fn request_cancel(&self, id: u64) -> CancelOutcome {
        let mut inner = self.inner.lock().expect("registry lock");
        let state = match inner.slots.get(&id) {
            Some(slot) => {
                slot.cancel.store(true, Ordering::SeqCst);
                slot.snapshot.state
            }
            None => return CancelOutcome::NotCancellable,
        };
        match state {
            ExecutionState::Pending => {
                // Never spawned; resolve it right here
                Self::finish_locked(
                    &mut inner,
                    self.retain_terminal,
                    id,
                    TerminalOutcome {
                        state: ExecutionState::Cancelled,
                        stdout: String::new(),
                        stderr: String::new(),
                        exit_code: None,
                        failure: None,
                    },
                );
                CancelOutcome::CancelledBeforeStart
            }
            ExecutionState::Running => CancelOutcome::Signalled,
            _ => CancelOutcome::NotCancellable,
        }
    }

    /// Explicit cleanup of a terminal entry. Live entries are kept.
    pub fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().expect("registry lock");
        let terminal = inner
            .slots
            .get(&id)
            .map(|slot| slot.snapshot.state.is_terminal())
            .unwrap_or(false);
        if terminal {
            inner.slots.remove(&id);
            inner.finished.retain(|&fid| fid != id);
        }
        terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn request(text: &str) -> CommandRequest {
        CommandRequest::new(text, text)
    }

    fn completed(stdout: &str) -> TerminalOutcome {
        TerminalOutcome {
            state: ExecutionState::Completed,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            failure: None,
        }
    }

    #[test]
    fn lifecycle_is_monotonic() {
        let registry = ExecutionRegistry::new(0);
        let (id, _cancel) = registry.create(request("echo hi"), false);

        assert_eq!(registry.get(id).unwrap().state, ExecutionState::Pending);
        assert!(registry.mark_running(id));
        assert!(!registry.mark_running(id), "Running -> Running refused");

        let snap = registry.finish(id, completed("hi\n")).unwrap();
        assert_eq!(snap.state, ExecutionState::Completed);
        assert!(snap.ended_at.is_some());
        assert!(snap.started_at.is_some());

        // Terminal is absorbing
        assert!(registry.finish(id, completed("again")).is_none());
        assert!(!registry.mark_running(id));
        assert_eq!(registry.get(id).unwrap().stdout, "hi\n");
    }

    #[test]
    fn spawn_failure_skips_running() {
        let registry = ExecutionRegistry::new(0);
        let (id, _cancel) = registry.create(request("nope"), false);
        let snap = registry
            .finish(
                id,
                TerminalOutcome {
                    state: ExecutionState::Failed,
                    stdout: String::new(),
                    stderr: "no such interpreter".to_string(),
                    exit_code: None,
                    failure: Some(FailureKind::Spawn),
                },
            )
            .unwrap();
        assert_eq!(snap.state, ExecutionState::Failed);
        assert!(snap.started_at.is_none());
        assert!(snap.exit_code.is_none());
        assert_eq!(snap.failure, Some(FailureKind::Spawn));
    }

    #[test]
    fn cancel_routes_by_state() {
        let registry = ExecutionRegistry::new(0);

        let (pending, pending_flag) = registry.create(request("sleep 5"), false);
        assert!(matches!(
            registry.request_cancel(pending),
            CancelOutcome::CancelledBeforeStart
        ));
        assert!(pending_flag.load(Ordering::SeqCst));
        assert_eq!(
            registry.get(pending).unwrap().state,
            ExecutionState::Cancelled
        );

        let (running, flag) = registry.create(request("sleep 5"), false);
        registry.mark_running(running);
        assert!(matches!(
            registry.request_cancel(running),
            CancelOutcome::Signalled
        ));
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(registry.get(running).unwrap().state, ExecutionState::Running);

        // Terminal and unknown ids are not cancellable
        assert!(matches!(
            registry.request_cancel(pending),
            CancelOutcome::NotCancellable
        ));
        assert!(matches!(
            registry.request_cancel(9999),
            CancelOutcome::NotCancellable
        ));
    }

    #[test]
    fn concurrent_finishes_both_land() {
        let registry = Arc::new(ExecutionRegistry::new(0));
        let (a, _) = registry.create(request("echo a"), false);
        let (b, _) = registry.create(request("echo b"), false);
        registry.mark_running(a);
        registry.mark_running(b);

        let ra = registry.clone();
        let rb = registry.clone();
        let ta = thread::spawn(move || ra.finish(a, completed("a\n")));
        let tb = thread::spawn(move || rb.finish(b, completed("b\n")));
        assert!(ta.join().unwrap().is_some());
        assert!(tb.join().unwrap().is_some());

        assert_eq!(registry.get(a).unwrap().stdout, "a\n");
        assert_eq!(registry.get(b).unwrap().stdout, "b\n");
    }

    #[test]
    fn terminal_retention_evicts_oldest_only() {
        let registry = ExecutionRegistry::new(2);
        let mut ids = Vec::new();
        for i in 0..4 {
            let (id, _) = registry.create(request(&format!("echo {i}")), false);
            registry.mark_running(id);
            ids.push(id);
        }
        // Keep the last one running; finish the first three in order
        for &id in &ids[..3] {
            registry.finish(id, completed("")).unwrap();
        }

        assert!(registry.get(ids[0]).is_none(), "oldest terminal evicted");
        assert!(registry.get(ids[1]).is_some());
        assert!(registry.get(ids[2]).is_some());
        assert_eq!(
            registry.get(ids[3]).unwrap().state,
            ExecutionState::Running,
            "live entries are never evicted"
        );
    }

    #[test]
    fn remove_only_clears_terminal_entries() {
        let registry = ExecutionRegistry::new(0);
        let (live, _) = registry.create(request("sleep 1"), false);
        registry.mark_running(live);
        assert!(!registry.remove(live));

        let (done, _) = registry.create(request("echo"), false);
        registry.mark_running(done);
        registry.finish(done, completed("")).unwrap();
        assert!(registry.remove(done));
        assert!(registry.get(done).is_none());
    }
}
