use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::record::{ExecutionSnapshot, ExecutionState, FailureKind};
use crate::registry::{ExecutionRegistry, TerminalOutcome};

#[cfg(unix)]
const DEFAULT_SHELL: &str = "sh";
#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd";

#[cfg(unix)]
const SHELL_FLAG: &str = "-c";
#[cfg(windows)]
const SHELL_FLAG: &str = "/C";

pub fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

/// Caps how many workers may run their child process at once. Workers block
/// here, submitters never do; a limit of 0 means unbounded, which matches
/// the historical behavior of the system this replaces.
pub struct WorkerGate {
    limit: usize,
    active: Mutex<usize>,
    freed: Condvar,
}

pub struct GateGuard<'a> {
    gate: &'a WorkerGate,
    held: bool,
}

impl WorkerGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            active: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    /// Blocks until a slot is free. Returns None when `cancel` is set while
    /// waiting, so a queued execution can be abandoned without ever spawning.
    pub fn acquire(&self, cancel: &AtomicBool) -> Option<GateGuard<'_>> {
        if self.limit == 0 {
            return Some(GateGuard {
                gate: self,
                held: false,
            });
        }
        let mut active = self.active.lock().expect("gate lock");
        loop {
            if cancel.load(Ordering::SeqCst) {
                return None;
            }
            if *active < self.limit {
                *active += 1;
                return Some(GateGuard {
                    gate: self,
                    held: true,
                });
            }
            // Wake periodically to observe cancellation of queued work
            let (guard, _) = self
                .freed
                .wait_timeout(active, Duration::from_millis(50))
                .expect("gate lock");
            active = guard;
        }
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            *self.gate.active.lock().expect("gate lock") -= 1;
            self.gate.freed.notify_one();
        }
    }
}

/// Everything a worker needs to supervise one execution.
pub struct ExecutionJob {
    pub id: u64,
    pub command: String,                 // Resolved command text
    pub timeout: Option<Duration>,       // Deadline-scheduled cancellation
    pub cancel: Arc<AtomicBool>,         // Shared with the registry
    pub done: Sender<ExecutionSnapshot>, // Receives the terminal snapshot once
}

/// Runs one OS command per dedicated worker thread: spawn through the
/// platform shell, capture both streams to EOF, honor cancellation, and
/// report exactly one terminal outcome into the registry.
pub struct ProcessExecutor {
    registry: Arc<ExecutionRegistry>,
    gate: Arc<WorkerGate>,
    shell: String,
    poll_interval: Duration,
}

impl ProcessExecutor {
    pub fn new(
        registry: Arc<ExecutionRegistry>,
        gate: Arc<WorkerGate>,
        shell: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            gate,
            shell: shell.unwrap_or_else(default_shell),
            poll_interval,
        }
    }

    pub fn start(&self, job: ExecutionJob) -> JoinHandle<()> {
        self.spawn_worker(job, false)
    }

    /// Same contract as `start`, but the command runs through the platform's
    /// privilege escalation. Escalation failure surfaces as a Failed state;
    /// there is no fallback to unelevated execution.
    pub fn start_elevated(&self, job: ExecutionJob) -> JoinHandle<()> {
        self.spawn_worker(job, true)
    }

    fn spawn_worker(&self, job: ExecutionJob, elevated: bool) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let gate = self.gate.clone();
        let shell = self.shell.clone();
        let poll_interval = self.poll_interval;
        thread::spawn(move || supervise(registry, gate, shell, poll_interval, job, elevated))
    }
}

fn supervise(
    registry: Arc<ExecutionRegistry>,
    gate: Arc<WorkerGate>,
    shell: String,
    poll_interval: Duration,
    job: ExecutionJob,
    elevated: bool,
) {
    let ExecutionJob {
        id,
        command,
        timeout,
        cancel,
        done,
    } = job;

    // A cancel observed before spawn means the registry already resolved the
    // entry to Cancelled; deliver that snapshot and stop.
    let _slot = match gate.acquire(&cancel) {
        Some(slot) => slot,
        None => {
            send_current(&registry, id, &done);
            return;
        }
    };
    if cancel.load(Ordering::SeqCst) {
        send_current(&registry, id, &done);
        return;
    }

    if elevated && !cfg!(unix) {
        let snapshot = registry.finish(
            id,
            TerminalOutcome {
                state: ExecutionState::Failed,
                stdout: String::new(),
                stderr: "privilege escalation is not available on this platform".to_string(),
                exit_code: None,
                failure: Some(FailureKind::Elevation),
            },
        );
        deliver(snapshot, &registry, id, &done);
        return;
    }

    let mut child = match build_command(&shell, &command, elevated)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            let snapshot = registry.finish(
                id,
                TerminalOutcome {
                    state: ExecutionState::Failed,
                    stdout: String::new(),
                    stderr: format!("failed to spawn {shell}: {err}"),
                    exit_code: None,
                    failure: Some(FailureKind::Spawn),
                },
            );
            deliver(snapshot, &registry, id, &done);
            return;
        }
    };

    if !registry.mark_running(id) {
        // Lost the race with a pending cancellation; the recorded state stands
        kill_process_tree(&mut child);
        send_current(&registry, id, &done);
        return;
    }

    let stdout_handle = child.stdout.take().map(spawn_reader);
    let stderr_handle = child.stderr.take().map(spawn_reader);

    let started = Instant::now();
    let mut killed = false;
    let mut timed_out = false;
    let mut poll_error = None;
    let mut exit_code = None;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                exit_code = Some(status.code().unwrap_or(-1));
                break;
            }
            Ok(None) => {
                let deadline_hit = timeout.map(|t| started.elapsed() >= t).unwrap_or(false);
                if cancel.load(Ordering::SeqCst) || deadline_hit {
                    kill_process_tree(&mut child);
                    killed = true;
                    timed_out = deadline_hit && !cancel.load(Ordering::SeqCst);
                    break;
                }
                thread::sleep(poll_interval);
            }
            Err(err) => {
                kill_process_tree(&mut child);
                poll_error = Some(format!("failed to poll process status: {err}"));
                break;
            }
        }
    }

    // Killed or not, the pipes are closed now, so both readers reach EOF and
    // hand back whatever was produced.
    let stdout = collect_reader(stdout_handle);
    let mut stderr = collect_reader(stderr_handle);

    let outcome = if killed {
        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "command timed out after {}ms\n",
                timeout.unwrap_or_default().as_millis()
            ));
        }
        TerminalOutcome {
            state: ExecutionState::Cancelled,
            stdout,
            stderr,
            exit_code: None,
            failure: None,
        }
    } else if let Some(message) = poll_error {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&message);
        TerminalOutcome {
            state: ExecutionState::Failed,
            stdout,
            stderr,
            exit_code: None,
            failure: Some(FailureKind::Runtime),
        }
    } else {
        let code = exit_code.unwrap_or(-1);
        if code == 0 {
            TerminalOutcome {
                state: ExecutionState::Completed,
                stdout,
                stderr,
                exit_code: Some(code),
                failure: None,
            }
        } else {
            let failure = if elevated && is_elevation_denial(code, &stderr) {
                FailureKind::Elevation
            } else {
                FailureKind::Runtime
            };
            TerminalOutcome {
                state: ExecutionState::Failed,
                stdout,
                stderr,
                exit_code: Some(code),
                failure: Some(failure),
            }
        }
    };

    let snapshot = registry.finish(id, outcome);
    deliver(snapshot, &registry, id, &done);
}

fn build_command(shell: &str, text: &str, elevated: bool) -> Command {
    let mut cmd = if cfg!(unix) && elevated {
        // -n: never prompt; a required password becomes an observable denial
        let mut cmd = Command::new("sudo");
        cmd.arg("-n").arg(shell).arg(SHELL_FLAG).arg(text);
        cmd
    } else {
        let mut cmd = Command::new(shell);
        cmd.arg(SHELL_FLAG).arg(text);
        cmd
    };
    // Detach from the caller's process group so a terminal SIGINT reaches the
    // child only through an explicit cancellation
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

/// Kill the child and everything it forked. The shell runs in its own
/// process group, so signalling the group keeps grandchildren from holding
/// the output pipes open past cancellation.
fn kill_process_tree(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(stream: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut reader = stream;
        let mut buffer = [0u8; 4096];
        let mut collected = Vec::new();
        loop {
            match reader.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => collected.extend_from_slice(&buffer[..n]),
            }
        }
        collected
    })
}

fn collect_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle.and_then(|h| h.join().ok()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).to_string()
}

fn is_elevation_denial(exit_code: i32, stderr: &str) -> bool {
    exit_code == 1 && stderr.lines().any(|line| line.starts_with("sudo:"))
}

fn send_current(registry: &ExecutionRegistry, id: u64, done: &Sender<ExecutionSnapshot>) {
    if let Some(snapshot) = registry.get(id) {
        let _ = done.send(snapshot);
    }
}

fn deliver(
    snapshot: Option<ExecutionSnapshot>,
    registry: &ExecutionRegistry,
    id: u64,
    done: &Sender<ExecutionSnapshot>,
) {
    // finish() refuses when another path already recorded a terminal state;
    // the recorded state is still the one to report.
    match snapshot {
        Some(snapshot) => {
            let _ = done.send(snapshot);
        }
        None => send_current(registry, id, done),
    }
}
