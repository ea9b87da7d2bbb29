//! Process Supervisor (spec.md §4.4): spawns a driver's child process,
//! streams its stdout, and reaps it into a classified `CompletionResult`.
//!
//! Grounded in `factory/agent_executor.rs`'s `AgentExecutor`: a
//! `tokio::process::Command` spawn, a `BufReader::lines()` stdout reader
//! running on its own task, and a `running` map keyed by id so
//! cancellation can reach a live child. The event-sourcing (one channel
//! the daemon loop drains) replaces that file's direct WebSocket
//! broadcast, since here the consumer is the Completion Handler, not a
//! browser client.

mod ring;

use crate::drivers::stream;
use crate::drivers::DriverDefinition;
use dashmap::DashMap;
use fuel_common::{CompletionResult, CompletionType};
use ring::RingBuffer;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

const OUTPUT_BUFFER_CAP: usize = 16 * 1024;

/// Everything the Supervisor needs to launch one run, already resolved
/// by the Spawner (agent/driver lookup, prompt, cwd) — the Supervisor
/// itself only knows how to run a process and classify its exit.
pub struct SpawnRequest {
    pub run_id: i64,
    pub task_id: i64,
    pub agent_name: String,
    pub driver: DriverDefinition,
    pub model: Option<String>,
    pub max_concurrent: u32,
    pub env: Vec<(String, String)>,
    pub prompt: String,
    pub cwd: PathBuf,
    pub output_path: PathBuf,
}

/// Outcome of a spawn attempt (spec.md §4.4 step 6).
#[derive(Debug)]
pub enum SpawnResult {
    Success { run_id: i64, pid: u32 },
    AtCapacity,
    AgentNotFound,
    SpawnFailed(String),
}

/// Events the Supervisor publishes as a running child produces output or
/// exits; the daemon loop drains these and hands `Completed` to the
/// Completion Handler (spec.md §6 "serialized event channel").
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    OutputChunk { task_id: i64, run_id: i64, chunk: String },
    Completed(CompletionResult),
}

struct RunningChild {
    pid: u32,
    agent_name: String,
}

pub struct ProcessSupervisor {
    pub(crate) active: DashMap<String, AtomicU32>,
    running: DashMap<i64, RunningChild>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ProcessSupervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (Self { active: DashMap::new(), running: DashMap::new(), events_tx }, events_rx)
    }

    fn active_count(&self, agent: &str) -> u32 {
        self.active.get(agent).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }

    /// Whether `agent` has a free slot under `max_concurrent` right now.
    /// Exposed so the Spawner can check capacity *before* allocating a
    /// `Run` row (spec.md §8: "Agent at `maxConcurrent` ... does not
    /// start a Run row"); `spawn` re-checks the same condition itself as
    /// the authoritative guard against a race between the check and the
    /// actual launch.
    pub fn has_capacity(&self, agent: &str, max_concurrent: u32) -> bool {
        self.active_count(agent) < max_concurrent
    }

    /// Spawns one run (spec.md §4.4 steps 1-6). On success, a background
    /// task owns the child for the rest of its life and reports back
    /// through `events_tx`.
    pub async fn spawn(self: &Arc<Self>, req: SpawnRequest) -> SpawnResult {
        let current = self.active_count(&req.agent_name);
        if current >= req.max_concurrent {
            return SpawnResult::AtCapacity;
        }

        let argv = req.driver.build_argv(req.model.as_deref(), &req.prompt);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&req.cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &req.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SpawnResult::AgentNotFound,
            Err(e) => return SpawnResult::SpawnFailed(e.to_string()),
        };

        let pid = match child.id() {
            Some(pid) => pid,
            None => return SpawnResult::SpawnFailed("child exited before pid was observed".to_string()),
        };

        self.active
            .entry(req.agent_name.clone())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::SeqCst);
        self.running.insert(req.run_id, RunningChild { pid, agent_name: req.agent_name.clone() });

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let supervisor = Arc::clone(self);
        let run_id = req.run_id;
        let task_id = req.task_id;
        let agent_name = req.agent_name.clone();
        let output_path = req.output_path.clone();

        tokio::spawn(async move {
            supervisor.drive_child(run_id, task_id, agent_name, child, stdout, stderr, output_path).await;
        });

        SpawnResult::Success { run_id, pid }
    }

    /// Streams stdout/stderr, classifies the exit, and publishes
    /// `Completed` once the child has been fully reaped (spec.md §4.4
    /// "Streaming" and "Reap").
    #[allow(clippy::too_many_arguments)]
    async fn drive_child(
        self: Arc<Self>,
        run_id: i64,
        task_id: i64,
        agent_name: String,
        mut child: tokio::process::Child,
        stdout: Option<tokio::process::ChildStdout>,
        stderr: Option<tokio::process::ChildStderr>,
        output_path: PathBuf,
    ) {
        let started = std::time::Instant::now();
        let mut ring = RingBuffer::new(OUTPUT_BUFFER_CAP);
        let mut session_id = None;
        let mut cost_usd = None;

        let mut log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&output_path)
            .await
            .ok();

        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if session_id.is_none() {
                    session_id = stream::extract_session_id(&line);
                }
                if let Some(cost) = stream::extract_cost(&line) {
                    cost_usd = Some(cost);
                }
                ring.push_line(&line);
                if let Some(file) = log_file.as_mut() {
                    use tokio::io::AsyncWriteExt;
                    let _ = file.write_all(line.as_bytes()).await;
                    let _ = file.write_all(b"\n").await;
                }
                let _ = self.events_tx.send(SupervisorEvent::OutputChunk {
                    task_id,
                    run_id,
                    chunk: line,
                });
            }
        }

        let mut stderr_text = String::new();
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_text.push_str(&line);
                stderr_text.push('\n');
                ring.push_line(&line);
            }
        }

        let status = child.wait().await;
        self.running.remove(&run_id);
        if let Some(counter) = self.active.get(&agent_name) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }

        let (exit_code, completion_type) = match status {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                let completion_type = if code == 0 {
                    CompletionType::Success
                } else if stream::is_permission_denied(&stderr_text) {
                    CompletionType::PermissionBlocked
                } else if stream::is_network_error(&stderr_text) {
                    CompletionType::NetworkError
                } else {
                    CompletionType::Failed
                };
                (code, completion_type)
            }
            Err(_) => (-1, CompletionType::Failed),
        };

        let result = CompletionResult {
            task_id,
            run_id,
            agent_name,
            exit_code,
            duration_seconds: started.elapsed().as_secs_f64(),
            session_id,
            cost_usd,
            output_excerpt: ring.into_string(),
            completion_type,
        };
        let _ = self.events_tx.send(SupervisorEvent::Completed(result));
    }

    /// Cancellation (spec.md §4.4): SIGTERM, wait `grace`, then SIGKILL.
    /// Returns immediately if the run is no longer tracked (already
    /// reaped).
    pub async fn cancel(&self, run_id: i64, grace: Duration) {
        let pid = match self.running.get(&run_id) {
            Some(entry) => entry.pid,
            None => return,
        };
        send_signal(pid, libc::SIGTERM);
        tokio::time::sleep(grace).await;
        if self.running.contains_key(&run_id) {
            send_signal(pid, libc::SIGKILL);
        }
    }

    /// Cancels every tracked run (shutdown path, spec.md §6 "forceful
    /// stop SIGKILLs immediately" when `grace` is zero).
    pub async fn cancel_all(&self, grace: Duration) {
        let run_ids: Vec<i64> = self.running.iter().map(|e| *e.key()).collect();
        for run_id in run_ids {
            self.cancel(run_id, grace).await;
        }
    }
}

fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as i32, signal);
    }
}
