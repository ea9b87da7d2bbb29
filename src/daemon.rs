//! Daemon Loop / Lifecycle (spec.md §4.10, §6, §9): boots every service,
//! binds the IPC socket, and drives the single `tokio::select!` loop
//! that ties the scheduler tick, IPC commands, supervisor completions,
//! and OS signals together.
//!
//! Grounded in `dag/executor.rs`'s main loop — poll a tick source, drain
//! a result channel, dispatch the next wave — generalized from a
//! fire-once DAG executor to a long-running daemon with an extra arm for
//! inbound IPC commands and OS signal handling, plus other_examples'
//! process-supervisor patterns for the PID-file/graceful-shutdown
//! bookkeeping.

use crate::completion::CompletionHandler;
use crate::config::Config;
use crate::context::Context;
use crate::epics::EpicService;
use crate::errors::ConfigError;
use crate::health::HealthTracker;
use crate::ipc::{self, Broadcaster, CommandContext, DispatchOutcome, IpcServer};
use crate::mirror::MirrorManager;
use crate::review::ReviewService;
use crate::snapshot::SnapshotBuilder;
use crate::spawner::TaskSpawner;
use crate::store::Store;
use crate::supervisor::{ProcessSupervisor, SupervisorEvent};
use crate::tasks::TaskService;
use chrono::{DateTime, Utc};
use fuel_common::Event;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Exit codes of the daemon process (spec.md §6 "Exit codes").
pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL_INIT: i32 = 1;
pub const EXIT_ALREADY_RUNNING: i32 = 2;
pub const EXIT_SIGINT: i32 = 130;

/// Contents of `.fuel/consume.pid` (spec.md §6 "a PID file with `{pid,
/// port|path, started_at, instance_id}`").
#[derive(Debug, Serialize, Deserialize)]
struct PidFile {
    pid: u32,
    path: String,
    started_at: DateTime<Utc>,
    instance_id: Uuid,
}

/// True if `pid` names a process that is still alive, by sending signal
/// 0 (spec.md §5 "a PID file ... re-acquired iff the prior PID is not
/// alive").
fn process_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Refuses to start a second instance over a live daemon's PID file;
/// returns `Ok(())` when it's safe to proceed (no file, or a stale one).
fn check_existing_instance(ctx: &Context) -> anyhow::Result<()> {
    let Ok(raw) = std::fs::read_to_string(&ctx.pid_path) else { return Ok(()) };
    let Ok(existing) = serde_json::from_str::<PidFile>(&raw) else { return Ok(()) };
    if process_is_alive(existing.pid) {
        anyhow::bail!("another instance is already running (pid {})", existing.pid);
    }
    Ok(())
}

fn write_pid_file(ctx: &Context, pid: u32, instance_id: Uuid, started_at: DateTime<Utc>) -> anyhow::Result<()> {
    let contents = serde_json::to_string(&PidFile {
        pid,
        path: ctx.socket_path.display().to_string(),
        started_at,
        instance_id,
    })?;
    crate::util::atomic_write(&ctx.pid_path, &contents)
}

/// Initializes `tracing` with a rolling log file under `.fuel/logs/` and
/// an `EnvFilter` read from `FUEL_LOG_LEVEL` (spec.md §1.1 "module-scoped
/// targets ... controlled by `FUEL_LOG_LEVEL`"). Returns the appender
/// guard; dropping it flushes and stops the background writer, so the
/// caller must hold it for the process lifetime.
fn init_logging(ctx: &Context) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(&ctx.logs_dir, "consume.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = tracing_subscriber::EnvFilter::try_from_env("FUEL_LOG_LEVEL")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    guard
}

/// Everything one running daemon instance owns. No hidden globals: every
/// piece of mutable or shared state is a named field here, constructed
/// once at startup (spec.md §2 module list).
pub struct Daemon {
    ctx: Arc<Context>,
    config: Config,
    store: Arc<Store>,
    supervisor: Arc<ProcessSupervisor>,
    health: Arc<HealthTracker>,
    spawner: Arc<TaskSpawner>,
    completion: CompletionHandler,
    review: Arc<ReviewService>,
    mirror: Arc<MirrorManager>,
    tasks: TaskService,
    snapshot_builder: SnapshotBuilder,
    broadcaster: Arc<Broadcaster>,
    instance_id: Uuid,
    paused: bool,
    started_at: DateTime<Utc>,
}

impl Daemon {
    fn new(
        ctx: Arc<Context>,
        config: Config,
        store: Arc<Store>,
        supervisor: Arc<ProcessSupervisor>,
        broadcaster: Arc<Broadcaster>,
        instance_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Self {
        let health = Arc::new(HealthTracker::new());
        let spawner = Arc::new(TaskSpawner::new(Arc::clone(&store), Arc::clone(&ctx), Arc::clone(&health), Arc::clone(&supervisor)));
        let review = Arc::new(ReviewService::new(Arc::clone(&store), Arc::clone(&ctx), Arc::clone(&supervisor)));
        let mirror = Arc::new(MirrorManager::new(Arc::clone(&store), Arc::clone(&ctx)));
        let completion = CompletionHandler::new(
            Arc::clone(&store),
            Arc::clone(&ctx),
            Arc::clone(&health),
            Arc::clone(&spawner),
            Arc::clone(&review),
            Arc::clone(&mirror),
        );
        let tasks = TaskService::new(Arc::clone(&store));

        Self {
            ctx,
            config,
            store,
            supervisor,
            health,
            spawner,
            completion,
            review,
            mirror,
            tasks,
            snapshot_builder: SnapshotBuilder::new(),
            broadcaster,
            instance_id,
            paused: false,
            started_at,
        }
    }

    fn epics(&self) -> EpicService {
        EpicService::new(Arc::clone(&self.store), Arc::clone(&self.ctx))
    }

    /// Runs one tick: recompute + spawn ready work, then broadcast a
    /// snapshot if the board actually changed (spec.md §4.10 "broadcasts
    /// on change, on `RequestSnapshot`, and at the tick interval").
    async fn on_tick(&self) {
        if self.paused {
            return;
        }
        if self.config.epic_mirrors {
            self.run_mirror_tick().await;
        }
        if let Err(e) = self.spawner.tick(&self.config).await {
            warn!(error = %e, "spawner tick failed");
        }
        self.broadcast_snapshot_if_changed();
    }

    /// Drives epics with `mirror_status==none` through worktree creation
    /// (spec.md §4.9 "On epic creation with mirrors enabled ... A
    /// background step copies or clones the project"). Idempotent: once
    /// an epic leaves `none`, `MirrorManager::ensure_mirror` is a no-op
    /// for it on later ticks.
    async fn run_mirror_tick(&self) {
        let epics = match self.store.all_epics() {
            Ok(epics) => epics,
            Err(e) => {
                warn!(error = %e, "failed to load epics for mirror tick");
                return;
            }
        };
        for epic in epics.into_iter().filter(|e| e.mirror_status == fuel_common::MirrorStatus::None) {
            if let Err(e) = self.mirror.ensure_mirror(&epic).await {
                warn!(epic = %epic.short_id, error = %e, "mirror creation failed");
            }
        }
    }

    fn broadcast_snapshot_if_changed(&self) {
        match self.snapshot_builder.build_if_changed(&self.store, &self.health, &self.config, &self.instance_id.to_string(), self.started_at, self.paused) {
            Ok(Some(snapshot)) => self.broadcaster.broadcast(&Event::Snapshot(snapshot)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to build snapshot"),
        }
    }

    /// `RequestSnapshot` (explicit, or the implicit one `ipc::handle_client`
    /// sends on connect) always gets an unconditional snapshot sent to
    /// just that client, bypassing the change-suppression used for the
    /// broadcast path (spec.md §4.10 "Each client receives ... an initial
    /// `Snapshot`").
    fn send_snapshot_to(&self, client_id: u64) {
        match self.snapshot_builder.build(&self.store, &self.health, &self.config, &self.instance_id.to_string(), self.started_at, self.paused) {
            Ok(snapshot) => self.broadcaster.send_to(client_id, None, &Event::Snapshot(snapshot)),
            Err(e) => warn!(error = %e, "failed to build snapshot for client"),
        }
    }

    async fn on_supervisor_event(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::OutputChunk { task_id, run_id, chunk } => {
                let task_short_id = self.store.find_task_by_id(task_id).ok().flatten().map(|t| t.short_id).unwrap_or_default();
                self.broadcaster.broadcast(&Event::OutputChunk {
                    task_id: task_short_id,
                    run_id: run_id.to_string(),
                    stream: "stdout".to_string(),
                    chunk,
                });
            }
            SupervisorEvent::Completed(result) => {
                let task_short_id = self.store.find_task_by_id(result.task_id).ok().flatten().map(|t| t.short_id).unwrap_or_default();
                let run_id = result.run_id.to_string();
                let status = format!("{:?}", result.completion_type);
                if let Err(e) = self.completion.handle(&self.config, result).await {
                    error!(error = %e, "completion handling failed");
                }
                self.broadcaster.broadcast(&Event::TaskCompleted { task_id: task_short_id, run_id, status });
                self.broadcast_snapshot_if_changed();
            }
        }
    }

    /// Dispatches one IPC command, handling `RequestSnapshot`'s implicit
    /// immediate reply here since that needs the daemon's own snapshot
    /// builder rather than anything `ipc::dispatch` owns.
    async fn on_command(&mut self, incoming: ipc::IncomingCommand) -> DispatchOutcome {
        let is_snapshot_request = matches!(incoming.command, fuel_common::Command::RequestSnapshot);
        let client_id = incoming.client_id;

        let mut cmd_ctx = CommandContext {
            store: &self.store,
            tasks: &self.tasks,
            health: &self.health,
            spawner: &self.spawner,
            config: &mut self.config,
            config_path: &self.ctx.config_path,
            broadcaster: &self.broadcaster,
            instance_id: self.instance_id,
            paused: &mut self.paused,
        };
        let outcome = ipc::dispatch_command(&mut cmd_ctx, incoming).await;

        if is_snapshot_request {
            self.send_snapshot_to(client_id);
        } else {
            self.spawner.invalidate();
        }
        outcome
    }

    async fn shutdown(&self, graceful: bool) {
        let grace = if graceful { Duration::from_secs(self.config.shutdown_grace_seconds) } else { Duration::ZERO };
        self.supervisor.cancel_all(grace).await;
        let _ = std::fs::remove_file(&self.ctx.socket_path);
        let _ = std::fs::remove_file(&self.ctx.pid_path);
    }

    /// The lifecycle loop itself (spec.md §4.10): tick / IPC command /
    /// supervisor completion / OS signal, one `tokio::select!` over all
    /// four for as long as the daemon runs.
    async fn run(mut self, mut commands_rx: mpsc::Receiver<ipc::IncomingCommand>, mut supervisor_rx: mpsc::UnboundedReceiver<SupervisorEvent>) -> i32 {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return EXIT_FATAL_INIT;
            }
        };
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return EXIT_FATAL_INIT;
            }
        };

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(instance_id = %self.instance_id, "daemon started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.on_tick().await;
                }
                Some(incoming) = commands_rx.recv() => {
                    match self.on_command(incoming).await {
                        DispatchOutcome::Continue => {}
                        DispatchOutcome::Shutdown { graceful } => {
                            info!(graceful, "stop requested over ipc");
                            self.shutdown(graceful).await;
                            return EXIT_OK;
                        }
                    }
                    // `SetInterval` may have changed the tick period.
                    let wanted = Duration::from_secs(self.config.interval_seconds.max(1));
                    if interval.period() != wanted {
                        interval = tokio::time::interval(wanted);
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    }
                }
                Some(event) = supervisor_rx.recv() => {
                    self.on_supervisor_event(event).await;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down gracefully");
                    self.shutdown(true).await;
                    return EXIT_OK;
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received, stopping without waiting for children");
                    self.shutdown(false).await;
                    return EXIT_SIGINT;
                }
            }
        }
    }
}

/// Full startup sequence: resolve paths, refuse a second instance, load
/// and validate config, open the store, bind the socket, write the PID
/// file, then hand off to the `tokio::select!` loop (spec.md §6 "Exit
/// codes", §9 "Determinism & concurrency").
pub async fn bootstrap(project_root: Option<std::path::PathBuf>) -> i32 {
    let ctx = match Context::resolve(project_root) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("fuel: failed to resolve project context: {e}");
            return EXIT_FATAL_INIT;
        }
    };
    if let Err(e) = ctx.ensure_directories() {
        eprintln!("fuel: failed to create .fuel directories: {e}");
        return EXIT_FATAL_INIT;
    }

    if let Err(e) = check_existing_instance(&ctx) {
        eprintln!("fuel: {e}");
        return EXIT_ALREADY_RUNNING;
    }

    let _log_guard = init_logging(&ctx);

    let config = match load_config(&ctx.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal config error");
            return EXIT_FATAL_INIT;
        }
    };

    let store = match Store::open(&ctx.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to open store");
            return EXIT_FATAL_INIT;
        }
    };

    let instance_id = Uuid::new_v4();
    let started_at = Utc::now();

    let ipc_server = match IpcServer::bind(&ctx, instance_id, config.client_buffer_bytes) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to bind ipc socket");
            return EXIT_FATAL_INIT;
        }
    };
    let broadcaster = ipc_server.broadcaster();

    if let Err(e) = write_pid_file(&ctx, std::process::id(), instance_id, started_at) {
        error!(error = %e, "failed to write pid file");
        return EXIT_FATAL_INIT;
    }

    let (supervisor, supervisor_rx) = ProcessSupervisor::new();
    let supervisor = Arc::new(supervisor);

    let (commands_tx, commands_rx) = mpsc::channel(256);
    tokio::spawn(ipc_server.serve(commands_tx));

    let daemon = Daemon::new(ctx, config, store, supervisor, broadcaster, instance_id, started_at);
    let code = daemon.run(commands_rx, supervisor_rx).await;
    code
}

fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Io {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file does not exist"),
        });
    }
    let config = Config::load(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_round_trips_through_json() {
        let pid = PidFile { pid: 42, path: "/tmp/x.sock".into(), started_at: Utc::now(), instance_id: Uuid::new_v4() };
        let encoded = serde_json::to_string(&pid).unwrap();
        let decoded: PidFile = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.pid, 42);
    }

    #[test]
    fn dead_pid_is_not_alive() {
        // pid 1 is typically init and alive in any container; a very
        // large pid is virtually guaranteed not to exist.
        assert!(!process_is_alive(u32::MAX - 1));
    }
}
