//! `fuel`: boots the consume daemon, or talks to an already-running one
//! over its IPC socket (spec.md §1 "Deliberately out of scope: the CLI
//! argument parsing around individual subcommands" — this binary only
//! owns the daemon's own lifecycle commands, not a broader CLI surface).

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use fuel::context::Context;
use fuel_common::{Command, Envelope, Event, TaskCreateFields};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fuel")]
#[command(version, about = "Multi-agent code-execution orchestrator")]
struct Cli {
    /// Project root (defaults to $FUEL_CWD, then the current directory).
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the consume daemon in the foreground.
    Consume,
    /// Stop a running daemon.
    Stop {
        /// Wait for in-flight agent processes instead of killing them.
        #[arg(long, default_value_t = true)]
        graceful: bool,
    },
    /// Pause spawning new work without stopping the daemon.
    Pause,
    /// Resume spawning after a pause.
    Resume,
    /// Print the current board snapshot.
    Status,
    /// Reload `.fuel/config.yaml` into a running daemon.
    ReloadConfig,
    /// Change the scheduler tick interval of a running daemon.
    SetInterval { seconds: u64 },
    /// Clear an agent's failure streak and backoff.
    HealthReset { agent: String },
    #[command(subcommand)]
    Task(TaskCommands),
    /// Add a dependency edge (`task_id` is blocked by `blocker_id`).
    DependencyAdd { task_id: String, blocker_id: String },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Spawn a ready task immediately, optionally overriding its agent.
    Start {
        task_id: String,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Return a task to `open` for another attempt.
    Reopen { task_id: String },
    /// Mark a task done.
    Done {
        task_id: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        commit: Option<String>,
    },
    /// Create a new task.
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long)]
        priority: Option<u8>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        complexity: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long = "blocked-by")]
        blocked_by: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = Context::resolve(cli.project_dir.clone()).context("failed to resolve project context")?;

    match cli.command {
        Commands::Consume => {
            ctx.ensure_directories()?;
            let code = fuel::daemon::bootstrap(cli.project_dir).await;
            std::process::exit(code);
        }
        Commands::Stop { graceful } => send(&ctx, Command::Stop { graceful }).await,
        Commands::Pause => send(&ctx, Command::Pause).await,
        Commands::Resume => send(&ctx, Command::Resume).await,
        Commands::Status => send(&ctx, Command::RequestSnapshot).await,
        Commands::ReloadConfig => send(&ctx, Command::ReloadConfig).await,
        Commands::SetInterval { seconds } => send(&ctx, Command::SetInterval { seconds }).await,
        Commands::HealthReset { agent } => send(&ctx, Command::HealthReset { agent }).await,
        Commands::DependencyAdd { task_id, blocker_id } => send(&ctx, Command::DependencyAdd { task_id, blocker_id }).await,
        Commands::Task(task_cmd) => {
            let command = match task_cmd {
                TaskCommands::Start { task_id, agent } => Command::TaskStart { task_id, agent_override: agent },
                TaskCommands::Reopen { task_id } => Command::TaskReopen { task_id },
                TaskCommands::Done { task_id, reason, commit } => {
                    Command::TaskDone { task_id, reason, commit_hash: commit }
                }
                TaskCommands::Create { title, description, labels, priority, task_type, complexity, epic, blocked_by } => {
                    Command::TaskCreate(TaskCreateFields {
                        title,
                        description,
                        labels,
                        priority,
                        task_type,
                        complexity,
                        epic_id: epic,
                        blocked_by,
                    })
                }
            };
            send(&ctx, command).await
        }
    }
}

/// Connects to the running daemon's socket, sends one `Command`, and
/// prints every `Event` it replies with for a short window. Callers that
/// need a running daemon (everything except `consume`) go through here.
async fn send(ctx: &Context, command: Command) -> Result<()> {
    let stream = UnixStream::connect(&ctx.socket_path)
        .await
        .with_context(|| format!("no daemon listening on {}", ctx.socket_path.display()))?;
    let (read_half, mut write_half) = stream.into_split();

    let request_id = Uuid::new_v4();
    let mut payload = serde_json::to_value(&command).context("failed to encode command")?;
    payload
        .as_object_mut()
        .expect("Command serializes to a JSON object")
        .insert("request_id".to_string(), serde_json::Value::String(request_id.to_string()));
    let mut line = serde_json::to_string(&payload)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.context("failed to send command")?;

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), lines.next_line()).await;
        let Ok(Ok(Some(raw))) = next else { break };
        let Ok(envelope) = serde_json::from_str::<Envelope<Event>>(&raw) else { continue };
        print_event(&envelope.body);
        if envelope.request_id == Some(request_id) && !matches!(envelope.body, Event::Hello { .. }) {
            break;
        }
    }
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Hello { .. } => {}
        Event::Snapshot(snapshot) => {
            println!(
                "ready={} in_progress={} review={} blocked={} human={} done={} paused={}",
                snapshot.buckets.ready.len(),
                snapshot.buckets.in_progress.len(),
                snapshot.buckets.review.len(),
                snapshot.buckets.blocked.len(),
                snapshot.buckets.human.len(),
                snapshot.buckets.done.len(),
                snapshot.paused,
            );
        }
        Event::StatusLine { message } => println!("{message}"),
        Event::TaskSpawned { task_id, agent, .. } => println!("spawned {task_id} on {agent}"),
        Event::TaskCompleted { task_id, status, .. } => println!("{task_id} completed: {status}"),
        Event::HealthChange { agent, health } => println!("{agent} health: {:?}", health.status()),
        Event::OutputChunk { .. } => {}
        Event::ConfigReloaded => println!("config reloaded"),
        Event::Error { code, message } => println!("error [{code}]: {message}"),
        Event::ReviewCompleted { task_id, passed, issues, .. } => {
            println!("review of {task_id}: {}", if *passed { "passed".to_string() } else { format!("failed ({issues:?})") })
        }
        Event::TaskCreateResponse { short_id, .. } => println!("created {short_id}"),
        Event::DoneTasks { task_ids } => println!("done: {task_ids:?}"),
        Event::BlockedTasks { task_ids } => println!("blocked: {task_ids:?}"),
        Event::CompletedTasks { task_ids } => println!("completed: {task_ids:?}"),
    }
}
