//! Process-wide path resolution: project root, database file, plan/prompt
//! directories, and IPC socket/PID paths (spec.md §2 "Context", §6
//! "Persistent state layout").

use anyhow::{Context as _, Result};
use std::path::PathBuf;

/// All Fuel state lives under `.fuel/` in the project root by default.
const FUEL_DIR: &str = ".fuel";

#[derive(Debug, Clone)]
pub struct Context {
    pub project_root: PathBuf,
    pub fuel_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub pid_path: PathBuf,
    pub socket_path: PathBuf,
    pub plans_dir: PathBuf,
    pub mirrors_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub reality_path: PathBuf,
}

impl Context {
    /// Resolve a `Context` for `project_root`, honoring `FUEL_CWD` and
    /// `FUEL_CONFIG` overrides (spec.md §6).
    pub fn resolve(project_root: Option<PathBuf>) -> Result<Self> {
        let project_root = match project_root.or_else(|| std::env::var_os("FUEL_CWD").map(PathBuf::from)) {
            Some(path) => path,
            None => std::env::current_dir().context("failed to resolve current directory")?,
        };
        let project_root = project_root
            .canonicalize()
            .context("failed to resolve project root")?;

        let fuel_dir = project_root.join(FUEL_DIR);
        let config_path = std::env::var_os("FUEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| fuel_dir.join("config.yaml"));

        Ok(Self {
            db_path: fuel_dir.join("agent.db"),
            pid_path: fuel_dir.join("consume.pid"),
            socket_path: fuel_dir.join("consume.sock"),
            plans_dir: fuel_dir.join("plans"),
            mirrors_dir: fuel_dir.join("mirrors"),
            runs_dir: fuel_dir.join("runs"),
            logs_dir: fuel_dir.join("logs"),
            templates_dir: fuel_dir.join("templates"),
            reality_path: fuel_dir.join("reality.md"),
            config_path,
            fuel_dir,
            project_root,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.fuel_dir,
            &self.plans_dir,
            &self.mirrors_dir,
            &self.runs_dir,
            &self.logs_dir,
            &self.templates_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn run_log_path(&self, run_short_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{run_short_id}.log"))
    }
}
