//! End-to-end tests for the `fuel` binary: daemon lifecycle and the IPC
//! commands a client sends to a running instance (spec.md §6 "Exit
//! codes", §4.10 wire protocol).

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process::{Child, Stdio};
use std::time::Duration;
use tempfile::TempDir;

fn fuel() -> Command {
    cargo_bin_cmd!("fuel")
}

fn write_config(dir: &TempDir) {
    let fuel_dir = dir.path().join(".fuel");
    std::fs::create_dir_all(&fuel_dir).unwrap();
    std::fs::write(
        fuel_dir.join("config.yaml"),
        "\
primary: echoagent
agents:
  echoagent:
    driver: claude
    max_concurrent: 2
interval_seconds: 1
",
    )
    .unwrap();
}

/// A `fuel consume` process running against its own temp project, killed
/// on drop so a failing assertion never leaks a daemon between tests.
struct Daemon {
    child: Child,
    dir: TempDir,
}

impl Daemon {
    fn start() -> Self {
        let dir = TempDir::new().unwrap();
        write_config(&dir);
        let child = std::process::Command::new(assert_cmd::cargo::cargo_bin("fuel"))
            .arg("--project-dir")
            .arg(dir.path())
            .arg("consume")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let socket_path = dir.path().join(".fuel/consume.sock");
        for _ in 0..100 {
            if socket_path.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        Daemon { child, dir }
    }

    fn project_dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

mod cli_basics {
    use super::*;

    #[test]
    fn help_and_version_succeed() {
        fuel().arg("--help").assert().success();
        fuel().arg("--version").assert().success();
    }

    #[test]
    fn stop_without_a_running_daemon_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        write_config(&dir);
        fuel()
            .current_dir(dir.path())
            .arg("stop")
            .assert()
            .failure();
    }
}

mod daemon_lifecycle {
    use super::*;

    #[test]
    fn pid_file_and_socket_appear_after_boot() {
        let daemon = Daemon::start();
        assert!(daemon.project_dir().join(".fuel/consume.pid").exists());
        assert!(daemon.project_dir().join(".fuel/consume.sock").exists());
    }

    #[test]
    fn status_reports_an_empty_board() {
        let daemon = Daemon::start();
        fuel()
            .current_dir(daemon.project_dir())
            .arg("status")
            .assert()
            .success()
            .stdout(predicates::str::contains("ready=0"));
    }

    #[test]
    fn second_instance_refuses_to_start_over_a_live_pid() {
        let daemon = Daemon::start();
        fuel()
            .current_dir(daemon.project_dir())
            .arg("consume")
            .assert()
            .code(2);
    }

    #[test]
    fn task_create_then_status_shows_it_ready() {
        let daemon = Daemon::start();
        fuel()
            .current_dir(daemon.project_dir())
            .args(["task", "create", "Add OAuth login"])
            .assert()
            .success()
            .stdout(predicates::str::contains("created"));

        // The daemon ticks every second in this config; give it a moment
        // to recompute the ready set before asking for a snapshot.
        std::thread::sleep(Duration::from_millis(1500));
        fuel()
            .current_dir(daemon.project_dir())
            .arg("status")
            .assert()
            .success()
            .stdout(
                predicates::str::contains("ready=1")
                    .or(predicates::str::contains("in_progress=1")),
            );
    }

    #[test]
    fn stop_shuts_the_daemon_down_and_removes_its_socket() {
        let mut daemon = Daemon::start();
        fuel()
            .current_dir(daemon.project_dir())
            .args(["stop", "--graceful=false"])
            .assert()
            .success();

        let status = daemon.child.wait().unwrap();
        assert!(status.success());
        assert!(!daemon.project_dir().join(".fuel/consume.sock").exists());
    }
}

mod wire_protocol {
    use super::*;

    #[test]
    fn hello_then_snapshot_arrive_on_connect() {
        let daemon = Daemon::start();
        let socket_path = daemon.project_dir().join(".fuel/consume.sock");
        let stream = UnixStream::connect(&socket_path).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reader = BufReader::new(stream);

        let mut first = String::new();
        reader.read_line(&mut first).unwrap();
        assert!(first.contains("\"hello\""));

        let mut second = String::new();
        reader.read_line(&mut second).unwrap();
        assert!(second.contains("\"snapshot\""));
    }

    #[test]
    fn unknown_command_produces_an_error_event() {
        let daemon = Daemon::start();
        let socket_path = daemon.project_dir().join(".fuel/consume.sock");
        let mut stream = UnixStream::connect(&socket_path).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // Drain Hello + initial Snapshot before sending garbage.
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();

        stream
            .write_all(b"{\"type\":\"not_a_real_command\"}\n")
            .unwrap();
        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        assert!(response.contains("\"error\""));
    }
}
