//! Scoped handle around the capture subprocess.
//!
//! The handle owns the child from spawn to reap. Output is streamed to the
//! log from reader threads and never used for control. Whatever path drops
//! the handle (success, error, timeout, panic), the process group is killed
//! if still running and the child is waited on, so no orphan keeps the camera
//! open.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{PipelineError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub enum ExitOutcome {
    Exited(ExitStatus),
    /// The deadline passed; the process group was killed and reaped.
    TimedOut,
}

pub struct ScopedChild {
    label: String,
    child: Child,
    reaped: bool,
    readers: Vec<JoinHandle<()>>,
}

impl ScopedChild {
    /// Spawns `program` in a new process group with stdout/stderr piped to the log.
    pub fn spawn(label: &str, program: &Path, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| PipelineError::SpawnFailed {
            program: program.display().to_string(),
            source,
        })?;
        log::info!("[{}] started pid={}", label, child.id());

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(stream_lines(format!("{}:stdout", label), stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(stream_lines(format!("{}:stderr", label), stderr, true));
        }

        Ok(Self {
            label: label.to_string(),
            child,
            reaped: false,
            readers,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Waits for exit, killing the process group once `deadline` elapses.
    pub fn wait_with_deadline(&mut self, deadline: Duration) -> Result<ExitOutcome> {
        let started = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.reaped = true;
                    // leftovers in the group would hold the output pipes open
                    self.sweep_group();
                    self.join_readers();
                    return Ok(ExitOutcome::Exited(status));
                }
                Ok(None) => {
                    if started.elapsed() >= deadline {
                        log::error!(
                            "[{}] watchdog fired after {} ms; killing process group",
                            self.label,
                            deadline.as_millis()
                        );
                        self.release();
                        return Ok(ExitOutcome::TimedOut);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    log::error!("[{}] wait failed: {}", self.label, err);
                    self.release();
                    return Err(PipelineError::CaptureProcessFailed {
                        code: None,
                        signal: None,
                    });
                }
            }
        }
    }

    /// Kill (if still running), reap, and drain the output readers.
    fn release(&mut self) {
        if !self.reaped {
            self.kill_group();
            if let Err(err) = self.child.wait() {
                log::warn!("[{}] reap failed: {}", self.label, err);
            }
            self.reaped = true;
        }
        self.join_readers();
    }

    fn kill_group(&mut self) {
        #[cfg(unix)]
        {
            // process_group(0) made the child its own group leader.
            let pgid = self.child.id() as libc::pid_t;
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc == 0 {
                return;
            }
            log::warn!(
                "[{}] killpg({}) failed: {}",
                self.label,
                pgid,
                std::io::Error::last_os_error()
            );
        }
        if let Err(err) = self.child.kill() {
            log::warn!("[{}] kill failed: {}", self.label, err);
        }
    }

    /// Kills whatever is left in the group after the leader exited.
    fn sweep_group(&mut self) {
        #[cfg(unix)]
        {
            let pgid = self.child.id() as libc::pid_t;
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
                log::warn!("[{}] killed processes left in group {}", self.label, pgid);
                return;
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                log::warn!("[{}] killpg({}) failed: {}", self.label, pgid, err);
            }
        }
    }

    fn join_readers(&mut self) {
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                log::warn!("[{}] output reader panicked", self.label);
            }
        }
    }
}

impl Drop for ScopedChild {
    fn drop(&mut self) {
        self.release();
    }
}

/// Exit code, or the terminating signal on unix.
pub fn describe_exit(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

fn stream_lines<R: Read + Send + 'static>(tag: String, pipe: R, is_err: bool) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if is_err {
                log::warn!("[{}] {}", tag, line);
            } else {
                log::info!("[{}] {}", tag, line);
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> (std::path::PathBuf, Vec<String>) {
        (
            std::path::PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    /// Live and not a zombie awaiting its reaper.
    fn running(pid: libc::pid_t) -> bool {
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(true),
            Err(_) => true,
        }
    }

    fn gone_within(pid: libc::pid_t, limit: Duration) -> bool {
        let started = Instant::now();
        while started.elapsed() < limit {
            if !running(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn read_pid(path: &Path) -> libc::pid_t {
        let started = Instant::now();
        loop {
            if let Ok(raw) = std::fs::read_to_string(path) {
                if let Ok(pid) = raw.trim().parse() {
                    return pid;
                }
            }
            assert!(started.elapsed() < Duration::from_secs(5), "no pid file");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn reports_exit_status() {
        let (program, args) = sh("echo hello; exit 3");
        let mut child = ScopedChild::spawn("test", &program, &args).expect("spawn");
        match child.wait_with_deadline(Duration::from_secs(10)).expect("wait") {
            ExitOutcome::Exited(status) => assert_eq!(describe_exit(&status).0, Some(3)),
            ExitOutcome::TimedOut => panic!("unexpected timeout"),
        }
    }

    #[test]
    fn watchdog_kills_overrunning_process() {
        let (program, args) = sh("exec sleep 30");
        let mut child = ScopedChild::spawn("test", &program, &args).expect("spawn");
        let started = Instant::now();
        let outcome = child
            .wait_with_deadline(Duration::from_millis(200))
            .expect("wait");
        assert!(matches!(outcome, ExitOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let err = ScopedChild::spawn(
            "test",
            Path::new("/nonexistent/edge-capture-camera"),
            &[],
        )
        .err()
        .expect("spawn must fail");
        assert!(matches!(err, PipelineError::SpawnFailed { .. }));
    }

    #[test]
    fn drop_kills_running_child() {
        let (program, args) = sh("exec sleep 30");
        let child = ScopedChild::spawn("test", &program, &args).expect("spawn");
        let pid = child.id() as libc::pid_t;
        drop(child);
        // reaped: the pid no longer names a live process of ours
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive);
    }

    #[test]
    fn exit_with_background_leftover_returns_promptly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("bg.pid");
        let (program, args) = sh(&format!(
            "sleep 30 & echo $! > '{}'; exit 0",
            pid_file.display()
        ));
        let mut child = ScopedChild::spawn("test", &program, &args).expect("spawn");
        let started = Instant::now();

        let outcome = child
            .wait_with_deadline(Duration::from_millis(500))
            .expect("wait");

        assert!(matches!(outcome, ExitOutcome::Exited(status) if status.success()));
        assert!(started.elapsed() < Duration::from_secs(5));
        let background = read_pid(&pid_file);
        assert!(gone_within(background, Duration::from_secs(5)));
    }

    #[test]
    fn watchdog_kills_grandchildren() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("bg.pid");
        let (program, args) = sh(&format!(
            "sleep 30 & echo $! > '{}'; wait",
            pid_file.display()
        ));
        let mut child = ScopedChild::spawn("test", &program, &args).expect("spawn");
        let background = read_pid(&pid_file);

        let outcome = child
            .wait_with_deadline(Duration::from_millis(300))
            .expect("wait");

        assert!(matches!(outcome, ExitOutcome::TimedOut));
        assert!(gone_within(background, Duration::from_secs(5)));
    }
}
