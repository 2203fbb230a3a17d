//! Running the `git` executable.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::GitError;

const POLL_STEP: Duration = Duration::from_millis(20);

/// Runs `git` with `args` inside `dir`.
///
/// Prompts are disabled and messages forced to English so stderr can be
/// classified. With a timeout, a process still running at the deadline is
/// killed and [`GitError::Timeout`] returned.
pub(crate) fn run_git(
    dir: &Path,
    args: &[&str],
    env: &[(String, String)],
    timeout: Option<Duration>,
) -> Result<Output, GitError> {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("LC_ALL", "C")
        .stdin(Stdio::null());
    for (key, value) in env {
        cmd.env(key, value);
    }

    match timeout {
        None => cmd.output().map_err(GitError::Spawn),
        Some(limit) => {
            let child = cmd
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(GitError::Spawn)?;
            wait_with_deadline(child, limit)
        }
    }
}

fn wait_with_deadline(mut child: Child, limit: Duration) -> Result<Output, GitError> {
    // Drain pipes concurrently so a chatty process can't block on a full buffer
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);
    let deadline = Instant::now() + limit;

    let status = loop {
        match child.try_wait().map_err(GitError::Spawn)? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                if let Err(e) = child.kill() {
                    log::warn!("Failed to kill timed out git process: {}", e);
                }
                let _ = child.wait();
                return Err(GitError::Timeout(limit.as_secs()));
            }
            None => thread::sleep(POLL_STEP),
        }
    };

    Ok(Output {
        status,
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
