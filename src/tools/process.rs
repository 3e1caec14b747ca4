use anyhow::{Context, Result, anyhow};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs `argv` in `cwd`, killing it once `timeout` elapses.
pub fn run_command(argv: &[String], cwd: &Path, timeout: Option<Duration>) -> Result<Output> {
    let (exe, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command line"))?;
    debug!("run {:?} in {} timeout={:?}", argv, cwd.display(), timeout);

    let mut cmd = Command::new(exe);
    cmd.args(args);
    cmd.current_dir(cwd);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // Own process group, so a timeout can kill the tool's children as well.
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {exe}"))?;

    match timeout {
        Some(t) => wait_with_timeout(&mut child, t),
        None => child
            .wait_with_output()
            .with_context(|| format!("waiting for {exe}")),
    }
}

/// Runs `git <args>` in `cwd`; a non-zero exit is an error carrying stderr.
pub fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| "failed to run git")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn combined_output(output: &Output) -> String {
    let mut s = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.stderr.is_empty() {
        if !s.is_empty() && !s.ends_with('\n') {
            s.push('\n');
        }
        s.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    s
}

/// Extra wait for the pipe readers once the process has exited or been killed.
const PIPE_GRACE: Duration = Duration::from_secs(2);

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so a chatty compiler can't block on a full buffer.
    let stdout_rx = spawn_reader(child.stdout.take(), "stdout");
    let stderr_rx = spawn_reader(child.stderr.take(), "stderr");

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            // A grandchild can keep the pipes open after the child exits.
            let wait = timeout.saturating_sub(start.elapsed()) + PIPE_GRACE;
            let stdout = collect(&stdout_rx, wait, "stdout")?;
            let stderr = collect(&stderr_rx, PIPE_GRACE, "stderr")?;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("process timed out after {:?}", timeout);
            kill_tree(child);
            child.wait().with_context(|| "wait after kill")?;
            let stderr = collect(&stderr_rx, PIPE_GRACE, "stderr").unwrap_or_default();
            return Err(anyhow!(
                "process exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr)
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    name: &'static str,
) -> mpsc::Receiver<Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let res = match pipe {
            Some(mut p) => p
                .read_to_end(&mut buf)
                .map(|_| ())
                .with_context(|| format!("read {name}")),
            None => Ok(()),
        };
        let _ = tx.send(res.map(|()| buf));
    });
    rx
}

fn collect(rx: &mpsc::Receiver<Result<Vec<u8>>>, wait: Duration, name: &str) -> Result<Vec<u8>> {
    match rx.recv_timeout(wait) {
        Ok(res) => res,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(anyhow!("{name} still held open {:?} after process exit", wait))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(anyhow!("{name} reader thread panicked")),
    }
}

/// Kills the child and everything in its process group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("kill {group} exited with {status}"),
            Err(err) => debug!("kill {group} failed: {err}"),
        }
    }
    let _ = child.kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn timeout_kills_grandchildren_too() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let res = run_command(&sh("sleep 6; true"), dir.path(), Some(Duration::from_secs(1)));
        assert!(res.is_err());
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    }

    #[test]
    fn output_is_captured_within_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_command(&sh("echo out; echo err >&2"), dir.path(), Some(Duration::from_secs(10)))
            .unwrap();
        assert!(out.status.success());
        assert_eq!(combined_output(&out), "out\nerr\n");
    }
}
