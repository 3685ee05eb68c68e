use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Render a byte count with a 1024 base and two decimals, e.g. `1.50 MB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PB")
}

/// Collapse an error chain into a single line so it fits one log entry.
pub fn one_line(input: &str) -> String {
    input
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" / ")
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect_output(mut child: Child, started: Instant, timeout: Duration) -> Result<Output> {
    // Pipes are drained on their own threads so a chatty child cannot block on a full buffer.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("command timed out after {}s", timeout.as_secs());
        }
        thread::sleep(Duration::from_millis(20));
    };
    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

pub fn run_command_with_optional_timeout(
    cmd: &mut Command,
    timeout_secs: Option<u64>,
) -> Result<Output> {
    let Some(timeout_secs) = timeout_secs else {
        return cmd.output().context("failed to spawn command");
    };
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let started = Instant::now();
    let child = cmd.spawn().context("failed to spawn command")?;
    collect_output(child, started, Duration::from_secs(timeout_secs))
}

#[cfg(test)]
mod tests {
    use super::{format_bytes, one_line};

    #[test]
    fn format_bytes_walks_units() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(1024u64.pow(5) * 2), "2.00 PB");
    }

    #[test]
    fn one_line_joins_error_chain() {
        assert_eq!(one_line("upload failed\n  caused by: timeout\n"), "upload failed / caused by: timeout");
        assert_eq!(one_line("plain"), "plain");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_slow_command() {
        let mut cmd = std::process::Command::new("sleep");
        cmd.arg("5");
        let err = super::run_command_with_optional_timeout(&mut cmd, Some(1)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
