use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(50);
/// How long to keep draining pipes after the child is gone, measured from
/// its exit rather than from the last chunk read.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Default)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal (including our timeout).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub combined: String,
    pub timed_out: bool,
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) {
    let Some(pipe) = pipe else {
        return;
    };
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill the child's whole process group, so workers it forked die with it.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own group: its pid is the group id.
        let pgid = child.id() as libc::pid_t;
        unsafe { libc::kill(-pgid, libc::SIGKILL) };
    }
    let _ = child.kill();
}

/// Run `cmd` to completion or until `timeout`, force-killing on expiry.
///
/// The child runs in its own process group; on expiry, and after a normal
/// exit, whatever is left in that group is killed. stdout and stderr are
/// captured separately and, line by line, into one combined stream in
/// arrival order. `stdin`, if given, is written and closed.
pub fn run_with_timeout(mut cmd: Command, stdin: Option<&[u8]>, timeout: Duration) -> io::Result<ProcessOutput> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    own_process_group(&mut cmd);
    let mut child = cmd.spawn()?;

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let bytes = bytes.to_vec();
        thread::spawn(move || {
            let _ = pipe.write_all(&bytes);
        });
    }

    let (tx, rx) = mpsc::channel();
    spawn_reader(child.stdout.take(), Stream::Stdout, tx.clone());
    spawn_reader(child.stderr.take(), Stream::Stderr, tx);

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            kill_group(&mut child);
            break Some(status);
        }
        if Instant::now() >= deadline {
            kill_group(&mut child);
            let _ = child.wait();
            timed_out = true;
            tracing::warn!(pid = child.id(), timeout_ms = timeout.as_millis() as u64, "process timed out; killed its group");
            break None;
        }
        thread::sleep(POLL);
    };

    let mut out = ProcessOutput {
        exit_code: status.and_then(|s| s.code()),
        timed_out,
        ..Default::default()
    };
    let drain_until = Instant::now() + DRAIN_GRACE;
    loop {
        let left = drain_until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        let Ok((stream, chunk)) = rx.recv_timeout(left) else {
            break;
        };
        let text = String::from_utf8_lossy(&chunk);
        match stream {
            Stream::Stdout => out.stdout.push_str(&text),
            Stream::Stderr => out.stderr.push_str(&text),
        }
        out.combined.push_str(&text);
    }
    Ok(out)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut c = Command::new("sh");
        c.args(["-c", script]);
        c
    }

    #[test]
    fn captures_both_streams() {
        let out = run_with_timeout(sh("echo out; echo err 1>&2; exit 3"), None, Duration::from_secs(10)).unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert!(out.combined.contains("out\n") && out.combined.contains("err\n"));
        assert!(!out.timed_out);
    }

    #[test]
    fn kills_on_timeout() {
        let started = Instant::now();
        let out = run_with_timeout(sh("sleep 30"), None, Duration::from_millis(300)).unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn timeout_kills_forked_children_too() {
        let started = Instant::now();
        let script = "(i=0; while [ $i -lt 60 ]; do echo tick; sleep 0.5; i=$((i+1)); done) & wait";
        let out = run_with_timeout(sh(script), None, Duration::from_millis(500)).unwrap();
        assert!(out.timed_out);
        assert!(out.stdout.contains("tick"));
        assert!(started.elapsed() < Duration::from_secs(5), "returned after {:?}", started.elapsed());
    }

    #[test]
    fn background_writer_does_not_outlive_the_exit() {
        let started = Instant::now();
        let script = "(while true; do echo tick; sleep 0.2; done) & echo done";
        let out = run_with_timeout(sh(script), None, Duration::from_secs(30)).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(!out.timed_out);
        assert!(out.stdout.contains("done"));
        assert!(started.elapsed() < Duration::from_secs(10), "returned after {:?}", started.elapsed());
    }

    #[test]
    fn feeds_stdin() {
        let out = run_with_timeout(Command::new("cat"), Some(b"hello"), Duration::from_secs(10)).unwrap();
        assert_eq!(out.stdout, "hello");
    }
}
