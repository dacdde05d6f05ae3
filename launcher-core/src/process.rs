use std::{
    io::{BufRead, BufReader, ErrorKind, Read},
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
    sync::Arc,
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::error::{LaunchError, Result};
use crate::launch::LaunchEvent;

const READ_CHUNK: usize = 8 * 1024;
const EXIT_POLL: Duration = Duration::from_millis(50);

pub type EventSink = Box<dyn Fn(LaunchEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Shell line, interpreted by `sh -c` (`cmd /C` on Windows).
    pub command_line: String,
    pub working_dir: PathBuf,
    /// Copy the child's output into the log under the `storybook` target.
    pub forward_output: bool,
}

pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Signals the child and everything it started, once. No escalation,
    /// no waiting.
    fn terminate(&mut self) -> Result<()>;
}

pub trait Spawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest, sink: EventSink) -> Result<Box<dyn ProcessHandle>>;
}

/// Runs the request through the platform shell and streams stdout chunks
/// into the sink, followed by exactly one `Exited` or `Failed` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellSpawner;

struct ShellProcess {
    pid: u32,
    child: Arc<Mutex<Child>>,
}

impl ProcessHandle for ShellProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn terminate(&mut self) -> Result<()> {
        // Held so the exit poller cannot reap the leader mid-signal.
        let _guard = self.child.lock();
        terminate_tree(self.pid)
    }
}

/// Sends one SIGTERM to the child's process group so npm and the Storybook
/// server below it stop together.
#[cfg(unix)]
fn terminate_tree(pid: u32) -> Result<()> {
    let group = libc::pid_t::try_from(pid)
        .map_err(|_| LaunchError::ProcessSpawn(format!("PID {pid} is out of range")))?;
    let result = unsafe { libc::killpg(group, libc::SIGTERM) };
    if result == 0 {
        return Ok(());
    }
    let error = std::io::Error::last_os_error();
    match error.raw_os_error() {
        // The whole group is already gone.
        Some(libc::ESRCH) => Ok(()),
        _ => Err(LaunchError::ProcessSpawn(error.to_string())),
    }
}

#[cfg(windows)]
fn terminate_tree(pid: u32) -> Result<()> {
    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .output()
        .map_err(|error| LaunchError::ProcessSpawn(format!("taskkill: {error}")))?;
    if !output.status.success() {
        log::debug!(
            "taskkill for PID {pid} reported: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

impl Spawner for ShellSpawner {
    fn spawn(&self, request: &SpawnRequest, sink: EventSink) -> Result<Box<dyn ProcessHandle>> {
        let mut command = shell_command(&request.command_line);
        command
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|error| LaunchError::ProcessSpawn(format!("{}: {error}", request.command_line)))?;
        let pid = child.id();
        log::debug!("Storybook process spawned with PID {pid} in {:?}", request.working_dir);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child = Arc::new(Mutex::new(child));
        let sink: Arc<EventSink> = Arc::new(sink);
        let forward = request.forward_output;

        if let Some(stderr) = stderr {
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(std::result::Result::ok) {
                    if forward {
                        log::debug!(target: "storybook", "[stderr] {line}");
                    }
                }
            });
        }

        let waiter = Arc::clone(&child);
        thread::spawn(move || {
            if let Some(stdout) = stdout {
                stream_stdout(stdout, &sink, forward);
            }
            sink(wait_for_exit(&waiter));
        });

        Ok(Box::new(ShellProcess { pid, child }))
    }
}

fn shell_command(line: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(line);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }
}

fn stream_stdout(mut stdout: ChildStdout, sink: &EventSink, forward: bool) {
    let mut buffer = [0u8; READ_CHUNK];
    let mut carry = Vec::new();
    loop {
        match stdout.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                let chunk = decode_chunk(&mut carry, &buffer[..read]);
                if chunk.is_empty() {
                    continue;
                }
                if forward {
                    log::debug!(target: "storybook", "{}", chunk.trim_end());
                }
                sink(LaunchEvent::Output(chunk));
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => {
                log::warn!("Stopped reading Storybook output: {error}");
                break;
            }
        }
    }
    if !carry.is_empty() {
        sink(LaunchEvent::Output(String::from_utf8_lossy(&carry).into_owned()));
    }
}

/// Decodes `bytes` as UTF-8, holding back an incomplete trailing sequence in
/// `carry` for the next chunk.
fn decode_chunk(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let valid = match std::str::from_utf8(&carry[..]) {
        Ok(_) => carry.len(),
        Err(error) if error.error_len().is_none() => error.valid_up_to(),
        Err(_) => carry.len(),
    };
    let rest = carry.split_off(valid);
    let chunk = String::from_utf8_lossy(&carry[..]).into_owned();
    *carry = rest;
    chunk
}

fn wait_for_exit(child: &Mutex<Child>) -> LaunchEvent {
    loop {
        // The lock is only held for the non-blocking check so `terminate`
        // can always get in.
        let status = child.lock().try_wait();
        match status {
            Ok(Some(status)) => {
                log::debug!("Storybook exited with {status}");
                return LaunchEvent::Exited { code: status.code() };
            }
            Ok(None) => thread::sleep(EXIT_POLL),
            Err(error) => return LaunchEvent::Failed(LaunchError::ProcessSpawn(error.to_string())),
        }
    }
}
