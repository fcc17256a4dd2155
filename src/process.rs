//! External tool invocation with captured output.
//!
//! Every xorriso and gpg call goes through [`Cmd`] so failures always carry the
//! tool's stderr and the command line shows up in verbose logs. Running
//! children are kept in a registry so an interrupt can kill them.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Child processes currently being waited on, by pid.
#[derive(Debug)]
pub struct ChildRegistry {
    children: Mutex<BTreeMap<u32, Child>>,
    /// Set by `kill_all`; children registered afterwards are killed at once.
    closed: AtomicBool,
}

static RUNNING: ChildRegistry = ChildRegistry::new();

impl ChildRegistry {
    pub const fn new() -> Self {
        Self {
            children: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kill every registered child and any registered later. Their waiters
    /// see the signal exit.
    pub fn kill_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.lock()
            .values_mut()
            .map(|child| child.kill().is_ok())
            .filter(|killed| *killed)
            .count()
    }

    /// Register `child` and poll until it exits.
    fn wait(&self, child: Child) -> io::Result<ExitStatus> {
        let pid = child.id();
        {
            let mut children = self.lock();
            children.insert(pid, child);
            if self.closed.load(Ordering::SeqCst) {
                if let Some(child) = children.get_mut(&pid) {
                    let _ = child.kill();
                }
            }
        }
        loop {
            let polled = match self.lock().get_mut(&pid) {
                Some(child) => child.try_wait(),
                None => Err(io::Error::other(format!("child {} was unregistered", pid))),
            };
            match polled {
                Ok(Some(status)) => {
                    self.lock().remove(&pid);
                    return Ok(status);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    self.lock().remove(&pid);
                    return Err(e);
                }
            }
        }
    }
}

impl Default for ChildRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Kill every external tool started through [`Cmd::run`].
pub fn kill_running() -> usize {
    RUNNING.kill_all()
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for a single tool invocation.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    allow_fail: bool,
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Don't fail on a non-zero exit; the caller inspects the result.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// The command line as it would be typed in a shell (for logs only).
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{}'", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    /// Run the command, capturing stdout and stderr.
    pub fn run(self) -> Result<CommandResult> {
        self.run_in(&RUNNING)
    }

    fn run_in(self, registry: &ChildRegistry) -> Result<CommandResult> {
        tracing::debug!("exec: {}", self.display());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = registry
            .wait(child)
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        let result = CommandResult {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }
}

/// Resolve a program to its full path, searching PATH unless it is already a path.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
