//! External programs: one-shot commands and the long-running VM process.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Result, VmError};
use crate::telnet::workers::join_bounded;

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external programs on behalf of the orchestrator.
pub trait CommandRunner {
    /// Run a program to completion and capture its output.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Start a long-running program whose output is logged line by line.
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn RunningProcess>>;
}

/// Handle on a program started by [`CommandRunner::spawn`].
pub trait RunningProcess: std::fmt::Debug {
    /// Process id.
    fn id(&self) -> u32;

    /// Kill the process and wait for it (and its log threads), giving up
    /// after `timeout`.
    fn stop(&mut self, timeout: Duration) -> Result<()>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        trace!("exec: {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| VmError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn RunningProcess>> {
        debug!("spawn: {} {}", program, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| VmError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let pid = child.id();
        let mut process = VmProcess {
            child,
            loggers: Vec::with_capacity(2),
        };

        let stdout = process.child.stdout.take();
        let stderr = process.child.stderr.take();
        for (stream, reader) in [
            ("stdout", stdout.map(|s| Box::new(s) as Box<dyn Read + Send>)),
            ("stderr", stderr.map(|s| Box::new(s) as Box<dyn Read + Send>)),
        ] {
            let Some(reader) = reader else { continue };
            let target = format!("{}[{}]-{}", program, pid, stream);
            match spawn_io_logger(reader, target.clone()) {
                Ok(handle) => process.loggers.push((target, handle)),
                Err(e) => {
                    // Do not leave an unsupervised VM behind
                    if let Err(stop) = process.stop(Duration::from_secs(5)) {
                        warn!("Failed to stop {} after a setup error: {}", program, stop);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Box::new(process))
    }
}

fn spawn_io_logger(reader: Box<dyn Read + Send>, target: String) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("log-{}", target))
        .spawn(move || io_logger(BufReader::new(reader), &target))
        .map_err(|e| VmError::Io(e).into())
}

/// Log every non-blank line of `reader` at debug level until EOF.
fn io_logger<R: BufRead>(reader: R, target: &str) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    log::debug!(target: target, "{}", line);
                }
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => continue,
            Err(_) => break,
        }
    }
}

/// A child process with a logging thread per output stream.
#[derive(Debug)]
pub struct VmProcess {
    child: Child,
    loggers: Vec<(String, JoinHandle<()>)>,
}

impl RunningProcess for VmProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn stop(&mut self, timeout: Duration) -> Result<()> {
        let pid = self.child.id();

        if self.child.try_wait().map_err(VmError::Io)?.is_none() {
            match self.child.kill() {
                Ok(()) => debug!("Killed process {}", pid),
                // Exited in between
                Err(e) if e.kind() == ErrorKind::InvalidInput => {}
                Err(e) => return Err(VmError::Io(e).into()),
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait().map_err(VmError::Io)? {
                debug!("Process {} exited with {}", pid, status);
                break;
            }
            if Instant::now() >= deadline {
                warn!("Process {} did not exit within {:?}", pid, timeout);
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        for (name, handle) in self.loggers.drain(..) {
            join_bounded(handle, timeout, &name);
        }
        Ok(())
    }
}
