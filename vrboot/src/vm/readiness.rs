//! Boot readiness predicates watched on a serial console.
//!
//! Both are driven by text the router prints and are therefore tied to a
//! software release; they are plain values a vendor can swap.

use std::time::{Duration, Instant};

use log::{debug, info};
use regex::Regex;

use crate::console::ConsoleStream;
use crate::error::{ChannelError, Result, VmError};

/// Last line of the cryptographic export notice IOS XR prints once booted.
pub const CISCO_EXPORT_NOTICE: &str = "export@cisco.com.";

/// Stand-in for "no timeout".
pub(crate) const WAIT_FOREVER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A literal line marking the end of the boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyMarker {
    text: String,
}

impl ReadyMarker {
    /// Create a marker.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Get the marker text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Block until the marker is printed. `None` waits forever.
    pub fn wait<S: ConsoleStream>(&self, console: &mut S, timeout: Option<Duration>) -> Result<()> {
        debug!("Waiting for boot marker {:?}", self.text);
        console.read_until(&self.text, timeout.unwrap_or(WAIT_FOREVER))?;
        Ok(())
    }
}

impl Default for ReadyMarker {
    fn default() -> Self {
        Self::new(CISCO_EXPORT_NOTICE)
    }
}

/// Waits for the day-0 configuration agent (cvac) to report that each of
/// a set of configuration files was applied.
///
/// The agent logs one line per file on the console:
///
/// ```text
/// RP/0/0/CPU0:Mar 11 13:15:37.919 : cvac[362]: %MGBL-CVAC-4-CONFIG_DONE : Configuration was applied from file /cd0/iosxr_config.txt. See /disk0:/cvac.log for more details.
/// ```
#[derive(Debug, Clone)]
pub struct CvacWatcher {
    pattern: Regex,
    pending: Vec<String>,
}

/// A cvac log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvacEvent {
    pub timestamp: String,
    pub pid: u32,
    pub stage: String,
    pub file: String,
}

impl CvacWatcher {
    /// Watch for `files` on a node with the given prompt prefix.
    pub fn new<I, F>(prefix: &str, files: I) -> Result<Self>
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let pattern = Regex::new(&format!(
            r"{}:([^\r\n]*?)\s*: cvac\[([0-9]+)\]: %MGBL-CVAC-4-CONFIG_([A-Z]+) : {}",
            regex::escape(prefix),
            r"Configuration was applied from file /cd0/(\S+)\. See /disk0:/cvac\.log for more details\."
        ))
        .map_err(ChannelError::InvalidPattern)?;

        Ok(Self {
            pattern,
            pending: files.into_iter().map(Into::into).collect(),
        })
    }

    /// Files not reported yet.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Whether every file was reported.
    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Block until every file is reported. `None` waits forever.
    ///
    /// Any other cvac event (a failed stage, an unknown file) is an error.
    pub fn wait<S: ConsoleStream>(&mut self, console: &mut S, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(WAIT_FOREVER);
        let deadline = Instant::now() + timeout;

        while !self.is_done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout(timeout).into());
            }

            let found = console.expect(&[&self.pattern], remaining)?;
            let event = CvacEvent {
                timestamp: found.group(1).unwrap_or_default().to_string(),
                pid: found.group(2).and_then(|p| p.parse().ok()).unwrap_or_default(),
                stage: found.group(3).unwrap_or_default().to_string(),
                file: found.group(4).unwrap_or_default().to_string(),
            };
            self.observe(&event, found.matched())?;
        }

        Ok(())
    }

    /// Record one event.
    pub fn observe(&mut self, event: &CvacEvent, line: &str) -> Result<()> {
        if event.stage == "DONE" {
            if let Some(i) = self.pending.iter().position(|f| *f == event.file) {
                info!("Configuration applied from file {}", event.file);
                self.pending.remove(i);
                return Ok(());
            }
        }

        Err(VmError::UnexpectedConfigEvent {
            message: format!(
                "{} (timestamp='{}', pid='{}', stage='{}', file='{}')",
                line.trim(),
                event.timestamp,
                event.pid,
                event.stage,
                event.file
            ),
        }
        .into())
    }
}
