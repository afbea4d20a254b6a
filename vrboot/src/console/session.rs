//! Login / command / logout automaton for an IOS XR console.

use std::time::Duration;

use log::{debug, info};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

use super::ConsoleStream;
use super::prompt::CliPrompt;
use crate::channel::ExpectMatch;
use crate::error::{ChannelError, ConsoleError, Result};

const USERNAME_PROMPT: &str = "Username:";
const PASSWORD_PROMPT: &str = "Password:";
const AUTH_FAILED: &str = "% User Authentication failed";
const COMMIT_FAILED: &str = r"% Failed to commit[^\r\n]*";
const UNCOMMITTED_CHANGES: &str = r"(?i)uncommitted changes found";
const KEY_SIZE_QUESTION: &str = r"(?i)how many bits in the modulus";
const KEY_REPLACE_QUESTION: &str = r"(?i)really want to replace";

/// Login credentials of a console user.
#[derive(Debug)]
pub struct Credentials {
    /// Username.
    pub username: String,

    password: SecretString,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Get the password.
    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not logged in.
    Disconnected,

    /// Username sent, waiting for the outcome of the login.
    AwaitingCredentials,

    /// Logged in; the hostname was read from the CLI prompt.
    Connected { hostname: String },

    /// The device rejected the credentials. Terminal.
    AuthenticationFailed,
}

/// Timeouts of the session operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Each step of the login handshake.
    pub login: Duration,

    /// Each command and its prompt.
    pub command: Duration,

    /// RSA key generation, which can take a while on a slow VM.
    pub key_generation: Duration,

    /// How long the prompt must stay away after `exit`.
    pub disconnect_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            login: Duration::from_secs(10),
            command: Duration::from_secs(10),
            key_generation: Duration::from_secs(60),
            disconnect_grace: Duration::from_secs(1),
        }
    }
}

/// A CLI session over a console stream.
///
/// The session borrows the stream for its whole lifetime, so nothing else
/// can read from the console while it is driven. Every operation returns
/// with the trailing CLI prompt consumed.
///
/// # Example
///
/// ```rust,no_run
/// use secrecy::SecretString;
/// use vrboot::console::{CliPrompt, ConsoleSession, Credentials, XRV9K_PREFIX};
/// use vrboot::telnet::{TelnetConfig, TelnetConnection};
///
/// # fn example() -> Result<(), vrboot::Error> {
/// let mut console = TelnetConnection::new(TelnetConfig::new("127.0.0.1", 5000));
/// console.open()?;
///
/// let credentials = Credentials::new("admin", SecretString::from("admin".to_string()));
/// let mut session = ConsoleSession::new(&mut console, credentials, CliPrompt::new(XRV9K_PREFIX)?);
/// session.connect()?;
/// session.generate_rsa_key()?;
/// session.disconnect()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConsoleSession<'a, S: ConsoleStream> {
    console: &'a mut S,
    credentials: Credentials,
    prompt: CliPrompt,
    timeouts: SessionTimeouts,
    state: SessionState,
}

impl<'a, S: ConsoleStream> ConsoleSession<'a, S> {
    /// Create a disconnected session bound to an open console.
    pub fn new(console: &'a mut S, credentials: Credentials, prompt: CliPrompt) -> Self {
        Self {
            console,
            credentials,
            prompt,
            timeouts: SessionTimeouts::default(),
            state: SessionState::Disconnected,
        }
    }

    /// Override the default timeouts.
    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Get the current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Check if the session is logged in.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected { .. })
    }

    /// The hostname read from the prompt, once connected.
    pub fn hostname(&self) -> Option<&str> {
        match &self.state {
            SessionState::Connected { hostname } => Some(hostname),
            _ => None,
        }
    }

    /// Get the prompt template.
    pub fn prompt(&self) -> &CliPrompt {
        &self.prompt
    }

    /// Log in.
    ///
    /// Sends an empty line to wake the console up. If the device asks for
    /// a username the credentials are sent; if a CLI prompt shows up
    /// instead, the console was already logged in and the session adopts
    /// it.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected { .. } | SessionState::AwaitingCredentials => {
                return Err(ConsoleError::AlreadyConnected.into());
            }
            SessionState::AuthenticationFailed => return Err(ConsoleError::SessionFailed.into()),
            SessionState::Disconnected => {}
        }

        match self.login() {
            Ok(hostname) => {
                info!("Logged in on {}", self.prompt.literal(&hostname));
                self.state = SessionState::Connected { hostname };
                Ok(())
            }
            Err(e) => {
                if self.state == SessionState::AwaitingCredentials {
                    self.state = SessionState::Disconnected;
                }
                Err(e)
            }
        }
    }

    fn login(&mut self) -> Result<String> {
        let timeout = self.timeouts.login;
        let username_prompt = compile(USERNAME_PROMPT)?;

        self.wait_write("", None, timeout)?;
        let greeting = self
            .console
            .expect(&[&username_prompt, self.prompt.exec_pattern()], timeout)?;

        if greeting.index == 1 {
            debug!("Console is already logged in");
            return hostname_of(&greeting);
        }

        self.state = SessionState::AwaitingCredentials;
        let username = self.credentials.username.clone();
        self.send_line(&username, false)?;
        self.console.read_until(PASSWORD_PROMPT, timeout)?;
        let password = self.credentials.password().expose_secret().to_string();
        self.send_line(&password, true)?;

        let auth_failed = compile(&regex::escape(AUTH_FAILED))?;
        let outcome = self
            .console
            .expect(&[&auth_failed, self.prompt.exec_pattern()], timeout)?;

        if outcome.index == 0 {
            self.state = SessionState::AuthenticationFailed;
            return Err(ConsoleError::AuthenticationFailed { user: username }.into());
        }

        hostname_of(&outcome)
    }

    /// Optionally wait for `wait_for`, then send `text` followed by a
    /// carriage return.
    pub fn wait_write(&mut self, text: &str, wait_for: Option<&str>, timeout: Duration) -> Result<()> {
        if let Some(target) = wait_for {
            self.console.read_until(target, timeout)?;
        }
        self.send_line(text, false)
    }

    /// Make sure the device has an RSA host key, required by its SSH server.
    ///
    /// Answers `2048` when asked for a key size, and `no` when asked to
    /// replace an existing key.
    pub fn generate_rsa_key(&mut self) -> Result<()> {
        let hostname = self.require_connected()?;
        let prompt = self.prompt.literal(&hostname);
        let timeout = self.timeouts.command;

        self.wait_write("", None, timeout)?;
        self.wait_write("terminal length 0", Some(&prompt), timeout)?;
        self.wait_write("crypto key generate rsa", Some(&prompt), timeout)?;

        let key_size = compile(KEY_SIZE_QUESTION)?;
        let key_replace = compile(KEY_REPLACE_QUESTION)?;
        let outcome = self.console.expect(
            &[&key_size, &key_replace, self.prompt.exec_pattern()],
            self.timeouts.key_generation,
        )?;

        match outcome.index {
            0 => {
                info!("Generating a new 2048 bits RSA key");
                self.send_line("2048", false)?;
                self.wait_exec_prompt(self.timeouts.key_generation)?;
            }
            1 => {
                info!("An RSA key already exists, keeping it");
                self.send_line("no", false)?;
                self.wait_exec_prompt(timeout)?;
            }
            _ => {
                info!("RSA key generation completed without a question");
                self.update_hostname(&outcome)?;
            }
        }

        Ok(())
    }

    /// Run an exec command and return its output, up to and including
    /// the next CLI prompt.
    pub fn run_command(&mut self, command: &str) -> Result<String> {
        self.require_connected()?;
        self.send_line(command, false)?;
        let outcome = self.wait_exec_prompt(self.timeouts.command)?;
        Ok(outcome.text)
    }

    /// Apply configuration lines in a `configure` session.
    pub fn configure(&mut self, lines: &[&str]) -> Result<()> {
        self.configure_with("configure", lines)
    }

    /// Apply configuration lines in a `configure exclusive` session, which
    /// locks out every other configuration session until it ends.
    ///
    /// Blank lines, `!` comments and `end` are skipped: the session commits
    /// and ends itself. If the commit fails, the changes are aborted.
    pub fn configure_exclusive(&mut self, lines: &[&str]) -> Result<()> {
        self.configure_with("configure exclusive", lines)
    }

    fn configure_with(&mut self, mode: &str, lines: &[&str]) -> Result<()> {
        self.require_connected()?;
        let timeout = self.timeouts.command;

        self.send_line(mode, false)?;
        self.wait_config_prompt(timeout)?;

        for line in lines.iter().map(|l| l.trim_end()) {
            let command = line.trim_start();
            if command.is_empty() || command.starts_with('!') || command == "end" {
                continue;
            }
            self.send_line(line, false)?;
            self.wait_config_prompt(timeout)?;
        }

        let commit_failed = compile(COMMIT_FAILED)?;
        self.send_line("commit", false)?;
        let commit = self.console.expect(
            &[&commit_failed, self.prompt.config_pattern()],
            timeout,
        )?;

        if commit.index == 0 {
            self.wait_config_prompt(timeout)?;
            self.send_line("abort", false)?;
            self.wait_exec_prompt(timeout)?;
            return Err(ConsoleError::CommitFailed {
                output: commit.text.trim().to_string(),
            }
            .into());
        }

        let uncommitted = compile(UNCOMMITTED_CHANGES)?;
        self.send_line("end", false)?;
        let end = self.console.expect(&[&uncommitted, self.prompt.exec_pattern()], timeout)?;
        if end.index == 0 {
            self.send_line("no", false)?;
            self.wait_exec_prompt(timeout)?;
        } else {
            self.update_hostname(&end)?;
        }

        debug!("Configuration applied");
        Ok(())
    }

    /// Log out.
    ///
    /// The device stops showing its prompt once the user has logged out,
    /// so success is the prompt *not* coming back within the grace
    /// timeout. Seeing it again means `exit` did not take effect.
    pub fn disconnect(&mut self) -> Result<()> {
        let hostname = self.require_connected()?;
        let prompt = self.prompt.literal(&hostname);
        let timeout = self.timeouts.command;

        self.wait_write("", None, timeout)?;
        self.wait_write("exit", Some(&prompt), timeout)?;

        match self.console.read_until(&prompt, self.timeouts.disconnect_grace) {
            Ok(_) => Err(ConsoleError::DisconnectionFailed { hostname }.into()),
            Err(e) if e.is_timeout() => {
                info!("Logged out of {}", prompt);
                self.state = SessionState::Disconnected;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn require_connected(&self) -> Result<String> {
        self.hostname()
            .map(str::to_string)
            .ok_or_else(|| ConsoleError::NotConnected.into())
    }

    fn send_line(&mut self, text: &str, hidden: bool) -> Result<()> {
        if hidden {
            debug!("Sending ******");
        } else {
            debug!("Sending {:?}", text);
        }
        self.console.write(&format!("{}\r", text))
    }

    fn wait_exec_prompt(&mut self, timeout: Duration) -> Result<ExpectMatch> {
        let outcome = self.console.expect(&[self.prompt.exec_pattern()], timeout)?;
        self.update_hostname(&outcome)?;
        Ok(outcome)
    }

    fn wait_config_prompt(&mut self, timeout: Duration) -> Result<ExpectMatch> {
        self.console.expect(&[self.prompt.config_pattern()], timeout)
    }

    /// The hostname can change under a session (`hostname` command).
    fn update_hostname(&mut self, prompt: &ExpectMatch) -> Result<()> {
        let hostname = hostname_of(prompt)?;
        if let SessionState::Connected { hostname: current } = &mut self.state {
            if *current != hostname {
                info!("Hostname changed from {} to {}", current, hostname);
                *current = hostname;
            }
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(pattern).map_err(ChannelError::InvalidPattern)?)
}

fn hostname_of(prompt: &ExpectMatch) -> Result<String> {
    prompt
        .group(1)
        .map(str::to_string)
        .ok_or_else(|| ConsoleError::NotConnected.into())
}
