//! Error types for vrboot.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for vrboot operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Telnet socket errors
    #[error("Telnet error: {0}")]
    Telnet(#[from] TelnetError),

    /// Stream matching errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Console session errors
    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),

    /// Virtual machine lifecycle errors
    #[error("VM error: {0}")]
    Vm(#[from] VmError),
}

impl Error {
    /// Whether this error is a pattern timeout.
    ///
    /// Timeouts leave the connection usable; the caller may retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::Timeout(_)))
    }

    /// Whether this error means the remote side closed the stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::Channel(ChannelError::EndOfStream))
    }
}

/// Telnet socket errors (open, close, raw I/O).
#[derive(Error, Debug)]
pub enum TelnetError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// `open()` called on a connection that is already open
    #[error("Connection to {host}:{port} is already open")]
    AlreadyOpen { host: String, port: u16 },

    /// Operation requires an open connection
    #[error("Connection to {host}:{port} is not open")]
    NotOpen { host: String, port: u16 },

    /// Failed to start a worker thread
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Stream matching errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// No match before the deadline passed
    #[error("Pattern not found within {0:?}")]
    Timeout(Duration),

    /// The remote side closed the stream before a match
    #[error("Reached the end of the connection stream")]
    EndOfStream,

    /// The outbound queue is gone (sender thread stopped)
    #[error("Outbound queue closed")]
    SendQueueClosed,

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Console session errors.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// `connect()` called on a connected session
    #[error("Console is already connected")]
    AlreadyConnected,

    /// Operation requires a connected session
    #[error("Console is not connected - call connect() first")]
    NotConnected,

    /// The session failed authentication earlier and cannot be reused
    #[error("Console session failed authentication and cannot be reused")]
    SessionFailed,

    /// The device rejected the credentials
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// The CLI prompt came back after `exit`
    #[error("Disconnection from '{hostname}' failed, the CLI prompt came back")]
    DisconnectionFailed { hostname: String },

    /// The device refused to commit a configuration
    #[error("Configuration commit failed: {output}")]
    CommitFailed { output: String },
}

/// Virtual machine lifecycle errors.
#[derive(Error, Debug)]
pub enum VmError {
    /// `start()` called on a running VM
    #[error("Can not start the vm, it is already running")]
    AlreadyStarted,

    /// `stop()` called on a VM that is not running
    #[error("Can not stop the vm, it is not running")]
    NotStarted,

    /// Could not reach a console after every retry
    #[error("Failed to connect to {target} after {attempts} attempts")]
    ConnectRetriesExhausted { target: String, attempts: u32 },

    /// Serial console index out of range
    #[error("Serial console index {index} exceeds the highest one created ({count} consoles)")]
    InvalidSerialConsole { index: usize, count: usize },

    /// Failed to launch an external program
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The boot command line is empty
    #[error("Empty boot command")]
    EmptyBootCommand,

    /// The day-0 configuration reported something other than success
    #[error("Unexpected configuration event: {message}")]
    UnexpectedConfigEvent { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using vrboot's Error.
pub type Result<T> = std::result::Result<T, Error>;
