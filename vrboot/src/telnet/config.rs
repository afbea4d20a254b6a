//! Telnet connection configuration.

use std::time::Duration;

use super::encoding::Encoding;

/// Telnet connection configuration.
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// Destination port.
    pub port: u16,

    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,

    /// How long the worker threads block before re-checking that the
    /// socket is still open.
    pub poll_interval: Duration,

    /// Size of a single socket read.
    pub read_chunk_size: usize,

    /// Character encoding used on the wire.
    pub encoding: Encoding,

    /// Line separator used to split the device output into log lines.
    pub newline: String,

    /// Where the device output is logged.
    pub log_sink: LogSink,

    /// Remove non-colour terminal escape sequences from log lines.
    pub strip_ansi: bool,

    /// How long `close()` waits for each worker thread.
    pub join_timeout: Duration,
}

impl TelnetConfig {
    /// Create a configuration with defaults for the given endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let log_sink = LogSink::new(format!("telnet[{}:{}]", host, port), log::Level::Debug);
        Self {
            host,
            port,
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            read_chunk_size: 4096,
            encoding: Encoding::Utf8,
            newline: "\n".to_string(),
            log_sink,
            strip_ansi: true,
            join_timeout: Duration::from_secs(5),
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the worker polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the wire encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the log line separator.
    pub fn with_newline(mut self, newline: impl Into<String>) -> Self {
        self.newline = newline.into();
        self
    }

    /// Log device output through a different sink.
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = sink;
        self
    }

    /// Enable or disable escape sequence stripping in the logs.
    pub fn with_strip_ansi(mut self, strip: bool) -> Self {
        self.strip_ansi = strip;
        self
    }

    /// Get the endpoint as `host:port`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logger handle for the text received on a connection.
///
/// Every complete line is emitted with `log!(target: .., level, ..)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSink {
    /// Log target (logger name).
    pub target: String,

    /// Severity of every logged line.
    pub level: log::Level,
}

impl LogSink {
    /// Create a new sink.
    pub fn new(target: impl Into<String>, level: log::Level) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    /// Log one line.
    pub fn log(&self, line: &str) {
        log::log!(target: &self.target, self.level, "{}", line);
    }
}
