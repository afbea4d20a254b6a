//! Telnet connection owning a socket and its three worker threads.

use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use regex::Regex;

use super::config::TelnetConfig;
use super::workers::{self, join_bounded};
use crate::channel::{ExpectMatch, StreamMatcher};
use crate::error::{ChannelError, Result, TelnetError};

/// A telnet client connection.
///
/// Received text is fanned out to two queues: one drained by the
/// blocking [`read_until`](Self::read_until) / [`expect`](Self::expect)
/// calls, and one drained by a thread that logs every complete line.
/// Written text is queued and sent by a dedicated thread.
///
/// The connection is either fully open (socket connected, all three
/// workers running) or fully closed.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use vrboot::telnet::{TelnetConfig, TelnetConnection};
///
/// # fn example() -> Result<(), vrboot::Error> {
/// let mut console = TelnetConnection::new(TelnetConfig::new("127.0.0.1", 5000));
/// console.open()?;
/// console.write("\r")?;
/// console.read_until("Username:", Duration::from_secs(30))?;
/// console.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TelnetConnection {
    config: TelnetConfig,

    /// Live state (None when closed).
    pipeline: Option<Pipeline>,
}

#[derive(Debug)]
struct Pipeline {
    socket: TcpStream,
    open: Arc<AtomicBool>,
    outbound: Sender<String>,
    matcher: StreamMatcher,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl TelnetConnection {
    /// Create a closed connection for the given configuration.
    pub fn new(config: TelnetConfig) -> Self {
        Self {
            config,
            pipeline: None,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    /// Check if the connection is open.
    pub fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Connect the socket and start the worker threads.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(TelnetError::AlreadyOpen {
                host: self.config.host.clone(),
                port: self.config.port,
            }
            .into());
        }

        let socket = self.connect()?;
        let pipeline = Self::start_pipeline(socket, &self.config)?;
        self.pipeline = Some(pipeline);

        debug!("Opened connection to {}", self.config.socket_addr());
        Ok(())
    }

    /// Close the socket and join the worker threads.
    ///
    /// Threads that do not stop within the join timeout are detached with
    /// a warning; closing always completes.
    pub fn close(&mut self) -> Result<()> {
        let pipeline = self.pipeline.take().ok_or_else(|| self.not_open())?;
        Self::stop_pipeline(pipeline, self.config.join_timeout);

        debug!("Closed connection to {}", self.config.socket_addr());
        Ok(())
    }

    /// Queue text to be sent. Never blocks.
    pub fn write(&mut self, text: &str) -> Result<()> {
        let not_open = self.not_open();
        let pipeline = self.pipeline.as_mut().ok_or(not_open)?;

        trace!("queueing {} bytes for {}", text.len(), self.config.socket_addr());
        pipeline
            .outbound
            .send(text.to_string())
            .map_err(|_| ChannelError::SendQueueClosed)?;
        Ok(())
    }

    /// Read until `target` is seen. See [`StreamMatcher::read_until`].
    pub fn read_until(&mut self, target: &str, timeout: Duration) -> Result<String> {
        self.matcher()?.read_until(target, timeout)
    }

    /// Read until one of `patterns` matches. See [`StreamMatcher::expect`].
    pub fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Result<ExpectMatch> {
        self.matcher()?.expect(patterns, timeout)
    }

    /// Read everything until the peer closes the stream.
    pub fn read_all(&mut self) -> Result<String> {
        Ok(self.matcher()?.read_all())
    }

    /// Get a handle that can shut the socket down from another thread.
    ///
    /// Shutting down wakes every blocked reader with an end-of-stream error.
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| self.not_open())?;
        Ok(ShutdownHandle {
            socket: pipeline.socket.try_clone().map_err(TelnetError::Io)?,
            endpoint: self.config.socket_addr(),
        })
    }

    fn matcher(&mut self) -> Result<&mut StreamMatcher> {
        let not_open = self.not_open();
        self.pipeline
            .as_mut()
            .map(|p| &mut p.matcher)
            .ok_or_else(|| not_open.into())
    }

    fn not_open(&self) -> TelnetError {
        TelnetError::NotOpen {
            host: self.config.host.clone(),
            port: self.config.port,
        }
    }

    /// Connect to the first resolved address that accepts.
    fn connect(&self) -> Result<TcpStream> {
        let failed = |source: io::Error| TelnetError::ConnectionFailed {
            host: self.config.host.clone(),
            port: self.config.port,
            source,
        };

        let addrs = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(failed)?;

        let mut last_error = io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(socket) => return Ok(socket),
                Err(e) => last_error = e,
            }
        }

        Err(failed(last_error).into())
    }

    fn start_pipeline(socket: TcpStream, config: &TelnetConfig) -> Result<Pipeline> {
        let poll_interval = config.poll_interval.max(Duration::from_millis(1));
        socket
            .set_read_timeout(Some(poll_interval))
            .map_err(TelnetError::Io)?;
        socket.set_nodelay(true).map_err(TelnetError::Io)?;

        let open = Arc::new(AtomicBool::new(true));
        let (output_tx, output_rx) = mpsc::channel();
        let (logs_tx, logs_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();

        let mut pipeline = Pipeline {
            socket,
            open: open.clone(),
            outbound: outbound_tx,
            matcher: StreamMatcher::new(output_rx),
            workers: Vec::with_capacity(3),
        };

        let name = |role: &str| format!("telnet-{}-{}", role, config.port);

        // Log consumer first, so nothing the receiver pushes goes unlogged
        let sink = config.log_sink.clone();
        let newline = config.newline.clone();
        let strip_ansi = config.strip_ansi;
        let started = spawn(&name("log"), move || {
            workers::log_consumer(logs_rx, sink, newline, strip_ansi)
        })
        .and_then(|handle| {
            pipeline.workers.push(("log consumer", handle));
            let socket = pipeline.socket.try_clone().map_err(TelnetError::Io)?;
            let open = open.clone();
            let chunk_size = config.read_chunk_size;
            let encoding = config.encoding;
            spawn(&name("rx"), move || {
                workers::receiver(socket, open, output_tx, logs_tx, chunk_size, encoding)
            })
        })
        .and_then(|handle| {
            pipeline.workers.push(("receiver", handle));
            let socket = pipeline.socket.try_clone().map_err(TelnetError::Io)?;
            let open = open.clone();
            let encoding = config.encoding;
            spawn(&name("tx"), move || {
                workers::sender(socket, open, outbound_rx, encoding, poll_interval)
            })
        });

        match started {
            Ok(handle) => {
                pipeline.workers.push(("sender", handle));
                Ok(pipeline)
            }
            Err(e) => {
                Self::stop_pipeline(pipeline, config.join_timeout);
                Err(e.into())
            }
        }
    }

    fn stop_pipeline(pipeline: Pipeline, join_timeout: Duration) {
        let Pipeline {
            socket,
            open,
            outbound,
            matcher,
            workers,
        } = pipeline;

        open.store(false, Ordering::Release);
        if let Err(e) = socket.shutdown(Shutdown::Both) {
            // Already closed by the peer
            debug!("Socket shutdown: {}", e);
        }
        drop(outbound);

        for (name, handle) in workers {
            join_bounded(handle, join_timeout, name);
        }
        drop(matcher);
    }
}

impl Drop for TelnetConnection {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            warn!(
                "Connection to {} dropped while open, closing it",
                self.config.socket_addr()
            );
            Self::stop_pipeline(pipeline, self.config.join_timeout);
        }
    }
}

fn spawn<F>(name: &str, f: F) -> std::result::Result<JoinHandle<()>, TelnetError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| TelnetError::ThreadSpawn {
            name: name.to_string(),
            source,
        })
}

/// Shuts a connection's socket down from another thread.
#[derive(Debug)]
pub struct ShutdownHandle {
    socket: TcpStream,
    endpoint: String,
}

impl ShutdownHandle {
    /// Shut the socket down in both directions.
    pub fn shutdown(&self) {
        debug!("Shutting down connection to {}", self.endpoint);
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            debug!("Socket shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    use super::*;
    use crate::error::Error;
    use crate::telnet::LogSink;
    use crate::telnet::negotiation::{DO, IAC, WONT};

    fn listener() -> (TcpListener, u16) {
        crate::test_log::init();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn config(port: u16) -> TelnetConfig {
        TelnetConfig::new("127.0.0.1", port).with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_open_close_lifecycle() {
        let (listener, port) = listener();
        let server = thread::spawn(move || listener.accept().unwrap());

        let mut conn = TelnetConnection::new(config(port));
        assert!(!conn.is_open());
        conn.open().unwrap();
        assert!(conn.is_open());

        assert!(matches!(
            conn.open(),
            Err(Error::Telnet(TelnetError::AlreadyOpen { .. }))
        ));

        let _peer = server.join().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());

        assert!(matches!(
            conn.close(),
            Err(Error::Telnet(TelnetError::NotOpen { .. }))
        ));
        assert!(matches!(
            conn.write("x"),
            Err(Error::Telnet(TelnetError::NotOpen { .. }))
        ));
    }

    #[test]
    fn test_connection_refused() {
        let (listener, port) = listener();
        drop(listener);

        let mut conn = TelnetConnection::new(config(port));
        let err = conn.open().unwrap_err();
        assert!(matches!(
            err,
            Error::Telnet(TelnetError::ConnectionFailed { .. })
        ));
        assert!(!conn.is_open());
    }

    #[test]
    fn test_negotiation_refused_and_text_delivered() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(&[IAC, DO, 1]).unwrap();
            peer.write_all(b"hello Username:").unwrap();

            let mut reply = [0u8; 3];
            peer.read_exact(&mut reply).unwrap();
            (peer, reply)
        });

        let mut conn = TelnetConnection::new(config(port));
        conn.open().unwrap();

        let out = conn.read_until("Username:", Duration::from_secs(5)).unwrap();
        assert_eq!(out, "hello Username:");

        let (_peer, reply) = server.join().unwrap();
        assert_eq!(reply, [IAC, WONT, 1]);
        conn.close().unwrap();
    }

    #[test]
    fn test_write_reaches_peer() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            peer.read_exact(&mut buf).unwrap();
            buf
        });

        let mut conn = TelnetConnection::new(config(port));
        conn.open().unwrap();
        conn.write("bob\r").unwrap();

        assert_eq!(&server.join().unwrap(), b"bob\r");
        conn.close().unwrap();
    }

    #[test]
    fn test_peer_close_is_end_of_stream() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"bye").unwrap();
        });

        let mut conn = TelnetConnection::new(config(port));
        conn.open().unwrap();
        server.join().unwrap();

        let start = Instant::now();
        let err = conn.read_until("never", Duration::from_secs(5)).unwrap_err();
        assert!(err.is_end_of_stream());
        assert!(start.elapsed() < Duration::from_secs(2));

        assert_eq!(conn.read_all().unwrap(), "bye");
        conn.close().unwrap();
    }

    #[test]
    fn test_log_side_channel_mirrors_stream() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"line one\r\n\x1b[2J\x1b[32mline").unwrap();
            thread::sleep(Duration::from_millis(50));
            peer.write_all(b" two\x1b[0m\r\nRP/0/RP0/CPU0:r1#").unwrap();
        });

        let target = format!("console-log[{}]", port);
        let mut conn = TelnetConnection::new(
            config(port).with_log_sink(LogSink::new(target.clone(), log::Level::Info)),
        );
        conn.open().unwrap();
        server.join().unwrap();

        assert_eq!(
            conn.read_all().unwrap(),
            "line one\r\n\x1b[2J\x1b[32mline two\x1b[0m\r\nRP/0/RP0/CPU0:r1#"
        );
        // The log consumer has seen the end of the stream once joined
        conn.close().unwrap();

        let logged = crate::test_log::init().messages(&target);
        assert_eq!(
            logged,
            vec![
                (log::Level::Info, "line one".to_string()),
                (log::Level::Info, "\x1b[32mline two\x1b[0m".to_string()),
                (log::Level::Info, "RP/0/RP0/CPU0:r1#".to_string()),
            ]
        );
    }

    #[test]
    fn test_shutdown_unblocks_expect() {
        let (listener, port) = listener();
        let server = thread::spawn(move || listener.accept().unwrap());

        let mut conn = TelnetConnection::new(config(port));
        conn.open().unwrap();
        let _peer = server.join().unwrap();

        let handle = conn.shutdown_handle().unwrap();
        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            handle.shutdown();
        });

        let prompt = Regex::new(r"#\s*$").unwrap();
        let start = Instant::now();
        let err = conn.expect(&[&prompt], Duration::from_secs(10)).unwrap_err();

        assert!(err.is_end_of_stream());
        assert!(start.elapsed() < Duration::from_secs(1));

        closer.join().unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_drop_closes_connection() {
        let (listener, port) = listener();
        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            // Returns once the client side is shut down
            peer.read_to_end(&mut buf).unwrap();
            buf
        });

        {
            let mut conn = TelnetConnection::new(config(port));
            conn.open().unwrap();
            conn.write("exit\r").unwrap();
            thread::sleep(Duration::from_millis(100));
        }

        assert_eq!(server.join().unwrap(), b"exit\r");
    }
}
