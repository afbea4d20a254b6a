//! Worker threads of a telnet connection.
//!
//! - receiver: socket -> negotiation filter -> text -> matching + log queues
//! - sender: outbound queue -> socket
//! - log consumer: log queue -> one log record per complete line
//!
//! None of them return errors: failures are logged and end the thread.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use super::config::LogSink;
use super::encoding::Encoding;
use super::negotiation::NegotiationFilter;
use crate::channel::{AnsiStripper, StreamEvent};

/// Receive loop.
///
/// The socket must have a read timeout set; it doubles as the readiness
/// check that lets the loop notice `open` going false.
pub(crate) fn receiver(
    mut socket: TcpStream,
    open: Arc<AtomicBool>,
    output: Sender<StreamEvent>,
    logs: Sender<StreamEvent>,
    chunk_size: usize,
    encoding: Encoding,
) {
    let mut filter = NegotiationFilter::new();
    let mut decoder = encoding.decoder();
    let mut buf = vec![0u8; chunk_size.max(1)];

    while open.load(Ordering::Acquire) {
        let n = match socket.read(&mut buf) {
            Ok(0) => {
                debug!("Remote host closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if open.load(Ordering::Acquire) {
                    warn!("Failed to read from socket: {}", e);
                }
                break;
            }
        };

        let clean = match filter.feed(&buf[..n], &mut socket) {
            Ok(clean) => clean,
            Err(e) => {
                warn!("Failed to answer telnet negotiation: {}", e);
                break;
            }
        };

        let text = decoder.decode(&clean);
        if text.is_empty() {
            continue;
        }

        trace!("received {} bytes", text.len());
        // A closed queue only means nobody listens anymore
        let _ = output.send(StreamEvent::Data(text.clone()));
        let _ = logs.send(StreamEvent::Data(text));
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = output.send(StreamEvent::Data(rest.clone()));
        let _ = logs.send(StreamEvent::Data(rest));
    }

    let _ = output.send(StreamEvent::EndOfStream);
    let _ = logs.send(StreamEvent::EndOfStream);
}

/// Send loop. `write_all` keeps writing until the whole buffer is out.
pub(crate) fn sender(
    mut socket: TcpStream,
    open: Arc<AtomicBool>,
    input: Receiver<String>,
    encoding: Encoding,
    poll_interval: Duration,
) {
    while open.load(Ordering::Acquire) {
        let text = match input.recv_timeout(poll_interval) {
            Ok(text) => text,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let data = encoding.encode(&text);
        if let Err(e) = socket.write_all(&data) {
            if open.load(Ordering::Acquire) {
                warn!("Failed to write to socket: {}", e);
            }
            break;
        }
    }
}

/// Log loop. Runs until the end-of-stream marker, then logs the last
/// incomplete line.
pub(crate) fn log_consumer(
    logs: Receiver<StreamEvent>,
    sink: LogSink,
    newline: String,
    strip_ansi: bool,
) {
    let mut stripper = strip_ansi.then(AnsiStripper::new);
    let mut lines = LineSplitter::new(newline);

    loop {
        let text = match logs.recv() {
            Ok(StreamEvent::Data(text)) => text,
            Ok(StreamEvent::EndOfStream) | Err(_) => break,
        };

        let text = match stripper.as_mut() {
            Some(stripper) => stripper.strip(&text),
            None => text,
        };

        for line in lines.push(&text) {
            sink.log(&line);
        }
    }

    if let Some(line) = lines.finish() {
        sink.log(&line);
    }
}

/// Splits a text stream into trimmed lines, keeping the incomplete tail.
#[derive(Debug)]
pub(crate) struct LineSplitter {
    newline: String,
    remainder: String,
}

impl LineSplitter {
    pub(crate) fn new(newline: String) -> Self {
        let newline = if newline.is_empty() {
            "\n".to_string()
        } else {
            newline
        };
        Self {
            newline,
            remainder: String::new(),
        }
    }

    /// Add text and return every line it completed, trimmed.
    pub(crate) fn push(&mut self, text: &str) -> Vec<String> {
        self.remainder.push_str(text);

        let Some(pos) = self.remainder.rfind(self.newline.as_str()) else {
            return Vec::new();
        };

        let rest = self.remainder.split_off(pos + self.newline.len());
        let complete = std::mem::replace(&mut self.remainder, rest);

        complete[..pos]
            .split(self.newline.as_str())
            .map(|line| line.trim().to_string())
            .collect()
    }

    /// The trailing incomplete line, if it has any content.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let last = std::mem::take(&mut self.remainder);
        let last = last.trim();
        (!last.is_empty()).then(|| last.to_string())
    }
}

/// Join a thread, giving up after `timeout`.
///
/// A thread that does not finish in time is detached and a warning is
/// logged. Returns whether the thread was joined.
pub(crate) fn join_bounded(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;

    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Failed to join {} thread", name);
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }

    if handle.join().is_err() {
        warn!("The {} thread panicked", name);
        return false;
    }
    true
}
