//! Byte-stream connection with readiness polling and reconnect
//!
//! A [`Transport`] wraps one TCP connection and remembers where it came from:
//!
//! - [`Endpoint::Dial`] - reconnects by dialing the stored address again
//! - [`Endpoint::Accept`] - reconnects by accepting again on the listener the
//!   original connection arrived on
//!
//! The socket is kept non-blocking. [`Transport::poll`] and
//! [`Transport::read_available`] never wait, so an event-loop step that uses
//! them returns promptly. Writes are all-or-nothing within the configured
//! write timeout.
//!
//! The `*_until` helpers block up to a deadline and are meant for the setup
//! exchanges that run before a worker is registered.

mod reconnect;

pub use reconnect::{Backoff, ReconnectPolicy};

use crate::config::TransportConfig;
use crate::error::{Result, RtPlotError};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a transport's connection comes from
#[derive(Debug, Clone)]
pub enum Endpoint {
    Dial(SocketAddr),
    Accept(Arc<TcpListener>),
}

/// Timeouts applied to one transport
///
/// Two operations may wait inside an event-loop step, each bounded by one of
/// these:
///
/// - [`Transport::write`] retries a full socket buffer for up to
///   `write_timeout` before failing with [`RtPlotError::Connection`]
/// - [`Transport::reconnect`] waits up to `connect_timeout`, either dialing
///   or, for an accepted transport, waiting for the peer to dial back
///
/// Reads never wait. A loop stepping several workers should keep both
/// timeouts well below the latency it can tolerate for the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Bound on a dial, or on waiting for a re-accept
    pub connect_timeout: Duration,
    /// Bound on draining one `write` into a full socket buffer
    pub write_timeout: Duration,
    /// Sleep between retries while a blocking helper waits on the socket
    pub io_poll: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(2000),
            write_timeout: Duration::from_millis(5000),
            io_poll: Duration::from_millis(1),
        }
    }
}

impl From<&TransportConfig> for TransportOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            write_timeout: config.write_timeout(),
            ..Self::default()
        }
    }
}

/// Zero-timeout readiness of a transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Bytes (or end-of-stream) are waiting to be read
    pub readable: bool,
    /// A live connection is installed
    pub writable: bool,
}

pub struct Transport {
    endpoint: Endpoint,
    stream: Option<TcpStream>,
    options: TransportOptions,
    reconnects: u64,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.stream.is_some())
            .field("reconnects", &self.reconnects)
            .finish()
    }
}

impl Transport {
    /// Dial `addr`, trying each resolved address in turn
    pub fn connect(addr: impl ToSocketAddrs, options: TransportOptions) -> Result<Self> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| RtPlotError::Connection(format!("Failed to resolve address: {}", e)))?
            .collect();

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, options.connect_timeout) {
                Ok(stream) => {
                    let mut transport = Self::unconnected(Endpoint::Dial(candidate), options);
                    transport.install(stream)?;
                    tracing::debug!("Connected to {}", candidate);
                    return Ok(transport);
                }
                Err(e) => last_err = Some(format!("{}: {}", candidate, e)),
            }
        }
        Err(RtPlotError::Connection(format!(
            "Failed to connect: {}",
            last_err.unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Keep dialing until a connection succeeds or `deadline` passes
    pub fn connect_until(
        addr: impl ToSocketAddrs + Copy,
        deadline: Instant,
        retry_interval: Duration,
        options: TransportOptions,
    ) -> Result<Self> {
        loop {
            match Self::connect(addr, options) {
                Ok(transport) => return Ok(transport),
                Err(e) if Instant::now() + retry_interval >= deadline => return Err(e),
                Err(e) => {
                    tracing::trace!("Connect attempt failed, retrying: {}", e);
                    std::thread::sleep(retry_interval);
                }
            }
        }
    }

    /// A transport with a stored endpoint but no live connection yet
    pub fn unconnected(endpoint: Endpoint, options: TransportOptions) -> Self {
        Self {
            endpoint,
            stream: None,
            options,
            reconnects: 0,
        }
    }

    /// Wrap a connection accepted on `listener`
    pub fn from_accepted(
        stream: TcpStream,
        listener: Arc<TcpListener>,
        options: TransportOptions,
    ) -> Result<Self> {
        let mut transport = Self::unconnected(Endpoint::Accept(listener), options);
        transport.install(stream)?;
        Ok(transport)
    }

    fn install(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn options(&self) -> TransportOptions {
        self.options
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Number of `reconnect` calls made on this transport
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects
    }

    /// Tear down the current connection (errors ignored) and establish a new
    /// one from the stored endpoint
    pub fn reconnect(&mut self) -> Result<()> {
        self.reconnects += 1;
        self.shutdown();

        let stream = match &self.endpoint {
            Endpoint::Dial(addr) => TcpStream::connect_timeout(addr, self.options.connect_timeout)
                .map_err(|e| RtPlotError::Connection(format!("Reconnect to {} failed: {}", addr, e)))?,
            Endpoint::Accept(listener) => {
                let deadline = Instant::now() + self.options.connect_timeout;
                accept_before(listener, deadline, self.options.io_poll)
                    .map_err(|e| RtPlotError::Connection(format!("Re-accept failed: {}", e)))?
                    .ok_or_else(|| {
                        RtPlotError::Connection(format!(
                            "No peer reconnected within {:?}",
                            self.options.connect_timeout
                        ))
                    })?
            }
        };
        self.install(stream)?;
        tracing::info!("Transport reconnected (attempt {})", self.reconnects);
        Ok(())
    }

    /// Close the connection, ignoring errors
    pub fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Zero-timeout readiness query
    pub fn poll(&self) -> Readiness {
        let Some(stream) = self.stream.as_ref() else {
            return Readiness::default();
        };
        let mut probe = [0u8; 1];
        let readable = match stream.peek(&mut probe) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                false
            }
            // Let the next read surface the error
            Err(_) => true,
        };
        Readiness {
            readable,
            writable: true,
        }
    }

    /// Read whatever is available without waiting.
    ///
    /// `Ok(0)` means nothing is buffered right now. End-of-stream and reset
    /// surface as [`RtPlotError::ConnectionLost`].
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RtPlotError::ConnectionLost("not connected".to_string()))?;

        let result = stream.read(buf);
        match result {
            Ok(0) if !buf.is_empty() => {
                self.stream = None;
                Err(RtPlotError::ConnectionLost(
                    "peer closed the connection".to_string(),
                ))
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) if is_disconnect(&e) => {
                self.stream = None;
                Err(RtPlotError::ConnectionLost(e.to_string()))
            }
            Err(e) => Err(RtPlotError::Io(e)),
        }
    }

    /// Write every byte or fail.
    ///
    /// A disconnect before any byte went out is [`RtPlotError::ConnectionLost`]
    /// and the caller may resend after reconnecting. A partial write or a
    /// timeout is [`RtPlotError::Connection`]. Either way the connection is
    /// dropped.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RtPlotError::ConnectionLost("not connected".to_string()))?;

        let deadline = Instant::now() + self.options.write_timeout;
        match write_all_until(stream, bytes, deadline, self.options.io_poll) {
            Ok(()) => Ok(()),
            Err((0, e)) if is_disconnect(&e) => {
                self.shutdown();
                Err(RtPlotError::ConnectionLost(e.to_string()))
            }
            Err((written, e)) => {
                self.shutdown();
                Err(RtPlotError::Connection(format!(
                    "Wrote {} of {} bytes: {}",
                    written,
                    bytes.len(),
                    e
                )))
            }
        }
    }

    /// Fill `buf` completely, waiting no later than `deadline`
    pub fn read_exact_until(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<()> {
        let poll = self.options.io_poll;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;

        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::UnexpectedEof)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            ErrorKind::TimedOut,
                            format!("received {} of {} bytes before the deadline", filled, buf.len()),
                        ));
                    }
                    std::thread::sleep(poll);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read one `\n`-terminated line (terminator stripped), never consuming
    /// bytes past it
    pub fn read_line_until(&mut self, deadline: Instant, max_len: usize) -> io::Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.read_exact_until(&mut byte, deadline)?;
            if byte[0] == b'\n' {
                break;
            }
            if line.len() >= max_len {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("line longer than {} bytes", max_len),
                ));
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept one connection, giving up once `deadline` passes.
///
/// Returns `Ok(None)` on timeout.
pub fn accept_before(
    listener: &TcpListener,
    deadline: Instant,
    poll: Duration,
) -> io::Result<Option<TcpStream>> {
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!("Accepted connection from {}", peer);
                return Ok(Some(stream));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                std::thread::sleep(poll);
            }
            Err(e) => return Err(e),
        }
    }
}

fn write_all_until(
    stream: &mut TcpStream,
    bytes: &[u8],
    deadline: Instant,
    poll: Duration,
) -> std::result::Result<(), (usize, io::Error)> {
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => return Err((written, io::Error::from(ErrorKind::WriteZero))),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err((written, io::Error::from(ErrorKind::TimedOut)));
                }
                std::thread::sleep(poll);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err((written, e)),
        }
    }
    Ok(())
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Transport, Transport, Arc<TcpListener>) {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").unwrap());
        let addr = listener.local_addr().unwrap();
        let client = Transport::connect(addr, TransportOptions::default()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let stream = accept_before(&listener, deadline, Duration::from_millis(1))
            .unwrap()
            .unwrap();
        let server =
            Transport::from_accepted(stream, listener.clone(), TransportOptions::default()).unwrap();
        (client, server, listener)
    }

    fn read_some(t: &mut Transport, want: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut buf = vec![0u8; want];
        t.read_exact_until(&mut buf, deadline).unwrap();
        buf
    }

    #[test]
    fn test_write_then_read() {
        let (mut client, mut server, _l) = pair();
        assert!(!server.poll().readable);
        client.write(b"hello").unwrap();
        assert_eq!(read_some(&mut server, 5), b"hello");
        assert!(client.poll().writable);
    }

    #[test]
    fn test_read_available_does_not_block() {
        let (_client, mut server, _l) = pair();
        let mut buf = [0u8; 16];
        assert_eq!(server.read_available(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_eof_is_connection_lost() {
        let (mut client, mut server, _l) = pair();
        client.shutdown();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut buf = [0u8; 16];
        let err = loop {
            match server.read_available(&mut buf) {
                Ok(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(1)),
                Ok(_) => panic!("no EOF observed"),
                Err(e) => break e,
            }
        };
        assert!(err.is_recoverable());
        assert!(!server.is_connected());
    }

    #[test]
    fn test_reconnect_dial_and_accept() {
        let (mut client, mut server, _l) = pair();
        client.reconnect().unwrap();
        server.reconnect().unwrap();
        assert_eq!(client.reconnect_count(), 1);
        assert_eq!(server.reconnect_count(), 1);

        client.write(b"again").unwrap();
        assert_eq!(read_some(&mut server, 5), b"again");
    }

    #[test]
    fn test_reconnect_failure_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = Transport::connect(addr, TransportOptions::default()).unwrap();
        drop(listener);

        let err = client.reconnect().unwrap_err();
        assert!(matches!(err, RtPlotError::Connection(_)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_write_without_connection() {
        let mut t = Transport::unconnected(
            Endpoint::Dial("127.0.0.1:9".parse().unwrap()),
            TransportOptions::default(),
        );
        assert!(matches!(t.write(b"x"), Err(RtPlotError::ConnectionLost(_))));
        assert_eq!(t.poll(), Readiness::default());
    }

    #[test]
    fn test_read_line_stops_at_newline() {
        let (mut client, mut server, _l) = pair();
        client.write(b"first line\nrest").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        assert_eq!(server.read_line_until(deadline, 64).unwrap(), "first line");
        assert_eq!(read_some(&mut server, 4), b"rest");
    }

    #[test]
    fn test_write_blocks_no_longer_than_write_timeout() {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").unwrap());
        let options = TransportOptions {
            write_timeout: Duration::from_millis(50),
            ..TransportOptions::default()
        };
        let mut client = Transport::connect(listener.local_addr().unwrap(), options).unwrap();
        // Accepted but never read, so the socket buffers fill up
        let _peer = accept_before(
            &listener,
            Instant::now() + Duration::from_secs(2),
            Duration::from_millis(1),
        )
        .unwrap()
        .unwrap();

        let started = Instant::now();
        let err = client.write(&vec![0u8; 64 * 1024 * 1024]).unwrap_err();
        assert!(matches!(err, RtPlotError::Connection(_)), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_options_follow_transport_config() {
        let config = TransportConfig {
            connect_timeout_ms: 300,
            write_timeout_ms: 700,
            handshake_timeout_ms: 900,
        };
        let options = TransportOptions::from(&config);
        assert_eq!(options.connect_timeout, Duration::from_millis(300));
        assert_eq!(options.write_timeout, Duration::from_millis(700));
    }

    #[test]
    fn test_read_exact_times_out() {
        let (_client, mut server, _l) = pair();
        let mut buf = [0u8; 4];
        let err = server
            .read_exact_until(&mut buf, Instant::now() + Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_accept_before_deadline_elapses() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let got = accept_before(
            &listener,
            Instant::now() + Duration::from_millis(20),
            Duration::from_millis(2),
        )
        .unwrap();
        assert!(got.is_none());
    }
}
