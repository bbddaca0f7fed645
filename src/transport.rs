// Copyright (C) 2022 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of syslog-forward.
//
// syslog-forward is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! The syslog transport layer.
//!
//! This module defines the [`Transport`] trait (a way of establishing a [`Connection`]) along with
//! implementations for TCP, UDP, TLS over TCP, and (on Unix) Unix stream & datagram sockets.
//! Implementations are looked-up by scheme name in a [`TransportRegistry`]; callers may register
//! their own.
//!
//! # Examples
//!
//! To open a UDP "connection" to a daemon listening on port 514 on localhost:
//!
//! ```rust
//! use syslog_forward::{config::TransportConfig, transport::TransportRegistry};
//! let registry = TransportRegistry::standard();
//! let config = TransportConfig::new("udp", "127.0.0.1:514");
//! let _conn = registry.lookup("udp").unwrap().connect(&config).unwrap();
//! ```
//!
//! Naming a scheme no one has registered is a configuration error:
//!
//! ```rust
//! use syslog_forward::transport::TransportRegistry;
//! assert!(TransportRegistry::standard().lookup("carrier-pigeon").is_err());
//! ```

use crate::{
    config::TransportConfig,
    error::{Error, Result},
};

use backtrace::Backtrace;
use native_tls::{TlsConnector, TlsStream};

use std::{
    collections::HashMap,
    io::{self, Write},
    net::{TcpStream, ToSocketAddrs, UdpSocket},
    sync::Arc,
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::net::{UnixDatagram, UnixStream};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      transport mechanisms                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An established channel to a syslog daemon.
pub trait Connection: Send {
    /// Send one complete, already-framed syslog line.
    ///
    /// At the end of the day, UDP, TCP & Unix sockets all operate on a contiguous slice of `u8`,
    /// so we require that our caller assemble one. Any error means the line may not have been
    /// delivered & that this connection should be abandoned.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Best-effort, non-blocking check for whether the peer has hung up. Connectionless transports
    /// always answer `false`.
    fn peer_closed(&mut self) -> bool {
        false
    }
    /// Release the underlying socket
    fn close(&mut self) {}
}

/// A means of establishing [`Connection`]s
pub trait Transport: Send + Sync {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Connection>>;
}

fn connect_error(config: &TransportConfig, source: io::Error) -> Error {
    Error::Connect {
        address: config.address.clone(),
        source,
        back: Backtrace::new(),
    }
}

/// Try each address `address` resolves to, in turn.
fn connect_tcp(address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", address),
        )
    }))
}

/// Peek at a stream socket without blocking. A zero-length read means an orderly shutdown; any
/// error other than "nothing to read yet" means the connection is unusable.
fn tcp_peer_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut buf = [0u8; 1];
    let closed = match stream.peek(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => err.kind() != io::ErrorKind::WouldBlock,
    };
    stream.set_nonblocking(false).is_err() || closed
}

/// Sending syslog messages over TCP, one newline-terminated line at a time.
#[derive(Clone, Debug, Default)]
pub struct TcpTransport;

struct TcpConnection {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Connection>> {
        let stream = connect_tcp(&config.address, config.connect_timeout)
            .and_then(|stream| {
                stream.set_write_timeout(Some(config.write_timeout))?;
                Ok(stream)
            })
            .map_err(|err| connect_error(config, err))?;
        Ok(Box::new(TcpConnection { stream }))
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }
    fn peer_closed(&mut self) -> bool {
        tcp_peer_closed(&self.stream)
    }
    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// Sending syslog messages via UDP datagrams.
#[derive(Clone, Debug, Default)]
pub struct UdpTransport;

struct UdpConnection {
    socket: UdpSocket,
}

impl Transport for UdpTransport {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Connection>> {
        let socket = (|| -> io::Result<UdpSocket> {
            let peer = config.address.to_socket_addrs()?.next().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} did not resolve to any address", config.address),
                )
            })?;
            // Bind to any available port on the matching wildcard address...
            let socket = if peer.is_ipv4() {
                UdpSocket::bind("0.0.0.0:0")?
            } else {
                UdpSocket::bind("[::]:0")?
            };
            // and connect to the syslog daemon at `peer`:
            socket.connect(peer)?;
            Ok(socket)
        })()
        .map_err(|err| connect_error(config, err))?;
        Ok(Box::new(UdpConnection { socket }))
    }
}

impl Connection for UdpConnection {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        let sent = self.socket.send(buf)?;
        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, buf.len()),
            ));
        }
        Ok(())
    }
}

/// TLS settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Name presented during the handshake; defaults to the host portion of the address
    pub domain: Option<String>,
    /// Skip certificate & hostname validation (intended for tests).
    pub insecure_skip_verify: bool,
}

impl TlsOptions {
    fn connector(&self) -> io::Result<TlsConnector> {
        let mut builder = TlsConnector::builder();
        if self.insecure_skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        builder.build().map_err(io::Error::other)
    }
    fn domain<'a>(&'a self, address: &'a str) -> &'a str {
        match &self.domain {
            Some(domain) => domain,
            None => match address.rsplit_once(':') {
                Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
                None => address,
            },
        }
    }
}

/// Sending syslog messages over TLS (over TCP).
#[derive(Clone, Debug, Default)]
pub struct TlsTransport;

struct TlsConnection {
    stream: TlsStream<TcpStream>,
}

impl Transport for TlsTransport {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Connection>> {
        let stream = (|| -> io::Result<TlsStream<TcpStream>> {
            let connector = config.tls.connector()?;
            let stream = connect_tcp(&config.address, config.connect_timeout)?;
            // Bound the handshake by the connect timeout...
            stream.set_read_timeout(Some(config.connect_timeout))?;
            stream.set_write_timeout(Some(config.connect_timeout))?;
            let stream = connector
                .connect(config.tls.domain(&config.address), stream)
                .map_err(io::Error::other)?;
            // then switch over to the write timeout.
            let tcp = stream.get_ref();
            tcp.set_read_timeout(None)?;
            tcp.set_write_timeout(Some(config.write_timeout))?;
            Ok(stream)
        })()
        .map_err(|err| connect_error(config, err))?;
        Ok(Box::new(TlsConnection { stream }))
    }
}

impl Connection for TlsConnection {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }
    // Peeking the socket sees session tickets & close_notify as pending data, so read through
    // the session; a close_notify then shows up as end-of-stream.
    fn peer_closed(&mut self) -> bool {
        use std::io::Read;
        if self.stream.get_ref().set_nonblocking(true).is_err() {
            return true;
        }
        let mut buf = [0u8; 512];
        let closed = match self.stream.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(err) => err.kind() != io::ErrorKind::WouldBlock,
        };
        self.stream.get_ref().set_nonblocking(false).is_err() || closed
    }
    fn close(&mut self) {
        let _ = self.stream.shutdown();
    }
}

/// Sending syslog messages over a Unix stream socket (rsyslog's `imuxsock` in stream mode, say).
#[cfg(unix)]
#[derive(Clone, Debug, Default)]
pub struct UnixStreamTransport;

#[cfg(unix)]
struct UnixStreamConnection {
    stream: UnixStream,
}

#[cfg(unix)]
impl Transport for UnixStreamTransport {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Connection>> {
        let stream = UnixStream::connect(&config.address)
            .and_then(|stream| {
                stream.set_write_timeout(Some(config.write_timeout))?;
                Ok(stream)
            })
            .map_err(|err| connect_error(config, err))?;
        Ok(Box::new(UnixStreamConnection { stream }))
    }
}

#[cfg(unix)]
impl Connection for UnixStreamConnection {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }
    // `UnixStream::peek` isn't stable, so read instead; the daemon has nothing to say to us anyway.
    fn peer_closed(&mut self) -> bool {
        use std::io::Read;
        if self.stream.set_nonblocking(true).is_err() {
            return true;
        }
        let mut buf = [0u8; 64];
        let closed = match self.stream.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(err) => err.kind() != io::ErrorKind::WouldBlock,
        };
        self.stream.set_nonblocking(false).is_err() || closed
    }
    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// Sending syslog messages via Unix datagram socket (`/dev/log`, classically).
#[cfg(unix)]
#[derive(Clone, Debug, Default)]
pub struct UnixDatagramTransport;

#[cfg(unix)]
struct UnixDatagramConnection {
    socket: UnixDatagram,
}

#[cfg(unix)]
impl Transport for UnixDatagramTransport {
    fn connect(&self, config: &TransportConfig) -> Result<Box<dyn Connection>> {
        let socket = UnixDatagram::unbound()
            .and_then(|sock| {
                sock.connect(&config.address)?;
                Ok(sock)
            })
            .map_err(|err| connect_error(config, err))?;
        Ok(Box::new(UnixDatagramConnection { socket }))
    }
}

#[cfg(unix)]
impl Connection for UnixDatagramConnection {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.socket.send(buf)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    struct TransportRegistry                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Scheme name to [`Transport`].
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// A registry with nothing in it
    pub fn empty() -> TransportRegistry {
        TransportRegistry::default()
    }
    /// `tcp`, `udp` & `tls`, plus `unix` & `unixgram` where available
    pub fn standard() -> TransportRegistry {
        let mut registry = TransportRegistry::empty();
        registry.register("tcp", Arc::new(TcpTransport));
        registry.register("udp", Arc::new(UdpTransport));
        registry.register("tls", Arc::new(TlsTransport));
        #[cfg(unix)]
        {
            registry.register("unix", Arc::new(UnixStreamTransport));
            registry.register("unixgram", Arc::new(UnixDatagramTransport));
        }
        registry
    }
    /// Register `transport` under `scheme`, replacing any prior registration.
    pub fn register<S: Into<String>>(&mut self, scheme: S, transport: Arc<dyn Transport>) {
        self.transports.insert(scheme.into(), transport);
    }
    pub fn lookup(&self, scheme: &str) -> Result<Arc<dyn Transport>> {
        self.transports
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::config(format!("no transport registered for {:?}", scheme)))
    }
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.transports.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use rstest::{fixture, rstest};

    use std::{
        io::{BufRead, BufReader},
        net::TcpListener,
        sync::mpsc,
        thread,
        time::Instant,
    };

    #[fixture]
    fn tcp_listener() -> TcpListener {
        TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener")
    }

    fn config_for(scheme: &str, address: String) -> TransportConfig {
        let mut config = TransportConfig::new(scheme, address);
        config.connect_timeout = Duration::from_millis(250);
        config
    }

    #[test]
    fn registry() {
        let registry = TransportRegistry::standard();
        for scheme in ["tcp", "udp", "tls"] {
            assert!(registry.lookup(scheme).is_ok(), "{} missing", scheme);
        }
        let err = registry.lookup("gelf").err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
        assert!(TransportRegistry::empty().lookup("tcp").is_err());

        let mut custom = TransportRegistry::empty();
        custom.register("plain", Arc::new(TcpTransport));
        assert_eq!(custom.schemes(), vec!["plain"]);
    }

    #[rstest]
    fn tcp_lines(tcp_listener: TcpListener) {
        let addr = tcp_listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = tcp_listener.accept().expect("accept connection");
            for line in BufReader::new(stream).lines() {
                tx.send(line.expect("read line")).expect("forward line");
            }
        });

        let mut conn = TcpTransport
            .connect(&config_for("tcp", addr.to_string()))
            .unwrap();
        assert!(!conn.peer_closed());
        conn.send(b"<14>first\n").unwrap();
        conn.send(b"<14>second\n").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "<14>first");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "<14>second");
        conn.close();
    }

    #[rstest]
    fn tcp_detects_hangup(tcp_listener: TcpListener) {
        let addr = tcp_listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = tcp_listener.accept().expect("accept connection");
            drop(stream);
            tx.send(()).expect("signal hangup");
        });

        let mut conn = TcpTransport
            .connect(&config_for("tcp", addr.to_string()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let start = Instant::now();
        while !conn.peer_closed() {
            assert!(start.elapsed() < Duration::from_secs(2), "hangup never noticed");
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// A TLS server on `tcp_listener` that completes one handshake, sends close_notify & hangs up.
    fn tls_server_that_hangs_up(tcp_listener: TcpListener) -> mpsc::Receiver<()> {
        let identity = native_tls::Identity::from_pkcs8(
            include_bytes!("../tests/data/localhost.crt"),
            include_bytes!("../tests/data/localhost.key"),
        )
        .expect("test identity");
        let acceptor = native_tls::TlsAcceptor::new(identity).expect("build acceptor");
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = tcp_listener.accept().expect("accept connection");
            let mut stream = acceptor.accept(stream).expect("server handshake");
            stream.shutdown().expect("send close_notify");
            drop(stream);
            tx.send(()).expect("signal hangup");
        });
        rx
    }

    #[rstest]
    fn tls_detects_hangup(tcp_listener: TcpListener) {
        let addr = tcp_listener.local_addr().unwrap();
        let hung_up = tls_server_that_hangs_up(tcp_listener);

        let mut config = config_for("tls", addr.to_string());
        config.connect_timeout = Duration::from_secs(2);
        config.tls = TlsOptions {
            domain: Some("localhost".into()),
            insecure_skip_verify: true,
        };
        let mut conn = TlsTransport.connect(&config).unwrap();
        hung_up.recv_timeout(Duration::from_secs(2)).unwrap();
        let start = Instant::now();
        while !conn.peer_closed() {
            assert!(start.elapsed() < Duration::from_secs(2), "hangup never noticed");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn tcp_refused() {
        // Grab a free port, then release it so nothing is listening there.
        let addr = TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap();
        let err = TcpTransport
            .connect(&config_for("tcp", addr.to_string()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(!err.is_terminal());
    }

    #[test]
    fn udp_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut conn = UdpTransport
            .connect(&config_for("udp", server.local_addr().unwrap().to_string()))
            .unwrap();
        conn.send(b"<14>over udp\n").unwrap();
        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"<14>over udp\n");
        assert!(!conn.peer_closed());
    }

    #[cfg(unix)]
    #[test]
    fn unix_datagrams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sock");
        let server = UnixDatagram::bind(&path).unwrap();
        let mut conn = UnixDatagramTransport
            .connect(&config_for("unixgram", path.to_string_lossy().into_owned()))
            .unwrap();
        conn.send(b"<14>local\n").unwrap();
        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"<14>local\n");
    }

    #[test]
    fn tls_domain_defaults_to_host() {
        let opts = TlsOptions::default();
        assert_eq!(opts.domain("logs.example.com:6514"), "logs.example.com");
        assert_eq!(opts.domain("[::1]:6514"), "::1");
        let opts = TlsOptions {
            domain: Some("override".to_string()),
            insecure_skip_verify: false,
        };
        assert_eq!(opts.domain("logs.example.com:6514"), "override");
    }

    #[rstest]
    fn tls_handshake_respects_timeout(tcp_listener: TcpListener) {
        let addr = tcp_listener.local_addr().unwrap();
        let (accepted_tx, accepted_rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = tcp_listener.accept().expect("accept connection");
            accepted_tx.send(()).expect("signal accepted");
            // Hold the connection open without ever speaking TLS.
            thread::sleep(Duration::from_secs(2));
            drop(stream);
        });

        let (result_tx, result_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut config = config_for("tls", addr.to_string());
            config.tls = TlsOptions {
                domain: Some("localhost".into()),
                insecure_skip_verify: true,
            };
            let start = Instant::now();
            let ok = TlsTransport.connect(&config).is_ok();
            result_tx
                .send((ok, start.elapsed()))
                .expect("handshake duration should send");
        });

        accepted_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("connection must be accepted");
        let (ok, elapsed) = result_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("handshake result should arrive");
        assert!(!ok, "handshake should fail for stalled peer");
        assert!(
            elapsed < Duration::from_secs(2),
            "handshake should respect timeout, elapsed {:?}",
            elapsed
        );
    }
}
