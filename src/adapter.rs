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

//! The forwarding adapter.
//!
//! # Introduction
//!
//! An [`Adapter`] ties the other pieces together: at construction it compiles its template, looks
//! up its transport & makes an initial connection (any failure there is returned to the caller).
//! [`Adapter::stream`] then hands it a channel of [`LogRecord`]s, which a dedicated worker thread
//! drains: render, write, and on failure reconnect. Delivery is at-most-once; a record whose write
//! fails is not re-sent.
//!
//! # Examples
//!
//! ```rust
//! use syslog_forward::{
//!     adapter::Adapter,
//!     config::AdapterConfig,
//!     record::{Entity, LogRecord, Source},
//! };
//! let server = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
//! let mut adapter =
//!     Adapter::new(AdapterConfig::new("udp", server.local_addr().unwrap().to_string())).unwrap();
//! let (tx, rx) = crossbeam_channel::unbounded();
//! adapter.stream(rx).unwrap();
//! tx.send(LogRecord::new(Entity::default(), Source::Stdout, "Hello, 世界!")).unwrap();
//! drop(tx);
//! adapter.join().unwrap();
//! ```

use crate::{
    config::AdapterConfig,
    error::{Error, Result},
    record::LogRecord,
    render::Renderer,
    retry::{ConnectionSlot, ReconnectEngine, State},
    transport::TransportRegistry,
};

use backtrace::Backtrace;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

/// The state owned by the stream worker thread
struct Worker {
    renderer: Arc<Renderer>,
    slot: Arc<ConnectionSlot>,
    engine: ReconnectEngine,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self, records: Receiver<LogRecord>, stop: Receiver<()>) -> Result<()> {
        loop {
            select! {
                recv(records) -> msg => match msg {
                    Ok(record) => match self.forward(&record) {
                        Ok(()) => (),
                        Err(Error::Shutdown) => return Ok(()),
                        Err(err) => return Err(err),
                    },
                    Err(_) => {
                        debug!("Record stream closed; stopping.");
                        return Ok(());
                    }
                },
                recv(stop) -> _ => return Ok(()),
            }
        }
    }
    fn forward(&mut self, record: &LogRecord) -> Result<()> {
        let line = match self.renderer.render(record) {
            Ok(line) => line,
            Err(err) => {
                warn!("Dropping a record: {}", err);
                return Ok(());
            }
        };

        let peer_closed = self
            .slot
            .lock()
            .as_mut()
            .map(|conn| conn.peer_closed())
            .unwrap_or(true);
        if peer_closed {
            info!("The collector closed the connection; reconnecting.");
            self.engine.reconnect(&self.slot, &self.shutdown)?;
        }

        let sent = match self.slot.lock().as_mut() {
            Some(conn) => conn.send(&line),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        if let Err(source) = sent {
            let err = Error::Write {
                source,
                back: Backtrace::new(),
            };
            warn!("{}; the record is lost, reconnecting.", err);
            self.engine.reconnect(&self.slot, &self.shutdown)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         struct Adapter                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Forwards [`LogRecord`]s to a syslog collector.
pub struct Adapter {
    renderer: Arc<Renderer>,
    slot: Arc<ConnectionSlot>,
    state: Arc<Mutex<State>>,
    // Present until `stream` moves it onto the worker
    engine: Option<ReconnectEngine>,
    shutdown: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    worker: Option<thread::JoinHandle<Result<()>>>,
}

impl Adapter {
    /// Build an adapter using the standard transports.
    pub fn new(config: AdapterConfig) -> Result<Adapter> {
        Adapter::with_registry(config, &TransportRegistry::standard())
    }
    /// Build an adapter, looking up its transport in `registry`.
    pub fn with_registry(config: AdapterConfig, registry: &TransportRegistry) -> Result<Adapter> {
        Adapter::with_renderer(Renderer::new(&config)?, config, registry)
    }
    /// Build an adapter around an already-constructed [`Renderer`]; `config` supplies only the
    /// transport settings.
    pub fn with_renderer(
        renderer: Renderer,
        config: AdapterConfig,
        registry: &TransportRegistry,
    ) -> Result<Adapter> {
        let transport = registry.lookup(&config.transport.scheme)?;
        let engine = ReconnectEngine::new(transport, Arc::new(config.transport));
        let conn = engine.connect()?;
        let (stop_tx, stop_rx) = bounded(1);
        Ok(Adapter {
            renderer: Arc::new(renderer),
            slot: Arc::new(Mutex::new(Some(conn))),
            state: engine.state_handle(),
            engine: Some(engine),
            shutdown: Arc::new(AtomicBool::new(false)),
            stop_tx,
            stop_rx,
            worker: None,
        })
    }
    pub fn state(&self) -> State {
        *self.state.lock()
    }
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }
    /// Start forwarding everything that arrives on `records`, on a dedicated thread.
    ///
    /// The worker runs until `records` disconnects, the adapter is closed, or the retry budget is
    /// exhausted. An adapter streams at most once.
    pub fn stream(&mut self, records: Receiver<LogRecord>) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        let engine = self.engine.take().ok_or_else(|| Error::AlreadyStreaming {
            back: Backtrace::new(),
        })?;
        let worker = Worker {
            renderer: self.renderer.clone(),
            slot: self.slot.clone(),
            engine,
            shutdown: self.shutdown.clone(),
        };
        let stop = self.stop_rx.clone();
        self.worker = Some(
            thread::Builder::new()
                .name("syslog-forward".to_string())
                .spawn(move || worker.run(records, stop))
                .map_err(|source| Error::Spawn {
                    source,
                    back: Backtrace::new(),
                })?,
        );
        Ok(())
    }
    fn join_worker(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    error!("The stream worker panicked.");
                    Err(Error::Shutdown)
                }
            },
            None => Ok(()),
        }
    }
    /// Wait for the stream worker to finish of its own accord (i.e. for the producer to hang up,
    /// or for the adapter to fail).
    pub fn join(&mut self) -> Result<()> {
        let result = self.join_worker();
        if let Err(err) = &result {
            if err.is_terminal() {
                error!("{}", err);
            }
        }
        result
    }
    /// Stop forwarding & release the connection. Records still queued are not sent.
    pub fn close(&mut self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.stop_tx.try_send(());
        if let Some(mut conn) = self.slot.lock().take() {
            conn.close();
        }
        self.join()
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::{
        config::{BackoffPolicy, FieldTemplates},
        record::{Entity, Source},
    };

    use crossbeam_channel::unbounded;
    use rstest::{fixture, rstest};

    use std::{
        io::{BufRead, BufReader},
        net::{TcpListener, UdpSocket},
        sync::mpsc,
        time::Duration,
    };

    #[fixture]
    fn udp_server() -> UdpSocket {
        let sock = UdpSocket::bind("127.0.0.1:0").expect("bind ephemeral socket");
        sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        sock
    }

    fn config_for(scheme: &str, address: String) -> AdapterConfig {
        AdapterConfig::new(scheme, address)
            .with_identity_path("/nonexistent/host_hostname")
            .with_backoff(BackoffPolicy::none())
            .with_fields(FieldTemplates {
                timestamp: "-".to_string(),
                ..FieldTemplates::default()
            })
    }

    fn record(data: &str) -> LogRecord {
        LogRecord::new(
            Entity {
                name: "/web".to_string(),
                hostname: "web-1".to_string(),
                pid: 7,
                ..Default::default()
            },
            Source::Stdout,
            data,
        )
    }

    fn recv_line(sock: &UdpSocket) -> String {
        let mut buf = [0u8; 1024];
        let n = sock.recv(&mut buf).expect("datagram");
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[test]
    fn construction_errors() {
        let err = Adapter::new(config_for("gopher", "127.0.0.1:70".to_string()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config { .. }));

        let config = config_for("udp", "127.0.0.1:514".to_string()).with_fields(FieldTemplates {
            data: "{{ .Data".to_string(),
            ..FieldTemplates::default()
        });
        assert!(matches!(Adapter::new(config), Err(Error::Config { .. })));

        let addr = TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap();
        let err = Adapter::new(config_for("tcp", addr.to_string())).err().unwrap();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[rstest]
    fn forwards_in_order(udp_server: UdpSocket) {
        let mut adapter =
            Adapter::new(config_for("udp", udp_server.local_addr().unwrap().to_string())).unwrap();
        assert_eq!(adapter.state(), State::Connected);
        let (tx, rx) = unbounded();
        adapter.stream(rx).unwrap();
        for i in 1..=3 {
            tx.send(record(&format!("test {}", i))).unwrap();
        }
        for i in 1..=3 {
            assert_eq!(
                recv_line(&udp_server),
                format!("<14>- web-1 web[7]: test {}\n", i)
            );
        }
        drop(tx);
        adapter.join().unwrap();
        assert_eq!(adapter.state(), State::Connected);
    }

    #[rstest]
    fn streams_once(udp_server: UdpSocket) {
        let mut adapter =
            Adapter::new(config_for("udp", udp_server.local_addr().unwrap().to_string())).unwrap();
        let (_tx, rx) = unbounded();
        adapter.stream(rx.clone()).unwrap();
        assert!(matches!(
            adapter.stream(rx),
            Err(Error::AlreadyStreaming { .. })
        ));
        adapter.close().unwrap();
        // Closing twice is harmless
        adapter.close().unwrap();
    }

    #[rstest]
    fn render_failures_drop_one_record(udp_server: UdpSocket) {
        let config = config_for("udp", udp_server.local_addr().unwrap().to_string()).with_fields(
            FieldTemplates {
                data: r#"{{ index .Labels "app" }}: {{.Data}}"#.to_string(),
                ..FieldTemplates::default()
            },
        );
        let mut adapter = Adapter::new(config).unwrap();
        let (tx, rx) = unbounded();
        adapter.stream(rx).unwrap();

        let mut labelled = record("kept");
        labelled.entity.labels.insert("app".to_string(), "api".to_string());
        tx.send(record("dropped")).unwrap();
        tx.send(labelled).unwrap();

        assert!(recv_line(&udp_server).ends_with("api: kept\n"));
        drop(tx);
        adapter.join().unwrap();
        assert_eq!(adapter.state(), State::Connected);
    }

    #[test]
    fn exhausted_budget_is_terminal() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx_line, rx_line) = mpsc::channel();
        thread::spawn(move || {
            // Read one line, then hang up & stop listening altogether.
            let (stream, _) = listener.accept().expect("accept connection");
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).expect("read line");
            tx_line.send(line).expect("forward line");
        });

        let mut adapter = Adapter::new(config_for("tcp", addr.to_string()).with_retry_budget(2))
            .unwrap();
        let (tx, rx) = unbounded();
        adapter.stream(rx).unwrap();
        tx.send(record("first")).unwrap();
        assert!(rx_line
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .ends_with("first\n"));
        // Give the hangup a moment to arrive; every record after it will need a new connection.
        thread::sleep(Duration::from_millis(100));
        for i in 0..3 {
            // The worker may already have exited, taking the receiver with it
            let _ = tx.send(record(&format!("after {}", i)));
        }

        let err = adapter.join().unwrap_err();
        assert!(matches!(err, Error::FailedTerminal { attempts: 2, .. }));
        assert!(err.is_terminal());
        assert_eq!(adapter.state(), State::Failed);
    }

    #[rstest]
    fn close_stops_the_worker(udp_server: UdpSocket) {
        let mut adapter =
            Adapter::new(config_for("udp", udp_server.local_addr().unwrap().to_string())).unwrap();
        let (tx, rx) = unbounded();
        adapter.stream(rx).unwrap();
        tx.send(record("before close")).unwrap();
        assert!(recv_line(&udp_server).ends_with("before close\n"));
        adapter.close().unwrap();
        assert!(matches!(adapter.stream(unbounded().1), Err(Error::Shutdown)));
    }
}
