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
//! Forward a stream of log records to a [`syslog`] [daemon], surviving the daemon going away.
//!
//! [`syslog`]: https://en.wikipedia.org/wiki/Syslog
//! [daemon]: https://en.wikipedia.org/wiki/Daemon_(computing)
//!
//! # Introduction
//!
//! Something (a container runtime, a process supervisor) is watching a number of programs & has
//! their output in hand, line by line, as [`LogRecord`](record::LogRecord)s. It would like those
//! lines to end up at a central collector. [syslog-forward](crate) is the last leg of that
//! journey: it renders each record into a syslog line via a user-supplied template, and writes it
//! over TCP, UDP or TLS (or a Unix socket).
//!
//! The interesting parts are:
//!
//! - the [template](template) language: the `{{ ... }}` syntax of Go's `text/template`, with the
//!   `replace`, `join` & `split` helpers, so that existing format strings carry over unchanged
//!
//! - the [reconnect engine](retry): collectors restart, load balancers drop idle connections, and
//!   so forth. When a write fails or the collector hangs up, the adapter reconnects, giving up only
//!   after a configurable number of consecutive failures
//!
//! - hostname [sanitization](hostname): the hostname may come from a file we don't control; it is
//!   never allowed to smuggle a line break onto the wire
//!
//! # Usage
//!
//! ```rust
//! use syslog_forward::{
//!     adapter::Adapter,
//!     config::AdapterConfig,
//!     record::{Entity, LogRecord, Source},
//! };
//! # let collector = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
//! # let address = collector.local_addr().unwrap().to_string();
//! // Read SYSLOG_FORMAT, SYSLOG_DATA, RETRY_COUNT & friends from the environment...
//! let config = AdapterConfig::from_env("udp", address).unwrap();
//! // connect...
//! let mut adapter = Adapter::new(config).unwrap();
//! // and forward whatever shows up on a channel.
//! let (tx, rx) = crossbeam_channel::bounded(1024);
//! adapter.stream(rx).unwrap();
//! let web = Entity { name: "/web".to_string(), pid: 42, ..Default::default() };
//! tx.send(LogRecord::new(web, Source::Stderr, "GET /favicon.ico 404")).unwrap();
//! drop(tx);
//! adapter.join().unwrap();
//! ```
//!
//! [syslog-forward](crate) logs its own doings through [`tracing`] but never installs a
//! subscriber; that's up to the application.
//!
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html

pub mod adapter;
pub mod config;
pub mod error;
pub mod facility;
pub mod hostname;
pub mod record;
pub mod render;
pub mod retry;
pub mod template;
pub mod transport;
