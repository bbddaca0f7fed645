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

//! Shared plumbing for the manual test binaries: forward each line of standard input to a local
//! syslog daemon.

use syslog_forward::{
    adapter::Adapter,
    config::AdapterConfig,
    record::{Entity, LogRecord, Source},
};

use std::io::BufRead;

/// Install a `fmt` subscriber, then forward stdin over `scheme` to `address` until EOF.
pub fn forward_stdin(scheme: &str, address: &str) {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = AdapterConfig::from_env(scheme, address).unwrap();
    let mut adapter = Adapter::new(config).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(256);
    adapter.stream(rx).unwrap();

    let entity = Entity {
        name: "forward-test".to_string(),
        pid: std::process::id(),
        ..Default::default()
    };
    for line in std::io::stdin().lock().lines() {
        let line = line.unwrap();
        if tx
            .send(LogRecord::new(entity.clone(), Source::Stdout, line))
            .is_err()
        {
            break;
        }
    }
    drop(tx);
    if let Err(err) = adapter.join() {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}
