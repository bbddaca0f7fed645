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

//! The records the host hands us.
//!
//! A [`LogRecord`] is one line of output observed from some monitored [`Entity`] (a container, a
//! service, a child process...). [syslog-forward](crate) never produces these itself; they arrive
//! on a channel owned by the host & are only ever read.

use chrono::prelude::*;

use std::collections::BTreeMap;

/// The output stream a line was captured from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Stdout,
    Stderr,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Stdout => "stdout",
            Source::Stderr => "stderr",
            Source::Other(s) => s,
        }
    }
}

impl std::convert::From<&str> for Source {
    fn from(s: &str) -> Self {
        match s {
            "stdout" => Source::Stdout,
            "stderr" => Source::Stderr,
            other => Source::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime metadata for the thing that produced a line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    /// Display name; may arrive with a leading NUL (or `/`) delimiter which the renderer strips
    pub name: String,
    /// The hostname the entity reports for itself
    pub hostname: String,
    pub pid: u32,
    pub labels: BTreeMap<String, String>,
}

/// One line of upstream output plus its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub entity: Entity,
    pub data: String,
    pub time: DateTime<Utc>,
    pub source: Source,
}

impl LogRecord {
    /// A record stamped with the current time
    pub fn new<S: Into<String>>(entity: Entity, source: Source, data: S) -> LogRecord {
        LogRecord {
            entity,
            data: data.into(),
            time: Utc::now(),
            source,
        }
    }
    pub fn at(mut self, time: DateTime<Utc>) -> LogRecord {
        self.time = time;
        self
    }
}
