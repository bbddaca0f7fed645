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
//! [syslog-forward](crate) errors

use backtrace::Backtrace;

/// [syslog-forward](crate) error type
///
/// The match arms are chosen on the basis of how far the failure reaches: a [`Config`] error means
/// no adapter was ever built, a [`Render`] error costs one record, a [`Connect`] or [`Write`]
/// error costs (at most) the record in flight & kicks off a reconnect, and [`FailedTerminal`]
/// (or [`Spawn`]) means the adapter is gone for good.
///
/// [`Config`]: Error::Config
/// [`Render`]: Error::Render
/// [`Connect`]: Error::Connect
/// [`Write`]: Error::Write
/// [`FailedTerminal`]: Error::FailedTerminal
/// [`Spawn`]: Error::Spawn
#[non_exhaustive]
pub enum Error {
    /// The adapter was handed a stream after it had already been given one
    AlreadyStreaming { back: Backtrace },
    /// Invalid configuration (bad template, unknown scheme, unsupported format, ...)
    Config {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
    /// Failed to establish a transport connection
    Connect {
        address: String,
        source: std::io::Error,
        back: Backtrace,
    },
    /// The retry budget was exhausted; the adapter is permanently down
    FailedTerminal { attempts: u32, back: Backtrace },
    /// Failed to render a single record
    Render {
        source: crate::template::Error,
        back: Backtrace,
    },
    /// The adapter was shut down while an operation was in progress
    Shutdown,
    /// The operating system wouldn't give us a thread for the stream worker
    Spawn {
        source: std::io::Error,
        back: Backtrace,
    },
    /// Failed to write to the current connection
    Write {
        source: std::io::Error,
        back: Backtrace,
    },
}

impl Error {
    /// Shorthand for wrapping a configuration problem
    pub fn config<E>(err: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Error::Config {
            source: err.into(),
            back: Backtrace::new(),
        }
    }
    /// True if this error means the adapter will never send again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::FailedTerminal { .. } | Error::Config { .. } | Error::Spawn { .. }
        )
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::AlreadyStreaming { .. } => write!(f, "This adapter is already streaming"),
            Error::Config { source, .. } => write!(f, "Configuration error: {}", source),
            Error::Connect { address, source, .. } => {
                write!(f, "While connecting to {}, got {}", address, source)
            }
            Error::FailedTerminal { attempts, .. } => write!(
                f,
                "Gave up reconnecting after {} consecutive failed attempts",
                attempts
            ),
            Error::Render { source, .. } => write!(f, "While rendering a record, got {}", source),
            Error::Shutdown => write!(f, "The adapter has been shut down"),
            Error::Spawn { source, .. } => {
                write!(f, "While spawning the stream worker, got {}", source)
            }
            Error::Write { source, .. } => write!(f, "While sending a syslog line, got {}", source),
            _ => write!(f, "Other syslog-forward error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::AlreadyStreaming { back } => write!(f, "{}\n{:#?}", self, back),
            Error::Config { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Connect { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::FailedTerminal { attempts: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Render { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Spawn { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Write { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            err => write!(f, "syslog-forward error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config { source, .. } => Some(source.as_ref()),
            Error::Connect { source, .. } => Some(source),
            Error::Render { source, .. } => Some(source),
            Error::Spawn { source, .. } => Some(source),
            Error::Write { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl std::convert::From<crate::template::Error> for Error {
    fn from(err: crate::template::Error) -> Self {
        Error::Render {
            source: err,
            back: Backtrace::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
