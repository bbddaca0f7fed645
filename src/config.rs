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

//! Adapter configuration.
//!
//! Everything here is read exactly once, when the [`Adapter`](crate::adapter::Adapter) is built,
//! & is immutable thereafter. [`AdapterConfig::from_env`] is a thin convenience over the
//! conventional `SYSLOG_*` environment variables; it is written in terms of
//! [`AdapterConfig::from_lookup`] so that callers (& tests) can supply their own source of
//! settings rather than mutating the process environment.

use crate::{
    error::{Error, Result},
    facility::{Facility, Level},
    hostname::DEFAULT_IDENTITY_PATH,
    transport::TlsOptions,
};

use std::{path::PathBuf, time::Duration};

type StdResult<T, E> = std::result::Result<T, E>;

/// Number of consecutive reconnect attempts tolerated when none is configured
pub const DEFAULT_RETRY_BUDGET: u32 = 10;
/// Applied when establishing a connection (& to the TLS handshake)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Applied to each write on stream transports
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default base delay between reconnect attempts
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(10);
/// Default ceiling on the delay between reconnect attempts
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(1);
/// Scheme used when a route doesn't name one
pub const DEFAULT_SCHEME: &str = "udp";

/// Interpret a configured retry budget. Anything other than a non-negative integer (including
/// nothing at all) yields [`DEFAULT_RETRY_BUDGET`]; this is never an error.
pub fn parse_retry_budget(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_RETRY_BUDGET)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         wire formats                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The overall shape of each line
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SyslogFormat {
    /// `<PRI>TIMESTAMP HOSTNAME TAG[PID]: [SD] DATA`
    #[default]
    Rfc3164,
    /// `<PRI>1 TIMESTAMP HOSTNAME TAG PID - SD DATA`
    Rfc5424,
}

impl std::str::FromStr for SyslogFormat {
    type Err = Error;
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfc3164" => Ok(SyslogFormat::Rfc3164),
            "rfc5424" => Ok(SyslogFormat::Rfc5424),
            other => Err(Error::config(format!("unsupported syslog format: {}", other))),
        }
    }
}

/// Per-field template fragments. Each may be a literal, an action, or any mix of the two.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldTemplates {
    pub priority: String,
    pub timestamp: String,
    pub hostname: String,
    pub tag: String,
    pub pid: String,
    pub data: String,
}

impl std::default::Default for FieldTemplates {
    fn default() -> Self {
        FieldTemplates {
            priority: "{{.Priority}}".to_string(),
            timestamp: "{{.Timestamp}}".to_string(),
            hostname: "{{.Hostname}}".to_string(),
            tag: "{{.Tag}}".to_string(),
            pid: "{{.Pid}}".to_string(),
            data: "{{.Data}}".to_string(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      transport settings                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Bounded, jittered exponential backoff between reconnect attempts. A zero `base` disables
/// sleeping altogether.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl std::default::Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    /// Reconnect immediately after a failure
    pub fn none() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }
}

/// Where & how to connect.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Registry key: "tcp", "udp", "tls", "unix" or "unixgram" out of the box
    pub scheme: String,
    /// `host:port`, or a filesystem path for the Unix schemes
    pub address: String,
    pub retry_budget: u32,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub tls: TlsOptions,
}

impl TransportConfig {
    pub fn new<S: Into<String>, A: Into<String>>(scheme: S, address: A) -> TransportConfig {
        TransportConfig {
            scheme: scheme.into(),
            address: address.into(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            backoff: BackoffPolicy::default(),
            tls: TlsOptions::default(),
        }
    }
}

/// A `syslog+tcp://host:port`-style destination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub scheme: String,
    pub address: String,
}

impl Route {
    /// Parse `syslog[+scheme]://address`. The scheme defaults to [`DEFAULT_SCHEME`].
    pub fn parse(route: &str) -> Result<Route> {
        let (adapter, address) = route.split_once("://").ok_or_else(|| {
            Error::config(format!("{:?} is not of the form adapter://address", route))
        })?;
        let scheme = match adapter.split_once('+') {
            Some(("syslog", scheme)) if !scheme.is_empty() => scheme,
            None if adapter == "syslog" => DEFAULT_SCHEME,
            _ => {
                return Err(Error::config(format!(
                    "{:?} does not name the syslog adapter",
                    adapter
                )))
            }
        };
        if address.is_empty() {
            return Err(Error::config(format!("{:?} has no address", route)));
        }
        Ok(Route {
            scheme: scheme.to_string(),
            address: address.to_string(),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      struct AdapterConfig                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Everything needed to build an [`Adapter`](crate::adapter::Adapter).
#[derive(Clone, Debug)]
pub struct AdapterConfig {
    pub transport: TransportConfig,
    pub format: SyslogFormat,
    pub fields: FieldTemplates,
    /// Template fragment for the structured-data block, _sans_ brackets
    pub structured_data: Option<String>,
    /// Literal text appended to the tag
    pub append_tag: Option<String>,
    /// Override the facility derived from each record's output stream
    pub facility: Option<Facility>,
    /// Override the severity derived from each record's output stream
    pub severity: Option<Level>,
    pub identity_path: PathBuf,
}

impl AdapterConfig {
    pub fn new<S: Into<String>, A: Into<String>>(scheme: S, address: A) -> AdapterConfig {
        AdapterConfig {
            transport: TransportConfig::new(scheme, address),
            format: SyslogFormat::default(),
            fields: FieldTemplates::default(),
            structured_data: None,
            append_tag: None,
            facility: None,
            severity: None,
            identity_path: PathBuf::from(DEFAULT_IDENTITY_PATH),
        }
    }
    pub fn from_route(route: &Route) -> AdapterConfig {
        AdapterConfig::new(route.scheme.clone(), route.address.clone())
    }
    /// Read `SYSLOG_*` & `RETRY_COUNT` from the process environment.
    pub fn from_env<S: Into<String>, A: Into<String>>(
        scheme: S,
        address: A,
    ) -> Result<AdapterConfig> {
        AdapterConfig::from_lookup(scheme, address, |key| std::env::var(key).ok())
    }
    /// Build a configuration, taking overrides from `lookup`.
    ///
    /// | key                      | meaning                                    |
    /// |--------------------------|--------------------------------------------|
    /// | `SYSLOG_FORMAT`          | `rfc3164` (default) or `rfc5424`           |
    /// | `SYSLOG_PRIORITY`        | priority fragment                          |
    /// | `SYSLOG_TIMESTAMP`       | timestamp fragment                         |
    /// | `SYSLOG_HOSTNAME`        | hostname fragment                          |
    /// | `SYSLOG_TAG`             | tag fragment                               |
    /// | `SYSLOG_PID`             | pid fragment                               |
    /// | `SYSLOG_DATA`            | data fragment                              |
    /// | `SYSLOG_STRUCTURED_DATA` | structured-data fragment                   |
    /// | `SYSLOG_FACILITY`        | facility keyword (`local0`, `daemon`, ...) |
    /// | `SYSLOG_SEVERITY`        | severity keyword (`err`, `notice`, ...)    |
    /// | `RETRY_COUNT`            | retry budget                               |
    pub fn from_lookup<S, A, F>(scheme: S, address: A, lookup: F) -> Result<AdapterConfig>
    where
        S: Into<String>,
        A: Into<String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AdapterConfig::new(scheme, address);
        if let Some(format) = lookup("SYSLOG_FORMAT") {
            config.format = format.parse()?;
        }
        let fields = &mut config.fields;
        for (key, slot) in [
            ("SYSLOG_PRIORITY", &mut fields.priority),
            ("SYSLOG_TIMESTAMP", &mut fields.timestamp),
            ("SYSLOG_HOSTNAME", &mut fields.hostname),
            ("SYSLOG_TAG", &mut fields.tag),
            ("SYSLOG_PID", &mut fields.pid),
            ("SYSLOG_DATA", &mut fields.data),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }
        config.structured_data = lookup("SYSLOG_STRUCTURED_DATA").filter(|s| !s.is_empty());
        if let Some(facility) = lookup("SYSLOG_FACILITY") {
            config.facility = Some(facility.parse::<Facility>().map_err(Error::config)?);
        }
        if let Some(severity) = lookup("SYSLOG_SEVERITY") {
            config.severity = Some(severity.parse::<Level>().map_err(Error::config)?);
        }
        config.transport.retry_budget = parse_retry_budget(lookup("RETRY_COUNT").as_deref());
        Ok(config)
    }
    pub fn with_format(mut self, format: SyslogFormat) -> Self {
        self.format = format;
        self
    }
    pub fn with_fields(mut self, fields: FieldTemplates) -> Self {
        self.fields = fields;
        self
    }
    pub fn with_structured_data<S: Into<String>>(mut self, sd: S) -> Self {
        self.structured_data = Some(sd.into());
        self
    }
    pub fn with_append_tag<S: Into<String>>(mut self, suffix: S) -> Self {
        self.append_tag = Some(suffix.into());
        self
    }
    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facility = Some(facility);
        self
    }
    pub fn with_severity(mut self, severity: Level) -> Self {
        self.severity = Some(severity);
        self
    }
    pub fn with_identity_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.identity_path = path.into();
        self
    }
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.transport.retry_budget = budget;
        self
    }
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.transport.backoff = backoff;
        self
    }
    pub fn with_timeouts(mut self, connect: Duration, write: Duration) -> Self {
        self.transport.connect_timeout = connect;
        self.transport.write_timeout = write;
        self
    }
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.transport.tls = tls;
        self
    }
}
