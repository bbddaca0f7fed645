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

//! Working out what to put in the HOSTNAME field.
//!
//! When running inside a container, the name of the *host* is typically bind-mounted into a
//! well-known file ([`DEFAULT_IDENTITY_PATH`]). If that file is present & non-empty its contents
//! win; otherwise we use whatever hostname the record's entity reports for itself.
//!
//! The identity file is outside our control, so its contents are sanitized before use: a value
//! with an embedded line break would let whoever wrote that file forge additional syslog lines.

use crate::record::LogRecord;

use tracing::debug;

use std::path::Path;

/// Where the host's identity is conventionally mounted
pub const DEFAULT_IDENTITY_PATH: &str = "/etc/host_hostname";

/// The RFC 5424 NILVALUE; the last resort when nothing else yields a name
pub const NILVALUE: &str = "-";

/// Strip trailing whitespace & line terminators, then cut at any line break that remains.
///
/// Returns `None` if nothing is left.
pub fn sanitize(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(|c: char| c == '\r' || c == '\n' || c.is_whitespace());
    let first_line = match trimmed.find(['\r', '\n']) {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };
    if first_line.is_empty() {
        None
    } else {
        Some(first_line.to_string())
    }
}

/// Resolves the HOSTNAME for each record.
///
/// The identity file is read once, at construction; [`resolve`](HostnameResolver::resolve) is a
/// pure function of that value & the record.
#[derive(Clone, Debug, Default)]
pub struct HostnameResolver {
    identity: Option<String>,
}

impl HostnameResolver {
    /// Read the identity from `path`. An absent, unreadable or blank file is not an error; the
    /// resolver will simply fall back to per-record hostnames.
    pub fn load<P: AsRef<Path>>(path: P) -> HostnameResolver {
        let path = path.as_ref();
        let identity = match std::fs::read(path) {
            Ok(bytes) => sanitize(&String::from_utf8_lossy(&bytes)),
            Err(err) => {
                debug!("No host identity at {}: {}", path.display(), err);
                None
            }
        };
        if identity.is_none() {
            debug!(
                "Falling back to per-record hostnames ({} yielded nothing)",
                path.display()
            );
        }
        HostnameResolver { identity }
    }
    /// A resolver with a fixed identity (which is still sanitized)
    pub fn with_identity(identity: &str) -> HostnameResolver {
        HostnameResolver {
            identity: sanitize(identity),
        }
    }
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
    /// The hostname to use for `record`, free of line breaks.
    pub fn resolve(&self, record: &LogRecord) -> String {
        if let Some(identity) = &self.identity {
            return identity.clone();
        }
        sanitize(&record.entity.hostname).unwrap_or_else(local_hostname)
    }
}

/// This machine's name, or failing that an IP address, or failing _that_ the NILVALUE
fn local_hostname() -> String {
    ::hostname::get()
        .ok()
        .and_then(|hn| sanitize(&hn.to_string_lossy()))
        .or_else(|| {
            local_ip_address::local_ip()
                .ok()
                .map(|ip| ip.to_string())
        })
        .unwrap_or_else(|| NILVALUE.to_string())
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::record::{Entity, Source};

    use rstest::rstest;

    use std::io::Write;

    fn record(hostname: &str) -> LogRecord {
        LogRecord::new(
            Entity {
                hostname: hostname.to_string(),
                ..Default::default()
            },
            Source::Stdout,
            "hello",
        )
    }

    #[rstest]
    #[case("hostname\r\n", Some("hostname"))]
    #[case("hostname\n\n\r", Some("hostname"))]
    #[case("hostname  \t\n", Some("hostname"))]
    #[case("host\r\nforged line", Some("host"))]
    #[case("\r\n", None)]
    #[case("", None)]
    fn test_sanitize(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(sanitize(raw).as_deref(), expected);
    }

    #[test]
    fn identity_file_has_no_line_feed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hostname\r\n").unwrap();
        let resolver = HostnameResolver::load(file.path());
        let name = resolver.resolve(&record("8dfafdbc3a40"));
        assert_eq!(name, "hostname");
        assert!(!name.contains('\r'));
        assert!(!name.contains('\n'));
    }

    #[test]
    fn falls_back_to_record() {
        let resolver = HostnameResolver::load("/i/am/not/there");
        assert!(resolver.identity().is_none());
        assert_eq!(resolver.resolve(&record("8dfafdbc3a40")), "8dfafdbc3a40");

        let mut blank = tempfile::NamedTempFile::new().unwrap();
        blank.write_all(b"\n").unwrap();
        let resolver = HostnameResolver::load(blank.path());
        assert_eq!(resolver.resolve(&record("box\n")), "box");
    }

    #[test]
    fn never_empty() {
        let name = HostnameResolver::default().resolve(&record(""));
        assert!(!name.is_empty());
        assert!(!name.contains('\n'));
    }
}
