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

//! syslog facility, level & priority.
//!
//! A syslog PRI value is `facility * 8 + severity`; [`Facility`] discriminants are pre-multiplied
//! (as in `<syslog.h>`) so a [`Priority`] is just the bitwise-or of the two. The names accepted by
//! [`Facility::from_str`] & [`Level::from_str`] are the keywords used in `syslog.conf`.
//!
//! [`Facility::from_str`]: std::str::FromStr::from_str

use crate::record::Source;

type StdResult<T, E> = std::result::Result<T, E>;

/// The twenty-four facilities common to RFCs [3164] & [5424].
///
/// [3164]: https://datatracker.ietf.org/doc/html/rfc3164
/// [5424]: https://datatracker.ietf.org/doc/html/rfc5424
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Facility {
    LOG_KERN = 0 << 3,
    LOG_USER = 1 << 3,
    LOG_MAIL = 2 << 3,
    LOG_DAEMON = 3 << 3,
    LOG_AUTH = 4 << 3,
    LOG_SYSLOG = 5 << 3,
    LOG_LPR = 6 << 3,
    LOG_NEWS = 7 << 3,
    LOG_UUCP = 8 << 3,
    LOG_CRON = 9 << 3,
    LOG_AUTHPRIV = 10 << 3,
    LOG_FTP = 11 << 3,
    LOG_NTP = 12 << 3,
    LOG_AUDIT = 13 << 3,
    LOG_ALERT = 14 << 3,
    LOG_CLOCK = 15 << 3,
    LOG_LOCAL0 = 16 << 3,
    LOG_LOCAL1 = 17 << 3,
    LOG_LOCAL2 = 18 << 3,
    LOG_LOCAL3 = 19 << 3,
    LOG_LOCAL4 = 20 << 3,
    LOG_LOCAL5 = 21 << 3,
    LOG_LOCAL6 = 22 << 3,
    LOG_LOCAL7 = 23 << 3,
}

const FACILITY_NAMES: [(&str, Facility); 24] = [
    ("kern", Facility::LOG_KERN),
    ("user", Facility::LOG_USER),
    ("mail", Facility::LOG_MAIL),
    ("daemon", Facility::LOG_DAEMON),
    ("auth", Facility::LOG_AUTH),
    ("syslog", Facility::LOG_SYSLOG),
    ("lpr", Facility::LOG_LPR),
    ("news", Facility::LOG_NEWS),
    ("uucp", Facility::LOG_UUCP),
    ("cron", Facility::LOG_CRON),
    ("authpriv", Facility::LOG_AUTHPRIV),
    ("ftp", Facility::LOG_FTP),
    ("ntp", Facility::LOG_NTP),
    ("audit", Facility::LOG_AUDIT),
    ("alert", Facility::LOG_ALERT),
    ("clock", Facility::LOG_CLOCK),
    ("local0", Facility::LOG_LOCAL0),
    ("local1", Facility::LOG_LOCAL1),
    ("local2", Facility::LOG_LOCAL2),
    ("local3", Facility::LOG_LOCAL3),
    ("local4", Facility::LOG_LOCAL4),
    ("local5", Facility::LOG_LOCAL5),
    ("local6", Facility::LOG_LOCAL6),
    ("local7", Facility::LOG_LOCAL7),
];

impl std::default::Default for Facility {
    /// The default facility is `LOG_USER`.
    fn default() -> Self {
        Facility::LOG_USER
    }
}

impl Facility {
    /// The `syslog.conf` keyword for this facility
    pub fn name(&self) -> &'static str {
        FACILITY_NAMES
            .iter()
            .find(|(_, f)| f == self)
            .map(|(name, _)| *name)
            .unwrap_or("user")
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Facility {
    type Err = UnknownName;
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let s = s.strip_prefix("log_").unwrap_or(&s);
        FACILITY_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, f)| *f)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// The eight severities, numbered as in the `syslog()` manual [page].
///
/// [page]: https://man7.org/linux/man-pages/man3/syslog.3.html
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    LOG_EMERG,
    LOG_ALERT,
    LOG_CRIT,
    LOG_ERR,
    LOG_WARNING,
    LOG_NOTICE,
    LOG_INFO,
    LOG_DEBUG,
}

const LEVEL_NAMES: [(&str, Level); 8] = [
    ("emerg", Level::LOG_EMERG),
    ("alert", Level::LOG_ALERT),
    ("crit", Level::LOG_CRIT),
    ("err", Level::LOG_ERR),
    ("warning", Level::LOG_WARNING),
    ("notice", Level::LOG_NOTICE),
    ("info", Level::LOG_INFO),
    ("debug", Level::LOG_DEBUG),
];

impl Level {
    pub fn name(&self) -> &'static str {
        LEVEL_NAMES[*self as usize].0
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Level {
    type Err = UnknownName;
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let s = s.strip_prefix("log_").unwrap_or(&s);
        LEVEL_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, l)| *l)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// A facility/severity pair, rendered on the wire as its numeric PRI code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Priority {
    pub facility: Facility,
    pub level: Level,
}

impl Priority {
    pub fn new(facility: Facility, level: Level) -> Priority {
        Priority { facility, level }
    }
    /// The PRI value: facility code times eight, plus severity
    pub fn code(&self) -> u8 {
        self.facility as u8 | self.level as u8
    }
    /// Map an output stream to a priority: standard error is more severe than standard output, &
    /// anything we don't recognize is attributed to a daemon.
    pub fn for_source(source: &Source) -> Priority {
        match source {
            Source::Stdout => Priority::new(Facility::LOG_USER, Level::LOG_INFO),
            Source::Stderr => Priority::new(Facility::LOG_USER, Level::LOG_ERR),
            Source::Other(_) => Priority::new(Facility::LOG_DAEMON, Level::LOG_INFO),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{}", self.code())
    }
}

/// A facility or level name that `syslog.conf` wouldn't recognize, either
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownName(pub String);

impl std::fmt::Display for UnknownName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> StdResult<(), std::fmt::Error> {
        write!(f, "{:?} is not a syslog facility or level", self.0)
    }
}

impl std::error::Error for UnknownName {}

#[cfg(test)]
mod facility_level_tests {
    use super::*;

    #[test]
    fn test_pri() {
        assert_eq!(14, Priority::new(Facility::LOG_USER, Level::LOG_INFO).code());
        assert_eq!(14, Priority::for_source(&Source::Stdout).code());
        assert_eq!(11, Priority::for_source(&Source::Stderr).code());
        assert_eq!(30, Priority::for_source(&Source::Other("tty".into())).code());
        assert_eq!(format!("{}", Facility::LOG_FTP), "ftp".to_string());
        assert_eq!(format!("{:?}", Facility::LOG_FTP), "LOG_FTP".to_string());
    }

    #[test]
    fn test_names() {
        assert_eq!("local3".parse::<Facility>(), Ok(Facility::LOG_LOCAL3));
        assert_eq!("LOG_DAEMON".parse::<Facility>(), Ok(Facility::LOG_DAEMON));
        assert!("printer".parse::<Facility>().is_err());
        assert_eq!("warning".parse::<Level>(), Ok(Level::LOG_WARNING));
        assert_eq!(Level::LOG_DEBUG.name(), "debug");
        assert_eq!(
            "local7".parse::<Facility>().unwrap().to_string(),
            "local7".to_string()
        );
    }
}
