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

//! Rendering [`LogRecord`]s as syslog lines.
//!
//! # Introduction
//!
//! The line layout is fixed by the [`SyslogFormat`]; each field within it is a template fragment
//! (see [`FieldTemplates`]). The two are spliced into a single format string & compiled exactly
//! once. For each record we then build a fresh context [`Value`] & execute the template against
//! it. Fragments may refer to:
//!
//! | field        | value                                                      |
//! |--------------|------------------------------------------------------------|
//! | `.Priority`  | the PRI code, derived from the output stream               |
//! | `.Timestamp` | RFC 3339, to the second, in UTC                            |
//! | `.Hostname`  | resolved & sanitized, lower-case                           |
//! | `.Tag`       | the entity's display name, leading delimiters removed      |
//! | `.Pid`       | the entity's process ID                                    |
//! | `.Data`      | the payload                                                |
//! | `.Source`    | `stdout`, `stderr`, ...                                    |
//! | `.Id`        | the entity's ID                                            |
//! | `.Name`      | the entity's display name, verbatim                        |
//! | `.Labels`    | the entity's labels                                        |
//! | `.Entity`    | the entity itself (`.Entity.Hostname` is *not* sanitized)  |
//!
//! Every rendered line ends in exactly one `\n`.

use crate::{
    config::{AdapterConfig, SyslogFormat},
    error::{Error, Result},
    facility::{Facility, Level, Priority},
    hostname::HostnameResolver,
    record::LogRecord,
    template::{CompiledTemplate, Value},
};

use bytes::BufMut;
use chrono::prelude::*;

use std::{collections::BTreeMap, sync::Arc};

/// Quote `text` as a template string literal, so that it renders verbatim.
fn literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    out.push_str("{{ \"");
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push_str("\" }}");
    out
}

/// Splice the configured fragments into a single format string.
pub fn template_source(config: &AdapterConfig) -> String {
    let fields = &config.fields;
    let tag = match &config.append_tag {
        Some(suffix) if !suffix.is_empty() => format!("{}{}", fields.tag, literal(suffix)),
        _ => fields.tag.clone(),
    };
    let sd = config.structured_data.as_deref().filter(|sd| !sd.is_empty());
    match config.format {
        SyslogFormat::Rfc3164 => format!(
            "<{}>{} {} {}[{}]: {}{}",
            fields.priority,
            fields.timestamp,
            fields.hostname,
            tag,
            fields.pid,
            sd.map(|sd| format!("[{}] ", sd)).unwrap_or_default(),
            fields.data
        ),
        SyslogFormat::Rfc5424 => format!(
            "<{}>1 {} {} {} {} - {} {}",
            fields.priority,
            fields.timestamp,
            fields.hostname,
            tag,
            fields.pid,
            sd.map(|sd| format!("[{}]", sd))
                .unwrap_or_else(|| "-".to_string()),
            fields.data
        ),
    }
}

/// The display name, minus any leading NUL (or other control) characters & one leading '/'
pub fn tag(name: &str) -> String {
    let name = name.trim_start_matches(|c: char| c.is_control());
    name.strip_prefix('/').unwrap_or(name).to_string()
}

/// RFC 3339, whole seconds, with a `Z` suffix
pub fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Turns [`LogRecord`]s into wire-ready lines.
///
/// A `Renderer` is immutable once built, so it can be shared freely between threads.
#[derive(Clone, Debug)]
pub struct Renderer {
    template: Arc<CompiledTemplate>,
    resolver: HostnameResolver,
    facility: Option<Facility>,
    severity: Option<Level>,
}

impl Renderer {
    /// Compile the template described by `config` & read the host identity file it names. A
    /// template that fails to compile is a configuration error.
    pub fn new(config: &AdapterConfig) -> Result<Renderer> {
        Renderer::with_resolver(config, HostnameResolver::load(&config.identity_path))
    }
    pub fn with_resolver(config: &AdapterConfig, resolver: HostnameResolver) -> Result<Renderer> {
        let template = CompiledTemplate::compile("syslog", &template_source(config))
            .map_err(Error::config)?;
        Ok(Renderer {
            template: Arc::new(template),
            resolver,
            facility: config.facility,
            severity: config.severity,
        })
    }
    pub fn template(&self) -> &CompiledTemplate {
        &self.template
    }
    pub fn resolver(&self) -> &HostnameResolver {
        &self.resolver
    }
    fn priority(&self, record: &LogRecord) -> Priority {
        let mut pri = Priority::for_source(&record.source);
        if let Some(facility) = self.facility {
            pri.facility = facility;
        }
        if let Some(severity) = self.severity {
            pri.level = severity;
        }
        pri
    }
    /// The value `record` is rendered against
    pub fn context(&self, record: &LogRecord) -> Value {
        let entity = &record.entity;
        let labels = Value::from(entity.labels.clone());

        let mut raw = BTreeMap::new();
        raw.insert("Id".to_string(), Value::from(entity.id.as_str()));
        raw.insert("Name".to_string(), Value::from(entity.name.as_str()));
        raw.insert("Hostname".to_string(), Value::from(entity.hostname.as_str()));
        raw.insert("Pid".to_string(), Value::from(entity.pid));
        raw.insert("Labels".to_string(), labels.clone());

        let pri = self.priority(record);
        let mut ctx = BTreeMap::new();
        ctx.insert("Priority".to_string(), Value::from(pri.code()));
        ctx.insert("Facility".to_string(), Value::from(pri.facility.name()));
        ctx.insert("Severity".to_string(), Value::from(pri.level.to_string()));
        ctx.insert("Timestamp".to_string(), Value::from(timestamp(&record.time)));
        ctx.insert(
            "Hostname".to_string(),
            Value::from(self.resolver.resolve(record).to_lowercase()),
        );
        ctx.insert("Tag".to_string(), Value::from(tag(&entity.name)));
        ctx.insert("Pid".to_string(), Value::from(entity.pid));
        ctx.insert("Data".to_string(), Value::from(record.data.as_str()));
        ctx.insert("Source".to_string(), Value::from(record.source.as_str()));
        ctx.insert("Id".to_string(), Value::from(entity.id.as_str()));
        ctx.insert("Name".to_string(), Value::from(entity.name.as_str()));
        ctx.insert("Labels".to_string(), labels);
        ctx.insert("Entity".to_string(), Value::Map(raw));
        Value::Map(ctx)
    }
    /// Produce the exact bytes to be sent for `record`, newline included.
    pub fn render(&self, record: &LogRecord) -> Result<Vec<u8>> {
        let mut line = String::new();
        self.template.execute_into(&self.context(record), &mut line)?;
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(buf)
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::{
        config::FieldTemplates,
        record::{Entity, Source},
    };

    use rstest::rstest;

    fn container() -> Entity {
        Entity {
            id: "8dfafdbc3a40".to_string(),
            name: "\0container".to_string(),
            hostname: "8dfafdbc3a40".to_string(),
            pid: 1234,
            ..Default::default()
        }
    }

    fn record(source: Source, data: &str) -> LogRecord {
        LogRecord::new(container(), source, data)
            .at(Utc.with_ymd_and_hms(2022, 8, 21, 14, 30, 5).unwrap())
    }

    /// Every field overridden with a literal token
    fn placeholders() -> FieldTemplates {
        FieldTemplates {
            priority: "PRIORITY".to_string(),
            timestamp: "TIMESTAMP".to_string(),
            hostname: "HOSTNAME".to_string(),
            tag: "TAG".to_string(),
            pid: "PID".to_string(),
            data: "DATA".to_string(),
        }
    }

    fn renderer(config: &AdapterConfig) -> Renderer {
        Renderer::with_resolver(config, HostnameResolver::default()).unwrap()
    }

    #[test]
    fn literal_fields() {
        let config = AdapterConfig::new("tcp", "127.0.0.1:514").with_fields(FieldTemplates {
            data: "{{.Data}}".to_string(),
            ..placeholders()
        });
        let line = renderer(&config)
            .render(&record(Source::Stdout, "test 1"))
            .unwrap();
        assert_eq!(line, b"<PRIORITY>TIMESTAMP HOSTNAME TAG[PID]: test 1\n".to_vec());
    }

    #[test]
    fn default_layout() {
        let config = AdapterConfig::new("tcp", "127.0.0.1:514");
        let r = Renderer::with_resolver(&config, HostnameResolver::with_identity("Docker-Host\n"))
            .unwrap();
        let line = r.render(&record(Source::Stdout, "test 1")).unwrap();
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "<14>2022-08-21T14:30:05Z docker-host container[1234]: test 1\n"
        );
    }

    #[rstest]
    #[case(r#"{{ replace "oink oink oink" "k" "ky" 2}}"#, Value::from(""), "[oinky oinky oink]")]
    #[case(r#"{{ join . "-" }}"#, Value::from(vec!["foo", "bar"]), "[foo-bar]")]
    #[case(r#"{{ index (split "foo/bar" "/") 1 }}"#, Value::from(""), "[bar]")]
    fn structured_data_helpers(#[case] sd: &str, #[case] dot: Value, #[case] expected: &str) {
        let config = AdapterConfig::new("tcp", "127.0.0.1:514")
            .with_format(SyslogFormat::Rfc5424)
            .with_fields(placeholders())
            .with_structured_data(sd);
        assert_eq!(
            renderer(&config).template().execute(&dot).unwrap(),
            format!("<PRIORITY>1 TIMESTAMP HOSTNAME TAG PID - {} DATA", expected)
        );
    }

    #[rstest]
    #[case(Source::Stdout, "<14>")]
    #[case(Source::Stderr, "<11>")]
    #[case(Source::Other("journal".to_string()), "<30>")]
    fn priority_from_source(#[case] source: Source, #[case] prefix: &str) {
        let config = AdapterConfig::new("udp", "127.0.0.1:514");
        let line = String::from_utf8(renderer(&config).render(&record(source, "x")).unwrap())
            .unwrap();
        assert!(line.starts_with(prefix), "{}", line);
    }

    #[test]
    fn facility_override() {
        let config = AdapterConfig::new("udp", "127.0.0.1:514").with_facility(Facility::LOG_LOCAL0);
        let r = renderer(&config);
        let line = String::from_utf8(r.render(&record(Source::Stderr, "x")).unwrap()).unwrap();
        // local0.err
        assert!(line.starts_with("<131>"), "{}", line);
    }

    #[test]
    fn severity_override() {
        let config = AdapterConfig::new("udp", "127.0.0.1:514")
            .with_severity(Level::LOG_WARNING)
            .with_fields(FieldTemplates {
                data: "{{.Facility}}.{{.Severity}}".to_string(),
                ..FieldTemplates::default()
            });
        let r = renderer(&config);
        let line = String::from_utf8(r.render(&record(Source::Stderr, "x")).unwrap()).unwrap();
        // user.warning, whichever stream the record came from
        assert!(line.starts_with("<12>"), "{}", line);
        assert!(line.ends_with(": user.warning\n"), "{}", line);

        let config = config.with_facility(Facility::LOG_LOCAL0);
        let r = renderer(&config);
        let line = String::from_utf8(r.render(&record(Source::Stdout, "x")).unwrap()).unwrap();
        assert!(line.starts_with("<132>"), "{}", line);
        assert!(line.ends_with(": local0.warning\n"), "{}", line);
    }

    #[rstest]
    #[case("\0container", "container")]
    #[case("/container", "container")]
    #[case("\0/container", "container")]
    #[case("//container", "/container")]
    #[case("container", "container")]
    #[case("", "")]
    fn tags(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(tag(name), expected);
    }

    #[test]
    fn appended_tag_is_literal() {
        let config = AdapterConfig::new("udp", "127.0.0.1:514")
            .with_fields(FieldTemplates {
                tag: "{{.Tag}}".to_string(),
                ..placeholders()
            })
            .with_append_tag("-{{\"x\"}}");
        let line = renderer(&config).render(&record(Source::Stdout, "x")).unwrap();
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "<PRIORITY>TIMESTAMP HOSTNAME container-{{\"x\"}}[PID]: DATA\n"
        );
    }

    #[test]
    fn rfc3164_structured_data() {
        let config = AdapterConfig::new("udp", "127.0.0.1:514")
            .with_fields(placeholders())
            .with_structured_data("{{.Source}}");
        let line = renderer(&config).render(&record(Source::Stderr, "x")).unwrap();
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "<PRIORITY>TIMESTAMP HOSTNAME TAG[PID]: [stderr] DATA\n"
        );
    }

    #[test]
    fn context_fields() {
        let mut entity = container();
        entity.labels.insert("app".to_string(), "web".to_string());
        let config = AdapterConfig::new("udp", "127.0.0.1:514").with_fields(FieldTemplates {
            data: "{{.Labels.app}} {{.Entity.Name | printf}}".to_string(),
            ..FieldTemplates::default()
        });
        // `printf` isn't one of ours
        assert!(matches!(
            Renderer::with_resolver(&config, HostnameResolver::default()),
            Err(Error::Config { .. })
        ));

        let config = AdapterConfig::new("udp", "127.0.0.1:514").with_fields(FieldTemplates {
            data: "{{.Labels.app}} {{.Id}} {{.Source}} {{.Entity.Pid}}".to_string(),
            ..FieldTemplates::default()
        });
        let r = renderer(&config);
        let rec = LogRecord::new(entity, Source::Stdout, "ignored");
        let line = String::from_utf8(r.render(&rec).unwrap()).unwrap();
        assert!(line.ends_with(": web 8dfafdbc3a40 stdout 1234\n"), "{}", line);
    }

    #[test]
    fn execution_error_is_a_render_error() {
        let config = AdapterConfig::new("udp", "127.0.0.1:514").with_fields(FieldTemplates {
            data: "{{ join .Data \",\" }}".to_string(),
            ..FieldTemplates::default()
        });
        let err = renderer(&config)
            .render(&record(Source::Stdout, "x"))
            .unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
        assert!(!err.is_terminal());
    }

    #[test]
    fn hostname_never_breaks_the_line() {
        let mut entity = container();
        entity.hostname = "Evil\r\n<11>forged".to_string();
        let config = AdapterConfig::new("udp", "127.0.0.1:514");
        let line = renderer(&config)
            .render(&LogRecord::new(entity, Source::Stdout, "x"))
            .unwrap();
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(line.last(), Some(&b'\n'));
        assert!(String::from_utf8(line).unwrap().contains(" evil container[1234]: "));
    }

    #[test]
    fn parses_as_rfc5424() {
        let config = AdapterConfig::new("udp", "127.0.0.1:514").with_format(SyslogFormat::Rfc5424);
        let r = Renderer::with_resolver(&config, HostnameResolver::with_identity("collector-01"))
            .unwrap();
        let line = String::from_utf8(r.render(&record(Source::Stderr, "disk full")).unwrap())
            .unwrap();
        let msg = syslog_rfc5424::parse_message(line.trim_end()).unwrap();
        assert_eq!(msg.severity, syslog_rfc5424::SyslogSeverity::SEV_ERR);
        assert_eq!(msg.facility, syslog_rfc5424::SyslogFacility::LOG_USER);
        assert_eq!(msg.hostname.as_deref(), Some("collector-01"));
        assert_eq!(msg.appname.as_deref(), Some("container"));
        assert_eq!(msg.msg, "disk full");
    }
}
