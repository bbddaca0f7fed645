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

//! Format-string templates
//! =======================
//!
//! # Introduction
//!
//! Every syslog line [syslog-forward](crate) emits is produced by a [`CompiledTemplate`]: a format
//! string, parsed once when the adapter is built, then executed against each record. The syntax
//! is the `{{ ... }}` action syntax of Go's `text/template`, restricted to field access, literals,
//! function calls, parentheses & pipes:
//!
//! ```rust
//! use syslog_forward::template::{CompiledTemplate, Value};
//! let tmpl = CompiledTemplate::compile("sd", r#"[{{ replace "oink oink oink" "k" "ky" 2 }}]"#)
//!     .unwrap();
//! assert_eq!(tmpl.execute(&Value::from("")).unwrap(), "[oinky oinky oink]");
//! ```
//!
//! The functions available are `replace`, `join`, `split` & `index`; see [`funcs`]. Naming any
//! other function is a compile-time error, as is a malformed action. Type errors (joining a
//! string, indexing past the end of a list, asking for a field that isn't there) can only be
//! detected at execution time, against a particular value, & are reported as
//! [`Error::Execution`].
//!
//! [`funcs`]: crate::template::funcs

pub mod funcs;
mod parse;
pub mod value;

pub use value::Value;

use parse::{Command, Node, Operand, ParseError, Pipeline};

use backtrace::Backtrace;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Template errors
#[non_exhaustive]
pub enum Error {
    /// The format string is malformed
    Syntax {
        template: String,
        offset: usize,
        message: String,
        back: Backtrace,
    },
    /// The format string calls a function we don't provide
    UnknownFunction {
        template: String,
        name: String,
        back: Backtrace,
    },
    /// The template failed against a particular value
    Execution {
        template: String,
        message: String,
        back: Backtrace,
    },
}

impl Error {
    /// True for errors detected when compiling (as opposed to executing) a template
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Error::Syntax { .. } | Error::UnknownFunction { .. })
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Syntax {
                template,
                offset,
                message,
                ..
            } => write!(f, "template {}:{}: {}", template, offset, message),
            Error::UnknownFunction { template, name, .. } => {
                write!(f, "template {}: function {:?} not defined", template, name)
            }
            Error::Execution {
                template, message, ..
            } => write!(f, "template {}: {}", template, message),
            _ => write!(f, "template error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Syntax { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::UnknownFunction { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::Execution { back, .. } => write!(f, "{}\n{:#?}", self, back),
            _ => write!(f, "{}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    struct CompiledTemplate                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A parsed format string, ready to execute against any number of [`Value`]s.
///
/// Instances are immutable; share them freely (the adapter holds its one instance in an `Arc`).
#[derive(Clone, Debug)]
pub struct CompiledTemplate {
    name: String,
    source: String,
    nodes: Vec<Node>,
}

impl CompiledTemplate {
    /// Parse `source`. `name` only serves to identify the template in error messages.
    pub fn compile(name: &str, source: &str) -> Result<CompiledTemplate> {
        let nodes = parse::parse(source).map_err(|err| match err {
            ParseError::Syntax { offset, message } => Error::Syntax {
                template: name.to_string(),
                offset,
                message,
                back: Backtrace::new(),
            },
            ParseError::UnknownFunction { name: func, .. } => Error::UnknownFunction {
                template: name.to_string(),
                name: func,
                back: Backtrace::new(),
            },
        })?;
        Ok(CompiledTemplate {
            name: name.to_string(),
            source: source.to_string(),
            nodes,
        })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The format string this template was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }
    /// Execute this template with `dot` as the current value.
    pub fn execute(&self, dot: &Value) -> Result<String> {
        let mut out = String::new();
        self.execute_into(dot, &mut out)?;
        Ok(out)
    }
    /// Execute this template, appending the output to `out`. On error, `out` may hold partial
    /// output.
    pub fn execute_into(&self, dot: &Value, out: &mut String) -> Result<()> {
        use std::fmt::Write;
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => {
                    let value = self.pipeline(pipeline, dot).map_err(|message| Error::Execution {
                        template: self.name.clone(),
                        message,
                        back: Backtrace::new(),
                    })?;
                    // Writing to a `String` can't fail
                    let _ = write!(out, "{}", value);
                }
            }
        }
        Ok(())
    }
    fn pipeline(&self, pipeline: &Pipeline, dot: &Value) -> StdResult<Value, String> {
        let mut piped: Option<Value> = None;
        for command in &pipeline.commands {
            piped = Some(self.command(command, dot, piped.take())?);
        }
        piped.ok_or_else(|| "empty pipeline".to_string())
    }
    fn command(
        &self,
        command: &Command,
        dot: &Value,
        piped: Option<Value>,
    ) -> StdResult<Value, String> {
        match command {
            Command::Call { name, func, args } => {
                let mut vals = args
                    .iter()
                    .map(|arg| self.operand(arg, dot))
                    .collect::<StdResult<Vec<Value>, String>>()?;
                vals.extend(piped);
                (func.0)(&vals).map_err(|err| format!("error calling {}: {}", name, err))
            }
            Command::Operand(operand) => match piped {
                Some(_) => Err("can't give argument to non-function".to_string()),
                None => self.operand(operand, dot),
            },
        }
    }
    fn operand(&self, operand: &Operand, dot: &Value) -> StdResult<Value, String> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Str(s) => Ok(Value::Str(s.clone())),
            Operand::Int(n) => Ok(Value::Int(*n)),
            Operand::Sub(pipeline) => self.pipeline(pipeline, dot),
            Operand::Field(base, path) => {
                let base = self.operand(base, dot)?;
                let mut cur = &base;
                for name in path {
                    cur = cur.field(name)?;
                }
                Ok(cur.clone())
            }
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use rstest::rstest;

    use std::collections::BTreeMap;

    fn context() -> Value {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        let mut map = BTreeMap::new();
        map.insert("Data".to_string(), Value::from("test 1"));
        map.insert("Path".to_string(), Value::from("foo/bar"));
        map.insert("Pid".to_string(), Value::Int(123));
        map.insert("Labels".to_string(), Value::from(labels));
        Value::Map(map)
    }

    #[rstest]
    #[case(r#"{{ replace "oink oink oink" "k" "ky" 2}}"#, "oinky oinky oink")]
    #[case(r#"{{ index (split "foo/bar" "/") 1 }}"#, "bar")]
    #[case(r#"{{ index (split .Path "/") 0 }}"#, "foo")]
    #[case(r#"{{ split .Path "/" }}"#, "[foo bar]")]
    #[case(r#"{{ "-" | join (split .Path "/") }}"#, "foo-bar")]
    #[case(r#"{{ join (split .Path "/") "," }}"#, "foo,bar")]
    #[case(r#"{{ .Labels.app }}/{{ index .Labels "app" }}"#, "web/web")]
    #[case(r#"<{{.Pid}}> {{ "lit" }} {{ -7 }}"#, "<123> lit -7")]
    #[case(r#"{{ join (split .Path "/") `+` }}"#, "foo+bar")]
    #[case("no actions at all", "no actions at all")]
    fn executes(#[case] src: &str, #[case] expected: &str) {
        let tmpl = CompiledTemplate::compile("test", src).unwrap();
        assert_eq!(tmpl.execute(&context()).unwrap(), expected);
    }

    #[test]
    fn join_over_dot() {
        let tmpl = CompiledTemplate::compile("test", r#"{{ join . "-" }}"#).unwrap();
        assert_eq!(tmpl.execute(&Value::from(vec!["foo", "bar"])).unwrap(), "foo-bar");
        assert_eq!(tmpl.execute(&Value::List(vec![])).unwrap(), "");
        // The wrong shape is an execution error, not a panic
        let err = tmpl.execute(&Value::from("foo")).unwrap_err();
        assert!(!err.is_compile_error());
        assert!(format!("{}", err).contains("join"));
    }

    #[rstest]
    #[case(r#"{{ replace "a" "b" }}"#, "wrong number of args")]
    #[case(r#"{{ index (split "foo" "/") 1 }}"#, "out of range")]
    #[case(r#"{{ .Nope }}"#, "no entry")]
    #[case(r#"{{ .Data.Inner }}"#, "can't evaluate field")]
    #[case(r#"{{ .Data | .Pid }}"#, "non-function")]
    fn execution_errors(#[case] src: &str, #[case] fragment: &str) {
        let tmpl = CompiledTemplate::compile("test", src).unwrap();
        let err = tmpl.execute(&context()).unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
        assert!(
            format!("{}", err).contains(fragment),
            "{} does not mention {:?}",
            err,
            fragment
        );
    }

    #[rstest]
    #[case("{{ .Data")]
    #[case("{{ lower .Data }}")]
    #[case("{{ if .Data }}x{{ end }}")]
    #[case("{{ (.Data }}")]
    fn compile_errors(#[case] src: &str) {
        let err = CompiledTemplate::compile("test", src).unwrap_err();
        assert!(err.is_compile_error(), "{:?}", err);
    }

    #[test]
    fn keeps_source() {
        let tmpl = CompiledTemplate::compile("syslog", "<{{.Priority}}>").unwrap();
        assert_eq!(tmpl.name(), "syslog");
        assert_eq!(tmpl.source(), "<{{.Priority}}>");
    }
}
