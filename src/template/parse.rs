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

//! Turning a format string into a tree.
//!
//! The grammar is a small subset of Go's `text/template` (which is what most syslog format strings
//! in the wild are written in):
//!
//! ```text
//! template := ( text | '{{' pipeline '}}' )*
//! pipeline := command ( '|' command )*
//! command  := IDENT operand* | operand
//! operand  := '.' | FIELD | STRING | RAWSTRING | INT | '(' pipeline ')' FIELD*
//! ```
//!
//! `FIELD` is a chain like `.Entity.Labels`. A field chain may follow a closing parenthesis only
//! if there's no intervening whitespace.

use super::funcs::{self, Helper};

type StdResult<T, E> = std::result::Result<T, E>;

#[derive(Clone, Debug)]
pub enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Clone, Debug)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

/// A resolved helper; fn pointers taking references don't reliably implement `Debug`
#[derive(Clone, Copy)]
pub struct Func(pub Helper);

impl std::fmt::Debug for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<helper>")
    }
}

#[derive(Clone, Debug)]
pub enum Command {
    Call {
        name: String,
        func: Func,
        args: Vec<Operand>,
    },
    Operand(Operand),
}

#[derive(Clone, Debug)]
pub enum Operand {
    Dot,
    Field(Box<Operand>, Vec<String>),
    Str(String),
    Int(i64),
    Sub(Pipeline),
}

/// Why a format string was rejected
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    Syntax { offset: usize, message: String },
    UnknownFunction { offset: usize, name: String },
}

fn syntax<T>(offset: usize, message: impl Into<String>) -> StdResult<T, ParseError> {
    Err(ParseError::Syntax {
        offset,
        message: message.into(),
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             lexing                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, PartialEq)]
enum Token {
    LParen,
    RParen,
    Pipe,
    Dot,
    Field(Vec<String>),
    Ident(String),
    Str(String),
    Int(i64),
}

#[derive(Clone, Debug)]
struct Lexeme {
    token: Token,
    offset: usize,
    /// Preceded by whitespace (or the start of the action)
    spaced: bool,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Scan an identifier starting at `i`; returns it & the index just past it
fn scan_ident(src: &str, i: usize) -> (String, usize) {
    let bytes = src.as_bytes();
    let mut j = i;
    while j < bytes.len() && is_ident_char(bytes[j]) {
        j += 1;
    }
    (src[i..j].to_string(), j)
}

/// Scan a double-quoted string whose opening quote is at `i`
fn scan_quoted(src: &str, i: usize) -> StdResult<(String, usize), ParseError> {
    let mut out = String::new();
    let mut chars = src[i + 1..].char_indices();
    while let Some((k, c)) = chars.next() {
        match c {
            '"' => return Ok((out, i + 1 + k + 1)),
            '\\' => match chars.next() {
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((k, other)) => {
                    return syntax(i + 1 + k, format!("unknown escape sequence \\{}", other))
                }
                None => break,
            },
            '\n' => return syntax(i, "newline in quoted string"),
            c => out.push(c),
        }
    }
    syntax(i, "unterminated quoted string")
}

/// Scan the body of an action starting just after its `{{`; returns the tokens & the index just
/// past the closing `}}`
fn lex_action(src: &str, start: usize) -> StdResult<(Vec<Lexeme>, usize), ParseError> {
    let bytes = src.as_bytes();
    let mut lexemes = Vec::new();
    let mut i = start;
    let mut spaced = true;
    loop {
        if i >= bytes.len() {
            return syntax(start - 2, "unclosed action");
        }
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            spaced = true;
            i += 1;
            continue;
        }
        let offset = i;
        let token = match b {
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Ok((lexemes, i + 2)),
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b'|' => {
                i += 1;
                Token::Pipe
            }
            b'"' => {
                let (s, next) = scan_quoted(src, i)?;
                i = next;
                Token::Str(s)
            }
            b'`' => match src[i + 1..].find('`') {
                Some(k) => {
                    let s = src[i + 1..i + 1 + k].to_string();
                    i = i + 1 + k + 1;
                    Token::Str(s)
                }
                None => return syntax(i, "unterminated raw quoted string"),
            },
            b'.' => {
                let mut path = Vec::new();
                let mut j = i;
                while j < bytes.len()
                    && bytes[j] == b'.'
                    && bytes.get(j + 1).copied().map_or(false, is_ident_start)
                {
                    let (name, next) = scan_ident(src, j + 1);
                    path.push(name);
                    j = next;
                }
                if path.is_empty() {
                    i += 1;
                    Token::Dot
                } else {
                    i = j;
                    Token::Field(path)
                }
            }
            b'-' | b'0'..=b'9' => {
                let mut j = if b == b'-' { i + 1 } else { i };
                let digits = j;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j == digits {
                    return syntax(i, "bad number syntax");
                }
                if j < bytes.len() && is_ident_char(bytes[j]) {
                    return syntax(i, format!("bad number syntax: {:?}", &src[i..=j]));
                }
                let n = src[i..j]
                    .parse::<i64>()
                    .or_else(|_| syntax(i, format!("integer out of range: {}", &src[i..j])))?;
                i = j;
                Token::Int(n)
            }
            b if is_ident_start(b) => {
                let (name, next) = scan_ident(src, i);
                i = next;
                Token::Ident(name)
            }
            _ => {
                let c = src[i..].chars().next().unwrap_or('?');
                return syntax(i, format!("unexpected {:?} in action", c));
            }
        };
        lexemes.push(Lexeme {
            token,
            offset,
            spaced,
        });
        spaced = false;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            parsing                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
    /// Offset of the action's closing delimiter, for errors at end-of-input
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }
    fn next(&mut self) -> Option<Lexeme> {
        let lexeme = self.lexemes.get(self.pos).cloned();
        if lexeme.is_some() {
            self.pos += 1;
        }
        lexeme
    }
    fn offset(&self) -> usize {
        self.peek().map(|l| l.offset).unwrap_or(self.end)
    }
    fn at_operand(&self) -> bool {
        matches!(
            self.peek().map(|l| &l.token),
            Some(Token::Dot | Token::Field(_) | Token::Str(_) | Token::Int(_) | Token::LParen)
        )
    }
    fn pipeline(&mut self) -> StdResult<Pipeline, ParseError> {
        let mut commands = vec![self.command()?];
        while let Some(Token::Pipe) = self.peek().map(|l| &l.token) {
            self.pos += 1;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }
    fn command(&mut self) -> StdResult<Command, ParseError> {
        if let Some(Lexeme {
            token: Token::Ident(name),
            offset,
            ..
        }) = self.peek().cloned()
        {
            self.pos += 1;
            let func = funcs::lookup(&name)
                .map(Func)
                .ok_or(ParseError::UnknownFunction {
                    offset,
                    name: name.clone(),
                })?;
            let mut args = Vec::new();
            while self.at_operand() {
                args.push(self.operand()?);
            }
            return Ok(Command::Call { name, func, args });
        }
        if !self.at_operand() {
            return syntax(self.offset(), "missing value for command");
        }
        let operand = self.operand()?;
        if self.at_operand() {
            return syntax(self.offset(), "can't give argument to non-function");
        }
        Ok(Command::Operand(operand))
    }
    fn operand(&mut self) -> StdResult<Operand, ParseError> {
        let offset = self.offset();
        let base = match self.next().map(|l| l.token) {
            Some(Token::Dot) => Operand::Dot,
            Some(Token::Field(path)) => Operand::Field(Box::new(Operand::Dot), path),
            Some(Token::Str(s)) => Operand::Str(s),
            Some(Token::Int(n)) => Operand::Int(n),
            Some(Token::LParen) => {
                let inner = self.pipeline()?;
                match self.next().map(|l| l.token) {
                    Some(Token::RParen) => Operand::Sub(inner),
                    _ => return syntax(offset, "unclosed left paren"),
                }
            }
            _ => return syntax(offset, "expected an operand"),
        };
        // `(...).Field`
        let adjacent = match (&base, self.peek()) {
            (
                Operand::Sub(_),
                Some(Lexeme {
                    token: Token::Field(path),
                    spaced: false,
                    ..
                }),
            ) => Some(path.clone()),
            _ => None,
        };
        match adjacent {
            Some(path) => {
                self.pos += 1;
                Ok(Operand::Field(Box::new(base), path))
            }
            None => Ok(base),
        }
    }
}

/// Parse `src` into a sequence of literal text & actions.
pub fn parse(src: &str) -> StdResult<Vec<Node>, ParseError> {
    let mut nodes = Vec::new();
    let mut pos = 0;
    while let Some(k) = src[pos..].find("{{") {
        if k > 0 {
            nodes.push(Node::Text(src[pos..pos + k].to_string()));
        }
        let start = pos + k + 2;
        let (lexemes, next) = lex_action(src, start)?;
        if lexemes.is_empty() {
            return syntax(start - 2, "missing value for command");
        }
        let mut parser = Parser {
            lexemes,
            pos: 0,
            end: next - 2,
        };
        let pipeline = parser.pipeline()?;
        if let Some(extra) = parser.peek() {
            return syntax(extra.offset, format!("unexpected {:?} in action", extra.token));
        }
        nodes.push(Node::Action(pipeline));
        pos = next;
    }
    if pos < src.len() {
        nodes.push(Node::Text(src[pos..].to_string()));
    }
    Ok(nodes)
}
