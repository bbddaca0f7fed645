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

//! Functions callable from templates.
//!
//! The set is fixed: `replace`, `join` & `split`, plus the `index` builtin. A template naming
//! anything else fails to compile.

use super::value::Value;

type StdResult<T, E> = std::result::Result<T, E>;

/// A template function: evaluated arguments in, a value (or a complaint) out
pub type Helper = fn(&[Value]) -> StdResult<Value, String>;

const HELPERS: [(&str, Helper); 4] = [
    ("index", index),
    ("join", join),
    ("replace", replace),
    ("split", split),
];

/// Find the function registered under `name`
pub fn lookup(name: &str) -> Option<Helper> {
    HELPERS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

fn arity(args: &[Value], want: usize) -> StdResult<(), String> {
    if args.len() == want {
        Ok(())
    } else {
        Err(format!(
            "wrong number of args: want {} got {}",
            want,
            args.len()
        ))
    }
}

fn scalar(v: &Value, what: &str) -> StdResult<String, String> {
    v.as_scalar()
        .ok_or_else(|| format!("{} must be a string, not a {}", what, v.kind()))
}

/// `replace subject old new count`: replace the first `count` occurrences of `old`, or all of them
/// if `count` is negative
pub fn replace(args: &[Value]) -> StdResult<Value, String> {
    arity(args, 4)?;
    let subject = scalar(&args[0], "subject")?;
    let old = scalar(&args[1], "old")?;
    let new = scalar(&args[2], "new")?;
    let count = args[3]
        .as_int()
        .ok_or_else(|| format!("count must be an integer, not a {}", args[3].kind()))?;
    Ok(Value::Str(if count < 0 {
        subject.replace(&old, &new)
    } else {
        subject.replacen(&old, &new, count as usize)
    }))
}

/// `join sequence separator`: the elements (which must be scalars) separated by `separator`
pub fn join(args: &[Value]) -> StdResult<Value, String> {
    arity(args, 2)?;
    let items = match &args[0] {
        Value::List(items) => items,
        other => return Err(format!("can't join a {}", other.kind())),
    };
    let sep = scalar(&args[1], "separator")?;
    let parts = items
        .iter()
        .map(|item| scalar(item, "each element"))
        .collect::<StdResult<Vec<String>, String>>()?;
    Ok(Value::Str(parts.join(&sep)))
}

/// `split subject separator`: every piece between separators, empty pieces included. An empty
/// separator splits into individual characters.
pub fn split(args: &[Value]) -> StdResult<Value, String> {
    arity(args, 2)?;
    let subject = scalar(&args[0], "subject")?;
    let sep = scalar(&args[1], "separator")?;
    let pieces: Vec<Value> = if sep.is_empty() {
        subject.chars().map(|c| Value::Str(c.to_string())).collect()
    } else {
        subject.split(sep.as_str()).map(Value::from).collect()
    };
    Ok(Value::List(pieces))
}

/// `index collection key...`: successive list elements (by integer) or map entries (by string)
pub fn index(args: &[Value]) -> StdResult<Value, String> {
    let (first, keys) = args
        .split_first()
        .ok_or_else(|| "wrong number of args: want at least 1 got 0".to_string())?;
    let mut cur = first;
    for key in keys {
        cur = match (cur, key) {
            (Value::List(items), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .ok_or_else(|| format!("index out of range: {}", i))?,
            (Value::Map(map), Value::Str(k)) => map
                .get(k)
                .ok_or_else(|| format!("map has no entry for key {:?}", k))?,
            (coll, key) => {
                return Err(format!(
                    "can't index item of type {} with a {}",
                    coll.kind(),
                    key.kind()
                ))
            }
        };
    }
    Ok(cur.clone())
}
