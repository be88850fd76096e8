//! Regex filters.
//!
//! The dialect mirrors Python's `re` module, since that is what template
//! authors reach for: `regex_match` anchors at the start, `regex_fullmatch`
//! at both ends, `regex_search` scans. Flags are the CPython numeric
//! values, exposed as the `RE_*` globals.

use crate::geometry::{invalid_args, invalid_op};
use minijinja::{
    Error as MjError, ErrorKind, Value,
    value::{Object, from_args},
};
use regex::{Regex, RegexBuilder};
use std::{collections::BTreeMap, sync::Arc};

pub(crate) const RE_NOFLAG: u32 = 0;
pub(crate) const RE_IGNORECASE: u32 = 2;
pub(crate) const RE_LOCALE: u32 = 4;
pub(crate) const RE_MULTILINE: u32 = 8;
pub(crate) const RE_DOTALL: u32 = 16;
pub(crate) const RE_UNICODE: u32 = 32;
pub(crate) const RE_VERBOSE: u32 = 64;
pub(crate) const RE_ASCII: u32 = 256;

fn compile(pattern: &str, flags: Option<u32>) -> Result<Regex, MjError> {
    let flags = flags.unwrap_or(RE_NOFLAG);
    RegexBuilder::new(pattern)
        .case_insensitive(flags & RE_IGNORECASE != 0)
        .multi_line(flags & RE_MULTILINE != 0)
        .dot_matches_new_line(flags & RE_DOTALL != 0)
        .ignore_whitespace(flags & RE_VERBOSE != 0)
        .unicode(flags & RE_ASCII == 0)
        .build()
        .map_err(|err| invalid_args(format!("invalid pattern: {err}")))
}

/// A successful regex match, exposing `group`, `groups`, `start`, and
/// `end` to templates.
#[derive(Debug)]
pub(crate) struct RegexMatch {
    groups: Vec<Option<String>>,
    named: BTreeMap<String, Option<String>>,
    start: usize,
    end: usize,
}

impl RegexMatch {
    fn new(regex: &Regex, captures: &regex::Captures<'_>) -> RegexMatch {
        let groups = (0..captures.len())
            .map(|i| captures.get(i).map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .map(|name| {
                (
                    name.to_string(),
                    captures.name(name).map(|m| m.as_str().to_string()),
                )
            })
            .collect();
        let full = captures.get(0).expect("group 0 always participates");
        RegexMatch {
            groups,
            named,
            start: full.start(),
            end: full.end(),
        }
    }

    fn group_value(&self, group: Option<&String>) -> Value {
        match group {
            Some(text) => Value::from(text.as_str()),
            None => Value::from(()),
        }
    }
}

impl Object for RegexMatch {
    fn call_method(
        self: &Arc<Self>,
        _state: &minijinja::State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, MjError> {
        match method {
            "group" => {
                if args.is_empty() {
                    return Ok(self.group_value(self.groups[0].as_ref()));
                }
                let (index,): (Value,) = from_args(args)?;
                if let Ok(index) = usize::try_from(index.clone()) {
                    self.groups
                        .get(index)
                        .map(|group| self.group_value(group.as_ref()))
                        .ok_or_else(|| invalid_args(format!("no group {index}")))
                } else if let Some(name) = index.as_str() {
                    self.named
                        .get(name)
                        .map(|group| self.group_value(group.as_ref()))
                        .ok_or_else(|| invalid_args(format!("no group named {name}")))
                } else {
                    Err(invalid_args("group takes an index or a name"))
                }
            }
            "groups" => Ok(Value::from_serialize(&self.groups[1..])),
            "start" => Ok(Value::from(self.start)),
            "end" => Ok(Value::from(self.end)),
            _ => Err(MjError::new(
                ErrorKind::UnknownMethod,
                format!("match object has no method {method}"),
            )),
        }
    }
}

fn captures_to_value(regex: &Regex, text: &str) -> Value {
    match regex.captures(text) {
        Some(captures) => Value::from_object(RegexMatch::new(regex, &captures)),
        None => Value::from(()),
    }
}

pub(crate) fn regex_match(
    string: String,
    pattern: String,
    flags: Option<u32>,
) -> Result<Value, MjError> {
    let regex = compile(&format!("\\A(?:{pattern})"), flags)?;
    Ok(captures_to_value(&regex, &string))
}

pub(crate) fn regex_fullmatch(
    string: String,
    pattern: String,
    flags: Option<u32>,
) -> Result<Value, MjError> {
    let regex = compile(&format!("\\A(?:{pattern})\\z"), flags)?;
    Ok(captures_to_value(&regex, &string))
}

pub(crate) fn regex_search(
    string: String,
    pattern: String,
    flags: Option<u32>,
) -> Result<Value, MjError> {
    let regex = compile(&pattern, flags)?;
    Ok(captures_to_value(&regex, &string))
}

/// Rewrites Python-style backreferences (`\1`, `\g<name>`) into the
/// `${…}` form the regex crate expects, escaping any literal `$`.
fn convert_replacement(replacement: &str) -> String {
    let mut converted = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => converted.push_str("$$"),
            '\\' => match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    converted.push_str("${");
                    while let Some(d) = chars.peek() {
                        if d.is_ascii_digit() {
                            converted.push(*d);
                            let _ = chars.next();
                        } else {
                            break;
                        }
                    }
                    converted.push('}');
                }
                Some('g') => {
                    let _ = chars.next();
                    if chars.peek() == Some(&'<') {
                        let _ = chars.next();
                        converted.push_str("${");
                        while let Some(&c) = chars.peek() {
                            let _ = chars.next();
                            if c == '>' {
                                break;
                            }
                            converted.push(c);
                        }
                        converted.push('}');
                    } else {
                        converted.push('g');
                    }
                }
                Some('\\') => {
                    let _ = chars.next();
                    converted.push('\\');
                }
                Some('n') => {
                    let _ = chars.next();
                    converted.push('\n');
                }
                Some('t') => {
                    let _ = chars.next();
                    converted.push('\t');
                }
                _ => converted.push('\\'),
            },
            _ => converted.push(c),
        }
    }
    converted
}

pub(crate) fn regex_sub(
    string: String,
    pattern: String,
    replacement: String,
    count: Option<usize>,
    flags: Option<u32>,
) -> Result<String, MjError> {
    let regex = compile(&pattern, flags)?;
    let replacement = convert_replacement(&replacement);
    Ok(regex
        .replacen(&string, count.unwrap_or(0), replacement.as_str())
        .into_owned())
}

pub(crate) fn regex_subn(
    string: String,
    pattern: String,
    replacement: String,
    count: Option<usize>,
    flags: Option<u32>,
) -> Result<Value, MjError> {
    let regex = compile(&pattern, flags)?;
    let count = count.unwrap_or(0);
    let mut replaced = regex.find_iter(&string).count();
    if count > 0 {
        replaced = replaced.min(count);
    }
    let replacement = convert_replacement(&replacement);
    let result = regex.replacen(&string, count, replacement.as_str()).into_owned();
    Ok(Value::from(vec![Value::from(result), Value::from(replaced)]))
}

pub(crate) fn regex_split(
    string: String,
    pattern: String,
    maxsplit: Option<usize>,
    flags: Option<u32>,
) -> Result<Value, MjError> {
    let regex = compile(&pattern, flags)?;
    let parts: Vec<&str> = match maxsplit.unwrap_or(0) {
        0 => regex.split(&string).collect(),
        n => regex.splitn(&string, n + 1).collect(),
    };
    Ok(Value::from_serialize(&parts))
}

pub(crate) fn regex_findall(
    string: String,
    pattern: String,
    flags: Option<u32>,
) -> Result<Value, MjError> {
    let regex = compile(&pattern, flags)?;
    let groups = regex.captures_len();
    let values: Vec<Value> = regex
        .captures_iter(&string)
        .map(|captures| match groups {
            1 => Value::from(&captures[0]),
            2 => Value::from(captures.get(1).map(|m| m.as_str()).unwrap_or_default()),
            _ => Value::from_serialize(
                (1..groups)
                    .map(|i| captures.get(i).map(|m| m.as_str()).unwrap_or_default())
                    .collect::<Vec<_>>(),
            ),
        })
        .collect();
    Ok(Value::from(values))
}

pub(crate) fn regex_finditer(
    string: String,
    pattern: String,
    flags: Option<u32>,
) -> Result<Value, MjError> {
    let regex = compile(&pattern, flags)?;
    let matches: Vec<Value> = regex
        .captures_iter(&string)
        .map(|captures| Value::from_object(RegexMatch::new(&regex, &captures)))
        .collect();
    Ok(Value::from(matches))
}
