//! Pattern Template Engine
//!
//! Expands `{name}` / `{name[modifier]}` placeholders against named root
//! values, with bash-like modifiers chained left to right:
//!
//! - `{var[2:4]}` substring slice
//! - `{var[%.*]}` strip shortest matching suffix (glob)
//! - `{var[%%.*]}` strip longest matching suffix (glob)
//! - `{var[//glob/repl]}` replace all matches
//! - `{var[key]}` plain key or index lookup
//!
//! Keys starting with `_` are reserved and always expand to the empty
//! string. An unknown root name or key is a fatal lookup error.

use crate::error::{KeeperError, Result};
use regex::Regex;
use std::collections::BTreeMap;

/// A value a placeholder chain can traverse.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Build a mapping of plain string entries.
    pub fn map_of<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Value::Str(v.into())))
                .collect(),
        )
    }
}

/// Named root values available to a template.
#[derive(Debug, Clone, Default)]
pub struct Bindings(BTreeMap<String, Value>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    fn root(&self, name: &str) -> Result<Value> {
        // Reserved private prefix: redact instead of failing.
        if name.starts_with('_') {
            return Ok(Value::Str(String::new()));
        }
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| KeeperError::Lookup(format!("unknown placeholder '{{{name}}}'")))
    }
}

/// Translate a simple glob expression (`*`, `?`) to a non-anchored regexp.
pub fn translate(glob: &str, greedy: bool) -> String {
    let star = if greedy { ".*" } else { ".*?" };
    glob.split('*')
        .map(|piece| {
            piece
                .split('?')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".")
        })
        .collect::<Vec<_>>()
        .join(star)
}

fn reverse(text: &str) -> String {
    text.chars().rev().collect()
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| KeeperError::Syntax(format!("bad glob pattern: {e}")))
}

/// Strip the shortest (or longest, when greedy) suffix matching `pattern`.
///
/// A right-anchored match is obtained by reversing both the subject and the
/// glob, anchoring the translated pattern on the left, substituting once and
/// reversing back.
fn strip_suffix_glob(value: &str, pattern: &str, greedy: bool) -> Result<String> {
    let anchored = format!("^{}", translate(&reverse(pattern), greedy));
    let re = compile(&anchored)?;
    let reversed = reverse(value);
    let stripped = re.replace(&reversed, "");
    Ok(reverse(&stripped))
}

/// Replace all non-overlapping matches of `glob` with `replacement`.
fn substitute_glob(value: &str, glob: &str, replacement: &str) -> Result<String> {
    let re = compile(&translate(glob, true))?;
    Ok(re.replace_all(value, replacement).into_owned())
}

fn expect_str(value: &Value, modifier: &str) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        _ => Err(KeeperError::Invariant(format!(
            "modifier '[{modifier}]' expects a string value"
        ))),
    }
}

fn parse_slice(modifier: &str) -> Option<(usize, usize)> {
    let (a, b) = modifier.split_once(':')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit());
    if digits(a) && digits(b) {
        Some((a.parse().ok()?, b.parse().ok()?))
    } else {
        None
    }
}

fn lookup(value: Value, key: &str) -> Result<Value> {
    // Reserved private prefix: redact instead of failing.
    if key.starts_with('_') {
        return Ok(Value::Str(String::new()));
    }
    match value {
        Value::Map(map) => map
            .get(key)
            .cloned()
            .ok_or_else(|| KeeperError::Lookup(format!("unknown key '{key}'"))),
        Value::List(list) => {
            let index: usize = key
                .parse()
                .map_err(|_| KeeperError::Lookup(format!("unknown index '{key}'")))?;
            list.get(index)
                .map(|s| Value::Str(s.clone()))
                .ok_or_else(|| KeeperError::Lookup(format!("index '{index}' out of range")))
        }
        Value::Str(_) => Err(KeeperError::Invariant(format!(
            "cannot index a string value with key '{key}'"
        ))),
    }
}

fn apply_modifier(value: Value, modifier: &str) -> Result<Value> {
    if let Some((a, b)) = parse_slice(modifier) {
        let s = expect_str(&value, modifier)?;
        // Python-like slicing: out-of-range bounds clamp, never fail.
        let sliced: String = s.chars().skip(a).take(b.saturating_sub(a)).collect();
        return Ok(Value::Str(sliced));
    }
    if let Some(pattern) = modifier.strip_prefix("%%") {
        if !pattern.is_empty() {
            let s = expect_str(&value, modifier)?;
            return Ok(Value::Str(strip_suffix_glob(&s, pattern, true)?));
        }
    } else if let Some(pattern) = modifier.strip_prefix('%') {
        if !pattern.is_empty() {
            let s = expect_str(&value, modifier)?;
            return Ok(Value::Str(strip_suffix_glob(&s, pattern, false)?));
        }
    } else if let Some(rest) = modifier.strip_prefix("//") {
        if let Some(sep) = rest.find('/') {
            let (glob, replacement) = (&rest[..sep], &rest[sep + 1..]);
            if !glob.is_empty() {
                let s = expect_str(&value, modifier)?;
                return Ok(Value::Str(substitute_glob(&s, glob, replacement)?));
            }
        }
    }
    // Unrecognized modifier syntax falls back to a plain key/index lookup.
    lookup(value, modifier)
}

fn render(value: Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s),
        Value::List(list) => Ok(list.join(",")),
        Value::Map(_) => Err(KeeperError::Invariant(
            "cannot render a mapping as a string".into(),
        )),
    }
}

/// Expand every placeholder of `template` against `bindings`.
pub fn expand(template: &str, bindings: &Bindings) -> Result<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(KeeperError::Syntax(format!(
                    "single '}}' encountered in template '{template}'"
                )))
            }
            '{' => {
                let mut name = String::new();
                let mut modifiers: Vec<String> = Vec::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '[' => {
                            let mut modifier = String::new();
                            let mut terminated = false;
                            for c in chars.by_ref() {
                                if c == ']' {
                                    terminated = true;
                                    break;
                                }
                                modifier.push(c);
                            }
                            if !terminated {
                                return Err(KeeperError::Syntax(format!(
                                    "missing ']' in template '{template}'"
                                )));
                            }
                            modifiers.push(modifier);
                        }
                        _ if modifiers.is_empty() => name.push(c),
                        _ => {
                            return Err(KeeperError::Syntax(format!(
                                "unexpected '{c}' after ']' in template '{template}'"
                            )))
                        }
                    }
                }
                if !closed {
                    return Err(KeeperError::Syntax(format!(
                        "unterminated placeholder in template '{template}'"
                    )));
                }
                if name.is_empty() {
                    return Err(KeeperError::Syntax(format!(
                        "empty placeholder name in template '{template}'"
                    )));
                }
                let mut value = bindings.root(&name)?;
                for modifier in &modifiers {
                    value = apply_modifier(value, modifier)?;
                }
                out.push_str(&render(value)?);
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}
