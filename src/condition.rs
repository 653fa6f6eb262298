//! Condition Evaluator
//!
//! A condition is either absent (vacuously true), a single
//! `<template> ==|!= <template>` string, or a list of conditions treated as
//! a short-circuiting AND. Operands are template-expanded before an exact
//! string comparison; surrounding double quotes are stripped.

use crate::error::{KeeperError, Result};
use crate::pattern::{expand, Bindings};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    One(String),
    All(Vec<Condition>),
}

impl Condition {
    pub fn eval(&self, bindings: &Bindings) -> Result<bool> {
        match self {
            Condition::All(items) => {
                for item in items {
                    if !item.eval(bindings)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::One(raw) => eval_one(raw, bindings),
        }
    }
}

/// Evaluate an optional condition; `None` is vacuously true.
pub fn eval_condition(condition: Option<&Condition>, bindings: &Bindings) -> Result<bool> {
    match condition {
        None => Ok(true),
        Some(c) => c.eval(bindings),
    }
}

fn eval_one(raw: &str, bindings: &Bindings) -> Result<bool> {
    let (operator, equality) = if raw.contains("==") {
        ("==", true)
    } else if raw.contains("!=") {
        ("!=", false)
    } else {
        return Err(KeeperError::Syntax(format!("unsupported condition: '{raw}'")));
    };
    let operands: Vec<&str> = raw.split(operator).collect();
    if operands.len() != 2 {
        return Err(KeeperError::Syntax(format!(
            "wrong number of operands in condition: '{raw}'"
        )));
    }
    let a = expand(&operands[0].trim().replace('"', ""), bindings)?;
    let b = expand(&operands[1].trim().replace('"', ""), bindings)?;
    Ok(if equality { a == b } else { a != b })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Value;

    fn base(value: &str) -> Bindings {
        Bindings::new().bind("matrix", Value::map_of([("base", value), ("coq", "dev")]))
    }

    fn one(raw: &str) -> Condition {
        Condition::One(raw.to_string())
    }

    #[test]
    fn equality_forms() {
        let latest = base("latest");
        let flambda = base("4.09.0-flambda");
        assert!(one(r#"{matrix[base]}=="latest""#).eval(&latest).unwrap());
        assert!(one(r#"{matrix[base]} == "latest""#).eval(&latest).unwrap());
        assert!(one(r#" "{matrix[base]}" == "latest""#).eval(&latest).unwrap());
        assert!(one(r#"{matrix[base]}!="latest""#).eval(&flambda).unwrap());
        assert!(one(r#"{matrix[base]} != "latest""#).eval(&flambda).unwrap());
        assert!(!one(r#"{matrix[base]} == "latest""#).eval(&flambda).unwrap());
    }

    #[test]
    fn conjunction_short_circuits() {
        let b = base("latest");
        let both = Condition::All(vec![
            one(r#"{matrix[base]} == "latest""#),
            one(r#"{matrix[coq]} == "dev""#),
        ]);
        assert!(both.eval(&b).unwrap());
        let falsy = Condition::All(vec![
            one(r#"{matrix[base]} != "latest""#),
            // Would be a lookup error, but the AND short-circuits first.
            one(r#"{matrix[nope]} == "x""#),
        ]);
        assert!(!falsy.eval(&b).unwrap());
    }

    #[test]
    fn vacuous_and_malformed() {
        let b = base("latest");
        assert!(eval_condition(None, &b).unwrap());
        assert!(matches!(
            one("{matrix[base]} latest").eval(&b),
            Err(KeeperError::Syntax(_))
        ));
        assert!(matches!(
            one("a == b == c").eval(&b),
            Err(KeeperError::Syntax(_))
        ));
    }
}
