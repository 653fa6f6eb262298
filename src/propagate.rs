//! Propagation Strategy Resolver
//!
//! Each downstream target carries an ordered rule list; the first matching
//! rule decides the propagation mode for this run. Quantifier rules test a
//! comma-list subset relation over every compiled build item. Manual
//! overrides bypass the rule lists entirely: as soon as one target is
//! overridden, the whole run is manual-only and non-overridden targets are
//! skipped.

use crate::error::{KeeperError, Result};
use crate::matrix::assignment_value;
use crate::pattern::{expand, Bindings, Value};
use crate::plan::BuildItem;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Propagation action selected for a downstream target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    None,
    Minimal,
    Nightly,
    RebuildAll,
    RebuildKeyword,
}

impl FromStr for Mode {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Mode::None),
            "minimal" => Ok(Mode::Minimal),
            "nightly" => Ok(Mode::Nightly),
            "rebuild-all" => Ok(Mode::RebuildAll),
            "rebuild-keyword" => Ok(Mode::RebuildKeyword),
            _ => Err(KeeperError::Syntax(format!("invalid mode keyword '{s}'"))),
        }
    }
}

/// Which external events fired this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Triggers {
    pub nightly: bool,
    pub rebuild_all: bool,
}

/// Raw rule as written in the specification; validated into [`Rule`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub subset: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    Nightly,
    RebuildAll,
    Forall { expr: String, subset: String },
    Exists { expr: String, subset: String },
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub kind: RuleKind,
    pub mode: Mode,
    pub item: Option<String>,
}

/// Validated, ordered rule list of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStrategy {
    pub target: String,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    strategy: Vec<RawRule>,
}

/// Ordered target -> raw strategy table, as declared in the specification.
#[derive(Debug, Clone, Default)]
pub struct PropagateTable(Vec<(String, Vec<RawRule>)>);

impl PropagateTable {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(t, _)| t)
    }

    /// Validate every rule list into its typed form, in declaration order.
    pub fn compile(&self) -> Result<Vec<TargetStrategy>> {
        self.0
            .iter()
            .map(|(target, raw)| {
                let rules = compile_rules(target, raw)?;
                Ok(TargetStrategy {
                    target: target.clone(),
                    rules,
                })
            })
            .collect()
    }
}

impl<'de> Deserialize<'de> for PropagateTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = PropagateTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping from target identifier to a strategy")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<PropagateTable, A::Error> {
                let mut table: Vec<(String, Vec<RawRule>)> = Vec::new();
                while let Some((target, raw)) = access.next_entry::<String, RawTarget>()? {
                    if table.iter().any(|(t, _)| t == &target) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate propagation target '{target}'"
                        )));
                    }
                    table.push((target, raw.strategy));
                }
                Ok(PropagateTable(table))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

fn compile_rules(target: &str, raw: &[RawRule]) -> Result<Vec<Rule>> {
    let syntax = |message: String| KeeperError::Syntax(format!("target '{target}': {message}"));
    let mut rules = Vec::with_capacity(raw.len());
    for (index, rule) in raw.iter().enumerate() {
        let last = index + 1 == raw.len();
        let kind = match rule.when.as_deref() {
            None if last => RuleKind::Default,
            None => {
                return Err(syntax(format!(
                    "rule #{} has no 'when' discriminator but is not the last rule",
                    index + 1
                )))
            }
            Some("nightly") => RuleKind::Nightly,
            Some("rebuild-all") => RuleKind::RebuildAll,
            Some(quantifier) if quantifier == "forall" || quantifier == "exists" => {
                let expr = rule.expr.clone().ok_or_else(|| {
                    syntax(format!("'{quantifier}' rule #{} requires 'expr'", index + 1))
                })?;
                let subset = rule.subset.clone().ok_or_else(|| {
                    syntax(format!("'{quantifier}' rule #{} requires 'subset'", index + 1))
                })?;
                if quantifier == "forall" {
                    RuleKind::Forall { expr, subset }
                } else {
                    RuleKind::Exists { expr, subset }
                }
            }
            Some(other) => {
                return Err(syntax(format!(
                    "unknown 'when' discriminator '{other}' in rule #{}",
                    index + 1
                )))
            }
        };
        if !matches!(kind, RuleKind::Forall { .. } | RuleKind::Exists { .. })
            && (rule.expr.is_some() || rule.subset.is_some())
        {
            return Err(syntax(format!(
                "rule #{} carries 'expr'/'subset' without a quantifier",
                index + 1
            )));
        }
        let mode = rule
            .mode
            .as_deref()
            .ok_or_else(|| syntax(format!("rule #{} is missing 'mode'", index + 1)))?
            .parse::<Mode>()
            .map_err(|e| syntax(format!("rule #{}: {e}", index + 1)))?;
        if mode == Mode::RebuildKeyword && rule.item.is_none() {
            return Err(syntax(format!(
                "rule #{} with mode 'rebuild-keyword' requires 'item'",
                index + 1
            )));
        }
        if mode != Mode::RebuildKeyword && rule.item.is_some() {
            return Err(syntax(format!(
                "rule #{} carries 'item' without mode 'rebuild-keyword'",
                index + 1
            )));
        }
        rules.push(Rule {
            kind,
            mode,
            item: rule.item.clone(),
        });
    }
    Ok(rules)
}

/// Externally supplied explicit decision for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualOverride {
    pub mode: Mode,
    pub keywords: Vec<String>,
}

impl ManualOverride {
    /// Parse a `TARGET=MODE[:kw1,kw2]` command-line argument.
    pub fn parse_arg(arg: &str) -> Result<(String, ManualOverride)> {
        let (target, rest) = arg.split_once('=').ok_or_else(|| {
            KeeperError::Syntax(format!("expected TARGET=MODE[:KEYWORDS], got '{arg}'"))
        })?;
        let (mode_str, keywords) = match rest.split_once(':') {
            Some((m, kw)) => (m, kw.split(',').map(str::to_string).collect()),
            None => (rest, Vec::new()),
        };
        let mode = mode_str.parse::<Mode>()?;
        if mode != Mode::RebuildKeyword && !keywords.is_empty() {
            return Err(KeeperError::Syntax(format!(
                "override '{arg}': keywords are only valid with mode 'rebuild-keyword'"
            )));
        }
        if mode == Mode::RebuildKeyword && keywords.is_empty() {
            return Err(KeeperError::Syntax(format!(
                "override '{arg}': mode 'rebuild-keyword' requires keywords"
            )));
        }
        Ok((
            target.to_string(),
            ManualOverride {
                mode,
                keywords,
            },
        ))
    }
}

/// One line of the resolved propagation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPropagation {
    pub target: String,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

fn item_bindings(item: &BuildItem) -> Bindings {
    Bindings::new()
        .bind("matrix", assignment_value(&item.matrix))
        .bind("tags", Value::List(item.tags.clone()))
        .bind("keywords", Value::List(item.keywords.clone()))
}

/// Comma-list subset test of `expr` against `subset`, expanded per item.
fn subset_holds(item: &BuildItem, expr: &str, subset: &str) -> Result<bool> {
    let bindings = item_bindings(item);
    let left = expand(expr, &bindings)?;
    let right = expand(subset, &bindings)?;
    let allowed: BTreeSet<&str> = right.split(',').collect();
    Ok(left.split(',').all(|e| allowed.contains(e)))
}

fn rule_matches(rule: &Rule, items: &[BuildItem], triggers: Triggers) -> Result<bool> {
    match &rule.kind {
        RuleKind::Nightly => Ok(triggers.nightly),
        RuleKind::RebuildAll => Ok(triggers.rebuild_all),
        RuleKind::Forall { expr, subset } => {
            for item in items {
                if !subset_holds(item, expr, subset)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleKind::Exists { expr, subset } => {
            for item in items {
                if subset_holds(item, expr, subset)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        RuleKind::Default => Ok(true),
    }
}

/// Expand `item` over every build item, flatten the comma lists, dedupe and
/// sort by (length, lexicographic).
fn resolve_keywords(template: &str, items: &[BuildItem]) -> Result<Vec<String>> {
    let mut set = BTreeSet::new();
    for item in items {
        let expanded = expand(template, &item_bindings(item))?;
        for keyword in expanded.split(',') {
            set.insert(keyword.to_string());
        }
    }
    let mut keywords: Vec<String> = set.into_iter().collect();
    keywords.sort_by(|a, b| (a.len(), a.as_str()).cmp(&(b.len(), b.as_str())));
    Ok(keywords)
}

/// Resolve the propagation table for this run.
///
/// Targets resolving to mode `none` are omitted, whether decided by rule or
/// by override. An override naming a target absent from the table is fatal.
pub fn resolve(
    strategies: &[TargetStrategy],
    items: &[BuildItem],
    triggers: Triggers,
    overrides: &BTreeMap<String, ManualOverride>,
) -> Result<Vec<ResolvedPropagation>> {
    let manual_run = !overrides.is_empty();
    if manual_run {
        for target in overrides.keys() {
            if !strategies.iter().any(|s| &s.target == target) {
                return Err(KeeperError::Invariant(format!(
                    "manual override for unknown propagation target '{target}'"
                )));
            }
        }
    }
    let mut resolved = Vec::new();
    for strategy in strategies {
        if manual_run {
            // Manual-only run: targets without an override are skipped.
            if let Some(m) = overrides.get(&strategy.target) {
                if m.mode != Mode::None {
                    resolved.push(ResolvedPropagation {
                        target: strategy.target.clone(),
                        mode: m.mode,
                        keywords: m.keywords.clone(),
                    });
                }
            }
            continue;
        }
        for rule in &strategy.rules {
            if !rule_matches(rule, items, triggers)? {
                continue;
            }
            if rule.mode != Mode::None {
                let keywords = match (&rule.mode, &rule.item) {
                    (Mode::RebuildKeyword, Some(template)) => resolve_keywords(template, items)?,
                    _ => Vec::new(),
                };
                resolved.push(ResolvedPropagation {
                    target: strategy.target.clone(),
                    mode: rule.mode,
                    keywords,
                });
            }
            break;
        }
    }
    Ok(resolved)
}
