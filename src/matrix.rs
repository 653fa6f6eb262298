//! Build Matrix
//!
//! An ordered mapping from axis name to candidate values, and its cartesian
//! expansion into one assignment per combination. Axis declaration order
//! drives the generated item order, so the mapping preserves the order of
//! the specification file.

use crate::error::{KeeperError, Result};
use crate::pattern::Value;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// One concrete choice of value per axis.
pub type MatrixAssignment = BTreeMap<String, String>;

/// Ordered axis name -> candidate values mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisMap(Vec<(String, Vec<String>)>);

impl AxisMap {
    pub fn new(axes: Vec<(String, Vec<String>)>) -> Self {
        AxisMap(axes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter().map(|(k, v)| (k, v))
    }
}

impl<'de> Deserialize<'de> for AxisMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AxisMapVisitor;

        impl<'de> Visitor<'de> for AxisMapVisitor {
            type Value = AxisMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping from axis name to a list of values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<AxisMap, A::Error> {
                let mut axes: Vec<(String, Vec<String>)> = Vec::new();
                while let Some((key, values)) = access.next_entry::<String, Vec<String>>()? {
                    if axes.iter().any(|(k, _)| k == &key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate matrix axis '{key}'"
                        )));
                    }
                    axes.push((key, values));
                }
                Ok(AxisMap(axes))
            }
        }

        deserializer.deserialize_map(AxisMapVisitor)
    }
}

/// Expand the matrix into all assignments, in a stable declaration-driven
/// order: earlier-declared axes vary fastest.
pub fn expand_matrix(axes: &AxisMap) -> Result<Vec<MatrixAssignment>> {
    if axes.is_empty() {
        return Err(KeeperError::Invariant("empty build matrix".into()));
    }
    let mut combinations = vec![MatrixAssignment::new()];
    for (key, values) in axes.iter() {
        if values.is_empty() {
            return Err(KeeperError::Invariant(format!(
                "matrix axis '{key}' has no values"
            )));
        }
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for value in values {
            for combination in &combinations {
                let mut extended = combination.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        combinations = next;
    }
    Ok(combinations)
}

/// View an assignment as a template root value.
pub fn assignment_value(assignment: &MatrixAssignment) -> Value {
    Value::map_of(assignment.iter().map(|(k, v)| (k.clone(), v.clone())))
}
