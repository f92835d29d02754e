//! `strategy.matrix` parsing and expansion.
//!
//! Axes expand as a Cartesian product in declaration order (first axis
//! varies slowest), then `exclude` removes combinations and `include`
//! extends or appends them.

use serde::Deserialize;

use crate::error::{CiError, Result};

/// One expanded matrix combination as ordered `(key, value)` pairs.
pub type Combination = Vec<(String, String)>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "serde_yaml::Mapping")]
pub struct Matrix {
    pub axes: Vec<(String, Vec<String>)>,
    pub include: Vec<Combination>,
    pub exclude: Vec<Combination>,
}

impl TryFrom<serde_yaml::Mapping> for Matrix {
    type Error = String;

    fn try_from(map: serde_yaml::Mapping) -> std::result::Result<Self, Self::Error> {
        let mut matrix = Matrix::default();
        for (key, value) in map {
            let key = key
                .as_str()
                .ok_or_else(|| "matrix keys must be strings".to_string())?
                .to_string();
            match key.as_str() {
                "include" => matrix.include = entries(&key, value)?,
                "exclude" => matrix.exclude = entries(&key, value)?,
                _ => {
                    let serde_yaml::Value::Sequence(items) = value else {
                        return Err(format!("matrix axis '{key}' must be a list"));
                    };
                    let values = items
                        .iter()
                        .map(|v| {
                            scalar_to_string(v).ok_or_else(|| {
                                format!("matrix axis '{key}' must contain only scalar values")
                            })
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    matrix.axes.push((key, values));
                }
            }
        }
        Ok(matrix)
    }
}

fn entries(
    key: &str,
    value: serde_yaml::Value,
) -> std::result::Result<Vec<Combination>, String> {
    let serde_yaml::Value::Sequence(items) = value else {
        return Err(format!("matrix '{key}' must be a list of mappings"));
    };
    items
        .into_iter()
        .map(|item| {
            let serde_yaml::Value::Mapping(map) = item else {
                return Err(format!("matrix '{key}' entries must be mappings"));
            };
            map.into_iter()
                .map(|(k, v)| {
                    let k = k
                        .as_str()
                        .ok_or_else(|| format!("matrix '{key}' keys must be strings"))?
                        .to_string();
                    let v = scalar_to_string(&v)
                        .ok_or_else(|| format!("matrix '{key}.{k}' must be a scalar"))?;
                    Ok((k, v))
                })
                .collect()
        })
        .collect()
}

/// Render a YAML scalar the way it is written in a workflow
/// (`3.11` → `"3.11"`, `true` → `"true"`).
pub fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

impl Matrix {
    pub fn axis_names(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|(name, _)| name.as_str())
    }

    /// Expand into concrete combinations for job `job_id`.
    pub fn expand(&self, job_id: &str) -> Result<Vec<Combination>> {
        let mut combos: Vec<Combination> = if self.axes.is_empty() {
            Vec::new()
        } else {
            let mut acc: Vec<Combination> = vec![Vec::new()];
            for (name, values) in &self.axes {
                let mut next = Vec::with_capacity(acc.len() * values.len());
                for combo in &acc {
                    for value in values {
                        let mut c = combo.clone();
                        c.push((name.clone(), value.clone()));
                        next.push(c);
                    }
                }
                acc = next;
            }
            acc
        };

        for entry in &self.exclude {
            for (k, _) in entry {
                if !self.axes.iter().any(|(name, _)| name == k) {
                    return Err(CiError::InvalidMatrix {
                        job: job_id.to_string(),
                        reason: format!("exclude references unknown axis '{k}'"),
                    });
                }
            }
            combos.retain(|combo| !entry.iter().all(|(k, v)| lookup(combo, k) == Some(v)));
        }

        for entry in &self.include {
            let mut matched = false;
            for combo in combos.iter_mut() {
                let agrees = entry
                    .iter()
                    .filter(|(k, _)| self.is_axis(k))
                    .all(|(k, v)| lookup(combo, k) == Some(v));
                if agrees && !self.axes.is_empty() {
                    matched = true;
                    for (k, v) in entry.iter().filter(|(k, _)| !self.is_axis(k)) {
                        set(combo, k, v);
                    }
                }
            }
            if !matched {
                combos.push(entry.clone());
            }
        }

        if combos.is_empty() {
            return Err(CiError::EmptyMatrix(job_id.to_string()));
        }
        Ok(combos)
    }

    fn is_axis(&self, key: &str) -> bool {
        self.axes.iter().any(|(name, _)| name == key)
    }
}

fn lookup<'a>(combo: &'a Combination, key: &str) -> Option<&'a String> {
    combo.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn set(combo: &mut Combination, key: &str, value: &str) {
    match combo.iter_mut().find(|(k, _)| k == key) {
        Some((_, v)) => *v = value.to_string(),
        None => combo.push((key.to_string(), value.to_string())),
    }
}

/// Serialize a [`Combination`] as an ordered map and read it back.
pub mod pairs {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    use super::Combination;

    pub fn serialize<S>(pairs: &Combination, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.collect_map(pairs.iter().map(|(k, v)| (k, v)))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Combination, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = Combination;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of matrix values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    pairs.push((k, v));
                }
                Ok(pairs)
            }
        }

        d.deserialize_map(PairsVisitor)
    }
}
