use anyhow::{Context, Error, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

const BUNDLED: &str = include_str!("../../data/landmarks_map.json");

/// Ordered mapping of anatomical landmark label to face mesh index. A `None`
/// index marks a label with no mesh counterpart, resolved some other way.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMap {
    entries: Vec<(String, Option<usize>)>,
}

impl SemanticMap {
    pub fn new(entries: Vec<(String, Option<usize>)>) -> Result<SemanticMap> {
        let mut seen = HashSet::new();
        for (label, _) in &entries {
            if !seen.insert(label.as_str()) {
                return Err(Error::msg(format!("duplicate landmark label {label}")));
            }
        }

        Ok(SemanticMap { entries })
    }

    pub fn bundled() -> Result<SemanticMap> {
        SemanticMap::from_json(BUNDLED)
    }

    pub fn load(path: &Path) -> Result<SemanticMap> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading landmark map {}", path.display()))?;
        SemanticMap::from_json(&raw)
    }

    /// Parse a JSON object of `label: index | null`, keeping declaration order.
    pub fn from_json(raw: &str) -> Result<SemanticMap> {
        let value: Value = serde_json::from_str(raw)?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::msg("landmark map must be a JSON object"))?;

        let mut entries = Vec::with_capacity(object.len());
        for (label, index) in object {
            let index = match index {
                Value::Null => None,
                Value::Number(n) => match n.as_u64() {
                    Some(i) => Some(i as usize),
                    None => {
                        return Err(Error::msg(format!(
                            "landmark {label} has invalid mesh index {n}"
                        )));
                    }
                },
                other => {
                    return Err(Error::msg(format!(
                        "landmark {label} has invalid mesh index {other}"
                    )));
                }
            };
            entries.push((label.clone(), index));
        }

        SemanticMap::new(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<usize>)> {
        self.entries.iter().map(|(l, i)| (l.as_str(), *i))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|(l, _)| l == label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
